// SPDX-License-Identifier: MIT

//! EBFT simulation
//!
//! Runs a whole validator set in one process, over an in-memory network,
//! logging progress as blocks get committed.

mod logging;
mod opts;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser as _;
use ebft_consensus::config::EbftConfig;
use ebft_consensus::strategy::BaseBlockBuildingStrategyConfig;
use ebft_consensus_core::block::BlockHeight;
use ebft_consensus_core::peer::PeerIdx;
use ebft_engine_mem::{MemBlockEngine, MemCluster, MemStrategy};
use ebft_util_error::WhateverResult;
use n0_future::task::AbortOnDropHandle;
use opts::Opts;
use snafu::{OptionExt as _, ResultExt as _, ensure_whatever};
use tokio::select;
use tracing::{debug, info};

const LOG_TARGET: &str = "ebft";

pub async fn run() -> WhateverResult<()> {
    let opts = Opts::parse();
    logging::init_logging(opts.log_level)?;

    ensure_whatever!(0 < opts.validators, "At least one validator is required");
    let config = load_config(&opts).await?;
    info!(target: LOG_TARGET, validators = opts.validators, ?config, "Starting simulation");

    let cluster = MemCluster::builder()
        .num_peers(opts.validators)
        .config(config)
        .strategy(MemStrategy::Base(BaseBlockBuildingStrategyConfig::default()))
        .build()?;
    for &idx in &opts.offline {
        info!(target: LOG_TARGET, peer_idx = idx, "Keeping validator offline");
        cluster.network().set_online(PeerIdx::new(idx), false);
    }

    let _tx_task = (0 < opts.tx_interval_ms).then(|| {
        let engines = cluster.validators().iter().map(|v| v.engine.clone()).collect();
        AbortOnDropHandle::new(tokio::spawn(submit_transactions(
            engines,
            Duration::from_millis(opts.tx_interval_ms),
        )))
    });
    let _progress_task = spawn_progress_logger(&cluster)?;

    select! {
        res = run_until(&cluster, opts.target_height) => res?,
        res = tokio::signal::ctrl_c() => {
            res.whatever_context("Failed to wait for Ctrl-C")?;
            info!(target: LOG_TARGET, "Interrupted");
        }
    }

    cluster.shutdown().await;

    println!(
        "{}",
        serde_json::to_string_pretty(&cluster.statuses())
            .whatever_context("Failed to serialize final statuses")?
    );
    Ok(())
}

async fn load_config(opts: &Opts) -> WhateverResult<EbftConfig> {
    let mut config = match &opts.config {
        Some(path) => {
            let json = tokio::fs::read_to_string(path)
                .await
                .whatever_context("Failed to read config file")?;
            serde_json::from_str(&json).whatever_context("Failed to parse config file")?
        }
        None => EbftConfig::default(),
    };
    if let Some(tick_ms) = opts.tick_ms {
        config.tick_interval = Duration::from_millis(tick_ms);
    }
    if let Some(revolt_timeout_ms) = opts.revolt_timeout_ms {
        config.revolt_timeout = Duration::from_millis(revolt_timeout_ms);
    }
    Ok(config)
}

async fn run_until(cluster: &MemCluster, target_height: Option<u64>) -> WhateverResult<()> {
    match target_height {
        Some(target_height) => {
            cluster.await_height(BlockHeight::from(target_height)).await?;
            info!(target: LOG_TARGET, %target_height, "Target height reached");
            Ok(())
        }
        None => std::future::pending().await,
    }
}

/// Submit a stream of made up transactions to every validator
///
/// Whichever validator is the primary picks them up; the others drop their
/// copies once the block gets committed.
async fn submit_transactions(engines: Vec<Arc<MemBlockEngine>>, interval: Duration) {
    let mut interval = tokio::time::interval(interval);
    for nonce in 0u64.. {
        interval.tick().await;
        let tx = nonce.to_be_bytes().to_vec();
        for engine in &engines {
            engine.submit_transaction(tx.clone());
        }
        debug!(target: LOG_TARGET, %nonce, "Submitted transaction");
    }
}

/// Log every height the first online validator reaches
fn spawn_progress_logger(cluster: &MemCluster) -> WhateverResult<AbortOnDropHandle<()>> {
    let (peer_idx, validator) = cluster
        .validators()
        .iter()
        .enumerate()
        .filter_map(|(idx, v)| Some((PeerIdx::new(u8::try_from(idx).ok()?), v)))
        .find(|(peer_idx, _)| cluster.network().is_online(*peer_idx))
        .whatever_context("All validators are offline")?;

    let engine = validator.engine.clone();
    let mut status_rx = validator.handle.status_rx();
    Ok(AbortOnDropHandle::new(tokio::spawn(async move {
        let mut last_height = status_rx.borrow().height;
        while status_rx.changed().await.is_ok() {
            let status = *status_rx.borrow();
            if status.height == last_height {
                continue;
            }
            last_height = status.height;
            let txs = engine
                .blocks()
                .last()
                .map_or(0, |block| block.data.transactions.len());
            info!(target: LOG_TARGET, %peer_idx, height = %status.height, last_block_txs = txs, "New height");
        }
    })))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::Parser as _;
    use ebft_consensus::config::EbftConfig;

    use super::load_config;
    use crate::opts::Opts;

    #[test]
    fn command_line_overrides_config() {
        let opts = Opts::try_parse_from(["ebft", "--tick-ms", "5", "--offline", "2"])
            .expect("Valid options");
        assert_eq!(opts.validators, 4);
        assert_eq!(opts.offline, vec![2]);

        let config = tokio_test::block_on(load_config(&opts)).expect("No config file to read");
        assert_eq!(config.tick_interval, Duration::from_millis(5));
        assert_eq!(config.revolt_timeout, EbftConfig::default().revolt_timeout);
    }
}
