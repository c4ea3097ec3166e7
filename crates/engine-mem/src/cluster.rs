use std::sync::Arc;

use ebft_consensus::config::EbftConfig;
use ebft_consensus::engine::BlockEngine as _;
use ebft_consensus::strategy::{
    BaseBlockBuildingStrategy, BaseBlockBuildingStrategyConfig, BlockBuildingStrategy,
    OnDemandBlockBuildingStrategy, OnDemandHandle,
};
use ebft_consensus_core::block::BlockHeight;
use ebft_consensus_core::peer::{PeerIdx, PeerSeckey};
use ebft_consensus_core::status::NodeStatus;
use ebft_node::{ChainWorker, ChainWorkerHandle};
use ebft_util_error::WhateverResult;
use ebft_util_error::fmt::FmtCompact as _;
use snafu::{ResultExt as _, whatever};
use tracing::{debug, info};

use crate::{LOG_TARGET, MemBlockEngine, MemNetwork};

/// How validators of a [`MemCluster`] decide to build blocks
#[derive(Debug, Clone, Default)]
pub enum MemStrategy {
    /// Only up to the height given to [`MemCluster::build_blocks_up_to`]
    #[default]
    OnDemand,
    Base(BaseBlockBuildingStrategyConfig),
}

pub struct MemValidator {
    pub engine: Arc<MemBlockEngine>,
    pub handle: ChainWorkerHandle,
    pub on_demand: Option<OnDemandHandle>,
}

/// A whole chain's validator set running in one process
pub struct MemCluster {
    network: Arc<MemNetwork>,
    validators: Vec<MemValidator>,
}

#[bon::bon]
impl MemCluster {
    /// Start `num_peers` validators connected over a fresh [`MemNetwork`]
    #[builder]
    pub fn new(
        num_peers: usize,
        #[builder(default)] config: EbftConfig,
        #[builder(default)] strategy: MemStrategy,
    ) -> WhateverResult<Self> {
        let seckeys: Vec<_> = (0..num_peers).map(|_| PeerSeckey::generate()).collect();
        let peers: Vec<_> = seckeys.iter().map(|seckey| seckey.pubkey()).collect();
        let network = MemNetwork::new(num_peers);

        let mut validators = Vec::with_capacity(num_peers);
        for (idx, seckey) in seckeys.into_iter().enumerate() {
            let my_idx = PeerIdx::new(u8::try_from(idx).whatever_context("Too many validators")?);
            let engine = Arc::new(
                MemBlockEngine::builder()
                    .seckey(seckey)
                    .peers(peers.clone())
                    .build(),
            );

            let (block_strategy, on_demand) = match &strategy {
                MemStrategy::OnDemand => {
                    let (strategy, handle) =
                        OnDemandBlockBuildingStrategy::new(engine.best_height());
                    (
                        Box::new(strategy) as Box<dyn BlockBuildingStrategy>,
                        Some(handle),
                    )
                }
                MemStrategy::Base(config) => (
                    Box::new(BaseBlockBuildingStrategy::new(config.clone(), None))
                        as Box<dyn BlockBuildingStrategy>,
                    None,
                ),
            };

            let handle = ChainWorker::builder()
                .config(config.clone())
                .peers(peers.clone())
                .my_idx(my_idx)
                .engine(engine.clone())
                .transport(network.transport(my_idx))
                .strategy(block_strategy)
                .build()
                .whatever_context("Failed to create chain worker")?
                .spawn();
            network.connect(my_idx, handle.clone())?;

            validators.push(MemValidator {
                engine,
                handle,
                on_demand,
            });
        }
        info!(target: LOG_TARGET, %num_peers, "Cluster started");

        Ok(Self {
            network,
            validators,
        })
    }
}

impl MemCluster {
    pub fn network(&self) -> &Arc<MemNetwork> {
        &self.network
    }

    pub fn validators(&self) -> &[MemValidator] {
        &self.validators
    }

    pub fn validator(&self, peer_idx: PeerIdx) -> Option<&MemValidator> {
        self.validators.get(peer_idx.as_usize())
    }

    pub fn statuses(&self) -> Vec<NodeStatus> {
        self.validators.iter().map(|v| v.handle.my_status()).collect()
    }

    /// Let on-demand validators build blocks up to `height`
    pub fn build_blocks_up_to(&self, height: BlockHeight) {
        for on_demand in self.validators.iter().filter_map(|v| v.on_demand.as_ref()) {
            on_demand.build_blocks_up_to(height);
        }
    }

    /// Wait until every online validator has committed the block at `height`
    pub async fn await_height(&self, height: BlockHeight) -> WhateverResult<()> {
        for (idx, validator) in self.validators.iter().enumerate() {
            let peer_idx = PeerIdx::new(u8::try_from(idx).whatever_context("Too many validators")?);
            if !self.network.is_online(peer_idx) {
                continue;
            }
            let mut status_rx = validator.handle.status_rx();
            if status_rx
                .wait_for(|status| height < status.height)
                .await
                .is_err()
            {
                whatever!("Chain worker {peer_idx} gone");
            }
            debug!(target: LOG_TARGET, %peer_idx, %height, "Validator reached height");
        }
        Ok(())
    }

    /// Stop every validator, rolling back anything staged
    pub async fn shutdown(&self) {
        self.network.disconnect_all();
        for validator in &self.validators {
            validator.engine.close();
            if let Err(err) = validator.handle.shutdown().await {
                debug!(target: LOG_TARGET, err = %err.fmt_compact(), "Chain worker already gone");
            }
        }
    }
}
