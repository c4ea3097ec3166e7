use std::future::Future;
use std::time::Duration;

use ebft_consensus::config::EbftConfig;
use ebft_consensus_core::block::{BlockDataWithWitness, BlockHeight, BlockRid};
use ebft_consensus_core::num_peers::ToNumPeers as _;
use ebft_consensus_core::peer::PeerIdx;
use ebft_engine_mem::{MemCluster, MemStrategy};
use ebft_util_error::{BoxedErrorResult, WhateverResult};
use snafu::ResultExt as _;
use tracing::info;

const TEST_TIMEOUT: Duration = Duration::from_secs(60);

fn test_config(revolt_timeout: Duration) -> EbftConfig {
    EbftConfig::builder()
        .tick_interval(Duration::from_millis(10))
        .status_resend_interval(Duration::from_millis(100))
        .revolt_timeout(revolt_timeout)
        .intent_retry_timeout(Duration::from_millis(100))
        .build()
}

fn cluster(num_peers: usize) -> WhateverResult<MemCluster> {
    cluster_with_revolt_timeout(num_peers, Duration::from_secs(5))
}

fn cluster_with_revolt_timeout(
    num_peers: usize,
    revolt_timeout: Duration,
) -> WhateverResult<MemCluster> {
    MemCluster::builder()
        .num_peers(num_peers)
        .config(test_config(revolt_timeout))
        .strategy(MemStrategy::OnDemand)
        .build()
}

async fn with_timeout<T>(f: impl Future<Output = WhateverResult<T>>) -> WhateverResult<T> {
    tokio::time::timeout(TEST_TIMEOUT, f)
        .await
        .whatever_context("Timed out")?
}

/// Every online validator holds the same, properly witnessed chain
///
/// Witnesses are compared by quorum only: each validator commits with the
/// signatures it happened to collect.
fn assert_chains_agree(cluster: &MemCluster, skip: &[PeerIdx]) {
    let threshold = cluster.validators().to_num_peers().threshold();

    let mut reference: Option<Vec<BlockRid>> = None;
    for (idx, validator) in cluster.validators().iter().enumerate() {
        if skip.contains(&PeerIdx::new(u8::try_from(idx).expect("Can't fail"))) {
            continue;
        }
        let blocks = validator.engine.blocks();
        for (height, block) in blocks.iter().enumerate() {
            assert_eq!(
                block.data.height(),
                BlockHeight::from(u64::try_from(height).expect("Can't fail"))
            );
            let prev = height.checked_sub(1).map(|prev| blocks[prev].rid());
            assert_eq!(block.data.header.prev_block_rid, prev);
            assert!(block.data.is_payload_consistent());
            assert!(threshold <= block.witness.signatures.len());
        }

        let rids: Vec<_> = blocks.iter().map(BlockDataWithWitness::rid).collect();
        match &reference {
            None => reference = Some(rids),
            Some(reference) => {
                let common = reference.len().min(rids.len());
                assert_eq!(reference[..common], rids[..common], "peer {idx} diverged");
            }
        }
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn single_validator_commits_blocks() -> BoxedErrorResult<()> {
    let cluster = cluster(1)?;
    let validator = &cluster.validators()[0];
    validator.engine.submit_transaction(vec![1u8]);

    cluster.build_blocks_up_to(4.into());
    with_timeout(cluster.await_height(4.into())).await?;

    let blocks = validator.engine.blocks();
    assert_eq!(blocks.len(), 5);
    assert_eq!(blocks[0].data.transactions.len(), 1);
    assert_eq!(validator.handle.my_status().height, BlockHeight::from(5));

    cluster.shutdown().await;
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn four_validators_agree_on_blocks() -> BoxedErrorResult<()> {
    let cluster = cluster(4)?;
    for (i, validator) in cluster.validators().iter().enumerate() {
        validator
            .engine
            .submit_transaction(vec![u8::try_from(i).expect("Can't fail")]);
    }

    cluster.build_blocks_up_to(5.into());
    with_timeout(cluster.await_height(5.into())).await?;
    info!(statuses = ?cluster.statuses(), "Reached height");

    assert_chains_agree(&cluster, &[]);

    // Each validator was primary at least once, so each own transaction got in
    let blocks = cluster.validators()[0].engine.blocks();
    let num_txs: usize = blocks.iter().map(|b| b.data.transactions.len()).sum();
    assert_eq!(num_txs, 4);

    cluster.shutdown().await;
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn silent_primary_gets_revolted_away() -> BoxedErrorResult<()> {
    let cluster = cluster_with_revolt_timeout(4, Duration::from_millis(300))?;
    // Primary of height 0, round 0
    let silent = PeerIdx::new(0);
    cluster.network().set_online(silent, false);

    cluster.build_blocks_up_to(1.into());
    with_timeout(cluster.await_height(1.into())).await?;

    let statuses = cluster.statuses();
    info!(?statuses, "Reached height");
    assert!(cluster.validators()[0].engine.blocks().is_empty());
    assert_chains_agree(&cluster, &[silent]);

    // Committed without the silent primary
    let silent_pubkey = cluster.validators()[0].engine.pubkey();
    let blocks = cluster.validators()[1].engine.blocks();
    assert!(
        blocks[0]
            .witness
            .signatures
            .iter()
            .all(|sig| sig.signer != silent_pubkey)
    );

    cluster.shutdown().await;
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn lagging_validator_catches_up() -> BoxedErrorResult<()> {
    let cluster = cluster(4)?;
    let lagging = PeerIdx::new(3);
    cluster.network().set_online(lagging, false);

    cluster.build_blocks_up_to(2.into());
    with_timeout(cluster.await_height(2.into())).await?;
    assert!(cluster.validators()[3].engine.blocks().is_empty());

    cluster.network().set_online(lagging, true);
    with_timeout(cluster.await_height(2.into())).await?;

    assert!(3 <= cluster.validators()[3].engine.blocks().len());
    assert_chains_agree(&cluster, &[]);

    cluster.shutdown().await;
    Ok(())
}
