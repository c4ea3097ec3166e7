use std::time::Duration;

use ebft_consensus_core::block::BlockData;
use ebft_consensus_core::timestamp::Timestamp;

use super::{
    BaseBlockBuildingStrategy, BaseBlockBuildingStrategyConfig, BlockBuildingStrategy as _,
    OnDemandBlockBuildingStrategy,
};

const MS: u64 = 1000;

fn at(millis: u64) -> Timestamp {
    Timestamp::from(millis * MS)
}

fn block_at(height: u64, millis: u64) -> BlockData {
    BlockData::builder()
        .height(height.into())
        .timestamp(at(millis))
        .build()
}

#[test]
fn base_strategy_max_block_time() {
    let mut strategy = BaseBlockBuildingStrategy::new(
        BaseBlockBuildingStrategyConfig::default(),
        Some(at(1_000_000)),
    );

    assert!(!strategy.should_build_block_at(at(1_000_000 + 29_000), 0));
    assert!(strategy.should_build_block_at(at(1_000_000 + 30_001), 0));
}

#[test]
fn base_strategy_empty_chain_builds_right_away() {
    let mut strategy = BaseBlockBuildingStrategy::new(BaseBlockBuildingStrategyConfig::default(), None);
    assert!(strategy.should_build_block_at(at(1_000_000), 0));
}

#[test]
fn base_strategy_tx_delay() {
    let mut strategy = BaseBlockBuildingStrategy::new(
        BaseBlockBuildingStrategyConfig::default(),
        Some(at(1_000_000)),
    );

    // Too soon after the last block, even with a full queue
    assert!(!strategy.should_build_block_at(at(1_000_010), 500));

    // First transaction noticed
    assert!(!strategy.should_build_block_at(at(1_000_100), 1));
    assert!(!strategy.should_build_block_at(at(1_001_000), 1));
    assert!(strategy.should_build_block_at(at(1_001_101), 1));

    strategy.block_committed(&block_at(0, 1_001_200));
    assert!(!strategy.should_build_block_at(at(1_001_300), 0));
    assert!(!strategy.should_build_block_at(at(1_001_400), 1));
    assert!(!strategy.should_build_block_at(at(1_002_300), 1));
    assert!(strategy.should_build_block_at(at(1_002_401), 1));
}

#[test]
fn base_strategy_full_queue() {
    let config = BaseBlockBuildingStrategyConfig::builder()
        .max_block_transactions(10)
        .min_inter_block_interval(Duration::ZERO)
        .build();
    let mut strategy = BaseBlockBuildingStrategy::new(config, Some(at(1_000_000)));

    assert!(!strategy.should_build_block_at(at(1_000_001), 9));
    assert!(strategy.should_build_block_at(at(1_000_002), 10));
}

#[test_log::test(tokio::test)]
async fn on_demand_strategy() {
    let (mut strategy, handle) = OnDemandBlockBuildingStrategy::new(None);
    assert!(!strategy.should_build_block(0));

    handle.build_blocks_up_to(1.into());
    assert!(strategy.should_build_block(0));

    strategy.block_committed(&block_at(0, 1));
    assert!(strategy.should_build_block(0));
    assert!(handle.await_committed(0.into()).await);

    strategy.block_committed(&block_at(1, 2));
    assert!(!strategy.should_build_block(0));
    assert_eq!(handle.committed_height(), Some(1.into()));

    // Requests never go backwards
    handle.build_blocks_up_to(0.into());
    assert!(!strategy.should_build_block(0));

    let waiter = tokio::spawn({
        let handle = handle.clone();
        async move { handle.await_committed(2.into()).await }
    });
    handle.build_blocks_up_to(2.into());
    assert!(strategy.should_build_block(0));
    strategy.block_committed(&block_at(2, 3));
    assert!(waiter.await.expect("Can't fail"));
}

#[test_log::test(tokio::test)]
async fn on_demand_await_fails_when_strategy_dropped() {
    let (strategy, handle) = OnDemandBlockBuildingStrategy::new(Some(4.into()));
    assert!(handle.await_committed(3.into()).await);
    drop(strategy);
    assert!(!handle.await_committed(5.into()).await);
}
