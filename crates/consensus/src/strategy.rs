//! When the primary should actually build a block
//!
//! [`BlockIntent::BuildBlock`](ebft_consensus_core::intent::BlockIntent)
//! only says it's our turn; a [`BlockBuildingStrategy`] decides whether
//! there is something worth putting in a block yet.

use std::sync::Arc;
use std::time::Duration;

use ebft_consensus_core::block::{BlockData, BlockHeight};
use ebft_consensus_core::timestamp::Timestamp;
use ebft_util_fmt_opt::AsFmtOption as _;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::LOG_TARGET;
use crate::config::duration_millis;

#[cfg(test)]
mod tests;

pub trait BlockBuildingStrategy: Send {
    fn should_build_block(&mut self, transaction_queue_size: usize) -> bool;

    fn block_committed(&mut self, block: &BlockData);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(default, rename_all = "kebab-case")]
pub struct BaseBlockBuildingStrategyConfig {
    /// Build a (possibly empty) block at least this often
    #[builder(default = Duration::from_millis(30_000))]
    #[serde(with = "duration_millis")]
    pub max_block_time: Duration,
    #[builder(default = 100)]
    pub max_block_transactions: usize,
    /// Longest a pending transaction waits for a block
    #[builder(default = Duration::from_millis(1000))]
    #[serde(with = "duration_millis")]
    pub max_tx_delay: Duration,
    #[builder(default = Duration::from_millis(25))]
    #[serde(with = "duration_millis")]
    pub min_inter_block_interval: Duration,
}

impl Default for BaseBlockBuildingStrategyConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Time and queue size based strategy
pub struct BaseBlockBuildingStrategy {
    config: BaseBlockBuildingStrategyConfig,
    last_block_time: Timestamp,
    /// When a non-empty queue was first noticed since the last block
    first_tx_time: Option<Timestamp>,
}

impl BaseBlockBuildingStrategy {
    /// `last_block_time` is the timestamp of the best block, if any
    pub fn new(config: BaseBlockBuildingStrategyConfig, last_block_time: Option<Timestamp>) -> Self {
        Self {
            config,
            last_block_time: last_block_time.unwrap_or_default(),
            first_tx_time: None,
        }
    }

    pub(crate) fn should_build_block_at(&mut self, now: Timestamp, queue_size: usize) -> bool {
        let since_last_block = now.saturating_duration_since(self.last_block_time);
        if self.config.max_block_time < since_last_block {
            return true;
        }
        if since_last_block < self.config.min_inter_block_interval {
            return false;
        }
        if let Some(first_tx_time) = self.first_tx_time {
            if self.config.max_tx_delay < now.saturating_duration_since(first_tx_time) {
                return true;
            }
        }
        if self.config.max_block_transactions <= queue_size {
            return true;
        }
        if self.first_tx_time.is_none() && 0 < queue_size {
            self.first_tx_time = Some(now);
        }
        false
    }
}

impl BlockBuildingStrategy for BaseBlockBuildingStrategy {
    fn should_build_block(&mut self, transaction_queue_size: usize) -> bool {
        self.should_build_block_at(Timestamp::now(), transaction_queue_size)
    }

    fn block_committed(&mut self, block: &BlockData) {
        self.last_block_time = block.header.timestamp;
        self.first_tx_time = None;
    }
}

/// Builds blocks only when asked to, through an [`OnDemandHandle`]
///
/// Handy in tests and simulations, where block production must be
/// deterministic.
pub struct OnDemandBlockBuildingStrategy {
    up_to_rx: watch::Receiver<Option<BlockHeight>>,
    committed_tx: Arc<watch::Sender<Option<BlockHeight>>>,
}

#[derive(Clone)]
pub struct OnDemandHandle {
    up_to_tx: Arc<watch::Sender<Option<BlockHeight>>>,
    committed_rx: watch::Receiver<Option<BlockHeight>>,
}

impl OnDemandBlockBuildingStrategy {
    /// `committed_height` is the best height at startup, if any
    pub fn new(committed_height: Option<BlockHeight>) -> (Self, OnDemandHandle) {
        let (up_to_tx, up_to_rx) = watch::channel(None);
        let (committed_tx, committed_rx) = watch::channel(committed_height);
        (
            Self {
                up_to_rx,
                committed_tx: Arc::new(committed_tx),
            },
            OnDemandHandle {
                up_to_tx: Arc::new(up_to_tx),
                committed_rx,
            },
        )
    }
}

impl BlockBuildingStrategy for OnDemandBlockBuildingStrategy {
    fn should_build_block(&mut self, _transaction_queue_size: usize) -> bool {
        let Some(up_to) = *self.up_to_rx.borrow() else {
            return false;
        };
        match *self.committed_tx.borrow() {
            Some(committed) => committed < up_to,
            None => true,
        }
    }

    fn block_committed(&mut self, block: &BlockData) {
        let height = block.height();
        debug!(target: LOG_TARGET, %height, "On-demand block committed");
        self.committed_tx.send_replace(Some(height));
    }
}

impl OnDemandHandle {
    /// Allow building blocks up to and including `height`
    pub fn build_blocks_up_to(&self, height: BlockHeight) {
        debug!(target: LOG_TARGET, %height, "Requesting blocks");
        self.up_to_tx.send_modify(|up_to| *up_to = (*up_to).max(Some(height)));
    }

    pub fn committed_height(&self) -> Option<BlockHeight> {
        *self.committed_rx.borrow()
    }

    /// Wait until a block at `height` (or higher) is committed
    ///
    /// Returns `false` if the strategy was dropped before that.
    pub async fn await_committed(&self, height: BlockHeight) -> bool {
        let mut committed_rx = self.committed_rx.clone();
        let res = committed_rx
            .wait_for(|committed| committed.is_some_and(|committed| height <= committed))
            .await
            .is_ok();
        debug!(
            target: LOG_TARGET,
            %height,
            committed = %self.committed_height().fmt_option(),
            "Awaited committed block"
        );
        res
    }
}
