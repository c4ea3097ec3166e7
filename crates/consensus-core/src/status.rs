use std::fmt;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::block::{BlockHeight, BlockRid, BlockRound};
use crate::timestamp::Timestamp;


/// Offset subtracted from wall-clock milliseconds when seeding serials
pub const SERIAL_EPOCH_MILLIS: u64 = 1_518_000_000_000;

/// Progress of a validator at its current height
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode, Serialize,
    Deserialize,
)]
pub enum NodeState {
    /// Waiting for the primary to produce a block
    #[default]
    WaitBlock,
    /// Has the block loaded and signed
    HaveBlock,
    /// Saw a quorum holding the block, collecting commit signatures
    Prepared,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeState::WaitBlock => "wait-block",
            NodeState::HaveBlock => "have-block",
            NodeState::Prepared => "prepared",
        })
    }
}

/// Status a validator reports about itself
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Encode, Decode, Serialize, Deserialize,
)]
pub struct NodeStatus {
    pub height: BlockHeight,
    pub round: BlockRound,
    pub state: NodeState,
    pub block_rid: Option<BlockRid>,
    pub revolting: bool,
    /// Per-node logical clock, bumped on every local change
    pub serial: u64,
}

impl NodeStatus {
    pub fn new(height: BlockHeight, serial: u64) -> Self {
        Self {
            height,
            serial,
            ..Self::default()
        }
    }

    /// Starting serial for a freshly started node
    ///
    /// Derived from the wall clock, so a restarted node does not
    /// look older than what its peers last heard from it.
    pub fn initial_serial() -> u64 {
        Timestamp::now()
            .as_millis()
            .saturating_sub(SERIAL_EPOCH_MILLIS)
    }

    /// Should `self` replace `other` as the believed status of a peer
    pub fn is_newer_than(&self, other: &NodeStatus) -> bool {
        other.serial < self.serial
            || other.height < self.height
            || (other.height == self.height && other.round < self.round)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h={} r={} {}", self.height, self.round, self.state)?;
        if let Some(rid) = self.block_rid {
            write!(f, " rid={rid:#}")?;
        }
        if self.revolting {
            f.write_str(" revolting")?;
        }
        write!(f, " s={}", self.serial)
    }
}
