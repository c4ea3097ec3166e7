//! Consensus state machine
//!
//! Keeps the believed [`NodeStatus`] of every validator (own status
//! included, at `my_idx`) and the commit signatures collected for the
//! block at the current height. Every event mutates that state and then
//! recomputes the [`BlockIntent`] until nothing changes anymore.
//!
//! Nothing in here does IO, blocks or looks at the clock.

mod events;
mod getters;
mod init;
mod recompute;

use ebft_consensus_core::intent::BlockIntent;
use ebft_consensus_core::num_peers::NumPeers;
use ebft_consensus_core::peer::PeerIdx;
use ebft_consensus_core::signed::CommitSignature;
use ebft_consensus_core::status::NodeStatus;
pub use init::InitError;

#[cfg(test)]
mod tests;

/// Result of feeding an event into [`StatusManager`]
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    /// Event applied
    Ok,
    /// Event no longer relevant (lost a race with another event); ignorable
    Stale,
    /// Event contradicts own state; indicates a bug somewhere
    Mismatch,
    /// Event refused (eg. not a primary anymore, invalid peer index)
    Rejected,
}

impl StatusOutcome {
    pub fn is_ok(self) -> bool {
        self == StatusOutcome::Ok
    }
}

pub struct StatusManager {
    num_peers: NumPeers,
    my_idx: PeerIdx,
    /// Indexed by [`PeerIdx`], own status included
    node_statuses: Vec<NodeStatus>,
    /// Indexed by [`PeerIdx`], for the block in own status
    commit_signatures: Vec<Option<CommitSignature>>,
    intent: BlockIntent,
    recompute_max_iterations: usize,
    recompute_cap_hits: u64,
}
