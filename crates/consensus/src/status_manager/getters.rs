use ebft_consensus_core::intent::BlockIntent;
use ebft_consensus_core::num_peers::NumPeers;
use ebft_consensus_core::peer::PeerIdx;
use ebft_consensus_core::signed::CommitSignature;
use ebft_consensus_core::status::NodeStatus;

use super::StatusManager;

impl StatusManager {
    /// Recompute to a fixed point and return the current intent
    pub fn block_intent(&mut self) -> BlockIntent {
        self.recompute();
        self.intent
    }

    /// Current intent, as of the last recompute
    pub fn intent(&self) -> BlockIntent {
        self.intent
    }

    /// Index of the validator expected to build the block
    pub fn primary_index(&self) -> PeerIdx {
        let my = self.my_status();
        self.num_peers.primary_idx(my.height, my.round)
    }

    pub fn is_my_node_primary(&self) -> bool {
        self.primary_index() == self.my_idx
    }

    pub fn my_status(&self) -> &NodeStatus {
        &self.node_statuses[self.my_idx.as_usize()]
    }

    pub(super) fn my_status_mut(&mut self) -> &mut NodeStatus {
        &mut self.node_statuses[self.my_idx.as_usize()]
    }

    pub fn node_statuses(&self) -> &[NodeStatus] {
        &self.node_statuses
    }

    pub fn node_status(&self, peer_idx: PeerIdx) -> Option<&NodeStatus> {
        self.node_statuses.get(peer_idx.as_usize())
    }

    pub fn commit_signatures(&self) -> &[Option<CommitSignature>] {
        &self.commit_signatures
    }

    pub fn my_commit_signature(&self) -> Option<CommitSignature> {
        self.commit_signatures[self.my_idx.as_usize()]
    }

    pub fn my_idx(&self) -> PeerIdx {
        self.my_idx
    }

    pub fn num_peers(&self) -> NumPeers {
        self.num_peers
    }

    /// Number of validators that need to agree, `Q(n)`
    pub fn quorum(&self) -> usize {
        self.num_peers.threshold()
    }

    /// How many times recompute gave up without reaching a fixed point
    pub fn recompute_cap_hits(&self) -> u64 {
        self.recompute_cap_hits
    }
}
