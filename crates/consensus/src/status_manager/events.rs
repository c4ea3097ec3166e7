use ebft_consensus_core::block::{BlockHeight, BlockRid};
use ebft_consensus_core::intent::BlockIntent;
use ebft_consensus_core::peer::PeerIdx;
use ebft_consensus_core::signed::CommitSignature;
use ebft_consensus_core::status::{NodeState, NodeStatus};
use ebft_util_fmt_opt::AsFmtOption as _;
use tracing::{debug, error, instrument, trace, warn};

use super::{StatusManager, StatusOutcome};
use crate::LOG_TARGET;

impl StatusManager {
    /// Merge a status reported by a peer
    pub fn on_status_update(&mut self, peer_idx: PeerIdx, status: NodeStatus) -> StatusOutcome {
        if peer_idx == self.my_idx {
            warn!(target: LOG_TARGET, %peer_idx, "Ignoring status update for own index");
            return StatusOutcome::Rejected;
        }
        let Some(existing) = self.node_statuses.get_mut(peer_idx.as_usize()) else {
            warn!(target: LOG_TARGET, %peer_idx, "Ignoring status update for unknown peer");
            return StatusOutcome::Rejected;
        };

        if !status.is_newer_than(existing) {
            trace!(target: LOG_TARGET, %peer_idx, %status, "Stale status update");
            return StatusOutcome::Stale;
        }

        *existing = status;
        self.recompute();
        StatusOutcome::Ok
    }

    /// A block we were fetching was received, validated and signed
    pub fn on_received_block(
        &mut self,
        block_rid: BlockRid,
        my_signature: CommitSignature,
    ) -> StatusOutcome {
        match self.intent {
            BlockIntent::FetchUnfinishedBlock {
                block_rid: expected,
            } if expected == block_rid => {
                self.accept_block(block_rid, my_signature);
                StatusOutcome::Ok
            }
            BlockIntent::FetchUnfinishedBlock {
                block_rid: expected,
            } => {
                error!(target: LOG_TARGET, %expected, %block_rid, "Received block which is irrelevant");
                StatusOutcome::Mismatch
            }
            intent => {
                debug!(target: LOG_TARGET, %intent, %block_rid, "Received block while not fetching one");
                StatusOutcome::Stale
            }
        }
    }

    /// Advance own height by exactly one
    pub fn on_height_advance(&mut self, new_height: BlockHeight) -> StatusOutcome {
        let my_height = self.my_status().height;
        if my_height.next() != Some(new_height) {
            error!(target: LOG_TARGET, %my_height, %new_height, "Height mismatch");
            return StatusOutcome::Mismatch;
        }
        self.advance_height();
        StatusOutcome::Ok
    }

    /// The block in own status got committed
    pub fn on_committed_block(&mut self, block_rid: BlockRid) -> StatusOutcome {
        let my_block_rid = self.my_status().block_rid;
        if my_block_rid != Some(block_rid) {
            error!(
                target: LOG_TARGET,
                %block_rid,
                my_block_rid = %my_block_rid.fmt_option(),
                "Committed block with wrong RID"
            );
            return StatusOutcome::Mismatch;
        }
        self.advance_height();
        StatusOutcome::Ok
    }

    /// A block was built locally, as requested by [`BlockIntent::BuildBlock`]
    pub fn on_built_block(
        &mut self,
        block_rid: BlockRid,
        my_signature: CommitSignature,
    ) -> StatusOutcome {
        if self.intent != BlockIntent::BuildBlock {
            warn!(target: LOG_TARGET, intent = %self.intent, %block_rid, "Received built block while not requesting it");
            return StatusOutcome::Stale;
        }
        if !self.is_my_node_primary() {
            warn!(target: LOG_TARGET, %block_rid, "Inconsistent state: built a block while not a primary");
            self.intent = BlockIntent::DoNothing;
            return StatusOutcome::Rejected;
        }
        self.accept_block(block_rid, my_signature);
        StatusOutcome::Ok
    }

    /// Record a (verified) commit signature of `peer_idx`
    pub fn on_commit_signature(
        &mut self,
        peer_idx: PeerIdx,
        block_rid: BlockRid,
        signature: CommitSignature,
    ) -> StatusOutcome {
        if !self.num_peers.contains(peer_idx) {
            warn!(target: LOG_TARGET, %peer_idx, "Commit signature from unknown peer");
            return StatusOutcome::Rejected;
        }
        let my = self.my_status();
        if my.state != NodeState::Prepared || my.block_rid != Some(block_rid) {
            warn!(
                target: LOG_TARGET,
                %peer_idx,
                %block_rid,
                state = %my.state,
                "Wrong commit signature"
            );
            return StatusOutcome::Stale;
        }
        self.commit_signatures[peer_idx.as_usize()] = Some(signature);
        self.recompute();
        StatusOutcome::Ok
    }

    /// Own round timed out, vote to rotate the primary
    #[instrument(target = "ebft::consensus", skip(self), fields(height = %self.my_status().height, round = %self.my_status().round))]
    pub fn on_start_revolting(&mut self) {
        debug!(target: LOG_TARGET, "Starting revolt");
        let my = self.my_status_mut();
        my.revolting = true;
        my.serial += 1;
        self.recompute();
    }

    /// Jump to `committed_height + 1`, eg. after blocks were added out of band
    pub fn fast_forward_height(&mut self, committed_height: BlockHeight) -> StatusOutcome {
        let Some(next_height) = committed_height.next() else {
            return StatusOutcome::Rejected;
        };
        let my_height = self.my_status().height;
        if next_height < my_height {
            error!(target: LOG_TARGET, %my_height, %next_height, "Failed to fast forward negative increment");
            return StatusOutcome::Mismatch;
        }
        debug!(target: LOG_TARGET, %my_height, %next_height, "Advancing block height");
        while self.my_status().height < next_height {
            self.advance_height();
        }
        StatusOutcome::Ok
    }

    fn advance_height(&mut self) {
        let my = self.my_status_mut();
        my.height = my.height.next_expect();
        my.serial += 1;
        my.block_rid = None;
        my.round = 0.into();
        my.revolting = false;
        my.state = NodeState::WaitBlock;
        debug!(target: LOG_TARGET, height = %my.height, "Advanced height");

        self.reset_commit_signatures();
        self.intent = BlockIntent::DoNothing;
        self.recompute();
    }

    fn accept_block(&mut self, block_rid: BlockRid, my_signature: CommitSignature) {
        self.reset_commit_signatures();
        let my_idx = self.my_idx;
        let my = self.my_status_mut();
        my.block_rid = Some(block_rid);
        my.serial += 1;
        my.state = NodeState::HaveBlock;
        debug!(target: LOG_TARGET, height = %my.height, %block_rid, "Accepted block");

        self.commit_signatures[my_idx.as_usize()] = Some(my_signature);
        self.intent = BlockIntent::DoNothing;
        self.recompute();
    }

    pub(super) fn reset_commit_signatures(&mut self) {
        self.commit_signatures.fill(None);
    }
}
