//! Handling of messages from other validators

use ebft_consensus::status_manager::StatusOutcome;
use ebft_consensus_core::block::BlockRid;
use ebft_consensus_core::msg::EbftMessage;
use ebft_consensus_core::peer::PeerIdx;
use ebft_consensus_core::signed::CommitSignature;
use ebft_consensus_core::status::NodeStatus;
use tracing::{debug, trace, warn};

use super::ChainWorker;
use crate::LOG_TARGET;

impl ChainWorker {
    pub(super) fn on_peer_message(&mut self, from: PeerIdx, msg: EbftMessage) {
        if from == self.my_idx() || self.peers.len() <= from.as_usize() {
            debug!(target: LOG_TARGET, %from, kind = msg.kind(), "Dropping message from unknown peer");
            return;
        }
        trace!(target: LOG_TARGET, %from, kind = msg.kind(), "Peer message");

        match msg {
            EbftMessage::Status(status) => self.on_status_update(from, status),
            EbftMessage::GetUnfinishedBlock { block_rid } => {
                let Some(block) = self
                    .block_manager
                    .current_block()
                    .filter(|block| block.rid() == block_rid)
                else {
                    trace!(target: LOG_TARGET, %from, %block_rid, "Requested unfinished block not current");
                    return;
                };
                self.send_to(from, EbftMessage::UnfinishedBlock(block.clone()));
            }
            EbftMessage::UnfinishedBlock(block) => {
                self.block_manager.on_received_unfinished_block(block);
            }
            EbftMessage::GetBlockAtHeight { height } => {
                let Some(block) = self.block_manager.db().block_at_height(height) else {
                    trace!(target: LOG_TARGET, %from, %height, "Requested block not found");
                    return;
                };
                self.send_to(from, EbftMessage::CompleteBlock { height, block });
            }
            EbftMessage::CompleteBlock { height, block } => {
                self.block_manager.on_received_block_at_height(block, height);
            }
            EbftMessage::GetBlockSignature { block_rid } => {
                let Some(signature) = self.own_block_signature(block_rid) else {
                    trace!(target: LOG_TARGET, %from, %block_rid, "No signature for requested block");
                    return;
                };
                self.send_to(
                    from,
                    EbftMessage::BlockSignature {
                        block_rid,
                        signature,
                    },
                );
            }
            EbftMessage::BlockSignature {
                block_rid,
                signature,
            } => self.on_commit_signature(from, block_rid, signature),
        }
    }

    pub(super) fn on_status_update(&mut self, from: PeerIdx, status: NodeStatus) {
        match self
            .block_manager
            .status_manager_mut()
            .on_status_update(from, status)
        {
            StatusOutcome::Ok | StatusOutcome::Stale => {}
            outcome => {
                debug!(target: LOG_TARGET, %from, %status, ?outcome, "Status update not applied");
            }
        }
    }

    /// Verify and record a commit signature `from` sent over `block_rid`
    pub(super) fn on_commit_signature(
        &mut self,
        from: PeerIdx,
        block_rid: BlockRid,
        signature: CommitSignature,
    ) {
        if self.peers.get(from.as_usize()) != Some(&signature.signer) {
            warn!(target: LOG_TARGET, %from, signer = %signature.signer, "Commit signature signed by someone else");
            return;
        }
        if self.my_status().block_rid != Some(block_rid) {
            trace!(target: LOG_TARGET, %from, %block_rid, "Commit signature for a block we don't have");
            return;
        }
        if !self.block_manager.db().verify_block_signature(&signature) {
            warn!(target: LOG_TARGET, %from, %block_rid, "Invalid commit signature");
            return;
        }
        let _ = self
            .block_manager
            .status_manager_mut()
            .on_commit_signature(from, block_rid, signature);
    }

    /// Own signature over the current block, or a committed one
    fn own_block_signature(&self, block_rid: BlockRid) -> Option<CommitSignature> {
        let status_manager = self.block_manager.status_manager();
        if status_manager.my_status().block_rid == Some(block_rid) {
            if let Some(signature) = status_manager.my_commit_signature() {
                return Some(signature);
            }
        }
        self.block_manager.db().block_signature(block_rid)
    }
}
