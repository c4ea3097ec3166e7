use ebft_consensus_core::intent::BlockIntent;
use ebft_consensus_core::peer_idx_set::PeerIdxSet;
use ebft_consensus_core::status::NodeState;
use tracing::{debug, error, warn};

use super::StatusManager;
use crate::LOG_TARGET;

/// What a recompute stage wants the step to do next
enum Flow {
    /// Nothing decided, go to the next stage
    RunOn,
    /// Something changed, run another step
    Continue,
    /// Fixed point reached
    Break,
}

impl StatusManager {
    /// Run recompute steps until nothing changes
    pub(super) fn recompute(&mut self) {
        for _ in 0..self.recompute_max_iterations {
            if !self.recompute_step() {
                return;
            }
        }
        self.recompute_cap_hits += 1;
        let my = *self.my_status();
        error!(
            target: LOG_TARGET,
            max_iterations = self.recompute_max_iterations,
            status = %my,
            intent = %self.intent,
            "Recompute did not reach a fixed point"
        );
    }

    /// Single recompute step, `true` if anything changed
    fn recompute_step(&mut self) -> bool {
        // Prepared node already saw a quorum at its height, it only waits
        // for commit signatures
        if self.my_status().state != NodeState::Prepared {
            match self.check_sync() {
                Flow::Break => return false,
                Flow::Continue => return true,
                Flow::RunOn => {}
            }
        }

        if self.my_status().revolting {
            match self.check_revolt() {
                Flow::Break => return false,
                Flow::Continue => return true,
                Flow::RunOn => {}
            }
        }

        match self.my_status().state {
            NodeState::WaitBlock => self.handle_wait_block(),
            NodeState::HaveBlock => self.handle_have_block(),
            NodeState::Prepared => self.handle_prepared(),
        }
    }

    /// Fall back to fetching committed blocks when a quorum moved on
    fn check_sync(&mut self) -> Flow {
        let my_height = self.my_status().height;
        let same_height = self
            .node_statuses
            .iter()
            .filter(|s| s.height == my_height)
            .count();
        let higher_height = self
            .node_statuses
            .iter()
            .filter(|s| my_height < s.height)
            .count();

        if self.quorum() <= same_height || higher_height == 0 {
            return Flow::RunOn;
        }

        if let BlockIntent::FetchBlockAtHeight { height } = self.intent {
            if height == my_height {
                return Flow::Break;
            }
            self.intent = BlockIntent::FetchBlockAtHeight { height: my_height };
            return Flow::Continue;
        }

        if self.my_status().state == NodeState::HaveBlock {
            warn!(target: LOG_TARGET, height = %my_height, "Resetting block in HaveBlock state");
            self.reset_block();
        }
        debug!(target: LOG_TARGET, height = %my_height, higher_height, "Behind, fetching blocks");
        self.intent = BlockIntent::FetchBlockAtHeight { height: my_height };
        Flow::Continue
    }

    fn check_revolt(&mut self) -> Flow {
        let my = *self.my_status();
        let supporting = self
            .node_statuses
            .iter()
            .filter(|s| s.height == my.height)
            .filter(|s| my.round < s.round || (s.round == my.round && s.revolting))
            .count();

        if supporting < self.quorum() {
            return Flow::RunOn;
        }

        // A prepared block is kept: a quorum may already be committing it
        if my.state == NodeState::HaveBlock {
            self.reset_block();
        }
        let my = self.my_status_mut();
        my.revolting = false;
        my.round = my.round.next_expect();
        my.serial += 1;
        debug!(target: LOG_TARGET, height = %my.height, round = %my.round, "Revolt succeeded");
        Flow::Continue
    }

    fn handle_wait_block(&mut self) -> bool {
        if self.is_my_node_primary() {
            if self.intent != BlockIntent::BuildBlock {
                self.intent = BlockIntent::BuildBlock;
                return true;
            }
            return false;
        }

        let my_height = self.my_status().height;
        let primary = self.node_statuses[self.primary_index().as_usize()];
        let new_intent = match primary.block_rid {
            Some(block_rid) if primary.height == my_height => {
                BlockIntent::FetchUnfinishedBlock { block_rid }
            }
            _ => BlockIntent::DoNothing,
        };
        self.set_intent(new_intent)
    }

    fn handle_have_block(&mut self) -> bool {
        let my = *self.my_status();
        let holding = self
            .node_statuses
            .iter()
            .filter(|s| s.height == my.height && s.block_rid == my.block_rid)
            .filter(|s| matches!(s.state, NodeState::HaveBlock | NodeState::Prepared))
            .count();

        if holding < self.quorum() {
            return false;
        }
        let my = self.my_status_mut();
        my.state = NodeState::Prepared;
        my.serial += 1;
        debug!(target: LOG_TARGET, height = %my.height, "Prepared");
        true
    }

    fn handle_prepared(&mut self) -> bool {
        if self.intent == BlockIntent::CommitBlock {
            return false;
        }

        let num_signatures = self.commit_signatures.iter().flatten().count();
        if self.quorum() <= num_signatures {
            self.intent = BlockIntent::CommitBlock;
            return true;
        }

        let my = *self.my_status();
        let Some(block_rid) = my.block_rid else {
            // Prepared always has a block; nothing sensible to fetch otherwise
            return self.set_intent(BlockIntent::DoNothing);
        };

        let peers: PeerIdxSet = self
            .num_peers
            .peer_idx_iter()
            .filter(|peer_idx| self.commit_signatures[peer_idx.as_usize()].is_none())
            .filter(|peer_idx| {
                let s = &self.node_statuses[peer_idx.as_usize()];
                my.height < s.height
                    || (s.height == my.height
                        && s.state == NodeState::Prepared
                        && s.block_rid == Some(block_rid))
            })
            .collect();

        if peers.is_empty() {
            self.set_intent(BlockIntent::DoNothing)
        } else {
            self.set_intent(BlockIntent::FetchCommitSignature { block_rid, peers })
        }
    }

    /// Drop the block held in `HaveBlock`
    fn reset_block(&mut self) {
        let my = self.my_status_mut();
        my.state = NodeState::WaitBlock;
        my.block_rid = None;
        my.serial += 1;
        self.reset_commit_signatures();
    }

    /// Set the intent, `true` if it changed
    fn set_intent(&mut self, intent: BlockIntent) -> bool {
        if self.intent == intent {
            return false;
        }
        self.intent = intent;
        true
    }
}
