mod dispatch;
mod init;

use std::sync::Arc;

use ebft_consensus::block_manager::{BlockManager, DbCompletion};
use ebft_consensus::config::EbftConfig;
use ebft_consensus_core::block::{BlockData, BlockDataWithWitness, BlockHeight, BlockRid};
use ebft_consensus_core::intent::BlockIntent;
use ebft_consensus_core::msg::EbftMessage;
use ebft_consensus_core::peer::{PeerIdx, PeerPubkey};
use ebft_consensus_core::signed::CommitSignature;
use ebft_consensus_core::status::NodeStatus;
use ebft_util_error::fmt::FmtCompact as _;
use ebft_util_fmt_opt::AsFmtOption as _;
use n0_future::task::AbortOnDropHandle;
use tokio::select;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, trace};

use crate::LOG_TARGET;
use crate::handle::ChainWorkerHandle;
use crate::intent_tracker::{IntentTracker, intent_requests};
use crate::revolt_tracker::RevoltTracker;
use crate::status_sender::StatusSender;
use crate::transport::PeerTransport;

/// Requests from [`ChainWorkerHandle`] to the worker task
pub(crate) enum WorkerRequest {
    PeerMessage {
        from: PeerIdx,
        msg: EbftMessage,
    },
    UnfinishedBlock(BlockData),
    BlockAtHeight {
        block: BlockDataWithWitness,
        height: BlockHeight,
    },
    CommitSignature {
        from: PeerIdx,
        block_rid: BlockRid,
        signature: CommitSignature,
    },
    StartRevolting,
    BlockIntent(oneshot::Sender<BlockIntent>),
    IsProcessing(oneshot::Sender<bool>),
    Shutdown(oneshot::Sender<()>),
}

enum Outbound {
    To(PeerIdx, EbftMessage),
    Broadcast(EbftMessage),
}

/// Single owner of the consensus state of one chain
///
/// Everything touching [`BlockManager`] happens on the task started by
/// [`ChainWorker::spawn`]; the rest of the world talks to it through the
/// returned [`ChainWorkerHandle`].
pub struct ChainWorker {
    config: EbftConfig,
    peers: Vec<PeerPubkey>,
    block_manager: BlockManager,
    completions_rx: mpsc::UnboundedReceiver<DbCompletion>,
    outbound_tx: mpsc::UnboundedSender<Outbound>,

    status_sender: StatusSender,
    revolt_tracker: RevoltTracker,
    intent_tracker: IntentTracker,

    status_tx: watch::Sender<NodeStatus>,
}

impl ChainWorker {
    pub fn spawn(self) -> ChainWorkerHandle {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let status_rx = self.status_tx.subscribe();
        let task = AbortOnDropHandle::new(tokio::spawn(self.run(requests_rx)));
        ChainWorkerHandle::new(requests_tx, status_rx, task)
    }

    fn my_idx(&self) -> PeerIdx {
        self.block_manager.status_manager().my_idx()
    }

    fn my_status(&self) -> NodeStatus {
        *self.block_manager.status_manager().my_status()
    }

    #[instrument(name = "chain-worker", target = "ebft::node", skip_all, fields(my_idx = %self.my_idx()))]
    async fn run(mut self, mut requests_rx: mpsc::UnboundedReceiver<WorkerRequest>) {
        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = tick.tick() => {
                    self.on_tick(Instant::now());
                },
                Some(completion) = self.completions_rx.recv() => {
                    self.block_manager.on_db_completion(completion);
                },
                req = requests_rx.recv() => {
                    match req {
                        Some(req) => {
                            if let Some(reply) = self.on_request(req) {
                                self.stop().await;
                                let _ = reply.send(());
                                return;
                            }
                        }
                        None => {
                            debug!(target: LOG_TARGET, "All handles dropped");
                            break;
                        }
                    }
                },
            }
            self.publish_status();
        }

        self.stop().await;
    }

    async fn stop(&mut self) {
        info!(target: LOG_TARGET, my_status = %self.my_status(), "Stopping chain worker");
        self.block_manager.db().stop().await;
    }

    /// Handle a request; returns the reply channel if asked to shut down
    fn on_request(&mut self, req: WorkerRequest) -> Option<oneshot::Sender<()>> {
        match req {
            WorkerRequest::PeerMessage { from, msg } => self.on_peer_message(from, msg),
            WorkerRequest::UnfinishedBlock(block) => {
                self.block_manager.on_received_unfinished_block(block);
            }
            WorkerRequest::BlockAtHeight { block, height } => {
                self.block_manager.on_received_block_at_height(block, height);
            }
            WorkerRequest::CommitSignature {
                from,
                block_rid,
                signature,
            } => self.on_commit_signature(from, block_rid, signature),
            WorkerRequest::StartRevolting => {
                self.block_manager.status_manager_mut().on_start_revolting();
            }
            WorkerRequest::BlockIntent(reply) => {
                let _ = reply.send(self.block_manager.block_intent());
            }
            WorkerRequest::IsProcessing(reply) => {
                let _ = reply.send(self.block_manager.is_processing());
            }
            WorkerRequest::Shutdown(reply) => return Some(reply),
        }
        None
    }

    /// One round of the periodic update
    fn on_tick(&mut self, now: Instant) {
        self.maybe_fast_forward();

        let intent = self.block_manager.block_intent();
        self.process_intent(intent, now);

        if self.revolt_tracker.update(&self.my_status(), now) {
            info!(target: LOG_TARGET, my_status = %self.my_status(), "No progress, starting revolt");
            self.block_manager.status_manager_mut().on_start_revolting();
        }

        if let Some(status) = self.status_sender.update(&self.my_status(), now) {
            trace!(target: LOG_TARGET, %status, "Broadcasting status");
            self.broadcast(EbftMessage::Status(status));
        }
    }

    /// Catch up with blocks committed to the engine behind our back
    fn maybe_fast_forward(&mut self) {
        if self.block_manager.is_processing() {
            return;
        }
        let Some(best_height) = self.block_manager.db().best_height() else {
            return;
        };
        if best_height < self.my_status().height {
            return;
        }
        debug!(target: LOG_TARGET, %best_height, my_height = %self.my_status().height, "Fast forwarding");
        let _ = self
            .block_manager
            .status_manager_mut()
            .fast_forward_height(best_height);
    }

    fn process_intent(&mut self, intent: BlockIntent, now: Instant) {
        if !self.intent_tracker.should_issue(intent, now) {
            return;
        }
        let status_manager = self.block_manager.status_manager();
        let requests = intent_requests(
            intent,
            status_manager.node_statuses(),
            status_manager.my_idx(),
            &mut rand::thread_rng(),
        );
        if !requests.is_empty() {
            debug!(target: LOG_TARGET, %intent, num = requests.len(), "Sending requests");
        }
        for (peer_idx, msg) in requests {
            self.send_to(peer_idx, msg);
        }
    }

    fn publish_status(&self) {
        let my_status = self.my_status();
        self.status_tx.send_if_modified(|status| {
            if *status == my_status {
                return false;
            }
            *status = my_status;
            true
        });
    }

    fn send_to(&self, peer_idx: PeerIdx, msg: EbftMessage) {
        // Receiver only goes away with the worker itself
        let _ = self.outbound_tx.send(Outbound::To(peer_idx, msg));
    }

    fn broadcast(&self, msg: EbftMessage) {
        let _ = self.outbound_tx.send(Outbound::Broadcast(msg));
    }
}

/// Deliver outbound messages in order, without blocking the worker
async fn send_outbound(
    transport: Arc<dyn PeerTransport>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(outbound) = outbound_rx.recv().await {
        let (peer_idx, res) = match outbound {
            Outbound::To(peer_idx, msg) => (Some(peer_idx), transport.send_to(peer_idx, msg).await),
            Outbound::Broadcast(msg) => (None, transport.broadcast(msg).await),
        };
        if let Err(err) = res {
            debug!(
                target: LOG_TARGET,
                peer_idx = %peer_idx.fmt_option(),
                err = %err.fmt_compact(),
                "Failed to send message"
            );
        }
    }
}
