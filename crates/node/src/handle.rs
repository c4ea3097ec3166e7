use std::sync::Arc;

use ebft_consensus_core::block::{BlockData, BlockDataWithWitness, BlockHeight, BlockRid};
use ebft_consensus_core::intent::BlockIntent;
use ebft_consensus_core::msg::EbftMessage;
use ebft_consensus_core::peer::PeerIdx;
use ebft_consensus_core::signed::CommitSignature;
use ebft_consensus_core::status::NodeStatus;
use n0_future::task::AbortOnDropHandle;
use snafu::OptionExt as _;
use tokio::sync::{mpsc, oneshot, watch};

use crate::worker::WorkerRequest;
use crate::{ChainWorkerResult, WorkerGoneSnafu};

/// Handle to a running [`crate::ChainWorker`]
///
/// Cheap to clone. The worker task is aborted when the last handle is
/// dropped; use [`ChainWorkerHandle::shutdown`] to stop it cleanly.
#[derive(Clone)]
pub struct ChainWorkerHandle {
    requests_tx: mpsc::UnboundedSender<WorkerRequest>,
    status_rx: watch::Receiver<NodeStatus>,
    #[allow(dead_code /* only for drop */)]
    task: Arc<AbortOnDropHandle<()>>,
}

impl ChainWorkerHandle {
    pub(crate) fn new(
        requests_tx: mpsc::UnboundedSender<WorkerRequest>,
        status_rx: watch::Receiver<NodeStatus>,
        task: AbortOnDropHandle<()>,
    ) -> Self {
        Self {
            requests_tx,
            status_rx,
            task: Arc::new(task),
        }
    }

    fn send(&self, req: WorkerRequest) -> ChainWorkerResult<()> {
        self.requests_tx.send(req).ok().context(WorkerGoneSnafu)
    }

    async fn query<T>(
        &self,
        make_req: impl FnOnce(oneshot::Sender<T>) -> WorkerRequest,
    ) -> ChainWorkerResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(make_req(reply_tx))?;
        reply_rx.await.ok().context(WorkerGoneSnafu)
    }

    /// Current intent, after acting on it
    pub async fn block_intent(&self) -> ChainWorkerResult<BlockIntent> {
        self.query(WorkerRequest::BlockIntent).await
    }

    /// Is a block database operation in flight
    pub async fn is_processing(&self) -> ChainWorkerResult<bool> {
        self.query(WorkerRequest::IsProcessing).await
    }

    pub fn my_status(&self) -> NodeStatus {
        *self.status_rx.borrow()
    }

    /// Watch own status as it changes
    pub fn status_rx(&self) -> watch::Receiver<NodeStatus> {
        self.status_rx.clone()
    }

    /// Feed a message received from peer `from`
    pub fn on_peer_message(&self, from: PeerIdx, msg: EbftMessage) -> ChainWorkerResult<()> {
        self.send(WorkerRequest::PeerMessage { from, msg })
    }

    pub fn on_status_update(&self, from: PeerIdx, status: NodeStatus) -> ChainWorkerResult<()> {
        self.on_peer_message(from, EbftMessage::Status(status))
    }

    pub fn on_received_unfinished_block(&self, block: BlockData) -> ChainWorkerResult<()> {
        self.send(WorkerRequest::UnfinishedBlock(block))
    }

    pub fn on_received_block_at_height(
        &self,
        block: BlockDataWithWitness,
        height: BlockHeight,
    ) -> ChainWorkerResult<()> {
        self.send(WorkerRequest::BlockAtHeight { block, height })
    }

    /// Commit signature of peer `from`; checked before being recorded
    pub fn on_commit_signature(
        &self,
        from: PeerIdx,
        block_rid: BlockRid,
        signature: CommitSignature,
    ) -> ChainWorkerResult<()> {
        self.send(WorkerRequest::CommitSignature {
            from,
            block_rid,
            signature,
        })
    }

    pub fn start_revolting(&self) -> ChainWorkerResult<()> {
        self.send(WorkerRequest::StartRevolting)
    }

    /// Stop the worker and its block database, rolling back anything staged
    pub async fn shutdown(&self) -> ChainWorkerResult<()> {
        self.query(WorkerRequest::Shutdown).await
    }
}
