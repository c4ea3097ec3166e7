use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ebft_consensus::engine::{
    BlockBuilder, BlockEngine, BlockWitnessBuilder, BuildResult, PartialBuild,
};
use ebft_consensus_core::block::{
    BlockData, BlockDataWithWitness, BlockHeight, BlockRid, Transaction,
};
use ebft_consensus_core::num_peers::ToNumPeers as _;
use ebft_consensus_core::peer::{PeerPubkey, PeerSeckey};
use ebft_consensus_core::signed::{BlockWitness, CommitSignature, InvalidWitnessError};
use ebft_util_error::BoxedErrorResult;
use snafu::{Snafu, ensure};
use tracing::{debug, trace};

use crate::LOG_TARGET;


pub const DEFAULT_MAX_BLOCK_TRANSACTIONS: usize = 100;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MemEngineError {
    #[snafu(display("Engine is closed"))]
    Closed,
    #[snafu(display("Expected block at height {expected}, got {got}"))]
    WrongHeight {
        expected: BlockHeight,
        got: BlockHeight,
    },
    #[snafu(display("Block does not extend the best block"))]
    WrongParent,
    #[snafu(display("Block payload does not match its header"))]
    InconsistentPayload,
    #[snafu(display("Too many transactions: {len} > {max}"))]
    TooManyTransactions { len: usize, max: usize },
    #[snafu(display("Unknown signer {signer}"))]
    UnknownSigner { signer: PeerPubkey },
    #[snafu(display("Invalid signature by {signer}"))]
    InvalidSignature { signer: PeerPubkey },
    #[snafu(display("Witness incomplete: {got} < {required}"))]
    WitnessIncomplete { got: usize, required: usize },
    #[snafu(transparent)]
    InvalidWitness { source: InvalidWitnessError },
}

type MemEngineResult<T> = Result<T, MemEngineError>;

#[derive(Default)]
struct ChainState {
    blocks: Vec<BlockDataWithWitness>,
    tx_queue: VecDeque<Transaction>,
}

impl ChainState {
    fn next_height(&self) -> BlockHeight {
        BlockHeight::from(u64::try_from(self.blocks.len()).expect("Can't fail"))
    }

    fn best_rid(&self) -> Option<BlockRid> {
        self.blocks.last().map(BlockDataWithWitness::rid)
    }

    /// Would `block` extend the chain right now
    fn ensure_extends(&self, block: &BlockData) -> MemEngineResult<()> {
        let expected = self.next_height();
        ensure!(
            block.height() == expected,
            WrongHeightSnafu {
                expected,
                got: block.height()
            }
        );
        ensure!(
            block.header.prev_block_rid == self.best_rid(),
            WrongParentSnafu
        );
        Ok(())
    }

    /// Put transactions of an abandoned block back at the head of the queue
    fn requeue(&mut self, txs: Vec<Transaction>) {
        for tx in txs.into_iter().rev() {
            self.tx_queue.push_front(tx);
        }
    }
}

type SharedChainState = Arc<Mutex<ChainState>>;

fn lock(state: &SharedChainState) -> MutexGuard<'_, ChainState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// [`BlockEngine`] keeping one validator's chain in memory
///
/// Blocks carry a witness of ed25519 commit signatures from at least a
/// quorum of the validator set. Transactions submitted with
/// [`MemBlockEngine::submit_transaction`] are queued until a block built by
/// this validator (or any committed block) includes them.
pub struct MemBlockEngine {
    seckey: PeerSeckey,
    peers: Arc<[PeerPubkey]>,
    threshold: usize,
    max_block_transactions: usize,
    state: SharedChainState,
    closed: AtomicBool,
}

#[bon::bon]
impl MemBlockEngine {
    #[builder]
    pub fn new(
        seckey: PeerSeckey,
        peers: Vec<PeerPubkey>,
        #[builder(default = DEFAULT_MAX_BLOCK_TRANSACTIONS)] max_block_transactions: usize,
    ) -> Self {
        let threshold = peers.to_num_peers().threshold();
        Self {
            seckey,
            peers: peers.into(),
            threshold,
            max_block_transactions,
            state: SharedChainState::default(),
            closed: AtomicBool::new(false),
        }
    }
}

impl MemBlockEngine {
    pub fn pubkey(&self) -> PeerPubkey {
        self.seckey.pubkey()
    }

    pub fn submit_transaction(&self, tx: impl Into<Transaction>) {
        lock(&self.state).tx_queue.push_back(tx.into());
    }

    /// Refuse any further work
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// All committed blocks, in order
    pub fn blocks(&self) -> Vec<BlockDataWithWitness> {
        lock(&self.state).blocks.clone()
    }

    fn ensure_open(&self) -> MemEngineResult<()> {
        ensure!(!self.is_closed(), ClosedSnafu);
        Ok(())
    }

    fn stage(&self, block: BlockData, requeue: Vec<Transaction>) -> Box<dyn BlockBuilder> {
        trace!(target: LOG_TARGET, block_rid = %block.rid(), height = %block.height(), "Staging block");
        Box::new(MemBlockBuilder {
            state: self.state.clone(),
            block,
            requeue,
            seckey: self.seckey,
            peers: self.peers.clone(),
            threshold: self.threshold,
        })
    }
}

impl BlockEngine for MemBlockEngine {
    fn load_unfinished_block(&self, block: &BlockData) -> BuildResult {
        let check = || -> MemEngineResult<()> {
            self.ensure_open()?;
            ensure!(block.is_payload_consistent(), InconsistentPayloadSnafu);
            ensure!(
                block.transactions.len() <= self.max_block_transactions,
                TooManyTransactionsSnafu {
                    len: block.transactions.len(),
                    max: self.max_block_transactions,
                }
            );
            lock(&self.state).ensure_extends(block)
        };
        check().map_err(PartialBuild::new)?;

        Ok(self.stage(block.clone(), vec![]))
    }

    fn build_block(&self) -> BuildResult {
        self.ensure_open().map_err(PartialBuild::new)?;

        let (height, prev_block_rid, transactions) = {
            let mut state = lock(&self.state);
            let take = state.tx_queue.len().min(self.max_block_transactions);
            let transactions: Vec<_> = state.tx_queue.drain(..take).collect();
            (state.next_height(), state.best_rid(), transactions)
        };

        let block = BlockData::builder()
            .height(height)
            .maybe_prev_block_rid(prev_block_rid)
            .transactions(transactions.clone())
            .build();
        Ok(self.stage(block, transactions))
    }

    fn best_height(&self) -> Option<BlockHeight> {
        lock(&self.state).blocks.last().map(|b| b.data.height())
    }

    fn block_at_height(&self, height: BlockHeight) -> Option<BlockDataWithWitness> {
        let idx = usize::try_from(height.to_number()).ok()?;
        lock(&self.state).blocks.get(idx).cloned()
    }

    fn block_signature(&self, block_rid: BlockRid) -> Option<CommitSignature> {
        lock(&self.state)
            .blocks
            .iter()
            .any(|b| b.rid() == block_rid)
            .then(|| CommitSignature::sign(block_rid, self.seckey))
    }

    fn transaction_queue_size(&self) -> usize {
        lock(&self.state).tx_queue.len()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MemBlockBuilder {
    state: SharedChainState,
    block: BlockData,
    /// Own transactions taken out of the queue, returned on rollback
    requeue: Vec<Transaction>,
    seckey: PeerSeckey,
    peers: Arc<[PeerPubkey]>,
    threshold: usize,
}

impl BlockBuilder for MemBlockBuilder {
    fn block_data(&self) -> &BlockData {
        &self.block
    }

    fn witness_builder(&self) -> Box<dyn BlockWitnessBuilder> {
        let block_rid = self.block.rid();
        let my_signature = CommitSignature::sign(block_rid, self.seckey);
        Box::new(MemWitnessBuilder {
            block_rid,
            my_signature,
            signatures: vec![my_signature],
            peers: self.peers.clone(),
            threshold: self.threshold,
        })
    }

    fn commit(self: Box<Self>, witness: BlockWitness) -> BoxedErrorResult<()> {
        let Self {
            state,
            block,
            requeue,
            peers,
            threshold,
            ..
        } = *self;
        let block_rid = block.rid();
        let block_height = block.height();

        let mut chain = lock(&state);
        if let Err(err) = witness
            .verify(block_rid, &peers, threshold)
            .map_err(MemEngineError::from)
            .and_then(|()| chain.ensure_extends(&block))
        {
            chain.requeue(requeue);
            return Err(err.into());
        }
        // Drop queued copies of transactions that just got included
        chain
            .tx_queue
            .retain(|tx| !block.transactions.contains(tx));
        chain.blocks.push(BlockDataWithWitness {
            data: block,
            witness,
        });
        debug!(target: LOG_TARGET, %block_rid, height = %block_height, "Committed block");
        Ok(())
    }

    fn rollback(self: Box<Self>) {
        let Self {
            state,
            block,
            requeue,
            ..
        } = *self;
        trace!(target: LOG_TARGET, block_rid = %block.rid(), "Rolling back block");
        lock(&state).requeue(requeue);
    }
}

struct MemWitnessBuilder {
    block_rid: BlockRid,
    my_signature: CommitSignature,
    signatures: Vec<CommitSignature>,
    peers: Arc<[PeerPubkey]>,
    threshold: usize,
}

impl BlockWitnessBuilder for MemWitnessBuilder {
    fn my_signature(&self) -> CommitSignature {
        self.my_signature
    }

    fn apply_signature(&mut self, signature: &CommitSignature) -> BoxedErrorResult<()> {
        let signer = signature.signer;
        ensure!(self.peers.contains(&signer), UnknownSignerSnafu { signer });
        ensure!(
            signature.verify(self.block_rid),
            InvalidSignatureSnafu { signer }
        );
        if !self.signatures.iter().any(|s| s.signer == signer) {
            self.signatures.push(*signature);
        }
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.threshold <= self.signatures.len()
    }

    fn build_witness(&self) -> BoxedErrorResult<BlockWitness> {
        ensure!(
            self.is_complete(),
            WitnessIncompleteSnafu {
                got: self.signatures.len(),
                required: self.threshold,
            }
        );
        Ok(BlockWitness::new(self.signatures.iter().copied()))
    }
}
