//! Minimal in-memory [`BlockEngine`] for unit tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ebft_consensus_core::block::{
    BlockData, BlockDataWithWitness, BlockHeight, BlockRid, Transaction,
};
use ebft_consensus_core::peer::{PeerPubkey, PeerSeckey};
use ebft_consensus_core::signed::{BlockWitness, CommitSignature};
use ebft_util_error::BoxedErrorResult;

use crate::engine::{BlockBuilder, BlockEngine, BlockWitnessBuilder, BuildResult, PartialBuild};

#[derive(Default)]
pub(crate) struct TestState {
    pub committed: Vec<BlockDataWithWitness>,
    pub tx_queue: Vec<Transaction>,
    pub staged: usize,
    pub rollbacks: usize,
}

pub(crate) struct TestEngine {
    pub state: Arc<Mutex<TestState>>,
    pub seckey: PeerSeckey,
    pub peers: Vec<PeerPubkey>,
    pub threshold: usize,
    pub fail_build: AtomicBool,
    pub closed: AtomicBool,
}

impl TestEngine {
    /// Engine for validator `0` out of `seckeys`
    pub fn new(seckeys: &[PeerSeckey], threshold: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::default(),
            seckey: seckeys[0],
            peers: seckeys.iter().map(|k| k.pubkey()).collect(),
            threshold,
            fail_build: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, TestState> {
        self.state.lock().expect("Locking failed")
    }

    fn builder(&self, block: BlockData) -> Box<dyn BlockBuilder> {
        self.state().staged += 1;
        Box::new(TestBuilder {
            state: self.state.clone(),
            block,
            seckey: self.seckey,
            peers: self.peers.clone(),
            threshold: self.threshold,
        })
    }
}

impl BlockEngine for TestEngine {
    fn load_unfinished_block(&self, block: &BlockData) -> BuildResult {
        let expected_height = self.state().committed.len();
        if block.height().to_number() != u64::try_from(expected_height).expect("Can't fail") {
            return Err(PartialBuild::new("wrong height"));
        }
        Ok(self.builder(block.clone()))
    }

    fn build_block(&self) -> BuildResult {
        if self.fail_build.load(Ordering::SeqCst) {
            let partial = self.builder(BlockData::builder().height(0.into()).build());
            return Err(PartialBuild::with_builder(partial, "build failed"));
        }
        let (height, prev, transactions) = {
            let mut state = self.state();
            (
                u64::try_from(state.committed.len()).expect("Can't fail"),
                state.committed.last().map(|b| b.rid()),
                std::mem::take(&mut state.tx_queue),
            )
        };
        Ok(self.builder(
            BlockData::builder()
                .height(height.into())
                .maybe_prev_block_rid(prev)
                .transactions(transactions)
                .build(),
        ))
    }

    fn best_height(&self) -> Option<BlockHeight> {
        self.state().committed.last().map(|b| b.data.height())
    }

    fn block_at_height(&self, height: BlockHeight) -> Option<BlockDataWithWitness> {
        let idx = usize::try_from(height.to_number()).ok()?;
        self.state().committed.get(idx).cloned()
    }

    fn block_signature(&self, block_rid: BlockRid) -> Option<CommitSignature> {
        self.state()
            .committed
            .iter()
            .any(|b| b.rid() == block_rid)
            .then(|| CommitSignature::sign(block_rid, self.seckey))
    }

    fn transaction_queue_size(&self) -> usize {
        self.state().tx_queue.len()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct TestBuilder {
    state: Arc<Mutex<TestState>>,
    block: BlockData,
    seckey: PeerSeckey,
    peers: Vec<PeerPubkey>,
    threshold: usize,
}

impl BlockBuilder for TestBuilder {
    fn block_data(&self) -> &BlockData {
        &self.block
    }

    fn witness_builder(&self) -> Box<dyn BlockWitnessBuilder> {
        let block_rid = self.block.rid();
        let my = CommitSignature::sign(block_rid, self.seckey);
        Box::new(TestWitnessBuilder {
            block_rid,
            my,
            signatures: vec![my],
            peers: self.peers.clone(),
            threshold: self.threshold,
        })
    }

    fn commit(self: Box<Self>, witness: BlockWitness) -> BoxedErrorResult<()> {
        witness.verify(self.block.rid(), &self.peers, self.threshold)?;
        self.state.lock().expect("Locking failed").committed.push(BlockDataWithWitness {
            data: self.block,
            witness,
        });
        Ok(())
    }

    fn rollback(self: Box<Self>) {
        self.state.lock().expect("Locking failed").rollbacks += 1;
    }
}

struct TestWitnessBuilder {
    block_rid: BlockRid,
    my: CommitSignature,
    signatures: Vec<CommitSignature>,
    peers: Vec<PeerPubkey>,
    threshold: usize,
}

impl BlockWitnessBuilder for TestWitnessBuilder {
    fn my_signature(&self) -> CommitSignature {
        self.my
    }

    fn apply_signature(&mut self, signature: &CommitSignature) -> BoxedErrorResult<()> {
        if !self.peers.contains(&signature.signer) {
            return Err("unknown signer".into());
        }
        if !signature.verify(self.block_rid) {
            return Err("invalid signature".into());
        }
        if !self.signatures.contains(signature) {
            self.signatures.push(*signature);
        }
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.threshold <= self.signatures.len()
    }

    fn build_witness(&self) -> BoxedErrorResult<BlockWitness> {
        if !self.is_complete() {
            return Err("witness incomplete".into());
        }
        Ok(BlockWitness::new(self.signatures.iter().copied()))
    }
}
