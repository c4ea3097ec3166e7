//! Single-writer worker around a [`BlockEngine`]
//!
//! All operations that stage or commit blocks are queued (capacity 1) and
//! executed strictly in order on one blocking task, so the engine never
//! sees two of them at the same time. At most one block is staged at any
//! time; staging a new one rolls back the old one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ebft_consensus_core::block::{BlockData, BlockDataWithWitness, BlockHeight, BlockRid};
use ebft_consensus_core::signed::CommitSignature;
use ebft_util_error::BoxedError;
use ebft_util_error::fmt::FmtCompact as _;
use snafu::{ResultExt as _, Snafu, ensure};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument, trace, warn};

use crate::config::DEFAULT_DB_STOP_TIMEOUT;
use crate::engine::{BlockBuilder, BlockEngine, BlockWitnessBuilder, PartialBuild};


const LOG_TARGET: &str = "ebft::consensus::db";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BlockDbError {
    #[snafu(display("Block database is stopped"))]
    Stopped,
    #[snafu(display("Block engine is closed"))]
    EngineClosed,
    #[snafu(display("Loading block failed"))]
    LoadFailed { source: BoxedError },
    #[snafu(display("Building block failed"))]
    BuildFailed { source: BoxedError },
    #[snafu(display("Committing block failed"))]
    CommitFailed { source: BoxedError },
    #[snafu(display("No block staged"))]
    NothingStaged,
}

impl BlockDbError {
    /// Error caused by shutting down, not worth logging loudly
    pub fn is_shutdown(&self) -> bool {
        matches!(self, BlockDbError::Stopped | BlockDbError::EngineClosed)
    }
}

pub type BlockDbResult<T> = Result<T, BlockDbError>;

type Reply<T> = oneshot::Sender<BlockDbResult<T>>;

enum DbOp {
    LoadUnfinished {
        block: BlockData,
        reply: Reply<CommitSignature>,
    },
    Build {
        reply: Reply<(BlockData, CommitSignature)>,
    },
    Commit {
        signatures: Vec<CommitSignature>,
        reply: Reply<()>,
    },
    Add {
        block: BlockDataWithWitness,
        reply: Reply<()>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

type SharedWitnessBuilder = Arc<Mutex<Option<Box<dyn BlockWitnessBuilder>>>>;

fn lock_witness(
    witness: &Mutex<Option<Box<dyn BlockWitnessBuilder>>>,
) -> MutexGuard<'_, Option<Box<dyn BlockWitnessBuilder>>> {
    witness.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct BlockDatabase {
    engine: Arc<dyn BlockEngine>,
    ops_tx: mpsc::Sender<DbOp>,
    /// Witness builder of the staged block, shared with the worker
    staged_witness: SharedWitnessBuilder,
    stopping: AtomicBool,
    stop_timeout: Duration,
}

#[bon::bon]
impl BlockDatabase {
    /// Start the worker; must be called within a tokio runtime
    #[builder]
    pub fn new(
        engine: Arc<dyn BlockEngine>,
        #[builder(default = DEFAULT_DB_STOP_TIMEOUT)] stop_timeout: Duration,
        #[builder(default)]
        name: String,
    ) -> Self {
        let (ops_tx, ops_rx) = mpsc::channel(1);
        let staged_witness = SharedWitnessBuilder::default();

        let worker = Worker {
            engine: engine.clone(),
            staged: None,
            staged_witness: staged_witness.clone(),
        };
        tokio::task::spawn_blocking(move || worker.run(&name, ops_rx));

        Self {
            engine,
            ops_tx,
            staged_witness,
            stopping: AtomicBool::new(false),
            stop_timeout,
        }
    }
}

impl BlockDatabase {
    async fn submit<T>(&self, make_op: impl FnOnce(Reply<T>) -> DbOp) -> BlockDbResult<T> {
        ensure!(!self.stopping.load(Ordering::SeqCst), StoppedSnafu);

        let (reply_tx, reply_rx) = oneshot::channel();
        self.ops_tx
            .send(make_op(reply_tx))
            .await
            .map_err(|_| BlockDbError::Stopped)?;
        reply_rx.await.map_err(|_| BlockDbError::Stopped)?
    }

    /// Validate and stage a block received from another validator
    ///
    /// Returns own commit signature over it.
    pub async fn load_unfinished_block(&self, block: BlockData) -> BlockDbResult<CommitSignature> {
        self.submit(|reply| DbOp::LoadUnfinished { block, reply })
            .await
    }

    /// Build and stage a new block
    pub async fn build_block(&self) -> BlockDbResult<(BlockData, CommitSignature)> {
        self.submit(|reply| DbOp::Build { reply }).await
    }

    /// Commit the staged block with the given commit signatures
    pub async fn commit_block(&self, signatures: Vec<CommitSignature>) -> BlockDbResult<()> {
        self.submit(|reply| DbOp::Commit { signatures, reply })
            .await
    }

    /// Load and immediately commit an already witnessed block
    pub async fn add_block(&self, block: BlockDataWithWitness) -> BlockDbResult<()> {
        self.submit(|reply| DbOp::Add { block, reply }).await
    }

    /// Check a commit signature against the staged block
    ///
    /// A valid signature is also recorded in the staged witness. Returns
    /// `false` on any failure, including nothing being staged.
    pub fn verify_block_signature(&self, signature: &CommitSignature) -> bool {
        let mut staged = lock_witness(&self.staged_witness);
        let Some(witness_builder) = staged.as_mut() else {
            trace!(target: LOG_TARGET, signer = %signature.signer, "No staged block to verify signature against");
            return false;
        };
        witness_builder
            .apply_signature(signature)
            .inspect_err(|err| {
                debug!(target: LOG_TARGET, signer = %signature.signer, err = %err.fmt_compact(), "Invalid block signature");
            })
            .is_ok()
    }

    pub fn best_height(&self) -> Option<BlockHeight> {
        self.engine.best_height()
    }

    pub fn block_at_height(&self, height: BlockHeight) -> Option<BlockDataWithWitness> {
        self.engine.block_at_height(height)
    }

    /// Own commit signature over a committed block
    pub fn block_signature(&self, block_rid: BlockRid) -> Option<CommitSignature> {
        self.engine.block_signature(block_rid)
    }

    pub fn transaction_queue_size(&self) -> usize {
        self.engine.transaction_queue_size()
    }

    pub fn is_engine_closed(&self) -> bool {
        self.engine.is_closed()
    }

    /// Stop accepting work, wait (bounded) for queued work to finish and roll
    /// back anything staged
    #[instrument(target = "ebft::consensus::db", skip_all)]
    pub async fn stop(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let stopped = async {
            self.ops_tx.send(DbOp::Stop { reply: reply_tx }).await.ok()?;
            reply_rx.await.ok()
        };

        match tokio::time::timeout(self.stop_timeout, stopped).await {
            Ok(Some(())) => debug!(target: LOG_TARGET, "Block database stopped"),
            Ok(None) => debug!(target: LOG_TARGET, "Block database worker already gone"),
            Err(_) => {
                warn!(target: LOG_TARGET, timeout_ms = self.stop_timeout.as_millis(), "Timed out waiting for block database to stop");
            }
        }
    }
}

/// State owned by the blocking worker task
struct Worker {
    engine: Arc<dyn BlockEngine>,
    staged: Option<Box<dyn BlockBuilder>>,
    staged_witness: SharedWitnessBuilder,
}

impl Worker {
    fn run(mut self, name: &str, mut ops_rx: mpsc::Receiver<DbOp>) {
        debug!(target: LOG_TARGET, %name, "Block database worker started");
        while let Some(op) = ops_rx.blocking_recv() {
            match op {
                DbOp::LoadUnfinished { block, reply } => {
                    let _ = reply.send(self.load_unfinished_block(block));
                }
                DbOp::Build { reply } => {
                    let _ = reply.send(self.build_block());
                }
                DbOp::Commit { signatures, reply } => {
                    let _ = reply.send(self.commit_block(signatures));
                }
                DbOp::Add { block, reply } => {
                    let _ = reply.send(self.add_block(block));
                }
                DbOp::Stop { reply } => {
                    self.maybe_rollback();
                    let _ = reply.send(());
                    debug!(target: LOG_TARGET, %name, "Block database worker stopped");
                    return;
                }
            }
        }
        self.maybe_rollback();
        debug!(target: LOG_TARGET, %name, "Block database worker finished");
    }

    fn ensure_engine_open(&self) -> BlockDbResult<()> {
        ensure!(!self.engine.is_closed(), EngineClosedSnafu);
        Ok(())
    }

    fn load_unfinished_block(&mut self, block: BlockData) -> BlockDbResult<CommitSignature> {
        self.ensure_engine_open()?;
        self.maybe_rollback();

        let builder = self
            .engine
            .load_unfinished_block(&block)
            .or_else(rollback_partial)
            .context(LoadFailedSnafu)?;
        Ok(self.stage(builder))
    }

    fn build_block(&mut self) -> BlockDbResult<(BlockData, CommitSignature)> {
        self.ensure_engine_open()?;
        self.maybe_rollback();

        let builder = self
            .engine
            .build_block()
            .or_else(rollback_partial)
            .context(BuildFailedSnafu)?;
        let block = builder.block_data().clone();
        Ok((block, self.stage(builder)))
    }

    fn commit_block(&mut self, signatures: Vec<CommitSignature>) -> BlockDbResult<()> {
        self.ensure_engine_open()?;
        let Some(builder) = self.staged.take() else {
            return NothingStagedSnafu.fail();
        };
        let Some(mut witness_builder) = lock_witness(&self.staged_witness).take() else {
            builder.rollback();
            return NothingStagedSnafu.fail();
        };

        for signature in &signatures {
            if let Err(err) = witness_builder.apply_signature(signature) {
                debug!(target: LOG_TARGET, signer = %signature.signer, err = %err.fmt_compact(), "Ignoring invalid commit signature");
            }
        }

        let witness = match witness_builder.build_witness() {
            Ok(witness) => witness,
            Err(source) => {
                builder.rollback();
                return Err(BlockDbError::CommitFailed { source });
            }
        };

        let block_rid = builder.block_data().rid();
        builder.commit(witness).context(CommitFailedSnafu)?;
        debug!(target: LOG_TARGET, %block_rid, "Committed block");
        Ok(())
    }

    fn add_block(&mut self, block: BlockDataWithWitness) -> BlockDbResult<()> {
        self.ensure_engine_open()?;
        self.maybe_rollback();

        let block_rid = block.rid();
        let builder = self
            .engine
            .load_unfinished_block(&block.data)
            .or_else(rollback_partial)
            .context(LoadFailedSnafu)?;
        builder.commit(block.witness).context(CommitFailedSnafu)?;
        debug!(target: LOG_TARGET, %block_rid, "Added block");
        Ok(())
    }

    fn stage(&mut self, builder: Box<dyn BlockBuilder>) -> CommitSignature {
        let witness_builder = builder.witness_builder();
        let my_signature = witness_builder.my_signature();
        *lock_witness(&self.staged_witness) = Some(witness_builder);
        self.staged = Some(builder);
        my_signature
    }

    /// Roll back a block left staged by a previous operation
    fn maybe_rollback(&mut self) {
        lock_witness(&self.staged_witness).take();
        if let Some(builder) = self.staged.take() {
            debug!(target: LOG_TARGET, block_rid = %builder.block_data().rid(), "Rolling back staged block");
            builder.rollback();
        }
    }
}

fn rollback_partial(partial: PartialBuild) -> Result<Box<dyn BlockBuilder>, BoxedError> {
    if let Some(builder) = partial.builder {
        builder.rollback();
    }
    Err(partial.source)
}
