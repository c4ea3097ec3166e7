//! Executes [`BlockIntent`]s against the [`BlockDatabase`]
//!
//! The [`BlockManager`] is owned by a single task (the chain worker). Block
//! database operations run in the background; their results come back as
//! [`DbCompletion`]s on a channel, and the owner hands them to
//! [`BlockManager::on_db_completion`]. So all decisions about consensus state
//! are made by the owner, one at a time.

use std::future::Future;
use std::sync::Arc;

use ebft_consensus_core::block::{BlockData, BlockDataWithWitness, BlockHeight};
use ebft_consensus_core::intent::BlockIntent;
use ebft_consensus_core::signed::CommitSignature;
use ebft_util_error::fmt::FmtCompact as _;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::LOG_TARGET;
use crate::block_database::{BlockDatabase, BlockDbError, BlockDbResult};
use crate::status_manager::{StatusManager, StatusOutcome};
use crate::strategy::BlockBuildingStrategy;


/// Result of a background block database operation
#[derive(Debug)]
pub enum DbCompletion {
    LoadedUnfinished {
        block: BlockData,
        res: BlockDbResult<CommitSignature>,
    },
    AddedBlock {
        height: BlockHeight,
        res: BlockDbResult<()>,
    },
    Built(BlockDbResult<(BlockData, CommitSignature)>),
    Committed {
        block: BlockData,
        res: BlockDbResult<()>,
    },
}

pub struct BlockManager {
    status_manager: StatusManager,
    db: Arc<BlockDatabase>,
    strategy: Box<dyn BlockBuildingStrategy>,
    /// A block database operation is in flight
    processing: bool,
    /// Block staged in the database, matching own status' block RID
    current_block: Option<BlockData>,
    completions_tx: mpsc::UnboundedSender<DbCompletion>,
}

impl BlockManager {
    pub fn new(
        status_manager: StatusManager,
        db: Arc<BlockDatabase>,
        strategy: Box<dyn BlockBuildingStrategy>,
    ) -> (Self, mpsc::UnboundedReceiver<DbCompletion>) {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        (
            Self {
                status_manager,
                db,
                strategy,
                processing: false,
                current_block: None,
                completions_tx,
            },
            completions_rx,
        )
    }

    pub fn status_manager(&self) -> &StatusManager {
        &self.status_manager
    }

    pub fn status_manager_mut(&mut self) -> &mut StatusManager {
        &mut self.status_manager
    }

    pub fn db(&self) -> &Arc<BlockDatabase> {
        &self.db
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn current_block(&self) -> Option<&BlockData> {
        self.current_block.as_ref()
    }

    /// Act on the current intent and return the part left to the caller
    ///
    /// Returns [`BlockIntent::DoNothing`] while a database operation is in
    /// flight.
    pub fn block_intent(&mut self) -> BlockIntent {
        self.update();
        if self.processing {
            return BlockIntent::DoNothing;
        }
        self.status_manager.block_intent()
    }

    /// A block proposed at the current height arrived from a peer
    pub fn on_received_unfinished_block(&mut self, block: BlockData) {
        let block_rid = block.rid();
        match self.status_manager.block_intent() {
            BlockIntent::FetchUnfinishedBlock {
                block_rid: expected,
            } if expected == block_rid => {}
            intent => {
                trace!(target: LOG_TARGET, %block_rid, %intent, "Ignoring unfinished block");
                return;
            }
        }

        let db = self.db.clone();
        self.dispatch(async move {
            let res = db.load_unfinished_block(block.clone()).await;
            DbCompletion::LoadedUnfinished { block, res }
        });
    }

    /// A committed block arrived from a peer
    pub fn on_received_block_at_height(
        &mut self,
        block: BlockDataWithWitness,
        height: BlockHeight,
    ) {
        match self.status_manager.block_intent() {
            BlockIntent::FetchBlockAtHeight { height: expected } if expected == height => {}
            intent => {
                trace!(target: LOG_TARGET, %height, %intent, "Ignoring block at height");
                return;
            }
        }
        if block.data.height() != height {
            warn!(target: LOG_TARGET, %height, block_height = %block.data.height(), "Block at wrong height");
            return;
        }

        let db = self.db.clone();
        self.dispatch(async move {
            let res = db.add_block(block).await;
            DbCompletion::AddedBlock { height, res }
        });
    }

    /// Apply the result of a background operation
    pub fn on_db_completion(&mut self, completion: DbCompletion) {
        self.processing = false;

        match completion {
            DbCompletion::LoadedUnfinished { block, res } => {
                let block_rid = block.rid();
                match res {
                    Ok(my_signature) => {
                        if self
                            .status_manager
                            .on_received_block(block_rid, my_signature)
                            .is_ok()
                        {
                            self.current_block = Some(block);
                        }
                    }
                    Err(err) => self.log_db_error("Failed to load unfinished block", &err),
                }
            }
            DbCompletion::AddedBlock { height, res } => match res {
                Ok(()) => {
                    if self
                        .status_manager
                        .on_height_advance(height.next_expect())
                        .is_ok()
                    {
                        self.current_block = None;
                    }
                }
                Err(err) => self.log_db_error("Failed to add block", &err),
            },
            DbCompletion::Built(res) => match res {
                Ok((block, my_signature)) => {
                    let block_rid = block.rid();
                    debug!(target: LOG_TARGET, %block_rid, height = %block.height(), txs = block.transactions.len(), "Built block");
                    if self
                        .status_manager
                        .on_built_block(block_rid, my_signature)
                        .is_ok()
                    {
                        self.current_block = Some(block);
                    }
                }
                Err(err) => self.log_db_error("Failed to build block", &err),
            },
            DbCompletion::Committed { block, res } => match res {
                Ok(()) => {
                    if self.status_manager.on_committed_block(block.rid()) == StatusOutcome::Ok {
                        self.strategy.block_committed(&block);
                    }
                    self.current_block = None;
                }
                Err(err) => self.log_db_error("Failed to commit block", &err),
            },
        }
    }

    fn update(&mut self) {
        if self.processing {
            return;
        }

        match self.status_manager.block_intent() {
            BlockIntent::BuildBlock => {
                if !self
                    .strategy
                    .should_build_block(self.db.transaction_queue_size())
                {
                    return;
                }
                let db = self.db.clone();
                self.dispatch(async move { DbCompletion::Built(db.build_block().await) });
            }
            BlockIntent::CommitBlock => {
                let Some(block) = self.current_block.clone() else {
                    error!(target: LOG_TARGET, "Commit intent without a current block");
                    return;
                };
                let my_block_rid = self.status_manager.my_status().block_rid;
                if my_block_rid != Some(block.rid()) {
                    error!(target: LOG_TARGET, block_rid = %block.rid(), "Current block does not match own status");
                    return;
                }
                let signatures = self
                    .status_manager
                    .commit_signatures()
                    .iter()
                    .flatten()
                    .copied()
                    .collect();
                let db = self.db.clone();
                self.dispatch(async move {
                    let res = db.commit_block(signatures).await;
                    DbCompletion::Committed { block, res }
                });
            }
            _ => {}
        }
    }

    /// Run `op` in the background, unless something is running already
    fn dispatch<F>(&mut self, op: F)
    where
        F: Future<Output = DbCompletion> + Send + 'static,
    {
        if self.processing {
            trace!(target: LOG_TARGET, "Block database busy, skipping");
            return;
        }
        self.processing = true;
        let completions_tx = self.completions_tx.clone();
        tokio::spawn(async move {
            // Receiver gone means the owner shut down
            let _ = completions_tx.send(op.await);
        });
    }

    fn log_db_error(&self, msg: &'static str, err: &BlockDbError) {
        if err.is_shutdown() || self.db.is_engine_closed() {
            debug!(target: LOG_TARGET, err = %err.fmt_compact(), "{msg}");
        } else {
            error!(target: LOG_TARGET, err = %err.fmt_compact(), "{msg}");
        }
    }
}
