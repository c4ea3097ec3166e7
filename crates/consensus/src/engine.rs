//! Interface to the block storage and block building machinery
//!
//! Consensus treats blocks as opaque: the engine validates, builds,
//! stores and signs them. All calls are blocking and are only ever made
//! from the [`crate::block_database::BlockDatabase`] worker, except for the
//! read-only queries.

use std::fmt;

use ebft_consensus_core::block::{BlockData, BlockDataWithWitness, BlockHeight, BlockRid};
use ebft_consensus_core::signed::{BlockWitness, CommitSignature};
use ebft_util_error::{BoxedError, BoxedErrorResult};

/// Failed load/build, with whatever the engine managed to stage
///
/// A partially staged builder must be rolled back by the caller.
pub struct PartialBuild {
    pub builder: Option<Box<dyn BlockBuilder>>,
    pub source: BoxedError,
}

impl PartialBuild {
    pub fn new(source: impl Into<BoxedError>) -> Self {
        Self {
            builder: None,
            source: source.into(),
        }
    }

    pub fn with_builder(builder: Box<dyn BlockBuilder>, source: impl Into<BoxedError>) -> Self {
        Self {
            builder: Some(builder),
            source: source.into(),
        }
    }
}

impl fmt::Debug for PartialBuild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartialBuild")
            .field("has_builder", &self.builder.is_some())
            .field("source", &self.source)
            .finish()
    }
}

pub type BuildResult = Result<Box<dyn BlockBuilder>, PartialBuild>;

pub trait BlockEngine: Send + Sync + 'static {
    /// Validate and stage a block proposed by another validator
    fn load_unfinished_block(&self, block: &BlockData) -> BuildResult;

    /// Assemble and stage a new block on top of the best one
    fn build_block(&self) -> BuildResult;

    /// Height of the last committed block, `None` for an empty chain
    fn best_height(&self) -> Option<BlockHeight>;

    fn block_at_height(&self, height: BlockHeight) -> Option<BlockDataWithWitness>;

    /// Own commit signature over an already committed block
    fn block_signature(&self, block_rid: BlockRid) -> Option<CommitSignature>;

    fn transaction_queue_size(&self) -> usize;

    /// Engine is shutting down, errors are expected
    fn is_closed(&self) -> bool;
}

/// A staged block, either committed or rolled back exactly once
pub trait BlockBuilder: Send {
    fn block_data(&self) -> &BlockData;

    /// Fresh witness builder holding own signature
    fn witness_builder(&self) -> Box<dyn BlockWitnessBuilder>;

    fn commit(self: Box<Self>, witness: BlockWitness) -> BoxedErrorResult<()>;

    fn rollback(self: Box<Self>);
}

/// Collects commit signatures for a staged block
pub trait BlockWitnessBuilder: Send {
    fn my_signature(&self) -> CommitSignature;

    /// Verify and record `signature`
    fn apply_signature(&mut self, signature: &CommitSignature) -> BoxedErrorResult<()>;

    fn is_complete(&self) -> bool;

    fn build_witness(&self) -> BoxedErrorResult<BlockWitness>;
}
