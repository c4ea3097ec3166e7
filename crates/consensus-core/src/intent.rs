use std::fmt;

use crate::block::{BlockHeight, BlockRid};
use crate::peer_idx_set::PeerIdxSet;

/// The single next action consensus wants performed
///
/// Purely derived from believed statuses; recomputed on every event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BlockIntent {
    #[default]
    DoNothing,
    /// This node is the primary and should build a block
    BuildBlock,
    /// A quorum of commit signatures was collected
    CommitBlock,
    FetchUnfinishedBlock {
        block_rid: BlockRid,
    },
    /// This node fell behind, fetch a committed block at `height`
    FetchBlockAtHeight {
        height: BlockHeight,
    },
    FetchCommitSignature {
        block_rid: BlockRid,
        peers: PeerIdxSet,
    },
}

impl fmt::Display for BlockIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockIntent::DoNothing => f.write_str("do-nothing"),
            BlockIntent::BuildBlock => f.write_str("build-block"),
            BlockIntent::CommitBlock => f.write_str("commit-block"),
            BlockIntent::FetchUnfinishedBlock { block_rid } => {
                write!(f, "fetch-unfinished-block({block_rid:#})")
            }
            BlockIntent::FetchBlockAtHeight { height } => {
                write!(f, "fetch-block-at-height({height})")
            }
            BlockIntent::FetchCommitSignature { block_rid, peers } => {
                write!(f, "fetch-commit-signature({block_rid:#}, {peers})")
            }
        }
    }
}
