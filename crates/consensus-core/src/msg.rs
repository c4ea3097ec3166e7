use bincode::{Decode, Encode};

use crate::block::{BlockData, BlockDataWithWitness, BlockHeight, BlockRid};
use crate::signed::CommitSignature;
use crate::status::NodeStatus;

/// Everything validators of one chain say to each other
#[derive(Decode, Encode, Clone, Debug, PartialEq, Eq)]
pub enum EbftMessage {
    /// Sender's own current status
    Status(NodeStatus),
    GetUnfinishedBlock {
        block_rid: BlockRid,
    },
    /// Block proposed at the current height, not committed yet
    UnfinishedBlock(BlockData),
    GetBlockAtHeight {
        height: BlockHeight,
    },
    /// Committed block, response to [`EbftMessage::GetBlockAtHeight`]
    CompleteBlock {
        height: BlockHeight,
        block: BlockDataWithWitness,
    },
    GetBlockSignature {
        block_rid: BlockRid,
    },
    BlockSignature {
        block_rid: BlockRid,
        signature: CommitSignature,
    },
}

impl EbftMessage {
    /// Short name, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            EbftMessage::Status(_) => "status",
            EbftMessage::GetUnfinishedBlock { .. } => "get-unfinished-block",
            EbftMessage::UnfinishedBlock(_) => "unfinished-block",
            EbftMessage::GetBlockAtHeight { .. } => "get-block-at-height",
            EbftMessage::CompleteBlock { .. } => "complete-block",
            EbftMessage::GetBlockSignature { .. } => "get-block-signature",
            EbftMessage::BlockSignature { .. } => "block-signature",
        }
    }
}
