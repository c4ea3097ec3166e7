use bincode::{Decode, Encode};
use ebft_util_array_type::{
    array_type_define, array_type_fixed_size_define, array_type_fixed_size_impl_serde,
    array_type_impl_debug_as_display, array_type_impl_hex_str, array_type_impl_serde,
    array_type_impl_zero_default,
};
use serde::{Deserialize, Serialize};

use crate::signed::{BlockWitness, Hashable};
use crate::timestamp::Timestamp;


array_type_fixed_size_define! {
    /// Height of a block in the chain
    ///
    /// The first block of a chain is at height `0`.
    #[derive(Encode, Decode, Clone, Copy, Hash)]
    pub struct BlockHeight(u64);
}
array_type_fixed_size_impl_serde!(BlockHeight);

array_type_fixed_size_define! {
    /// Round at a given height
    ///
    /// Starts at `0` on every height and is incremented on each
    /// successful revolt, rotating the primary.
    #[derive(Encode, Decode, Clone, Copy, Hash)]
    pub struct BlockRound(u64);
}
array_type_fixed_size_impl_serde!(BlockRound);

array_type_define! {
    /// Block identifier: hash of the [`BlockHeader`]
    #[derive(Encode, Decode, Copy, Clone, Hash)]
    pub struct BlockRid[32];
}
array_type_impl_zero_default!(BlockRid);
array_type_impl_hex_str!(BlockRid);
array_type_impl_serde!(BlockRid);
array_type_impl_debug_as_display!(BlockRid);

impl From<blake3::Hash> for BlockRid {
    fn from(value: blake3::Hash) -> Self {
        Self(*value.as_bytes())
    }
}

impl From<BlockRid> for blake3::Hash {
    fn from(value: BlockRid) -> Self {
        blake3::Hash::from_bytes(value.0)
    }
}

array_type_define! {
    #[derive(Encode, Decode, Copy, Clone, Hash)]
    pub struct BlockPayloadHash[32];
}
array_type_impl_zero_default!(BlockPayloadHash);
array_type_impl_hex_str!(BlockPayloadHash);
array_type_impl_serde!(BlockPayloadHash);
array_type_impl_debug_as_display!(BlockPayloadHash);

/// Opaque transaction bytes
///
/// Consensus never looks inside transactions, it only orders them.
#[derive(Debug, Encode, Decode, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction(#[serde(with = "serde_bytes")] pub Vec<u8>);

impl From<Vec<u8>> for Transaction {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

#[derive(Debug, Encode, Decode, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: BlockHeight,
    /// `None` only for the block at height `0`
    pub prev_block_rid: Option<BlockRid>,
    pub timestamp: Timestamp,
    pub payload_len: u32,
    /// Commits to the transactions in [`BlockData`]
    pub payload_hash: BlockPayloadHash,
}

impl Hashable for BlockHeader {}

impl BlockHeader {
    pub fn rid(&self) -> BlockRid {
        Hashable::hash(self).into()
    }
}

/// Block without a witness: what the primary proposes
#[derive(Debug, Encode, Decode, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockData {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

#[bon::bon]
impl BlockData {
    #[builder]
    pub fn new(
        height: BlockHeight,
        prev_block_rid: Option<BlockRid>,
        #[builder(default = Timestamp::now())] timestamp: Timestamp,
        #[builder(default)] transactions: Vec<Transaction>,
    ) -> Self {
        Self {
            header: BlockHeader {
                height,
                prev_block_rid,
                timestamp,
                payload_len: u32::try_from(transactions.len()).unwrap_or(u32::MAX),
                payload_hash: payload_hash(&transactions),
            },
            transactions,
        }
    }
}

impl BlockData {
    pub fn rid(&self) -> BlockRid {
        self.header.rid()
    }

    pub fn height(&self) -> BlockHeight {
        self.header.height
    }

    /// Do the transactions match what the header commits to
    pub fn is_payload_consistent(&self) -> bool {
        u32::try_from(self.transactions.len()).ok() == Some(self.header.payload_len)
            && payload_hash(&self.transactions) == self.header.payload_hash
    }
}

fn payload_hash(transactions: &[Transaction]) -> BlockPayloadHash {
    let mut hasher = blake3::Hasher::new();
    for tx in transactions {
        hasher.update(&u64::try_from(tx.0.len()).unwrap_or(u64::MAX).to_be_bytes());
        hasher.update(&tx.0);
    }
    BlockPayloadHash(*hasher.finalize().as_bytes())
}

/// Committed block: [`BlockData`] plus quorum of commit signatures
#[derive(Debug, Encode, Decode, Clone, PartialEq, Eq)]
pub struct BlockDataWithWitness {
    pub data: BlockData,
    pub witness: BlockWitness,
}

impl BlockDataWithWitness {
    pub fn rid(&self) -> BlockRid {
        self.data.rid()
    }
}
