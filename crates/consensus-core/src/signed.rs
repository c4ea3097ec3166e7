use std::collections::BTreeSet;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use snafu::Snafu;

use crate::Signature;
use crate::bincode::STD_BINCODE_CONFIG;
use crate::block::BlockRid;
use crate::peer::{PeerPubkey, PeerSeckey};

pub trait Hashable: bincode::Encode {
    fn hash(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();

        bincode::encode_into_std_write(self, &mut hasher, STD_BINCODE_CONFIG)
            .expect("Can't fail");

        hasher.finalize()
    }
}

/// A message that can be signed/verified by [`PeerPubkey`] identity
pub trait Signable: Hashable {
    /// Unique tag preventing two different type of messages with the same
    /// encoding from conflicting with each other
    const TAG: [u8; 4];

    fn sign_hash(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();

        hasher.update(b"ebft");
        hasher.update(&Self::TAG);
        hasher.update(self.hash().as_bytes());

        hasher.finalize()
    }

    fn sign_with(&self, seckey: PeerSeckey) -> Signature {
        seckey.sign(self.sign_hash().as_bytes())
    }

    fn verify_signature(&self, pubkey: PeerPubkey, sig: Signature) -> bool {
        pubkey.verify(self.sign_hash().as_bytes(), sig)
    }
}

impl Hashable for BlockRid {}
impl Signable for BlockRid {
    const TAG: [u8; 4] = *b"cmit";
}

/// A validator's signature over a [`BlockRid`], attesting it will commit it
#[derive(Debug, Encode, Decode, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSignature {
    pub signer: PeerPubkey,
    pub sig: Signature,
}

impl CommitSignature {
    pub fn sign(block_rid: BlockRid, seckey: PeerSeckey) -> Self {
        Self {
            signer: seckey.pubkey(),
            sig: block_rid.sign_with(seckey),
        }
    }

    pub fn verify(&self, block_rid: BlockRid) -> bool {
        block_rid.verify_signature(self.signer, self.sig)
    }
}

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum InvalidWitnessError {
    #[snafu(display("Not enough signatures: {got} < {required}"))]
    NotEnoughSignatures { got: usize, required: usize },
    #[snafu(display("Signer not in validator set: {signer}"))]
    UnknownSigner { signer: PeerPubkey },
    #[snafu(display("Duplicate signer: {signer}"))]
    DuplicateSigner { signer: PeerPubkey },
    #[snafu(display("Invalid signature from: {signer}"))]
    InvalidSignature { signer: PeerPubkey },
}

/// Proof that a quorum of validators agreed to commit a block
#[derive(Debug, Encode, Decode, Clone, Default, PartialEq, Eq)]
pub struct BlockWitness {
    pub signatures: Vec<CommitSignature>,
}

impl BlockWitness {
    pub fn new(signatures: impl IntoIterator<Item = CommitSignature>) -> Self {
        Self {
            signatures: signatures.into_iter().collect(),
        }
    }

    pub fn verify(
        &self,
        block_rid: BlockRid,
        peers: &[PeerPubkey],
        threshold: usize,
    ) -> Result<(), InvalidWitnessError> {
        if self.signatures.len() < threshold {
            return NotEnoughSignaturesSnafu {
                got: self.signatures.len(),
                required: threshold,
            }
            .fail();
        }

        let mut seen = BTreeSet::new();
        for sig in &self.signatures {
            if !peers.contains(&sig.signer) {
                return UnknownSignerSnafu { signer: sig.signer }.fail();
            }
            if !seen.insert(sig.signer) {
                return DuplicateSignerSnafu { signer: sig.signer }.fail();
            }
            if !sig.verify(block_rid) {
                return InvalidSignatureSnafu { signer: sig.signer }.fail();
            }
        }
        Ok(())
    }
}
