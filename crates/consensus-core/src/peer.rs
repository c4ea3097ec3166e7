use core::fmt;

use bincode::{Decode, Encode};
use convi::CastInto as _;
use derive_more::From;
use ebft_util_array_type::{
    array_type_define, array_type_impl_debug_as_display, array_type_impl_hex_str,
    array_type_impl_rand, array_type_impl_serde, array_type_impl_zero_default,
};
use ed25519_dalek::{Signer as _, Verifier as _};
use serde::{Deserialize, Serialize};
use snafu::Snafu;

use crate::Signature;

/// Peer index
///
/// The validator set is fixed for the lifetime of a chain,
/// so peers are referred to by their position in it.
#[derive(
    Encode, Decode, From, PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy, Hash, Serialize,
    Deserialize,
)]
pub struct PeerIdx(u8);

impl fmt::Display for PeerIdx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{}", self.0))
    }
}
impl PeerIdx {
    pub const MIN: Self = PeerIdx(0x00);
    pub const MAX: Self = PeerIdx(0xff);

    pub const fn new(i: u8) -> Self {
        Self(i)
    }

    pub fn as_usize(self) -> usize {
        self.0.cast_into()
    }

    pub fn to_u8(self) -> u8 {
        self.0
    }
}

impl From<PeerIdx> for usize {
    fn from(value: PeerIdx) -> Self {
        usize::from(value.0)
    }
}

array_type_define! {
    #[derive(Encode, Decode, Clone, Copy, Hash)]
    pub struct PeerPubkey[32];
}

array_type_impl_zero_default!(PeerPubkey);
array_type_impl_hex_str!(PeerPubkey);
array_type_impl_serde!(PeerPubkey);
array_type_impl_debug_as_display!(PeerPubkey);
array_type_impl_rand!(PeerPubkey);

#[derive(Debug, Snafu)]
pub struct InvalidPubkeyError;

impl TryFrom<PeerPubkey> for ed25519_dalek::VerifyingKey {
    type Error = InvalidPubkeyError;

    fn try_from(value: PeerPubkey) -> Result<Self, Self::Error> {
        ed25519_dalek::VerifyingKey::from_bytes(&value.0).map_err(|_| InvalidPubkeyError)
    }
}

impl PeerPubkey {
    /// Check `sig` over `msg`; `false` for malformed keys too
    pub fn verify(self, msg: &[u8], sig: Signature) -> bool {
        let Ok(key) = ed25519_dalek::VerifyingKey::try_from(self) else {
            return false;
        };
        key.verify(msg, &ed25519_dalek::Signature::from(sig)).is_ok()
    }
}

array_type_define! {
    #[derive(Encode, Decode, Clone, Copy)]
    pub struct PeerSeckey[32];
}
array_type_impl_zero_default!(PeerSeckey);

impl fmt::Debug for PeerSeckey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PeerSeckey(..)")
    }
}

impl PeerSeckey {
    pub fn generate() -> Self {
        Self(ed25519_dalek::SigningKey::generate(&mut rand::thread_rng()).to_bytes())
    }

    pub fn pubkey(self) -> PeerPubkey {
        PeerPubkey(
            ed25519_dalek::SigningKey::from(self)
                .verifying_key()
                .to_bytes(),
        )
    }

    pub fn sign(self, msg: &[u8]) -> Signature {
        ed25519_dalek::SigningKey::from(self).sign(msg).into()
    }
}

impl From<PeerSeckey> for ed25519_dalek::SigningKey {
    fn from(value: PeerSeckey) -> Self {
        ed25519_dalek::SigningKey::from_bytes(&value.0)
    }
}

#[test]
fn sign_and_verify() {
    let seckey = PeerSeckey::generate();
    let other = PeerSeckey::generate();
    let sig = seckey.sign(b"hello");

    assert!(seckey.pubkey().verify(b"hello", sig));
    assert!(!seckey.pubkey().verify(b"hellO", sig));
    assert!(!other.pubkey().verify(b"hello", sig));
}
