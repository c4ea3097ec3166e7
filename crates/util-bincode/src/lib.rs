// SPDX-License-Identifier: MIT

pub use bincode;
use bincode::config::Config;
use bincode::{de, enc, error};

/// Decode `D` from `src`, failing if any bytes are left over
pub fn decode_whole<D: de::Decode<()>, C: Config>(
    src: &[u8],
    config: C,
) -> Result<D, error::DecodeError> {
    let (t, consumed) = bincode::decode_from_slice(src, config)?;

    if consumed != src.len() {
        return Err(bincode::error::DecodeError::Other("leftover bytes"));
    }

    Ok(t)
}

/// Encode `value` into a fresh `Vec`
///
/// Encoding into memory can only fail on types with broken `Encode`
/// implementations, so this panics instead of returning an error.
pub fn encode_to_vec_expect<E: enc::Encode, C: Config>(value: &E, config: C) -> Vec<u8> {
    bincode::encode_to_vec(value, config).expect("In-memory encoding can't fail")
}
