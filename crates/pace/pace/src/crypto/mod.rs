//! Cryptographic building blocks for PACE and secure messaging
//!
//! Block ciphers, MACs and digests come from RustCrypto; this module only
//! fixes how the protocol combines them.

mod cipher_suite;
mod curve;

pub use cipher_suite::{CipherSuite, MAC_LENGTH, SessionKeys};
pub(crate) use cipher_suite::KDF_PASSWORD;
pub(crate) use curve::{EphemeralKey, GenericMappingCurve, map_generator};

use crate::{Error, Result};

/// ISO/IEC 7816-4 padding: `80` followed by zeros up to a multiple of `block_size`
///
/// Padding is always added, so block aligned input grows by a whole block.
pub fn pad(data: &[u8], block_size: usize) -> Vec<u8> {
    let padded_len = (data.len() / block_size + 1) * block_size;
    let mut padded = Vec::with_capacity(padded_len);
    padded.extend_from_slice(data);
    padded.push(0x80);
    padded.resize(padded_len, 0x00);
    padded
}

/// Strip ISO/IEC 7816-4 padding
pub fn unpad(data: &[u8]) -> Result<&[u8]> {
    let end = data
        .iter()
        .rposition(|&b| b != 0x00)
        .ok_or(Error::InvalidPadding)?;

    if data[end] != 0x80 {
        return Err(Error::InvalidPadding);
    }

    Ok(&data[..end])
}
