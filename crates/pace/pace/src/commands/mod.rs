//! PACE command APDUs
//!
//! MSE: Set AT selects the protocol, GENERAL AUTHENTICATE carries the four
//! handshake steps.

use iso7816_tlv::ber::{Tag, Tlv, Value};

use crate::Result;

pub mod general_authenticate;
pub use general_authenticate::*;
pub mod mse_set;
pub use mse_set::*;

/// Encode a primitive data object with a single byte tag
pub(crate) fn primitive(tag: u8, value: Vec<u8>) -> Result<Vec<u8>> {
    Ok(Tlv::new(Tag::try_from(tag)?, Value::Primitive(value))?.to_vec())
}
