//! GENERAL AUTHENTICATE command for PACE
//!
//! Wraps one data object in the `7C` dynamic authentication data template and
//! parses the card's answer.

use bytes::Bytes;
use iso7816_tlv::ber::{Tag, Tlv, Value};
use nexum_apdu_core::{ApduCommand, ExpectedLength};

use crate::constants::{CLA_CHAINING, INS_GENERAL_AUTHENTICATE, tags};
use crate::handshake::PaceStep;
use crate::{Error, Result};

/// GENERAL AUTHENTICATE carrying PACE dynamic authentication data
///
/// Every step but the last is sent with the command chaining bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneralAuthenticate {
    class: u8,
    data: Bytes,
}

impl GeneralAuthenticate {
    /// Step 1: request the encrypted nonce with an empty template
    pub fn encrypted_nonce() -> Result<Self> {
        Self::chained(None)
    }

    /// Step 2: send the terminal's mapping data
    pub fn map_nonce(mapping_data: &[u8]) -> Result<Self> {
        Self::chained(Some((tags::MAPPING_DATA_TERMINAL, mapping_data)))
    }

    /// Step 3: send the terminal's ephemeral public key
    pub fn key_agreement(public_key: &[u8]) -> Result<Self> {
        Self::chained(Some((tags::EPHEMERAL_KEY_TERMINAL, public_key)))
    }

    /// Step 4: send the terminal's authentication token, ending the chain
    pub fn mutual_authentication(token: &[u8]) -> Result<Self> {
        Self::with_object(0x00, Some((tags::TOKEN_TERMINAL, token)))
    }

    fn chained(object: Option<(u8, &[u8])>) -> Result<Self> {
        Self::with_object(CLA_CHAINING, object)
    }

    fn with_object(class: u8, object: Option<(u8, &[u8])>) -> Result<Self> {
        let inner = match object {
            Some((tag, value)) => vec![Tlv::new(
                Tag::try_from(tag)?,
                Value::Primitive(value.to_vec()),
            )?],
            None => Vec::new(),
        };
        let data = Tlv::new(
            Tag::try_from(tags::DYNAMIC_AUTHENTICATION_DATA)?,
            Value::Constructed(inner),
        )?
        .to_vec();

        Ok(Self {
            class,
            data: data.into(),
        })
    }
}

impl ApduCommand for GeneralAuthenticate {
    fn class(&self) -> u8 {
        self.class
    }

    fn instruction(&self) -> u8 {
        INS_GENERAL_AUTHENTICATE
    }

    fn p1(&self) -> u8 {
        0x00
    }

    fn p2(&self) -> u8 {
        0x00
    }

    fn data(&self) -> Option<&[u8]> {
        Some(&self.data)
    }

    fn expected_length(&self) -> Option<ExpectedLength> {
        Some(256)
    }
}

/// Data objects of a `7C` dynamic authentication data response
#[derive(Debug, Clone)]
pub struct AuthenticationData {
    step: PaceStep,
    raw: Bytes,
    objects: Vec<Tlv>,
}

impl AuthenticationData {
    /// Parse the payload of a GENERAL AUTHENTICATE response
    pub fn parse(step: PaceStep, payload: Option<&Bytes>) -> Result<Self> {
        let raw = payload.cloned().unwrap_or_default();
        let template = Tlv::from_bytes(&raw).map_err(|_| Error::malformed(step, &raw))?;

        if template.tag().to_bytes() != [tags::DYNAMIC_AUTHENTICATION_DATA] {
            return Err(Error::malformed(step, &raw));
        }
        let Value::Constructed(objects) = template.value() else {
            return Err(Error::malformed(step, &raw));
        };

        Ok(Self {
            step,
            objects: objects.clone(),
            raw,
        })
    }

    /// Value of a primitive data object, if present
    pub fn get(&self, tag: u8) -> Option<&[u8]> {
        self.objects
            .iter()
            .find(|tlv| tlv.tag().to_bytes() == [tag])
            .and_then(|tlv| match tlv.value() {
                Value::Primitive(value) => Some(value.as_slice()),
                Value::Constructed(_) => None,
            })
    }

    /// Value of a mandatory primitive data object
    pub fn require(&self, tag: u8) -> Result<&[u8]> {
        self.get(tag)
            .ok_or_else(|| Error::malformed(self.step, &self.raw))
    }
}
