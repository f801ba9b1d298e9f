//! MSE: Set AT command for PACE

use bytes::Bytes;
use nexum_apdu_core::{ApduCommand, ExpectedLength};

use super::primitive;
use crate::Result;
use crate::algorithm::{DomainParameters, PaceAlgorithm};
use crate::chat::PaceChat;
use crate::constants::{INS_MSE, P1_MSE_SET_AT, P2_MSE_SET_AT, tags};
use crate::password::PasswordKind;

/// MSE: Set AT selecting PACE
///
/// Names the algorithm OID, the password reference and optionally the domain
/// parameters and the CHAT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MseSetAuthenticationTemplate {
    data: Bytes,
}

impl MseSetAuthenticationTemplate {
    /// Build the template
    pub fn pace(
        algorithm: &PaceAlgorithm,
        password: PasswordKind,
        domain_parameters: Option<DomainParameters>,
        chat: Option<&PaceChat>,
    ) -> Result<Self> {
        let mut data = primitive(tags::MECHANISM, algorithm.oid().to_vec())?;
        data.extend(primitive(tags::PASSWORD_REFERENCE, vec![password.reference()])?);
        if let Some(parameters) = domain_parameters {
            data.extend(primitive(tags::DOMAIN_PARAMETERS, vec![parameters.id()])?);
        }
        if let Some(chat) = chat {
            data.extend(chat.to_tlv()?);
        }

        Ok(Self { data: data.into() })
    }
}

impl ApduCommand for MseSetAuthenticationTemplate {
    fn class(&self) -> u8 {
        0x00
    }

    fn instruction(&self) -> u8 {
        INS_MSE
    }

    fn p1(&self) -> u8 {
        P1_MSE_SET_AT
    }

    fn p2(&self) -> u8 {
        P2_MSE_SET_AT
    }

    fn data(&self) -> Option<&[u8]> {
        Some(&self.data)
    }

    fn expected_length(&self) -> Option<ExpectedLength> {
        None
    }
}
