//! Certificate Holder Authorization Templates

use bytes::Bytes;
use iso7816_tlv::ber::{Tag, Tlv, Value};

use crate::Result;

/// Role OID content bytes for authentication terminals (`id-AT`)
const ID_AT: [u8; 9] = [0x04, 0x00, 0x7F, 0x00, 0x07, 0x03, 0x01, 0x02, 0x02];

/// Role OID content bytes for inspection systems (`id-IS`)
const ID_IS: [u8; 9] = [0x04, 0x00, 0x7F, 0x00, 0x07, 0x03, 0x01, 0x02, 0x01];

/// Authorization template presented to the card in MSE Set AT
///
/// Holds the value of tag `7F4C`: the terminal role OID followed by the
/// discretionary data object `53` carrying the requested access rights.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaceChat(Bytes);

impl PaceChat {
    /// Wrap an already encoded template
    pub fn new(template: impl Into<Bytes>) -> Self {
        Self(template.into())
    }

    /// Template for an authentication terminal requesting `rights`
    pub fn authentication_terminal(rights: [u8; 5]) -> Result<Self> {
        Self::with_role(&ID_AT, &rights)
    }

    /// Template for an inspection system requesting `rights`
    pub fn inspection_system(rights: u8) -> Result<Self> {
        Self::with_role(&ID_IS, &[rights])
    }

    fn with_role(oid: &[u8], rights: &[u8]) -> Result<Self> {
        let mut template =
            Tlv::new(Tag::try_from(0x06u8)?, Value::Primitive(oid.to_vec()))?.to_vec();
        template.extend(
            Tlv::new(Tag::try_from(0x53u8)?, Value::Primitive(rights.to_vec()))?.to_vec(),
        );
        Ok(Self(template.into()))
    }

    /// Encoded template without the `7F4C` wrapper
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Encoded template wrapped in tag `7F4C`
    pub fn to_tlv(&self) -> Result<Vec<u8>> {
        let inner = Tlv::parse_all(&self.0);
        Ok(Tlv::new(Tag::try_from("7F4C")?, Value::Constructed(inner))?.to_vec())
    }
}
