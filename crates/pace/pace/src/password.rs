//! Password material used to key the PACE handshake
//!
//! The secret itself never leaves this module except as input to the key
//! derivation, and `Debug` only reveals which kind of password is held.

use std::fmt;

use sha1::{Digest, Sha1};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{Error, Result};

/// Which password the terminal and the card share
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum PasswordKind {
    /// Key seed derived from the machine readable zone
    #[display("MRZ")]
    Mrz,
    /// Card access number
    #[display("CAN")]
    Can,
    /// Personal identification number
    #[display("PIN")]
    Pin,
    /// PIN unblocking key
    #[display("PUK")]
    Puk,
}

impl PasswordKind {
    /// Password reference carried in tag `83` of MSE Set AT
    pub const fn reference(&self) -> u8 {
        match self {
            Self::Mrz => 0x01,
            Self::Can => 0x02,
            Self::Pin => 0x03,
            Self::Puk => 0x04,
        }
    }
}

/// Shared secret for PACE together with its kind
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct WirelessInitializer {
    #[zeroize(skip)]
    kind: PasswordKind,
    secret: Vec<u8>,
}

impl WirelessInitializer {
    /// Card access number, printed on the document
    pub fn can(can: &str) -> Result<Self> {
        Self::numeric(PasswordKind::Can, can)
    }

    /// Personal identification number
    pub fn pin(pin: &str) -> Result<Self> {
        Self::numeric(PasswordKind::Pin, pin)
    }

    /// PIN unblocking key
    pub fn puk(puk: &str) -> Result<Self> {
        Self::numeric(PasswordKind::Puk, puk)
    }

    /// MRZ key seed from document number, date of birth and date of expiry
    ///
    /// Dates are `YYMMDD`. Document numbers shorter than nine characters are
    /// filled with `<`.
    pub fn mrz(document_number: &str, date_of_birth: &str, date_of_expiry: &str) -> Result<Self> {
        let information = Zeroizing::new(mrz_information(
            document_number,
            date_of_birth,
            date_of_expiry,
        )?);

        Ok(Self {
            kind: PasswordKind::Mrz,
            secret: Sha1::digest(information.as_bytes()).to_vec(),
        })
    }

    fn numeric(kind: PasswordKind, value: &str) -> Result<Self> {
        if value.is_empty() {
            return Err(Error::InvalidPassword("password is empty"));
        }
        if !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidPassword("password must consist of digits"));
        }

        Ok(Self {
            kind,
            secret: value.as_bytes().to_vec(),
        })
    }

    /// Kind of password held
    pub const fn kind(&self) -> PasswordKind {
        self.kind
    }

    /// Bytes fed into the password key derivation
    pub(crate) fn secret(&self) -> &[u8] {
        &self.secret
    }
}

impl fmt::Debug for WirelessInitializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WirelessInitializer")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// ICAO 9303 check digit over `[0-9A-Z<]` with the repeating 7-3-1 weights
pub fn check_digit(data: &str) -> Result<u8> {
    const WEIGHTS: [u32; 3] = [7, 3, 1];

    let mut sum = 0u32;
    for (i, c) in data.chars().enumerate() {
        let value = match c {
            '0'..='9' => c as u32 - '0' as u32,
            'A'..='Z' => c as u32 - 'A' as u32 + 10,
            '<' => 0,
            _ => return Err(Error::InvalidPassword("invalid MRZ character")),
        };
        sum += value * WEIGHTS[i % 3];
    }

    Ok((sum % 10) as u8)
}

/// MRZ information: each field followed by its check digit
fn mrz_information(
    document_number: &str,
    date_of_birth: &str,
    date_of_expiry: &str,
) -> Result<String> {
    let document_number = document_number.to_ascii_uppercase();
    if document_number.is_empty() || document_number.len() > 9 {
        return Err(Error::InvalidPassword(
            "document number must have 1 to 9 characters",
        ));
    }
    for date in [date_of_birth, date_of_expiry] {
        if date.len() != 6 || !date.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidPassword("dates must be YYMMDD"));
        }
    }

    let document_number = format!("{document_number:<<9}");
    let mut information = String::with_capacity(24);
    for field in [document_number.as_str(), date_of_birth, date_of_expiry] {
        information.push_str(field);
        information.push(char::from(b'0' + check_digit(field)?));
    }

    Ok(information)
}
