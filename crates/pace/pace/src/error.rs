use iso7816_tlv::TlvError;
use nexum_apdu_core::StatusWord;

use crate::handshake::PaceStep;
use crate::password::PasswordKind;

/// Result type for PACE and secure messaging operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error type for PACE and secure messaging operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport or APDU codec errors
    #[error(transparent)]
    Apdu(#[from] nexum_apdu_core::Error),

    /// TLV encoding errors
    #[error("TlvError: {0}")]
    TlvError(TlvError),

    //
    // Handshake errors
    //
    /// The card answered a handshake step with a non-success status word
    #[error("PACE step {step} failed with status {status}")]
    StepFailed {
        /// Step that failed
        step: PaceStep,
        /// Status word returned by the card
        status: StatusWord,
    },

    /// The card's answer to a handshake step could not be decoded
    #[error("Malformed response to PACE step {step}: {data}")]
    MalformedResponse {
        /// Step whose response was malformed
        step: PaceStep,
        /// Hex dump of the offending payload
        data: String,
    },

    /// The card rejected the password during mutual authentication
    #[error("Wrong {kind}{}", .retries_left.map(|n| format!(", {n} tries left")).unwrap_or_default())]
    WrongPassword {
        /// Password that was rejected
        kind: PasswordKind,
        /// Remaining tries when the card reports them
        retries_left: Option<u8>,
    },

    /// The password is suspended and must be resumed with the CAN
    #[error("{kind} suspended, resume with the CAN")]
    PasswordSuspended {
        /// Password that is suspended
        kind: PasswordKind,
    },

    /// The password is blocked or deactivated
    #[error("{kind} blocked")]
    PasswordBlocked {
        /// Password that is blocked
        kind: PasswordKind,
    },

    /// The card's authentication token did not verify
    #[error("Chip authentication token mismatch")]
    ChipAuthenticationFailed,

    /// The card echoed the terminal's ephemeral key
    #[error("Card and terminal ephemeral public keys are identical")]
    IdenticalPublicKeys,

    /// A point was not a valid uncompressed point on the curve
    #[error("Invalid elliptic curve point")]
    InvalidPoint,

    /// Algorithm identifier not supported
    #[error("Unsupported PACE algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Standardized domain parameters not supported
    #[error("Unsupported domain parameters: {0}")]
    UnsupportedDomainParameters(u8),

    //
    // Secure messaging errors
    //
    /// Response MAC did not verify; the channel must be considered compromised
    #[error("Secure messaging integrity failure: MAC mismatch")]
    IntegrityFailure,

    /// A mandatory secure messaging data object is missing
    #[error("Missing secure messaging data object {0:#04X}")]
    MissingDataObject(u8),

    /// Secure messaging data object with an unexpected layout
    #[error("Malformed secure messaging data object {tag:#04X}: {data}")]
    MalformedDataObject {
        /// Tag of the data object
        tag: u8,
        /// Hex dump of the offending value
        data: String,
    },

    /// Decrypted data does not end in ISO/IEC 7816-4 padding
    #[error("Invalid padding in decrypted data")]
    InvalidPadding,

    /// The card reported 66 88 inside the secure channel
    #[error("Invalid cryptographic checksum reported by card")]
    InvalidChecksum,

    /// A protected command was answered with a plain error status
    #[error("Secure transmit failed with status {status}: command {command}, protected {protected}")]
    SecureTransmitFailed {
        /// Outer status word
        status: StatusWord,
        /// Plain command as hex, or `<redacted>` for password commands
        command: String,
        /// Protected command as hex
        protected: String,
    },

    /// The secure channel hit a fatal error earlier and can no longer be used
    #[error("Secure channel failed and must be re-established")]
    ChannelFailed,

    /// A send sequence counter of invalid length
    #[error("Invalid send sequence counter length: {0}")]
    InvalidSequenceCounter(usize),

    /// Password material rejected at construction
    #[error("Invalid password: {0}")]
    InvalidPassword(&'static str),

    /// Low level cryptographic failure
    #[error("Cryptographic error: {0}")]
    Crypto(&'static str),
}

impl Error {
    /// Create a malformed response error for a handshake step
    pub(crate) fn malformed(step: PaceStep, data: &[u8]) -> Self {
        Self::MalformedResponse {
            step,
            data: hex::encode(data),
        }
    }

    /// Whether the card rejected the secret or the channel's authenticity
    ///
    /// Callers use this to prompt for the password again instead of treating
    /// the error as a device fault.
    pub const fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Self::WrongPassword { .. }
                | Self::PasswordSuspended { .. }
                | Self::PasswordBlocked { .. }
                | Self::ChipAuthenticationFailed
                | Self::IntegrityFailure
                | Self::InvalidChecksum
        )
    }

    /// Remaining password tries, when the card reported them
    pub const fn retries_left(&self) -> Option<u8> {
        match self {
            Self::WrongPassword { retries_left, .. } => *retries_left,
            Self::PasswordSuspended { .. } => Some(1),
            Self::PasswordBlocked { .. } => Some(0),
            _ => None,
        }
    }
}

impl From<TlvError> for Error {
    fn from(error: TlvError) -> Self {
        Self::TlvError(error)
    }
}
