//! Core error type for APDU exchanges
//!
//! Transport failures and codec failures share one enum so that protocol
//! layers built on [`CardTransport`](crate::CardTransport) can propagate
//! either with `?`.

use crate::response::status::StatusWord;

/// Convenience result alias
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Core error type for APDU encoding, decoding and transport
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    //
    // Transport related errors
    //
    /// Failed to connect to the device
    #[error("Connection error: failed to connect to device")]
    ConnectionError,

    /// Failed to transmit data
    #[error("Transmission error: failed to transmit data")]
    TransmissionError,

    /// The card or reader reported a device level failure
    #[error("Device error: {0}")]
    DeviceError(String),

    /// The transport was used while closed
    #[error("Transport is not open")]
    NotOpen,

    //
    // Response related errors
    //
    /// Response shorter than the two status bytes
    #[error("Incomplete response: {0} bytes")]
    IncompleteResponse(usize),

    /// Status error from response
    #[error("Status error {status}: {}", status.description())]
    StatusError {
        /// Status word that caused the error
        status: StatusWord,
    },

    //
    // Command related errors
    //
    /// Total command length disagrees with its Lc/Le fields
    #[error("Invalid command length: {0}")]
    InvalidCommandLength(usize),

    /// Command data longer than an extended Lc can describe
    #[error("Command data too long: {0} bytes")]
    DataTooLong(usize),

    /// Expected length outside 1..=65536
    #[error("Invalid expected length: {0}")]
    InvalidExpectedLength(u32),

    //
    // General errors
    //
    /// Context error with message and source error
    #[error("{context}: {source}")]
    Context {
        /// Contextual message
        context: String,
        /// Source error
        source: Box<Self>,
    },

    /// Generic dynamic error with string message
    #[error("{0}")]
    Message(String),
}

impl Error {
    /// Create a new error with context information
    pub fn with_context<S: Into<String>>(self, context: S) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a new error with a dynamic message
    pub fn message<S: Into<String>>(message: S) -> Self {
        Self::Message(message.into())
    }

    /// Create a new status error
    pub const fn status(sw1: u8, sw2: u8) -> Self {
        Self::StatusError {
            status: StatusWord::new(sw1, sw2),
        }
    }

    /// Strip any context wrappers and return the underlying error
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Extension trait for Result with APDU Errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context<S: Into<String>>(self, context: S) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context<S: Into<String>>(self, context: S) -> Self {
        self.map_err(|e| e.with_context(context))
    }
}
