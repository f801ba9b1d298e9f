//! Core types for APDU (Application Protocol Data Unit) exchanges
//!
//! This crate provides the foundational types for talking to smart cards
//! according to ISO/IEC 7816-4:
//!
//! - [`Command`]: building and parsing command APDUs in short and extended form
//! - [`Response`] and [`StatusWord`]: parsing response APDUs and interpreting SW1/SW2
//! - [`CardTransport`]: the pluggable raw byte exchange with a card
//!
//! Higher level protocols (secure messaging, PACE) are layered on top of the
//! [`CardTransport`] trait and never depend on a concrete reader technology.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

pub mod command;
pub mod error;
pub mod response;
pub mod transport;

pub use command::{ApduCommand, Command, ExpectedLength};
pub use error::{Error, Result, ResultExt};
pub use response::Response;
pub use response::status::StatusWord;
pub use transport::CardTransport;
#[cfg(any(test, feature = "mock"))]
pub use transport::MockTransport;

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{Bytes, BytesMut, Error, Result, ResultExt};

    pub use crate::Command;
    pub use crate::command::{ApduCommand, ExpectedLength};

    pub use crate::Response;
    pub use crate::response::status::{StatusWord, common as status};

    pub use crate::CardTransport;
}
