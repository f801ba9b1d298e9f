//! PACE (Password Authenticated Connection Establishment) and ISO/IEC 7816-4
//! secure messaging
//!
//! - [`establish`] runs the PACE handshake with generic mapping over any
//!   [`CardTransport`](nexum_apdu_core::CardTransport) and returns a
//!   [`SecureMessaging`] context.
//! - [`PaceSecureChannel`] wraps a transport so every command is protected
//!   and every response verified transparently.
//!
//! ```no_run
//! use nexum_apdu_core::{CardTransport, Command};
//! use nexum_pace::{
//!     DomainParameters, PaceAlgorithm, PaceParameters, PaceSecureChannel, WirelessInitializer,
//! };
//!
//! fn read_ef_com<T: CardTransport>(transport: T) -> nexum_pace::Result<()> {
//!     let can = WirelessInitializer::can("123456")?;
//!     let parameters =
//!         PaceParameters::new(PaceAlgorithm::ECDH_GM_AES_128, DomainParameters::NIST_P256);
//!     let mut channel = PaceSecureChannel::establish(transport, &can, &parameters)?;
//!
//!     channel.transmit(&Command::new_with_data(0x00, 0xA4, 0x02, 0x0C, vec![0x01, 0x1E]))?;
//!     let response = channel.transmit(&Command::new_with_le(0x00, 0xB0, 0x00, 0x00, 256))?;
//!     println!("{:?}", response.payload());
//!     Ok(())
//! }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]

mod algorithm;
mod chat;
pub mod commands;
mod config;
pub mod constants;
pub mod crypto;
mod error;
pub mod handshake;
mod password;
mod secure_channel;
pub mod secure_messaging;

#[cfg(test)]
pub(crate) mod testing;

pub use algorithm::{DomainParameters, ID_PACE, Mapping, PaceAlgorithm, PaceParameters};
pub use chat::PaceChat;
pub use config::PaceConfig;
pub use crypto::{CipherSuite, SessionKeys};
pub use error::{Error, Result};
pub use handshake::{HandshakeState, PaceHandshake, PaceOutput, PaceStep, establish};
pub use password::{PasswordKind, WirelessInitializer, check_digit};
pub use secure_channel::PaceSecureChannel;
pub use secure_messaging::{SecureMessaging, SendSequenceCounter};
