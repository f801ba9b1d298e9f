//! PC/SC transport implementation for APDU operations
//!
//! This crate provides an implementation of the
//! [`CardTransport`](nexum_apdu_core::CardTransport) trait from
//! `nexum-apdu-core` using the PC/SC API for communication with smart cards.
//!
//! # Examples
//!
//! ```no_run
//! use nexum_apdu_core::{CardTransport, Command};
//! use nexum_apdu_transport_pcsc::{ConnectStrategy, PcscConfig, PcscDeviceManager};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = PcscDeviceManager::new()?;
//! for reader in manager.list_readers()? {
//!     println!("{} (card: {})", reader.name(), reader.has_card());
//! }
//!
//! let mut transport = manager.connect(ConnectStrategy::AnyCard, PcscConfig::default())?;
//! let select = Command::new_with_data(0x00, 0xA4, 0x04, 0x0C, vec![0xA0, 0x00, 0x00, 0x02, 0x47, 0x10, 0x01]);
//! let response = transport.transmit(&select)?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![warn(missing_docs)]

mod config;
mod error;
mod manager;
mod reader;
mod transport;

pub use config::{ConnectStrategy, PcscConfig, ShareMode};
pub use error::PcscError;
pub use manager::PcscDeviceManager;
pub use reader::PcscReader;
pub use transport::PcscTransport;

// Re-export some pcsc types for convenience
pub use pcsc::{Protocol, Protocols};
