//! Transport traits for APDU communication with cards
//!
//! A transport only moves raw bytes. It has no knowledge of command
//! structure, secure messaging or protocol details, so readers (PC/SC, NFC)
//! and protocol layers (secure channels) can be stacked freely.

use std::fmt;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::command::ApduCommand;
use crate::{Command, Response, Result};

/// Trait for basic card transports
pub trait CardTransport: Send + fmt::Debug {
    /// Open the connection to the card
    fn open(&mut self) -> Result<()>;

    /// Close the connection to the card
    fn close(&mut self) -> Result<()>;

    /// Check if the connection is open
    fn is_open(&self) -> bool;

    /// Send raw APDU bytes to card and return response bytes
    ///
    /// Concrete transports implement [`CardTransport::do_transmit_raw`];
    /// this wrapper adds tracing around it.
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes> {
        trace!(command = ?hex::encode(command), "Transmitting raw command");
        let result = self.do_transmit_raw(command);
        match &result {
            Ok(response) => {
                trace!(response = ?hex::encode(response), "Received raw response");
            }
            Err(e) => {
                debug!(error = ?e, "Transport error during transmission");
            }
        }
        result
    }

    /// Internal implementation of transmit_raw
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes>;

    /// Encode a command, transmit it and parse the response
    fn transmit(&mut self, command: &Command) -> Result<Response> {
        let bytes = command.to_bytes()?;
        let response = self.transmit_raw(&bytes)?;
        Response::from_bytes(&response)
    }
}

impl<T: CardTransport + ?Sized> CardTransport for Box<T> {
    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes> {
        (**self).transmit_raw(command)
    }

    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes> {
        (**self).do_transmit_raw(command)
    }
}

#[cfg(any(test, feature = "mock"))]
pub use mock::MockTransport;

#[cfg(any(test, feature = "mock"))]
mod mock {
    use std::collections::VecDeque;

    use bytes::Bytes;

    use super::CardTransport;
    use crate::{Error, Result};

    /// Transport that replays scripted responses and records every command
    #[derive(Debug, Clone, Default)]
    pub struct MockTransport {
        /// Responses still to be returned, in order
        pub responses: VecDeque<Bytes>,
        /// Commands that were sent
        pub commands: Vec<Bytes>,
        /// Whether the transport is open
        pub open: bool,
    }

    impl MockTransport {
        /// Create an open mock transport with the given responses
        pub fn new<I, B>(responses: I) -> Self
        where
            I: IntoIterator<Item = B>,
            B: Into<Bytes>,
        {
            Self {
                responses: responses.into_iter().map(Into::into).collect(),
                commands: Vec::new(),
                open: true,
            }
        }

        /// Queue another response
        pub fn push_response(&mut self, response: impl Into<Bytes>) {
            self.responses.push_back(response.into());
        }
    }

    impl CardTransport for MockTransport {
        fn open(&mut self) -> Result<()> {
            self.open = true;
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.open = false;
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes> {
            if !self.open {
                return Err(Error::NotOpen);
            }

            self.commands.push(Bytes::copy_from_slice(command));
            self.responses.pop_front().ok_or(Error::TransmissionError)
        }
    }
}
