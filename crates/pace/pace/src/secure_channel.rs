//! Secure channel over an established PACE session
//!
//! [`PaceSecureChannel`] owns a transport and the secure messaging context.
//! It is itself a [`CardTransport`], so code written against plain
//! transports runs unchanged over the protected channel.

use bytes::Bytes;
use nexum_apdu_core::response::status::common;
use nexum_apdu_core::{ApduCommand, CardTransport, Command, Response};
use tracing::{debug, trace, warn};

use crate::algorithm::PaceParameters;
use crate::config::PaceConfig;
use crate::constants::PASSWORD_INSTRUCTIONS;
use crate::handshake;
use crate::password::WirelessInitializer;
use crate::secure_messaging::SecureMessaging;
use crate::{Error, Result};

/// Transport wrapping every command in PACE secure messaging
#[derive(Debug)]
pub struct PaceSecureChannel<T: CardTransport> {
    transport: T,
    secure_messaging: Option<SecureMessaging>,
    config: PaceConfig,
    car: Option<Bytes>,
    previous_car: Option<Bytes>,
    failed: bool,
}

impl<T: CardTransport> PaceSecureChannel<T> {
    /// Open `transport` if needed and run PACE over it
    pub fn establish(
        mut transport: T,
        initializer: &WirelessInitializer,
        parameters: &PaceParameters,
    ) -> Result<Self> {
        if !transport.is_open() {
            transport.open()?;
        }

        let output = handshake::establish(&mut transport, initializer, parameters)?;
        debug!(suite = %output.secure_messaging.keys().suite(), "Secure channel established");

        Ok(Self {
            transport,
            secure_messaging: Some(output.secure_messaging),
            config: parameters.config,
            car: output.car,
            previous_car: output.previous_car,
            failed: false,
        })
    }

    /// Wrap a transport with an existing secure messaging context
    pub const fn new(transport: T, secure_messaging: SecureMessaging, config: PaceConfig) -> Self {
        Self {
            transport,
            secure_messaging: Some(secure_messaging),
            config,
            car: None,
            previous_car: None,
            failed: false,
        }
    }

    /// Most recent CA reference announced by the card during PACE
    pub const fn car(&self) -> Option<&Bytes> {
        self.car.as_ref()
    }

    /// Previous CA reference announced by the card during PACE
    pub const fn previous_car(&self) -> Option<&Bytes> {
        self.previous_car.as_ref()
    }

    /// Current secure messaging context, `None` once closed
    pub const fn secure_messaging(&self) -> Option<&SecureMessaging> {
        self.secure_messaging.as_ref()
    }

    /// Whether a fatal error has made the channel unusable
    pub const fn is_failed(&self) -> bool {
        self.failed
    }

    /// Underlying transport
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Drop the session keys and return the underlying transport
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Send a command through secure messaging and return the card's plain response
    ///
    /// `6C xx` answers are re-issued with the corrected Le up to
    /// [`PaceConfig::max_wrong_length_retries`] times. Any error is fatal:
    /// afterwards every call returns [`Error::ChannelFailed`].
    pub fn transmit(&mut self, command: &Command) -> Result<Response> {
        if self.failed {
            return Err(Error::ChannelFailed);
        }

        let result = self.transmit_protected(command);
        if let Err(e) = &result {
            warn!(error = %e, "Secure channel failed");
            self.failed = true;
        }
        result
    }

    fn transmit_protected(&mut self, command: &Command) -> Result<Response> {
        let mut command = command.clone();
        let mut retries = 0;

        loop {
            let secure_messaging = self
                .secure_messaging
                .as_mut()
                .ok_or(nexum_apdu_core::Error::NotOpen)?;

            let protected = secure_messaging.protect(&command)?.to_bytes()?;
            let raw = self.transport.transmit_raw(&protected)?;

            let status = Response::from_bytes(&raw)?.status();
            if !status.is_success() && status != common::END_OF_DATA {
                return Err(Error::SecureTransmitFailed {
                    status,
                    command: describe(&command)?,
                    protected: hex::encode(&protected),
                });
            }

            let response = secure_messaging.unwrap_response(&raw)?;
            trace!(
                protected_len = raw.len(),
                plain_len = response.payload().map_or(0, Bytes::len),
                status = %response.status(),
                "Secure transmit"
            );

            let inner = response.status();
            if inner.is_invalid_checksum() {
                return Err(Error::InvalidChecksum);
            }

            if let Some(le) = inner.corrected_length() {
                if retries < self.config.max_wrong_length_retries {
                    retries += 1;
                    debug!(le, retries, "Card requested a different Le, retransmitting");
                    command = command.with_le(le);
                    continue;
                }
                warn!(status = %inner, "Wrong length retry limit reached");
            }

            return Ok(response);
        }
    }
}

impl<T: CardTransport> CardTransport for PaceSecureChannel<T> {
    fn open(&mut self) -> nexum_apdu_core::Result<()> {
        self.transport.open()
    }

    fn close(&mut self) -> nexum_apdu_core::Result<()> {
        self.secure_messaging = None;
        self.transport.close()
    }

    fn is_open(&self) -> bool {
        !self.failed && self.secure_messaging.is_some() && self.transport.is_open()
    }

    // Plain commands may carry passwords, only sizes are traced here
    fn transmit_raw(&mut self, command: &[u8]) -> nexum_apdu_core::Result<Bytes> {
        trace!(len = command.len(), "Transmitting command over secure channel");
        self.do_transmit_raw(command)
    }

    fn do_transmit_raw(&mut self, command: &[u8]) -> nexum_apdu_core::Result<Bytes> {
        let command = Command::from_bytes(command)?;
        let response = self.transmit(&command).map_err(|e| match e {
            Error::Apdu(e) => e,
            other => nexum_apdu_core::Error::message(other.to_string()),
        })?;
        Ok(response.to_bytes())
    }
}

/// Hex of a plain command, with password commands redacted
fn describe(command: &Command) -> Result<String> {
    if PASSWORD_INSTRUCTIONS.contains(&command.instruction()) {
        return Ok("<redacted>".to_string());
    }
    Ok(hex::encode(command.to_bytes()?))
}
