//! PC/SC transport implementation

use std::ffi::CString;
use std::fmt;

use bytes::{Bytes, BytesMut};
use nexum_apdu_core::CardTransport;
use pcsc::{Card, Context, Disposition, MAX_BUFFER_SIZE_EXTENDED};
use tracing::{debug, trace, warn};

use crate::config::PcscConfig;
use crate::error::PcscError;

/// Transport implementation using PC/SC
pub struct PcscTransport {
    context: Context,
    card: Option<Card>,
    reader_name: String,
    config: PcscConfig,
}

impl fmt::Debug for PcscTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscTransport")
            .field("reader_name", &self.reader_name)
            .field("has_card", &self.card.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl PcscTransport {
    /// Create a transport for `reader_name` and connect to its card
    pub(crate) fn connect(
        context: Context,
        reader_name: &str,
        config: PcscConfig,
    ) -> Result<Self, PcscError> {
        let mut transport = Self {
            context,
            card: None,
            reader_name: reader_name.to_string(),
            config,
        };
        transport.connect_card()?;
        Ok(transport)
    }

    fn connect_card(&mut self) -> Result<(), PcscError> {
        if self.card.is_some() {
            return Ok(());
        }

        let reader = CString::new(self.reader_name.clone())
            .map_err(|_| PcscError::ReaderNotFound(self.reader_name.clone()))?;

        match self
            .context
            .connect(&reader, self.config.share_mode.into(), self.config.protocols)
        {
            Ok(card) => {
                debug!(reader = %self.reader_name, "Connected to card");
                self.card = Some(card);
                Ok(())
            }
            Err(pcsc::Error::NoSmartcard) => Err(PcscError::NoCard(self.reader_name.clone())),
            Err(pcsc::Error::UnknownReader) => {
                Err(PcscError::ReaderNotFound(self.reader_name.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Get the ATR of the current card
    pub fn atr(&self) -> Result<Vec<u8>, PcscError> {
        let card = self
            .card
            .as_ref()
            .ok_or_else(|| PcscError::NoCard(self.reader_name.clone()))?;
        Ok(card.get_attribute_owned(pcsc::Attribute::AtrString)?)
    }

    /// Get the reader name
    pub fn reader_name(&self) -> &str {
        &self.reader_name
    }

    fn transmit_once(&mut self, command: &[u8]) -> Result<Bytes, PcscError> {
        let card = self
            .card
            .as_ref()
            .ok_or_else(|| PcscError::NoCard(self.reader_name.clone()))?;

        let mut buffer = vec![0u8; MAX_BUFFER_SIZE_EXTENDED];
        let result = card
            .transmit(command, &mut buffer)
            .map(Bytes::copy_from_slice);
        match result {
            Ok(response) => Ok(response),
            Err(e @ (pcsc::Error::ResetCard | pcsc::Error::RemovedCard)) => {
                self.card = None;
                if self.config.auto_reconnect && e == pcsc::Error::ResetCard {
                    warn!(reader = %self.reader_name, "Card was reset, reconnecting");
                    self.connect_card()?;
                    let card = self
                        .card
                        .as_ref()
                        .ok_or_else(|| PcscError::NoCard(self.reader_name.clone()))?;
                    return Ok(Bytes::copy_from_slice(card.transmit(command, &mut buffer)?));
                }
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn transmit_command(&mut self, command: &[u8]) -> Result<Bytes, PcscError> {
        let first = self.transmit_once(command)?;
        if !self.config.get_response {
            return Ok(first);
        }
        collect_response(first, |remaining| {
            self.transmit_once(&[0x00, 0xC0, 0x00, 0x00, remaining])
        })
    }
}

/// Follow `61 xx` answers with GET RESPONSE until the card returns a final status
pub(crate) fn collect_response(
    first: Bytes,
    mut fetch: impl FnMut(u8) -> Result<Bytes, PcscError>,
) -> Result<Bytes, PcscError> {
    let mut response = first;
    let mut data = BytesMut::new();

    while let [.., 0x61, remaining] = response[..] {
        trace!(remaining, "Fetching remaining response bytes");
        data.extend_from_slice(&response[..response.len() - 2]);
        response = fetch(remaining)?;
    }

    if data.is_empty() {
        return Ok(response);
    }
    data.extend_from_slice(&response);
    Ok(data.freeze())
}

impl CardTransport for PcscTransport {
    fn open(&mut self) -> nexum_apdu_core::Result<()> {
        Ok(self.connect_card()?)
    }

    fn close(&mut self) -> nexum_apdu_core::Result<()> {
        if let Some(card) = self.card.take() {
            card.disconnect(Disposition::LeaveCard)
                .map_err(|(_, e)| PcscError::from(e))?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.card.is_some()
    }

    fn do_transmit_raw(&mut self, command: &[u8]) -> nexum_apdu_core::Result<Bytes> {
        Ok(self.transmit_command(command)?)
    }
}

impl Drop for PcscTransport {
    fn drop(&mut self) {
        if let Some(card) = self.card.take() {
            let _ = card.disconnect(Disposition::LeaveCard);
        }
    }
}
