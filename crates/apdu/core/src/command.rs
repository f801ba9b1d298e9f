//! APDU command definitions and traits
//!
//! This module provides types and traits for working with APDU commands
//! according to ISO/IEC 7816-4, covering all four command cases in both the
//! short and the extended length encodings.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Error, Result};

/// Expected response length (Le) of a command
///
/// Values run from 1 to [`MAX_EXTENDED_LE`]. On the wire `256` is written as
/// `00` in the short form and `65536` as `00 00` in the extended form.
pub type ExpectedLength = u32;

/// Largest Lc that fits the short form
pub const MAX_SHORT_LC: usize = 255;
/// Largest Lc that fits the extended form
pub const MAX_EXTENDED_LC: usize = 65535;
/// Largest Le that fits the short form
pub const MAX_SHORT_LE: ExpectedLength = 256;
/// Largest Le that fits the extended form
pub const MAX_EXTENDED_LE: ExpectedLength = 65536;

/// Core trait for APDU commands
pub trait ApduCommand {
    /// Command class (CLA)
    fn class(&self) -> u8;

    /// Instruction code (INS)
    fn instruction(&self) -> u8;

    /// First parameter (P1)
    fn p1(&self) -> u8;

    /// Second parameter (P2)
    fn p2(&self) -> u8;

    /// Command payload data (optional)
    fn data(&self) -> Option<&[u8]>;

    /// Expected response length (optional)
    fn expected_length(&self) -> Option<ExpectedLength>;

    /// Whether this command needs the extended length encoding
    fn is_extended(&self) -> bool {
        let data_len = self.data().map_or(0, <[u8]>::len);
        data_len > MAX_SHORT_LC || self.expected_length().is_some_and(|le| le > MAX_SHORT_LE)
    }

    /// Convert to raw APDU bytes
    ///
    /// Fails when the data or expected length cannot be described by either
    /// length encoding.
    fn to_bytes(&self) -> Result<Bytes> {
        let data = self.data().unwrap_or_default();
        if data.len() > MAX_EXTENDED_LC {
            return Err(Error::DataTooLong(data.len()));
        }
        if let Some(le) = self.expected_length() {
            if le == 0 || le > MAX_EXTENDED_LE {
                return Err(Error::InvalidExpectedLength(le));
            }
        }

        let extended = self.is_extended();
        let mut buffer = BytesMut::with_capacity(self.command_length());

        // Header: CLA, INS, P1, P2
        buffer.put_u8(self.class());
        buffer.put_u8(self.instruction());
        buffer.put_u8(self.p1());
        buffer.put_u8(self.p2());

        if !data.is_empty() {
            if extended {
                buffer.put_u8(0x00);
                buffer.put_u16(data.len() as u16);
            } else {
                buffer.put_u8(data.len() as u8);
            }
            buffer.put_slice(data);
        }

        if let Some(le) = self.expected_length() {
            // The maximum of each form wraps to all-zero bytes
            if extended {
                if data.is_empty() {
                    buffer.put_u8(0x00);
                }
                buffer.put_u16((le % MAX_EXTENDED_LE) as u16);
            } else {
                buffer.put_u8((le % MAX_SHORT_LE) as u8);
            }
        }

        Ok(buffer.freeze())
    }

    /// Calculate length of serialized command
    fn command_length(&self) -> usize {
        let extended = self.is_extended();
        let data_len = self.data().map_or(0, <[u8]>::len);

        // Header (CLA, INS, P1, P2) is always 4 bytes
        let mut length = 4;

        if data_len > 0 {
            length += if extended { 3 } else { 1 } + data_len;
        }

        if self.expected_length().is_some() {
            length += match (extended, data_len) {
                (false, _) => 1,
                (true, 0) => 3,
                (true, _) => 2,
            };
        }

        length
    }

    /// Convert to a generic Command
    fn to_command(&self) -> Command {
        Command {
            cla: self.class(),
            ins: self.instruction(),
            p1: self.p1(),
            p2: self.p2(),
            data: self.data().map(Bytes::copy_from_slice),
            le: self.expected_length(),
        }
    }
}

/// Generic APDU command structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Command data (optional)
    pub data: Option<Bytes>,
    /// Expected length (optional)
    pub le: Option<ExpectedLength>,
}

impl Command {
    /// Create a new command with just the header bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: None,
        }
    }

    /// Create a new command with expected response length (Le)
    pub const fn new_with_le(cla: u8, ins: u8, p1: u8, p2: u8, le: ExpectedLength) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: Some(le),
        }
    }

    /// Create a new command with data payload
    pub fn new_with_data<T: Into<Bytes>>(cla: u8, ins: u8, p1: u8, p2: u8, data: T) -> Self {
        Self::new(cla, ins, p1, p2).with_data(data)
    }

    /// Create a new command with both data and expected length
    pub fn new_with_data_and_le<T: Into<Bytes>>(
        cla: u8,
        ins: u8,
        p1: u8,
        p2: u8,
        data: T,
        le: ExpectedLength,
    ) -> Self {
        Self::new(cla, ins, p1, p2).with_data(data).with_le(le)
    }

    /// Set the data field; empty data is the same as no data
    pub fn with_data<T: Into<Bytes>>(mut self, data: T) -> Self {
        let data = data.into();
        self.data = (!data.is_empty()).then_some(data);
        self
    }

    /// Set the expected length field
    pub const fn with_le(mut self, le: ExpectedLength) -> Self {
        self.le = Some(le);
        self
    }

    /// Parse a command from raw bytes
    ///
    /// The total length must match the Lc/Le fields exactly, otherwise
    /// [`Error::InvalidCommandLength`] is returned.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let invalid = || Error::InvalidCommandLength(data.len());

        let [cla, ins, p1, p2, body @ ..] = data else {
            return Err(invalid());
        };
        let mut command = Self::new(*cla, *ins, *p1, *p2);

        match body {
            // Case 1
            [] => {}
            // Case 2S
            [le] => command.le = Some(decode_short_le(*le)),
            // Extended forms
            [0x00, hi, lo, rest @ ..] => {
                let field = u16::from_be_bytes([*hi, *lo]) as usize;
                if rest.is_empty() {
                    // Case 2E
                    command.le = Some(decode_extended_le(*hi, *lo));
                } else if field == 0 {
                    return Err(invalid());
                } else if rest.len() == field {
                    // Case 3E
                    command.data = Some(Bytes::copy_from_slice(rest));
                } else if let [payload @ .., le_hi, le_lo] = rest {
                    // Case 4E
                    if payload.len() != field {
                        return Err(invalid());
                    }
                    command.data = Some(Bytes::copy_from_slice(payload));
                    command.le = Some(decode_extended_le(*le_hi, *le_lo));
                } else {
                    return Err(invalid());
                }
            }
            [0x00, ..] => return Err(invalid()),
            // Short forms
            [lc, rest @ ..] => {
                let lc = *lc as usize;
                if rest.len() == lc {
                    // Case 3S
                    command.data = Some(Bytes::copy_from_slice(rest));
                } else if rest.len() == lc + 1 {
                    // Case 4S
                    command.data = Some(Bytes::copy_from_slice(&rest[..lc]));
                    command.le = Some(decode_short_le(rest[lc]));
                } else {
                    return Err(invalid());
                }
            }
        }

        Ok(command)
    }
}

const fn decode_short_le(le: u8) -> ExpectedLength {
    if le == 0 { MAX_SHORT_LE } else { le as ExpectedLength }
}

const fn decode_extended_le(hi: u8, lo: u8) -> ExpectedLength {
    match u16::from_be_bytes([hi, lo]) {
        0 => MAX_EXTENDED_LE,
        le => le as ExpectedLength,
    }
}

impl ApduCommand for Command {
    fn class(&self) -> u8 {
        self.cla
    }

    fn instruction(&self) -> u8 {
        self.ins
    }

    fn p1(&self) -> u8 {
        self.p1
    }

    fn p2(&self) -> u8 {
        self.p2
    }

    fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    fn expected_length(&self) -> Option<ExpectedLength> {
        self.le
    }
}
