//! ISO/IEC 7816-4 secure messaging
//!
//! A protected command carries its encrypted body in `87`, the expected
//! length in `97` and an eight byte MAC in `8E`. The card answers with
//! encrypted data in `87`, the inner status word in `99` and its own `8E`.
//! Every MAC and every AES IV mixes in the send sequence counter, which is
//! incremented once before protecting a command and once before unwrapping
//! its response.

use bytes::Bytes;
use iso7816_tlv::ber::{Tlv, Value};
use nexum_apdu_core::{ApduCommand, Command, Response, StatusWord};
use subtle::ConstantTimeEq;
use tracing::{trace, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::commands::primitive;
use crate::crypto::{SessionKeys, pad, unpad};
use crate::{Error, Result};

/// Secure messaging bits of the class byte
pub const SM_CLASS_BITS: u8 = 0x0C;

/// Padding-content indicator prefixed to the cryptogram in `87`
const PADDING_INDICATOR: u8 = 0x01;

const TAG_ENCRYPTED_DATA: u8 = 0x87;
const TAG_EXPECTED_LENGTH: u8 = 0x97;
const TAG_STATUS: u8 = 0x99;
const TAG_MAC: u8 = 0x8E;

/// Send sequence counter
///
/// A fixed width big endian integer; it wraps to zero instead of growing.
#[derive(Debug, Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SendSequenceCounter(Vec<u8>);

impl SendSequenceCounter {
    /// Counter starting at `initial`
    pub fn new(initial: &[u8]) -> Result<Self> {
        if initial.is_empty() {
            return Err(Error::InvalidSequenceCounter(0));
        }
        Ok(Self(initial.to_vec()))
    }

    /// All zero counter of `len` bytes
    pub fn zeroed(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(Error::InvalidSequenceCounter(0));
        }
        Ok(Self(vec![0u8; len]))
    }

    /// Add one, wrapping on overflow
    pub fn increment(&mut self) {
        for byte in self.0.iter_mut().rev() {
            let (next, overflow) = byte.overflowing_add(1);
            *byte = next;
            if !overflow {
                break;
            }
        }
    }

    /// Current value
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Width in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false, counters are never empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Secure messaging context: session keys plus send sequence counter
///
/// One context serves exactly one session. Commands must be protected and
/// responses unwrapped strictly alternately, in order.
#[derive(Debug, Clone)]
pub struct SecureMessaging {
    keys: SessionKeys,
    ssc: SendSequenceCounter,
}

impl SecureMessaging {
    /// Create a context from keys and a counter as wide as the cipher block
    pub fn new(keys: SessionKeys, ssc: SendSequenceCounter) -> Result<Self> {
        if ssc.len() != keys.suite().block_size() {
            return Err(Error::InvalidSequenceCounter(ssc.len()));
        }
        Ok(Self { keys, ssc })
    }

    /// Context as produced by PACE: all zero counter
    pub fn with_zero_counter(keys: SessionKeys) -> Result<Self> {
        let ssc = SendSequenceCounter::zeroed(keys.suite().block_size())?;
        Self::new(keys, ssc)
    }

    /// Session keys
    pub const fn keys(&self) -> &SessionKeys {
        &self.keys
    }

    /// Current send sequence counter
    pub const fn ssc(&self) -> &SendSequenceCounter {
        &self.ssc
    }

    /// Protect a plain command
    ///
    /// The returned command always requests a response: `00` in short form,
    /// `0000` in extended form when the protected body or the inner Le
    /// needs it.
    pub fn protect(&mut self, command: &Command) -> Result<Command> {
        self.ssc.increment();
        let block_size = self.keys.suite().block_size();

        let header = [
            command.class() | SM_CLASS_BITS,
            command.instruction(),
            command.p1(),
            command.p2(),
        ];

        let mut body = Vec::new();
        if let Some(data) = command.data().filter(|d| !d.is_empty()) {
            let encrypted = self.keys.encrypt(self.ssc.as_bytes(), &pad(data, block_size))?;
            let mut value = Vec::with_capacity(encrypted.len() + 1);
            value.push(PADDING_INDICATOR);
            value.extend(encrypted);
            body.extend(primitive(TAG_ENCRYPTED_DATA, value)?);
        }

        let le = command.expected_length();
        if let Some(le) = le {
            body.extend(primitive(TAG_EXPECTED_LENGTH, encode_le(le)?)?);
        }

        let mut mac_input = self.ssc.as_bytes().to_vec();
        mac_input.extend(pad(&header, block_size));
        if !body.is_empty() {
            mac_input.extend(pad(&body, block_size));
        }
        let mac = self.keys.mac(&mac_input)?;
        body.extend(primitive(TAG_MAC, mac.to_vec())?);

        let outer_le = if body.len() > 255 || le.is_some_and(|le| le > 256) {
            65536
        } else {
            256
        };

        trace!(
            plain_len = command.data().map_or(0, <[u8]>::len),
            protected_len = body.len(),
            "Protected command"
        );

        Ok(Command::new_with_data_and_le(
            header[0], header[1], header[2], header[3], body, outer_le,
        ))
    }

    /// Verify and decrypt a protected response, including its status word
    pub fn unwrap_response(&mut self, response: &[u8]) -> Result<Response> {
        self.ssc.increment();

        let response = Response::from_bytes(response)?;
        let body = response.payload().map_or(&[][..], |p| p.as_ref());

        let mut encrypted: Option<(&[u8], Vec<u8>)> = None;
        let mut status: Option<(&[u8], Vec<u8>)> = None;
        let mut mac: Option<Vec<u8>> = None;

        let mut rest = body;
        while !rest.is_empty() {
            let (tlv, remaining) = Tlv::parse(rest);
            let tlv = tlv?;
            let raw = &rest[..rest.len() - remaining.len()];
            rest = remaining;

            let Value::Primitive(value) = tlv.value() else {
                warn!(tag = ?tlv.tag(), "Skipping constructed data object in protected response");
                continue;
            };

            match tlv.tag().to_bytes() {
                [TAG_ENCRYPTED_DATA] => {
                    set_once(&mut encrypted, TAG_ENCRYPTED_DATA, (raw, value.clone()))?;
                }
                [TAG_STATUS] => set_once(&mut status, TAG_STATUS, (raw, value.clone()))?,
                [TAG_MAC] => set_once(&mut mac, TAG_MAC, value.clone())?,
                tag => warn!(
                    tag = %hex::encode(tag),
                    "Skipping unknown data object in protected response"
                ),
            }
        }

        let mac = mac.ok_or(Error::MissingDataObject(TAG_MAC))?;
        let (status_raw, status) = status.ok_or(Error::MissingDataObject(TAG_STATUS))?;
        let [sw1, sw2] = status[..] else {
            return Err(malformed_object(TAG_STATUS, &status));
        };

        let mut covered = Vec::new();
        if let Some((raw, _)) = &encrypted {
            covered.extend_from_slice(raw);
        }
        covered.extend_from_slice(status_raw);

        let mut mac_input = self.ssc.as_bytes().to_vec();
        mac_input.extend(pad(&covered, self.keys.suite().block_size()));
        let expected = self.keys.mac(&mac_input)?;

        if !bool::from(expected[..].ct_eq(&mac)) {
            warn!("Response MAC verification failed");
            return Err(Error::IntegrityFailure);
        }

        let data = match encrypted {
            Some((_, value)) => {
                let [PADDING_INDICATOR, cryptogram @ ..] = &value[..] else {
                    return Err(malformed_object(TAG_ENCRYPTED_DATA, &value));
                };
                let decrypted = self.keys.decrypt(self.ssc.as_bytes(), cryptogram)?;
                Some(Bytes::copy_from_slice(unpad(&decrypted)?))
            }
            None => None,
        };

        trace!(
            protected_len = body.len(),
            plain_len = data.as_ref().map_or(0, Bytes::len),
            "Unwrapped response"
        );

        Ok(Response::new(data, StatusWord::new(sw1, sw2)))
    }
}

/// Encode Le for `97`: one byte up to 256, two bytes beyond
fn encode_le(le: u32) -> Result<Vec<u8>> {
    match le {
        1..=255 => Ok(vec![le as u8]),
        256 => Ok(vec![0x00]),
        257..=65535 => Ok((le as u16).to_be_bytes().to_vec()),
        65536 => Ok(vec![0x00, 0x00]),
        _ => Err(nexum_apdu_core::Error::InvalidExpectedLength(le).into()),
    }
}

fn set_once<T>(slot: &mut Option<T>, tag: u8, value: T) -> Result<()> {
    if slot.is_some() {
        return Err(Error::MalformedDataObject {
            tag,
            data: "duplicate data object".to_string(),
        });
    }
    *slot = Some(value);
    Ok(())
}

fn malformed_object(tag: u8, value: &[u8]) -> Error {
    Error::MalformedDataObject {
        tag,
        data: hex::encode(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CipherSuite;
    use hex_literal::hex;

    fn icao_3des() -> SecureMessaging {
        let keys = SessionKeys::new(
            CipherSuite::Des,
            &hex!("979EC13B1CBFE9DCD01AB0FED307EAE5"),
            &hex!("F1CB1F1FB5ADF208806B89DC579DC1F8"),
        )
        .unwrap();
        SecureMessaging::new(keys, SendSequenceCounter::new(&hex!("887022120C06C226")).unwrap())
            .unwrap()
    }

    fn aes_128() -> SecureMessaging {
        let keys = SessionKeys::new(
            CipherSuite::Aes128,
            &hex!("f1b0d6449cec48864c1efabb4957d64b"),
            &hex!("5de2939a1ea03a930b88206d8f73e8a7"),
        )
        .unwrap();
        SecureMessaging::with_zero_counter(keys).unwrap()
    }

    #[test]
    fn test_icao_3des_select_and_read() {
        let mut sm = icao_3des();

        let select = Command::from_bytes(&hex!("00A4020C02011E")).unwrap();
        let protected = sm.protect(&select).unwrap();
        assert_eq!(
            protected.to_bytes().unwrap().as_ref(),
            hex!("0CA4020C158709016375432908C044F68E08BF8B92D635FF24F800")
        );
        assert_eq!(sm.ssc().as_bytes(), hex!("887022120C06C227"));

        let response = sm
            .unwrap_response(&hex!("990290008E08FA855A5D4C50A8ED9000"))
            .unwrap();
        assert!(response.is_success());
        assert!(response.payload().is_none());

        let read = Command::from_bytes(&hex!("00B0000004")).unwrap();
        let protected = sm.protect(&read).unwrap();
        assert_eq!(
            protected.to_bytes().unwrap().as_ref(),
            hex!("0CB000000D9701048E08ED6705417E96BA5500")
        );

        let response = sm
            .unwrap_response(&hex!(
                "8709019FF0EC34F9922651990290008E08AD55CC17140B2DED9000"
            ))
            .unwrap();
        assert_eq!(response.payload().unwrap().as_ref(), hex!("60145F01"));
        assert_eq!(response.status(), StatusWord::new(0x90, 0x00));
        assert_eq!(sm.ssc().as_bytes(), hex!("887022120C06C22A"));
    }

    #[test]
    fn test_aes_select_and_read() {
        let mut sm = aes_128();

        let select = Command::new_with_data(0x00, 0xA4, 0x02, 0x0C, hex!("011C").to_vec());
        assert_eq!(
            sm.protect(&select).unwrap().to_bytes().unwrap().as_ref(),
            hex!("0ca4020c1d871101e449f610f75773afd61ac722fb194dc08e08437ab10641720c6f00")
        );
        let response = sm
            .unwrap_response(&hex!("990290008e08f5a68b5c7208198f9000"))
            .unwrap();
        assert!(response.is_success());

        let read = Command::new_with_le(0x00, 0xB0, 0x00, 0x00, 256);
        assert_eq!(
            sm.protect(&read).unwrap().to_bytes().unwrap().as_ref(),
            hex!("0cb000000d9701008e084804d36873821f4700")
        );
        let response = sm
            .unwrap_response(&hex!(
                "872101aaac721ebca269b7cb6f7da8ace28f69db3d321473196df6d4605485338ba61e990290008e08efddae7045f86b639000"
            ))
            .unwrap();
        assert_eq!(
            response.payload().unwrap().as_ref(),
            hex!("3114300f060a04007f0007020204020202010202010d")
        );

        let mut expected = [0u8; 16];
        expected[15] = 4;
        assert_eq!(sm.ssc().as_bytes(), expected);
    }

    #[test]
    fn test_mac_bit_flips_are_rejected() {
        let raw = hex!("990290008E08FA855A5D4C50A8ED9000");
        for byte in 6..14 {
            for bit in 0..8 {
                let mut sm = icao_3des();
                sm.protect(&Command::from_bytes(&hex!("00A4020C02011E")).unwrap())
                    .unwrap();

                let mut tampered = raw;
                tampered[byte] ^= 1 << bit;
                assert!(matches!(
                    sm.unwrap_response(&tampered),
                    Err(Error::IntegrityFailure)
                ));
            }
        }
    }

    #[test]
    fn test_unknown_objects_are_skipped() {
        let mut sm = icao_3des();
        sm.protect(&Command::from_bytes(&hex!("00A4020C02011E")).unwrap())
            .unwrap();

        let response = sm
            .unwrap_response(&hex!("5301FF990290008E08FA855A5D4C50A8ED9000"))
            .unwrap();
        assert!(response.is_success());
    }

    #[test]
    fn test_missing_objects() {
        let mut sm = icao_3des();
        assert!(matches!(
            sm.unwrap_response(&hex!("990290009000")),
            Err(Error::MissingDataObject(0x8E))
        ));
        assert!(matches!(
            sm.unwrap_response(&hex!("8E08FA855A5D4C50A8ED9000")),
            Err(Error::MissingDataObject(0x99))
        ));
        assert!(matches!(
            sm.unwrap_response(&hex!("9000")),
            Err(Error::MissingDataObject(0x8E))
        ));
    }

    #[test]
    fn test_extended_protection() {
        let mut sm = aes_128();

        let command = Command::new_with_data_and_le(0x00, 0xD6, 0x00, 0x00, vec![0xAA; 300], 1000);
        let protected = sm.protect(&command).unwrap();
        assert!(protected.is_extended());
        assert_eq!(protected.expected_length(), Some(65536));

        // 87 82 0131 01 <304 bytes>, 97 02 03E8, 8E 08 <mac>
        let data = protected.data().unwrap();
        assert_eq!(&data[..4], hex!("87820131"));
        assert_eq!(&data[309..313], hex!("970203E8"));

        let short = Command::new_with_le(0x00, 0xB0, 0x00, 0x00, 0x10);
        let protected = sm.protect(&short).unwrap();
        assert!(!protected.is_extended());
        assert_eq!(protected.expected_length(), Some(256));
    }

    #[test]
    fn test_counter_increments_and_wraps() {
        let mut ssc = SendSequenceCounter::new(&hex!("00FF")).unwrap();
        ssc.increment();
        assert_eq!(ssc.as_bytes(), hex!("0100"));

        let mut ssc = SendSequenceCounter::new(&hex!("FFFF")).unwrap();
        ssc.increment();
        assert_eq!(ssc.as_bytes(), hex!("0000"));
        assert_eq!(ssc.len(), 2);

        assert!(matches!(
            SendSequenceCounter::new(&[]),
            Err(Error::InvalidSequenceCounter(0))
        ));
        assert!(SendSequenceCounter::zeroed(0).is_err());
    }

    #[test]
    fn test_two_increments_per_exchange() {
        let mut sm = aes_128();
        let mut peer = aes_128();

        for round in 1..=5u8 {
            let protected = sm.protect(&Command::new(0x00, 0x84, 0x00, 0x00)).unwrap();
            assert_eq!(sm.ssc().as_bytes()[15], round * 2 - 1);
            assert!(protected.data().is_some());

            // Card answers with 9000 only, MAC over its own counter
            peer.ssc.increment();
            peer.ssc.increment();
            let status = primitive(TAG_STATUS, vec![0x90, 0x00]).unwrap();
            let mut mac_input = peer.ssc.as_bytes().to_vec();
            mac_input.extend(pad(&status, 16));
            let mac = peer.keys.mac(&mac_input).unwrap();

            let mut response = status;
            response.extend(primitive(TAG_MAC, mac.to_vec()).unwrap());
            response.extend([0x90, 0x00]);

            assert!(sm.unwrap_response(&response).unwrap().is_success());
            assert_eq!(sm.ssc().as_bytes()[15], round * 2);
        }
    }

    #[test]
    fn test_counter_width_must_match_block() {
        let keys = SessionKeys::new(CipherSuite::Aes128, &[0u8; 16], &[0u8; 16]).unwrap();
        assert!(matches!(
            SecureMessaging::new(keys, SendSequenceCounter::zeroed(8).unwrap()),
            Err(Error::InvalidSequenceCounter(8))
        ));
    }
}
