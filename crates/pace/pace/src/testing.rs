//! Simulated chip for end-to-end tests
//!
//! Performs the card side of PACE with generic mapping over the same group
//! arithmetic as the terminal, then answers secure messaging commands through
//! a pluggable handler.

use std::fmt;

use bytes::Bytes;
use elliptic_curve::{Group, ProjectivePoint};
use iso7816_tlv::ber::{Tag, Tlv, Value};
use nexum_apdu_core::response::status::common;
use nexum_apdu_core::{ApduCommand, CardTransport, Command, Error as CoreError, Response, StatusWord};
use rand_v8::RngCore;

use crate::algorithm::PaceAlgorithm;
use crate::constants::{INS_GENERAL_AUTHENTICATE, INS_MSE, tags};
use crate::crypto::{
    EphemeralKey, GenericMappingCurve, KDF_PASSWORD, SessionKeys, map_generator, pad, unpad,
};
use crate::password::PasswordKind;
use crate::secure_messaging::{SM_CLASS_BITS, SendSequenceCounter};

type Handler = Box<dyn FnMut(&Command) -> Response + Send>;

type CardResult = std::result::Result<Response, StatusWord>;

const WRONG_DATA: StatusWord = StatusWord::new(0x6A, 0x80);
const REFERENCE_NOT_FOUND: StatusWord = StatusWord::new(0x6A, 0x88);
const CONDITIONS_NOT_SATISFIED: StatusWord = StatusWord::new(0x69, 0x85);

pub(crate) const CAR: &[u8] = b"DETESTCVCA00003";

pub(crate) struct SimulatedCard<C: GenericMappingCurve> {
    kind: PasswordKind,
    password: Vec<u8>,
    algorithm: Option<PaceAlgorithm>,
    nonce: Vec<u8>,
    generator: Option<ProjectivePoint<C>>,
    terminal_key: Vec<u8>,
    card_key: Vec<u8>,
    pending_keys: Option<SessionKeys>,
    session: Option<(SessionKeys, SendSequenceCounter)>,
    mse_status: StatusWord,
    failure_status: StatusWord,
    echo_public_key: bool,
    corrupt_token: bool,
    outer_failure: Option<StatusWord>,
    handler: Handler,
    /// Every raw command received
    pub(crate) commands: Vec<Bytes>,
    open: bool,
}

impl<C: GenericMappingCurve> fmt::Debug for SimulatedCard<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedCard")
            .field("kind", &self.kind)
            .field("algorithm", &self.algorithm)
            .field("secure", &self.session.is_some())
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}

impl<C: GenericMappingCurve> SimulatedCard<C> {
    pub(crate) fn new(kind: PasswordKind, password: &[u8]) -> Self {
        Self {
            kind,
            password: password.to_vec(),
            algorithm: None,
            nonce: Vec::new(),
            generator: None,
            terminal_key: Vec::new(),
            card_key: Vec::new(),
            pending_keys: None,
            session: None,
            mse_status: common::SUCCESS,
            failure_status: StatusWord::new(0x63, 0xC2),
            echo_public_key: false,
            corrupt_token: false,
            outer_failure: None,
            handler: Box::new(|_| Response::success(None)),
            commands: Vec::new(),
            open: true,
        }
    }

    pub(crate) fn with_mse_status(mut self, status: StatusWord) -> Self {
        self.mse_status = status;
        self
    }

    /// Status returned when the terminal's token does not verify
    pub(crate) fn with_failure_status(mut self, status: StatusWord) -> Self {
        self.failure_status = status;
        self
    }

    /// Answer key agreement with the terminal's own public key
    pub(crate) fn with_echoed_public_key(mut self) -> Self {
        self.echo_public_key = true;
        self
    }

    /// Flip a bit in the card's authentication token
    pub(crate) fn with_corrupted_token(mut self) -> Self {
        self.corrupt_token = true;
        self
    }

    /// Handle plain commands unwrapped from secure messaging
    pub(crate) fn with_handler(
        mut self,
        handler: impl FnMut(&Command) -> Response + Send + 'static,
    ) -> Self {
        self.handler = Box::new(handler);
        self
    }

    /// Answer the next protected command with a plain status word
    pub(crate) fn fail_next(&mut self, status: StatusWord) {
        self.outer_failure = Some(status);
    }

    pub(crate) fn session_keys(&self) -> Option<&SessionKeys> {
        self.session.as_ref().map(|(keys, _)| keys)
    }

    pub(crate) fn ssc(&self) -> Option<&SendSequenceCounter> {
        self.session.as_ref().map(|(_, ssc)| ssc)
    }

    fn set_authentication_template(&mut self, command: &Command) -> CardResult {
        let mut algorithm = None;
        let mut reference = None;
        for tlv in Tlv::parse_all(command.data().unwrap_or_default()) {
            match (tlv.tag().to_bytes(), tlv.value()) {
                ([tags::MECHANISM], Value::Primitive(oid)) => {
                    algorithm = PaceAlgorithm::from_oid(oid).ok();
                }
                ([tags::PASSWORD_REFERENCE], Value::Primitive(value)) => {
                    reference = value.first().copied();
                }
                _ => {}
            }
        }

        if reference != Some(self.kind.reference()) {
            return Err(REFERENCE_NOT_FOUND);
        }
        self.algorithm = Some(algorithm.ok_or(WRONG_DATA)?);
        Ok(Response::new(None, self.mse_status))
    }

    fn general_authenticate(&mut self, command: &Command) -> CardResult {
        let algorithm = self.algorithm.ok_or(CONDITIONS_NOT_SATISFIED)?;
        let template =
            Tlv::from_bytes(command.data().unwrap_or_default()).map_err(|_| WRONG_DATA)?;
        let Value::Constructed(inner) = template.value() else {
            return Err(WRONG_DATA);
        };
        let objects: Vec<(u8, Vec<u8>)> = inner
            .iter()
            .filter_map(|tlv| match (tlv.tag().to_bytes(), tlv.value()) {
                ([tag], Value::Primitive(value)) => Some((*tag, value.clone())),
                _ => None,
            })
            .collect();

        match objects.as_slice() {
            [] => self.encrypted_nonce(algorithm),
            [(tags::MAPPING_DATA_TERMINAL, point)] => self.map_nonce(point),
            [(tags::EPHEMERAL_KEY_TERMINAL, point)] => self.key_agreement(algorithm, point),
            [(tags::TOKEN_TERMINAL, token)] => self.mutual_authentication(algorithm, token),
            _ => Err(WRONG_DATA),
        }
    }

    fn encrypted_nonce(&mut self, algorithm: PaceAlgorithm) -> CardResult {
        let suite = algorithm.cipher();
        let mut nonce = vec![0u8; suite.block_size()];
        rand_v8::thread_rng().fill_bytes(&mut nonce);

        let key = suite.kdf(&self.password, KDF_PASSWORD);
        let iv = vec![0u8; suite.block_size()];
        let encrypted = suite.encrypt(&key, &iv, &nonce).map_err(|_| WRONG_DATA)?;
        self.nonce = nonce;

        dynamic_response(&[(tags::ENCRYPTED_NONCE, &encrypted[..])])
    }

    fn map_nonce(&mut self, point: &[u8]) -> CardResult {
        let terminal = C::decode_point(point).map_err(|_| WRONG_DATA)?;
        let key = EphemeralKey::<C>::generate(&ProjectivePoint::<C>::generator());
        let shared = key.agree(&terminal).map_err(|_| WRONG_DATA)?;
        let nonce = C::nonce_scalar(&self.nonce).map_err(|_| WRONG_DATA)?;
        self.generator = Some(map_generator::<C>(&nonce, &shared).map_err(|_| WRONG_DATA)?);

        dynamic_response(&[(tags::MAPPING_DATA_CARD, &key.public_bytes()[..])])
    }

    fn key_agreement(&mut self, algorithm: PaceAlgorithm, point: &[u8]) -> CardResult {
        let generator = self.generator.ok_or(CONDITIONS_NOT_SATISFIED)?;
        self.terminal_key = point.to_vec();

        if self.echo_public_key {
            self.card_key = point.to_vec();
        } else {
            let terminal = C::decode_point(point).map_err(|_| WRONG_DATA)?;
            let key = EphemeralKey::<C>::generate(&generator);
            let shared = key.agree(&terminal).map_err(|_| WRONG_DATA)?;
            self.pending_keys = Some(SessionKeys::derive(
                algorithm.cipher(),
                &C::x_coordinate(&shared),
            ));
            self.card_key = key.public_bytes();
        }

        dynamic_response(&[(tags::EPHEMERAL_KEY_CARD, &self.card_key[..])])
    }

    fn mutual_authentication(&mut self, algorithm: PaceAlgorithm, token: &[u8]) -> CardResult {
        let keys = self.pending_keys.take().ok_or(CONDITIONS_NOT_SATISFIED)?;
        let suite = algorithm.cipher();
        let oid = algorithm.oid();

        let expected = suite
            .authentication_token(keys.mac_key(), &oid, &self.card_key)
            .map_err(|_| WRONG_DATA)?;
        if expected[..] != token[..] {
            return Err(self.failure_status);
        }

        let mut card_token = suite
            .authentication_token(keys.mac_key(), &oid, &self.terminal_key)
            .map_err(|_| WRONG_DATA)?;
        if self.corrupt_token {
            card_token[0] ^= 0x01;
        }

        let ssc = SendSequenceCounter::zeroed(suite.block_size()).map_err(|_| WRONG_DATA)?;
        self.session = Some((keys, ssc));

        dynamic_response(&[
            (tags::TOKEN_CARD, &card_token[..]),
            (tags::CAR, CAR),
        ])
    }

    fn secure(&mut self, command: &Command) -> CardResult {
        if let Some(status) = self.outer_failure.take() {
            return Err(status);
        }
        let Some((keys, ssc)) = self.session.as_mut() else {
            return Err(CONDITIONS_NOT_SATISFIED);
        };
        ssc.increment();

        let block_size = keys.suite().block_size();
        if command.class() & SM_CLASS_BITS != SM_CLASS_BITS {
            return Err(common::SM_DATA_OBJECTS_MISSING);
        }

        let mut covered = Vec::new();
        let mut encrypted = None;
        let mut le = None;
        let mut mac = None;
        for tlv in Tlv::parse_all(command.data().unwrap_or_default()) {
            let Value::Primitive(value) = tlv.value() else {
                return Err(common::SM_DATA_OBJECTS_INCORRECT);
            };
            match tlv.tag().to_bytes() {
                [0x87] => {
                    covered.extend(tlv.to_vec());
                    encrypted = Some(value.clone());
                }
                [0x97] => {
                    covered.extend(tlv.to_vec());
                    le = Some(value.clone());
                }
                [0x8E] => mac = Some(value.clone()),
                _ => return Err(common::SM_DATA_OBJECTS_INCORRECT),
            }
        }

        let header = [
            command.class(),
            command.instruction(),
            command.p1(),
            command.p2(),
        ];
        let mut mac_input = ssc.as_bytes().to_vec();
        mac_input.extend(pad(&header, block_size));
        if !covered.is_empty() {
            mac_input.extend(pad(&covered, block_size));
        }
        let expected = keys
            .mac(&mac_input)
            .map_err(|_| common::SM_DATA_OBJECTS_INCORRECT)?;
        if mac.as_deref() != Some(&expected[..]) {
            return Err(common::SM_DATA_OBJECTS_INCORRECT);
        }

        let mut plain = Command::new(
            command.class() & !SM_CLASS_BITS,
            command.instruction(),
            command.p1(),
            command.p2(),
        );
        if let Some(value) = encrypted {
            let [0x01, cryptogram @ ..] = &value[..] else {
                return Err(common::SM_DATA_OBJECTS_INCORRECT);
            };
            let decrypted = keys
                .decrypt(ssc.as_bytes(), cryptogram)
                .map_err(|_| common::SM_DATA_OBJECTS_INCORRECT)?;
            let data = unpad(&decrypted).map_err(|_| common::SM_DATA_OBJECTS_INCORRECT)?;
            plain = plain.with_data(data.to_vec());
        }
        if let Some(value) = le {
            let le = match value[..] {
                [0x00] => 256,
                [n] => u32::from(n),
                [0x00, 0x00] => 65536,
                [hi, lo] => u32::from(u16::from_be_bytes([hi, lo])),
                _ => return Err(common::SM_DATA_OBJECTS_INCORRECT),
            };
            plain = plain.with_le(le);
        }

        let inner = (self.handler)(&plain);
        ssc.increment();

        let mut body = Vec::new();
        if let Some(data) = inner.payload().filter(|data| !data.is_empty()) {
            let mut value = vec![0x01];
            value.extend(
                keys.encrypt(ssc.as_bytes(), &pad(data, block_size))
                    .map_err(|_| WRONG_DATA)?,
            );
            body.extend(primitive(0x87, &value)?);
        }
        let (sw1, sw2) = inner.status_tuple();
        body.extend(primitive(0x99, &[sw1, sw2])?);

        let mut mac_input = ssc.as_bytes().to_vec();
        mac_input.extend(pad(&body, block_size));
        let mac = keys.mac(&mac_input).map_err(|_| WRONG_DATA)?;
        body.extend(primitive(0x8E, &mac)?);

        let outer = if inner.status() == common::END_OF_DATA {
            common::END_OF_DATA
        } else {
            common::SUCCESS
        };
        Ok(Response::new(Some(body.into()), outer))
    }
}

impl<C: GenericMappingCurve> CardTransport for SimulatedCard<C> {
    fn open(&mut self) -> nexum_apdu_core::Result<()> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> nexum_apdu_core::Result<()> {
        self.open = false;
        self.session = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn do_transmit_raw(&mut self, command: &[u8]) -> nexum_apdu_core::Result<Bytes> {
        if !self.open {
            return Err(CoreError::NotOpen);
        }
        self.commands.push(Bytes::copy_from_slice(command));

        let command = Command::from_bytes(command)?;
        let response = if self.session.is_some() {
            self.secure(&command)
        } else {
            match command.instruction() {
                INS_MSE => self.set_authentication_template(&command),
                INS_GENERAL_AUTHENTICATE => self.general_authenticate(&command),
                _ => Err(common::INVALID_INSTRUCTION),
            }
        };

        Ok(response
            .unwrap_or_else(|status| Response::error(status))
            .to_bytes())
    }
}

fn primitive(tag: u8, value: &[u8]) -> std::result::Result<Vec<u8>, StatusWord> {
    let tag = Tag::try_from(tag).map_err(|_| WRONG_DATA)?;
    Tlv::new(tag, Value::Primitive(value.to_vec()))
        .map(|tlv| tlv.to_vec())
        .map_err(|_| WRONG_DATA)
}

fn dynamic_response(objects: &[(u8, &[u8])]) -> CardResult {
    let inner = objects
        .iter()
        .map(|(tag, value)| {
            let tag = Tag::try_from(*tag).map_err(|_| WRONG_DATA)?;
            Tlv::new(tag, Value::Primitive(value.to_vec())).map_err(|_| WRONG_DATA)
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let tag = Tag::try_from(tags::DYNAMIC_AUTHENTICATION_DATA).map_err(|_| WRONG_DATA)?;
    let template = Tlv::new(tag, Value::Constructed(inner)).map_err(|_| WRONG_DATA)?;
    Ok(Response::success(Some(template.to_vec().into())))
}
