//! PACE handshake with generic mapping
//!
//! ```text
//! Init --MSE Set AT--> AlgorithmSet --GA 80--> NonceRequested
//!      --GA 81/82--> NonceMapped --GA 83/84--> KeyAgreed
//!      --GA 85/86--> MutuallyAuthenticated
//! ```
//!
//! Each transition is exactly one command/response pair. A failed step
//! aborts the handshake; nothing is retried and no keys are returned.

use bp256::r1::BrainpoolP256r1;
use bp384::r1::BrainpoolP384r1;
use bytes::Bytes;
use elliptic_curve::{Group, ProjectivePoint};
use nexum_apdu_core::response::status::common;
use nexum_apdu_core::{ApduCommand, CardTransport, Response, StatusWord};
use p256::NistP256;
use p384::NistP384;
use p521::NistP521;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::algorithm::{Curve, Mapping, PaceParameters};
use crate::commands::{AuthenticationData, GeneralAuthenticate, MseSetAuthenticationTemplate};
use crate::constants::tags;
use crate::crypto::{EphemeralKey, GenericMappingCurve, KDF_PASSWORD, SessionKeys, map_generator};
use crate::password::{PasswordKind, WirelessInitializer};
use crate::secure_messaging::SecureMessaging;
use crate::{Error, Result};

/// Command/response round trips of the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum PaceStep {
    /// MSE: Set AT
    #[display("MSE Set AT")]
    SetAuthenticationTemplate,
    /// GENERAL AUTHENTICATE, encrypted nonce
    #[display("Get Nonce")]
    EncryptedNonce,
    /// GENERAL AUTHENTICATE, nonce mapping
    #[display("Map Nonce")]
    MapNonce,
    /// GENERAL AUTHENTICATE, ephemeral key agreement
    #[display("Key Agreement")]
    KeyAgreement,
    /// GENERAL AUTHENTICATE, token exchange
    #[display("Mutual Authentication")]
    MutualAuthentication,
}

/// Progress of a handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum HandshakeState {
    /// Nothing sent yet
    Init,
    /// The card accepted the algorithm and password reference
    AlgorithmSet,
    /// The nonce was received and decrypted
    NonceRequested,
    /// Both sides computed the mapped generator
    NonceMapped,
    /// Session keys are derived but not yet confirmed
    KeyAgreed,
    /// Tokens were exchanged, the session keys are confirmed
    MutuallyAuthenticated,
}

/// Result of a successful handshake
#[derive(Debug)]
pub struct PaceOutput {
    /// Secure messaging context with a zeroed send sequence counter
    pub secure_messaging: SecureMessaging,
    /// Most recent certification authority reference sent by the card
    pub car: Option<Bytes>,
    /// Previous certification authority reference sent by the card
    pub previous_car: Option<Bytes>,
}

/// Run PACE over `transport` and return the secure messaging context
pub fn establish<T>(
    transport: &mut T,
    initializer: &WirelessInitializer,
    parameters: &PaceParameters,
) -> Result<PaceOutput>
where
    T: CardTransport + ?Sized,
{
    PaceHandshake::new(transport, parameters).run(initializer)
}

/// One PACE handshake attempt
pub struct PaceHandshake<'a, T: CardTransport + ?Sized> {
    transport: &'a mut T,
    parameters: &'a PaceParameters,
    state: HandshakeState,
    /// Ephemeral secrets used in place of fresh ones, mapping key first
    preset_secrets: Vec<Zeroizing<Vec<u8>>>,
}

impl<T: CardTransport + ?Sized> std::fmt::Debug for PaceHandshake<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaceHandshake")
            .field("algorithm", &self.parameters.algorithm)
            .field("domain_parameters", &self.parameters.domain_parameters)
            .field("state", &self.state)
            .finish()
    }
}

impl<'a, T: CardTransport + ?Sized> PaceHandshake<'a, T> {
    /// Prepare a handshake; nothing is sent until [`PaceHandshake::run`]
    pub const fn new(transport: &'a mut T, parameters: &'a PaceParameters) -> Self {
        Self {
            transport,
            parameters,
            state: HandshakeState::Init,
            preset_secrets: Vec::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_ephemeral_secrets(mut self, secrets: &[&[u8]]) -> Self {
        self.preset_secrets = secrets
            .iter()
            .map(|secret| Zeroizing::new(secret.to_vec()))
            .collect();
        self
    }

    /// Current state
    pub const fn state(&self) -> HandshakeState {
        self.state
    }

    /// Perform all steps
    pub fn run(mut self, initializer: &WirelessInitializer) -> Result<PaceOutput> {
        debug!(
            algorithm = %self.parameters.algorithm,
            domain_parameters = self.parameters.domain_parameters.id(),
            password = %initializer.kind(),
            "Starting PACE"
        );

        let result = self.run_steps(initializer);
        if let Err(e) = &result {
            warn!(state = %self.state, error = %e, "PACE failed");
        }
        result
    }

    fn run_steps(&mut self, initializer: &WirelessInitializer) -> Result<PaceOutput> {
        let algorithm = self.parameters.algorithm;
        if algorithm.mapping() != Mapping::EcdhGeneric {
            return Err(Error::UnsupportedAlgorithm(algorithm.to_string()));
        }
        let curve = self.parameters.domain_parameters.curve()?;

        self.set_authentication_template(initializer.kind())?;
        let nonce = self.encrypted_nonce(initializer)?;

        match curve {
            Curve::P256 => self.agree::<NistP256>(&nonce, initializer.kind()),
            Curve::P384 => self.agree::<NistP384>(&nonce, initializer.kind()),
            Curve::P521 => self.agree::<NistP521>(&nonce, initializer.kind()),
            Curve::BrainpoolP256r1 => self.agree::<BrainpoolP256r1>(&nonce, initializer.kind()),
            Curve::BrainpoolP384r1 => self.agree::<BrainpoolP384r1>(&nonce, initializer.kind()),
        }
    }

    fn set_authentication_template(&mut self, password: PasswordKind) -> Result<()> {
        let domain_parameters = self
            .parameters
            .config
            .announce_domain_parameters
            .then_some(self.parameters.domain_parameters);
        let command = MseSetAuthenticationTemplate::pace(
            &self.parameters.algorithm,
            password,
            domain_parameters,
            self.parameters.chat.as_ref(),
        )?;

        let status = self.transmit(&command)?.status();
        if let Some(retries) = status.retry_counter() {
            info!(password = %password, retries, "Card reported password retry counter");
        } else if !status.is_success() {
            return Err(Error::StepFailed {
                step: PaceStep::SetAuthenticationTemplate,
                status,
            });
        }

        self.transition(HandshakeState::AlgorithmSet);
        Ok(())
    }

    fn encrypted_nonce(&mut self, initializer: &WirelessInitializer) -> Result<Zeroizing<Vec<u8>>> {
        let step = PaceStep::EncryptedNonce;
        let suite = self.parameters.algorithm.cipher();

        let data = self.general_authenticate(step, GeneralAuthenticate::encrypted_nonce()?)?;
        let encrypted = data.require(tags::ENCRYPTED_NONCE)?;
        if encrypted.is_empty() || encrypted.len() % suite.block_size() != 0 {
            return Err(Error::malformed(step, encrypted));
        }

        let password_key = suite.kdf(initializer.secret(), KDF_PASSWORD);
        let iv = vec![0u8; suite.block_size()];
        let nonce = Zeroizing::new(suite.decrypt(&password_key, &iv, encrypted)?);

        self.transition(HandshakeState::NonceRequested);
        Ok(nonce)
    }

    fn agree<C: GenericMappingCurve>(
        &mut self,
        nonce: &[u8],
        password: PasswordKind,
    ) -> Result<PaceOutput> {
        let algorithm = self.parameters.algorithm;
        let suite = algorithm.cipher();

        // Generic mapping
        let nonce = C::nonce_scalar(nonce)?;
        let mapping_key = self.ephemeral_key::<C>(&ProjectivePoint::<C>::generator())?;
        let data = self.general_authenticate(
            PaceStep::MapNonce,
            GeneralAuthenticate::map_nonce(&mapping_key.public_bytes())?,
        )?;
        let card_mapping = C::decode_point(data.require(tags::MAPPING_DATA_CARD)?)?;
        let generator = map_generator::<C>(&nonce, &mapping_key.agree(&card_mapping)?)?;
        drop(mapping_key);
        self.transition(HandshakeState::NonceMapped);

        // Key agreement over the mapped generator
        let key = self.ephemeral_key::<C>(&generator)?;
        let terminal_public = key.public_bytes();
        let data = self.general_authenticate(
            PaceStep::KeyAgreement,
            GeneralAuthenticate::key_agreement(&terminal_public)?,
        )?;
        let card_public = data.require(tags::EPHEMERAL_KEY_CARD)?.to_vec();
        if card_public == terminal_public {
            return Err(Error::IdenticalPublicKeys);
        }
        let card_point = C::decode_point(&card_public)?;
        let shared_secret = Zeroizing::new(C::x_coordinate(&key.agree(&card_point)?));
        let keys = SessionKeys::derive(suite, &shared_secret);
        drop(key);
        self.transition(HandshakeState::KeyAgreed);

        // Mutual authentication
        let oid = algorithm.oid();
        let token = suite.authentication_token(keys.mac_key(), &oid, &card_public)?;
        let response = self.transmit(&GeneralAuthenticate::mutual_authentication(&token)?)?;
        if !response.is_success() {
            return Err(authentication_error(password, response.status()));
        }

        let data = AuthenticationData::parse(PaceStep::MutualAuthentication, response.payload())?;
        if self.parameters.config.verify_chip_token {
            let expected = suite.authentication_token(keys.mac_key(), &oid, &terminal_public)?;
            let card_token = data.require(tags::TOKEN_CARD)?;
            if !bool::from(expected[..].ct_eq(card_token)) {
                return Err(Error::ChipAuthenticationFailed);
            }
        }
        let car = data.get(tags::CAR).map(Bytes::copy_from_slice);
        let previous_car = data.get(tags::CAR_PREVIOUS).map(Bytes::copy_from_slice);

        self.transition(HandshakeState::MutuallyAuthenticated);

        Ok(PaceOutput {
            secure_messaging: SecureMessaging::with_zero_counter(keys)?,
            car,
            previous_car,
        })
    }

    fn ephemeral_key<C: GenericMappingCurve>(
        &mut self,
        generator: &ProjectivePoint<C>,
    ) -> Result<EphemeralKey<C>> {
        if self.preset_secrets.is_empty() {
            return Ok(EphemeralKey::generate(generator));
        }
        let secret = self.preset_secrets.remove(0);
        EphemeralKey::from_secret(&secret, generator)
    }

    fn general_authenticate(
        &mut self,
        step: PaceStep,
        command: GeneralAuthenticate,
    ) -> Result<AuthenticationData> {
        let response = self.transmit(&command)?;
        if !response.is_success() {
            return Err(Error::StepFailed {
                step,
                status: response.status(),
            });
        }
        AuthenticationData::parse(step, response.payload())
    }

    fn transmit(&mut self, command: &impl ApduCommand) -> Result<Response> {
        Ok(self.transport.transmit(&command.to_command())?)
    }

    fn transition(&mut self, next: HandshakeState) {
        debug!(from = %self.state, to = %next, "PACE state transition");
        self.state = next;
    }
}

/// Classify a failed mutual authentication
fn authentication_error(kind: PasswordKind, status: StatusWord) -> Error {
    match status.retry_counter() {
        Some(1) if kind == PasswordKind::Pin => Error::PasswordSuspended { kind },
        Some(retries) => Error::WrongPassword {
            kind,
            retries_left: Some(retries),
        },
        None if status == common::AUTHENTICATION_BLOCKED
            || status == common::REFERENCE_DATA_INVALIDATED =>
        {
            Error::PasswordBlocked { kind }
        }
        None => Error::WrongPassword {
            kind,
            retries_left: None,
        },
    }
}
