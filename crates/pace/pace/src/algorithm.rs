//! PACE algorithm identifiers and standardized domain parameters
//!
//! Algorithms are identified by object identifiers under
//! `id-PACE` (`0.4.0.127.0.7.2.2.4`). The last two arcs select the mapping and
//! the symmetric cipher, e.g. `id-PACE-ECDH-GM-AES-CBC-CMAC-128` is
//! `0.4.0.127.0.7.2.2.4.2.2`.

use std::{fmt, str::FromStr};

use crate::chat::PaceChat;
use crate::config::PaceConfig;
use crate::crypto::CipherSuite;
use crate::{Error, Result};

/// DER content bytes of `id-PACE`
pub const ID_PACE: [u8; 8] = [0x04, 0x00, 0x7F, 0x00, 0x07, 0x02, 0x02, 0x04];

/// Mapping of the nonce onto new domain parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum Mapping {
    /// Generic mapping over a MODP group
    #[display("DH-GM")]
    DhGeneric,
    /// Generic mapping over an elliptic curve
    #[display("ECDH-GM")]
    EcdhGeneric,
}

impl Mapping {
    const fn arc(&self) -> u8 {
        match self {
            Self::DhGeneric => 0x01,
            Self::EcdhGeneric => 0x02,
        }
    }
}

/// A PACE protocol variant: mapping plus symmetric cipher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PaceAlgorithm {
    mapping: Mapping,
    cipher: CipherSuite,
}

impl PaceAlgorithm {
    /// `id-PACE-ECDH-GM-3DES`
    pub const ECDH_GM_3DES: Self = Self::new(Mapping::EcdhGeneric, CipherSuite::Des);
    /// `id-PACE-ECDH-GM-AES-CBC-CMAC-128`
    pub const ECDH_GM_AES_128: Self = Self::new(Mapping::EcdhGeneric, CipherSuite::Aes128);
    /// `id-PACE-ECDH-GM-AES-CBC-CMAC-192`
    pub const ECDH_GM_AES_192: Self = Self::new(Mapping::EcdhGeneric, CipherSuite::Aes192);
    /// `id-PACE-ECDH-GM-AES-CBC-CMAC-256`
    pub const ECDH_GM_AES_256: Self = Self::new(Mapping::EcdhGeneric, CipherSuite::Aes256);

    /// Combine a mapping with a cipher
    pub const fn new(mapping: Mapping, cipher: CipherSuite) -> Self {
        Self { mapping, cipher }
    }

    /// Nonce mapping
    pub const fn mapping(&self) -> Mapping {
        self.mapping
    }

    /// Symmetric cipher used for the nonce and secure messaging
    pub const fn cipher(&self) -> CipherSuite {
        self.cipher
    }

    /// Session key length in bits
    pub const fn key_length_bits(&self) -> usize {
        self.cipher.key_length() * 8
    }

    /// DER content bytes of the algorithm OID
    pub const fn oid(&self) -> [u8; 10] {
        let mut oid = [0u8; 10];
        let mut i = 0;
        while i < ID_PACE.len() {
            oid[i] = ID_PACE[i];
            i += 1;
        }
        oid[8] = self.mapping.arc();
        oid[9] = self.cipher.oid_arc();
        oid
    }

    /// Parse the DER content bytes of a PACE OID, as found in a `PACEInfo`
    pub fn from_oid(oid: &[u8]) -> Result<Self> {
        let unsupported = || Error::UnsupportedAlgorithm(hex::encode(oid));

        let [prefix @ .., mapping, cipher] = oid else {
            return Err(unsupported());
        };
        if prefix != ID_PACE {
            return Err(unsupported());
        }

        let mapping = match mapping {
            0x01 => Mapping::DhGeneric,
            0x02 => Mapping::EcdhGeneric,
            // Integrated and chip authentication mappings
            _ => return Err(unsupported()),
        };
        let cipher = CipherSuite::from_oid_arc(*cipher).ok_or_else(unsupported)?;

        Ok(Self::new(mapping, cipher))
    }
}

impl fmt::Display for PaceAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cipher {
            CipherSuite::Des => write!(f, "id-PACE-{}-3DES", self.mapping),
            aes => write!(
                f,
                "id-PACE-{}-AES-CBC-CMAC-{}",
                self.mapping,
                aes.key_length() * 8
            ),
        }
    }
}

impl FromStr for PaceAlgorithm {
    type Err = Error;

    /// Parse short names such as `ecdh-gm-aes-128` or `ecdh-gm-3des`
    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        let (mapping, cipher) = if let Some(rest) = lower.strip_prefix("ecdh-gm-") {
            (Mapping::EcdhGeneric, rest)
        } else if let Some(rest) = lower.strip_prefix("dh-gm-") {
            (Mapping::DhGeneric, rest)
        } else {
            return Err(Error::UnsupportedAlgorithm(s.to_string()));
        };

        let cipher = match cipher {
            "3des" => CipherSuite::Des,
            "aes-128" => CipherSuite::Aes128,
            "aes-192" => CipherSuite::Aes192,
            "aes-256" => CipherSuite::Aes256,
            _ => return Err(Error::UnsupportedAlgorithm(s.to_string())),
        };

        Ok(Self::new(mapping, cipher))
    }
}

/// Curves the arithmetic backend implements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Curve {
    P256,
    P384,
    P521,
    BrainpoolP256r1,
    BrainpoolP384r1,
}

/// Standardized domain parameters, identified by their TR-03110 id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DomainParameters(u8);

impl DomainParameters {
    /// 1024-bit MODP group with 160-bit prime order subgroup
    pub const MODP_1024_160: Self = Self(0);
    /// 2048-bit MODP group with 224-bit prime order subgroup
    pub const MODP_2048_224: Self = Self(1);
    /// 2048-bit MODP group with 256-bit prime order subgroup
    pub const MODP_2048_256: Self = Self(2);
    /// NIST P-256 (secp256r1)
    pub const NIST_P256: Self = Self(12);
    /// BrainpoolP256r1
    pub const BRAINPOOL_P256R1: Self = Self(13);
    /// BrainpoolP320r1
    pub const BRAINPOOL_P320R1: Self = Self(14);
    /// NIST P-384 (secp384r1)
    pub const NIST_P384: Self = Self(15);
    /// BrainpoolP384r1
    pub const BRAINPOOL_P384R1: Self = Self(16);
    /// BrainpoolP512r1
    pub const BRAINPOOL_P512R1: Self = Self(17);
    /// NIST P-521 (secp521r1)
    pub const NIST_P521: Self = Self(18);

    /// Wrap a standardized domain parameter id
    pub const fn from_id(id: u8) -> Self {
        Self(id)
    }

    /// Standardized domain parameter id
    pub const fn id(&self) -> u8 {
        self.0
    }

    /// Whether the id names an elliptic curve rather than a MODP group
    pub const fn is_elliptic_curve(&self) -> bool {
        self.0 >= 8 && self.0 <= 18
    }

    pub(crate) const fn curve(&self) -> Result<Curve> {
        match self.0 {
            12 => Ok(Curve::P256),
            13 => Ok(Curve::BrainpoolP256r1),
            15 => Ok(Curve::P384),
            16 => Ok(Curve::BrainpoolP384r1),
            18 => Ok(Curve::P521),
            id => Err(Error::UnsupportedDomainParameters(id)),
        }
    }
}

impl Default for DomainParameters {
    fn default() -> Self {
        Self::NIST_P256
    }
}

/// Everything the handshake needs besides the password
#[derive(Debug, Clone)]
pub struct PaceParameters {
    /// Negotiated algorithm
    pub algorithm: PaceAlgorithm,
    /// Domain parameters the mapping starts from
    pub domain_parameters: DomainParameters,
    /// Optional authorization template sent with MSE Set AT
    pub chat: Option<PaceChat>,
    /// Handshake and channel behaviour
    pub config: PaceConfig,
}

impl PaceParameters {
    /// Create parameters with no CHAT and the default configuration
    pub fn new(algorithm: PaceAlgorithm, domain_parameters: DomainParameters) -> Self {
        Self {
            algorithm,
            domain_parameters,
            chat: None,
            config: PaceConfig::default(),
        }
    }

    /// Set the CHAT
    pub fn with_chat(mut self, chat: PaceChat) -> Self {
        self.chat = Some(chat);
        self
    }

    /// Set the configuration
    pub const fn with_config(mut self, config: PaceConfig) -> Self {
        self.config = config;
        self
    }
}
