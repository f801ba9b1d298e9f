//! Symmetric cipher suites for PACE and secure messaging
//!
//! PACE defines two families. 3DES channels use two-key triple DES in CBC mode
//! with a zero IV and the ISO/IEC 9797-1 algorithm 3 retail MAC. AES channels
//! use AES in CBC mode with an IV derived from the send sequence counter and
//! AES-CMAC truncated to eight bytes.

use std::fmt;

use aes::{Aes128, Aes192, Aes256};
use cbc_mac::{CbcMac, Mac};
use cipher::{
    BlockCipher, BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit,
    KeyIvInit, block_padding::NoPadding, generic_array::GenericArray,
};
use cmac::Cmac;
use des::{Des, TdesEde2};
use iso7816_tlv::ber::{Tag, Tlv, Value};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::pad;
use crate::{Error, Result};

/// Length of every secure messaging MAC and authentication token
pub const MAC_LENGTH: usize = 8;

/// KDF counter for the encryption key
pub(crate) const KDF_ENC: u32 = 1;
/// KDF counter for the MAC key
pub(crate) const KDF_MAC: u32 = 2;
/// KDF counter for the password key
pub(crate) const KDF_PASSWORD: u32 = 3;

/// Symmetric cipher negotiated for a PACE session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum CipherSuite {
    /// Two-key 3DES with retail MAC
    #[display("3DES")]
    Des,
    /// AES-128 with CMAC
    #[display("AES-128")]
    Aes128,
    /// AES-192 with CMAC
    #[display("AES-192")]
    Aes192,
    /// AES-256 with CMAC
    #[display("AES-256")]
    Aes256,
}

impl CipherSuite {
    /// Session key length in bytes
    pub const fn key_length(&self) -> usize {
        match self {
            Self::Des | Self::Aes128 => 16,
            Self::Aes192 => 24,
            Self::Aes256 => 32,
        }
    }

    /// Cipher block size in bytes, also the send sequence counter length
    pub const fn block_size(&self) -> usize {
        match self {
            Self::Des => 8,
            _ => 16,
        }
    }

    pub(crate) const fn oid_arc(&self) -> u8 {
        match self {
            Self::Des => 0x01,
            Self::Aes128 => 0x02,
            Self::Aes192 => 0x03,
            Self::Aes256 => 0x04,
        }
    }

    pub(crate) const fn from_oid_arc(arc: u8) -> Option<Self> {
        match arc {
            0x01 => Some(Self::Des),
            0x02 => Some(Self::Aes128),
            0x03 => Some(Self::Aes192),
            0x04 => Some(Self::Aes256),
            _ => None,
        }
    }

    /// Key derivation function: `H(seed || counter)` truncated to the key length
    ///
    /// SHA-1 serves 3DES and AES-128, SHA-256 the longer AES keys.
    pub fn kdf(&self, seed: &[u8], counter: u32) -> Zeroizing<Vec<u8>> {
        let mut key = match self {
            Self::Des | Self::Aes128 => {
                let mut hasher = Sha1::new();
                hasher.update(seed);
                hasher.update(counter.to_be_bytes());
                hasher.finalize().to_vec()
            }
            Self::Aes192 | Self::Aes256 => {
                let mut hasher = Sha256::new();
                hasher.update(seed);
                hasher.update(counter.to_be_bytes());
                hasher.finalize().to_vec()
            }
        };
        key.truncate(self.key_length());
        Zeroizing::new(key)
    }

    /// CBC encryption of block aligned data, no padding is added
    pub fn encrypt(&self, key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        self.check_aligned(data)?;
        match self {
            Self::Des => cbc_encrypt::<TdesEde2>(key, iv, data),
            Self::Aes128 => cbc_encrypt::<Aes128>(key, iv, data),
            Self::Aes192 => cbc_encrypt::<Aes192>(key, iv, data),
            Self::Aes256 => cbc_encrypt::<Aes256>(key, iv, data),
        }
    }

    /// CBC decryption of block aligned data, padding is left in place
    pub fn decrypt(&self, key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        self.check_aligned(data)?;
        match self {
            Self::Des => cbc_decrypt::<TdesEde2>(key, iv, data),
            Self::Aes128 => cbc_decrypt::<Aes128>(key, iv, data),
            Self::Aes192 => cbc_decrypt::<Aes192>(key, iv, data),
            Self::Aes256 => cbc_decrypt::<Aes256>(key, iv, data),
        }
    }

    /// Encrypt a single block with the raw block cipher
    pub fn encrypt_block(&self, key: &[u8], block: &[u8]) -> Result<Vec<u8>> {
        if block.len() != self.block_size() {
            return Err(Error::Crypto("block length mismatch"));
        }
        match self {
            Self::Des => ecb_encrypt_block::<TdesEde2>(key, block),
            Self::Aes128 => ecb_encrypt_block::<Aes128>(key, block),
            Self::Aes192 => ecb_encrypt_block::<Aes192>(key, block),
            Self::Aes256 => ecb_encrypt_block::<Aes256>(key, block),
        }
    }

    /// Eight byte MAC over `data`
    ///
    /// 3DES expects `data` to be padded already; CMAC handles any length.
    pub fn mac(&self, key: &[u8], data: &[u8]) -> Result<[u8; MAC_LENGTH]> {
        match self {
            Self::Des => {
                self.check_aligned(data)?;
                retail_mac(key, data)
            }
            Self::Aes128 => finish_mac(<Cmac<Aes128> as Mac>::new_from_slice(key), data),
            Self::Aes192 => finish_mac(<Cmac<Aes192> as Mac>::new_from_slice(key), data),
            Self::Aes256 => finish_mac(<Cmac<Aes256> as Mac>::new_from_slice(key), data),
        }
    }

    /// Authentication token over a public key data object
    ///
    /// The token is the MAC of `7F49 { 06 <algorithm OID>, 86 <point> }`. The
    /// retail MAC is computed over the padded template, CMAC over the
    /// template as is.
    pub fn authentication_token(
        &self,
        mac_key: &[u8],
        oid: &[u8],
        point: &[u8],
    ) -> Result<[u8; MAC_LENGTH]> {
        let template = Tlv::new(
            Tag::try_from("7F49")?,
            Value::Constructed(vec![
                Tlv::new(Tag::try_from(0x06u8)?, Value::Primitive(oid.to_vec()))?,
                Tlv::new(Tag::try_from(0x86u8)?, Value::Primitive(point.to_vec()))?,
            ]),
        )?
        .to_vec();

        match self {
            Self::Des => self.mac(mac_key, &pad(&template, self.block_size())),
            _ => self.mac(mac_key, &template),
        }
    }

    const fn check_aligned(&self, data: &[u8]) -> Result<()> {
        if data.len() % self.block_size() == 0 {
            Ok(())
        } else {
            Err(Error::Crypto("data is not block aligned"))
        }
    }
}

fn cbc_encrypt<C>(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    let encryptor = cbc::Encryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| Error::Crypto("invalid key or IV length"))?;
    Ok(encryptor.encrypt_padded_vec_mut::<NoPadding>(data))
}

fn cbc_decrypt<C>(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>>
where
    C: BlockDecryptMut + BlockCipher + KeyInit,
{
    let decryptor = cbc::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| Error::Crypto("invalid key or IV length"))?;
    decryptor
        .decrypt_padded_vec_mut::<NoPadding>(data)
        .map_err(|_| Error::Crypto("data is not block aligned"))
}

fn ecb_encrypt_block<C>(key: &[u8], block: &[u8]) -> Result<Vec<u8>>
where
    C: BlockEncrypt + KeyInit,
{
    let cipher = C::new_from_slice(key).map_err(|_| Error::Crypto("invalid key length"))?;
    let mut block = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut block);
    Ok(block.to_vec())
}

fn finish_mac<M: Mac, E>(mac: Result<M, E>, data: &[u8]) -> Result<[u8; MAC_LENGTH]> {
    let mut mac = mac.map_err(|_| Error::Crypto("invalid key length"))?;
    mac.update(data);
    Ok(truncate_mac(&mac.finalize().into_bytes()))
}

/// ISO/IEC 9797-1 MAC algorithm 3 with DES: CBC-MAC under K1, then
/// decrypt with K2 and encrypt with K1
fn retail_mac(key: &[u8], data: &[u8]) -> Result<[u8; MAC_LENGTH]> {
    if key.len() != 16 {
        return Err(Error::Crypto("invalid key length"));
    }
    let (k1, k2) = key.split_at(8);

    let mut block = GenericArray::clone_from_slice(&finish_mac(
        <CbcMac<Des> as Mac>::new_from_slice(k1),
        data,
    )?);

    let k1 = Des::new_from_slice(k1).map_err(|_| Error::Crypto("invalid key length"))?;
    let k2 = Des::new_from_slice(k2).map_err(|_| Error::Crypto("invalid key length"))?;
    k2.decrypt_block(&mut block);
    k1.encrypt_block(&mut block);

    Ok(truncate_mac(&block))
}

fn truncate_mac(full: &[u8]) -> [u8; MAC_LENGTH] {
    let mut mac = [0u8; MAC_LENGTH];
    mac.copy_from_slice(&full[..MAC_LENGTH]);
    mac
}

/// Session keys of an established channel, wiped on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    #[zeroize(skip)]
    suite: CipherSuite,
    enc: Vec<u8>,
    mac: Vec<u8>,
}

impl SessionKeys {
    /// Wrap existing keys, checking their length against the suite
    pub fn new(suite: CipherSuite, enc: &[u8], mac: &[u8]) -> Result<Self> {
        if enc.len() != suite.key_length() || mac.len() != suite.key_length() {
            return Err(Error::Crypto("session key length does not match cipher"));
        }
        Ok(Self {
            suite,
            enc: enc.to_vec(),
            mac: mac.to_vec(),
        })
    }

    /// Derive `K_enc` and `K_mac` from a shared secret
    pub fn derive(suite: CipherSuite, shared_secret: &[u8]) -> Self {
        let enc = suite.kdf(shared_secret, KDF_ENC);
        let mac = suite.kdf(shared_secret, KDF_MAC);
        Self {
            suite,
            enc: enc.to_vec(),
            mac: mac.to_vec(),
        }
    }

    /// Cipher suite the keys belong to
    pub const fn suite(&self) -> CipherSuite {
        self.suite
    }

    pub(crate) fn enc(&self) -> &[u8] {
        &self.enc
    }

    pub(crate) fn mac_key(&self) -> &[u8] {
        &self.mac
    }

    /// IV for one secure messaging exchange
    ///
    /// 3DES channels use a zero IV; AES channels encrypt the counter.
    pub(crate) fn iv(&self, ssc: &[u8]) -> Result<Vec<u8>> {
        match self.suite {
            CipherSuite::Des => Ok(vec![0u8; self.suite.block_size()]),
            _ => self.suite.encrypt_block(&self.enc, ssc),
        }
    }

    pub(crate) fn encrypt(&self, ssc: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        self.suite.encrypt(&self.enc, &self.iv(ssc)?, data)
    }

    pub(crate) fn decrypt(&self, ssc: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        self.suite.decrypt(&self.enc, &self.iv(ssc)?, data)
    }

    pub(crate) fn mac(&self, data: &[u8]) -> Result<[u8; MAC_LENGTH]> {
        self.suite.mac(&self.mac, data)
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeys")
            .field("suite", &self.suite)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    // The 70e6de5f679aee64 CMAC published for kmac 5de2939a... and SSC
    // 3de0c965... is not checked here: its message bytes are not published.
    #[test]
    fn test_cmac_rfc4493() {
        let mac = CipherSuite::Aes128
            .mac(
                &hex!("2b7e151628aed2a6abf7158809cf4f3c"),
                &hex!("6bc1bee22e409f96e93d7e117393172a"),
            )
            .unwrap();
        assert_eq!(mac, hex!("070a16b46b4d4144"));
    }

    #[test]
    fn test_ssc_derived_iv_encryption() {
        // NIST SP 800-38A F.1.1 and F.2.1
        let kenc = hex!("2b7e151628aed2a6abf7158809cf4f3c");
        let ssc = hex!("6bc1bee22e409f96e93d7e117393172a");
        let keys = SessionKeys::new(CipherSuite::Aes128, &kenc, &kenc).unwrap();
        assert_eq!(
            keys.iv(&ssc).unwrap(),
            hex!("3ad77bb40d7a3660a89ecaf32466ef97")
        );

        let encrypted = CipherSuite::Aes128
            .encrypt(&kenc, &hex!("000102030405060708090a0b0c0d0e0f"), &ssc)
            .unwrap();
        assert_eq!(encrypted, hex!("7649abac8119b246cee98e9b12e9197d"));

        let plain = pad(b"Master.File", 16);
        let encrypted = keys.encrypt(&ssc, &plain).unwrap();
        assert_eq!(
            encrypted,
            CipherSuite::Aes128
                .encrypt(&kenc, &hex!("3ad77bb40d7a3660a89ecaf32466ef97"), &plain)
                .unwrap()
        );
        assert_eq!(keys.decrypt(&ssc, &encrypted).unwrap(), plain);
    }

    #[test]
    fn test_master_file_known_answer() {
        let kenc = hex!("f1b0d6449cec48864c1efabb4957d64b");
        let ssc = hex!("3de0c9658f836888bd352dbf46462f60");
        let keys = SessionKeys::new(CipherSuite::Aes128, &kenc, &kenc).unwrap();

        let plain = pad(b"Master.File", 16);
        assert_eq!(plain, hex!("4d61737465722e46696c658000000000"));

        let encrypted = keys.encrypt(&ssc, &plain).unwrap();
        assert_eq!(encrypted, hex!("f5124ee2f53962e86e66a6d234827f0f"));
        assert_eq!(keys.decrypt(&ssc, &encrypted).unwrap(), plain);
    }

    #[test]
    fn test_password_key_and_nonce_decryption() {
        // ICAO 9303-11 worked example, MRZ password
        let seed = hex!("7e2d2a41c74ea0b38cd36f863939bfa8e9032aad");
        let k_pi = CipherSuite::Aes128.kdf(&seed, KDF_PASSWORD);
        assert_eq!(k_pi.as_slice(), hex!("89ded1b26624ec1e634c1989302849dd"));

        let nonce = CipherSuite::Aes128
            .decrypt(&k_pi, &[0u8; 16], &hex!("95A3A016522EE98D01E76CB6B98B42C3"))
            .unwrap();
        assert_eq!(nonce, hex!("3f00c4d39d153f2b2a214a078d899b22"));
    }

    #[test]
    fn test_session_key_derivation() {
        let secret = hex!("28768D20701247DAE81804C9E780EDE582A9996DB4A315020B2733197DB84925");
        let keys = SessionKeys::derive(CipherSuite::Aes128, &secret);
        assert_eq!(keys.enc(), hex!("f5f0e35c0d7161ee6724ee513a0d9a7f"));
        assert_eq!(keys.mac_key(), hex!("fe251c7858b356b24514b3bd5f4297d1"));
    }

    #[test]
    fn test_authentication_tokens() {
        // ICAO 9303-11 G.1, id-PACE-ECDH-GM-AES-CBC-CMAC-128 on brainpoolP256r1
        let secret = hex!("28768D20701247DAE81804C9E780EDE582A9996DB4A315020B2733197DB84925");
        let keys = SessionKeys::derive(CipherSuite::Aes128, &secret);
        let oid = hex!("04007F00070202040202");

        let card_public = hex!(
            "049E880F842905B8B3181F7AF7CAA9F0EFB743847F44A306D2D28C1D9EC65DF6DB
             7764B22277A2EDDC3C265A9F018F9CB852E111B768B326904B59A0193776F094"
        );
        let terminal_public = hex!(
            "042DB7A64C0355044EC9DF190514C625CBA2CEA48754887122F3A5EF0D5EDD301C
             3556F3B3B186DF10B857B58F6A7EB80F20BA5DC7BE1D43D9BF850149FBB36462"
        );

        let terminal_token = CipherSuite::Aes128
            .authentication_token(keys.mac_key(), &oid, &card_public)
            .unwrap();
        assert_eq!(terminal_token, hex!("C2B0BD78D94BA866"));

        let card_token = CipherSuite::Aes128
            .authentication_token(keys.mac_key(), &oid, &terminal_public)
            .unwrap();
        assert_eq!(card_token, hex!("3ABB9674BCE93C08"));
    }

    #[test]
    fn test_kdf_lengths() {
        assert_eq!(CipherSuite::Des.kdf(b"seed", KDF_ENC).len(), 16);
        assert_eq!(CipherSuite::Aes192.kdf(b"seed", KDF_ENC).len(), 24);
        assert_eq!(CipherSuite::Aes256.kdf(b"seed", KDF_MAC).len(), 32);
    }

    #[test]
    fn test_des_round_trip_with_zero_iv() {
        let keys = SessionKeys::new(
            CipherSuite::Des,
            &hex!("979EC13B1CBFE9DCD01AB0FED307EAE5"),
            &hex!("F1CB1F1FB5ADF208806B89DC579DC1F8"),
        )
        .unwrap();
        assert_eq!(keys.iv(&hex!("887022120C06C227")).unwrap(), [0u8; 8]);

        let plain = pad(&hex!("011E"), 8);
        let encrypted = keys.encrypt(&hex!("887022120C06C227"), &plain).unwrap();
        assert_eq!(encrypted, hex!("6375432908C044F6"));
    }

    #[test]
    fn test_misaligned_input_rejected() {
        assert!(matches!(
            CipherSuite::Aes128.encrypt(&[0u8; 16], &[0u8; 16], &[0u8; 15]),
            Err(Error::Crypto(_))
        ));
        assert!(matches!(
            CipherSuite::Des.mac(&[0u8; 16], &[0u8; 9]),
            Err(Error::Crypto(_))
        ));
        assert!(SessionKeys::new(CipherSuite::Aes256, &[0u8; 16], &[0u8; 16]).is_err());
    }

    #[test]
    fn test_debug_redacts_keys() {
        let keys = SessionKeys::new(CipherSuite::Aes128, &[0xAB; 16], &[0xCD; 16]).unwrap();
        let debug = format!("{keys:?}");
        assert!(debug.contains("Aes128"));
        assert!(!debug.contains("171"));
        assert!(!debug.contains("205"));
    }
}
