//! Elliptic curve operations for the PACE generic mapping

use elliptic_curve::{
    AffinePoint, CurveArithmetic, FieldBytes, FieldBytesSize, Group, PrimeField, ProjectivePoint,
    Scalar, SecretKey,
    group::Curve as _,
    point::AffineCoordinates,
    sec1::{EncodedPoint, FromEncodedPoint, ModulusSize, ToEncodedPoint},
};

use crate::{Error, Result};

/// Curves usable with the generic mapping
///
/// Implemented for every RustCrypto curve with group arithmetic and SEC1
/// point encoding.
pub(crate) trait GenericMappingCurve: CurveArithmetic {
    /// Decode an uncompressed SEC1 point, rejecting points off the curve
    fn decode_point(bytes: &[u8]) -> Result<AffinePoint<Self>>;

    /// Uncompressed SEC1 encoding `04 || X || Y`
    fn encode_point(point: &AffinePoint<Self>) -> Vec<u8>;

    /// Big endian X coordinate, full field width
    fn x_coordinate(point: &AffinePoint<Self>) -> Vec<u8>;

    /// Interpret a decrypted nonce as a scalar
    fn nonce_scalar(nonce: &[u8]) -> Result<Scalar<Self>>;
}

impl<C> GenericMappingCurve for C
where
    C: CurveArithmetic,
    AffinePoint<C>: FromEncodedPoint<C> + ToEncodedPoint<C>,
    FieldBytesSize<C>: ModulusSize,
{
    fn decode_point(bytes: &[u8]) -> Result<AffinePoint<Self>> {
        if bytes.first() != Some(&0x04) {
            return Err(Error::InvalidPoint);
        }
        let encoded = EncodedPoint::<C>::from_bytes(bytes).map_err(|_| Error::InvalidPoint)?;
        Option::from(AffinePoint::<C>::from_encoded_point(&encoded)).ok_or(Error::InvalidPoint)
    }

    fn encode_point(point: &AffinePoint<Self>) -> Vec<u8> {
        point.to_encoded_point(false).as_bytes().to_vec()
    }

    fn x_coordinate(point: &AffinePoint<Self>) -> Vec<u8> {
        point.x().to_vec()
    }

    fn nonce_scalar(nonce: &[u8]) -> Result<Scalar<Self>> {
        let mut repr = FieldBytes::<C>::default();
        if nonce.len() > repr.len() {
            return Err(Error::Crypto("nonce longer than the group order"));
        }
        let offset = repr.len() - nonce.len();
        repr[offset..].copy_from_slice(nonce);

        Option::from(Scalar::<C>::from_repr(repr))
            .ok_or(Error::Crypto("nonce is not a valid scalar"))
    }
}

/// Ephemeral key pair over an arbitrary generator
///
/// The secret scalar is wiped when the key is dropped.
pub(crate) struct EphemeralKey<C: CurveArithmetic> {
    secret: SecretKey<C>,
    public: AffinePoint<C>,
}

impl<C: GenericMappingCurve> EphemeralKey<C> {
    /// Generate a fresh key pair with public key `secret * generator`
    pub(crate) fn generate(generator: &ProjectivePoint<C>) -> Self {
        let secret = SecretKey::<C>::random(&mut rand_v8::thread_rng());
        let public = (*generator * *secret.to_nonzero_scalar()).to_affine();
        Self { secret, public }
    }

    /// Key pair from a fixed big endian secret scalar
    pub(crate) fn from_secret(secret: &[u8], generator: &ProjectivePoint<C>) -> Result<Self> {
        let secret = SecretKey::<C>::from_slice(secret)
            .map_err(|_| Error::Crypto("invalid ephemeral secret"))?;
        let public = (*generator * *secret.to_nonzero_scalar()).to_affine();
        Ok(Self { secret, public })
    }

    pub(crate) const fn public(&self) -> &AffinePoint<C> {
        &self.public
    }

    /// Uncompressed encoding of the public key
    pub(crate) fn public_bytes(&self) -> Vec<u8> {
        C::encode_point(&self.public)
    }

    /// Diffie-Hellman with the peer's public point
    pub(crate) fn agree(&self, peer: &AffinePoint<C>) -> Result<AffinePoint<C>> {
        let shared = ProjectivePoint::<C>::from(*peer) * *self.secret.to_nonzero_scalar();
        if bool::from(shared.is_identity()) {
            return Err(Error::InvalidPoint);
        }
        Ok(shared.to_affine())
    }
}

/// Generic mapping `G' = s * G + H`
pub(crate) fn map_generator<C: GenericMappingCurve>(
    nonce: &Scalar<C>,
    shared: &AffinePoint<C>,
) -> Result<ProjectivePoint<C>> {
    let mapped = ProjectivePoint::<C>::generator() * *nonce + ProjectivePoint::<C>::from(*shared);
    if bool::from(mapped.is_identity()) {
        return Err(Error::InvalidPoint);
    }
    Ok(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use bp256::r1::BrainpoolP256r1;
    use p256::NistP256;
    use p384::NistP384;

    fn mapped_agreement<C: GenericMappingCurve>() {
        let generator = ProjectivePoint::<C>::generator();
        let terminal = EphemeralKey::<C>::generate(&generator);
        let card = EphemeralKey::<C>::generate(&generator);

        let h_terminal = terminal.agree(card.public()).unwrap();
        let h_card = card.agree(terminal.public()).unwrap();
        assert_eq!(C::encode_point(&h_terminal), C::encode_point(&h_card));

        let nonce = C::nonce_scalar(&hex!("3f00c4d39d153f2b2a214a078d899b22")).unwrap();
        let mapped = map_generator::<C>(&nonce, &h_terminal).unwrap();

        let terminal = EphemeralKey::<C>::generate(&mapped);
        let card = EphemeralKey::<C>::generate(&mapped);
        let decoded = C::decode_point(&card.public_bytes()).unwrap();
        assert_eq!(
            C::x_coordinate(&terminal.agree(&decoded).unwrap()),
            C::x_coordinate(&card.agree(terminal.public()).unwrap())
        );
    }

    #[test]
    fn test_mapped_agreement_p256() {
        mapped_agreement::<NistP256>();
    }

    #[test]
    fn test_mapped_agreement_p384() {
        mapped_agreement::<NistP384>();
    }

    #[test]
    fn test_mapped_agreement_brainpool_p256() {
        mapped_agreement::<BrainpoolP256r1>();
    }

    #[test]
    fn test_point_encoding() {
        let key = EphemeralKey::<NistP256>::generate(&ProjectivePoint::<NistP256>::generator());
        let encoded = key.public_bytes();
        assert_eq!(encoded.len(), 65);
        assert_eq!(encoded[0], 0x04);
        assert_eq!(NistP256::x_coordinate(key.public()).len(), 32);
        assert_eq!(&NistP256::x_coordinate(key.public())[..], &encoded[1..33]);
    }

    #[test]
    fn test_decode_rejects_invalid_points() {
        let key = EphemeralKey::<NistP256>::generate(&ProjectivePoint::<NistP256>::generator());
        let mut encoded = key.public_bytes();

        // Compressed form
        let compressed = key.public().to_encoded_point(true);
        assert!(matches!(
            NistP256::decode_point(compressed.as_bytes()),
            Err(Error::InvalidPoint)
        ));

        // Truncated
        assert!(NistP256::decode_point(&encoded[..64]).is_err());

        // Off the curve
        encoded[64] ^= 0x01;
        assert!(matches!(
            NistP256::decode_point(&encoded),
            Err(Error::InvalidPoint)
        ));
    }

    #[test]
    fn test_nonce_scalar_padding() {
        let scalar = NistP256::nonce_scalar(&hex!("01")).unwrap();
        assert_eq!(scalar, Scalar::<NistP256>::from(1u64));
        assert!(NistP256::nonce_scalar(&[0xFF; 33]).is_err());
    }
}
