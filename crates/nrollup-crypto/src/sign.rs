//! Signing capability for transfer authorisation.
//!
//! Batch construction only needs `sign(hash) -> signature` from the sender and
//! `verify(pubkey, hash, signature) -> bool` from the operator; which scheme an
//! integrator plugs in is their choice as long as it is deterministic and the
//! public key is a pair of field elements.
//!
//! The reference implementation is Schnorr over Grumpkin. Grumpkin's base field
//! is the BN254 scalar field, so a public key is exactly two [`FieldElement`]s.
//!
//! ```text
//! k = BLAKE3(domain || sk || m) mod n          (deterministic nonce)
//! R = k·G
//! e = Poseidon(R.x, R.y, pk.x, pk.y, m) mod n
//! s = k + e·sk                                 (split into two 128-bit limbs)
//! verify: s·G == R + e·pk
//! ```

use ark_ec::{AffineRepr, CurveGroup, PrimeGroup};
use ark_ff::{BigInt, BigInteger, PrimeField, Zero};
use ark_grumpkin::{Affine, Fr as GrumpkinScalar, Projective};
use blake3::Hasher;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{CircomPoseidon, CryptoError, FieldElement, HashScheme};

const NONCE_DOMAIN: &[u8] = b"nrollup.schnorr.nonce.v1";
const KEYGEN_DOMAIN: &[u8] = b"nrollup.schnorr.keygen.v1";

/// Account public key: affine coordinates of a curve point.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey {
    /// x-coordinate.
    pub x: FieldElement,
    /// y-coordinate.
    pub y: FieldElement,
}

impl PublicKey {
    /// Construct from coordinates (no curve check).
    #[inline]
    #[must_use]
    pub const fn new(x: FieldElement, y: FieldElement) -> Self {
        Self { x, y }
    }

    /// The `(0, 0)` key carried by the reserved empty leaf.
    #[inline]
    #[must_use]
    pub fn zero() -> Self {
        Self::default()
    }

    /// Coordinates in leaf order `[x, y]`.
    #[inline]
    #[must_use]
    pub const fn to_array(&self) -> [FieldElement; 2] {
        [self.x, self.y]
    }

    fn to_point(self) -> Result<Affine, CryptoError> {
        let p = Affine::new_unchecked(self.x.into_fr(), self.y.into_fr());
        if p.is_zero() || !p.is_on_curve() || !p.is_in_correct_subgroup_assuming_on_curve() {
            return Err(CryptoError::InvalidPublicKey);
        }
        Ok(p)
    }
}

/// Schnorr signature with the response scalar split into 128-bit limbs so that
/// every component is a canonical field element.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Commitment point x-coordinate.
    pub r_x: FieldElement,
    /// Commitment point y-coordinate.
    pub r_y: FieldElement,
    /// Low 128 bits of the response scalar.
    pub s_lo: FieldElement,
    /// High 128 bits of the response scalar.
    pub s_hi: FieldElement,
}

impl Signature {
    /// Components in witness order `[r_x, r_y, s_lo, s_hi]`.
    #[must_use]
    pub const fn to_array(&self) -> [FieldElement; 4] {
        [self.r_x, self.r_y, self.s_lo, self.s_hi]
    }

    fn response(&self) -> Option<GrumpkinScalar> {
        let lo = self.s_lo.to_u128()?;
        let hi = self.s_hi.to_u128()?;
        let limbs = [lo as u64, (lo >> 64) as u64, hi as u64, (hi >> 64) as u64];
        GrumpkinScalar::from_bigint(BigInt::new(limbs))
    }
}

/// Produces signatures over a single field element (a leaf hash).
pub trait Signer {
    /// Public key the signatures verify against.
    fn public_key(&self) -> PublicKey;

    /// Sign `message`.
    fn sign(&self, message: FieldElement) -> Result<Signature, CryptoError>;
}

/// Checks signatures produced by a matching [`Signer`].
pub trait SignatureVerifier: Send + Sync {
    /// `true` iff `signature` is valid for `message` under `public_key`.
    fn verify(&self, public_key: &PublicKey, message: FieldElement, signature: &Signature) -> bool;
}

/// Grumpkin Schnorr key pair.
#[derive(Clone)]
pub struct SchnorrSigner {
    secret: GrumpkinScalar,
    public: PublicKey,
}

impl fmt::Debug for SchnorrSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchnorrSigner")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

impl SchnorrSigner {
    /// Build from a secret scalar; zero is rejected.
    pub fn from_scalar(secret: GrumpkinScalar) -> Result<Self, CryptoError> {
        if secret.is_zero() {
            return Err(CryptoError::InvalidSecretKey("zero scalar".into()));
        }
        let pk = (Projective::generator() * secret).into_affine();
        Ok(Self {
            secret,
            public: PublicKey::new(FieldElement::from_fr(pk.x), FieldElement::from_fr(pk.y)),
        })
    }

    /// Derive a key deterministically from arbitrary seed bytes.
    pub fn from_seed(seed: &[u8]) -> Result<Self, CryptoError> {
        let mut h = Hasher::new();
        h.update(KEYGEN_DOMAIN);
        h.update(&(seed.len() as u64).to_le_bytes());
        h.update(seed);
        let mut wide = [0u8; 64];
        h.finalize_xof().fill(&mut wide);
        Self::from_scalar(GrumpkinScalar::from_le_bytes_mod_order(&wide))
    }

    /// Fresh key from an RNG.
    pub fn generate<R: rand::RngCore + ?Sized>(rng: &mut R) -> Result<Self, CryptoError> {
        let mut wide = [0u8; 64];
        rng.fill_bytes(&mut wide);
        Self::from_scalar(GrumpkinScalar::from_le_bytes_mod_order(&wide))
    }

    /// Parse a big-endian hex secret (canonical scalar required).
    pub fn from_secret_hex(s: &str) -> Result<Self, CryptoError> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let raw = hex::decode(digits).map_err(|e| CryptoError::InvalidSecretKey(e.to_string()))?;
        if raw.len() != 32 {
            return Err(CryptoError::InvalidSecretKey(format!(
                "expected 32 bytes, got {}",
                raw.len()
            )));
        }
        let mut limbs = [0u64; 4];
        for (i, chunk) in raw.chunks_exact(8).enumerate() {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            limbs[3 - i] = u64::from_be_bytes(word);
        }
        let secret = GrumpkinScalar::from_bigint(BigInt::new(limbs))
            .ok_or_else(|| CryptoError::InvalidSecretKey("scalar out of range".into()))?;
        Self::from_scalar(secret)
    }

    /// Big-endian hex of the secret scalar.
    #[must_use]
    pub fn secret_hex(&self) -> String {
        format!("0x{}", hex::encode(self.secret.into_bigint().to_bytes_be()))
    }

    fn nonce(&self, message: FieldElement) -> GrumpkinScalar {
        let mut h = Hasher::new();
        h.update(NONCE_DOMAIN);
        h.update(&self.secret.into_bigint().to_bytes_le());
        h.update(&message.to_be_bytes());
        let mut wide = [0u8; 64];
        h.finalize_xof().fill(&mut wide);
        GrumpkinScalar::from_le_bytes_mod_order(&wide)
    }
}

impl Signer for SchnorrSigner {
    fn public_key(&self) -> PublicKey {
        self.public
    }

    fn sign(&self, message: FieldElement) -> Result<Signature, CryptoError> {
        let mut k = self.nonce(message);
        if k.is_zero() {
            k = GrumpkinScalar::from(1u64);
        }
        let r = (Projective::generator() * k).into_affine();
        let r_x = FieldElement::from_fr(r.x);
        let r_y = FieldElement::from_fr(r.y);
        let e = challenge(r_x, r_y, &self.public, message)?;
        let s = k + e * self.secret;

        let le = s.into_bigint().to_bytes_le();
        let mut lo = [0u8; 16];
        let mut hi = [0u8; 16];
        lo.copy_from_slice(&le[..16]);
        hi.copy_from_slice(&le[16..32]);
        Ok(Signature {
            r_x,
            r_y,
            s_lo: FieldElement::from_u128(u128::from_le_bytes(lo)),
            s_hi: FieldElement::from_u128(u128::from_le_bytes(hi)),
        })
    }
}

/// Verifier for [`SchnorrSigner`] signatures.
#[derive(Clone, Copy, Debug, Default)]
pub struct SchnorrVerifier;

impl SignatureVerifier for SchnorrVerifier {
    fn verify(&self, public_key: &PublicKey, message: FieldElement, signature: &Signature) -> bool {
        let Ok(pk) = public_key.to_point() else {
            return false;
        };
        let r = Affine::new_unchecked(signature.r_x.into_fr(), signature.r_y.into_fr());
        if r.is_zero() || !r.is_on_curve() {
            return false;
        }
        let Some(s) = signature.response() else {
            return false;
        };
        let Ok(e) = challenge(signature.r_x, signature.r_y, public_key, message) else {
            return false;
        };
        Projective::generator() * s == r.into_group() + pk.into_group() * e
    }
}

fn challenge(
    r_x: FieldElement,
    r_y: FieldElement,
    pk: &PublicKey,
    message: FieldElement,
) -> Result<GrumpkinScalar, CryptoError> {
    let e = CircomPoseidon.hash(&[r_x, r_y, pk.x, pk.y, message])?;
    Ok(GrumpkinScalar::from_be_bytes_mod_order(&e.to_be_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let signer = SchnorrSigner::from_seed(b"alice").unwrap();
        let msg = FieldElement::from_u64(42);
        let sig = signer.sign(msg).unwrap();
        assert!(SchnorrVerifier.verify(&signer.public_key(), msg, &sig));
        // Deterministic nonce: identical signatures for identical inputs.
        assert_eq!(sig, signer.sign(msg).unwrap());
    }

    #[test]
    fn rejects_wrong_message_key_or_tamper() {
        let alice = SchnorrSigner::from_seed(b"alice").unwrap();
        let bob = SchnorrSigner::from_seed(b"bob").unwrap();
        let msg = FieldElement::from_u64(7);
        let sig = alice.sign(msg).unwrap();

        assert!(!SchnorrVerifier.verify(&alice.public_key(), FieldElement::from_u64(8), &sig));
        assert!(!SchnorrVerifier.verify(&bob.public_key(), msg, &sig));
        assert!(!SchnorrVerifier.verify(&PublicKey::zero(), msg, &sig));

        let mut bad = sig;
        bad.s_lo = FieldElement::from_u64(1);
        assert!(!SchnorrVerifier.verify(&alice.public_key(), msg, &bad));
    }

    #[test]
    fn secret_hex_roundtrip() {
        let a = SchnorrSigner::from_seed(b"carol").unwrap();
        let b = SchnorrSigner::from_secret_hex(&a.secret_hex()).unwrap();
        assert_eq!(a.public_key(), b.public_key());
        assert!(SchnorrSigner::from_secret_hex("0x00").is_err());
    }
}
