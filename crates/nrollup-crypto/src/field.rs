//! Canonical field-element codec.
//!
//! Every balance, nonce, public-key coordinate, and tree node is an element of
//! the BN254 scalar field. The interchange format is a fixed-width big-endian
//! hex string (`0x` + 64 digits), which is what the circuit's `Prover.toml` and
//! the ledger call arguments carry.
//!
//! Decoding never reduces silently: a value at or above the modulus is an
//! [`CryptoError::Encoding`]. Balance arithmetic happens in the integer domain
//! through [`FieldElement::checked_add`] / [`FieldElement::checked_sub`], so a
//! wrap past the modulus is reported instead of folded back into the field.

use ark_bn254::Fr;
use ark_ff::{BigInt, BigInteger, PrimeField, Zero};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::CryptoError;

/// Width of the big-endian byte encoding.
pub const FIELD_BYTES: usize = 32;

/// Width of the hex encoding, excluding the `0x` prefix.
pub const FIELD_HEX_DIGITS: usize = 2 * FIELD_BYTES;

/// Element of the BN254 scalar field, always in canonical (reduced) form.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct FieldElement(Fr);

impl FieldElement {
    /// The additive identity.
    #[inline]
    #[must_use]
    pub fn zero() -> Self {
        Self(Fr::zero())
    }

    /// Returns `true` for the additive identity.
    #[inline]
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Embed a `u64` (always canonical).
    #[inline]
    #[must_use]
    pub fn from_u64(x: u64) -> Self {
        Self(Fr::from(x))
    }

    /// Embed a `u128` (always canonical).
    #[inline]
    #[must_use]
    pub fn from_u128(x: u128) -> Self {
        Self(Fr::from(x))
    }

    /// Wrap an arkworks field element.
    #[inline]
    #[must_use]
    pub const fn from_fr(x: Fr) -> Self {
        Self(x)
    }

    /// Borrow the arkworks representation.
    #[inline]
    #[must_use]
    pub const fn as_fr(&self) -> &Fr {
        &self.0
    }

    /// Unwrap into the arkworks representation.
    #[inline]
    #[must_use]
    pub const fn into_fr(self) -> Fr {
        self.0
    }

    /// Decode 32 big-endian bytes, rejecting values `>=` the modulus.
    pub fn from_be_bytes(bytes: &[u8; FIELD_BYTES]) -> Result<Self, CryptoError> {
        let mut limbs = [0u64; 4];
        for (i, chunk) in bytes.chunks_exact(8).enumerate() {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            limbs[3 - i] = u64::from_be_bytes(word);
        }
        Fr::from_bigint(BigInt::new(limbs))
            .map(Self)
            .ok_or_else(|| CryptoError::Encoding(format!("0x{} >= modulus", hex::encode(bytes))))
    }

    /// Big-endian 32-byte encoding.
    #[must_use]
    pub fn to_be_bytes(&self) -> [u8; FIELD_BYTES] {
        let mut out = [0u8; FIELD_BYTES];
        let limbs = self.0.into_bigint().0;
        for (i, limb) in limbs.iter().rev().enumerate() {
            out[i * 8..(i + 1) * 8].copy_from_slice(&limb.to_be_bytes());
        }
        out
    }

    /// Fixed-width hex: `0x` followed by exactly 64 lowercase digits.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_be_bytes()))
    }

    /// Parse hex with an optional `0x` prefix and at most 64 digits.
    ///
    /// Shorter inputs are left-padded with zeros.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if digits.is_empty() {
            return Err(CryptoError::Encoding(format!("empty hex literal {s:?}")));
        }
        if digits.len() > FIELD_HEX_DIGITS {
            return Err(CryptoError::Encoding(format!(
                "hex literal has {} digits (max {FIELD_HEX_DIGITS})",
                digits.len()
            )));
        }
        let padded = format!("{digits:0>width$}", width = FIELD_HEX_DIGITS);
        let mut bytes = [0u8; FIELD_BYTES];
        hex::decode_to_slice(&padded, &mut bytes)
            .map_err(|e| CryptoError::Encoding(format!("{s:?}: {e}")))?;
        Self::from_be_bytes(&bytes)
    }

    /// Returns the value as `u128` if it fits.
    #[must_use]
    pub fn to_u128(&self) -> Option<u128> {
        let limbs = self.0.into_bigint().0;
        if limbs[2] != 0 || limbs[3] != 0 {
            return None;
        }
        Some(u128::from(limbs[0]) | (u128::from(limbs[1]) << 64))
    }

    /// Integer-domain addition; `None` if the sum reaches the modulus.
    #[must_use]
    pub fn checked_add(&self, rhs: &Self) -> Option<Self> {
        let mut acc = self.0.into_bigint();
        let carry = acc.add_with_carry(&rhs.0.into_bigint());
        if carry {
            return None;
        }
        Fr::from_bigint(acc).map(Self)
    }

    /// Integer-domain subtraction; `None` if `rhs > self`.
    #[must_use]
    pub fn checked_sub(&self, rhs: &Self) -> Option<Self> {
        let mut acc = self.0.into_bigint();
        let borrow = acc.sub_with_borrow(&rhs.0.into_bigint());
        if borrow {
            return None;
        }
        Fr::from_bigint(acc).map(Self)
    }

    /// `self + 1` in the integer domain.
    #[must_use]
    pub fn checked_increment(&self) -> Option<Self> {
        self.checked_add(&Self::from_u64(1))
    }

    /// Integer comparison of canonical representatives.
    #[must_use]
    pub fn gt(&self, rhs: &Self) -> bool {
        self.0.into_bigint() > rhs.0.into_bigint()
    }
}

impl From<u64> for FieldElement {
    fn from(x: u64) -> Self {
        Self::from_u64(x)
    }
}

impl From<Fr> for FieldElement {
    fn from(x: Fr) -> Self {
        Self(x)
    }
}

impl From<FieldElement> for Fr {
    fn from(x: FieldElement) -> Self {
        x.0
    }
}

impl FromStr for FieldElement {
    type Err = CryptoError;

    /// Accepts `0x`-prefixed hex or a decimal literal of at most 128 bits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with("0x") || s.starts_with("0X") {
            return Self::from_hex(s);
        }
        s.parse::<u128>()
            .map(Self::from_u128)
            .map_err(|e| CryptoError::Encoding(format!("{s:?}: {e} (use 0x-hex above 128 bits)")))
    }
}

impl fmt::Display for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldElement({})", self.to_hex())
    }
}

impl Serialize for FieldElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for FieldElement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(FieldElementVisitor)
    }
}

struct FieldElementVisitor;

impl Visitor<'_> for FieldElementVisitor {
    type Value = FieldElement;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a hex/decimal string or an unsigned integer")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(FieldElement::from_u64(v))
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> Result<Self::Value, E> {
        Ok(FieldElement::from_u128(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        u64::try_from(v)
            .map(FieldElement::from_u64)
            .map_err(|_| E::custom(format!("negative field element {v}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_is_fixed_width() {
        let x = FieldElement::from_u64(255);
        let h = x.to_hex();
        assert_eq!(h.len(), 2 + FIELD_HEX_DIGITS);
        assert!(h.ends_with("ff"));
        assert_eq!(FieldElement::from_hex(&h).unwrap(), x);
        assert_eq!(FieldElement::from_hex("0xff").unwrap(), x);
        assert_eq!(FieldElement::from_hex("ff").unwrap(), x);
    }

    #[test]
    fn rejects_modulus_and_garbage() {
        // BN254 scalar modulus itself is not canonical.
        let p = "0x30644e72e131a029b85045b68181585d2833e84879b9709143e1f593f0000001";
        assert!(matches!(FieldElement::from_hex(p), Err(CryptoError::Encoding(_))));
        assert!(FieldElement::from_hex("0x").is_err());
        assert!(FieldElement::from_hex("0xzz").is_err());
        assert!(FieldElement::from_hex(&format!("0x1{}", "0".repeat(64))).is_err());
    }

    #[test]
    fn integer_domain_arithmetic() {
        let a = FieldElement::from_u64(200);
        let b = FieldElement::from_u64(100);
        assert_eq!(a.checked_sub(&b), Some(b));
        assert_eq!(b.checked_sub(&a), None);
        assert_eq!(b.checked_add(&b), Some(a));

        let p_minus_1 = FieldElement::from_hex(
            "0x30644e72e131a029b85045b68181585d2833e84879b9709143e1f593f0000000",
        )
        .unwrap();
        assert_eq!(p_minus_1.checked_increment(), None);
        assert!(p_minus_1.gt(&a));
    }

    #[test]
    fn decimal_and_u128() {
        let x: FieldElement = "40000".parse().unwrap();
        assert_eq!(x, FieldElement::from_u64(40_000));
        assert_eq!(x.to_u128(), Some(40_000));
        assert!("-3".parse::<FieldElement>().is_err());
    }

    #[test]
    fn serde_as_hex_string() {
        let x = FieldElement::from_u64(7);
        let s = serde_json::to_string(&x).unwrap();
        assert_eq!(s, format!("\"{}\"", x.to_hex()));
        let back: FieldElement = serde_json::from_str(&s).unwrap();
        assert_eq!(back, x);
        let from_int: FieldElement = serde_json::from_str("7").unwrap();
        assert_eq!(from_int, x);
    }
}
