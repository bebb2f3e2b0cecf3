// crates/nrollup-crypto/src/lib.rs

//! Crypto substrate shared by every nrollup crate.
//!
//! - [`field`]: canonical BN254 scalar-field element with a fixed-width hex
//!   interchange format and integer-domain checked arithmetic.
//! - [`hash`]: the [`HashScheme`] trait and the circom-compatible Poseidon
//!   used for every leaf and internal node.
//! - [`sign`]: the signing capability consumed by batch construction, plus a
//!   reference Schnorr signer over Grumpkin.
//!
//! Any two conforming implementations of [`HashScheme`] must agree bit for bit:
//! the proving circuit and the ledger contract recompute the same hashes.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod error;
pub mod field;
pub mod hash;
pub mod sign;

pub use error::CryptoError;
pub use field::FieldElement;
pub use hash::{CircomPoseidon, HashScheme, POSEIDON_MAX_ARITY};
pub use sign::{PublicKey, SchnorrSigner, SchnorrVerifier, Signature, SignatureVerifier, Signer};

/// Commonly-used items for quick imports.
pub mod prelude {
    pub use crate::{
        CircomPoseidon, CryptoError, FieldElement, HashScheme, PublicKey, Signature,
        SignatureVerifier, Signer,
    };
}
