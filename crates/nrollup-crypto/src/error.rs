//! Error type for field encoding, hashing, and signing.

use thiserror::Error;

/// Failures raised by the crypto layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// A value could not be decoded as a canonical field element.
    #[error("malformed field element: {0}")]
    Encoding(String),

    /// The hash was invoked with an unsupported number of inputs.
    #[error("unsupported hash arity {arity} (supported: 1..={max})")]
    Arity {
        /// Number of inputs supplied.
        arity: usize,
        /// Largest supported arity.
        max: usize,
    },

    /// The underlying Poseidon permutation rejected its parameters.
    #[error("poseidon: {0}")]
    Poseidon(String),

    /// A public key is not a valid curve point.
    #[error("public key is not a valid Grumpkin point")]
    InvalidPublicKey,

    /// A secret key is zero or out of range.
    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),
}
