//! Witness errors.

use nrollup_core::RollupError;
use nrollup_crypto::CryptoError;
use nrollup_merkle::MerkleError;
use thiserror::Error;

/// Failures raised while encoding or checking a witness.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WitnessError {
    /// A path is longer than the padded width requested.
    #[error("path of {len} siblings does not fit width {width}")]
    PathWidth {
        /// Actual sibling count.
        len: usize,
        /// Requested padded width.
        width: usize,
    },

    /// Arrays disagree on the number of transfers.
    #[error("field `{field}` has {len} entries, expected {expected}")]
    Shape {
        /// Offending array.
        field: &'static str,
        /// Its length.
        len: usize,
        /// Length implied by the transfer count.
        expected: usize,
    },

    /// Replaying the witness does not reproduce a recorded root or hash.
    #[error("witness check failed at transfer {transfer}: {reason}")]
    Mismatch {
        /// Zero-based transfer position.
        transfer: usize,
        /// What disagreed.
        reason: String,
    },

    /// A value meant to be a small integer (index) is not one.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Error from the state engine types.
    #[error(transparent)]
    Rollup(#[from] RollupError),

    /// Error from the tree layer.
    #[error(transparent)]
    Merkle(#[from] MerkleError),

    /// Error from hashing.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
