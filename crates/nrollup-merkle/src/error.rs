//! Tree errors.

use nrollup_crypto::CryptoError;
use thiserror::Error;

/// Failures raised by tree construction, mutation, and proof generation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MerkleError {
    /// Depth or subtree geometry outside the supported range.
    #[error("config error: {0}")]
    Config(String),

    /// All `2^depth` leaf slots are used.
    #[error("tree is full ({capacity} leaves)")]
    Capacity {
        /// Total leaf slots.
        capacity: u64,
    },

    /// Leaf or node index outside the tree.
    #[error("index {index} out of range (limit {limit})")]
    Index {
        /// Requested index.
        index: u64,
        /// Exclusive upper bound.
        limit: u64,
    },

    /// Update of a slot that was never inserted.
    #[error("leaf {index} not populated (tree has {len} leaves)")]
    Unpopulated {
        /// Requested index.
        index: u64,
        /// Number of populated leaves.
        len: u64,
    },

    /// A persisted snapshot is inconsistent with the hash scheme.
    #[error("snapshot rejected: {0}")]
    Snapshot(String),

    /// Hashing failed.
    #[error(transparent)]
    Hash(#[from] CryptoError),
}
