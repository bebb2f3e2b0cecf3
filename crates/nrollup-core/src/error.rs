//! Error type for state transitions.
//!
//! Validation errors (`InsufficientBalance`, `InvalidTransfer`, ...) abort a
//! single operation and leave the state untouched. `StateDivergence` is the
//! only fatal kind: it halts the engine and every later mutation fails with
//! `Halted` until [`crate::RollupState::resolve_halt`] is called.

use nrollup_crypto::{CryptoError, FieldElement};
use nrollup_merkle::MerkleError;
use thiserror::Error;

/// Failures raised by the state engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RollupError {
    /// Bad depth, batch size, or other configuration value.
    #[error("config error: {0}")]
    Config(String),

    /// A tree, queue, or batch has no free slot.
    #[error("capacity exhausted: {0}")]
    Capacity(String),

    /// Leaf index outside the populated range.
    #[error("index {index} out of range (limit {limit})")]
    Index {
        /// Requested index.
        index: u64,
        /// Exclusive upper bound.
        limit: u64,
    },

    /// Debit larger than the account balance.
    #[error("insufficient balance: have {balance}, need {amount}")]
    InsufficientBalance {
        /// Current balance.
        balance: FieldElement,
        /// Requested debit.
        amount: FieldElement,
    },

    /// Balance or nonce would leave the field range.
    #[error("overflow: {0}")]
    Overflow(String),

    /// Mutation of a sealed batch.
    #[error("batch is sealed")]
    SealedBatch,

    /// The deposit batch already holds `batch_size` leaves awaiting flush.
    #[error("deposit batch full ({batch_size} pending)")]
    BatchFull {
        /// Configured batch size.
        batch_size: u64,
    },

    /// Flush requested before the deposit batch is complete.
    #[error("deposit batch incomplete: {pending} of {batch_size}")]
    IncompleteBatch {
        /// Leaves queued so far.
        pending: u64,
        /// Configured batch size.
        batch_size: u64,
    },

    /// Sealing a batch that holds no transfers.
    #[error("cannot seal an empty batch")]
    EmptyBatch,

    /// An ordinary deposit arrived before the reserved empty leaf.
    #[error("the reserved empty leaf must be deposited first")]
    MissingGenesis,

    /// Transfer rejected by a structural check (self-transfer, token type, key).
    #[error("invalid transfer: {0}")]
    InvalidTransfer(String),

    /// The sender's signature does not verify over the transaction leaf.
    #[error("signature rejected for transfer from index {from_index}")]
    InvalidSignature {
        /// Sender index.
        from_index: u64,
    },

    /// Malformed field element or serialized payload.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Internal recomputation disagrees with a root already committed.
    #[error("state divergence: {0}")]
    StateDivergence(String),

    /// The engine is halted after a divergence.
    #[error("state halted: {0}")]
    Halted(String),

    /// The ledger port failed or returned something unusable.
    #[error("ledger submission failed: {0}")]
    Submission(String),

    /// The ledger port did not answer in time.
    #[error("ledger submission timed out after {millis} ms")]
    Timeout {
        /// Elapsed budget in milliseconds.
        millis: u64,
    },

    /// Tree error without a dedicated variant above.
    #[error(transparent)]
    Merkle(MerkleError),

    /// Hash or signing failure.
    #[error(transparent)]
    Crypto(CryptoError),
}

impl From<MerkleError> for RollupError {
    fn from(e: MerkleError) -> Self {
        match e {
            MerkleError::Config(msg) => Self::Config(msg),
            MerkleError::Capacity { capacity } => {
                Self::Capacity(format!("tree holds {capacity} leaves"))
            }
            MerkleError::Index { index, limit } => Self::Index { index, limit },
            MerkleError::Hash(c) => c.into(),
            other => Self::Merkle(other),
        }
    }
}

impl From<CryptoError> for RollupError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::Encoding(msg) => Self::Encoding(msg),
            other => Self::Crypto(other),
        }
    }
}

impl RollupError {
    /// `true` for errors that must halt the engine.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::StateDivergence(_))
    }
}
