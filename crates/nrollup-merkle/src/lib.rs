// crates/nrollup-merkle/src/lib.rs

//! Fixed-depth incremental Merkle tree over field-element leaves.
//!
//! - Storage is sparse: only touched `(level, index)` slots are kept; every
//!   other node falls back to the zero-subtree cache for its level.
//! - Proof convention: siblings are listed leaf → root and bit `i` of the leaf
//!   index says whether the running node is the right child at level `i`. The
//!   circuit and the ledger contract walk paths the same way.
//! - [`merge_subtree`] is the ledger's batch-deposit recomputation: a subtree
//!   root at some height combined with the siblings above it.

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
pub mod proof;
pub mod snapshot;
pub mod subtree;
pub mod tree;

pub use error::MerkleError;
pub use proof::{path_bits, MerkleProof};
pub use snapshot::TreeSnapshot;
pub use subtree::merge_subtree;
pub use tree::{zero_cache, IncrementalMerkleTree, MAX_DEPTH};
