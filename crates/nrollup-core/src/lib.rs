// crates/nrollup-core/src/lib.rs

//! Off-chain rollup state engine.
//!
//! [`RollupState`] is the single writer over the balance tree. Deposits flow
//! through the [`DepositQueue`] and land in the tree as aligned power-of-two
//! subtrees; transfers are applied by a [`TransactionBatchBuilder`] that
//! borrows the state mutably, so a deposit flush can never interleave with an
//! open batch. Every state transition records the ledger confirmation it
//! expects, and [`RollupState::reconcile`] halts the engine on the first
//! mismatch.
//!
//! Modules:
//! - [`account`]: plaintext account leaves and the store that keeps them.
//! - [`tx`]: transaction leaves and the leaf-hashing protocol parameter.
//! - [`deposit`]: pending-deposit stack and subtree flush.
//! - [`batch`]: per-batch transfer sequencing and the batch witness.
//! - [`state`]: [`RollupState`], persistence snapshots, reconciliation.
//! - [`ledger`]: call arguments and events exchanged with the anchor ledger.
//! - [`submit`]: async submission port and an in-memory ledger model.
//! - [`config`] / [`io`]: configuration and JSON/CBOR file helpers.

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

pub mod account;
pub mod batch;
pub mod config;
pub mod deposit;
pub mod error;
pub mod io;
pub mod ledger;
pub mod state;
pub mod submit;
pub mod tx;

pub use account::{AccountLeaf, AccountStore};
pub use batch::{BatchPhase, BatchWitness, TransactionBatchBuilder, TransferRequest, TransferWitness};
pub use config::RollupConfig;
pub use deposit::{DepositDescription, DepositFlush, DepositQueue, PendingSubtree, SubtreeStack};
pub use error::RollupError;
pub use ledger::{DepositCall, LedgerCall, LedgerEvent, ProcessDepositsCall, SubmitBatchCall};
pub use state::{RollupState, StateSnapshot};
pub use submit::{submit_sealed, InMemoryLedger, LedgerPort};
pub use tx::{TxLeaf, TxLeafHashing};

pub use nrollup_crypto::{FieldElement, PublicKey};

/// Crate-wide result alias.
pub type Result<T, E = RollupError> = std::result::Result<T, E>;
