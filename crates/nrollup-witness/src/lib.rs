// crates/nrollup-witness/src/lib.rs

//! Circuit witness encoding.
//!
//! [`encode`] turns a sealed [`nrollup_core::BatchWitness`] into a
//! [`CanonicalWitness`]: one ordered array per logical input, every entry a
//! fixed-width hex field element. The circuit reads arrays by position, so
//! the order inside each array is the batch submission order and the order
//! of the arrays themselves is fixed (see [`CanonicalWitness::flatten`]).
//!
//! Per-transfer tuples are flattened: pubkeys contribute `x, y`; paths
//! contribute their siblings leaf → root; signatures contribute
//! `r_x, r_y, s_lo, s_hi`.
//!
//! [`check_witness`] replays a canonical witness without any tree state and
//! is what tests and the CLI use to catch encoding drift.

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

pub mod check;
pub mod encode;
pub mod error;
pub mod io;

pub use check::{check_witness, CheckParams};
pub use encode::{encode, CanonicalWitness, EncodeOptions};
pub use error::WitnessError;
