//! Engine configuration.

use nrollup_merkle::MAX_DEPTH;
use serde::{Deserialize, Serialize};

use crate::{RollupError, TxLeafHashing};

/// Environment variable naming a default config file.
pub const CONFIG_ENV: &str = "NROLLUP_CONFIG";

/// Tree geometry and protocol parameters shared with the circuit and ledger.
///
/// Missing fields take their defaults, so `{}` is a valid config file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RollupConfig {
    /// Balance tree depth.
    pub balance_depth: usize,
    /// Per-batch transaction tree depth.
    pub tx_depth: usize,
    /// Deposits are flushed in batches of `2^deposit_batch_log2`.
    pub deposit_batch_log2: u32,
    /// Transaction-leaf hashing convention.
    pub tx_leaf_hashing: TxLeafHashing,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            balance_depth: 4,
            tx_depth: 4,
            deposit_batch_log2: 2,
            tx_leaf_hashing: TxLeafHashing::Split,
        }
    }
}

impl RollupConfig {
    /// Number of leaves per deposit flush.
    #[inline]
    #[must_use]
    pub const fn deposit_batch_size(&self) -> u64 {
        1u64 << self.deposit_batch_log2
    }

    /// Transfers one batch can hold (leaf 0 of the tx tree is reserved).
    #[inline]
    #[must_use]
    pub const fn max_transfers(&self) -> u64 {
        (1u64 << self.tx_depth) - 1
    }

    /// Reject geometry the trees cannot represent.
    pub fn validate(&self) -> Result<(), RollupError> {
        for (name, depth) in [("balance_depth", self.balance_depth), ("tx_depth", self.tx_depth)] {
            if depth == 0 || depth > MAX_DEPTH {
                return Err(RollupError::Config(format!(
                    "{name} = {depth} outside 1..={MAX_DEPTH}"
                )));
            }
        }
        if self.deposit_batch_log2 as usize > self.balance_depth {
            return Err(RollupError::Config(format!(
                "deposit_batch_log2 = {} exceeds balance_depth = {}",
                self.deposit_batch_log2, self.balance_depth
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let c = RollupConfig::default();
        c.validate().unwrap();
        assert_eq!(c.deposit_batch_size(), 4);
        assert_eq!(c.max_transfers(), 15);
    }

    #[test]
    fn bad_geometry_rejected() {
        let mut c = RollupConfig {
            balance_depth: 0,
            ..RollupConfig::default()
        };
        assert!(matches!(c.validate(), Err(RollupError::Config(_))));
        c.balance_depth = 2;
        c.deposit_batch_log2 = 3;
        assert!(c.validate().is_err());
        c.tx_depth = MAX_DEPTH + 1;
        c.deposit_batch_log2 = 1;
        assert!(c.validate().is_err());
    }

    #[test]
    fn partial_json_takes_defaults() {
        let c: RollupConfig = serde_json::from_str(r#"{"balance_depth": 8}"#).unwrap();
        assert_eq!(c.balance_depth, 8);
        assert_eq!(c.tx_depth, 4);
        let flat: RollupConfig = serde_json::from_str(r#"{"tx_leaf_hashing": "flat"}"#).unwrap();
        assert_eq!(flat.tx_leaf_hashing, TxLeafHashing::Flat);
        assert!(serde_json::from_str::<RollupConfig>(r#"{"depth": 3}"#).is_err());
    }
}
