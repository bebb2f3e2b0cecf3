//! Arguments for ledger calls and the events the ledger emits in response.
//!
//! The core formats calls and checks events; it never talks to the ledger
//! directly (see [`crate::submit`]).

use nrollup_crypto::{FieldElement, PublicKey};
use serde::{Deserialize, Serialize};

use crate::DepositFlush;

/// `deposit(pubkey, amount, tokenType)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositCall {
    /// Account key.
    pub pubkey: PublicKey,
    /// Deposited amount.
    pub amount: FieldElement,
    /// Token identifier.
    pub token_type: FieldElement,
}

/// `processDeposits(batchSizeLog2, position, proof)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDepositsCall {
    /// Subtree height.
    pub batch_size_log2: u32,
    /// Direction bits above the subtree, lowest level first (0 = left).
    pub position: Vec<u8>,
    /// Sibling hashes matching `position`.
    pub proof: Vec<FieldElement>,
}

impl From<&DepositFlush> for ProcessDepositsCall {
    fn from(f: &DepositFlush) -> Self {
        Self {
            batch_size_log2: f.batch_size_log2,
            position: f.position_bits().into_iter().map(u8::from).collect(),
            proof: f.proof.clone(),
        }
    }
}

/// Batch submission `(oldRoot, newRoot, txRoot, proof)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitBatchCall {
    /// Balance root the batch starts from.
    pub old_root: FieldElement,
    /// Balance root after every transfer.
    pub new_root: FieldElement,
    /// Transaction tree root.
    pub tx_root: FieldElement,
    /// Number of transfers.
    pub count: u64,
    /// Opaque validity proof, hex encoded in text formats.
    #[serde(with = "hex_bytes")]
    pub proof: Vec<u8>,
}

/// Any ledger call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum LedgerCall {
    /// Deposit request.
    Deposit(DepositCall),
    /// Deposit batch confirmation.
    ProcessDeposits(ProcessDepositsCall),
    /// Transaction batch submission.
    SubmitBatch(SubmitBatchCall),
}

/// Events the ledger emits and the state reconciles against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// A deposit was accepted into the ledger's pending stack.
    RequestDeposit {
        /// Account key.
        pubkey: PublicKey,
        /// Deposited amount.
        amount: FieldElement,
        /// Token identifier.
        token_type: FieldElement,
    },
    /// A deposit batch was merged into the balance root.
    ConfirmDeposit {
        /// Root before the merge.
        old_root: FieldElement,
        /// Root after the merge.
        new_root: FieldElement,
        /// Leaves merged.
        count: u64,
    },
    /// A transaction batch was accepted.
    ConfirmBatch {
        /// Root before the batch.
        old_root: FieldElement,
        /// Root after the batch.
        new_root: FieldElement,
        /// Transfers in the batch.
        count: u64,
    },
}

impl LedgerEvent {
    /// Root the event commits to, if any.
    #[must_use]
    pub const fn new_root(&self) -> Option<FieldElement> {
        match self {
            Self::RequestDeposit { .. } => None,
            Self::ConfirmDeposit { new_root, .. } | Self::ConfirmBatch { new_root, .. } => {
                Some(*new_root)
            }
        }
    }
}

impl From<&DepositCall> for LedgerEvent {
    fn from(c: &DepositCall) -> Self {
        Self::RequestDeposit {
            pubkey: c.pubkey,
            amount: c.amount,
            token_type: c.token_type,
        }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_json_is_tagged() {
        let e = LedgerEvent::ConfirmDeposit {
            old_root: FieldElement::from_u64(1),
            new_root: FieldElement::from_u64(2),
            count: 4,
        };
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["event"], "confirm_deposit");
        assert_eq!(v["count"], 4);
        let back: LedgerEvent = serde_json::from_value(v).unwrap();
        assert_eq!(back, e);
        assert_eq!(back.new_root(), Some(FieldElement::from_u64(2)));
    }

    #[test]
    fn proof_bytes_hex() {
        let c = SubmitBatchCall {
            old_root: FieldElement::zero(),
            new_root: FieldElement::zero(),
            tx_root: FieldElement::zero(),
            count: 1,
            proof: vec![0xde, 0xad],
        };
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["proof"], "0xdead");
    }

    #[test]
    fn process_call_from_flush() {
        let f = DepositFlush {
            old_root: FieldElement::zero(),
            new_root: FieldElement::zero(),
            count: 4,
            batch_size_log2: 2,
            position: 1,
            proof: vec![FieldElement::zero(); 2],
        };
        let call = ProcessDepositsCall::from(&f);
        assert_eq!(call.position, vec![1, 0]);
        assert_eq!(call.batch_size_log2, 2);
    }
}
