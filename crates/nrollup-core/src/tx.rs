//! Transaction leaves.

use nrollup_crypto::{FieldElement, HashScheme, PublicKey};
use serde::{Deserialize, Serialize};

use crate::RollupError;

/// How a [`TxLeaf`] is reduced to a single field element.
///
/// This is a protocol parameter: the circuit and the ledger verifier must be
/// built for the same convention.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxLeafHashing {
    /// `H(H(from.x, from.y, from_index, to.x), H(to.y, nonce, amount, token_type))`.
    #[default]
    Split,
    /// `H(all eight fields)`.
    Flat,
}

/// One signed transfer as committed in the transaction tree.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxLeaf {
    /// Sender key.
    pub from: PublicKey,
    /// Sender index in the balance tree.
    pub from_index: u64,
    /// Receiver key.
    pub to: PublicKey,
    /// Sender nonce before this transfer.
    pub nonce: FieldElement,
    /// Transferred amount.
    pub amount: FieldElement,
    /// Token identifier.
    pub token_type: FieldElement,
}

impl TxLeaf {
    /// Field order `[from.x, from.y, from_index, to.x, to.y, nonce, amount, token_type]`.
    #[must_use]
    pub fn to_array(&self) -> [FieldElement; 8] {
        [
            self.from.x,
            self.from.y,
            FieldElement::from_u64(self.from_index),
            self.to.x,
            self.to.y,
            self.nonce,
            self.amount,
            self.token_type,
        ]
    }

    /// Leaf hash under `scheme`.
    pub fn hash<H: HashScheme + ?Sized>(
        &self,
        hasher: &H,
        scheme: TxLeafHashing,
    ) -> Result<FieldElement, RollupError> {
        let fields = self.to_array();
        let digest = match scheme {
            TxLeafHashing::Split => {
                let (left, right) = fields.split_at(4);
                hasher.hash_pair(hasher.hash(left)?, hasher.hash(right)?)?
            }
            TxLeafHashing::Flat => hasher.hash(&fields)?,
        };
        Ok(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nrollup_crypto::CircomPoseidon;

    #[test]
    fn split_and_flat_differ() {
        let p = CircomPoseidon;
        let leaf = TxLeaf {
            from: PublicKey::new(FieldElement::from_u64(1), FieldElement::from_u64(2)),
            from_index: 2,
            to: PublicKey::new(FieldElement::from_u64(3), FieldElement::from_u64(4)),
            nonce: FieldElement::zero(),
            amount: FieldElement::from_u64(200),
            token_type: FieldElement::from_u64(1),
        };
        let f = leaf.to_array();
        let split = leaf.hash(&p, TxLeafHashing::Split).unwrap();
        let flat = leaf.hash(&p, TxLeafHashing::Flat).unwrap();
        let expect_split = p
            .hash_pair(p.hash(&f[..4]).unwrap(), p.hash(&f[4..]).unwrap())
            .unwrap();
        assert_eq!(split, expect_split);
        assert_eq!(flat, p.hash(&f).unwrap());
        assert_ne!(split, flat);
    }

    #[test]
    fn zero_leaf_flat_matches_reserved_preimage() {
        let p = CircomPoseidon;
        let z = TxLeaf::default().hash(&p, TxLeafHashing::Flat).unwrap();
        assert_eq!(z, p.hash(&[FieldElement::zero(); 8]).unwrap());
    }
}
