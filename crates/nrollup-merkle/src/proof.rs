//! Inclusion proofs.

use nrollup_crypto::{FieldElement, HashScheme};
use serde::{Deserialize, Serialize};

use crate::MerkleError;

/// Siblings bottom → top plus the leaf index they belong to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Leaf position in the tree.
    pub leaf_index: u64,
    /// `siblings[i]` is the sibling of the running node at level `i`.
    pub siblings: Vec<FieldElement>,
}

impl MerkleProof {
    /// Path length (equals the tree depth).
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.siblings.len()
    }

    /// `true` for a zero-length path.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.siblings.is_empty()
    }

    /// Direction bits: `true` means the running node is the right child.
    #[must_use]
    pub fn path_bits(&self) -> Vec<bool> {
        path_bits(self.leaf_index, self.siblings.len())
    }

    /// Fold `leaf` up the path.
    pub fn compute_root<H: HashScheme + ?Sized>(
        &self,
        leaf: FieldElement,
        hasher: &H,
    ) -> Result<FieldElement, MerkleError> {
        let mut cur = leaf;
        for (level, sib) in self.siblings.iter().enumerate() {
            cur = if (self.leaf_index >> level) & 1 == 0 {
                hasher.hash_pair(cur, *sib)?
            } else {
                hasher.hash_pair(*sib, cur)?
            };
        }
        Ok(cur)
    }

    /// `true` iff `leaf` folds to `root`.
    pub fn verify<H: HashScheme + ?Sized>(
        &self,
        leaf: FieldElement,
        root: FieldElement,
        hasher: &H,
    ) -> Result<bool, MerkleError> {
        Ok(self.compute_root(leaf, hasher)? == root)
    }
}

/// Low `len` bits of `index`, least significant first.
#[must_use]
pub fn path_bits(index: u64, len: usize) -> Vec<bool> {
    (0..len).map(|i| i < 64 && (index >> i) & 1 == 1).collect()
}
