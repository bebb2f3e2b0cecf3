//! Serializable tree state.
//!
//! A snapshot keeps the populated leaves plus the root they are expected to
//! produce; restoring replays the leaves and rejects the snapshot if the
//! recomputed root differs (wrong hash scheme or tampered file).

use nrollup_crypto::{FieldElement, HashScheme};
use serde::{Deserialize, Serialize};

use crate::{IncrementalMerkleTree, MerkleError};

/// Persisted form of an [`IncrementalMerkleTree`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    /// Tree depth.
    pub depth: usize,
    /// Empty-leaf value.
    pub zero_value: FieldElement,
    /// Leaves `0..len` in index order.
    pub leaves: Vec<FieldElement>,
    /// Root at the time of the snapshot.
    pub root: FieldElement,
}

impl<H: HashScheme> IncrementalMerkleTree<H> {
    /// Capture the populated leaves and current root.
    pub fn snapshot(&self) -> Result<TreeSnapshot, MerkleError> {
        let leaves = (0..self.len())
            .map(|i| self.leaf(i))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TreeSnapshot {
            depth: self.depth(),
            zero_value: self.zero_value(),
            leaves,
            root: self.root(),
        })
    }

    /// Rebuild a tree from `snap` using `hasher`.
    pub fn from_snapshot(snap: &TreeSnapshot, hasher: H) -> Result<Self, MerkleError> {
        let mut tree = Self::new(snap.depth, hasher, snap.zero_value)?;
        for leaf in &snap.leaves {
            tree.insert(*leaf)?;
        }
        if tree.root() != snap.root {
            return Err(MerkleError::Snapshot(format!(
                "recomputed root {} != recorded {}",
                tree.root(),
                snap.root
            )));
        }
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nrollup_crypto::CircomPoseidon;

    #[test]
    fn restore_preserves_root_and_len() {
        let mut t = IncrementalMerkleTree::poseidon(3).unwrap();
        for i in 0..3 {
            t.insert(FieldElement::from_u64(i + 5)).unwrap();
        }
        t.update(1, FieldElement::from_u64(77)).unwrap();
        let snap = t.snapshot().unwrap();
        let json = serde_json::to_string(&snap).unwrap();
        let back: TreeSnapshot = serde_json::from_str(&json).unwrap();
        let r = IncrementalMerkleTree::from_snapshot(&back, CircomPoseidon).unwrap();
        assert_eq!(r.root(), t.root());
        assert_eq!(r.len(), 3);
    }

    #[test]
    fn tampered_root_rejected() {
        let t = IncrementalMerkleTree::poseidon(2).unwrap();
        let mut snap = t.snapshot().unwrap();
        snap.root = FieldElement::from_u64(1);
        assert!(matches!(
            IncrementalMerkleTree::from_snapshot(&snap, CircomPoseidon),
            Err(MerkleError::Snapshot(_))
        ));
    }
}
