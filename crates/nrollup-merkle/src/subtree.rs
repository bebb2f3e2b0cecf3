//! Subtree merge: the ledger's recomputation of a root after an aligned
//! batch of leaves lands in the tree.

use nrollup_crypto::{FieldElement, HashScheme};

use crate::MerkleError;

/// Fold `subtree_root` (a node at `height`) through `siblings`, using
/// `position_bits[i]` as the direction at level `height + i`.
///
/// `true` means the running node is the right child.
pub fn merge_subtree<H: HashScheme + ?Sized>(
    hasher: &H,
    subtree_root: FieldElement,
    position_bits: &[bool],
    siblings: &[FieldElement],
) -> Result<FieldElement, MerkleError> {
    if position_bits.len() != siblings.len() {
        return Err(MerkleError::Config(format!(
            "{} position bits for {} siblings",
            position_bits.len(),
            siblings.len()
        )));
    }
    let mut cur = subtree_root;
    for (is_right, sib) in position_bits.iter().zip(siblings) {
        cur = if *is_right {
            hasher.hash_pair(*sib, cur)?
        } else {
            hasher.hash_pair(cur, *sib)?
        };
    }
    Ok(cur)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{path_bits, IncrementalMerkleTree};
    use nrollup_crypto::CircomPoseidon;

    #[test]
    fn merged_subtree_matches_tree_root() {
        let mut t = IncrementalMerkleTree::poseidon(4).unwrap();
        for i in 0..4 {
            t.insert(FieldElement::from_u64(i + 1)).unwrap();
        }
        let before = t.subtree_siblings(2, 1).unwrap();
        let batch: Vec<_> = (10..14).map(FieldElement::from_u64).collect();

        let mut scratch = IncrementalMerkleTree::poseidon(2).unwrap();
        for leaf in &batch {
            scratch.insert(*leaf).unwrap();
        }
        let merged =
            merge_subtree(&CircomPoseidon, scratch.root(), &path_bits(1, 2), &before).unwrap();

        assert_eq!(t.insert_subtree(&batch).unwrap(), 1);
        assert_eq!(merged, t.root());
    }

    #[test]
    fn length_mismatch_rejected() {
        let err = merge_subtree(
            &CircomPoseidon,
            FieldElement::zero(),
            &[true],
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, MerkleError::Config(_)));
    }
}
