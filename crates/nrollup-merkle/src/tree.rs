//! Sparse fixed-depth incremental Merkle tree.

use std::collections::BTreeMap;

use nrollup_crypto::{CircomPoseidon, FieldElement, HashScheme};

use crate::{MerkleError, MerkleProof};

/// Deepest supported tree (leaf indices stay comfortably inside `u64`).
pub const MAX_DEPTH: usize = 32;

/// `(level, index)`; level 0 holds leaves, level `depth` holds the root.
type NodeKey = (u32, u64);

/// Zero-subtree cache: `zc[0] = zero_value`, `zc[i] = H(zc[i-1], zc[i-1])`.
pub fn zero_cache<H: HashScheme + ?Sized>(
    depth: usize,
    hasher: &H,
    zero_value: FieldElement,
) -> Result<Vec<FieldElement>, MerkleError> {
    let mut zc = Vec::with_capacity(depth + 1);
    zc.push(zero_value);
    for level in 1..=depth {
        let below = zc[level - 1];
        zc.push(hasher.hash_pair(below, below)?);
    }
    Ok(zc)
}

/// Fixed-depth binary Merkle tree with append-only insertion and in-place
/// leaf updates. Only hashes are stored, never leaf pre-images.
#[derive(Clone, Debug)]
pub struct IncrementalMerkleTree<H: HashScheme = CircomPoseidon> {
    depth: usize,
    hasher: H,
    zero_cache: Vec<FieldElement>,
    nodes: BTreeMap<NodeKey, FieldElement>,
    next_index: u64,
}

impl IncrementalMerkleTree<CircomPoseidon> {
    /// Poseidon tree with `0` as the empty-leaf value.
    pub fn poseidon(depth: usize) -> Result<Self, MerkleError> {
        Self::new(depth, CircomPoseidon, FieldElement::zero())
    }
}

impl<H: HashScheme> IncrementalMerkleTree<H> {
    /// Build an empty tree and precompute its zero cache.
    pub fn new(depth: usize, hasher: H, zero_value: FieldElement) -> Result<Self, MerkleError> {
        check_depth(depth)?;
        let zero_cache = zero_cache(depth, &hasher, zero_value)?;
        Ok(Self {
            depth,
            hasher,
            zero_cache,
            nodes: BTreeMap::new(),
            next_index: 0,
        })
    }

    /// Tree depth (proof length).
    #[inline]
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Number of leaf slots (`2^depth`).
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        1u64 << self.depth
    }

    /// Number of inserted leaves; also the next free index.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.next_index
    }

    /// `true` before the first insertion.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.next_index == 0
    }

    /// Hash scheme used for internal nodes.
    #[inline]
    #[must_use]
    pub const fn hasher(&self) -> &H {
        &self.hasher
    }

    /// Precomputed empty-subtree hashes, `depth + 1` entries.
    #[inline]
    #[must_use]
    pub fn zero_cache(&self) -> &[FieldElement] {
        &self.zero_cache
    }

    /// Empty-leaf value (`zero_cache[0]`).
    #[inline]
    #[must_use]
    pub fn zero_value(&self) -> FieldElement {
        self.zero_cache[0]
    }

    /// Current root.
    #[must_use]
    pub fn root(&self) -> FieldElement {
        self.node_unchecked(self.depth, 0)
    }

    /// Node value at `(level, index)`, falling back to the zero cache.
    pub fn node(&self, level: usize, index: u64) -> Result<FieldElement, MerkleError> {
        if level > self.depth {
            return Err(MerkleError::Index {
                index: level as u64,
                limit: self.depth as u64 + 1,
            });
        }
        let width = 1u64 << (self.depth - level);
        if index >= width {
            return Err(MerkleError::Index {
                index,
                limit: width,
            });
        }
        Ok(self.node_unchecked(level, index))
    }

    /// Leaf value at `index`.
    pub fn leaf(&self, index: u64) -> Result<FieldElement, MerkleError> {
        self.node(0, index)
    }

    fn node_unchecked(&self, level: usize, index: u64) -> FieldElement {
        self.nodes
            .get(&(level as u32, index))
            .copied()
            .unwrap_or(self.zero_cache[level])
    }

    /// Append `leaf` at the next free index.
    pub fn insert(&mut self, leaf: FieldElement) -> Result<u64, MerkleError> {
        if self.next_index >= self.capacity() {
            return Err(MerkleError::Capacity {
                capacity: self.capacity(),
            });
        }
        let index = self.next_index;
        self.set_leaf(index, leaf)?;
        self.next_index += 1;
        Ok(index)
    }

    /// Replace a populated leaf and rehash its ancestors.
    pub fn update(&mut self, index: u64, leaf: FieldElement) -> Result<(), MerkleError> {
        self.check_leaf_index(index)?;
        if index >= self.next_index {
            return Err(MerkleError::Unpopulated {
                index,
                len: self.next_index,
            });
        }
        self.set_leaf(index, leaf)
    }

    /// Append an aligned run of `2^k` leaves; returns the subtree position
    /// (`first_index >> k`).
    pub fn insert_subtree(&mut self, leaves: &[FieldElement]) -> Result<u64, MerkleError> {
        let n = leaves.len() as u64;
        if n == 0 || !n.is_power_of_two() {
            return Err(MerkleError::Config(format!(
                "subtree of {n} leaves is not a power of two"
            )));
        }
        if self.next_index % n != 0 {
            return Err(MerkleError::Config(format!(
                "next index {} not aligned to subtree size {n}",
                self.next_index
            )));
        }
        if self.next_index + n > self.capacity() {
            return Err(MerkleError::Capacity {
                capacity: self.capacity(),
            });
        }
        let position = self.next_index / n;
        for leaf in leaves {
            self.insert(*leaf)?;
        }
        Ok(position)
    }

    /// Sibling path for the leaf at `index` against the current root.
    pub fn create_proof(&self, index: u64) -> Result<MerkleProof, MerkleError> {
        self.check_leaf_index(index)?;
        let siblings = (0..self.depth)
            .map(|level| self.node_unchecked(level, (index >> level) ^ 1))
            .collect();
        Ok(MerkleProof {
            leaf_index: index,
            siblings,
        })
    }

    /// Siblings of the interior node `(height, position)` for levels
    /// `height..depth`; the ledger's deposit-merge proof.
    pub fn subtree_siblings(
        &self,
        height: usize,
        position: u64,
    ) -> Result<Vec<FieldElement>, MerkleError> {
        if height > self.depth {
            return Err(MerkleError::Config(format!(
                "subtree height {height} exceeds depth {}",
                self.depth
            )));
        }
        // Validates the position range.
        self.node(height, position)?;
        Ok((height..self.depth)
            .map(|level| self.node_unchecked(level, (position >> (level - height)) ^ 1))
            .collect())
    }

    /// `true` iff `proof` folds `leaf` to the current root.
    pub fn verify_proof(&self, leaf: FieldElement, proof: &MerkleProof) -> Result<bool, MerkleError> {
        proof.verify(leaf, self.root(), &self.hasher)
    }

    fn check_leaf_index(&self, index: u64) -> Result<(), MerkleError> {
        if index >= self.capacity() {
            return Err(MerkleError::Index {
                index,
                limit: self.capacity(),
            });
        }
        Ok(())
    }

    fn set_leaf(&mut self, index: u64, leaf: FieldElement) -> Result<(), MerkleError> {
        let mut idx = index;
        let mut cur = leaf;
        self.nodes.insert((0, idx), cur);
        for level in 0..self.depth {
            let sibling = self.node_unchecked(level, idx ^ 1);
            cur = if idx & 1 == 0 {
                self.hasher.hash_pair(cur, sibling)?
            } else {
                self.hasher.hash_pair(sibling, cur)?
            };
            idx >>= 1;
            self.nodes.insert((level as u32 + 1, idx), cur);
        }
        Ok(())
    }
}

fn check_depth(depth: usize) -> Result<(), MerkleError> {
    if depth == 0 || depth > MAX_DEPTH {
        return Err(MerkleError::Config(format!(
            "depth {depth} outside 1..={MAX_DEPTH}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fe(x: u64) -> FieldElement {
        FieldElement::from_u64(x)
    }

    #[test]
    fn empty_root_is_top_of_zero_cache() {
        for depth in 1..=6 {
            let t = IncrementalMerkleTree::poseidon(depth).unwrap();
            assert_eq!(t.zero_cache().len(), depth + 1);
            assert_eq!(t.zero_cache()[0], FieldElement::zero());
            assert_eq!(t.root(), t.zero_cache()[depth]);
        }
    }

    #[test]
    fn depth_bounds() {
        assert!(matches!(
            IncrementalMerkleTree::poseidon(0),
            Err(MerkleError::Config(_))
        ));
        assert!(IncrementalMerkleTree::poseidon(MAX_DEPTH + 1).is_err());
    }

    #[test]
    fn two_leaf_root_by_hand() {
        let p = CircomPoseidon;
        let mut t = IncrementalMerkleTree::poseidon(1).unwrap();
        t.insert(fe(1)).unwrap();
        t.insert(fe(2)).unwrap();
        assert_eq!(t.root(), p.hash_pair(fe(1), fe(2)).unwrap());
        assert!(matches!(t.insert(fe(3)), Err(MerkleError::Capacity { capacity: 2 })));
    }

    #[test]
    fn update_and_proofs() {
        let mut t = IncrementalMerkleTree::poseidon(3).unwrap();
        for i in 0..5 {
            t.insert(fe(i + 10)).unwrap();
        }
        t.update(3, fe(99)).unwrap();
        for i in 0..8 {
            let proof = t.create_proof(i).unwrap();
            assert_eq!(proof.len(), 3);
            assert!(t.verify_proof(t.leaf(i).unwrap(), &proof).unwrap());
        }
        assert!(matches!(t.update(8, fe(1)), Err(MerkleError::Index { .. })));
        assert!(matches!(t.update(6, fe(1)), Err(MerkleError::Unpopulated { .. })));
        assert!(matches!(t.create_proof(8), Err(MerkleError::Index { .. })));
    }

    #[test]
    fn subtree_siblings_match_leaf_proof_tail() {
        let mut t = IncrementalMerkleTree::poseidon(4).unwrap();
        for i in 0..6 {
            t.insert(fe(i + 1)).unwrap();
        }
        let leaf_proof = t.create_proof(5).unwrap();
        let sub = t.subtree_siblings(2, 1).unwrap();
        assert_eq!(sub.as_slice(), &leaf_proof.siblings[2..]);
    }
}
