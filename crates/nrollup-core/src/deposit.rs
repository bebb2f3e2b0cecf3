//! Deposit batching.
//!
//! Deposits accumulate as a stack of subtree roots. Each new leaf is pushed
//! at height 0 and the two top entries are merged while their heights match,
//! so after `2^k` deposits the stack holds a single root at height `k`. The
//! ledger keeps the same stack, which makes the two sides comparable after
//! every deposit and not only at flush time.
//!
//! A flush inserts the completed batch as an aligned subtree of the balance
//! tree. Before touching the tree it recomputes the current root from the
//! empty-subtree value and the siblings above the slot, exactly as the
//! ledger's `processDeposits` does; after inserting it recomputes the new
//! root from the batch root and the same siblings.

use nrollup_crypto::{FieldElement, HashScheme};
use nrollup_merkle::{merge_subtree, path_bits, IncrementalMerkleTree};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{AccountLeaf, RollupError};

/// One entry of the pending-subtree stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSubtree {
    /// Subtree height (0 for a single leaf).
    pub height: u32,
    /// Subtree root.
    pub root: FieldElement,
}

/// Eagerly merged stack of pending subtree roots.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubtreeStack {
    entries: Vec<PendingSubtree>,
}

impl SubtreeStack {
    /// Empty stack.
    #[must_use]
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Push a leaf hash and merge equal-height tops.
    pub fn push<H: HashScheme + ?Sized>(
        &mut self,
        leaf_hash: FieldElement,
        hasher: &H,
    ) -> Result<(), RollupError> {
        let mut cur = PendingSubtree {
            height: 0,
            root: leaf_hash,
        };
        while let Some(top) = self.entries.last().copied() {
            if top.height != cur.height {
                break;
            }
            self.entries.pop();
            cur = PendingSubtree {
                height: cur.height + 1,
                root: hasher.hash_pair(top.root, cur.root)?,
            };
        }
        self.entries.push(cur);
        Ok(())
    }

    /// Remove and return the oldest entry if it is a complete subtree of
    /// `height`.
    pub fn take_front(&mut self, height: u32) -> Option<FieldElement> {
        match self.entries.first() {
            Some(e) if e.height == height => Some(self.entries.remove(0).root),
            _ => None,
        }
    }

    /// Entries bottom to top.
    #[must_use]
    pub fn entries(&self) -> &[PendingSubtree] {
        &self.entries
    }

    /// Roots bottom to top (the ledger's `describeDeposits` view).
    #[must_use]
    pub fn roots(&self) -> Vec<FieldElement> {
        self.entries.iter().map(|e| e.root).collect()
    }

    /// `true` when nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Audit view of the pending batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositDescription {
    /// Plaintext leaves in arrival order.
    pub leaves: Vec<AccountLeaf>,
    /// Their hashes.
    pub leaf_hashes: Vec<FieldElement>,
    /// Pending-subtree stack roots, bottom to top.
    pub stack: Vec<FieldElement>,
    /// Root of the batch subtree with empty slots filled from the zero cache.
    pub subtree_root: FieldElement,
    /// Configured batch size.
    pub batch_size: u64,
}

/// Outcome of merging one deposit batch into the balance tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositFlush {
    /// Balance root before the merge.
    pub old_root: FieldElement,
    /// Balance root after the merge.
    pub new_root: FieldElement,
    /// Number of leaves merged.
    pub count: u64,
    /// Subtree height.
    pub batch_size_log2: u32,
    /// Subtree index at height `batch_size_log2`.
    pub position: u64,
    /// Siblings from the subtree root up to the balance root.
    pub proof: Vec<FieldElement>,
}

impl DepositFlush {
    /// Direction bits for [`Self::proof`], lowest level first.
    #[must_use]
    pub fn position_bits(&self) -> Vec<bool> {
        path_bits(self.position, self.proof.len())
    }
}

/// Pending deposits for the next flush.
#[derive(Clone, Debug)]
pub struct DepositQueue {
    batch_log2: u32,
    pending: Vec<AccountLeaf>,
    hashes: Vec<FieldElement>,
    stack: SubtreeStack,
}

impl DepositQueue {
    /// Empty queue flushing in batches of `2^batch_log2`.
    #[must_use]
    pub const fn new(batch_log2: u32) -> Self {
        Self {
            batch_log2,
            pending: Vec::new(),
            hashes: Vec::new(),
            stack: SubtreeStack::new(),
        }
    }

    /// Rebuild a queue holding `leaves`.
    pub fn restore<H: HashScheme + ?Sized>(
        batch_log2: u32,
        leaves: Vec<AccountLeaf>,
        hasher: &H,
    ) -> Result<Self, RollupError> {
        let mut q = Self::new(batch_log2);
        for leaf in leaves {
            q.enqueue(leaf, hasher)?;
        }
        Ok(q)
    }

    /// `log2` of the batch size.
    #[inline]
    #[must_use]
    pub const fn batch_log2(&self) -> u32 {
        self.batch_log2
    }

    /// Leaves per flush.
    #[inline]
    #[must_use]
    pub const fn batch_size(&self) -> u64 {
        1u64 << self.batch_log2
    }

    /// Leaves queued so far.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.pending.len() as u64
    }

    /// `true` when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// `true` once a full batch is waiting.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() >= self.batch_size()
    }

    /// Queued plaintext leaves.
    #[must_use]
    pub fn pending(&self) -> &[AccountLeaf] {
        &self.pending
    }

    /// Pending-subtree stack.
    #[must_use]
    pub const fn stack(&self) -> &SubtreeStack {
        &self.stack
    }

    /// Queue `leaf`; returns its slot within the batch.
    pub fn enqueue<H: HashScheme + ?Sized>(
        &mut self,
        leaf: AccountLeaf,
        hasher: &H,
    ) -> Result<u64, RollupError> {
        if self.is_full() {
            return Err(RollupError::BatchFull {
                batch_size: self.batch_size(),
            });
        }
        let hash = leaf.hash(hasher)?;
        self.stack.push(hash, hasher)?;
        self.pending.push(leaf);
        self.hashes.push(hash);
        let slot = self.len() - 1;
        debug!(slot, leaf = %hash, "deposit queued");
        Ok(slot)
    }

    /// Batch subtree root, padding missing leaves with `zero_cache` values.
    pub fn subtree_root<H: HashScheme + ?Sized>(
        &self,
        hasher: &H,
        zero_cache: &[FieldElement],
    ) -> Result<FieldElement, RollupError> {
        let levels = self.batch_log2 as usize;
        if zero_cache.len() <= levels {
            return Err(RollupError::Config(format!(
                "zero cache of {} entries too short for subtree height {levels}",
                zero_cache.len()
            )));
        }
        let mut layer = self.hashes.clone();
        for zero in &zero_cache[..levels] {
            if layer.is_empty() {
                layer.push(*zero);
            }
            layer = layer
                .chunks(2)
                .map(|pair| hasher.hash_pair(pair[0], pair.get(1).copied().unwrap_or(*zero)))
                .collect::<Result<_, _>>()?;
        }
        Ok(layer.first().copied().unwrap_or(zero_cache[levels]))
    }

    /// Snapshot of the pending batch for auditing.
    pub fn describe<H: HashScheme + ?Sized>(
        &self,
        hasher: &H,
        zero_cache: &[FieldElement],
    ) -> Result<DepositDescription, RollupError> {
        Ok(DepositDescription {
            leaves: self.pending.clone(),
            leaf_hashes: self.hashes.clone(),
            stack: self.stack.roots(),
            subtree_root: self.subtree_root(hasher, zero_cache)?,
            batch_size: self.batch_size(),
        })
    }

    /// Merge the full batch into `tree` and reset the queue.
    ///
    /// Returns the flush record and the plaintext leaves now in the tree.
    pub fn flush<H: HashScheme>(
        &mut self,
        tree: &mut IncrementalMerkleTree<H>,
    ) -> Result<(DepositFlush, Vec<AccountLeaf>), RollupError> {
        let batch_size = self.batch_size();
        if !self.is_full() {
            return Err(RollupError::IncompleteBatch {
                pending: self.len(),
                batch_size,
            });
        }
        let height = self.batch_log2 as usize;
        if tree.len() % batch_size != 0 {
            return Err(RollupError::Config(format!(
                "tree length {} not aligned to deposit batch size {batch_size}",
                tree.len()
            )));
        }
        if tree.len() + batch_size > tree.capacity() {
            return Err(RollupError::Capacity(format!(
                "balance tree has {} of {} slots used",
                tree.len(),
                tree.capacity()
            )));
        }
        let subtree_root = match self.stack.entries() {
            [only] if only.height == self.batch_log2 => only.root,
            other => {
                return Err(RollupError::StateDivergence(format!(
                    "full deposit batch left {} stack entries",
                    other.len()
                )))
            }
        };

        let position = tree.len() >> self.batch_log2;
        let proof = tree.subtree_siblings(height, position)?;
        let bits = path_bits(position, proof.len());
        let old_root = tree.root();
        let empty_slot = tree.zero_cache()[height];
        if merge_subtree(tree.hasher(), empty_slot, &bits, &proof)? != old_root {
            return Err(RollupError::StateDivergence(format!(
                "empty slot at position {position} does not reproduce root {old_root}"
            )));
        }

        tree.insert_subtree(&self.hashes)?;
        let new_root = tree.root();
        let merged = merge_subtree(tree.hasher(), subtree_root, &bits, &proof)?;
        if merged != new_root {
            return Err(RollupError::StateDivergence(format!(
                "merged deposit root {merged} != tree root {new_root}"
            )));
        }

        let leaves = std::mem::take(&mut self.pending);
        self.hashes.clear();
        self.stack.clear();
        info!(count = batch_size, position, %old_root, %new_root, "deposit batch flushed");
        Ok((
            DepositFlush {
                old_root,
                new_root,
                count: batch_size,
                batch_size_log2: self.batch_log2,
                position,
                proof,
            },
            leaves,
        ))
    }
}
