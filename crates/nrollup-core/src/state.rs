//! The rollup state engine.

use std::collections::VecDeque;

use nrollup_crypto::{CircomPoseidon, FieldElement, HashScheme, PublicKey, SignatureVerifier};
use nrollup_merkle::{IncrementalMerkleTree, MerkleError, TreeSnapshot};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    account::empty_root, AccountLeaf, AccountStore, DepositCall, DepositDescription, DepositFlush,
    DepositQueue, LedgerEvent, RollupConfig, RollupError, TransactionBatchBuilder, TxLeaf,
};

/// Snapshot format version.
pub const STATE_VERSION: u32 = 1;

/// Single writer over the balance tree.
///
/// Deposit flushes take `&mut self`, and so does [`Self::begin_batch`] for the
/// lifetime of the returned builder; the two phases cannot interleave.
#[derive(Debug)]
pub struct RollupState<H: HashScheme + Clone = CircomPoseidon> {
    pub(crate) config: RollupConfig,
    pub(crate) tree: IncrementalMerkleTree<H>,
    pub(crate) accounts: AccountStore,
    pub(crate) queue: DepositQueue,
    pub(crate) tx_tree: Option<IncrementalMerkleTree<H>>,
    pub(crate) confirmed_root: FieldElement,
    pub(crate) expected_deposits: VecDeque<LedgerEvent>,
    pub(crate) expected_roots: VecDeque<LedgerEvent>,
    pub(crate) halted: Option<String>,
}

impl RollupState<CircomPoseidon> {
    /// Poseidon-backed state.
    pub fn new(config: RollupConfig) -> Result<Self, RollupError> {
        Self::with_hasher(config, CircomPoseidon)
    }
}

impl<H: HashScheme + Clone> RollupState<H> {
    /// Empty state over `hasher`. The ledger's initial root is the empty-tree
    /// root, so that is the first confirmed root.
    pub fn with_hasher(config: RollupConfig, hasher: H) -> Result<Self, RollupError> {
        config.validate()?;
        let tree = IncrementalMerkleTree::new(config.balance_depth, hasher, FieldElement::zero())?;
        let confirmed_root = tree.root();
        Ok(Self {
            config,
            tree,
            accounts: AccountStore::new(),
            queue: DepositQueue::new(config.deposit_batch_log2),
            tx_tree: None,
            confirmed_root,
            expected_deposits: VecDeque::new(),
            expected_roots: VecDeque::new(),
            halted: None,
        })
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &RollupConfig {
        &self.config
    }

    /// Current balance root.
    #[must_use]
    pub fn root(&self) -> FieldElement {
        self.tree.root()
    }

    /// Balance tree (read only).
    #[must_use]
    pub const fn tree(&self) -> &IncrementalMerkleTree<H> {
        &self.tree
    }

    /// Hash scheme shared by every tree.
    #[must_use]
    pub const fn hasher(&self) -> &H {
        self.tree.hasher()
    }

    /// Plaintext accounts.
    #[must_use]
    pub const fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    /// Account at `index`.
    pub fn account(&self, index: u64) -> Result<&AccountLeaf, RollupError> {
        self.accounts.get(index)
    }

    /// Pending deposits.
    #[must_use]
    pub const fn deposit_queue(&self) -> &DepositQueue {
        &self.queue
    }

    /// Transaction tree of the most recent batch.
    #[must_use]
    pub const fn tx_tree(&self) -> Option<&IncrementalMerkleTree<H>> {
        self.tx_tree.as_ref()
    }

    /// Last root the ledger confirmed.
    #[must_use]
    pub const fn confirmed_root(&self) -> FieldElement {
        self.confirmed_root
    }

    /// Confirmations not yet reconciled: deposit requests first, then root
    /// transitions in order.
    pub fn pending_confirmations(&self) -> impl Iterator<Item = &LedgerEvent> + '_ {
        self.expected_deposits.iter().chain(self.expected_roots.iter())
    }

    /// Halt reason, if halted.
    #[must_use]
    pub fn halt_reason(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    /// `true` after a divergence until [`Self::resolve_halt`].
    #[must_use]
    pub const fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub(crate) fn ensure_live(&self) -> Result<(), RollupError> {
        match &self.halted {
            Some(reason) => Err(RollupError::Halted(reason.clone())),
            None => Ok(()),
        }
    }

    pub(crate) fn halt(&mut self, reason: String) {
        warn!(%reason, "rollup state halted");
        self.halted = Some(reason);
    }

    /// Halt on fatal errors, then pass the error through.
    fn check_fatal(&mut self, err: RollupError) -> RollupError {
        if err.is_fatal() {
            self.halt(err.to_string());
        }
        err
    }

    fn genesis_done(&self) -> bool {
        !self.tree.is_empty() || !self.queue.is_empty()
    }

    /// Queue the reserved empty leaf; must precede every other deposit.
    pub fn genesis_deposit(&mut self) -> Result<DepositCall, RollupError> {
        self.ensure_live()?;
        if self.genesis_done() {
            return Err(RollupError::Config(
                "reserved leaf already deposited".into(),
            ));
        }
        self.enqueue_deposit(AccountLeaf::reserved(), FieldElement::zero())
    }

    /// Queue a deposit of `amount` into a new account owned by `pubkey`.
    pub fn deposit(
        &mut self,
        pubkey: PublicKey,
        amount: FieldElement,
        token_type: FieldElement,
    ) -> Result<DepositCall, RollupError> {
        self.ensure_live()?;
        if !self.genesis_done() {
            return Err(RollupError::MissingGenesis);
        }
        let mut leaf = AccountLeaf::open(pubkey, token_type);
        leaf.credit(amount)?;
        self.enqueue_deposit(leaf, amount)
    }

    fn enqueue_deposit(
        &mut self,
        leaf: AccountLeaf,
        amount: FieldElement,
    ) -> Result<DepositCall, RollupError> {
        let used = self.tree.len() + self.queue.len();
        if used >= self.tree.capacity() {
            return Err(RollupError::Capacity(format!(
                "balance tree has {used} of {} slots used or queued",
                self.tree.capacity()
            )));
        }
        let call = DepositCall {
            pubkey: leaf.pubkey,
            amount,
            token_type: leaf.token_type,
        };
        self.queue.enqueue(leaf, self.tree.hasher())?;
        self.expected_deposits.push_back(LedgerEvent::from(&call));
        Ok(call)
    }

    /// Audit view of the pending deposit batch.
    pub fn describe_deposits(&self) -> Result<DepositDescription, RollupError> {
        self.queue.describe(self.tree.hasher(), self.tree.zero_cache())
    }

    /// Merge the full deposit batch into the balance tree.
    pub fn process_deposits(&mut self) -> Result<DepositFlush, RollupError> {
        self.ensure_live()?;
        let (flush, leaves) = match self.queue.flush(&mut self.tree) {
            Ok(v) => v,
            Err(e) => return Err(self.check_fatal(e)),
        };
        self.accounts.extend(leaves);
        self.expected_roots.push_back(LedgerEvent::ConfirmDeposit {
            old_root: flush.old_root,
            new_root: flush.new_root,
            count: flush.count,
        });
        Ok(flush)
    }

    /// Open a transaction batch against the current root.
    ///
    /// `verifier` checks every transfer signature before it is applied.
    pub fn begin_batch<'a>(
        &'a mut self,
        verifier: &'a dyn SignatureVerifier,
    ) -> Result<TransactionBatchBuilder<'a, H>, RollupError> {
        self.ensure_live()?;
        let hasher = self.tree.hasher().clone();
        let reserved = TxLeaf::default().hash(&hasher, self.config.tx_leaf_hashing)?;
        let mut tx_tree =
            IncrementalMerkleTree::new(self.config.tx_depth, hasher, FieldElement::zero())?;
        tx_tree.insert(reserved)?;
        self.tx_tree = Some(tx_tree);
        debug!(root = %self.root(), "batch opened");
        Ok(TransactionBatchBuilder::new(self, verifier))
    }

    /// Check a ledger event against the next expected confirmation.
    ///
    /// Any mismatch halts the state.
    pub fn reconcile(&mut self, event: &LedgerEvent) -> Result<(), RollupError> {
        self.ensure_live()?;
        let queue = match event {
            LedgerEvent::RequestDeposit { .. } => &mut self.expected_deposits,
            LedgerEvent::ConfirmDeposit { .. } | LedgerEvent::ConfirmBatch { .. } => {
                &mut self.expected_roots
            }
        };
        match queue.pop_front() {
            Some(expected) if expected == *event => {
                if let Some(root) = event.new_root() {
                    self.confirmed_root = root;
                    info!(%root, "ledger confirmation reconciled");
                }
                Ok(())
            }
            Some(expected) => {
                let err = RollupError::StateDivergence(format!(
                    "expected {expected:?}, ledger emitted {event:?}"
                ));
                Err(self.check_fatal(err))
            }
            None => {
                let err = RollupError::StateDivergence(format!("unexpected ledger event {event:?}"));
                Err(self.check_fatal(err))
            }
        }
    }

    /// Clear a halt once the operator has repaired the state so that its root
    /// equals `ledger_root`. Outstanding expectations are dropped.
    pub fn resolve_halt(&mut self, ledger_root: FieldElement) -> Result<(), RollupError> {
        if self.tree.root() != ledger_root {
            return Err(RollupError::StateDivergence(format!(
                "local root {} still differs from ledger root {ledger_root}",
                self.tree.root()
            )));
        }
        if let Some(reason) = self.halted.take() {
            info!(%reason, root = %ledger_root, "halt resolved");
        }
        self.expected_deposits.clear();
        self.expected_roots.clear();
        self.confirmed_root = ledger_root;
        Ok(())
    }

    /// Persistable copy of the state.
    pub fn snapshot(&self) -> Result<StateSnapshot, RollupError> {
        Ok(StateSnapshot {
            version: STATE_VERSION,
            config: self.config,
            zero_cache: self.tree.zero_cache().to_vec(),
            balance_tree: self.tree.snapshot()?,
            accounts: self.accounts.clone(),
            pending_deposits: self.queue.pending().to_vec(),
            confirmed_root: self.confirmed_root,
            expected_deposits: self.expected_deposits.iter().cloned().collect(),
            expected_roots: self.expected_roots.iter().cloned().collect(),
            halted: self.halted.clone(),
        })
    }

    /// Rebuild from a snapshot, checking every stored hash against `hasher`.
    pub fn from_snapshot(snap: StateSnapshot, hasher: H) -> Result<Self, RollupError> {
        if snap.version != STATE_VERSION {
            return Err(RollupError::Config(format!(
                "state version {} unsupported (expected {STATE_VERSION})",
                snap.version
            )));
        }
        snap.config.validate()?;
        if snap.balance_tree.depth != snap.config.balance_depth {
            return Err(snapshot_err(format!(
                "tree depth {} != configured balance_depth {}",
                snap.balance_tree.depth, snap.config.balance_depth
            )));
        }
        let tree = IncrementalMerkleTree::from_snapshot(&snap.balance_tree, hasher)?;
        if tree.zero_cache() != snap.zero_cache.as_slice() {
            return Err(snapshot_err("zero cache does not match hash scheme".into()));
        }
        if snap.accounts.len() != tree.len() {
            return Err(snapshot_err(format!(
                "{} accounts for {} tree leaves",
                snap.accounts.len(),
                tree.len()
            )));
        }
        for (i, leaf) in snap.accounts.iter() {
            if leaf.hash(tree.hasher())? != tree.leaf(i)? {
                return Err(snapshot_err(format!("account {i} does not match its leaf")));
            }
        }
        if let Some((_, first)) = snap.accounts.iter().next() {
            if first.hash(tree.hasher())? != empty_root(tree.hasher())? {
                return Err(snapshot_err("leaf 0 is not the reserved empty leaf".into()));
            }
        }
        // With an empty tree the next flush lands at index 0.
        if tree.is_empty() {
            if let Some(first) = snap.pending_deposits.first() {
                if !first.is_reserved() {
                    return Err(snapshot_err(
                        "first pending deposit is not the reserved empty leaf".into(),
                    ));
                }
            }
        }
        let queue = DepositQueue::restore(
            snap.config.deposit_batch_log2,
            snap.pending_deposits,
            tree.hasher(),
        )?;
        Ok(Self {
            config: snap.config,
            tree,
            accounts: snap.accounts,
            queue,
            tx_tree: None,
            confirmed_root: snap.confirmed_root,
            expected_deposits: snap.expected_deposits.into(),
            expected_roots: snap.expected_roots.into(),
            halted: snap.halted,
        })
    }
}

fn snapshot_err(msg: String) -> RollupError {
    MerkleError::Snapshot(msg).into()
}

/// Persisted [`RollupState`]. The per-batch transaction tree is never saved.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Format version.
    pub version: u32,
    /// Configuration in force.
    pub config: RollupConfig,
    /// Balance tree zero cache (checked on restore).
    pub zero_cache: Vec<FieldElement>,
    /// Balance tree leaves and root.
    pub balance_tree: TreeSnapshot,
    /// Plaintext accounts by index.
    pub accounts: AccountStore,
    /// Deposits queued but not flushed.
    pub pending_deposits: Vec<AccountLeaf>,
    /// Last ledger-confirmed root.
    pub confirmed_root: FieldElement,
    /// Deposit requests awaiting their ledger event.
    pub expected_deposits: Vec<LedgerEvent>,
    /// Root transitions awaiting their ledger event.
    pub expected_roots: Vec<LedgerEvent>,
    /// Halt reason, if halted.
    pub halted: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pk(x: u64) -> PublicKey {
        PublicKey::new(FieldElement::from_u64(x), FieldElement::from_u64(x + 100))
    }

    #[test]
    fn genesis_is_required_first() {
        let mut s = RollupState::new(RollupConfig::default()).unwrap();
        assert!(matches!(
            s.deposit(pk(1), FieldElement::from_u64(5), FieldElement::from_u64(1)),
            Err(RollupError::MissingGenesis)
        ));
        s.genesis_deposit().unwrap();
        assert!(s.genesis_deposit().is_err());
        s.deposit(pk(1), FieldElement::from_u64(5), FieldElement::from_u64(1))
            .unwrap();
        assert_eq!(s.deposit_queue().len(), 2);
        assert_eq!(s.pending_confirmations().count(), 2);
    }

    #[test]
    fn fresh_confirmed_root_is_empty_tree_root() {
        let s = RollupState::new(RollupConfig::default()).unwrap();
        assert_eq!(s.confirmed_root(), s.tree().zero_cache()[4]);
        assert_eq!(s.root(), s.confirmed_root());
    }

    #[test]
    fn unexpected_event_halts() {
        let mut s = RollupState::new(RollupConfig::default()).unwrap();
        let bogus = LedgerEvent::ConfirmBatch {
            old_root: FieldElement::zero(),
            new_root: FieldElement::zero(),
            count: 1,
        };
        assert!(matches!(s.reconcile(&bogus), Err(RollupError::StateDivergence(_))));
        assert!(s.is_halted());
        assert!(matches!(s.genesis_deposit(), Err(RollupError::Halted(_))));
        assert!(s.resolve_halt(FieldElement::from_u64(9)).is_err());
        s.resolve_halt(s.root()).unwrap();
        assert!(!s.is_halted());
        s.genesis_deposit().unwrap();
    }
}
