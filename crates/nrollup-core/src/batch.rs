//! Transaction batches.
//!
//! A batch moves `Empty -> Accumulating -> Sealed`. Transfers apply to the
//! balance tree one at a time, each seeing the effects of the previous one.
//! For every transfer the builder records what a sequential circuit needs to
//! replay it:
//!
//! ```text
//! root_before ──(sender leaf: old -> debited)──▶ root_after_sender
//!             ──(receiver leaf: old -> credited)──▶ root_after_receiver
//! ```
//!
//! `sender_proof` opens the sender leaf against `root_before` and
//! `receiver_proof` opens the receiver leaf against `root_after_sender`. A
//! leaf's own update never changes its siblings, so the same paths also open
//! the updated leaves against the roots that follow.

use nrollup_crypto::{CircomPoseidon, FieldElement, HashScheme, Signature, SignatureVerifier, Signer};
use nrollup_merkle::MerkleProof;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    AccountLeaf, LedgerEvent, RollupError, RollupState, SubmitBatchCall, TxLeaf, TxLeafHashing,
};

/// Batch lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchPhase {
    /// No transfer applied yet.
    Empty,
    /// At least one transfer applied; not sealed.
    Accumulating,
    /// Sealed; immutable.
    Sealed,
}

/// A transfer as requested by the sender.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Sender index in the balance tree.
    pub from_index: u64,
    /// Receiver index in the balance tree.
    pub to_index: u64,
    /// Amount to move.
    pub amount: FieldElement,
    /// Token identifier; must match both accounts.
    pub token_type: FieldElement,
}

/// Everything recorded for one applied transfer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferWitness {
    /// Sender index.
    pub from_index: u64,
    /// Receiver index.
    pub to_index: u64,
    /// Transferred amount.
    pub amount: FieldElement,
    /// Token identifier.
    pub token_type: FieldElement,
    /// Sender leaf before the transfer.
    pub sender: AccountLeaf,
    /// Receiver leaf before the transfer.
    pub receiver: AccountLeaf,
    /// Sender path, valid against `root_before`.
    pub sender_proof: MerkleProof,
    /// Receiver path, valid against `root_after_sender`.
    pub receiver_proof: MerkleProof,
    /// Balance root before this transfer.
    pub root_before: FieldElement,
    /// Balance root after the sender debit.
    pub root_after_sender: FieldElement,
    /// Balance root after the receiver credit.
    pub root_after_receiver: FieldElement,
    /// Committed transaction leaf.
    pub tx_leaf: TxLeaf,
    /// Its hash under the configured convention.
    pub tx_hash: FieldElement,
    /// Sender signature over `tx_hash`.
    pub signature: Signature,
    /// Path of `tx_hash` against the sealed transaction root.
    pub tx_proof: MerkleProof,
}

/// Sealed batch: the input to the witness encoder and the batch submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchWitness {
    /// Balance tree depth.
    pub balance_depth: usize,
    /// Transaction tree depth.
    pub tx_depth: usize,
    /// Transaction-leaf hashing convention.
    pub tx_leaf_hashing: TxLeafHashing,
    /// Balance root before the batch.
    pub old_root: FieldElement,
    /// Balance root after the batch.
    pub new_root: FieldElement,
    /// Transaction tree root.
    pub tx_root: FieldElement,
    /// Transfers in submission order.
    pub transfers: Vec<TransferWitness>,
}

impl BatchWitness {
    /// Number of transfers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    /// `true` if the batch holds no transfers (never the case once sealed).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    /// Roots between updates: after each sender debit and after each receiver
    /// credit except the last, which is `new_root`.
    #[must_use]
    pub fn intermediate_roots(&self) -> Vec<FieldElement> {
        let mut roots = Vec::with_capacity(self.transfers.len() * 2);
        for t in &self.transfers {
            roots.push(t.root_after_sender);
            roots.push(t.root_after_receiver);
        }
        roots.pop();
        roots
    }

    /// Ledger submission carrying `proof`.
    #[must_use]
    pub fn submit_call(&self, proof: Vec<u8>) -> SubmitBatchCall {
        SubmitBatchCall {
            old_root: self.old_root,
            new_root: self.new_root,
            tx_root: self.tx_root,
            count: self.transfers.len() as u64,
            proof,
        }
    }

    /// Event the ledger emits when it accepts this batch.
    #[must_use]
    pub fn confirmation(&self) -> LedgerEvent {
        LedgerEvent::ConfirmBatch {
            old_root: self.old_root,
            new_root: self.new_root,
            count: self.transfers.len() as u64,
        }
    }
}

/// Sequences transfers against a mutably borrowed [`RollupState`].
///
/// Dropping a builder that has applied transfers without sealing halts the
/// state: the balance tree is ahead of anything the ledger can confirm.
pub struct TransactionBatchBuilder<'a, H: HashScheme + Clone = CircomPoseidon> {
    state: &'a mut RollupState<H>,
    verifier: &'a dyn SignatureVerifier,
    phase: BatchPhase,
    old_root: FieldElement,
    transfers: Vec<TransferWitness>,
}

impl<'a, H: HashScheme + Clone> TransactionBatchBuilder<'a, H> {
    pub(crate) fn new(state: &'a mut RollupState<H>, verifier: &'a dyn SignatureVerifier) -> Self {
        let old_root = state.root();
        Self {
            state,
            verifier,
            phase: BatchPhase::Empty,
            old_root,
            transfers: Vec::new(),
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> BatchPhase {
        self.phase
    }

    /// Transfers applied so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    /// `true` before the first transfer.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    /// Balance root the batch started from.
    #[must_use]
    pub const fn old_root(&self) -> FieldElement {
        self.old_root
    }

    /// Balance root after the transfers applied so far.
    #[must_use]
    pub fn current_root(&self) -> FieldElement {
        self.state.root()
    }

    /// Validate, sign, and apply one transfer; returns its transaction-tree
    /// index. On error nothing is changed.
    pub fn add_transfer<S: Signer + ?Sized>(
        &mut self,
        req: &TransferRequest,
        signer: &S,
    ) -> Result<u64, RollupError> {
        if self.phase == BatchPhase::Sealed {
            return Err(RollupError::SealedBatch);
        }
        self.state.ensure_live()?;
        let hashing = self.state.config.tx_leaf_hashing;
        let populated = self.state.accounts.len();

        for index in [req.from_index, req.to_index] {
            if index >= populated {
                return Err(RollupError::Index {
                    index,
                    limit: populated,
                });
            }
            if index == 0 {
                return Err(RollupError::InvalidTransfer(
                    "index 0 is the reserved empty leaf".into(),
                ));
            }
        }
        if req.from_index == req.to_index {
            return Err(RollupError::InvalidTransfer(format!(
                "sender and receiver are both index {}",
                req.from_index
            )));
        }
        let sender = self.state.accounts.get(req.from_index)?.clone();
        let receiver = self.state.accounts.get(req.to_index)?.clone();
        if sender.token_type != req.token_type || receiver.token_type != req.token_type {
            return Err(RollupError::InvalidTransfer(format!(
                "token type {} does not match sender {} / receiver {}",
                req.token_type, sender.token_type, receiver.token_type
            )));
        }
        if signer.public_key() != sender.pubkey {
            return Err(RollupError::InvalidTransfer(format!(
                "signer key does not own index {}",
                req.from_index
            )));
        }

        let tx_tree = self
            .state
            .tx_tree
            .as_ref()
            .ok_or_else(|| RollupError::Config("batch has no transaction tree".into()))?;
        if tx_tree.len() >= tx_tree.capacity() {
            return Err(RollupError::Capacity(format!(
                "transaction tree holds {} transfers",
                tx_tree.capacity() - 1
            )));
        }

        let tx_leaf = TxLeaf {
            from: sender.pubkey,
            from_index: req.from_index,
            to: receiver.pubkey,
            nonce: sender.nonce,
            amount: req.amount,
            token_type: req.token_type,
        };
        let hasher = self.state.tree.hasher();
        let tx_hash = tx_leaf.hash(hasher, hashing)?;
        let signature = signer.sign(tx_hash)?;
        if !self.verifier.verify(&sender.pubkey, tx_hash, &signature) {
            return Err(RollupError::InvalidSignature {
                from_index: req.from_index,
            });
        }

        let mut debited = sender.clone();
        debited.debit(req.amount)?;
        let mut credited = receiver.clone();
        credited.credit(req.amount)?;
        let debited_hash = debited.hash(hasher)?;
        let credited_hash = credited.hash(hasher)?;

        // Validation done; updates below only touch populated indices.
        let tree = &mut self.state.tree;
        let root_before = tree.root();
        let sender_proof = tree.create_proof(req.from_index)?;
        tree.update(req.from_index, debited_hash)?;
        let root_after_sender = tree.root();
        let receiver_proof = tree.create_proof(req.to_index)?;
        tree.update(req.to_index, credited_hash)?;
        let root_after_receiver = tree.root();

        self.state.accounts.set(req.from_index, debited)?;
        self.state.accounts.set(req.to_index, credited)?;
        let tx_index = match self.state.tx_tree.as_mut() {
            Some(t) => t.insert(tx_hash)?,
            None => return Err(RollupError::Config("batch has no transaction tree".into())),
        };

        self.transfers.push(TransferWitness {
            from_index: req.from_index,
            to_index: req.to_index,
            amount: req.amount,
            token_type: req.token_type,
            sender,
            receiver,
            sender_proof,
            receiver_proof,
            root_before,
            root_after_sender,
            root_after_receiver,
            tx_leaf,
            tx_hash,
            signature,
            tx_proof: MerkleProof {
                leaf_index: tx_index,
                siblings: Vec::new(),
            },
        });
        self.phase = BatchPhase::Accumulating;
        debug!(
            tx_index,
            from = req.from_index,
            to = req.to_index,
            root = %root_after_receiver,
            "transfer applied"
        );
        Ok(tx_index)
    }

    /// Finalise the batch: take transaction proofs against the final
    /// transaction root and register the expected ledger confirmation.
    pub fn seal(&mut self) -> Result<BatchWitness, RollupError> {
        match self.phase {
            BatchPhase::Sealed => return Err(RollupError::SealedBatch),
            BatchPhase::Empty => return Err(RollupError::EmptyBatch),
            BatchPhase::Accumulating => {}
        }
        let tx_tree = self
            .state
            .tx_tree
            .as_ref()
            .ok_or_else(|| RollupError::Config("batch has no transaction tree".into()))?;
        let mut transfers = self.transfers.clone();
        for t in &mut transfers {
            t.tx_proof = tx_tree.create_proof(t.tx_proof.leaf_index)?;
        }
        let witness = BatchWitness {
            balance_depth: self.state.config.balance_depth,
            tx_depth: self.state.config.tx_depth,
            tx_leaf_hashing: self.state.config.tx_leaf_hashing,
            old_root: self.old_root,
            new_root: self.state.root(),
            tx_root: tx_tree.root(),
            transfers,
        };
        self.phase = BatchPhase::Sealed;
        self.state.expected_roots.push_back(witness.confirmation());
        info!(
            count = witness.len(),
            old_root = %witness.old_root,
            new_root = %witness.new_root,
            tx_root = %witness.tx_root,
            "batch sealed"
        );
        Ok(witness)
    }
}

impl<H: HashScheme + Clone> Drop for TransactionBatchBuilder<'_, H> {
    fn drop(&mut self) {
        if self.phase == BatchPhase::Accumulating {
            warn!(applied = self.transfers.len(), "unsealed batch dropped");
            self.state.halt(format!(
                "batch from root {} abandoned after {} transfers",
                self.old_root,
                self.transfers.len()
            ));
        }
    }
}
