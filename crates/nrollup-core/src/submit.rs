//! Ledger submission.
//!
//! Submission happens after a batch or flush is final in memory. It is async,
//! bounded by a timeout, and cancellable; none of that touches the sealed
//! state, so a failed attempt is retried with the same call value.

use std::future::Future;
use std::time::Duration;

use nrollup_crypto::{CircomPoseidon, FieldElement, HashScheme};
use nrollup_merkle::{merge_subtree, zero_cache};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    AccountLeaf, DepositCall, LedgerCall, LedgerEvent, ProcessDepositsCall, RollupError,
    SubmitBatchCall, SubtreeStack,
};

/// Anchor-ledger transport.
pub trait LedgerPort: Send + Sync {
    /// Send `call` and return the events it emitted.
    fn submit(
        &self,
        call: &LedgerCall,
    ) -> impl Future<Output = Result<Vec<LedgerEvent>, RollupError>> + Send;
}

/// Submit `call` through `port`, giving up after `timeout`.
pub async fn submit_sealed<P: LedgerPort + ?Sized>(
    port: &P,
    call: &LedgerCall,
    timeout: Duration,
) -> Result<Vec<LedgerEvent>, RollupError> {
    if let Ok(res) = tokio::time::timeout(timeout, port.submit(call)).await {
        res
    } else {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        warn!(millis, "ledger submission timed out");
        Err(RollupError::Timeout { millis })
    }
}

#[derive(Debug)]
struct LedgerInner {
    root: FieldElement,
    next_leaf: u64,
    stack: SubtreeStack,
}

/// In-process model of the anchor ledger contract.
///
/// Keeps only what the contract keeps: the balance root, the pending
/// deposit stack, and the number of merged leaves. Batch proofs are accepted
/// as opaque bytes.
#[derive(Debug)]
pub struct InMemoryLedger<H: HashScheme = CircomPoseidon> {
    hasher: H,
    depth: usize,
    zero_cache: Vec<FieldElement>,
    inner: Mutex<LedgerInner>,
}

impl InMemoryLedger<CircomPoseidon> {
    /// Poseidon ledger for a balance tree of `depth`.
    pub fn new(depth: usize) -> Result<Self, RollupError> {
        Self::with_hasher(depth, CircomPoseidon)
    }
}

impl<H: HashScheme> InMemoryLedger<H> {
    /// Ledger whose initial root is the empty tree of `depth`.
    pub fn with_hasher(depth: usize, hasher: H) -> Result<Self, RollupError> {
        let zc = zero_cache(depth, &hasher, FieldElement::zero())?;
        let root = zc[depth];
        Ok(Self {
            hasher,
            depth,
            zero_cache: zc,
            inner: Mutex::new(LedgerInner {
                root,
                next_leaf: 0,
                stack: SubtreeStack::new(),
            }),
        })
    }

    /// Current balance root.
    pub async fn root(&self) -> FieldElement {
        self.inner.lock().await.root
    }

    /// Pending deposit stack roots (`describeDeposits`).
    pub async fn describe_deposits(&self) -> Vec<FieldElement> {
        self.inner.lock().await.stack.roots()
    }

    fn deposit(
        &self,
        inner: &mut LedgerInner,
        call: &DepositCall,
    ) -> Result<LedgerEvent, RollupError> {
        let leaf = AccountLeaf::new(call.pubkey, call.amount, FieldElement::zero(), call.token_type);
        inner.stack.push(leaf.hash(&self.hasher)?, &self.hasher)?;
        Ok(LedgerEvent::from(call))
    }

    fn process_deposits(
        &self,
        inner: &mut LedgerInner,
        call: &ProcessDepositsCall,
    ) -> Result<LedgerEvent, RollupError> {
        let height = call.batch_size_log2 as usize;
        let levels = self.depth.checked_sub(height).ok_or_else(|| {
            RollupError::Submission(format!("subtree height {height} exceeds depth"))
        })?;
        if call.position.len() != levels || call.proof.len() != levels {
            return Err(RollupError::Submission(format!(
                "expected {levels} position bits and siblings, got {} / {}",
                call.position.len(),
                call.proof.len()
            )));
        }
        let subtree = match inner.stack.entries().first() {
            Some(e) if e.height == call.batch_size_log2 => e.root,
            _ => {
                return Err(RollupError::Submission(format!(
                    "no complete deposit subtree of height {height}"
                )))
            }
        };
        let bits: Vec<bool> = call.position.iter().map(|b| *b != 0).collect();
        let position = bits
            .iter()
            .rev()
            .fold(0u64, |acc, b| (acc << 1) | u64::from(*b));
        let count = 1u64 << call.batch_size_log2;
        if position != inner.next_leaf >> call.batch_size_log2 {
            return Err(RollupError::Submission(format!(
                "position {position} is not the next free subtree"
            )));
        }
        let old_root = merge_subtree(&self.hasher, self.zero_cache[height], &bits, &call.proof)?;
        if old_root != inner.root {
            return Err(RollupError::Submission(
                "proof does not open an empty slot under the current root".into(),
            ));
        }
        let new_root = merge_subtree(&self.hasher, subtree, &bits, &call.proof)?;
        inner.stack.take_front(call.batch_size_log2);
        inner.root = new_root;
        inner.next_leaf += count;
        Ok(LedgerEvent::ConfirmDeposit {
            old_root,
            new_root,
            count,
        })
    }

    fn submit_batch(
        inner: &mut LedgerInner,
        call: &SubmitBatchCall,
    ) -> Result<LedgerEvent, RollupError> {
        if call.old_root != inner.root {
            return Err(RollupError::Submission(format!(
                "batch starts from {} but ledger root is {}",
                call.old_root, inner.root
            )));
        }
        inner.root = call.new_root;
        Ok(LedgerEvent::ConfirmBatch {
            old_root: call.old_root,
            new_root: call.new_root,
            count: call.count,
        })
    }
}

impl<H: HashScheme> LedgerPort for InMemoryLedger<H> {
    async fn submit(&self, call: &LedgerCall) -> Result<Vec<LedgerEvent>, RollupError> {
        let mut inner = self.inner.lock().await;
        let event = match call {
            LedgerCall::Deposit(c) => self.deposit(&mut inner, c)?,
            LedgerCall::ProcessDeposits(c) => self.process_deposits(&mut inner, c)?,
            LedgerCall::SubmitBatch(c) => Self::submit_batch(&mut inner, c)?,
        };
        debug!(?event, "ledger emitted");
        Ok(vec![event])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nrollup_crypto::PublicKey;

    struct Stalled;

    impl LedgerPort for Stalled {
        async fn submit(&self, _call: &LedgerCall) -> Result<Vec<LedgerEvent>, RollupError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    fn deposit(x: u64, amount: u64) -> LedgerCall {
        LedgerCall::Deposit(DepositCall {
            pubkey: PublicKey::new(FieldElement::from_u64(x), FieldElement::from_u64(x)),
            amount: FieldElement::from_u64(amount),
            token_type: FieldElement::from_u64(1),
        })
    }

    #[tokio::test]
    async fn timeout_reported() {
        let call = deposit(1, 1);
        let err = submit_sealed(&Stalled, &call, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert_eq!(err, RollupError::Timeout { millis: 10 });
    }

    #[tokio::test]
    async fn ledger_rejects_stale_batch() {
        let ledger = InMemoryLedger::new(4).unwrap();
        let call = LedgerCall::SubmitBatch(SubmitBatchCall {
            old_root: FieldElement::from_u64(5),
            new_root: FieldElement::from_u64(6),
            tx_root: FieldElement::zero(),
            count: 1,
            proof: Vec::new(),
        });
        let err = submit_sealed(&ledger, &call, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RollupError::Submission(_)));
    }

    #[tokio::test]
    async fn ledger_stack_tracks_deposits() {
        let ledger = InMemoryLedger::new(4).unwrap();
        for x in 0..3 {
            submit_sealed(&ledger, &deposit(x + 1, x), Duration::from_secs(1))
                .await
                .unwrap();
        }
        assert_eq!(ledger.describe_deposits().await.len(), 2);
        let premature = LedgerCall::ProcessDeposits(ProcessDepositsCall {
            batch_size_log2: 2,
            position: vec![0, 0],
            proof: vec![FieldElement::zero(); 2],
        });
        assert!(ledger.submit(&premature).await.is_err());
    }
}
