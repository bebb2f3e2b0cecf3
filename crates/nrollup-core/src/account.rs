//! Account leaves.
//!
//! The balance tree stores only `hash(leaf)`; the plaintext leaf lives in the
//! [`AccountStore`] at the same index so later transfers can rebuild it.

use nrollup_crypto::{FieldElement, HashScheme, PublicKey};
use serde::{Deserialize, Serialize};

use crate::RollupError;

/// Per-account ledger entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountLeaf {
    /// Owner key.
    pub pubkey: PublicKey,
    /// Token balance.
    pub balance: FieldElement,
    /// Number of debits applied so far.
    pub nonce: FieldElement,
    /// Token identifier.
    pub token_type: FieldElement,
}

impl AccountLeaf {
    /// Leaf with an explicit state.
    #[must_use]
    pub const fn new(
        pubkey: PublicKey,
        balance: FieldElement,
        nonce: FieldElement,
        token_type: FieldElement,
    ) -> Self {
        Self {
            pubkey,
            balance,
            nonce,
            token_type,
        }
    }

    /// Fresh zero-balance, zero-nonce account.
    #[must_use]
    pub fn open(pubkey: PublicKey, token_type: FieldElement) -> Self {
        Self::new(pubkey, FieldElement::zero(), FieldElement::zero(), token_type)
    }

    /// The all-zero leaf reserved at index 0.
    #[must_use]
    pub fn reserved() -> Self {
        Self::default()
    }

    /// `true` for the all-zero leaf.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        *self == Self::reserved()
    }

    /// Hash pre-image order: `[pk.x, pk.y, balance, nonce, token_type]`.
    #[must_use]
    pub const fn to_array(&self) -> [FieldElement; 5] {
        [
            self.pubkey.x,
            self.pubkey.y,
            self.balance,
            self.nonce,
            self.token_type,
        ]
    }

    /// Leaf hash stored in the balance tree.
    pub fn hash<H: HashScheme + ?Sized>(&self, hasher: &H) -> Result<FieldElement, RollupError> {
        Ok(hasher.hash(&self.to_array())?)
    }

    /// `balance += amount`; the nonce is untouched.
    pub fn credit(&mut self, amount: FieldElement) -> Result<(), RollupError> {
        self.balance = self.balance.checked_add(&amount).ok_or_else(|| {
            RollupError::Overflow(format!("credit of {amount} to balance {}", self.balance))
        })?;
        Ok(())
    }

    /// `balance -= amount; nonce += 1`. Nothing changes on failure.
    pub fn debit(&mut self, amount: FieldElement) -> Result<(), RollupError> {
        let balance = self
            .balance
            .checked_sub(&amount)
            .ok_or(RollupError::InsufficientBalance {
                balance: self.balance,
                amount,
            })?;
        let nonce = self
            .nonce
            .checked_increment()
            .ok_or_else(|| RollupError::Overflow(format!("nonce {} at field maximum", self.nonce)))?;
        self.balance = balance;
        self.nonce = nonce;
        Ok(())
    }
}

/// Hash of [`AccountLeaf::reserved`]: leaf 0 of every balance tree.
pub fn empty_root<H: HashScheme + ?Sized>(hasher: &H) -> Result<FieldElement, RollupError> {
    AccountLeaf::reserved().hash(hasher)
}

/// Plaintext leaves indexed like the balance tree.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountStore {
    leaves: Vec<AccountLeaf>,
}

impl AccountStore {
    /// Empty store.
    #[must_use]
    pub const fn new() -> Self {
        Self { leaves: Vec::new() }
    }

    /// Number of stored leaves.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.leaves.len() as u64
    }

    /// `true` when nothing was stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Leaf at `index`.
    pub fn get(&self, index: u64) -> Result<&AccountLeaf, RollupError> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.leaves.get(i))
            .ok_or(RollupError::Index {
                index,
                limit: self.len(),
            })
    }

    /// Overwrite the leaf at `index`.
    pub fn set(&mut self, index: u64, leaf: AccountLeaf) -> Result<(), RollupError> {
        let limit = self.len();
        let slot = usize::try_from(index)
            .ok()
            .and_then(|i| self.leaves.get_mut(i))
            .ok_or(RollupError::Index { index, limit })?;
        *slot = leaf;
        Ok(())
    }

    /// Append leaves in tree order.
    pub fn extend<I: IntoIterator<Item = AccountLeaf>>(&mut self, leaves: I) {
        self.leaves.extend(leaves);
    }

    /// Iterate `(index, leaf)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &AccountLeaf)> + '_ {
        self.leaves.iter().enumerate().map(|(i, l)| (i as u64, l))
    }

    /// First index holding `pubkey`, skipping the reserved leaf.
    #[must_use]
    pub fn find(&self, pubkey: &PublicKey) -> Option<u64> {
        self.iter()
            .skip(1)
            .find(|(_, l)| l.pubkey == *pubkey)
            .map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nrollup_crypto::CircomPoseidon;

    fn fe(x: u64) -> FieldElement {
        FieldElement::from_u64(x)
    }

    fn alice() -> AccountLeaf {
        AccountLeaf::new(PublicKey::new(fe(11), fe(12)), fe(100), fe(0), fe(1))
    }

    #[test]
    fn hash_matches_flat_preimage() {
        let p = CircomPoseidon;
        let a = alice();
        assert_eq!(a.hash(&p).unwrap(), p.hash(&[fe(11), fe(12), fe(100), fe(0), fe(1)]).unwrap());
        assert_eq!(
            empty_root(&p).unwrap(),
            p.hash(&[FieldElement::zero(); 5]).unwrap()
        );
    }

    #[test]
    fn debit_then_credit_bumps_nonce_once() {
        let mut a = alice();
        a.debit(fe(40)).unwrap();
        a.credit(fe(40)).unwrap();
        assert_eq!(a.balance, fe(100));
        assert_eq!(a.nonce, fe(1));
    }

    #[test]
    fn failed_debit_leaves_state() {
        let mut a = alice();
        let err = a.debit(fe(101)).unwrap_err();
        assert!(matches!(err, RollupError::InsufficientBalance { .. }));
        assert_eq!(a, alice());
        a.debit(fe(100)).unwrap();
        assert!(a.balance.is_zero());
    }

    #[test]
    fn credit_overflow_rejected() {
        let mut a = alice();
        // p - 1
        let near_max = FieldElement::from_hex(
            "0x30644e72e131a029b85045b68181585d2833e84879b9709143e1f593f0000000",
        )
        .unwrap();
        assert!(matches!(a.credit(near_max), Err(RollupError::Overflow(_))));
        assert_eq!(a.balance, fe(100));
    }

    #[test]
    fn store_lookup() {
        let mut s = AccountStore::new();
        s.extend([AccountLeaf::reserved(), alice()]);
        assert_eq!(s.find(&alice().pubkey), Some(1));
        assert!(s.find(&PublicKey::zero()).is_none());
        assert!(matches!(s.get(2), Err(RollupError::Index { index: 2, limit: 2 })));
        s.set(1, AccountLeaf::reserved()).unwrap();
        assert!(s.get(1).unwrap().is_reserved());
    }
}
