//! Stand-alone replay of a canonical witness.
//!
//! Mirrors what the circuit asserts, one transfer at a time:
//!
//! 1. the sender leaf opens against the running root and its debited form
//!    against the next intermediate root,
//! 2. the receiver leaf does the same for the credit,
//! 3. the transaction leaf rebuilt from the arrays hashes to the signed
//!    message, sits at index `i + 1` of the transaction tree, and carries a
//!    valid sender signature.

use nrollup_core::{AccountLeaf, BatchWitness, RollupConfig, TxLeaf, TxLeafHashing};
use nrollup_crypto::{FieldElement, HashScheme, PublicKey, Signature, SignatureVerifier};
use nrollup_merkle::MerkleProof;

use crate::{CanonicalWitness, WitnessError};

/// Protocol parameters the witness itself does not carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckParams {
    /// Balance tree depth (real siblings per path).
    pub balance_depth: usize,
    /// Transaction tree depth.
    pub tx_depth: usize,
    /// Transaction-leaf hashing convention.
    pub tx_leaf_hashing: TxLeafHashing,
}

impl From<&RollupConfig> for CheckParams {
    fn from(c: &RollupConfig) -> Self {
        Self {
            balance_depth: c.balance_depth,
            tx_depth: c.tx_depth,
            tx_leaf_hashing: c.tx_leaf_hashing,
        }
    }
}

impl From<&BatchWitness> for CheckParams {
    fn from(w: &BatchWitness) -> Self {
        Self {
            balance_depth: w.balance_depth,
            tx_depth: w.tx_depth,
            tx_leaf_hashing: w.tx_leaf_hashing,
        }
    }
}

fn mismatch(transfer: usize, reason: impl Into<String>) -> WitnessError {
    WitnessError::Mismatch {
        transfer,
        reason: reason.into(),
    }
}

fn expect_len(field: &'static str, len: usize, expected: usize) -> Result<(), WitnessError> {
    if len == expected {
        Ok(())
    } else {
        Err(WitnessError::Shape {
            field,
            len,
            expected,
        })
    }
}

/// Per-transfer stride of a padded path array, checked against `depth`.
fn path_width(
    field: &'static str,
    arr: &[FieldElement],
    n: usize,
    depth: usize,
) -> Result<usize, WitnessError> {
    let width = arr.len() / n;
    expect_len(field, arr.len(), width * n)?;
    if width == 0 || width < depth {
        return Err(WitnessError::PathWidth { len: depth, width });
    }
    for (i, chunk) in arr.chunks(width).enumerate() {
        if chunk[depth..].iter().any(|x| !x.is_zero()) {
            return Err(mismatch(i, format!("`{field}` padding is not zero")));
        }
    }
    Ok(width)
}

fn small_index(transfer: usize, v: FieldElement) -> Result<u64, WitnessError> {
    v.to_u128()
        .and_then(|x| u64::try_from(x).ok())
        .ok_or_else(|| mismatch(transfer, format!("index {v} is not a leaf index")))
}

fn opens<H: HashScheme + ?Sized>(
    hasher: &H,
    proof: &MerkleProof,
    leaf: &AccountLeaf,
    root: FieldElement,
) -> Result<bool, WitnessError> {
    Ok(proof.verify(leaf.hash(hasher)?, root, hasher)?)
}

/// Replay `cw` under `params`; `Ok(())` iff every step the circuit checks
/// holds.
pub fn check_witness<H: HashScheme + ?Sized>(
    cw: &CanonicalWitness,
    params: &CheckParams,
    hasher: &H,
    verifier: &dyn SignatureVerifier,
) -> Result<(), WitnessError> {
    let n = cw.transfer_count();
    if n == 0 {
        return Err(WitnessError::Encoding("witness holds no transfers".into()));
    }
    for (field, len, per) in [
        ("from_pubkeys", cw.from_pubkeys.len(), 2),
        ("from_bals", cw.from_bals.len(), 1),
        ("from_indeces", cw.from_indeces.len(), 1),
        ("from_nonces", cw.from_nonces.len(), 1),
        ("from_token_types", cw.from_token_types.len(), 1),
        ("to_pubkeys", cw.to_pubkeys.len(), 2),
        ("to_bals", cw.to_bals.len(), 1),
        ("to_indeces", cw.to_indeces.len(), 1),
        ("to_nonces", cw.to_nonces.len(), 1),
        ("to_token_types", cw.to_token_types.len(), 1),
        ("tx_hashes", cw.tx_hashes.len(), 1),
        ("signatures", cw.signatures.len(), 4),
    ] {
        expect_len(field, len, n * per)?;
    }
    expect_len("intermediate_roots", cw.intermediate_roots.len(), 2 * n - 1)?;
    let bal_w = path_width("from_paths", &cw.from_paths, n, params.balance_depth)?;
    expect_len("to_paths", cw.to_paths.len(), bal_w * n)?;
    path_width("to_paths", &cw.to_paths, n, params.balance_depth)?;
    let tx_w = path_width("tx_paths", &cw.tx_paths, n, params.tx_depth)?;

    let mut root = cw.bal_root;
    for i in 0..n {
        let after_sender = cw.intermediate_roots[2 * i];
        let after_receiver = if i + 1 == n {
            cw.new_root
        } else {
            cw.intermediate_roots[2 * i + 1]
        };
        let amount = cw.amount[i];
        let from_index = small_index(i, cw.from_indeces[i])?;
        let to_index = small_index(i, cw.to_indeces[i])?;
        let token_type = cw.from_token_types[i];
        if cw.to_token_types[i] != token_type {
            return Err(mismatch(i, "sender and receiver token types differ"));
        }

        let sender = AccountLeaf::new(
            PublicKey::new(cw.from_pubkeys[2 * i], cw.from_pubkeys[2 * i + 1]),
            cw.from_bals[i],
            cw.from_nonces[i],
            token_type,
        );
        let sender_proof = MerkleProof {
            leaf_index: from_index,
            siblings: cw.from_paths[i * bal_w..i * bal_w + params.balance_depth].to_vec(),
        };
        if !opens(hasher, &sender_proof, &sender, root)? {
            return Err(mismatch(i, "sender leaf does not open against the running root"));
        }
        let mut debited = sender.clone();
        debited.debit(amount)?;
        if !opens(hasher, &sender_proof, &debited, after_sender)? {
            return Err(mismatch(i, "debited sender does not reach the next root"));
        }

        let receiver = AccountLeaf::new(
            PublicKey::new(cw.to_pubkeys[2 * i], cw.to_pubkeys[2 * i + 1]),
            cw.to_bals[i],
            cw.to_nonces[i],
            cw.to_token_types[i],
        );
        let receiver_proof = MerkleProof {
            leaf_index: to_index,
            siblings: cw.to_paths[i * bal_w..i * bal_w + params.balance_depth].to_vec(),
        };
        if !opens(hasher, &receiver_proof, &receiver, after_sender)? {
            return Err(mismatch(i, "receiver leaf does not open after the debit"));
        }
        let mut credited = receiver.clone();
        credited.credit(amount)?;
        if !opens(hasher, &receiver_proof, &credited, after_receiver)? {
            return Err(mismatch(i, "credited receiver does not reach the next root"));
        }

        let tx_leaf = TxLeaf {
            from: sender.pubkey,
            from_index,
            to: receiver.pubkey,
            nonce: sender.nonce,
            amount,
            token_type,
        };
        let tx_hash = tx_leaf.hash(hasher, params.tx_leaf_hashing)?;
        if tx_hash != cw.tx_hashes[i] {
            return Err(mismatch(i, "transaction leaf hash differs"));
        }
        let tx_proof = MerkleProof {
            leaf_index: i as u64 + 1,
            siblings: cw.tx_paths[i * tx_w..i * tx_w + params.tx_depth].to_vec(),
        };
        if !tx_proof.verify(tx_hash, cw.tx_root, hasher)? {
            return Err(mismatch(i, "transaction path does not reach tx_root"));
        }
        let s = &cw.signatures[4 * i..4 * i + 4];
        let signature = Signature {
            r_x: s[0],
            r_y: s[1],
            s_lo: s[2],
            s_hi: s[3],
        };
        if !verifier.verify(&sender.pubkey, tx_hash, &signature) {
            return Err(mismatch(i, "signature does not verify"));
        }
        root = after_receiver;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{encode, EncodeOptions};
    use nrollup_core::{RollupState, TransferRequest};
    use nrollup_crypto::{CircomPoseidon, SchnorrSigner, SchnorrVerifier, Signer};

    fn fe(x: u64) -> FieldElement {
        FieldElement::from_u64(x)
    }

    fn sealed(hashing: TxLeafHashing) -> BatchWitness {
        let a = SchnorrSigner::from_seed(b"chk-a").unwrap();
        let b = SchnorrSigner::from_seed(b"chk-b").unwrap();
        let cfg = RollupConfig {
            tx_leaf_hashing: hashing,
            ..RollupConfig::default()
        };
        let mut s = RollupState::new(cfg).unwrap();
        s.genesis_deposit().unwrap();
        s.deposit(a.public_key(), fe(50), fe(1)).unwrap();
        s.deposit(b.public_key(), fe(5), fe(1)).unwrap();
        s.deposit(a.public_key(), fe(0), fe(1)).unwrap();
        s.process_deposits().unwrap();
        let mut batch = s.begin_batch(&SchnorrVerifier).unwrap();
        for (from, to, amt, k) in [(1, 2, 20, &a), (2, 3, 25, &b), (3, 1, 1, &a)] {
            let req = TransferRequest {
                from_index: from,
                to_index: to,
                amount: fe(amt),
                token_type: fe(1),
            };
            batch.add_transfer(&req, k).unwrap();
        }
        batch.seal().unwrap()
    }

    #[test]
    fn encoded_batches_check() {
        for hashing in [TxLeafHashing::Split, TxLeafHashing::Flat] {
            let w = sealed(hashing);
            let params = CheckParams::from(&w);
            for opts in [EncodeOptions::default(), EncodeOptions::padded(8, 6)] {
                let cw = encode(&w, &opts).unwrap();
                check_witness(&cw, &params, &CircomPoseidon, &SchnorrVerifier).unwrap();
            }
        }
    }

    #[test]
    fn wrong_convention_rejected() {
        let w = sealed(TxLeafHashing::Split);
        let cw = encode(&w, &EncodeOptions::default()).unwrap();
        let params = CheckParams {
            tx_leaf_hashing: TxLeafHashing::Flat,
            ..CheckParams::from(&w)
        };
        let err = check_witness(&cw, &params, &CircomPoseidon, &SchnorrVerifier).unwrap_err();
        assert!(matches!(err, WitnessError::Mismatch { transfer: 0, .. }));
    }

    #[test]
    fn tampering_detected() {
        let w = sealed(TxLeafHashing::Split);
        let params = CheckParams::from(&w);
        let cw = encode(&w, &EncodeOptions::default()).unwrap();

        let mut bumped = cw.clone();
        bumped.amount[1] = fe(24);
        assert!(matches!(
            check_witness(&bumped, &params, &CircomPoseidon, &SchnorrVerifier),
            Err(WitnessError::Mismatch { transfer: 1, .. })
        ));

        let mut swapped = cw.clone();
        swapped.intermediate_roots.swap(0, 1);
        assert!(check_witness(&swapped, &params, &CircomPoseidon, &SchnorrVerifier).is_err());

        let mut short = cw.clone();
        short.to_nonces.pop();
        assert!(matches!(
            check_witness(&short, &params, &CircomPoseidon, &SchnorrVerifier),
            Err(WitnessError::Shape { field: "to_nonces", .. })
        ));

        let mut forged = cw;
        forged.signatures[2] = fe(1);
        assert!(matches!(
            check_witness(&forged, &params, &CircomPoseidon, &SchnorrVerifier),
            Err(WitnessError::Mismatch { transfer: 0, .. })
        ));
    }
}
