//! `BatchWitness` → `CanonicalWitness`.

use nrollup_core::BatchWitness;
use nrollup_crypto::FieldElement;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::WitnessError;

/// Padded path widths. `None` keeps the tree depth recorded in the batch.
///
/// A circuit compiled for deeper trees than the batch used takes the real
/// siblings first and zeros after them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeOptions {
    /// Width of each balance-tree path.
    pub balance_path_width: Option<usize>,
    /// Width of each transaction-tree path.
    pub tx_path_width: Option<usize>,
}

impl EncodeOptions {
    /// Pad both path kinds to fixed widths.
    #[must_use]
    pub const fn padded(balance_path_width: usize, tx_path_width: usize) -> Self {
        Self {
            balance_path_width: Some(balance_path_width),
            tx_path_width: Some(tx_path_width),
        }
    }
}

/// The circuit input record.
///
/// Field names are the circuit's input names and double as the
/// `Prover.toml` keys, so they are kept verbatim (including `indeces`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalWitness {
    /// Transfer amounts.
    pub amount: Vec<FieldElement>,
    /// Balance root before the batch.
    pub bal_root: FieldElement,
    /// Sender keys, `x, y` per transfer.
    pub from_pubkeys: Vec<FieldElement>,
    /// Sender balances before each transfer.
    pub from_bals: Vec<FieldElement>,
    /// Sender indices.
    pub from_indeces: Vec<FieldElement>,
    /// Sender nonces before each transfer.
    pub from_nonces: Vec<FieldElement>,
    /// Sender paths, `width` siblings per transfer.
    pub from_paths: Vec<FieldElement>,
    /// Sender token types.
    pub from_token_types: Vec<FieldElement>,
    /// Roots after every leaf update except the final one.
    pub intermediate_roots: Vec<FieldElement>,
    /// Receiver keys, `x, y` per transfer.
    pub to_pubkeys: Vec<FieldElement>,
    /// Receiver balances before each transfer.
    pub to_bals: Vec<FieldElement>,
    /// Receiver indices.
    pub to_indeces: Vec<FieldElement>,
    /// Receiver nonces.
    pub to_nonces: Vec<FieldElement>,
    /// Receiver paths, `width` siblings per transfer.
    pub to_paths: Vec<FieldElement>,
    /// Receiver token types.
    pub to_token_types: Vec<FieldElement>,
    /// Transaction tree root.
    pub tx_root: FieldElement,
    /// Transaction paths, `width` siblings per transfer.
    pub tx_paths: Vec<FieldElement>,
    /// Balance root after the batch.
    pub new_root: FieldElement,
    /// Transaction leaf hashes (the signed messages).
    pub tx_hashes: Vec<FieldElement>,
    /// Signatures, `r_x, r_y, s_lo, s_hi` per transfer.
    pub signatures: Vec<FieldElement>,
}

impl CanonicalWitness {
    /// Number of transfers encoded.
    #[must_use]
    pub fn transfer_count(&self) -> usize {
        self.amount.len()
    }

    /// Every field element in canonical order: fields in declaration order,
    /// each array in transfer order.
    #[must_use]
    pub fn flatten(&self) -> Vec<FieldElement> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.amount);
        out.push(self.bal_root);
        for arr in [
            &self.from_pubkeys,
            &self.from_bals,
            &self.from_indeces,
            &self.from_nonces,
            &self.from_paths,
            &self.from_token_types,
            &self.intermediate_roots,
            &self.to_pubkeys,
            &self.to_bals,
            &self.to_indeces,
            &self.to_nonces,
            &self.to_paths,
            &self.to_token_types,
        ] {
            out.extend_from_slice(arr);
        }
        out.push(self.tx_root);
        out.extend_from_slice(&self.tx_paths);
        out.push(self.new_root);
        out.extend_from_slice(&self.tx_hashes);
        out.extend_from_slice(&self.signatures);
        out
    }

    /// `Prover.toml` text.
    pub fn to_prover_toml(&self) -> Result<String, WitnessError> {
        toml::to_string(self).map_err(|e| WitnessError::Encoding(e.to_string()))
    }

    /// Parse `Prover.toml` text.
    pub fn from_prover_toml(src: &str) -> Result<Self, WitnessError> {
        toml::from_str(src).map_err(|e| WitnessError::Encoding(e.to_string()))
    }
}

fn push_padded(
    out: &mut Vec<FieldElement>,
    siblings: &[FieldElement],
    width: usize,
) -> Result<(), WitnessError> {
    if siblings.len() > width {
        return Err(WitnessError::PathWidth {
            len: siblings.len(),
            width,
        });
    }
    out.extend_from_slice(siblings);
    out.resize(out.len() + (width - siblings.len()), FieldElement::zero());
    Ok(())
}

/// Encode a sealed batch.
pub fn encode(w: &BatchWitness, opts: &EncodeOptions) -> Result<CanonicalWitness, WitnessError> {
    let bal_width = opts.balance_path_width.unwrap_or(w.balance_depth);
    let tx_width = opts.tx_path_width.unwrap_or(w.tx_depth);

    let mut cw = CanonicalWitness {
        bal_root: w.old_root,
        intermediate_roots: w.intermediate_roots(),
        tx_root: w.tx_root,
        new_root: w.new_root,
        ..CanonicalWitness::default()
    };
    for t in &w.transfers {
        cw.amount.push(t.amount);

        cw.from_pubkeys.extend(t.sender.pubkey.to_array());
        cw.from_bals.push(t.sender.balance);
        cw.from_indeces.push(FieldElement::from_u64(t.from_index));
        cw.from_nonces.push(t.sender.nonce);
        push_padded(&mut cw.from_paths, &t.sender_proof.siblings, bal_width)?;
        cw.from_token_types.push(t.sender.token_type);

        cw.to_pubkeys.extend(t.receiver.pubkey.to_array());
        cw.to_bals.push(t.receiver.balance);
        cw.to_indeces.push(FieldElement::from_u64(t.to_index));
        cw.to_nonces.push(t.receiver.nonce);
        push_padded(&mut cw.to_paths, &t.receiver_proof.siblings, bal_width)?;
        cw.to_token_types.push(t.receiver.token_type);

        push_padded(&mut cw.tx_paths, &t.tx_proof.siblings, tx_width)?;
        cw.tx_hashes.push(t.tx_hash);
        cw.signatures.extend(t.signature.to_array());
    }
    debug!(
        transfers = cw.transfer_count(),
        bal_width,
        tx_width,
        "witness encoded"
    );
    Ok(cw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nrollup_core::{RollupConfig, RollupState, TransferRequest};
    use nrollup_crypto::{SchnorrSigner, SchnorrVerifier, Signer};

    fn fe(x: u64) -> FieldElement {
        FieldElement::from_u64(x)
    }

    fn two_transfer_batch() -> BatchWitness {
        let a = SchnorrSigner::from_seed(b"enc-a").unwrap();
        let b = SchnorrSigner::from_seed(b"enc-b").unwrap();
        let c = SchnorrSigner::from_seed(b"enc-c").unwrap();
        let mut s = RollupState::new(RollupConfig::default()).unwrap();
        s.genesis_deposit().unwrap();
        for (k, amt) in [(&a, 100), (&b, 200), (&c, 24)] {
            s.deposit(k.public_key(), fe(amt), fe(1)).unwrap();
        }
        s.process_deposits().unwrap();
        let mut batch = s.begin_batch(&SchnorrVerifier).unwrap();
        let t1 = TransferRequest {
            from_index: 2,
            to_index: 1,
            amount: fe(100),
            token_type: fe(1),
        };
        let t2 = TransferRequest {
            from_index: 3,
            to_index: 2,
            amount: fe(6),
            token_type: fe(1),
        };
        batch.add_transfer(&t1, &b).unwrap();
        batch.add_transfer(&t2, &c).unwrap();
        batch.seal().unwrap()
    }

    #[test]
    fn arrays_follow_transfer_order() {
        let w = two_transfer_batch();
        let cw = encode(&w, &EncodeOptions::default()).unwrap();
        assert_eq!(cw.transfer_count(), 2);
        assert_eq!(cw.amount, vec![fe(100), fe(6)]);
        assert_eq!(cw.from_indeces, vec![fe(2), fe(3)]);
        assert_eq!(cw.to_indeces, vec![fe(1), fe(2)]);
        assert_eq!(cw.from_bals, vec![fe(200), fe(24)]);
        // The second sender (index 3) pays index 2, which already sent 100.
        assert_eq!(cw.to_bals, vec![fe(100), fe(100)]);
        assert_eq!(cw.from_nonces, vec![fe(0), fe(0)]);
        assert_eq!(cw.from_pubkeys.len(), 4);
        assert_eq!(cw.from_paths.len(), 8);
        assert_eq!(cw.tx_paths.len(), 8);
        assert_eq!(cw.signatures.len(), 8);
        assert_eq!(cw.intermediate_roots.len(), 3);
        assert_eq!(cw.bal_root, w.old_root);
        assert_eq!(cw.new_root, w.new_root);
    }

    #[test]
    fn paths_zero_padded_to_width() {
        let w = two_transfer_batch();
        let cw = encode(&w, &EncodeOptions::padded(6, 5)).unwrap();
        assert_eq!(cw.from_paths.len(), 12);
        assert_eq!(cw.tx_paths.len(), 10);
        assert_eq!(&cw.from_paths[..4], w.transfers[0].sender_proof.siblings.as_slice());
        assert_eq!(cw.from_paths[4], FieldElement::zero());
        assert_eq!(cw.from_paths[5], FieldElement::zero());
        assert_eq!(&cw.from_paths[6..10], w.transfers[1].sender_proof.siblings.as_slice());

        let err = encode(&w, &EncodeOptions::padded(3, 4)).unwrap_err();
        assert_eq!(err, WitnessError::PathWidth { len: 4, width: 3 });
    }

    #[test]
    fn flatten_and_toml() {
        let w = two_transfer_batch();
        let cw = encode(&w, &EncodeOptions::default()).unwrap();
        let flat = cw.flatten();
        // 2 amounts + root + 4+2+2+2+8+2 + 3 + 4+2+2+2+8+2 + root + 8 + root + 2 + 8
        assert_eq!(flat.len(), 2 + 1 + 20 + 3 + 20 + 1 + 8 + 1 + 2 + 8);
        assert_eq!(flat[0], fe(100));
        assert_eq!(flat[2], w.old_root);
        assert_eq!(*flat.last().unwrap(), w.transfers[1].signature.s_hi);

        let text = cw.to_prover_toml().unwrap();
        assert!(text.starts_with("amount = ["));
        assert!(text.contains(&format!("bal_root = \"{}\"", w.old_root.to_hex())));
        assert_eq!(CanonicalWitness::from_prover_toml(&text).unwrap(), cw);
    }
}
