//! Fixed-arity Poseidon hashing over the BN254 scalar field.
//!
//! The circuit, the ledger contract (`PoseidonT3`/`T5`/`T6` libraries), and this
//! crate must compute identical digests, so the only production scheme is the
//! circom parameterisation of Poseidon. The [`HashScheme`] trait exists so the
//! tree and state code stay agnostic of the concrete permutation.

use ark_bn254::Fr;
use light_poseidon::{Poseidon, PoseidonHasher};

use crate::{CryptoError, FieldElement};

/// Largest input count supported by the circom Poseidon parameter sets.
pub const POSEIDON_MAX_ARITY: usize = 12;

/// Deterministic, side-effect-free hash over field elements.
pub trait HashScheme: Send + Sync {
    /// Hash an ordered sequence of field elements.
    fn hash(&self, inputs: &[FieldElement]) -> Result<FieldElement, CryptoError>;

    /// Internal-node hash: `hash([left, right])`.
    fn hash_pair(
        &self,
        left: FieldElement,
        right: FieldElement,
    ) -> Result<FieldElement, CryptoError> {
        self.hash(&[left, right])
    }
}

impl<H: HashScheme + ?Sized> HashScheme for &H {
    fn hash(&self, inputs: &[FieldElement]) -> Result<FieldElement, CryptoError> {
        (**self).hash(inputs)
    }
}

/// Circom-compatible Poseidon (`circomlibjs` `buildPoseidon`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CircomPoseidon;

impl HashScheme for CircomPoseidon {
    fn hash(&self, inputs: &[FieldElement]) -> Result<FieldElement, CryptoError> {
        if inputs.is_empty() || inputs.len() > POSEIDON_MAX_ARITY {
            return Err(CryptoError::Arity {
                arity: inputs.len(),
                max: POSEIDON_MAX_ARITY,
            });
        }
        let mut hasher = Poseidon::<Fr>::new_circom(inputs.len())
            .map_err(|e| CryptoError::Poseidon(e.to_string()))?;
        let frs: Vec<Fr> = inputs.iter().map(|x| x.into_fr()).collect();
        hasher
            .hash(&frs)
            .map(FieldElement::from_fr)
            .map_err(|e| CryptoError::Poseidon(e.to_string()))
    }
}
