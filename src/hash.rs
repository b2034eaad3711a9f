//! Two-to-one hash over field elements.
//!
//! The hasher is an ordinary value owned by the caller and lent to the
//! commitment tree and the vote helpers. Nothing in the crate keeps a
//! process-wide instance.

use crate::error::{Error, Result};
use crate::field::FieldElement;
use light_poseidon::{Poseidon, PoseidonHasher as _};
use std::sync::Mutex;

/// Deterministic two-input hash used for tree nodes, commitments and nullifiers.
pub trait HashEngine {
    fn hash2(&self, left: FieldElement, right: FieldElement) -> FieldElement;
}

impl<H: HashEngine + ?Sized> HashEngine for &H {
    fn hash2(&self, left: FieldElement, right: FieldElement) -> FieldElement {
        (**self).hash2(left, right)
    }
}

/// Poseidon with circomlib parameters (t = 3), matching the vote circuit.
pub struct PoseidonHasher {
    inner: Mutex<Poseidon<FieldElement>>,
}

impl PoseidonHasher {
    pub fn new() -> Result<Self> {
        let poseidon =
            Poseidon::<FieldElement>::new_circom(2).map_err(|e| Error::Hash(e.to_string()))?;
        Ok(Self {
            inner: Mutex::new(poseidon),
        })
    }
}

impl std::fmt::Debug for PoseidonHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PoseidonHasher(circom, t=3)")
    }
}

impl HashEngine for PoseidonHasher {
    fn hash2(&self, left: FieldElement, right: FieldElement) -> FieldElement {
        let mut poseidon = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        poseidon
            .hash(&[left, right])
            .expect("poseidon arity 2")
    }
}
