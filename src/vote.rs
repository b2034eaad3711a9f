//! Voter registration, vote witness construction and verifier calldata.
//!
//! Derivations, all with the caller's [`HashEngine`]:
//! - commitment      = H(voterSecret, voterNullifier)  (registered as a tree leaf)
//! - nullifier hash  = H(voterNullifier, merkleRoot)   (public, prevents double votes)
//! - vote commitment = H(voterSecret, voteChoice)      (public, submitted with the proof)

use crate::error::{Error, Result};
use crate::field::{bytes32_from_hex, field_to_bytes_be, FieldElement, FIELD_BYTES};
use crate::hash::HashEngine;
use crate::merkle::MerkleProof;
use crate::types::{Groth16Proof, ProofResult, PublicInputs};
use ark_ff::{PrimeField, Zero};
use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Random bytes per voter secret; 31 bytes always fit below the field modulus.
pub const CREDENTIAL_BYTES: usize = 31;

pub const VOTER_SECRET: &str = "voterSecret";
pub const VOTER_NULLIFIER: &str = "voterNullifier";
pub const VOTE_CHOICE: &str = "voteChoice";
pub const MERKLE_PATH_ELEMENTS: &str = "merklePathElements";
pub const MERKLE_PATH_INDICES: &str = "merklePathIndices";

#[must_use]
pub fn voter_commitment<H: HashEngine>(
    hasher: &H,
    secret: FieldElement,
    nullifier: FieldElement,
) -> FieldElement {
    hasher.hash2(secret, nullifier)
}

#[must_use]
pub fn nullifier_hash<H: HashEngine>(
    hasher: &H,
    voter_nullifier: FieldElement,
    merkle_root: FieldElement,
) -> FieldElement {
    hasher.hash2(voter_nullifier, merkle_root)
}

#[must_use]
pub fn vote_commitment<H: HashEngine>(
    hasher: &H,
    secret: FieldElement,
    choice: FieldElement,
) -> FieldElement {
    hasher.hash2(secret, choice)
}

/// A voter's private registration material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterCredentials {
    #[serde(with = "crate::field::serde_decimal")]
    pub secret: FieldElement,
    #[serde(with = "crate::field::serde_decimal")]
    pub nullifier: FieldElement,
}

impl VoterCredentials {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut sample = || {
            let mut bytes = [0u8; CREDENTIAL_BYTES];
            rng.fill_bytes(&mut bytes);
            FieldElement::from_be_bytes_mod_order(&bytes)
        };
        let secret = sample();
        let nullifier = sample();
        Self { secret, nullifier }
    }

    pub fn commitment<H: HashEngine>(&self, hasher: &H) -> FieldElement {
        voter_commitment(hasher, self.secret, self.nullifier)
    }
}

/// Full circuit witness for one vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteWitness {
    #[serde(with = "crate::field::serde_decimal")]
    pub voter_secret: FieldElement,
    #[serde(with = "crate::field::serde_decimal")]
    pub voter_nullifier: FieldElement,
    #[serde(with = "crate::field::serde_decimal")]
    pub vote_choice: FieldElement,
    #[serde(with = "crate::field::serde_decimal_seq")]
    pub merkle_path_elements: Vec<FieldElement>,
    pub merkle_path_indices: Vec<u8>,
    #[serde(with = "crate::field::serde_decimal")]
    pub merkle_root: FieldElement,
    #[serde(with = "crate::field::serde_decimal")]
    pub nullifier_hash: FieldElement,
}

impl VoteWitness {
    /// Assembles the witness and checks the membership proof before any
    /// share leaves the machine.
    ///
    /// # Errors
    /// [`Error::Validation`] if the voter's commitment does not fold to
    /// `merkle_root` along `proof`.
    pub fn build<H: HashEngine>(
        hasher: &H,
        credentials: &VoterCredentials,
        vote_choice: u64,
        proof: &MerkleProof,
        merkle_root: FieldElement,
    ) -> Result<Self> {
        let leaf = credentials.commitment(hasher);
        if !proof.verify(hasher, leaf, merkle_root) {
            return Err(Error::validation(format!(
                "voter commitment is not included at slot {} under the given root",
                proof.leaf_index
            )));
        }

        Ok(Self {
            voter_secret: credentials.secret,
            voter_nullifier: credentials.nullifier,
            vote_choice: FieldElement::from(vote_choice),
            merkle_path_elements: proof.path_elements(),
            merkle_path_indices: proof.path_indices(),
            merkle_root,
            nullifier_hash: nullifier_hash(hasher, credentials.nullifier, merkle_root),
        })
    }

    /// Structural checks on a witness loaded from outside.
    pub fn validate(&self) -> Result<()> {
        if self.merkle_path_elements.len() != self.merkle_path_indices.len() {
            return Err(Error::validation(format!(
                "merkle path has {} elements but {} indices",
                self.merkle_path_elements.len(),
                self.merkle_path_indices.len()
            )));
        }
        if self.merkle_path_elements.is_empty() {
            return Err(Error::validation("merkle path is empty"));
        }
        if let Some(bad) = self.merkle_path_indices.iter().find(|i| **i > 1) {
            return Err(Error::validation(format!(
                "merkle path index {bad} is not a bit"
            )));
        }
        if self.nullifier_hash.is_zero() || self.merkle_root.is_zero() {
            return Err(Error::validation("public inputs must be non-zero"));
        }
        Ok(())
    }

    /// Every private field, one entry per circuit input signal.
    pub fn private_inputs(&self) -> BTreeMap<String, FieldElement> {
        let mut inputs = BTreeMap::new();
        inputs.insert(VOTER_SECRET.to_string(), self.voter_secret);
        inputs.insert(VOTER_NULLIFIER.to_string(), self.voter_nullifier);
        inputs.insert(VOTE_CHOICE.to_string(), self.vote_choice);
        for (i, element) in self.merkle_path_elements.iter().enumerate() {
            inputs.insert(format!("{MERKLE_PATH_ELEMENTS}[{i}]"), *element);
        }
        for (i, index) in self.merkle_path_indices.iter().enumerate() {
            inputs.insert(
                format!("{MERKLE_PATH_INDICES}[{i}]"),
                FieldElement::from(u64::from(*index)),
            );
        }
        inputs
    }

    pub fn public_inputs(&self) -> PublicInputs {
        PublicInputs {
            merkle_root: self.merkle_root,
            nullifier_hash: self.nullifier_hash,
        }
    }
}

fn parse_uint256(value: &str, name: &str) -> Result<BigUint> {
    let parsed = BigUint::parse_bytes(value.trim().as_bytes(), 10)
        .ok_or_else(|| Error::Protocol(format!("{name} is not a decimal integer: '{value}'")))?;
    if parsed.bits() > 256 {
        return Err(Error::Protocol(format!("{name} does not fit in 256 bits")));
    }
    Ok(parsed)
}

/// Flattens a Groth16 proof into the verifier's `uint256[8]` layout.
///
/// The G2 point's coordinate pairs are reversed (`c1, c0`), following the
/// precompile encoding the verifier contract uses.
pub fn format_proof_for_verifier(proof: &Groth16Proof) -> Result<[BigUint; 8]> {
    let pi_b0 = g2_row(proof, 0)?;
    let pi_b1 = g2_row(proof, 1)?;

    Ok([
        coordinate(&proof.pi_a, 0, "pi_a")?,
        coordinate(&proof.pi_a, 1, "pi_a")?,
        coordinate(pi_b0, 1, "pi_b[0]")?,
        coordinate(pi_b0, 0, "pi_b[0]")?,
        coordinate(pi_b1, 1, "pi_b[1]")?,
        coordinate(pi_b1, 0, "pi_b[1]")?,
        coordinate(&proof.pi_c, 0, "pi_c")?,
        coordinate(&proof.pi_c, 1, "pi_c")?,
    ])
}

fn g2_row(proof: &Groth16Proof, row: usize) -> Result<&[String]> {
    proof
        .pi_b
        .get(row)
        .map(Vec::as_slice)
        .ok_or_else(|| Error::Protocol(format!("pi_b[{row}] is missing")))
}

fn coordinate(row: &[String], i: usize, name: &str) -> Result<BigUint> {
    let value = row
        .get(i)
        .ok_or_else(|| Error::Protocol(format!("{name}[{i}] is missing")))?;
    parse_uint256(value, &format!("{name}[{i}]"))
}

fn serialize_uint256_array<S: Serializer>(
    values: &[BigUint; 8],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(values.iter().map(|v| v.to_str_radix(10)))
}

fn serialize_bytes32<S: Serializer>(
    bytes: &[u8; FIELD_BYTES],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
}

fn deserialize_uint256_array<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<[BigUint; 8], D::Error> {
    let values = Vec::<String>::deserialize(deserializer)?
        .iter()
        .enumerate()
        .map(|(i, v)| parse_uint256(v, &format!("proof[{i}]")))
        .collect::<Result<Vec<_>>>()
        .map_err(serde::de::Error::custom)?;
    let count = values.len();
    values
        .try_into()
        .map_err(|_| serde::de::Error::custom(format!("expected 8 proof values, got {count}")))
}

fn deserialize_bytes32<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<[u8; FIELD_BYTES], D::Error> {
    let s = String::deserialize(deserializer)?;
    bytes32_from_hex(&s).map_err(serde::de::Error::custom)
}

/// Arguments of the verifier contract's vote entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteCalldata {
    #[serde(
        serialize_with = "serialize_uint256_array",
        deserialize_with = "deserialize_uint256_array"
    )]
    pub proof: [BigUint; 8],
    #[serde(
        serialize_with = "serialize_bytes32",
        deserialize_with = "deserialize_bytes32"
    )]
    pub nullifier_hash: [u8; FIELD_BYTES],
    #[serde(
        serialize_with = "serialize_bytes32",
        deserialize_with = "deserialize_bytes32"
    )]
    pub vote_commitment: [u8; FIELD_BYTES],
}

impl VoteCalldata {
    pub fn prepare<H: HashEngine>(
        hasher: &H,
        result: &ProofResult,
        witness: &VoteWitness,
    ) -> Result<Self> {
        Ok(Self {
            proof: format_proof_for_verifier(&result.proof)?,
            nullifier_hash: field_to_bytes_be(&witness.nullifier_hash),
            vote_commitment: field_to_bytes_be(&vote_commitment(
                hasher,
                witness.voter_secret,
                witness.vote_choice,
            )),
        })
    }
}
