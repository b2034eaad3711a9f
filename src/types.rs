//! Type definitions shared by sharing, distribution and orchestration.

use crate::error::{Error, Result};
use crate::field::{parse_field_element, FieldElement};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Identifier of a computing party. Shamir evaluation point is `id + 1`.
pub type PartyId = u32;

/// A computing party taking part in the MPC session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub id: PartyId,
    /// Base URL, e.g. `https://party0.example.org:50000`.
    pub endpoint: String,
    /// PEM CA certificate used to authenticate this party's TLS endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_cert: Option<PathBuf>,
}

impl Party {
    pub fn new(id: PartyId, endpoint: impl Into<String>) -> Self {
        Self {
            id,
            endpoint: endpoint.into(),
            tls_cert: None,
        }
    }
}

/// Checks that a party list is non-empty and free of duplicate ids.
pub fn validate_parties(parties: &[Party]) -> Result<()> {
    if parties.is_empty() {
        return Err(Error::validation("party list is empty"));
    }
    let mut seen = std::collections::BTreeSet::new();
    for party in parties {
        if !seen.insert(party.id) {
            return Err(Error::validation(format!(
                "duplicate party id {} in party list",
                party.id
            )));
        }
        if party.endpoint.trim().is_empty() {
            return Err(Error::validation(format!(
                "party {} has an empty endpoint",
                party.id
            )));
        }
    }
    Ok(())
}

/// Secret sharing scheme used for a session. Wire names follow the MPC nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// Additive 3-out-of-3 sharing.
    #[serde(rename = "rep3", alias = "additive3")]
    Rep3,
    /// Shamir sharing with threshold `ceil(n / 2)`.
    #[serde(rename = "shamir", alias = "shamirThreshold")]
    Shamir,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Rep3 => "rep3",
            Protocol::Shamir => "shamir",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One party's share of one named input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Share {
    pub party_id: PartyId,
    pub value: FieldElement,
}

/// All shares of a single input, keyed by party.
pub type ShareSet = BTreeMap<PartyId, Share>;

/// Public inputs sent to the parties and the proof service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicInputs {
    #[serde(with = "crate::field::serde_decimal")]
    pub merkle_root: FieldElement,
    #[serde(with = "crate::field::serde_decimal")]
    pub nullifier_hash: FieldElement,
}

/// Groth16 proof in snarkjs JSON layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Groth16Proof {
    pub pi_a: Vec<String>,
    pub pi_b: Vec<Vec<String>>,
    pub pi_c: Vec<String>,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curve: Option<String>,
}

/// Completed proof as returned by the proof service or the coordinating party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofResult {
    pub proof: Groth16Proof,
    pub public_signals: Vec<String>,
}

impl ProofResult {
    /// Checks the proof shape and that every public signal is a field element.
    ///
    /// # Errors
    /// Returns [`Error::Protocol`] when a party or service returned a result
    /// that cannot be handed to the verifier.
    pub fn validate(&self) -> Result<()> {
        debug!(
            "Validating proof result: protocol={}, {} public signals",
            self.proof.protocol,
            self.public_signals.len()
        );

        if self.proof.pi_a.len() < 2 {
            return Err(Error::Protocol(format!(
                "pi_a must have at least 2 coordinates, got {}",
                self.proof.pi_a.len()
            )));
        }
        if self.proof.pi_b.len() < 2 || self.proof.pi_b.iter().take(2).any(|row| row.len() < 2) {
            return Err(Error::Protocol(
                "pi_b must contain at least two coordinate pairs".into(),
            ));
        }
        if self.proof.pi_c.len() < 2 {
            return Err(Error::Protocol(format!(
                "pi_c must have at least 2 coordinates, got {}",
                self.proof.pi_c.len()
            )));
        }

        for (i, signal) in self.public_signals.iter().enumerate() {
            parse_field_element(signal).map_err(|e| {
                Error::Protocol(format!("public signal {i} is not a field element: {e}"))
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> ProofResult {
        serde_json::from_str(
            r#"{
                "proof": {
                    "pi_a": ["1", "2", "1"],
                    "pi_b": [["3", "4"], ["5", "6"], ["1", "0"]],
                    "pi_c": ["7", "8", "1"],
                    "protocol": "groth16",
                    "curve": "bn128"
                },
                "publicSignals": ["9", "10"]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_protocol_wire_names() {
        assert_eq!(serde_json::to_string(&Protocol::Rep3).unwrap(), "\"rep3\"");
        assert_eq!(serde_json::to_string(&Protocol::Shamir).unwrap(), "\"shamir\"");
        let p: Protocol = serde_json::from_str("\"shamirThreshold\"").unwrap();
        assert_eq!(p, Protocol::Shamir);
        let p: Protocol = serde_json::from_str("\"additive3\"").unwrap();
        assert_eq!(p, Protocol::Rep3);
    }

    #[test]
    fn test_public_inputs_camel_case_decimal() {
        let inputs = PublicInputs {
            merkle_root: FieldElement::from(5u64),
            nullifier_hash: FieldElement::from(6u64),
        };
        let json = serde_json::to_value(inputs).unwrap();
        assert_eq!(json["merkleRoot"], "5");
        assert_eq!(json["nullifierHash"], "6");
    }

    #[test]
    fn test_proof_result_validate() {
        let result = sample_result();
        assert!(result.validate().is_ok());
        assert_eq!(result.proof.curve.as_deref(), Some("bn128"));
    }

    #[test]
    fn test_proof_result_rejects_short_pi_b() {
        let mut result = sample_result();
        result.proof.pi_b[1].truncate(1);
        assert!(matches!(result.validate(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_proof_result_rejects_bad_signal() {
        let mut result = sample_result();
        result.public_signals.push("not-a-number".into());
        let err = result.validate().unwrap_err();
        assert!(err.to_string().contains("public signal 2"));
    }

    #[test]
    fn test_validate_parties() {
        assert!(validate_parties(&[]).is_err());
        assert!(validate_parties(&[Party::new(0, "http://a"), Party::new(0, "http://b")]).is_err());
        assert!(validate_parties(&[Party::new(0, " ")]).is_err());
        assert!(validate_parties(&[Party::new(0, "http://a"), Party::new(1, "http://b")]).is_ok());
    }
}
