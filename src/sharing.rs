//! Secret sharing of private witness values over the BN254 scalar field.
//!
//! Two schemes are supported:
//! - additive 3-out-of-3 (`rep3`): three shares summing to the secret,
//! - Shamir with threshold `ceil(n / 2)`: evaluations of a random polynomial
//!   whose constant term is the secret, party `i` receiving `f(i + 1)`.
//!
//! Every call draws fresh randomness from the supplied CSPRNG. Each named
//! input is shared independently of the others.

use crate::error::{Error, Result};
use crate::field::{random_field_element, FieldElement};
use crate::types::{validate_parties, Party, PartyId, Protocol, Share, ShareSet};
use ark_ff::{Field, One, Zero};
use log::{debug, warn};
use rand::{CryptoRng, RngCore};
use std::collections::{BTreeMap, BTreeSet};

/// Number of parties the additive scheme works with.
pub const REP3_PARTY_COUNT: usize = 3;

/// Shamir reconstruction threshold for `n` parties.
#[must_use]
pub fn threshold(party_count: usize) -> usize {
    party_count.div_ceil(2)
}

/// Shamir evaluation point of a party.
#[must_use]
pub fn evaluation_point(party_id: PartyId) -> FieldElement {
    FieldElement::from(u64::from(party_id) + 1)
}

/// Splits `value` into one share per party.
///
/// # Errors
///
/// [`Error::Validation`] if the party list is empty or has duplicate ids,
/// or if `rep3` is requested with a party count other than three.
pub fn split<R: RngCore + CryptoRng>(
    value: FieldElement,
    protocol: Protocol,
    parties: &[Party],
    rng: &mut R,
) -> Result<ShareSet> {
    validate_parties(parties)?;
    match protocol {
        Protocol::Rep3 => split_additive(value, parties, rng),
        Protocol::Shamir => split_shamir(value, parties, rng),
    }
}

fn split_additive<R: RngCore + CryptoRng>(
    value: FieldElement,
    parties: &[Party],
    rng: &mut R,
) -> Result<ShareSet> {
    if parties.len() != REP3_PARTY_COUNT {
        return Err(Error::validation(format!(
            "rep3 sharing requires exactly {REP3_PARTY_COUNT} parties, got {}",
            parties.len()
        )));
    }

    let r1 = random_field_element(rng);
    let r2 = random_field_element(rng);
    let r3 = value - r1 - r2;

    Ok(parties
        .iter()
        .zip([r1, r2, r3])
        .map(|(party, value)| {
            (
                party.id,
                Share {
                    party_id: party.id,
                    value,
                },
            )
        })
        .collect())
}

fn split_shamir<R: RngCore + CryptoRng>(
    value: FieldElement,
    parties: &[Party],
    rng: &mut R,
) -> Result<ShareSet> {
    let t = threshold(parties.len());
    if t < 2 {
        warn!(
            "Shamir sharing over {} parties has threshold {}; every share equals the secret",
            parties.len(),
            t
        );
    }

    let mut coefficients = Vec::with_capacity(t);
    coefficients.push(value);
    coefficients.extend((1..t).map(|_| random_field_element(rng)));

    Ok(parties
        .iter()
        .map(|party| {
            let share = Share {
                party_id: party.id,
                value: evaluate_polynomial(&coefficients, evaluation_point(party.id)),
            };
            (party.id, share)
        })
        .collect())
}

/// Horner evaluation of `coefficients[0] + coefficients[1] x + ...`.
fn evaluate_polynomial(coefficients: &[FieldElement], x: FieldElement) -> FieldElement {
    coefficients
        .iter()
        .rev()
        .fold(FieldElement::zero(), |acc, coeff| acc * x + coeff)
}

/// Shares every named input independently.
pub fn share_inputs<R: RngCore + CryptoRng>(
    inputs: &BTreeMap<String, FieldElement>,
    protocol: Protocol,
    parties: &[Party],
    rng: &mut R,
) -> Result<BTreeMap<String, ShareSet>> {
    debug!(
        "Sharing {} private inputs with {} across {} parties",
        inputs.len(),
        protocol,
        parties.len()
    );
    inputs
        .iter()
        .map(|(name, value)| {
            split(*value, protocol, parties, rng)
                .map(|shares| (name.clone(), shares))
                .map_err(|e| Error::validation(format!("input '{name}': {e}")))
        })
        .collect()
}

/// Recovers an additively shared value from all three shares.
pub fn reconstruct_additive(shares: &[Share]) -> Result<FieldElement> {
    if shares.len() != REP3_PARTY_COUNT {
        return Err(Error::validation(format!(
            "rep3 reconstruction needs all {REP3_PARTY_COUNT} shares, got {}",
            shares.len()
        )));
    }
    check_distinct(shares)?;
    Ok(shares.iter().map(|s| s.value).sum())
}

/// Lagrange interpolation at `x = 0` over the given shares.
///
/// The caller supplies at least `threshold` shares for the original party
/// count; fewer yields an unrelated value, not an error, since the party
/// count is not recorded in the shares.
pub fn reconstruct_shamir(shares: &[Share]) -> Result<FieldElement> {
    if shares.is_empty() {
        return Err(Error::validation("no shares to reconstruct from"));
    }
    check_distinct(shares)?;

    let mut secret = FieldElement::zero();
    for (i, share_i) in shares.iter().enumerate() {
        let xi = evaluation_point(share_i.party_id);
        let mut numerator = FieldElement::one();
        let mut denominator = FieldElement::one();
        for (j, share_j) in shares.iter().enumerate() {
            if i == j {
                continue;
            }
            let xj = evaluation_point(share_j.party_id);
            numerator *= -xj;
            denominator *= xi - xj;
        }
        let inverse = denominator
            .inverse()
            .ok_or_else(|| Error::validation("shares have coinciding evaluation points"))?;
        secret += share_i.value * numerator * inverse;
    }
    Ok(secret)
}

fn check_distinct(shares: &[Share]) -> Result<()> {
    let ids: BTreeSet<PartyId> = shares.iter().map(|s| s.party_id).collect();
    if ids.len() != shares.len() {
        return Err(Error::validation("shares from the same party given twice"));
    }
    Ok(())
}
