//! BN254 scalar field helpers: parsing, formatting and sampling.
//!
//! Every value crossing the crate boundary (witness JSON, share payloads,
//! proof service responses) is a decimal string. Parsing is strict: a value
//! at or above the modulus is rejected instead of being reduced, so two
//! different strings can never denote the same element.

use crate::error::{Error, Result};
use ark_ff::{BigInteger, PrimeField};
use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};

/// Element of the BN254 scalar field, the field the vote circuit is defined over.
pub type FieldElement = ark_bn254::Fr;

/// Decimal representation of the BN254 scalar field modulus.
pub const MODULUS_DECIMAL: &str =
    "21888242871839275222246405745257275088548364400416034343698204186575808495617";

/// Byte length of a canonical big-endian field element encoding.
pub const FIELD_BYTES: usize = 32;

fn is_valid_hex_string(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_hexdigit())
}

fn strip_hex_prefix(input: &str) -> Option<&str> {
    let trimmed = input.trim();
    trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
}

/// Strips an optional `0x`/`0X` prefix and checks the remaining digits.
///
/// # Errors
///
/// [`Error::Validation`] if the digit count differs from `expected_len` or a
/// non-hex character is present.
///
/// ```
/// use zkp_mpc_vote::field::validate_and_strip_hex;
///
/// assert_eq!(validate_and_strip_hex("0x1234abcd", 8).unwrap(), "1234abcd");
/// assert!(validate_and_strip_hex("0x1234", 8).is_err());
/// ```
pub fn validate_and_strip_hex(input: &str, expected_len: usize) -> Result<String> {
    let stripped = strip_hex_prefix(input).unwrap_or_else(|| input.trim());

    if stripped.len() != expected_len {
        return Err(Error::validation(format!(
            "invalid hex string: must be {} characters (got {})",
            expected_len,
            stripped.len()
        )));
    }
    if !is_valid_hex_string(stripped) {
        return Err(Error::validation(
            "invalid hex string: contains non-hex characters",
        ));
    }

    Ok(stripped.to_string())
}

/// Decodes a 32-byte hex value such as a `bytes32` calldata argument.
pub fn bytes32_from_hex(input: &str) -> Result<[u8; FIELD_BYTES]> {
    let digits = validate_and_strip_hex(input, FIELD_BYTES * 2)?;
    let mut bytes = [0u8; FIELD_BYTES];
    hex::decode_to_slice(digits, &mut bytes)
        .map_err(|e| Error::validation(format!("invalid hex string: {e}")))?;
    Ok(bytes)
}

/// The field modulus as an arbitrary precision integer.
#[must_use]
pub fn modulus() -> BigUint {
    BigUint::from(FieldElement::MODULUS)
}

/// Converts an integer to a field element, rejecting values `>= p`.
pub fn biguint_to_field(value: &BigUint) -> Result<FieldElement> {
    if *value >= modulus() {
        return Err(Error::validation(format!(
            "value {value} is not below the field modulus"
        )));
    }
    Ok(FieldElement::from(value.clone()))
}

#[must_use]
pub fn field_to_biguint(value: &FieldElement) -> BigUint {
    BigUint::from(value.into_bigint())
}

/// Parses a field element from a decimal string or a `0x`-prefixed hex string.
///
/// # Errors
///
/// Returns [`Error::Validation`] if the input is empty, contains characters
/// outside the chosen radix, or encodes an integer `>= p`.
///
/// # Examples
///
/// ```
/// use zkp_mpc_vote::field::{parse_field_element, FieldElement};
///
/// assert_eq!(parse_field_element("12345").unwrap(), FieldElement::from(12345u64));
/// assert_eq!(parse_field_element("0x3039").unwrap(), FieldElement::from(12345u64));
/// assert!(parse_field_element(zkp_mpc_vote::field::MODULUS_DECIMAL).is_err());
/// ```
pub fn parse_field_element(input: &str) -> Result<FieldElement> {
    let value = if let Some(hex_digits) = strip_hex_prefix(input) {
        if hex_digits.is_empty() || !is_valid_hex_string(hex_digits) {
            return Err(Error::validation(format!(
                "invalid hex field element '{input}'"
            )));
        }
        BigUint::parse_bytes(hex_digits.as_bytes(), 16)
    } else {
        let digits = input.trim();
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::validation(format!(
                "invalid decimal field element '{input}'"
            )));
        }
        BigUint::parse_bytes(digits.as_bytes(), 10)
    };

    let value =
        value.ok_or_else(|| Error::validation(format!("unparseable field element '{input}'")))?;
    biguint_to_field(&value)
}

/// Canonical decimal form used on the wire.
#[must_use]
pub fn to_decimal_string(value: &FieldElement) -> String {
    field_to_biguint(value).to_str_radix(10)
}

/// Big-endian 32-byte encoding, the layout the on-chain verifier expects for `bytes32`.
#[must_use]
pub fn field_to_bytes_be(value: &FieldElement) -> [u8; FIELD_BYTES] {
    let mut bytes = [0u8; FIELD_BYTES];
    let repr = value.into_bigint().to_bytes_be();
    bytes[FIELD_BYTES - repr.len()..].copy_from_slice(&repr);
    bytes
}

/// Inverse of [`field_to_bytes_be`]; rejects encodings of integers `>= p`.
pub fn bytes_be_to_field(bytes: &[u8; FIELD_BYTES]) -> Result<FieldElement> {
    biguint_to_field(&BigUint::from_bytes_be(bytes))
}

/// Samples a uniformly distributed field element.
///
/// Uses rejection sampling inside arkworks, so the result is uniform over
/// `[0, p)` rather than biased towards small values.
pub fn random_field_element<R: RngCore + CryptoRng>(rng: &mut R) -> FieldElement {
    <FieldElement as ark_std::UniformRand>::rand(rng)
}

/// Serde adapter carrying a [`FieldElement`] as its decimal string.
pub mod serde_decimal {
    use super::{parse_field_element, to_decimal_string, FieldElement};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &FieldElement, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&to_decimal_string(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<FieldElement, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_field_element(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for sequences of field elements as decimal strings.
pub mod serde_decimal_seq {
    use super::{parse_field_element, to_decimal_string, FieldElement};
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[FieldElement], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&to_decimal_string(value))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<FieldElement>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|s| parse_field_element(s).map_err(serde::de::Error::custom))
            .collect()
    }
}
