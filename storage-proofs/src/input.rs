//! Input marshaling for witness generation.
//!
//! Callers can hand over signals three ways: as a preassembled [`SignalMap`],
//! as a typed [`StorageProofInput`], or as a JSON object following the
//! circom `input.json` convention (string, number or array values per
//! signal). Everything normalizes to a [`SignalMap`] before it reaches the
//! witness calculator.

use std::collections::BTreeMap;
use std::str::FromStr as _;

use ark_bn254::Fr;
use ark_ff::PrimeField as _;
use circom_artifacts::SignalMap;
use ruint::aliases::U256;
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq as _, Serializer};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure turning caller-supplied bytes into a signal map.
#[derive(Debug, Error)]
pub enum InputParseError {
    /// The bytes were not valid JSON.
    #[error("invalid input JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The JSON document was valid but not an object.
    #[error("input JSON must be an object mapping signal names to values")]
    NotAnObject,
    /// A signal value was not a string, number or array of those.
    #[error("unsupported value for signal `{0}`")]
    UnsupportedValue(String),
    /// A signal value could not be read as a decimal or hex field element.
    #[error("invalid field element for signal `{0}`")]
    InvalidFieldElement(String),
}

/// Anything that can be flattened into named witness-generator signals.
pub trait ProofInput {
    /// Produce the signal assignment, one `Fr` per flattened slot.
    fn to_signals(&self) -> SignalMap;
}

impl ProofInput for SignalMap {
    fn to_signals(&self) -> SignalMap {
        self.clone()
    }
}

/// The storage proof statement: a dataset sample plus its Merkle openings.
///
/// Field element values arrive as [`U256`] and are reduced into the scalar
/// field; `path` indices are small integers and carried as such.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageProofInput {
    /// Sampled data chunks, flattened field elements.
    pub chunks: Vec<U256>,
    /// Merkle siblings for every sampled chunk, flattened.
    pub siblings: Vec<U256>,
    /// Intermediate chunk hashes.
    pub hashes: Vec<U256>,
    /// Merkle path directions for each sample.
    pub path: Vec<i32>,
    /// Prover public key commitment.
    pub pubkey: U256,
    /// Dataset Merkle root.
    pub root: U256,
    /// Proof-instance salt.
    pub salt: U256,
}

fn u256_to_fr(value: &U256) -> Fr {
    Fr::from_le_bytes_mod_order(&value.to_le_bytes::<32>())
}

impl ProofInput for StorageProofInput {
    fn to_signals(&self) -> SignalMap {
        let many = |values: &[U256]| values.iter().map(u256_to_fr).collect::<Vec<_>>();
        let mut signals = BTreeMap::new();
        signals.insert("chunks".to_owned(), many(&self.chunks));
        signals.insert("siblings".to_owned(), many(&self.siblings));
        signals.insert("hashes".to_owned(), many(&self.hashes));
        signals.insert(
            "path".to_owned(),
            self.path.iter().map(|p| Fr::from(*p as i64)).collect(),
        );
        signals.insert("pubkey".to_owned(), vec![u256_to_fr(&self.pubkey)]);
        signals.insert("root".to_owned(), vec![u256_to_fr(&self.root)]);
        signals.insert("salt".to_owned(), vec![u256_to_fr(&self.salt)]);
        signals
    }
}

/// The public inputs of a proof, serialized as decimal strings the way
/// snarkjs writes its `public.json`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublicInput(pub Vec<Fr>);

impl Serialize for PublicInput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for element in &self.0 {
            seq.serialize_element(&element.to_string())?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for PublicInput {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DecimalSeq;

        impl<'de> Visitor<'de> for DecimalSeq {
            type Value = Vec<Fr>;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a sequence of decimal field element strings")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut elements = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(text) = seq.next_element::<String>()? {
                    let element = Fr::from_str(&text)
                        .map_err(|_| de::Error::custom(format!("invalid field element `{text}`")))?;
                    elements.push(element);
                }
                Ok(elements)
            }
        }

        deserializer.deserialize_seq(DecimalSeq).map(PublicInput)
    }
}

/// Parse a circom-style input JSON object into a signal map.
///
/// Values may be decimal strings, `0x`-prefixed hex strings, non-negative
/// integers, or (nested) arrays of those, which are flattened in order.
pub fn signals_from_json(bytes: &[u8]) -> Result<SignalMap, InputParseError> {
    let document: serde_json::Value = serde_json::from_slice(bytes)?;
    let serde_json::Value::Object(entries) = document else {
        return Err(InputParseError::NotAnObject);
    };
    let mut signals = BTreeMap::new();
    for (name, value) in entries {
        let mut elements = Vec::new();
        flatten_value(&name, &value, &mut elements)?;
        signals.insert(name, elements);
    }
    Ok(signals)
}

fn flatten_value(
    name: &str,
    value: &serde_json::Value,
    out: &mut Vec<Fr>,
) -> Result<(), InputParseError> {
    match value {
        serde_json::Value::String(text) => {
            out.push(fr_from_text(name, text)?);
            Ok(())
        }
        serde_json::Value::Number(number) => {
            let element = if let Some(unsigned) = number.as_u64() {
                Fr::from(unsigned)
            } else if let Some(signed) = number.as_i64() {
                Fr::from(signed)
            } else {
                return Err(InputParseError::InvalidFieldElement(name.to_owned()));
            };
            out.push(element);
            Ok(())
        }
        serde_json::Value::Array(items) => {
            for item in items {
                flatten_value(name, item, out)?;
            }
            Ok(())
        }
        _ => Err(InputParseError::UnsupportedValue(name.to_owned())),
    }
}

fn fr_from_text(name: &str, text: &str) -> Result<Fr, InputParseError> {
    let value = if let Some(hex_digits) = text.strip_prefix("0x") {
        U256::from_str_radix(hex_digits, 16)
    } else {
        U256::from_str_radix(text, 10)
    }
    .map_err(|_| InputParseError::InvalidFieldElement(name.to_owned()))?;
    Ok(u256_to_fr(&value))
}
