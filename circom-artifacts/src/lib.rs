#![warn(missing_docs)]
//! Loading and execution of circom circuit artifacts.
//!
//! A storage-proof circuit ships as two pre-built files produced by the circom
//! toolchain: the R1CS constraint file describing the circuit and the compiled
//! WASM witness generator computing full assignments for it. This crate parses
//! the former ([`R1cs`]), loads and executes the latter ([`Generator`],
//! [`WitnessCalculator`]), and cross-validates the pair ([`ArtifactLoader`]).
//! Only the BN254 scalar field ("bn128" in circom terms) is supported.

mod r1cs;
mod witness;

#[cfg(any(test, feature = "test-fixtures"))]
pub mod fixtures;

pub use r1cs::{Constraint, R1cs, R1csParserError};
pub use witness::{
    CalculatorPool, Generator, GeneratorInfo, GeneratorParserError, SignalMap, WitnessCalculator,
    WitnessError,
};

use std::path::Path;

use sha2::Digest as _;
use tracing::info;

/// Errors surfaced while loading an artifact pair.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The R1CS file did not parse as a valid circom constraint system.
    #[error("malformed circuit: {0}")]
    MalformedCircuit(#[source] R1csParserError),
    /// The witness generator did not load, or its interface does not match
    /// the circuit it is paired with.
    #[error("malformed witness generator: {0}")]
    MalformedGenerator(#[source] GeneratorParserError),
    /// The SHA-256 fingerprint of the R1CS file did not match the pinned value.
    #[error("invalid r1cs - wrong sha256 fingerprint: {0}")]
    CircuitFingerprintMismatch(String),
    /// The SHA-256 fingerprint of the generator did not match the pinned value.
    #[error("invalid generator - wrong sha256 fingerprint: {0}")]
    GeneratorFingerprintMismatch(String),
    /// Any I/O error encountered while reading the artifact files.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Loads and cross-validates an `(R1CS, witness generator)` artifact pair.
///
/// Optionally pins the SHA-256 fingerprint of either file, for deployments
/// where the artifacts are fetched rather than bundled.
#[derive(Debug, Default)]
pub struct ArtifactLoader {
    fingerprint_r1cs: Option<String>,
    fingerprint_generator: Option<String>,
}

impl ArtifactLoader {
    /// Creates a loader with no fingerprint pinning.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires the R1CS bytes to hash to the given lowercase hex SHA-256.
    pub fn fingerprint_r1cs(mut self, fingerprint: String) -> Self {
        self.fingerprint_r1cs = Some(fingerprint);
        self
    }

    /// Requires the generator bytes to hash to the given lowercase hex SHA-256.
    pub fn fingerprint_generator(mut self, fingerprint: String) -> Self {
        self.fingerprint_generator = Some(fingerprint);
        self
    }

    /// Reads both artifacts from disk and loads them via [`Self::load_bytes`].
    pub fn load_files(
        self,
        r1cs_path: impl AsRef<Path>,
        generator_path: impl AsRef<Path>,
    ) -> Result<(R1cs, Generator), LoadError> {
        let r1cs_bytes = std::fs::read(r1cs_path)?;
        let generator_bytes = std::fs::read(generator_path)?;
        self.load_bytes(&r1cs_bytes, &generator_bytes)
    }

    /// Parses both artifacts from memory and validates that the generator
    /// matches the circuit: same field modulus, a witness slot per circuit
    /// wire, and an input signal per declared circuit input.
    ///
    /// No satisfiability checking happens here; a witness is only checked
    /// against the constraints when a proof is requested.
    pub fn load_bytes(
        self,
        r1cs_bytes: &[u8],
        generator_bytes: &[u8],
    ) -> Result<(R1cs, Generator), LoadError> {
        if let Some(should_fingerprint) = self.fingerprint_r1cs {
            let is_fingerprint = hex::encode(sha2::Sha256::digest(r1cs_bytes));
            if is_fingerprint != should_fingerprint {
                return Err(LoadError::CircuitFingerprintMismatch(is_fingerprint));
            }
        }
        if let Some(should_fingerprint) = self.fingerprint_generator {
            let is_fingerprint = hex::encode(sha2::Sha256::digest(generator_bytes));
            if is_fingerprint != should_fingerprint {
                return Err(LoadError::GeneratorFingerprintMismatch(is_fingerprint));
            }
        }

        let r1cs = R1cs::read(r1cs_bytes).map_err(LoadError::MalformedCircuit)?;
        let generator = Generator::load(generator_bytes).map_err(LoadError::MalformedGenerator)?;

        let info = generator.info();
        if info.prime_le != r1cs.prime_le {
            return Err(LoadError::MalformedGenerator(
                GeneratorParserError::PrimeMismatch,
            ));
        }
        if info.witness_size != r1cs.num_wires {
            return Err(LoadError::MalformedGenerator(
                GeneratorParserError::WitnessSizeMismatch {
                    declared: info.witness_size,
                    expected: r1cs.num_wires,
                },
            ));
        }
        let circuit_inputs = r1cs.num_public_inputs + r1cs.num_private_inputs;
        if info.input_count != circuit_inputs {
            return Err(LoadError::MalformedGenerator(
                GeneratorParserError::InputCountMismatch {
                    declared: info.input_count,
                    expected: circuit_inputs,
                },
            ));
        }

        info!(
            wires = r1cs.num_wires,
            constraints = r1cs.constraints.len(),
            inputs = circuit_inputs,
            "loaded circuit artifact pair"
        );
        Ok((r1cs, generator))
    }
}

pub(crate) mod reader_utils {
    use ark_ff::PrimeField;
    use std::io::{self, Read};

    pub(crate) fn prime_field_from_reader<F: PrimeField>(
        mut reader: impl Read,
        size: usize,
    ) -> io::Result<F> {
        let mut buf = vec![0u8; size];
        reader.read_exact(&mut buf[..])?;
        Ok(F::from_le_bytes_mod_order(&buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn loads_valid_artifact_pair() {
        let (r1cs, generator) = ArtifactLoader::new()
            .load_bytes(&fixtures::mul_r1cs_bytes(), fixtures::mul_generator_wat().as_bytes())
            .unwrap();
        assert_eq!(r1cs.num_wires, 4);
        assert_eq!(generator.info().witness_size, 4);
        assert_eq!(generator.info().input_count, 3);
    }

    #[test]
    fn rejects_witness_size_mismatch() {
        let wat = fixtures::generator_wat(5, false);
        let err = ArtifactLoader::new()
            .load_bytes(&fixtures::mul_r1cs_bytes(), wat.as_bytes())
            .unwrap_err();
        assert!(matches!(
            err,
            LoadError::MalformedGenerator(GeneratorParserError::WitnessSizeMismatch {
                declared: 5,
                expected: 4,
            })
        ));
    }

    #[test]
    fn rejects_wrong_fingerprint() {
        let err = ArtifactLoader::new()
            .fingerprint_r1cs("00".repeat(32))
            .load_bytes(&fixtures::mul_r1cs_bytes(), fixtures::mul_generator_wat().as_bytes())
            .unwrap_err();
        assert!(matches!(err, LoadError::CircuitFingerprintMismatch(_)));
    }

    #[test]
    fn accepts_correct_fingerprint() {
        use sha2::Digest as _;
        let r1cs_bytes = fixtures::mul_r1cs_bytes();
        let fingerprint = hex::encode(sha2::Sha256::digest(&r1cs_bytes));
        ArtifactLoader::new()
            .fingerprint_r1cs(fingerprint)
            .load_bytes(&r1cs_bytes, fixtures::mul_generator_wat().as_bytes())
            .unwrap();
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = ArtifactLoader::new()
            .load_files("/nonexistent/circuit.r1cs", "/nonexistent/circuit.wasm")
            .unwrap_err();
        assert!(matches!(err, LoadError::Io(_)));
    }
}
