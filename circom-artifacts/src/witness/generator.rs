use std::fmt;

use tracing::debug;
use wasmer::{Engine, Module};

use super::WitnessCalculator;

/// Errors that can occur while loading or probing a witness generator module.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorParserError {
    /// The bytes did not compile as a WASM module.
    #[error("failed to compile witness generator module")]
    Compile(#[from] wasmer::CompileError),
    /// The module compiled but could not be instantiated.
    #[error("failed to instantiate witness generator module")]
    Instantiation(#[from] wasmer::InstantiationError),
    /// The module does not export the circom 2 calculator interface.
    #[error("witness generator does not export the circom 2 interface: {0}")]
    MissingExport(#[from] wasmer::ExportError),
    /// A probe call into the module trapped.
    #[error("witness generator probe trapped: {0}")]
    Probe(#[from] wasmer::RuntimeError),
    /// The module reports a circom version this crate does not support.
    #[error("unsupported circom version {0}")]
    UnsupportedVersion(i32),
    /// The module reports a field width other than the 8 words of BN254.
    #[error("unsupported field width of {0} 32-bit words")]
    UnsupportedFieldWidth(i32),
    /// The module's field modulus differs from the paired circuit's.
    #[error("witness generator field modulus does not match the circuit")]
    PrimeMismatch,
    /// The module's witness size differs from the circuit's wire count.
    #[error("witness generator produces {declared} signals, circuit declares {expected} wires")]
    WitnessSizeMismatch {
        /// Witness size the generator reports.
        declared: usize,
        /// Wire count the circuit declares.
        expected: usize,
    },
    /// The module's input signal count differs from the circuit's.
    #[error("witness generator expects {declared} input signals, circuit declares {expected}")]
    InputCountMismatch {
        /// Input count the generator reports.
        declared: usize,
        /// Input count the circuit declares.
        expected: usize,
    },
}

/// Interface description probed from a loaded generator module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorInfo {
    /// The circom major version the module reports.
    pub version: i32,
    /// Field element width in 32-bit words (8 for BN254).
    pub field_words: usize,
    /// The field modulus, little-endian.
    pub prime_le: Vec<u8>,
    /// Length of the witness vector the module produces.
    pub witness_size: usize,
    /// Total number of input signal values the module requires.
    pub input_count: usize,
}

/// A loaded witness generator: the compiled WASM module plus its probed
/// interface. Immutable once loaded; instantiation produces independent
/// [`WitnessCalculator`]s that may run on any thread.
pub struct Generator {
    engine: Engine,
    module: Module,
    info: GeneratorInfo,
}

impl Generator {
    /// Compiles the module, instantiates it once, and probes its interface.
    ///
    /// Fails on anything that is not a circom 2.x witness generator for a
    /// 32-byte field; pairing validation against a specific circuit is done
    /// by [`crate::ArtifactLoader`].
    pub fn load(bytes: &[u8]) -> Result<Self, GeneratorParserError> {
        let engine = Engine::default();
        let module = Module::new(&engine, bytes)?;
        let probe = WitnessCalculator::instantiate(&engine, &module)?;
        let info = probe.info().clone();
        if info.version != 2 {
            return Err(GeneratorParserError::UnsupportedVersion(info.version));
        }
        debug!(
            witness_size = info.witness_size,
            input_count = info.input_count,
            "loaded witness generator"
        );
        Ok(Self {
            engine,
            module,
            info,
        })
    }

    /// The probed interface description.
    pub fn info(&self) -> &GeneratorInfo {
        &self.info
    }

    /// Instantiates a fresh calculator from the compiled module.
    pub fn instantiate(&self) -> Result<WitnessCalculator, GeneratorParserError> {
        WitnessCalculator::instantiate(&self.engine, &self.module)
    }
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generator").field("info", &self.info).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn probes_interface() {
        let generator = Generator::load(fixtures::mul_generator_wat().as_bytes()).unwrap();
        let info = generator.info();
        assert_eq!(info.version, 2);
        assert_eq!(info.field_words, 8);
        assert_eq!(info.witness_size, 4);
        assert_eq!(info.input_count, 3);
        assert_eq!(info.prime_le, fixtures::BN254_PRIME_LE);
    }

    #[test]
    fn rejects_bogus_field_width() {
        // A hostile module may report any width, including a negative one
        // that would turn into a huge word count; loading must fail cleanly.
        for words in [-1, 0, 7, i32::MAX] {
            let wat = fixtures::generator_wat_with_field_words(words);
            let err = Generator::load(wat.as_bytes()).unwrap_err();
            assert!(
                matches!(err, GeneratorParserError::UnsupportedFieldWidth(w) if w == words),
                "width {words} gave {err:?}"
            );
        }
    }

    #[test]
    fn rejects_garbage_bytes() {
        let err = Generator::load(b"not a wasm module").unwrap_err();
        assert!(matches!(err, GeneratorParserError::Compile(_)));
    }

    #[test]
    fn rejects_module_without_circom_interface() {
        let err = Generator::load(b"(module)").unwrap_err();
        assert!(matches!(err, GeneratorParserError::MissingExport(_)));
    }
}
