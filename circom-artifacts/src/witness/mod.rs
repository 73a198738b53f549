//! Loading and execution of compiled circom witness generators.
//!
//! A witness generator is a WASM module emitted by circom 2.x. It exposes a
//! small numeric interface: field elements travel as 32-bit word chunks
//! through a shared buffer, and input signals are addressed by the FNV-1a
//! hash of their name. [`Generator`] owns the compiled module and the probed
//! interface description; [`WitnessCalculator`] is one instantiation of it;
//! [`CalculatorPool`] reuses instantiations across sequential proof requests
//! while never sharing one between concurrent callers.

mod calculator;
mod generator;

pub use calculator::WitnessCalculator;
pub use generator::{Generator, GeneratorInfo, GeneratorParserError};

use std::collections::BTreeMap;
use std::hash::Hasher as _;
use std::sync::{Arc, Mutex};

use ark_bn254::Fr;
use fnv::FnvHasher;

/// Named input signals for a witness computation. Single-valued signals are
/// one-element vectors; array signals are flattened in declaration order.
pub type SignalMap = BTreeMap<String, Vec<Fr>>;

/// Errors surfaced per witness computation. None of these invalidate the
/// generator or any proving context built on top of it.
#[derive(Debug, thiserror::Error)]
pub enum WitnessError {
    /// An input signal name the generator does not declare.
    #[error("input signal `{0}` is not declared by the circuit")]
    UnknownInput(String),
    /// An input signal was supplied with the wrong number of values.
    #[error("input signal `{name}` expects {declared} values, got {supplied}")]
    TypeMismatch {
        /// The signal name.
        name: String,
        /// The arity the generator declares.
        declared: usize,
        /// The arity supplied by the caller.
        supplied: usize,
    },
    /// Required input signals were left unset. The generator only reports the
    /// outstanding count, not the missing names.
    #[error("missing input signals: {supplied} of {required} set")]
    MissingInput {
        /// Signals actually set.
        supplied: usize,
        /// Signals the circuit requires.
        required: usize,
    },
    /// The generator's internal computation signalled an unrecoverable fault,
    /// e.g. a failed circuit assertion.
    #[error("witness generator trapped: {0}")]
    ExecutionTrap(#[source] wasmer::RuntimeError),
    /// A fresh calculator could not be instantiated from the loaded module.
    #[error("failed to instantiate witness calculator")]
    Instantiation(#[source] Box<GeneratorParserError>),
}

/// Splits the FNV-1a hash of a signal name into the `(msb, lsb)` word pair of
/// the circom calling convention.
pub(crate) fn fnv(name: &str) -> (i32, i32) {
    let mut hasher = FnvHasher::default();
    hasher.write(name.as_bytes());
    let h = hasher.finish();
    ((h >> 32) as u32 as i32, (h & 0xffff_ffff) as u32 as i32)
}

/// A pool of instantiated calculators over one generator.
///
/// Witness computation needs exclusive access to a WASM instance, but the
/// compiled module is shared. The pool hands an idle instance to each caller
/// and takes it back afterwards, so repeated proofs against one context skip
/// re-instantiation while concurrent proofs each get their own instance.
pub struct CalculatorPool {
    generator: Arc<Generator>,
    idle: Mutex<Vec<WitnessCalculator>>,
}

impl CalculatorPool {
    /// Creates an empty pool over the given generator.
    pub fn new(generator: Arc<Generator>) -> Self {
        Self {
            generator,
            idle: Mutex::new(Vec::new()),
        }
    }

    /// The generator this pool instantiates.
    pub fn generator(&self) -> &Arc<Generator> {
        &self.generator
    }

    /// Computes a witness on an idle calculator, instantiating one if all are
    /// busy. The instance is returned to the pool only on success; a trapped
    /// instance is discarded rather than reused.
    pub fn calculate_witness(&self, inputs: &SignalMap) -> Result<Vec<Fr>, WitnessError> {
        let mut calculator = self.checkout()?;
        let witness = calculator.calculate_witness(inputs)?;
        self.idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(calculator);
        Ok(witness)
    }

    fn checkout(&self) -> Result<WitnessCalculator, WitnessError> {
        let idle = self
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();
        match idle {
            Some(calculator) => Ok(calculator),
            None => self
                .generator
                .instantiate()
                .map_err(|e| WitnessError::Instantiation(Box::new(e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn mul_generator() -> Arc<Generator> {
        Arc::new(Generator::load(fixtures::mul_generator_wat().as_bytes()).unwrap())
    }

    fn mul_inputs(a: u64, b: u64, c: u64) -> SignalMap {
        SignalMap::from([
            ("a".to_string(), vec![Fr::from(a)]),
            ("b".to_string(), vec![Fr::from(b)]),
            ("c".to_string(), vec![Fr::from(c)]),
        ])
    }

    #[test]
    fn fnv_matches_circom_convention() {
        // FNV-1a 64 of "a" is 0xaf63dc4c8601ec8c.
        assert_eq!(fnv("a"), (0xaf63dc4cu32 as i32, 0x8601ec8cu32 as i32));
    }

    #[test]
    fn computes_witness() {
        let pool = CalculatorPool::new(mul_generator());
        let witness = pool.calculate_witness(&mul_inputs(3, 5, 15)).unwrap();
        assert_eq!(
            witness,
            vec![
                Fr::from(1u64),
                Fr::from(3u64),
                Fr::from(5u64),
                Fr::from(15u64)
            ]
        );
    }

    #[test]
    fn witness_is_deterministic() {
        let generator = mul_generator();
        let first = CalculatorPool::new(generator.clone())
            .calculate_witness(&mul_inputs(7, 11, 77))
            .unwrap();
        let second = CalculatorPool::new(generator)
            .calculate_witness(&mul_inputs(7, 11, 77))
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn reuses_idle_calculators() {
        let pool = CalculatorPool::new(mul_generator());
        pool.calculate_witness(&mul_inputs(2, 3, 6)).unwrap();
        pool.calculate_witness(&mul_inputs(4, 5, 20)).unwrap();
        let idle = pool.idle.lock().unwrap();
        assert_eq!(idle.len(), 1);
    }

    #[test]
    fn missing_input_is_reported() {
        let pool = CalculatorPool::new(mul_generator());
        let mut inputs = mul_inputs(3, 5, 15);
        inputs.remove("c");
        let err = pool.calculate_witness(&inputs).unwrap_err();
        assert!(matches!(
            err,
            WitnessError::MissingInput {
                supplied: 2,
                required: 3
            }
        ));
    }

    #[test]
    fn unknown_input_is_reported() {
        let pool = CalculatorPool::new(mul_generator());
        let mut inputs = mul_inputs(3, 5, 15);
        inputs.insert("d".to_string(), vec![Fr::from(1u64)]);
        let err = pool.calculate_witness(&inputs).unwrap_err();
        assert!(matches!(err, WitnessError::UnknownInput(name) if name == "d"));
    }

    #[test]
    fn arity_mismatch_is_reported() {
        let pool = CalculatorPool::new(mul_generator());
        let mut inputs = mul_inputs(3, 5, 15);
        inputs.insert("a".to_string(), vec![Fr::from(1u64), Fr::from(2u64)]);
        let err = pool.calculate_witness(&inputs).unwrap_err();
        assert!(matches!(
            err,
            WitnessError::TypeMismatch {
                declared: 1,
                supplied: 2,
                ..
            }
        ));
    }

    #[test]
    fn trapping_generator_is_reported_and_discarded() {
        let generator =
            Arc::new(Generator::load(fixtures::trapping_generator_wat().as_bytes()).unwrap());
        let pool = CalculatorPool::new(generator);
        let err = pool.calculate_witness(&mul_inputs(3, 5, 15)).unwrap_err();
        assert!(matches!(err, WitnessError::ExecutionTrap(_)));
        assert!(err.to_string().to_lowercase().contains("assert"));
        let idle = pool.idle.lock().unwrap();
        assert!(idle.is_empty());
    }

    #[test]
    fn concurrent_computations_share_a_pool() {
        let pool = CalculatorPool::new(mul_generator());
        std::thread::scope(|scope| {
            for i in 1..=4u64 {
                let pool = &pool;
                scope.spawn(move || {
                    let witness = pool
                        .calculate_witness(&mul_inputs(i, i + 1, i * (i + 1)))
                        .unwrap();
                    assert_eq!(witness[3], Fr::from(i * (i + 1)));
                });
            }
        });
    }
}
