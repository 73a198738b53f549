#![warn(missing_docs)]
//! Groth16 proving contexts for circom storage-proof circuits.
//!
//! A [`ProvingContext`] pairs a loaded constraint system with its witness
//! generator and Groth16 key material, and produces proofs that a party is
//! storing specific data. Contexts are read-only after initialization and
//! safe to use from any number of threads; the [`ContextManager`] hands out
//! opaque handles to them and guarantees at-most-once initialization per
//! artifact pair.
//!
//! Circuits are defined with circom over BN254; key material can either be
//! derived from the circuit at initialization or supplied alongside the
//! artifacts.

mod circuit;
mod context;
mod input;
mod manager;

pub use circuit::SynthesizedCircuit;
pub use context::{
    InitError, ProveError, ProveRequestError, ProvingContext, StorageProof, VerifyError,
};
pub use input::{InputParseError, ProofInput, PublicInput, StorageProofInput, signals_from_json};
pub use manager::{AcquireError, ContextHandle, ContextManager, HandleError};

pub use circom_artifacts::{
    ArtifactLoader, Generator, LoadError, R1cs, SignalMap, WitnessError,
};
