//! Groth16 proving context over a loaded circuit and generator pair.

use std::sync::Arc;

use ark_bn254::{Bn254, Fr};
use ark_circom::CircomReduction;
use ark_groth16::{Groth16, PreparedVerifyingKey, Proof, ProvingKey, VerifyingKey};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize, Compress, SerializationError, Validate};
use ark_snark::{CircuitSpecificSetupSNARK, SNARK};
use circom_artifacts::{CalculatorPool, Generator, R1cs, WitnessError};
use rand::{CryptoRng, Rng};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::circuit::SynthesizedCircuit;
use crate::input::ProofInput;

type StorageGroth16 = Groth16<Bn254, CircomReduction>;

/// Failure establishing a proving context.
#[derive(Debug, Error)]
pub enum InitError {
    /// Circuit-specific key setup failed.
    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(#[from] ark_relations::r1cs::SynthesisError),
    /// Supplied key material did not deserialize as a proving key for this
    /// curve.
    #[error("invalid proving key material: {0}")]
    InvalidKeyMaterial(#[from] SerializationError),
}

/// Failure producing a proof.
#[derive(Debug, Error)]
pub enum ProveError {
    /// The witness vector does not have one entry per circuit wire.
    #[error("witness has {got} elements, circuit has {expected} wires")]
    WitnessSizeMismatch {
        /// Wire count of the loaded circuit.
        expected: usize,
        /// Length of the supplied witness.
        got: usize,
    },
    /// The witness violates a circuit constraint, reported by index.
    #[error("witness violates constraint {0}")]
    WitnessConstraintViolation(usize),
    /// The Groth16 backend rejected the assignment.
    #[error("proof generation failed: {0}")]
    ProofGeneration(#[from] ark_relations::r1cs::SynthesisError),
}

/// Failure verifying a proof.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The proof bytes did not decode as curve points.
    #[error("malformed proof: {0}")]
    MalformedProof(#[from] SerializationError),
    /// The public input vector does not match the verifying key shape.
    #[error("verifying key expects {expected} public inputs, got {got}")]
    FieldMismatch {
        /// Public input count the key was set up for.
        expected: usize,
        /// Public input count supplied by the caller.
        got: usize,
    },
    /// The pairing check itself failed to run.
    #[error("verification failed: {0}")]
    Verification(#[from] ark_relations::r1cs::SynthesisError),
}

/// Failure of the combined witness-then-prove path.
#[derive(Debug, Error)]
pub enum ProveRequestError {
    /// Witness generation rejected the inputs.
    #[error(transparent)]
    Witness(#[from] WitnessError),
    /// Proof generation rejected the witness.
    #[error(transparent)]
    Prove(#[from] ProveError),
}

/// A Groth16 proof over BN254, compressed on the wire.
#[derive(Clone, Debug, PartialEq)]
pub struct StorageProof(pub Proof<Bn254>);

impl StorageProof {
    /// Compressed canonical encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.0.serialized_size(Compress::Yes));
        self.0
            .serialize_compressed(&mut out)
            .unwrap_or_else(|_| unreachable!("serialization into a Vec cannot fail"));
        out
    }

    /// Decode and validate a compressed proof.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VerifyError> {
        let proof = Proof::deserialize_with_mode(bytes, Compress::Yes, Validate::Yes)
            .map_err(VerifyError::MalformedProof)?;
        Ok(Self(proof))
    }
}

/// Everything needed to prove and verify one circuit: the constraint system,
/// a pool of witness-generator instances, and the Groth16 key pair.
///
/// Shared-reference methods only, so one context serves concurrent provers.
pub struct ProvingContext {
    r1cs: Arc<R1cs>,
    pool: CalculatorPool,
    pk: ProvingKey<Bn254>,
    pvk: PreparedVerifyingKey<Bn254>,
}

impl ProvingContext {
    /// Builds a context from loaded artifacts.
    ///
    /// With `key_material` the proving key is decoded from its compressed
    /// canonical encoding; without it a circuit-specific setup runs against
    /// the supplied randomness.
    #[instrument(skip_all, fields(constraints = r1cs.constraints.len()))]
    pub fn init<R: Rng + CryptoRng>(
        r1cs: Arc<R1cs>,
        generator: Arc<Generator>,
        key_material: Option<&[u8]>,
        rng: &mut R,
    ) -> Result<Self, InitError> {
        let pk = match key_material {
            Some(bytes) => ProvingKey::deserialize_compressed(bytes)?,
            None => {
                debug!("no key material supplied, running circuit-specific setup");
                let (pk, _vk) = StorageGroth16::circuit_specific_setup(
                    SynthesizedCircuit::for_setup(Arc::clone(&r1cs)),
                    rng,
                )?;
                pk
            }
        };
        let pvk = StorageGroth16::process_vk(&pk.vk)?;
        Ok(Self {
            r1cs,
            pool: CalculatorPool::new(generator),
            pk,
            pvk,
        })
    }

    /// The circuit this context proves.
    pub fn r1cs(&self) -> &Arc<R1cs> {
        &self.r1cs
    }

    /// The verifying key, for export to external verifiers.
    pub fn verifying_key(&self) -> &VerifyingKey<Bn254> {
        &self.pk.vk
    }

    /// Runs the witness generator against the given inputs.
    pub fn compute_witness(&self, input: &impl ProofInput) -> Result<Vec<Fr>, WitnessError> {
        self.pool.calculate_witness(&input.to_signals())
    }

    /// Proves a full wire assignment, returning the proof and the public
    /// inputs a verifier needs alongside it.
    ///
    /// The witness is checked against every circuit constraint before the
    /// backend runs, so an unsatisfying assignment is reported by constraint
    /// index instead of surfacing as an opaque synthesis error.
    #[instrument(skip_all)]
    pub fn prove<R: Rng + CryptoRng>(
        &self,
        witness: Vec<Fr>,
        rng: &mut R,
    ) -> Result<(StorageProof, Vec<Fr>), ProveError> {
        if witness.len() != self.r1cs.num_wires {
            return Err(ProveError::WitnessSizeMismatch {
                expected: self.r1cs.num_wires,
                got: witness.len(),
            });
        }
        if let Some(index) = self.r1cs.violated_constraint(&witness) {
            return Err(ProveError::WitnessConstraintViolation(index));
        }
        let publics = witness[1..self.r1cs.num_instance()].to_vec();
        let circuit = SynthesizedCircuit::with_witness(Arc::clone(&self.r1cs), witness);
        let proof = StorageGroth16::prove(&self.pk, circuit, rng)?;
        debug!(publics = publics.len(), "proof generated");
        Ok((StorageProof(proof), publics))
    }

    /// Generates the witness for `input` and proves it in one step.
    pub fn prove_input<R: Rng + CryptoRng>(
        &self,
        input: &impl ProofInput,
        rng: &mut R,
    ) -> Result<(StorageProof, Vec<Fr>), ProveRequestError> {
        let witness = self.compute_witness(input)?;
        Ok(self.prove(witness, rng)?)
    }

    /// Verifies a proof against public inputs with this context's key.
    pub fn verify(&self, proof: &StorageProof, publics: &[Fr]) -> Result<bool, VerifyError> {
        Self::verify_with_key(&self.pvk, proof, publics)
    }

    /// Verifies against an explicit prepared key, for callers holding only
    /// the verifier half.
    pub fn verify_with_key(
        pvk: &PreparedVerifyingKey<Bn254>,
        proof: &StorageProof,
        publics: &[Fr],
    ) -> Result<bool, VerifyError> {
        let expected = pvk.vk.gamma_abc_g1.len() - 1;
        if publics.len() != expected {
            return Err(VerifyError::FieldMismatch {
                expected,
                got: publics.len(),
            });
        }
        Ok(StorageGroth16::verify_with_processed_vk(
            pvk, publics, &proof.0,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng as _;
    use rand::rngs::StdRng;
    use circom_artifacts::{ArtifactLoader, SignalMap, fixtures};

    fn test_context(rng: &mut StdRng) -> ProvingContext {
        let (r1cs, generator) = ArtifactLoader::new()
            .load_bytes(
                &fixtures::mul_r1cs_bytes(),
                fixtures::mul_generator_wat().as_bytes(),
            )
            .unwrap();
        ProvingContext::init(Arc::new(r1cs), Arc::new(generator), None, rng).unwrap()
    }

    fn mul_signals(a: u64, b: u64, c: u64) -> SignalMap {
        SignalMap::from([
            ("a".to_owned(), vec![Fr::from(a)]),
            ("b".to_owned(), vec![Fr::from(b)]),
            ("c".to_owned(), vec![Fr::from(c)]),
        ])
    }

    #[test]
    fn proves_and_verifies() {
        let mut rng = StdRng::seed_from_u64(7);
        let ctx = test_context(&mut rng);
        let (proof, publics) = ctx.prove_input(&mul_signals(3, 5, 15), &mut rng).unwrap();
        assert_eq!(publics, vec![Fr::from(3u64), Fr::from(5u64)]);
        assert!(ctx.verify(&proof, &publics).unwrap());
    }

    #[test]
    fn rejects_wrong_public_inputs() {
        let mut rng = StdRng::seed_from_u64(8);
        let ctx = test_context(&mut rng);
        let (proof, _) = ctx.prove_input(&mul_signals(3, 5, 15), &mut rng).unwrap();
        assert!(!ctx
            .verify(&proof, &[Fr::from(3u64), Fr::from(7u64)])
            .unwrap());
    }

    #[test]
    fn rejects_mismatched_public_input_count() {
        let mut rng = StdRng::seed_from_u64(9);
        let ctx = test_context(&mut rng);
        let (proof, _) = ctx.prove_input(&mul_signals(3, 5, 15), &mut rng).unwrap();
        assert!(matches!(
            ctx.verify(&proof, &[Fr::from(3u64)]),
            Err(VerifyError::FieldMismatch {
                expected: 2,
                got: 1
            })
        ));
    }

    #[test]
    fn unsatisfying_witness_is_reported_by_constraint() {
        let mut rng = StdRng::seed_from_u64(10);
        let ctx = test_context(&mut rng);
        let witness = ctx.compute_witness(&mul_signals(3, 5, 16)).unwrap();
        assert!(matches!(
            ctx.prove(witness, &mut rng),
            Err(ProveError::WitnessConstraintViolation(0))
        ));
    }

    #[test]
    fn short_witness_is_rejected() {
        let mut rng = StdRng::seed_from_u64(11);
        let ctx = test_context(&mut rng);
        assert!(matches!(
            ctx.prove(vec![Fr::from(1u64)], &mut rng),
            Err(ProveError::WitnessSizeMismatch {
                expected: 4,
                got: 1
            })
        ));
    }

    #[test]
    fn proof_bytes_round_trip() {
        let mut rng = StdRng::seed_from_u64(12);
        let ctx = test_context(&mut rng);
        let (proof, publics) = ctx.prove_input(&mul_signals(2, 6, 12), &mut rng).unwrap();
        let decoded = StorageProof::from_bytes(&proof.to_bytes()).unwrap();
        assert_eq!(decoded, proof);
        assert!(ctx.verify(&decoded, &publics).unwrap());
    }

    #[test]
    fn tampered_proof_fails_decode_or_verify() {
        let mut rng = StdRng::seed_from_u64(13);
        let ctx = test_context(&mut rng);
        let (proof, publics) = ctx.prove_input(&mul_signals(3, 5, 15), &mut rng).unwrap();
        let mut bytes = proof.to_bytes();
        bytes[1] ^= 0x01;
        match StorageProof::from_bytes(&bytes) {
            Err(VerifyError::MalformedProof(_)) => {}
            Ok(decoded) => assert!(!ctx.verify(&decoded, &publics).unwrap()),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn key_material_round_trips_through_init() {
        let mut rng = StdRng::seed_from_u64(14);
        let ctx = test_context(&mut rng);
        let mut key_bytes = Vec::new();
        ctx.pk.serialize_compressed(&mut key_bytes).unwrap();

        let (r1cs, generator) = ArtifactLoader::new()
            .load_bytes(
                &fixtures::mul_r1cs_bytes(),
                fixtures::mul_generator_wat().as_bytes(),
            )
            .unwrap();
        let restored = ProvingContext::init(
            Arc::new(r1cs),
            Arc::new(generator),
            Some(&key_bytes),
            &mut rng,
        )
        .unwrap();

        let (proof, publics) = restored
            .prove_input(&mul_signals(4, 4, 16), &mut rng)
            .unwrap();
        assert!(ctx.verify(&proof, &publics).unwrap());
    }

    #[test]
    fn garbage_key_material_is_rejected() {
        let mut rng = StdRng::seed_from_u64(15);
        let (r1cs, generator) = ArtifactLoader::new()
            .load_bytes(
                &fixtures::mul_r1cs_bytes(),
                fixtures::mul_generator_wat().as_bytes(),
            )
            .unwrap();
        assert!(matches!(
            ProvingContext::init(
                Arc::new(r1cs),
                Arc::new(generator),
                Some(&[0xde, 0xad, 0xbe, 0xef]),
                &mut rng,
            ),
            Err(InitError::InvalidKeyMaterial(_))
        ));
    }

    #[test]
    fn concurrent_provers_share_one_context() {
        let mut rng = StdRng::seed_from_u64(16);
        let ctx = Arc::new(test_context(&mut rng));
        std::thread::scope(|scope| {
            for i in 1u64..5 {
                let ctx = Arc::clone(&ctx);
                scope.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(100 + i);
                    let (proof, publics) = ctx
                        .prove_input(&mul_signals(i, 7, i * 7), &mut rng)
                        .unwrap();
                    assert!(ctx.verify(&proof, &publics).unwrap());
                });
            }
        });
    }
}
