//! Adapter from a loaded R1CS to arkworks constraint synthesis.

use std::sync::Arc;

use ark_bn254::Fr;
use ark_ff::{One as _, Zero as _};
use ark_relations::r1cs::{
    ConstraintSynthesizer, ConstraintSystemRef, LinearCombination, SynthesisError, Variable,
};
use circom_artifacts::R1cs;

/// A loaded circuit, optionally carrying a full assignment, in the form the
/// Groth16 backend consumes.
///
/// Circom orders wires as `[one, public outputs, public inputs, private...]`,
/// which maps directly onto arkworks' instance-then-witness split; wire `i`
/// becomes instance variable `i` for `i < num_instance` and witness variable
/// `i - num_instance` otherwise.
#[derive(Clone)]
pub struct SynthesizedCircuit {
    r1cs: Arc<R1cs>,
    witness: Option<Arc<Vec<Fr>>>,
}

impl SynthesizedCircuit {
    /// Circuit shape only, for key setup. Assignment closures yield dummy
    /// values; setup never evaluates them.
    pub fn for_setup(r1cs: Arc<R1cs>) -> Self {
        Self {
            r1cs,
            witness: None,
        }
    }

    /// Circuit plus the full assignment to prove against. `witness` must have
    /// length `r1cs.num_wires`.
    pub fn with_witness(r1cs: Arc<R1cs>, witness: Vec<Fr>) -> Self {
        Self {
            r1cs,
            witness: Some(Arc::new(witness)),
        }
    }
}

impl ConstraintSynthesizer<Fr> for SynthesizedCircuit {
    fn generate_constraints(self, cs: ConstraintSystemRef<Fr>) -> Result<(), SynthesisError> {
        let num_instance = self.r1cs.num_instance();
        for wire in 1..num_instance {
            let value = match &self.witness {
                Some(w) => w[wire],
                None => Fr::one(),
            };
            cs.new_input_variable(|| Ok(value))?;
        }
        for wire in num_instance..self.r1cs.num_wires {
            let value = match &self.witness {
                Some(w) => w[wire],
                None => Fr::zero(),
            };
            cs.new_witness_variable(|| Ok(value))?;
        }

        let variable = |wire: usize| {
            if wire < num_instance {
                Variable::Instance(wire)
            } else {
                Variable::Witness(wire - num_instance)
            }
        };
        let combination = |terms: &[(usize, Fr)]| {
            terms
                .iter()
                .fold(LinearCombination::zero(), |lc, (wire, coeff)| {
                    lc + (*coeff, variable(*wire))
                })
        };
        for constraint in &self.r1cs.constraints {
            cs.enforce_constraint(
                combination(&constraint.a),
                combination(&constraint.b),
                combination(&constraint.c),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_relations::r1cs::ConstraintSystem;
    use circom_artifacts::fixtures;

    #[test]
    fn synthesizes_satisfied_system() {
        let r1cs = Arc::new(R1cs::read(&fixtures::mul_r1cs_bytes()).unwrap());
        let witness = vec![
            Fr::from(1u64),
            Fr::from(3u64),
            Fr::from(5u64),
            Fr::from(15u64),
        ];
        let cs = ConstraintSystem::<Fr>::new_ref();
        SynthesizedCircuit::with_witness(r1cs, witness)
            .generate_constraints(cs.clone())
            .unwrap();
        assert_eq!(cs.num_constraints(), 1);
        assert_eq!(cs.num_instance_variables(), 3);
        assert!(cs.is_satisfied().unwrap());
    }

    #[test]
    fn synthesizes_unsatisfied_system() {
        let r1cs = Arc::new(R1cs::read(&fixtures::mul_r1cs_bytes()).unwrap());
        let witness = vec![
            Fr::from(1u64),
            Fr::from(3u64),
            Fr::from(5u64),
            Fr::from(16u64),
        ];
        let cs = ConstraintSystem::<Fr>::new_ref();
        SynthesizedCircuit::with_witness(r1cs, witness)
            .generate_constraints(cs.clone())
            .unwrap();
        assert!(!cs.is_satisfied().unwrap());
    }
}
