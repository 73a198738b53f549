//! Hand-built artifact fixtures for test suites.
//!
//! The circuit is the smallest useful member of the family: one constraint
//! `a * b = c` over BN254, with `a` and `b` public inputs and `c` a private
//! input. The R1CS image follows the circom container layout byte for byte,
//! and the generator is a WAT module implementing the circom 2 WASM calling
//! convention for those three signals. Because none of the signals is
//! derived, the module needs no field arithmetic: it stores the values the
//! host writes and reads them back as the witness.

use std::io::Write as _;

use byteorder::{LittleEndian, WriteBytesExt as _};

/// The BN254 scalar field modulus, little-endian.
pub const BN254_PRIME_LE: [u8; 32] = [
    0x01, 0x00, 0x00, 0xf0, 0x93, 0xf5, 0xe1, 0x43, 0x91, 0x70, 0xb9, 0x79, 0x48, 0xe8, 0x33,
    0x28, 0x5d, 0x58, 0x81, 0x81, 0xb6, 0x45, 0x50, 0xb8, 0x29, 0xa0, 0x31, 0xe1, 0x72, 0x4e,
    0x64, 0x30,
];

/// R1CS image of the `a * b = c` circuit.
pub fn mul_r1cs_bytes() -> Vec<u8> {
    r1cs_bytes(&BN254_PRIME_LE, 1)
}

/// Same image with a different field modulus in the header.
pub fn r1cs_bytes_with_prime(prime_le: &[u8; 32]) -> Vec<u8> {
    r1cs_bytes(prime_le, 1)
}

/// Same image with the header declaring `declared_constraints` while the
/// constraint section still holds exactly one.
pub fn r1cs_bytes_with_declared_constraints(declared_constraints: u32) -> Vec<u8> {
    r1cs_bytes(&BN254_PRIME_LE, declared_constraints)
}

fn r1cs_bytes(prime_le: &[u8; 32], declared_constraints: u32) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"r1cs");
    out.write_u32::<LittleEndian>(1).unwrap(); // version
    out.write_u32::<LittleEndian>(3).unwrap(); // sections

    // Header: 32-byte field, 4 wires (one, a, b, c), 2 public inputs, 1
    // private input, 1 constraint.
    out.write_u32::<LittleEndian>(1).unwrap();
    out.write_u64::<LittleEndian>(4 + 32 + 4 * 4 + 8 + 4).unwrap();
    out.write_u32::<LittleEndian>(32).unwrap();
    out.write_all(prime_le).unwrap();
    out.write_u32::<LittleEndian>(4).unwrap(); // wires
    out.write_u32::<LittleEndian>(0).unwrap(); // public outputs
    out.write_u32::<LittleEndian>(2).unwrap(); // public inputs
    out.write_u32::<LittleEndian>(1).unwrap(); // private inputs
    out.write_u64::<LittleEndian>(4).unwrap(); // labels
    out.write_u32::<LittleEndian>(declared_constraints).unwrap();

    // Constraints: wire1 * wire2 = wire3, all coefficients one.
    out.write_u32::<LittleEndian>(2).unwrap();
    out.write_u64::<LittleEndian>(3 * (4 + 4 + 32)).unwrap();
    for wire in [1u32, 2, 3] {
        out.write_u32::<LittleEndian>(1).unwrap(); // terms in this factor
        out.write_u32::<LittleEndian>(wire).unwrap();
        let mut coeff = [0u8; 32];
        coeff[0] = 1;
        out.write_all(&coeff).unwrap();
    }

    // Wire-to-label map: identity.
    out.write_u32::<LittleEndian>(3).unwrap();
    out.write_u64::<LittleEndian>(4 * 8).unwrap();
    for label in 0u64..4 {
        out.write_u64::<LittleEndian>(label).unwrap();
    }

    out
}

/// WAT witness generator matching [`mul_r1cs_bytes`].
pub fn mul_generator_wat() -> String {
    generator_wat(4, false)
}

/// Generator whose `init` raises a circom assertion, as a circuit whose
/// constraints reject every input would.
pub fn trapping_generator_wat() -> String {
    generator_wat(4, true)
}

/// Generator whose `getFieldNumLen32` reports the given width instead of
/// the 8 words of BN254. Loading it must fail.
pub fn generator_wat_with_field_words(field_words: i32) -> String {
    generator_wat(4, false).replace(
        "(func (export \"getFieldNumLen32\") (result i32) (i32.const 8))",
        &format!("(func (export \"getFieldNumLen32\") (result i32) (i32.const {field_words}))"),
    )
}

/// WAT witness generator for the mul circuit with a configurable declared
/// witness size (a mismatched size must be rejected at load) and an optional
/// assertion failure on `init`.
///
/// Layout: the shared read/write buffer lives at address 0 (8 words), the
/// four 32-byte witness slots start at address 64. Signal name hashes are
/// FNV-1a 64 of `"a"`, `"b"`, `"c"`.
pub fn generator_wat(witness_size: usize, trap_on_init: bool) -> String {
    let init_body = if trap_on_init {
        "(call $exception_handler (i32.const 4)) (unreachable)"
    } else {
        ""
    };
    format!(
        r#"(module
  (import "runtime" "exceptionHandler" (func $exception_handler (param i32)))
  (memory (export "memory") 1)
  (global $inputs_set (mut i32) (i32.const 0))

  (func (export "getVersion") (result i32) (i32.const 2))
  (func (export "getFieldNumLen32") (result i32) (i32.const 8))
  (func (export "getRawPrime")
    (i32.store (i32.const 0) (i32.const 0xf0000001))
    (i32.store (i32.const 4) (i32.const 0x43e1f593))
    (i32.store (i32.const 8) (i32.const 0x79b97091))
    (i32.store (i32.const 12) (i32.const 0x2833e848))
    (i32.store (i32.const 16) (i32.const 0x8181585d))
    (i32.store (i32.const 20) (i32.const 0xb85045b6))
    (i32.store (i32.const 24) (i32.const 0xe131a029))
    (i32.store (i32.const 28) (i32.const 0x30644e72)))

  (func (export "init") (param $sanity_check i32)
    {init_body}
    (global.set $inputs_set (i32.const 0))
    (memory.fill (i32.const 64) (i32.const 0) (i32.const 128))
    (i32.store (i32.const 64) (i32.const 1)))

  (func (export "writeSharedRWMemory") (param $i i32) (param $v i32)
    (i32.store (i32.mul (local.get $i) (i32.const 4)) (local.get $v)))
  (func (export "readSharedRWMemory") (param $i i32) (result i32)
    (i32.load (i32.mul (local.get $i) (i32.const 4))))

  (func $slot_for (param $msb i32) (param $lsb i32) (result i32)
    (if (i32.and
          (i32.eq (local.get $msb) (i32.const 0xaf63dc4c))
          (i32.eq (local.get $lsb) (i32.const 0x8601ec8c)))
      (then (return (i32.const 1))))
    (if (i32.and
          (i32.eq (local.get $msb) (i32.const 0xaf63df4c))
          (i32.eq (local.get $lsb) (i32.const 0x8601f1a5)))
      (then (return (i32.const 2))))
    (if (i32.and
          (i32.eq (local.get $msb) (i32.const 0xaf63de4c))
          (i32.eq (local.get $lsb) (i32.const 0x8601eff2)))
      (then (return (i32.const 3))))
    (i32.const -1))

  (func (export "getInputSignalSize") (param $msb i32) (param $lsb i32) (result i32)
    (if (i32.eq (call $slot_for (local.get $msb) (local.get $lsb)) (i32.const -1))
      (then (return (i32.const -1))))
    (i32.const 1))

  (func (export "setInputSignal") (param $msb i32) (param $lsb i32) (param $pos i32)
    (local $slot i32)
    (local.set $slot (call $slot_for (local.get $msb) (local.get $lsb)))
    (if (i32.eq (local.get $slot) (i32.const -1))
      (then (call $exception_handler (i32.const 1)) (unreachable)))
    (memory.copy
      (i32.add (i32.const 64) (i32.mul (local.get $slot) (i32.const 32)))
      (i32.const 0)
      (i32.const 32))
    (global.set $inputs_set (i32.add (global.get $inputs_set) (i32.const 1))))

  (func (export "getInputSize") (result i32) (i32.const 3))
  (func (export "getWitnessSize") (result i32) (i32.const {witness_size}))
  (func (export "getWitness") (param $i i32)
    (memory.copy
      (i32.const 0)
      (i32.add (i32.const 64) (i32.mul (local.get $i) (i32.const 32)))
      (i32.const 32)))
)
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_bn254::Fr;
    use ark_ff::{BigInteger as _, PrimeField as _};

    #[test]
    fn prime_constant_matches_modulus() {
        assert_eq!(Fr::MODULUS.to_bytes_le(), BN254_PRIME_LE);
    }
}
