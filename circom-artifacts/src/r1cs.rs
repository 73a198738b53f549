//! Parser for the circom R1CS binary container.
//!
//! The format is produced by the upstream circuit compiler: a `"r1cs"` magic,
//! a version word, and a table of typed sections (header, constraints,
//! wire-to-label map). Coefficients are little-endian integers in standard
//! (non-Montgomery) representation.

use std::io::{Cursor, Read, Seek, SeekFrom};

use ark_bn254::Fr;
use ark_ff::{BigInteger as _, PrimeField};
use byteorder::{LittleEndian, ReadBytesExt};
use rayon::prelude::*;

use crate::reader_utils::prime_field_from_reader;

const MAGIC: [u8; 4] = *b"r1cs";
const SUPPORTED_VERSION: u32 = 1;

const SECTION_HEADER: u32 = 1;
const SECTION_CONSTRAINTS: u32 = 2;
const SECTION_WIRE_MAP: u32 = 3;

/// Error type describing errors during parsing of R1CS files.
#[derive(Debug, thiserror::Error)]
pub enum R1csParserError {
    /// Error during IO operations (a truncated file surfaces here as an
    /// unexpected end-of-file).
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    /// File does not start with the `"r1cs"` magic.
    #[error("wrong magic number: expected {MAGIC:?}, got {0:?}")]
    WrongMagic([u8; 4]),
    /// File declares a container version this parser does not understand.
    #[error("unsupported r1cs version {0}")]
    UnsupportedVersion(u32),
    /// A required section is absent.
    #[error("missing section: {0}")]
    MissingSection(&'static str),
    /// The same section appears twice.
    #[error("duplicate section of type {0}")]
    DuplicateSection(u32),
    /// Field elements are not 32 bytes wide.
    #[error("unsupported field size of {0} bytes")]
    UnsupportedFieldSize(u32),
    /// The declared field modulus is not the BN254 scalar field.
    #[error("field modulus mismatch: circuit is not defined over the BN254 scalar field")]
    PrimeMismatch,
    /// A constraint references a wire the header does not declare.
    #[error("wire id {wire} out of range: circuit declares {wires} wires")]
    WireOutOfRange {
        /// The out-of-range wire id.
        wire: usize,
        /// The declared wire count.
        wires: usize,
    },
    /// A section's declared size places its end past `u64::MAX`.
    #[error("section {section} declares an impossible size of {size} bytes")]
    SectionOutOfBounds {
        /// The section type.
        section: u32,
        /// The declared byte size.
        size: u64,
    },
    /// A section's content does not fill its declared byte size.
    #[error("section {section} size mismatch: declared {declared} bytes, consumed {consumed}")]
    SectionSizeMismatch {
        /// The section type.
        section: u32,
        /// The declared byte size.
        declared: u64,
        /// The bytes actually consumed while parsing.
        consumed: u64,
    },
    /// The header declares more public wires than total wires.
    #[error("inconsistent wire counts: {instance} instance wires declared, {wires} total")]
    InconsistentWireCounts {
        /// Instance wires (constant one + outputs + public inputs).
        instance: usize,
        /// Total declared wires.
        wires: usize,
    },
}

/// A single rank-1 constraint `(A·w) * (B·w) = (C·w)`, with each linear
/// combination stored as sparse `(wire, coefficient)` terms.
#[derive(Debug, Clone, Default)]
pub struct Constraint {
    /// Terms of the left factor.
    pub a: Vec<(usize, Fr)>,
    /// Terms of the right factor.
    pub b: Vec<(usize, Fr)>,
    /// Terms of the product.
    pub c: Vec<(usize, Fr)>,
}

impl Constraint {
    fn eval(terms: &[(usize, Fr)], witness: &[Fr]) -> Option<Fr> {
        terms
            .iter()
            .map(|(wire, coeff)| witness.get(*wire).map(|value| *value * coeff))
            .sum()
    }

    /// Whether the given assignment satisfies this constraint. An assignment
    /// too short to cover every referenced wire does not satisfy it.
    pub fn is_satisfied_by(&self, witness: &[Fr]) -> bool {
        match (
            Self::eval(&self.a, witness),
            Self::eval(&self.b, witness),
            Self::eval(&self.c, witness),
        ) {
            (Some(a), Some(b), Some(c)) => a * b == c,
            _ => false,
        }
    }
}

/// A parsed circom rank-1 constraint system.
///
/// Wire 0 is the constant one; public outputs, public inputs and private
/// inputs follow in that order, then internal wires. Immutable once loaded
/// and safe to share read-only across threads.
#[derive(Debug, Clone)]
pub struct R1cs {
    /// Total wire count, including the constant-one wire.
    pub num_wires: usize,
    /// Declared public output count.
    pub num_public_outputs: usize,
    /// Declared public input count.
    pub num_public_inputs: usize,
    /// Declared private input count.
    pub num_private_inputs: usize,
    /// Declared label count (signals before circom's optimizer ran).
    pub num_labels: u64,
    /// The field modulus, little-endian. Always the BN254 scalar field.
    pub prime_le: Vec<u8>,
    /// The constraints.
    pub constraints: Vec<Constraint>,
    /// Map from wire id to original signal label.
    pub wire_to_label: Vec<u64>,
}

impl R1cs {
    /// Number of instance wires: the constant one, public outputs and public
    /// inputs. The prefix of this length of a full assignment is the public
    /// input vector of a proof.
    pub fn num_instance(&self) -> usize {
        1 + self.num_public_outputs + self.num_public_inputs
    }

    /// Number of witness (non-instance) wires.
    pub fn num_witness(&self) -> usize {
        self.num_wires - self.num_instance()
    }

    /// Parses an R1CS file from memory.
    pub fn read(bytes: &[u8]) -> Result<Self, R1csParserError> {
        Self::from_reader(Cursor::new(bytes))
    }

    /// Parses an R1CS file from a seekable reader.
    pub fn from_reader<R: Read + Seek>(mut reader: R) -> Result<Self, R1csParserError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(R1csParserError::WrongMagic(magic));
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version != SUPPORTED_VERSION {
            return Err(R1csParserError::UnsupportedVersion(version));
        }

        let num_sections = reader.read_u32::<LittleEndian>()?;
        let mut header = None;
        let mut constraints = None;
        let mut wire_map = None;
        for _ in 0..num_sections {
            let section_type = reader.read_u32::<LittleEndian>()?;
            let size = reader.read_u64::<LittleEndian>()?;
            let offset = reader.stream_position()?;
            let slot = match section_type {
                SECTION_HEADER => Some(&mut header),
                SECTION_CONSTRAINTS => Some(&mut constraints),
                SECTION_WIRE_MAP => Some(&mut wire_map),
                // Custom-gate sections from newer compilers are skipped.
                _ => None,
            };
            if let Some(slot) = slot {
                if slot.is_some() {
                    return Err(R1csParserError::DuplicateSection(section_type));
                }
                *slot = Some((offset, size));
            }
            let next = offset
                .checked_add(size)
                .ok_or(R1csParserError::SectionOutOfBounds {
                    section: section_type,
                    size,
                })?;
            reader.seek(SeekFrom::Start(next))?;
        }

        let (header_offset, header_size) =
            header.ok_or(R1csParserError::MissingSection("header"))?;
        let (constraints_offset, constraints_size) =
            constraints.ok_or(R1csParserError::MissingSection("constraints"))?;

        reader.seek(SeekFrom::Start(header_offset))?;
        let header = Header::from_reader(&mut reader)?;
        let consumed = reader.stream_position()? - header_offset;
        if consumed != header_size {
            return Err(R1csParserError::SectionSizeMismatch {
                section: SECTION_HEADER,
                declared: header_size,
                consumed,
            });
        }

        let num_instance = 1 + header.num_public_outputs + header.num_public_inputs;
        if num_instance > header.num_wires {
            return Err(R1csParserError::InconsistentWireCounts {
                instance: num_instance,
                wires: header.num_wires,
            });
        }

        reader.seek(SeekFrom::Start(constraints_offset))?;
        let parsed = (0..header.num_constraints)
            .map(|_| Constraint::from_reader(&mut reader, &header))
            .collect::<Result<Vec<_>, _>>()?;
        let consumed = reader.stream_position()? - constraints_offset;
        if consumed != constraints_size {
            return Err(R1csParserError::SectionSizeMismatch {
                section: SECTION_CONSTRAINTS,
                declared: constraints_size,
                consumed,
            });
        }

        let wire_to_label = match wire_map {
            Some((offset, size)) => {
                reader.seek(SeekFrom::Start(offset))?;
                let map = (0..header.num_wires)
                    .map(|_| reader.read_u64::<LittleEndian>())
                    .collect::<Result<Vec<_>, _>>()?;
                let consumed = reader.stream_position()? - offset;
                if consumed != size {
                    return Err(R1csParserError::SectionSizeMismatch {
                        section: SECTION_WIRE_MAP,
                        declared: size,
                        consumed,
                    });
                }
                map
            }
            None => (0..header.num_wires as u64).collect(),
        };

        Ok(Self {
            num_wires: header.num_wires,
            num_public_outputs: header.num_public_outputs,
            num_public_inputs: header.num_public_inputs,
            num_private_inputs: header.num_private_inputs,
            num_labels: header.num_labels,
            prime_le: header.prime_le,
            constraints: parsed,
            wire_to_label,
        })
    }

    /// Returns the index of the first constraint the assignment violates, or
    /// `None` if all constraints hold. An assignment shorter than
    /// [`Self::num_wires`] violates every constraint that references a wire
    /// it does not cover.
    pub fn violated_constraint(&self, witness: &[Fr]) -> Option<usize> {
        self.constraints
            .par_iter()
            .position_first(|constraint| !constraint.is_satisfied_by(witness))
    }
}

struct Header {
    num_wires: usize,
    num_public_outputs: usize,
    num_public_inputs: usize,
    num_private_inputs: usize,
    num_labels: u64,
    num_constraints: usize,
    field_size: usize,
    prime_le: Vec<u8>,
}

impl Header {
    fn from_reader<R: Read>(mut reader: R) -> Result<Self, R1csParserError> {
        let field_size = reader.read_u32::<LittleEndian>()?;
        if field_size != 32 {
            return Err(R1csParserError::UnsupportedFieldSize(field_size));
        }
        let mut prime_le = vec![0u8; field_size as usize];
        reader.read_exact(&mut prime_le)?;
        if prime_le != Fr::MODULUS.to_bytes_le() {
            return Err(R1csParserError::PrimeMismatch);
        }
        let num_wires = reader.read_u32::<LittleEndian>()? as usize;
        let num_public_outputs = reader.read_u32::<LittleEndian>()? as usize;
        let num_public_inputs = reader.read_u32::<LittleEndian>()? as usize;
        let num_private_inputs = reader.read_u32::<LittleEndian>()? as usize;
        let num_labels = reader.read_u64::<LittleEndian>()?;
        let num_constraints = reader.read_u32::<LittleEndian>()? as usize;
        Ok(Self {
            num_wires,
            num_public_outputs,
            num_public_inputs,
            num_private_inputs,
            num_labels,
            num_constraints,
            field_size: field_size as usize,
            prime_le,
        })
    }
}

impl Constraint {
    fn from_reader<R: Read>(reader: &mut R, header: &Header) -> Result<Self, R1csParserError> {
        let a = Self::lc_from_reader(reader, header)?;
        let b = Self::lc_from_reader(reader, header)?;
        let c = Self::lc_from_reader(reader, header)?;
        Ok(Self { a, b, c })
    }

    fn lc_from_reader<R: Read>(
        reader: &mut R,
        header: &Header,
    ) -> Result<Vec<(usize, Fr)>, R1csParserError> {
        let num_terms = reader.read_u32::<LittleEndian>()? as usize;
        // The declared count is untrusted; the vector grows as terms actually
        // parse rather than reserving what a hostile file asks for.
        let mut terms = Vec::with_capacity(num_terms.min(1024));
        for _ in 0..num_terms {
            let wire = reader.read_u32::<LittleEndian>()? as usize;
            if wire >= header.num_wires {
                return Err(R1csParserError::WireOutOfRange {
                    wire,
                    wires: header.num_wires,
                });
            }
            let coeff = prime_field_from_reader(&mut *reader, header.field_size)?;
            terms.push((wire, coeff));
        }
        Ok(terms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use std::str::FromStr;

    #[test]
    fn parses_mul_circuit() {
        let r1cs = R1cs::read(&fixtures::mul_r1cs_bytes()).unwrap();
        assert_eq!(r1cs.num_wires, 4);
        assert_eq!(r1cs.num_public_outputs, 0);
        assert_eq!(r1cs.num_public_inputs, 2);
        assert_eq!(r1cs.num_private_inputs, 1);
        assert_eq!(r1cs.num_instance(), 3);
        assert_eq!(r1cs.num_witness(), 1);
        assert_eq!(r1cs.constraints.len(), 1);
        assert_eq!(r1cs.constraints[0].a, vec![(1, Fr::from_str("1").unwrap())]);
        assert_eq!(r1cs.constraints[0].b, vec![(2, Fr::from_str("1").unwrap())]);
        assert_eq!(r1cs.constraints[0].c, vec![(3, Fr::from_str("1").unwrap())]);
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut bytes = fixtures::mul_r1cs_bytes();
        bytes[0] = b'x';
        assert!(matches!(
            R1cs::read(&bytes),
            Err(R1csParserError::WrongMagic(_))
        ));
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut bytes = fixtures::mul_r1cs_bytes();
        bytes[4] = 9;
        assert!(matches!(
            R1cs::read(&bytes),
            Err(R1csParserError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn rejects_truncation() {
        let bytes = fixtures::mul_r1cs_bytes();
        for len in [3, 8, 20, bytes.len() / 2, bytes.len() - 1] {
            let err = R1cs::read(&bytes[..len]).unwrap_err();
            assert!(
                matches!(
                    err,
                    R1csParserError::IoError(_) | R1csParserError::SectionSizeMismatch { .. }
                ),
                "truncation at {len} gave {err:?}"
            );
        }
    }

    #[test]
    fn rejects_overflowing_section_size() {
        // A single section whose declared size would place its end past
        // u64::MAX must be rejected, not wrap the seek target.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"r1cs");
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(
            R1cs::read(&bytes),
            Err(R1csParserError::SectionOutOfBounds {
                section: 1,
                size: u64::MAX,
            })
        ));
    }

    #[test]
    fn rejects_absurd_term_count() {
        // The first linear combination's term count sits right after the
        // constraints section header: 12 bytes of file prefix, 12 bytes of
        // header-section framing, 64 bytes of header, 12 bytes of framing.
        let mut bytes = fixtures::mul_r1cs_bytes();
        bytes[100..104].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(R1cs::read(&bytes).is_err());
    }

    #[test]
    fn rejects_foreign_prime() {
        let bytes = fixtures::r1cs_bytes_with_prime(&[7u8; 32]);
        assert!(matches!(
            R1cs::read(&bytes),
            Err(R1csParserError::PrimeMismatch)
        ));
    }

    #[test]
    fn rejects_constraint_count_mismatch() {
        // Declares two constraints but only serializes one; the parser runs
        // off the end of the section into bytes that cannot be a constraint.
        let bytes = fixtures::r1cs_bytes_with_declared_constraints(2);
        assert!(R1cs::read(&bytes).is_err());
    }

    #[test]
    fn satisfaction_check_finds_violation() {
        let r1cs = R1cs::read(&fixtures::mul_r1cs_bytes()).unwrap();
        let good = [
            Fr::from(1u64),
            Fr::from(3u64),
            Fr::from(5u64),
            Fr::from(15u64),
        ];
        assert_eq!(r1cs.violated_constraint(&good), None);
        let bad = [
            Fr::from(1u64),
            Fr::from(3u64),
            Fr::from(5u64),
            Fr::from(16u64),
        ];
        assert_eq!(r1cs.violated_constraint(&bad), Some(0));
    }

    #[test]
    fn short_assignment_is_reported_as_violation() {
        let r1cs = R1cs::read(&fixtures::mul_r1cs_bytes()).unwrap();
        let short = [Fr::from(1u64), Fr::from(3u64)];
        assert_eq!(r1cs.violated_constraint(&short), Some(0));
        assert_eq!(r1cs.violated_constraint(&[]), Some(0));
    }
}
