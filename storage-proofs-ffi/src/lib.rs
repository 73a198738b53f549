#![warn(missing_docs)]
//! C ABI over the storage-proofs prover.
//!
//! The surface is a handful of `extern "C"` functions around a process-wide
//! [`ContextManager`]. Contexts travel as raw `u64` handles (never zero),
//! byte arguments travel as non-owning [`Buffer`] views, and proof results
//! come back as a heap-allocated [`ProofCtx`] that owns its bytes and must
//! be returned to [`storage_proofs_free_proof_ctx`].
//!
//! Every failure sets a thread-local status code and message, readable via
//! [`storage_proofs_last_error`] and [`storage_proofs_last_error_message`].
//! No call aborts the process.

use std::cell::RefCell;
use std::ffi::{CString, c_char};
use std::path::Path;
use std::sync::OnceLock;

use circom_artifacts::{LoadError, WitnessError};
use storage_proofs::{
    AcquireError, ContextHandle, ContextManager, HandleError, InitError, ProveError,
    ProveRequestError, PublicInput, StorageProof, VerifyError, signals_from_json,
};
use tracing::error;

/// Success.
pub const STATUS_OK: i32 = 0;
/// A pointer, length or encoding at the boundary violated the contract.
pub const STATUS_INVALID_ARGUMENT: i32 = 1;
/// The R1CS file did not parse.
pub const STATUS_MALFORMED_CIRCUIT: i32 = 2;
/// The witness generator did not load or does not match the circuit.
pub const STATUS_MALFORMED_GENERATOR: i32 = 3;
/// Reading an artifact file failed.
pub const STATUS_IO_FAILURE: i32 = 4;
/// An artifact did not match its pinned SHA-256 fingerprint.
pub const STATUS_FINGERPRINT_MISMATCH: i32 = 5;
/// Circuit-specific key setup failed.
pub const STATUS_KEY_DERIVATION_FAILED: i32 = 6;
/// Supplied key material did not decode as a proving key.
pub const STATUS_INVALID_KEY_MATERIAL: i32 = 7;
/// The input JSON did not parse as a signal map.
pub const STATUS_INVALID_INPUT_JSON: i32 = 8;
/// An input signal name is not declared by the circuit.
pub const STATUS_UNKNOWN_INPUT: i32 = 9;
/// An input signal has the wrong number of field elements.
pub const STATUS_TYPE_MISMATCH: i32 = 10;
/// Fewer input signals than the circuit requires were supplied.
pub const STATUS_MISSING_INPUT: i32 = 11;
/// The witness generator trapped while executing.
pub const STATUS_EXECUTION_TRAP: i32 = 12;
/// The generated witness violates a circuit constraint.
pub const STATUS_CONSTRAINT_VIOLATION: i32 = 13;
/// The Groth16 backend failed to produce a proof.
pub const STATUS_PROOF_GENERATION: i32 = 14;
/// The proof bytes did not decode as curve points.
pub const STATUS_MALFORMED_PROOF: i32 = 15;
/// The public input count does not match the verifying key.
pub const STATUS_FIELD_MISMATCH: i32 = 16;
/// The pairing check failed to run.
pub const STATUS_VERIFICATION_FAILED: i32 = 17;
/// The context handle was never issued or has been released.
pub const STATUS_INVALID_HANDLE: i32 = 18;

thread_local! {
    static LAST_ERROR: RefCell<Option<(i32, CString)>> = const { RefCell::new(None) };
}

fn set_last_error(status: i32, message: impl std::fmt::Display) {
    let text = message.to_string();
    error!(status, "{text}");
    let message = CString::new(text)
        .unwrap_or_else(|_| CString::from(c"error message contained a NUL byte"));
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some((status, message)));
}

fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

fn manager() -> &'static ContextManager {
    static MANAGER: OnceLock<ContextManager> = OnceLock::new();
    MANAGER.get_or_init(ContextManager::new)
}

/// Non-owning view of caller memory. The library never frees `data`.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Buffer {
    /// Start of the bytes, owned by the caller.
    pub data: *const u8,
    /// Number of bytes.
    pub len: usize,
}

impl Buffer {
    /// The view over `data..data+len`, or `None` for a null pointer.
    ///
    /// # Safety
    ///
    /// A non-null `data` must point to `len` readable bytes that outlive the
    /// returned slice.
    unsafe fn as_slice(&self) -> Option<&[u8]> {
        if self.data.is_null() {
            return None;
        }
        Some(unsafe { std::slice::from_raw_parts(self.data, self.len) })
    }
}

/// A produced proof and its public inputs, owned by this struct.
///
/// C callers read the two leading [`Buffer`]s; the backing vectors live in
/// the same allocation and die with it in [`storage_proofs_free_proof_ctx`].
#[repr(C)]
pub struct ProofCtx {
    /// Compressed canonical Groth16 proof bytes.
    pub proof: Buffer,
    /// Public inputs as a JSON array of decimal strings.
    pub public_inputs: Buffer,
    proof_bytes: Vec<u8>,
    public_input_bytes: Vec<u8>,
}

impl ProofCtx {
    fn boxed(proof_bytes: Vec<u8>, public_input_bytes: Vec<u8>) -> Box<Self> {
        // Vec contents are heap storage, so the views stay valid when the
        // box itself moves.
        let proof = Buffer {
            data: proof_bytes.as_ptr(),
            len: proof_bytes.len(),
        };
        let public_inputs = Buffer {
            data: public_input_bytes.as_ptr(),
            len: public_input_bytes.len(),
        };
        Box::new(Self {
            proof,
            public_inputs,
            proof_bytes,
            public_input_bytes,
        })
    }
}

fn load_status(err: &LoadError) -> i32 {
    match err {
        LoadError::MalformedCircuit(_) => STATUS_MALFORMED_CIRCUIT,
        LoadError::MalformedGenerator(_) => STATUS_MALFORMED_GENERATOR,
        LoadError::CircuitFingerprintMismatch(_) | LoadError::GeneratorFingerprintMismatch(_) => {
            STATUS_FINGERPRINT_MISMATCH
        }
        LoadError::Io(_) => STATUS_IO_FAILURE,
    }
}

fn acquire_status(err: &AcquireError) -> i32 {
    match err {
        AcquireError::Load(load) => load_status(load),
        AcquireError::Init(InitError::KeyDerivationFailed(_)) => STATUS_KEY_DERIVATION_FAILED,
        AcquireError::Init(InitError::InvalidKeyMaterial(_)) => STATUS_INVALID_KEY_MATERIAL,
    }
}

fn witness_status(err: &WitnessError) -> i32 {
    match err {
        WitnessError::UnknownInput(_) => STATUS_UNKNOWN_INPUT,
        WitnessError::TypeMismatch { .. } => STATUS_TYPE_MISMATCH,
        WitnessError::MissingInput { .. } => STATUS_MISSING_INPUT,
        WitnessError::ExecutionTrap(_) => STATUS_EXECUTION_TRAP,
        WitnessError::Instantiation(_) => STATUS_MALFORMED_GENERATOR,
    }
}

fn prove_status(err: &ProveRequestError) -> i32 {
    match err {
        ProveRequestError::Witness(witness) => witness_status(witness),
        ProveRequestError::Prove(ProveError::WitnessSizeMismatch { .. }) => {
            STATUS_INVALID_ARGUMENT
        }
        ProveRequestError::Prove(ProveError::WitnessConstraintViolation(_)) => {
            STATUS_CONSTRAINT_VIOLATION
        }
        ProveRequestError::Prove(ProveError::ProofGeneration(_)) => STATUS_PROOF_GENERATION,
    }
}

fn verify_status(err: &VerifyError) -> i32 {
    match err {
        VerifyError::MalformedProof(_) => STATUS_MALFORMED_PROOF,
        VerifyError::FieldMismatch { .. } => STATUS_FIELD_MISMATCH,
        VerifyError::Verification(_) => STATUS_VERIFICATION_FAILED,
    }
}

/// Reads a required UTF-8 path argument.
///
/// # Safety
///
/// See [`Buffer::as_slice`].
unsafe fn path_arg<'a>(buffer: &'a Buffer, name: &str) -> Option<&'a Path> {
    let Some(bytes) = (unsafe { buffer.as_slice() }) else {
        set_last_error(STATUS_INVALID_ARGUMENT, format!("{name} buffer is null"));
        return None;
    };
    if bytes.is_empty() {
        set_last_error(STATUS_INVALID_ARGUMENT, format!("{name} buffer is empty"));
        return None;
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => Some(Path::new(text)),
        Err(_) => {
            set_last_error(
                STATUS_INVALID_ARGUMENT,
                format!("{name} buffer is not UTF-8"),
            );
            None
        }
    }
}

fn handle_arg(raw: u64) -> Option<ContextHandle> {
    match ContextHandle::from_raw(raw) {
        Ok(handle) => Some(handle),
        Err(HandleError::InvalidHandle) => {
            set_last_error(STATUS_INVALID_HANDLE, "invalid context handle");
            None
        }
    }
}

/// Initializes (or reuses) a proving context for the given artifact paths.
///
/// `key_path` with a null `data` pointer means "derive keys here". Returns
/// the non-zero raw handle, or 0 with the thread-local error set.
///
/// # Safety
///
/// Each non-null buffer must point to its declared number of readable bytes
/// for the duration of the call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn storage_proofs_init(
    r1cs_path: Buffer,
    generator_path: Buffer,
    key_path: Buffer,
) -> u64 {
    clear_last_error();
    let Some(r1cs_path) = (unsafe { path_arg(&r1cs_path, "r1cs path") }) else {
        return 0;
    };
    let Some(generator_path) = (unsafe { path_arg(&generator_path, "generator path") }) else {
        return 0;
    };
    let key_path = if key_path.data.is_null() {
        None
    } else {
        match unsafe { path_arg(&key_path, "key path") } {
            Some(path) => Some(path),
            None => return 0,
        }
    };
    match manager().acquire(r1cs_path, generator_path, key_path) {
        Ok(handle) => handle.as_raw(),
        Err(err) => {
            set_last_error(acquire_status(&err), err);
            0
        }
    }
}

/// Generates a witness from a circom-style JSON input map and proves it.
///
/// Returns an owned [`ProofCtx`], or null with the thread-local error set.
/// The result must be freed with [`storage_proofs_free_proof_ctx`].
///
/// # Safety
///
/// `inputs_json` must point to its declared number of readable bytes for
/// the duration of the call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn storage_proofs_prove(handle: u64, inputs_json: Buffer) -> *mut ProofCtx {
    clear_last_error();
    let Some(handle) = handle_arg(handle) else {
        return std::ptr::null_mut();
    };
    let context = match manager().get(handle) {
        Ok(context) => context,
        Err(err @ HandleError::InvalidHandle) => {
            set_last_error(STATUS_INVALID_HANDLE, err);
            return std::ptr::null_mut();
        }
    };
    let Some(input_bytes) = (unsafe { inputs_json.as_slice() }) else {
        set_last_error(STATUS_INVALID_ARGUMENT, "inputs buffer is null");
        return std::ptr::null_mut();
    };
    let signals = match signals_from_json(input_bytes) {
        Ok(signals) => signals,
        Err(err) => {
            set_last_error(STATUS_INVALID_INPUT_JSON, err);
            return std::ptr::null_mut();
        }
    };
    let (proof, publics) = match context.prove_input(&signals, &mut rand::thread_rng()) {
        Ok(result) => result,
        Err(err) => {
            set_last_error(prove_status(&err), err);
            return std::ptr::null_mut();
        }
    };
    let public_input_bytes = match serde_json::to_vec(&PublicInput(publics)) {
        Ok(bytes) => bytes,
        Err(err) => {
            set_last_error(STATUS_INVALID_INPUT_JSON, err);
            return std::ptr::null_mut();
        }
    };
    Box::into_raw(ProofCtx::boxed(proof.to_bytes(), public_input_bytes))
}

/// Verifies a proof against public inputs.
///
/// `proof` holds compressed canonical proof bytes; `public_inputs` holds a
/// JSON array of decimal strings as produced by [`storage_proofs_prove`].
/// Returns 1 when the proof is accepted, 0 when rejected, and a negated
/// status code on error.
///
/// # Safety
///
/// Each buffer must point to its declared number of readable bytes for the
/// duration of the call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn storage_proofs_verify(
    handle: u64,
    proof: Buffer,
    public_inputs: Buffer,
) -> i32 {
    clear_last_error();
    let Some(handle) = handle_arg(handle) else {
        return -STATUS_INVALID_HANDLE;
    };
    let context = match manager().get(handle) {
        Ok(context) => context,
        Err(err @ HandleError::InvalidHandle) => {
            set_last_error(STATUS_INVALID_HANDLE, err);
            return -STATUS_INVALID_HANDLE;
        }
    };
    let (Some(proof_bytes), Some(public_bytes)) =
        (unsafe { proof.as_slice() }, unsafe { public_inputs.as_slice() })
    else {
        set_last_error(STATUS_INVALID_ARGUMENT, "proof or public input buffer is null");
        return -STATUS_INVALID_ARGUMENT;
    };
    let proof = match StorageProof::from_bytes(proof_bytes) {
        Ok(proof) => proof,
        Err(err) => {
            let status = verify_status(&err);
            set_last_error(status, err);
            return -status;
        }
    };
    let publics: PublicInput = match serde_json::from_slice(public_bytes) {
        Ok(publics) => publics,
        Err(err) => {
            set_last_error(STATUS_INVALID_ARGUMENT, err);
            return -STATUS_INVALID_ARGUMENT;
        }
    };
    match context.verify(&proof, &publics.0) {
        Ok(true) => 1,
        Ok(false) => 0,
        Err(err) => {
            let status = verify_status(&err);
            set_last_error(status, err);
            -status
        }
    }
}

/// Releases the context behind `handle`; every copy of the handle becomes
/// invalid. Returns [`STATUS_OK`] or a negated status code.
#[unsafe(no_mangle)]
pub extern "C" fn storage_proofs_release(handle: u64) -> i32 {
    clear_last_error();
    let Some(handle) = handle_arg(handle) else {
        return -STATUS_INVALID_HANDLE;
    };
    match manager().release(handle) {
        Ok(()) => STATUS_OK,
        Err(err @ HandleError::InvalidHandle) => {
            set_last_error(STATUS_INVALID_HANDLE, err);
            -STATUS_INVALID_HANDLE
        }
    }
}

/// Frees a [`ProofCtx`] returned by [`storage_proofs_prove`]. Null is a
/// no-op.
///
/// # Safety
///
/// `ctx` must be null or a pointer obtained from [`storage_proofs_prove`]
/// that has not been freed before.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn storage_proofs_free_proof_ctx(ctx: *mut ProofCtx) {
    if !ctx.is_null() {
        drop(unsafe { Box::from_raw(ctx) });
    }
}

/// Status code of the last failed call on this thread, or [`STATUS_OK`].
#[unsafe(no_mangle)]
pub extern "C" fn storage_proofs_last_error() -> i32 {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(STATUS_OK, |(status, _)| *status)
    })
}

/// NUL-terminated message of the last failed call on this thread, or null.
///
/// The pointer stays valid until the next library call on this thread.
#[unsafe(no_mangle)]
pub extern "C" fn storage_proofs_last_error_message() -> *const c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(std::ptr::null(), |(_, message)| message.as_ptr())
    })
}

/// Installs a `tracing` subscriber filtered by `RUST_LOG`. Safe to call more
/// than once; only the first call installs.
#[unsafe(no_mangle)]
pub extern "C" fn storage_proofs_init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
