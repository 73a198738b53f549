use ark_bn254::Fr;
use ark_ff::{BigInteger as _, PrimeField};
use tracing::trace;
use wasmer::{Engine, Function, Imports, Instance, Module, RuntimeError, Store, TypedFunction, imports};

use super::{GeneratorInfo, GeneratorParserError, SignalMap, WitnessError, fnv};

/// One instantiation of a witness generator module.
///
/// Holds the WASM store and the typed exports of the circom 2 interface.
/// Computation needs `&mut self` (the store is single-threaded); use a
/// [`super::CalculatorPool`] to serve concurrent callers.
pub struct WitnessCalculator {
    store: Store,
    wasm: CircomWasm,
    info: GeneratorInfo,
}

/// Typed view of the exports a circom 2 witness generator provides. Field
/// elements cross the boundary as little-endian 32-bit words through the
/// module's shared read/write buffer.
struct CircomWasm {
    init: TypedFunction<i32, ()>,
    get_version: TypedFunction<(), i32>,
    get_field_num_len32: TypedFunction<(), i32>,
    get_raw_prime: TypedFunction<(), ()>,
    read_shared_rw_memory: TypedFunction<i32, i32>,
    write_shared_rw_memory: TypedFunction<(i32, i32), ()>,
    set_input_signal: TypedFunction<(i32, i32, i32), ()>,
    get_input_signal_size: TypedFunction<(i32, i32), i32>,
    get_input_size: TypedFunction<(), i32>,
    get_witness_size: TypedFunction<(), i32>,
    get_witness: TypedFunction<i32, ()>,
}

impl CircomWasm {
    fn from_instance(store: &Store, instance: &Instance) -> Result<Self, wasmer::ExportError> {
        let exports = &instance.exports;
        Ok(Self {
            init: exports.get_typed_function(store, "init")?,
            get_version: exports.get_typed_function(store, "getVersion")?,
            get_field_num_len32: exports.get_typed_function(store, "getFieldNumLen32")?,
            get_raw_prime: exports.get_typed_function(store, "getRawPrime")?,
            read_shared_rw_memory: exports.get_typed_function(store, "readSharedRWMemory")?,
            write_shared_rw_memory: exports.get_typed_function(store, "writeSharedRWMemory")?,
            set_input_signal: exports.get_typed_function(store, "setInputSignal")?,
            get_input_signal_size: exports.get_typed_function(store, "getInputSignalSize")?,
            get_input_size: exports.get_typed_function(store, "getInputSize")?,
            get_witness_size: exports.get_typed_function(store, "getWitnessSize")?,
            get_witness: exports.get_typed_function(store, "getWitness")?,
        })
    }
}

impl WitnessCalculator {
    pub(crate) fn instantiate(
        engine: &Engine,
        module: &Module,
    ) -> Result<Self, GeneratorParserError> {
        let mut store = Store::new(engine.clone());
        let imports = runtime_imports(&mut store);
        let instance = Instance::new(&mut store, module, &imports)?;
        let wasm = CircomWasm::from_instance(&store, &instance)?;

        let version = wasm.get_version.call(&mut store)?;
        let field_words = wasm.get_field_num_len32.call(&mut store)?;
        // 8 little-endian 32-bit words, the width of the BN254 scalar field.
        // The value comes from the module, so it is bounded before it drives
        // the prime read below.
        if field_words != 8 {
            return Err(GeneratorParserError::UnsupportedFieldWidth(field_words));
        }
        let field_words = field_words as usize;
        wasm.get_raw_prime.call(&mut store)?;
        let mut prime_le = Vec::with_capacity(field_words * 4);
        for word in 0..field_words {
            let value = wasm.read_shared_rw_memory.call(&mut store, word as i32)? as u32;
            prime_le.extend_from_slice(&value.to_le_bytes());
        }
        let witness_size = wasm.get_witness_size.call(&mut store)? as usize;
        let input_count = wasm.get_input_size.call(&mut store)? as usize;

        let info = GeneratorInfo {
            version,
            field_words,
            prime_le,
            witness_size,
            input_count,
        };
        Ok(Self { store, wasm, info })
    }

    /// The interface description probed at instantiation.
    pub fn info(&self) -> &GeneratorInfo {
        &self.info
    }

    /// Executes the generator against the named inputs and returns the full
    /// assignment vector, wire 0 (the constant one) included.
    ///
    /// Deterministic: no randomness, no environment access; identical inputs
    /// always produce an identical vector.
    pub fn calculate_witness(&mut self, inputs: &SignalMap) -> Result<Vec<Fr>, WitnessError> {
        // Resets the module's per-computation signal state.
        self.wasm
            .init
            .call(&mut self.store, 1)
            .map_err(WitnessError::ExecutionTrap)?;

        let mut supplied = 0usize;
        for (name, values) in inputs {
            let (msb, lsb) = fnv(name);
            let declared = self
                .wasm
                .get_input_signal_size
                .call(&mut self.store, msb, lsb)
                .map_err(WitnessError::ExecutionTrap)?;
            if declared < 0 {
                return Err(WitnessError::UnknownInput(name.clone()));
            }
            if declared as usize != values.len() {
                return Err(WitnessError::TypeMismatch {
                    name: name.clone(),
                    declared: declared as usize,
                    supplied: values.len(),
                });
            }
            for (position, value) in values.iter().enumerate() {
                self.write_field_element(value)
                    .map_err(WitnessError::ExecutionTrap)?;
                self.wasm
                    .set_input_signal
                    .call(&mut self.store, msb, lsb, position as i32)
                    .map_err(WitnessError::ExecutionTrap)?;
                supplied += 1;
            }
        }
        if supplied < self.info.input_count {
            return Err(WitnessError::MissingInput {
                supplied,
                required: self.info.input_count,
            });
        }

        let mut witness = Vec::with_capacity(self.info.witness_size);
        for index in 0..self.info.witness_size {
            self.wasm
                .get_witness
                .call(&mut self.store, index as i32)
                .map_err(WitnessError::ExecutionTrap)?;
            witness.push(
                self.read_field_element()
                    .map_err(WitnessError::ExecutionTrap)?,
            );
        }
        trace!(signals = witness.len(), "witness computed");
        Ok(witness)
    }

    fn write_field_element(&mut self, value: &Fr) -> Result<(), RuntimeError> {
        let bytes = value.into_bigint().to_bytes_le();
        for (word, chunk) in bytes.chunks(4).enumerate() {
            let mut le = [0u8; 4];
            le[..chunk.len()].copy_from_slice(chunk);
            self.wasm.write_shared_rw_memory.call(
                &mut self.store,
                word as i32,
                u32::from_le_bytes(le) as i32,
            )?;
        }
        Ok(())
    }

    fn read_field_element(&mut self) -> Result<Fr, RuntimeError> {
        let mut bytes = Vec::with_capacity(self.info.field_words * 4);
        for word in 0..self.info.field_words {
            let value = self
                .wasm
                .read_shared_rw_memory
                .call(&mut self.store, word as i32)? as u32;
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        Ok(Fr::from_le_bytes_mod_order(&bytes))
    }
}

fn runtime_imports(store: &mut Store) -> Imports {
    imports! {
        "runtime" => {
            "exceptionHandler" => Function::new_typed(&mut *store, runtime::exception_handler),
            "printErrorMessage" => Function::new_typed(&mut *store, runtime::print_error_message),
            "writeBufferMessage" => Function::new_typed(&mut *store, runtime::write_buffer_message),
            "showSharedRWMemory" => Function::new_typed(&mut *store, runtime::show_shared_rw_memory),
            // Imports used by circom 1 modules; registered so that loading one
            // fails on the missing `getVersion` export with a clear error
            // instead of an import resolution error.
            "error" => Function::new_typed(&mut *store, runtime::error),
            "log" => Function::new_typed(&mut *store, runtime::log_value),
            "logSetSignal" => Function::new_typed(&mut *store, runtime::log_signal),
            "logGetSignal" => Function::new_typed(&mut *store, runtime::log_signal),
            "logStartComponent" => Function::new_typed(&mut *store, runtime::log_component),
            "logFinishComponent" => Function::new_typed(&mut *store, runtime::log_component),
        }
    }
}

mod runtime {
    use wasmer::RuntimeError;

    /// Raised by the module on internal faults; turning it into a host trap
    /// aborts the computation at the faulting call.
    pub fn exception_handler(code: i32) -> Result<(), RuntimeError> {
        let message = match code {
            1 => "Signal not found",
            2 => "Too many signals set",
            3 => "Signal already set",
            4 => "Assert failed",
            5 => "Not enough signals set",
            6 => "Input signal array access exceeds the size",
            _ => "Unknown exception",
        };
        Err(RuntimeError::new(message))
    }

    pub fn error(
        _code: i32,
        _pstr: i32,
        _a: i32,
        _b: i32,
        _c: i32,
        _d: i32,
    ) -> Result<(), RuntimeError> {
        Err(RuntimeError::new("circom 1 runtime error"))
    }

    pub fn print_error_message() {}

    pub fn write_buffer_message() {}

    pub fn show_shared_rw_memory() {}

    pub fn log_value(_value: i32) {}

    pub fn log_signal(_a: i32, _b: i32) {}

    pub fn log_component(_id: i32) {}
}
