//! Handle-table manager for proving contexts.
//!
//! Key setup is expensive, so each artifact pair is initialized at most once
//! and shared behind an opaque [`ContextHandle`]. Handles carry a generation
//! counter; using one after [`ContextManager::release`] fails with
//! [`HandleError::InvalidHandle`] instead of reaching freed state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use circom_artifacts::{ArtifactLoader, LoadError};
use thiserror::Error;
use tracing::info;

use crate::context::{InitError, ProvingContext};

/// Failure acquiring a context.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// Artifact loading or cross-validation failed.
    #[error(transparent)]
    Load(#[from] LoadError),
    /// Key derivation or key-material decoding failed.
    #[error(transparent)]
    Init(#[from] InitError),
}

/// Failure resolving a handle.
#[derive(Debug, Error)]
pub enum HandleError {
    /// The handle was never issued, or its slot has been released.
    #[error("invalid or released context handle")]
    InvalidHandle,
}

/// Opaque id of a managed context: a slot index plus the generation the slot
/// had when the handle was issued.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContextHandle {
    index: u32,
    generation: u32,
}

impl ContextHandle {
    /// Packs the handle into a plain integer for transport across FFI.
    ///
    /// Generations start at 1, so a raw handle is never zero and zero stays
    /// free as a sentinel.
    pub fn as_raw(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    /// Reverses [`Self::as_raw`]. Zero and other never-issued encodings are
    /// rejected here or, at the latest, by [`ContextManager::get`].
    pub fn from_raw(raw: u64) -> Result<Self, HandleError> {
        let generation = (raw >> 32) as u32;
        if generation == 0 {
            return Err(HandleError::InvalidHandle);
        }
        Ok(Self {
            index: raw as u32,
            generation,
        })
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct ArtifactKey {
    r1cs: PathBuf,
    generator: PathBuf,
    key_material: Option<PathBuf>,
}

struct Slot {
    context: Arc<ProvingContext>,
    key: ArtifactKey,
}

struct SlotEntry {
    generation: u32,
    occupant: Option<Slot>,
}

#[derive(Default)]
struct Table {
    /// One cell per artifact key; acquires for the same key serialize on the
    /// cell so initialization runs at most once.
    cells: HashMap<ArtifactKey, Arc<Mutex<Option<ContextHandle>>>>,
    slots: Vec<SlotEntry>,
    free: Vec<u32>,
}

/// Shared table of initialized proving contexts, keyed by artifact paths.
#[derive(Default)]
pub struct ContextManager {
    table: Mutex<Table>,
}

impl ContextManager {
    /// An empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle to the context for the given artifact paths,
    /// initializing it on first use.
    ///
    /// Concurrent acquires for the same paths block until the first one
    /// finishes and then share its handle; acquires for different paths
    /// proceed in parallel. A failed initialization is not cached, the next
    /// acquire retries from disk.
    pub fn acquire(
        &self,
        r1cs_path: impl AsRef<Path>,
        generator_path: impl AsRef<Path>,
        key_path: Option<&Path>,
    ) -> Result<ContextHandle, AcquireError> {
        let key = ArtifactKey {
            r1cs: r1cs_path.as_ref().to_owned(),
            generator: generator_path.as_ref().to_owned(),
            key_material: key_path.map(Path::to_owned),
        };

        let cell = {
            let mut table = self.lock_table();
            Arc::clone(table.cells.entry(key.clone()).or_default())
        };
        let mut issued = cell
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(handle) = *issued {
            if self.get(handle).is_ok() {
                return Ok(handle);
            }
            *issued = None;
        }

        // Load and init outside the table lock; only same-key acquires wait.
        let (r1cs, generator) = ArtifactLoader::new().load_files(&key.r1cs, &key.generator)?;
        let key_material = match &key.key_material {
            Some(path) => Some(std::fs::read(path).map_err(LoadError::from)?),
            None => None,
        };
        let context = ProvingContext::init(
            Arc::new(r1cs),
            Arc::new(generator),
            key_material.as_deref(),
            &mut rand::thread_rng(),
        )?;

        let handle = self.install(&key, &cell, context);
        *issued = Some(handle);
        info!(
            r1cs = %key.r1cs.display(),
            generator = %key.generator.display(),
            raw = handle.as_raw(),
            "proving context initialized"
        );
        Ok(handle)
    }

    /// Publishes an initialized context under `key`, or adopts the live slot
    /// another acquire published for the same key while this one was loading.
    /// Without the adoption check, a release interleaved between two acquires
    /// could leave two live slots for one key.
    fn install(
        &self,
        key: &ArtifactKey,
        cell: &Arc<Mutex<Option<ContextHandle>>>,
        context: ProvingContext,
    ) -> ContextHandle {
        let mut table = self.lock_table();
        let existing = table.slots.iter().enumerate().find_map(|(index, entry)| {
            entry
                .occupant
                .as_ref()
                .filter(|slot| slot.key == *key)
                .map(|_| ContextHandle {
                    index: index as u32,
                    generation: entry.generation,
                })
        });
        let handle = match existing {
            Some(handle) => handle,
            None => {
                let slot = Slot {
                    context: Arc::new(context),
                    key: key.clone(),
                };
                match table.free.pop() {
                    Some(index) => {
                        let entry = &mut table.slots[index as usize];
                        entry.occupant = Some(slot);
                        ContextHandle {
                            index,
                            generation: entry.generation,
                        }
                    }
                    None => {
                        let index = table.slots.len() as u32;
                        table.slots.push(SlotEntry {
                            generation: 1,
                            occupant: Some(slot),
                        });
                        ContextHandle {
                            index,
                            generation: 1,
                        }
                    }
                }
            }
        };
        // Keep the map pointing at the cell this acquire holds; a release may
        // have dropped the key while initialization ran.
        table.cells.insert(key.clone(), Arc::clone(cell));
        handle
    }

    /// Resolves a handle to its context.
    pub fn get(&self, handle: ContextHandle) -> Result<Arc<ProvingContext>, HandleError> {
        let table = self.lock_table();
        let entry = table
            .slots
            .get(handle.index as usize)
            .ok_or(HandleError::InvalidHandle)?;
        if entry.generation != handle.generation {
            return Err(HandleError::InvalidHandle);
        }
        let slot = entry.occupant.as_ref().ok_or(HandleError::InvalidHandle)?;
        Ok(Arc::clone(&slot.context))
    }

    /// Frees the context behind `handle` and invalidates every copy of it.
    ///
    /// Proofs and verifying keys already produced stay usable; only the
    /// handle dies.
    pub fn release(&self, handle: ContextHandle) -> Result<(), HandleError> {
        let mut table = self.lock_table();
        let entry = table
            .slots
            .get_mut(handle.index as usize)
            .ok_or(HandleError::InvalidHandle)?;
        if entry.generation != handle.generation || entry.occupant.is_none() {
            return Err(HandleError::InvalidHandle);
        }
        let slot = entry
            .occupant
            .take()
            .ok_or(HandleError::InvalidHandle)?;
        entry.generation = entry.generation.wrapping_add(1).max(1);
        table.free.push(handle.index);
        table.cells.remove(&slot.key);
        info!(raw = handle.as_raw(), "proving context released");
        Ok(())
    }

    /// Number of live contexts.
    pub fn len(&self) -> usize {
        self.lock_table()
            .slots
            .iter()
            .filter(|entry| entry.occupant.is_some())
            .count()
    }

    /// True when no context is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_table(&self) -> std::sync::MutexGuard<'_, Table> {
        self.table
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use circom_artifacts::fixtures;
    use std::io::Write as _;

    struct Artifacts {
        _dir: tempfile::TempDir,
        r1cs: PathBuf,
        generator: PathBuf,
    }

    fn write_artifacts() -> Artifacts {
        let dir = tempfile::tempdir().unwrap();
        let r1cs = dir.path().join("circuit.r1cs");
        let generator = dir.path().join("circuit.wat");
        std::fs::write(&r1cs, fixtures::mul_r1cs_bytes()).unwrap();
        std::fs::File::create(&generator)
            .unwrap()
            .write_all(fixtures::mul_generator_wat().as_bytes())
            .unwrap();
        Artifacts {
            _dir: dir,
            r1cs,
            generator,
        }
    }

    #[test]
    fn acquire_is_at_most_once_per_pair() {
        let artifacts = write_artifacts();
        let manager = ContextManager::new();
        let first = manager
            .acquire(&artifacts.r1cs, &artifacts.generator, None)
            .unwrap();
        let second = manager
            .acquire(&artifacts.r1cs, &artifacts.generator, None)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn concurrent_acquires_share_one_context() {
        let artifacts = write_artifacts();
        let manager = ContextManager::new();
        let raws: Vec<u64> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        manager
                            .acquire(&artifacts.r1cs, &artifacts.generator, None)
                            .unwrap()
                            .as_raw()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(raws.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn late_installer_adopts_live_slot() {
        // Models a release landing between two acquires for one pair: the
        // acquire that finishes initializing second must share the slot the
        // first one published instead of adding a duplicate.
        let artifacts = write_artifacts();
        let manager = ContextManager::new();
        let live = manager
            .acquire(&artifacts.r1cs, &artifacts.generator, None)
            .unwrap();

        let key = ArtifactKey {
            r1cs: artifacts.r1cs.clone(),
            generator: artifacts.generator.clone(),
            key_material: None,
        };
        let (r1cs, generator) = ArtifactLoader::new()
            .load_files(&key.r1cs, &key.generator)
            .unwrap();
        let context = ProvingContext::init(
            Arc::new(r1cs),
            Arc::new(generator),
            None,
            &mut rand::thread_rng(),
        )
        .unwrap();
        let stale_cell = Arc::new(Mutex::new(None));
        let adopted = manager.install(&key, &stale_cell, context);
        assert_eq!(adopted, live);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn released_handle_is_invalid() {
        let artifacts = write_artifacts();
        let manager = ContextManager::new();
        let handle = manager
            .acquire(&artifacts.r1cs, &artifacts.generator, None)
            .unwrap();
        assert!(manager.get(handle).is_ok());
        manager.release(handle).unwrap();
        assert!(matches!(
            manager.get(handle),
            Err(HandleError::InvalidHandle)
        ));
        assert!(matches!(
            manager.release(handle),
            Err(HandleError::InvalidHandle)
        ));
        assert!(manager.is_empty());
    }

    #[test]
    fn reacquire_after_release_issues_fresh_generation() {
        let artifacts = write_artifacts();
        let manager = ContextManager::new();
        let first = manager
            .acquire(&artifacts.r1cs, &artifacts.generator, None)
            .unwrap();
        manager.release(first).unwrap();
        let second = manager
            .acquire(&artifacts.r1cs, &artifacts.generator, None)
            .unwrap();
        assert_ne!(first.as_raw(), second.as_raw());
        assert!(manager.get(first).is_err());
        assert!(manager.get(second).is_ok());
    }

    #[test]
    fn missing_artifact_is_not_cached() {
        let artifacts = write_artifacts();
        let manager = ContextManager::new();
        let bogus = artifacts.r1cs.with_extension("missing");
        assert!(matches!(
            manager.acquire(&bogus, &artifacts.generator, None),
            Err(AcquireError::Load(LoadError::Io(_)))
        ));
        assert!(manager.is_empty());
        // The same pair succeeds once the artifact exists.
        std::fs::write(&bogus, fixtures::mul_r1cs_bytes()).unwrap();
        assert!(manager.acquire(&bogus, &artifacts.generator, None).is_ok());
    }

    #[test]
    fn raw_round_trip_rejects_zero() {
        assert!(matches!(
            ContextHandle::from_raw(0),
            Err(HandleError::InvalidHandle)
        ));
        let handle = ContextHandle {
            index: 3,
            generation: 9,
        };
        assert_eq!(ContextHandle::from_raw(handle.as_raw()).unwrap(), handle);
    }
}
