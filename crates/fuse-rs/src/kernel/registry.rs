//! Kernel binary registry and handle store.
//!
//! Both services are shared with other compiler/runtime threads that may register kernels
//! for unrelated graphs while a fusion pass runs, so they lock internally. The fusion engine
//! reaches them through the [`KernelRegistry`] and [`HandleStore`] traits; the in-memory
//! implementations below back the process-wide defaults.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use parking_lot::ReentrantMutex;
use thiserror::Error;

use super::{KernelBinary, KernelHandle};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("kernel binary `{name}` has an empty payload")]
    EmptyBinary { name: String },
    #[error(
        "kernel name `{name}` is already registered with payload {stored:#018x}, \
         refusing payload {incoming:#018x}"
    )]
    PayloadConflict {
        name: String,
        stored: u64,
        incoming: u64,
    },
}

/// Registry mapping kernel names to loaded binaries, reference counted per name.
pub trait KernelRegistry: Send + Sync {
    fn find_binary(&self, name: &str) -> Option<KernelHandle>;

    /// Registers `binary` under `name`, or adds a reference when the name is already known
    /// with the same payload. A different payload under a known name is rejected.
    fn register(
        &self,
        name: &str,
        binary: Arc<KernelBinary>,
    ) -> Result<KernelHandle, RegistryError>;

    fn binary(&self, name: &str) -> Option<Arc<KernelBinary>>;

    /// Drops one reference; returns `true` when the last one was released.
    fn release(&self, name: &str) -> bool;
}

/// Store of binary handles bound to node names, with per-name use counts.
///
/// Every `store_handle` adds one owner to the name's entry, and each owner stands for one
/// registry reference that is released when that owner is erased.
pub trait HandleStore: Send + Sync {
    /// Binds `handle` to `name`, or adds an owner to the existing entry without touching its
    /// use count.
    fn store_handle(&self, name: &str, handle: KernelHandle, binary: Arc<KernelBinary>);

    /// Looks up the handle stored under `name` and increments its use count.
    fn refer_handle(&self, name: &str) -> Option<KernelHandle>;

    /// Drops one owner of each name in `names`; an entry goes away with its last owner.
    /// Returns one handle per dropped owner.
    fn erase_handles(&self, names: &[String]) -> Vec<KernelHandle>;

    fn use_count(&self, name: &str) -> usize;
}

struct RegistryEntry {
    handle: KernelHandle,
    binary: Arc<KernelBinary>,
    refs: usize,
}

/// Mutex-guarded registry used when callers do not inject their own.
#[derive(Default)]
pub struct InMemoryKernelRegistry {
    entries: Mutex<HashMap<String, RegistryEntry>>,
    next_id: AtomicU64,
}

impl InMemoryKernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("kernel registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KernelRegistry for InMemoryKernelRegistry {
    fn find_binary(&self, name: &str) -> Option<KernelHandle> {
        self.entries
            .lock()
            .expect("kernel registry poisoned")
            .get(name)
            .map(|entry| entry.handle.clone())
    }

    fn register(
        &self,
        name: &str,
        binary: Arc<KernelBinary>,
    ) -> Result<KernelHandle, RegistryError> {
        if binary.data.is_empty() {
            return Err(RegistryError::EmptyBinary {
                name: name.to_string(),
            });
        }
        let mut entries = self.entries.lock().expect("kernel registry poisoned");
        if let Some(entry) = entries.get_mut(name) {
            if entry.binary.data[..] != binary.data[..] {
                return Err(RegistryError::PayloadConflict {
                    name: name.to_string(),
                    stored: entry.binary.checksum(),
                    incoming: binary.checksum(),
                });
            }
            entry.refs += 1;
            return Ok(entry.handle.clone());
        }
        let handle = KernelHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            name: Arc::from(name),
        };
        entries.insert(
            name.to_string(),
            RegistryEntry {
                handle: handle.clone(),
                binary,
                refs: 1,
            },
        );
        Ok(handle)
    }

    fn binary(&self, name: &str) -> Option<Arc<KernelBinary>> {
        self.entries
            .lock()
            .expect("kernel registry poisoned")
            .get(name)
            .map(|entry| Arc::clone(&entry.binary))
    }

    fn release(&self, name: &str) -> bool {
        let mut entries = self.entries.lock().expect("kernel registry poisoned");
        let Some(entry) = entries.get_mut(name) else {
            return false;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 {
            entries.remove(name);
            return true;
        }
        false
    }
}

struct HandleEntry {
    handle: KernelHandle,
    // Held so the payload outlives every handle that refers to it.
    _binary: Arc<KernelBinary>,
    uses: usize,
    owners: usize,
}

/// Handle store guarded by a recursive lock; batch erasure re-enters per-name erasure.
#[derive(Default)]
pub struct InMemoryHandleStore {
    entries: ReentrantMutex<RefCell<HashMap<String, HandleEntry>>>,
}

impl InMemoryHandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        let guard = self.entries.lock();
        let contains = guard.borrow().contains_key(name);
        contains
    }

    /// Number of owners currently holding `name`.
    pub fn owners(&self, name: &str) -> usize {
        let guard = self.entries.lock();
        let owners = guard.borrow().get(name).map_or(0, |entry| entry.owners);
        owners
    }

    fn erase_one(&self, name: &str) -> Option<KernelHandle> {
        let guard = self.entries.lock();
        let mut entries = guard.borrow_mut();
        let entry = entries.get_mut(name)?;
        entry.owners = entry.owners.saturating_sub(1);
        let handle = entry.handle.clone();
        if entry.owners == 0 {
            entries.remove(name);
        }
        Some(handle)
    }
}

impl HandleStore for InMemoryHandleStore {
    fn store_handle(&self, name: &str, handle: KernelHandle, binary: Arc<KernelBinary>) {
        let guard = self.entries.lock();
        let mut entries = guard.borrow_mut();
        match entries.get_mut(name) {
            Some(entry) => {
                entry.handle = handle;
                entry._binary = binary;
                entry.owners += 1;
            }
            None => {
                entries.insert(
                    name.to_string(),
                    HandleEntry {
                        handle,
                        _binary: binary,
                        uses: 0,
                        owners: 1,
                    },
                );
            }
        }
    }

    fn refer_handle(&self, name: &str) -> Option<KernelHandle> {
        let guard = self.entries.lock();
        let mut entries = guard.borrow_mut();
        let entry = entries.get_mut(name)?;
        entry.uses += 1;
        Some(entry.handle.clone())
    }

    fn erase_handles(&self, names: &[String]) -> Vec<KernelHandle> {
        let _guard = self.entries.lock();
        let mut erased = Vec::with_capacity(names.len());
        for name in names {
            match self.erase_one(name) {
                Some(handle) => erased.push(handle),
                None => log::debug!("handle store: no handle stored for `{name}`"),
            }
        }
        erased
    }

    fn use_count(&self, name: &str) -> usize {
        let guard = self.entries.lock();
        let uses = guard.borrow().get(name).map_or(0, |entry| entry.uses);
        uses
    }
}

static GLOBAL_KERNEL_REGISTRY: Lazy<Arc<InMemoryKernelRegistry>> =
    Lazy::new(|| Arc::new(InMemoryKernelRegistry::new()));

static GLOBAL_HANDLE_STORE: Lazy<Arc<InMemoryHandleStore>> =
    Lazy::new(|| Arc::new(InMemoryHandleStore::new()));

/// Process-wide registry, created on first use and kept until process exit.
pub fn global_kernel_registry() -> Arc<InMemoryKernelRegistry> {
    Arc::clone(&GLOBAL_KERNEL_REGISTRY)
}

/// Process-wide handle store, created on first use and kept until process exit.
pub fn global_handle_store() -> Arc<InMemoryHandleStore> {
    Arc::clone(&GLOBAL_HANDLE_STORE)
}
