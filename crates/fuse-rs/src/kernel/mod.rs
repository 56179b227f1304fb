//! Compiled kernel payloads and the process-wide services that own them.

pub mod registry;

use std::fmt;
use std::sync::Arc;

pub use registry::{
    global_handle_store, global_kernel_registry, HandleStore, InMemoryHandleStore,
    InMemoryKernelRegistry, KernelRegistry, RegistryError,
};

const FNV1A_OFFSET: u64 = 0xcbf29ce484222325;
const FNV1A_PRIME: u64 = 0x100000001b3;

/// Binary kernel image produced by the device compiler.
#[derive(Clone, PartialEq, Eq)]
pub struct KernelBinary {
    pub name: String,
    pub data: Arc<[u8]>,
}

impl KernelBinary {
    pub fn new(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Returns a copy of this payload registered under another name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Arc::clone(&self.data),
        }
    }

    /// FNV-1a digest of the payload bytes.
    pub fn checksum(&self) -> u64 {
        let mut hash = FNV1A_OFFSET;
        for byte in self.data.iter() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(FNV1A_PRIME);
        }
        hash
    }
}

impl fmt::Debug for KernelBinary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelBinary")
            .field("name", &self.name)
            .field("size", &self.data.len())
            .field("checksum", &format_args!("{:#018x}", self.checksum()))
            .finish()
    }
}

/// Opaque handle issued by a [`KernelRegistry`] for a registered binary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KernelHandle {
    pub id: u64,
    pub name: Arc<str>,
}
