use std::ptr::NonNull;

use crate::config::Backend;
use crate::{CHeap, NativeAllocator, Result};

/// The compiled-in backends, picked at runtime from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemAllocator {
    CHeap(CHeap),
    #[cfg(feature = "openssl")]
    OpenSsl(crate::OpenSsl),
}

impl SystemAllocator {
    pub fn from_backend(backend: Backend) -> Result<Self> {
        match backend {
            Backend::CHeap => Ok(Self::CHeap(CHeap)),
            #[cfg(feature = "openssl")]
            Backend::OpenSsl => Ok(Self::OpenSsl(crate::OpenSsl::new())),
            #[cfg(not(feature = "openssl"))]
            Backend::OpenSsl => Err(crate::Error::config(
                "openssl backend requested but not compiled in (enable feature `openssl`)",
            )),
        }
    }
}

impl Default for SystemAllocator {
    fn default() -> Self {
        Self::CHeap(CHeap)
    }
}

// SAFETY: dispatches to one backend per value; a region always returns to the
// variant that produced it because the value never changes variant.
unsafe impl NativeAllocator for SystemAllocator {
    fn name(&self) -> &'static str {
        match self {
            Self::CHeap(a) => a.name(),
            #[cfg(feature = "openssl")]
            Self::OpenSsl(a) => a.name(),
        }
    }

    fn allocate(&self, len: usize) -> Option<NonNull<u8>> {
        match self {
            Self::CHeap(a) => a.allocate(len),
            #[cfg(feature = "openssl")]
            Self::OpenSsl(a) => a.allocate(len),
        }
    }

    unsafe fn release(&self, ptr: NonNull<u8>) {
        match self {
            // SAFETY: forwarded caller contract.
            Self::CHeap(a) => unsafe { a.release(ptr) },
            #[cfg(feature = "openssl")]
            // SAFETY: forwarded caller contract.
            Self::OpenSsl(a) => unsafe { a.release(ptr) },
        }
    }

    unsafe fn clear_release(&self, ptr: NonNull<u8>, len: usize) {
        match self {
            // SAFETY: forwarded caller contract.
            Self::CHeap(a) => unsafe { a.clear_release(ptr, len) },
            #[cfg(feature = "openssl")]
            // SAFETY: forwarded caller contract.
            Self::OpenSsl(a) => unsafe { a.clear_release(ptr, len) },
        }
    }
}
