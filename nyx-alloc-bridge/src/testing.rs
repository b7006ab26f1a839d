//! Allocators for unit tests.

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Mutex;

use zeroize::Zeroize;

use crate::{CHeap, NativeAllocator};

/// Which free function the region went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReleasePath {
    Plain,
    Cleared(usize),
}

/// C heap that snapshots each region's full allocated size as it is freed.
#[derive(Default)]
pub(crate) struct RecordingHeap {
    sizes: Mutex<HashMap<usize, usize>>,
    log: Mutex<Vec<(ReleasePath, Vec<u8>)>>,
}

impl RecordingHeap {
    pub(crate) fn releases(&self) -> Vec<(ReleasePath, Vec<u8>)> {
        self.log.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn take(&self, ptr: NonNull<u8>, path: ReleasePath) {
        let size = self
            .sizes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&(ptr.as_ptr() as usize))
            .unwrap_or(0);
        // SAFETY: the region is still allocated with `size` bytes.
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), size) }.to_vec();
        self.log.lock().unwrap_or_else(|p| p.into_inner()).push((path, bytes));
        // SAFETY: came from CHeap, released once.
        unsafe { CHeap.release(ptr) }
    }
}

// SAFETY: regions come from CHeap and go back to it.
unsafe impl NativeAllocator for RecordingHeap {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn allocate(&self, len: usize) -> Option<NonNull<u8>> {
        let p = CHeap.allocate(len)?;
        self.sizes.lock().unwrap_or_else(|p| p.into_inner()).insert(p.as_ptr() as usize, len);
        Some(p)
    }

    unsafe fn release(&self, ptr: NonNull<u8>) {
        self.take(ptr, ReleasePath::Plain);
    }

    unsafe fn clear_release(&self, ptr: NonNull<u8>, len: usize) {
        // SAFETY: caller guarantees `len` live bytes.
        unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), len) }.zeroize();
        self.take(ptr, ReleasePath::Cleared(len));
    }
}
