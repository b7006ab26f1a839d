use std::ptr::NonNull;
use std::sync::Arc;

use zeroize::Zeroize;

/// A native heap reached only through its own allocate/release functions.
///
/// # Safety
/// Implementors guarantee that a pointer returned by [`allocate`](Self::allocate)
/// is valid for reads and writes of `max(len, 1)` bytes until it is passed to
/// [`release`](Self::release) or [`clear_release`](Self::clear_release) of the
/// same allocator, and that distinct live regions never overlap.
pub unsafe trait NativeAllocator: Send + Sync {
    /// Short backend name for logs and `Debug` output.
    fn name(&self) -> &'static str;

    /// Request `len` bytes. `None` means the heap could not satisfy the request.
    ///
    /// A zero-length request still yields a region that must be released.
    /// The contents are not initialized to any particular value.
    fn allocate(&self, len: usize) -> Option<NonNull<u8>>;

    /// Return a region to this allocator.
    ///
    /// # Safety
    /// `ptr` must come from `allocate` on this allocator and must not have been
    /// released already. It must not be used afterwards.
    unsafe fn release(&self, ptr: NonNull<u8>);

    /// Overwrite the first `len` bytes with zeroes, then release.
    ///
    /// # Safety
    /// As for [`release`](Self::release); additionally `len` must not exceed
    /// the size originally requested.
    unsafe fn clear_release(&self, ptr: NonNull<u8>, len: usize) {
        // SAFETY: caller guarantees `ptr` is live for at least `len` bytes.
        unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), len) }.zeroize();
        // SAFETY: forwarded caller contract.
        unsafe { self.release(ptr) }
    }
}

// SAFETY: pure delegation to the referenced allocator.
unsafe impl<A: NativeAllocator + ?Sized> NativeAllocator for &A {
    fn name(&self) -> &'static str {
        (**self).name()
    }
    fn allocate(&self, len: usize) -> Option<NonNull<u8>> {
        (**self).allocate(len)
    }
    unsafe fn release(&self, ptr: NonNull<u8>) {
        // SAFETY: forwarded caller contract.
        unsafe { (**self).release(ptr) }
    }
    unsafe fn clear_release(&self, ptr: NonNull<u8>, len: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { (**self).clear_release(ptr, len) }
    }
}

// SAFETY: pure delegation to the shared allocator.
unsafe impl<A: NativeAllocator + ?Sized> NativeAllocator for Arc<A> {
    fn name(&self) -> &'static str {
        (**self).name()
    }
    fn allocate(&self, len: usize) -> Option<NonNull<u8>> {
        (**self).allocate(len)
    }
    unsafe fn release(&self, ptr: NonNull<u8>) {
        // SAFETY: forwarded caller contract.
        unsafe { (**self).release(ptr) }
    }
    unsafe fn clear_release(&self, ptr: NonNull<u8>, len: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { (**self).clear_release(ptr, len) }
    }
}

// SAFETY: pure delegation to the boxed allocator.
unsafe impl<A: NativeAllocator + ?Sized> NativeAllocator for Box<A> {
    fn name(&self) -> &'static str {
        (**self).name()
    }
    fn allocate(&self, len: usize) -> Option<NonNull<u8>> {
        (**self).allocate(len)
    }
    unsafe fn release(&self, ptr: NonNull<u8>) {
        // SAFETY: forwarded caller contract.
        unsafe { (**self).release(ptr) }
    }
    unsafe fn clear_release(&self, ptr: NonNull<u8>, len: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { (**self).clear_release(ptr, len) }
    }
}

/// The C runtime heap (`malloc`/`free`).
///
/// Used when the bridge is built without libcrypto. It is still a foreign
/// heap from Rust's point of view: nothing here goes through the global
/// allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CHeap;

// SAFETY: malloc returns suitably sized, non-overlapping regions; free accepts them.
unsafe impl NativeAllocator for CHeap {
    fn name(&self) -> &'static str {
        "c-heap"
    }

    fn allocate(&self, len: usize) -> Option<NonNull<u8>> {
        // malloc(0) may legally return NULL
        // SAFETY: malloc has no preconditions.
        let ptr = unsafe { libc::malloc(len.max(1)) };
        NonNull::new(ptr.cast::<u8>())
    }

    unsafe fn release(&self, ptr: NonNull<u8>) {
        // SAFETY: caller guarantees `ptr` came from malloc above and is live.
        unsafe { libc::free(ptr.as_ptr().cast()) }
    }
}
