//! The native convention: a bare pointer, null on failure, released by hand.
//!
//! These are the three boundary operations for callers that cannot hold a
//! [`NativeBuf`](crate::NativeBuf). Both release entry points funnel into one
//! primitive, so the element view never changes what is freed or how.

use std::os::raw::c_char;
use std::ptr::{self, NonNull};

use tracing::warn;

use crate::element::Element;
use crate::{Error, NativeAllocator, Result};

/// Largest request any backend will see. Slices cannot span more than this.
pub const MAX_REQUEST: usize = isize::MAX as usize;

/// Convert a host-side byte count to the native size type.
///
/// Counts that do not fit fail explicitly instead of truncating.
pub fn byte_count(requested: u64) -> Result<usize> {
    match usize::try_from(requested) {
        Ok(n) if n <= MAX_REQUEST => Ok(n),
        _ => Err(Error::TooLarge { requested, limit: MAX_REQUEST as u64 }),
    }
}

/// Allocate `num` bytes, or return null when no buffer is available.
///
/// A non-null result must be given to exactly one of [`release_signed`] or
/// [`release_unsigned`] on the same allocator. A null result must not be.
pub fn allocate<A: NativeAllocator + ?Sized>(alloc: &A, num: usize) -> *mut u8 {
    if num > MAX_REQUEST {
        warn!(requested = num, backend = alloc.name(), "allocation request too large");
        return ptr::null_mut();
    }
    match alloc.allocate(num) {
        Some(p) => p.as_ptr(),
        None => {
            warn!(requested = num, backend = alloc.name(), "native allocation failed");
            ptr::null_mut()
        }
    }
}

/// Release a signed-view (`char *`) buffer. Null is a no-op.
///
/// # Safety
/// `buffer` is null, or was produced by `alloc` and has not been released.
/// Nothing may read or write it afterwards.
pub unsafe fn release_signed<A: NativeAllocator + ?Sized>(alloc: &A, buffer: *mut c_char) {
    // SAFETY: forwarded caller contract.
    unsafe { release(alloc, buffer) }
}

/// Release an unsigned-view (`uint8_t *`) buffer. Null is a no-op.
///
/// # Safety
/// Same contract as [`release_signed`].
pub unsafe fn release_unsigned<A: NativeAllocator + ?Sized>(alloc: &A, buffer: *mut u8) {
    // SAFETY: forwarded caller contract.
    unsafe { release(alloc, buffer) }
}

/// The one release primitive behind both views.
///
/// # Safety
/// `buffer` is null, or is a live region of `alloc`.
pub(crate) unsafe fn release<E: Element, A: NativeAllocator + ?Sized>(alloc: &A, buffer: *mut E) {
    if let Some(p) = NonNull::new(buffer.cast::<u8>()) {
        // SAFETY: caller guarantees `p` is a live region of `alloc`.
        unsafe { alloc.release(p) }
    }
}

/// Release path used by owned handles, which know the region's size.
///
/// # Safety
/// `ptr` is a live region of `alloc` of at least `capacity` bytes.
pub(crate) unsafe fn release_sized<E: Element, A: NativeAllocator + ?Sized>(
    alloc: &A,
    ptr: NonNull<E>,
    capacity: usize,
    wipe: bool,
) {
    let p = ptr.cast::<u8>();
    if wipe {
        // SAFETY: caller contract; `capacity` never exceeds the requested size.
        unsafe { alloc.clear_release(p, capacity) }
    } else {
        // SAFETY: caller contract.
        unsafe { alloc.release(p) }
    }
}
