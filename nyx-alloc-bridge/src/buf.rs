use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::os::raw::c_char;
use std::ptr::{self, NonNull};
use std::slice;

use crate::element::Element;
use crate::raw::{self, MAX_REQUEST};
use crate::{Error, NativeAllocator, Result};

/// Owned buffer on a native heap, released exactly once when dropped.
///
/// The handle is move-only. The region goes back to the allocator that
/// produced it and to no other: the allocator travels with the handle, and the
/// type parameter `A` keeps buffers of different heaps apart at compile time.
/// [`into_raw`](Self::into_raw) is the only way to end ownership without
/// releasing, for hand-off to code that follows the raw native convention.
pub struct NativeBuf<A: NativeAllocator, E: Element = u8> {
    ptr: NonNull<E>,
    len: usize,
    cap: usize,
    wipe: bool,
    alloc: A,
}

// SAFETY: the handle is the unique owner of its region; elements are plain bytes
// and the allocator itself is Send + Sync.
unsafe impl<A: NativeAllocator, E: Element> Send for NativeBuf<A, E> {}
// SAFETY: shared access only hands out `&[E]`.
unsafe impl<A: NativeAllocator, E: Element> Sync for NativeBuf<A, E> {}

impl<A: NativeAllocator, E: Element> NativeBuf<A, E> {
    /// Allocate `len` elements. Contents are whatever the native heap left there.
    ///
    /// # Errors
    /// `TooLarge` past `isize::MAX`, `OutOfMemory` when the heap refuses.
    pub fn new_in(alloc: A, len: usize) -> Result<Self> {
        if len > MAX_REQUEST {
            return Err(Error::TooLarge { requested: len as u64, limit: MAX_REQUEST as u64 });
        }
        match alloc.allocate(len) {
            Some(p) => Ok(Self { ptr: p.cast(), len, cap: len, wipe: false, alloc }),
            None => Err(Error::OutOfMemory { requested: len }),
        }
    }

    pub fn zeroed_in(alloc: A, len: usize) -> Result<Self> {
        let buf = Self::new_in(alloc, len)?;
        // SAFETY: the region is `len` bytes and exclusively owned.
        unsafe { ptr::write_bytes(buf.ptr.as_ptr(), 0, len) };
        Ok(buf)
    }

    pub fn from_slice_in(alloc: A, src: &[E]) -> Result<Self> {
        let mut buf = Self::new_in(alloc, src.len())?;
        buf.copy_from_slice(src);
        Ok(buf)
    }

    /// Size-query-then-fill: allocate `capacity` elements and let `f` write
    /// into them, returning how many it produced.
    ///
    /// If `f` fails the buffer is released before the error is returned.
    /// The logical length is clamped to `capacity`.
    pub fn fill_in<F, X>(alloc: A, capacity: usize, f: F) -> core::result::Result<Self, X>
    where
        F: FnOnce(&mut [E]) -> core::result::Result<usize, X>,
        X: From<Error>,
    {
        let mut buf = Self::new_in(alloc, capacity)?;
        let produced = f(&mut buf[..])?;
        buf.truncate(produced);
        Ok(buf)
    }

    /// Take ownership of a region the native library allocated for us.
    ///
    /// `capacity` is the size the region was allocated with; a wiping release
    /// clears all of it. `len` is clamped to it.
    ///
    /// # Safety
    /// `ptr` must be a live region of `alloc` valid for `capacity` elements,
    /// with no other owner. It is released by this handle.
    pub unsafe fn from_raw_parts_in(
        alloc: A,
        ptr: NonNull<E>,
        len: usize,
        capacity: usize,
    ) -> Self {
        Self { ptr, len: len.min(capacity), cap: capacity, wipe: false, alloc }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes owned by the handle, which is what a wiping release clears.
    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn as_ptr(&self) -> *const E {
        self.ptr.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut E {
        self.ptr.as_ptr()
    }

    /// Unsigned byte view of the contents, whatever `E` is.
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: `E` is a single byte type; same region and length.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr().cast::<u8>(), self.len) }
    }

    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    /// Shorten the logical length. The full capacity is still released.
    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    /// Wipe the whole region when the handle is released.
    pub fn with_wipe(mut self) -> Self {
        self.wipe = true;
        self
    }

    pub fn set_wipe_on_release(&mut self, wipe: bool) {
        self.wipe = wipe;
    }

    pub fn wipes_on_release(&self) -> bool {
        self.wipe
    }

    /// Give up ownership without releasing.
    ///
    /// The caller now holds the region under the raw native convention and must
    /// release it through the same allocator. Returns `(ptr, len, capacity,
    /// alloc)`, the inverse of [`from_raw_parts_in`](Self::from_raw_parts_in).
    /// The wipe flag is not carried; set it again after re-adoption.
    pub fn into_raw_parts(self) -> (NonNull<E>, usize, usize, A) {
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so `alloc` is moved out exactly once.
        let alloc = unsafe { ptr::read(&this.alloc) };
        (this.ptr, this.len, this.cap, alloc)
    }

    /// Like [`into_raw_parts`](Self::into_raw_parts), keeping only the pointer.
    pub fn into_raw(self) -> *mut E {
        let (ptr, ..) = self.into_raw_parts();
        ptr.as_ptr()
    }

    fn into_view<F: Element>(self) -> NativeBuf<A, F> {
        let wipe = self.wipe;
        let (ptr, len, cap, alloc) = self.into_raw_parts();
        NativeBuf { ptr: ptr.cast(), len, cap, wipe, alloc }
    }
}

impl<A: NativeAllocator> NativeBuf<A, u8> {
    /// Same region as `char *`.
    pub fn into_signed(self) -> NativeBuf<A, i8> {
        self.into_view()
    }
}

impl<A: NativeAllocator> NativeBuf<A, i8> {
    /// Same region as `uint8_t *`.
    pub fn into_unsigned(self) -> NativeBuf<A, u8> {
        self.into_view()
    }

    /// Take ownership of a NUL-terminated string the native library allocated,
    /// e.g. a hex or PEM rendering. `None` for null.
    ///
    /// The length excludes the terminator; the capacity includes it.
    ///
    /// # Safety
    /// `s` is null, or a live region of `alloc` holding a NUL-terminated string,
    /// with no other owner.
    pub unsafe fn from_c_str_in(alloc: A, s: *mut c_char) -> Option<Self> {
        let ptr = NonNull::new(s.cast::<i8>())?;
        // SAFETY: caller guarantees a NUL-terminated string.
        let len = unsafe { libc::strlen(s) };
        Some(Self { ptr, len, cap: len + 1, wipe: false, alloc })
    }

    pub fn to_str(&self) -> core::result::Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(self.as_bytes())
    }
}

impl<A: NativeAllocator, E: Element> Drop for NativeBuf<A, E> {
    fn drop(&mut self) {
        // SAFETY: the handle owns a live region of `alloc` of `cap` bytes and
        // drop runs once.
        unsafe { raw::release_sized(&self.alloc, self.ptr, self.cap, self.wipe) }
    }
}

impl<A: NativeAllocator, E: Element> Deref for NativeBuf<A, E> {
    type Target = [E];
    fn deref(&self) -> &[E] {
        // SAFETY: `ptr` is non-null, aligned (align 1) and valid for `len` elements.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl<A: NativeAllocator, E: Element> DerefMut for NativeBuf<A, E> {
    fn deref_mut(&mut self) -> &mut [E] {
        // SAFETY: as in `deref`, and `&mut self` makes the access unique.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<A: NativeAllocator, E: Element> AsRef<[E]> for NativeBuf<A, E> {
    fn as_ref(&self) -> &[E] {
        self
    }
}

impl<A: NativeAllocator, E: Element> AsMut<[E]> for NativeBuf<A, E> {
    fn as_mut(&mut self) -> &mut [E] {
        self
    }
}

/// Never prints contents; buffers often hold key material.
impl<A: NativeAllocator, E: Element> fmt::Debug for NativeBuf<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeBuf")
            .field("backend", &self.alloc.name())
            .field("view", &E::VIEW)
            .field("len", &self.len)
            .field("capacity", &self.cap)
            .field("wipe", &self.wipe)
            .finish()
    }
}
