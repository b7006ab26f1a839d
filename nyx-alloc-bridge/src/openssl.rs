//! libcrypto's private heap (`OPENSSL_malloc` family).
//!
//! The `OPENSSL_*` names are macros over `CRYPTO_*` functions that take the
//! caller's file and line for leak reports. They are declared here with the
//! OpenSSL 1.1.0+ signatures; `openssl-sys` provides the link to libcrypto.

use std::os::raw::{c_char, c_int, c_void};
use std::ptr::NonNull;

use crate::NativeAllocator;

extern "C" {
    fn CRYPTO_malloc(num: libc::size_t, file: *const c_char, line: c_int) -> *mut c_void;
    fn CRYPTO_free(ptr: *mut c_void, file: *const c_char, line: c_int);
    fn CRYPTO_clear_free(ptr: *mut c_void, num: libc::size_t, file: *const c_char, line: c_int);
}

const FILE: &[u8] = b"nyx-alloc-bridge\0";

fn file() -> *const c_char {
    FILE.as_ptr().cast()
}

/// OpenSSL's allocator. Honors any hooks installed with `CRYPTO_set_mem_functions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenSsl;

impl OpenSsl {
    /// Runs libcrypto's one-time init, which also links `-lcrypto`.
    pub fn new() -> Self {
        openssl_sys::init();
        Self
    }
}

impl Default for OpenSsl {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: CRYPTO_malloc returns non-overlapping regions of at least `num` bytes,
// which CRYPTO_free and CRYPTO_clear_free accept.
unsafe impl NativeAllocator for OpenSsl {
    fn name(&self) -> &'static str {
        "openssl"
    }

    fn allocate(&self, len: usize) -> Option<NonNull<u8>> {
        // CRYPTO_malloc(0) returns NULL
        // SAFETY: no preconditions beyond a valid file string.
        let p = unsafe { CRYPTO_malloc(len.max(1), file(), line!() as c_int) };
        NonNull::new(p.cast::<u8>())
    }

    unsafe fn release(&self, ptr: NonNull<u8>) {
        // SAFETY: caller guarantees `ptr` came from CRYPTO_malloc and is live.
        unsafe { CRYPTO_free(ptr.as_ptr().cast(), file(), line!() as c_int) }
    }

    unsafe fn clear_release(&self, ptr: NonNull<u8>, len: usize) {
        // SAFETY: caller guarantees `ptr` is live for `len` bytes.
        unsafe { CRYPTO_clear_free(ptr.as_ptr().cast(), len, file(), line!() as c_int) }
    }
}
