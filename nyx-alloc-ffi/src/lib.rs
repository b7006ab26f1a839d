//! Nyx Allocator Bridge FFI
//!
//! C ABI over the process-wide native allocator, for host runtimes that must
//! hand buffers to (or take buffers from) a cryptographic library without ever
//! touching their own allocator.
//!
//! ## Contract
//! - `nyx_alloc_malloc` returns NULL when no buffer is available; never release a NULL result
//!   expecting anything to happen, and never release a host-allocated pointer
//! - every non-NULL result goes to exactly one of `nyx_alloc_free` / `nyx_alloc_free_unsigned`
//! - releasing NULL is a no-op
//!
//! ## Runtime guard
//! With `NYX_ALLOC_TRACK=1` (or `track_allocations = true`) every live region is
//! registered. Double and foreign releases are then refused and counted instead
//! of reaching the native free function. `NYX_ALLOC_WIPE=1` additionally clears
//! tracked regions before release, and is refused without tracking.
//!
//! Buffers the native library allocated on its own are unknown to the guard.
//! In tracked mode the host registers each one with `nyx_alloc_adopt` before
//! releasing it; otherwise the release is refused as foreign and the buffer
//! stays allocated.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr::{self, NonNull};

use nyx_alloc_bridge::{
    raw, Backend, BridgeConfig, Error, NativeAllocator, NativeBuf, SystemAllocator, Tracking,
};
use once_cell::sync::OnceCell;
use tracing::{error, info, warn};

/// The allocator every entry point goes through.
enum Active {
    Plain(SystemAllocator),
    Tracked { tracker: Tracking<SystemAllocator>, wipe: bool },
    /// Configuration was invalid at lazy init. Nothing is handed out, but
    /// buffers the native library produced still go back to its heap.
    Unavailable(SystemAllocator),
}

// SAFETY: dispatch only; a region is always released through the variant that
// produced it because the global value never changes.
unsafe impl NativeAllocator for Active {
    fn name(&self) -> &'static str {
        match self {
            Self::Plain(a) => a.name(),
            Self::Tracked { tracker, .. } => tracker.name(),
            Self::Unavailable(_) => "unavailable",
        }
    }

    fn allocate(&self, len: usize) -> Option<NonNull<u8>> {
        match self {
            Self::Plain(a) => a.allocate(len),
            Self::Tracked { tracker, .. } => tracker.allocate(len),
            Self::Unavailable(_) => None,
        }
    }

    unsafe fn release(&self, ptr: NonNull<u8>) {
        match self {
            // SAFETY: forwarded caller contract.
            Self::Plain(a) => unsafe { a.release(ptr) },
            // The tracker wipes the registered length, not the one passed here
            // SAFETY: unknown addresses are refused by the tracker.
            Self::Tracked { tracker, wipe: true } => unsafe { tracker.clear_release(ptr, 0) },
            // SAFETY: unknown addresses are refused by the tracker.
            Self::Tracked { tracker, wipe: false } => unsafe { tracker.release(ptr) },
            Self::Unavailable(fallback) => {
                let addr = ptr.as_ptr() as usize;
                warn!(addr, backend = fallback.name(), "release while unconfigured");
                // SAFETY: forwarded caller contract; nothing was handed out by
                // this bridge, so the region is the native library's.
                unsafe { fallback.release(ptr) }
            }
        }
    }
}

struct Bridge {
    config: BridgeConfig,
    alloc: Active,
}

impl Bridge {
    fn from_config(config: BridgeConfig) -> nyx_alloc_bridge::Result<Self> {
        let sys = SystemAllocator::from_backend(config.backend)?;
        let alloc = if config.track_allocations {
            Active::Tracked { tracker: Tracking::new(sys), wipe: config.wipe_on_release }
        } else {
            Active::Plain(sys)
        };
        Ok(Self { config, alloc })
    }

    fn tracker(&self) -> Option<&Tracking<SystemAllocator>> {
        match &self.alloc {
            Active::Tracked { tracker, .. } => Some(tracker),
            _ => None,
        }
    }
}

static BRIDGE: OnceCell<Bridge> = OnceCell::new();

/// Heap to release into when the configuration as a whole is unusable: the
/// requested backend if it names one that is compiled in, else the default.
fn fallback_allocator(backend: Option<&str>) -> SystemAllocator {
    backend
        .and_then(|v| v.parse::<Backend>().ok())
        .and_then(|b| SystemAllocator::from_backend(b).ok())
        .unwrap_or_default()
}

/// Global bridge, initialized from the environment on first use.
fn bridge() -> &'static Bridge {
    BRIDGE.get_or_init(|| match BridgeConfig::from_env().and_then(Bridge::from_config) {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "allocator bridge misconfigured; all allocations will fail");
            let fallback = fallback_allocator(std::env::var("NYX_ALLOC_BACKEND").ok().as_deref());
            Bridge { config: BridgeConfig::default(), alloc: Active::Unavailable(fallback) }
        }
    })
}

fn init_tracing(log_level: &str) {
    let level = log_level.parse::<tracing::Level>().unwrap_or(tracing::Level::INFO);
    // Ignore error if the host already installed a subscriber
    let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
}

fn install(config: BridgeConfig) -> c_int {
    init_tracing(&config.log_level);
    if BRIDGE.get().is_some() {
        warn!("allocator bridge already initialized");
        return 1;
    }
    let bridge = match Bridge::from_config(config) {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "allocator bridge init failed");
            return -1;
        }
    };
    let (backend, tracked) = (bridge.alloc.name(), bridge.config.track_allocations);
    if BRIDGE.set(bridge).is_err() {
        warn!("allocator bridge already initialized");
        return 1;
    }
    info!(backend, tracked, "allocator bridge initialized");
    0
}

/// Initialize from `NYX_ALLOC_*` environment variables.
/// Returns 0 on success, 1 if already initialized, -1 on configuration error.
#[no_mangle]
pub extern "C" fn nyx_alloc_init() -> c_int {
    match BridgeConfig::from_env() {
        Ok(config) => install(config),
        Err(e) => {
            init_tracing("info");
            error!(error = %e, "invalid allocator bridge environment");
            -1
        }
    }
}

/// Initialize from a TOML file. Same return codes as `nyx_alloc_init`.
///
/// # Safety
/// `path` is null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn nyx_alloc_init_with_config(path: *const c_char) -> c_int {
    if path.is_null() {
        return -1;
    }
    // SAFETY: caller guarantees a NUL-terminated string.
    let path = unsafe { CStr::from_ptr(path) };
    let Ok(path) = path.to_str() else { return -1 };
    match BridgeConfig::load_from_file(path) {
        Ok(config) => install(config),
        Err(e) => {
            init_tracing("info");
            error!(error = %e, path, "invalid allocator bridge config file");
            -1
        }
    }
}

/// Allocate `num` bytes from the native heap. NULL when no buffer is available.
/// Contents are not zeroed.
#[no_mangle]
pub extern "C" fn nyx_alloc_malloc(num: libc::size_t) -> *mut u8 {
    let b = bridge();
    match b.config.check_request(num) {
        Ok(n) => raw::allocate(&b.alloc, n),
        Err(e) => {
            warn!(error = %e, "allocation refused");
            ptr::null_mut()
        }
    }
}

/// Release a `char *` buffer obtained from this bridge or from the native library.
/// NULL is a no-op. With tracking on, native-library buffers must have been
/// registered with `nyx_alloc_adopt` first.
///
/// # Safety
/// `buffer` is NULL or a live region of the bridge's native heap, released once.
#[no_mangle]
pub unsafe extern "C" fn nyx_alloc_free(buffer: *mut c_char) {
    // SAFETY: forwarded caller contract.
    unsafe { raw::release_signed(&bridge().alloc, buffer) }
}

/// Release a `uint8_t *` buffer. Same contract as `nyx_alloc_free`.
///
/// # Safety
/// `buffer` is NULL or a live region of the bridge's native heap, released once.
#[no_mangle]
pub unsafe extern "C" fn nyx_alloc_free_unsigned(buffer: *mut u8) {
    // SAFETY: forwarded caller contract.
    unsafe { raw::release_unsigned(&bridge().alloc, buffer) }
}

/// Register a buffer the native library allocated on its own heap, so that a
/// tracked bridge accepts its release. Required in tracked mode for every such
/// buffer; a no-op returning 0 otherwise.
///
/// Returns 0 when registered, 1 if the address is already live, -1 for NULL.
///
/// # Safety
/// `buffer` is NULL or a live region of `len` bytes on the bridge's native heap
/// that will be released through this bridge exactly once.
#[no_mangle]
pub unsafe extern "C" fn nyx_alloc_adopt(buffer: *mut c_void, len: libc::size_t) -> c_int {
    let Some(p) = NonNull::new(buffer.cast::<u8>()) else { return -1 };
    match bridge().tracker() {
        // SAFETY: forwarded caller contract.
        Some(t) => c_int::from(!unsafe { t.adopt(p, len) }),
        None => 0,
    }
}

/// Number of live regions, or -1 when tracking is off.
#[no_mangle]
pub extern "C" fn nyx_alloc_live_count() -> i64 {
    bridge().tracker().map_or(-1, |t| t.stats().live as i64)
}

/// Number of refused releases, or -1 when tracking is off.
#[no_mangle]
pub extern "C" fn nyx_alloc_fault_count() -> i64 {
    bridge().tracker().map_or(-1, |t| t.fault_count() as i64)
}

/// 1 if `ptr` is a live region, 0 if not, -1 when tracking is off.
#[no_mangle]
pub extern "C" fn nyx_alloc_owns(ptr: *const c_void) -> c_int {
    match bridge().tracker() {
        Some(t) => c_int::from(t.is_live(ptr)),
        None => -1,
    }
}

/// Tracker statistics as a JSON string on the native heap.
///
/// Ownership passes to the caller, who releases it with `nyx_alloc_free`.
/// NULL when tracking is off or no buffer is available.
#[no_mangle]
pub extern "C" fn nyx_alloc_stats_json() -> *mut c_char {
    let b = bridge();
    let Some(tracker) = b.tracker() else { return ptr::null_mut() };
    let json = match serde_json::to_vec(&tracker.stats()) {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "stats encode failed");
            return ptr::null_mut();
        }
    };
    let out = NativeBuf::<_, u8>::fill_in(&b.alloc, json.len() + 1, |dst| {
        dst[..json.len()].copy_from_slice(&json);
        dst[json.len()] = 0;
        Ok::<_, Error>(json.len())
    });
    match out {
        Ok(buf) => buf.into_signed().into_raw().cast::<c_char>(),
        Err(e) => {
            warn!(error = %e, "stats allocation failed");
            ptr::null_mut()
        }
    }
}
