//! Runtime-checked ownership guard.
//!
//! `Tracking` sits in front of another allocator and remembers which regions
//! are live. Releasing anything else is refused and recorded as a [`Fault`]
//! rather than reaching the native free function. Released regions are
//! overwritten with [`POISON`] first, so a stale reader sees garbage instead
//! of key material.
//!
//! Regions the native library allocated on its own never passed through the
//! tracker. They must be registered with [`Tracking::adopt`] before they are
//! released through it, or the release is refused as foreign.

use std::collections::{HashSet, VecDeque};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::NativeAllocator;

/// Byte written over every region released through a tracker.
pub const POISON: u8 = 0xDB;

/// Released addresses remembered for double-release reports. Older ones fall
/// out of the window and are reported as foreign instead; both are refused.
pub const RETIRED_WINDOW: usize = 4096;

/// Misuse detected at release time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fault {
    /// The address was live once and has already been released.
    DoubleRelease { addr: usize },
    /// The address never came from this tracker.
    ForeignRelease { addr: usize },
}

/// Snapshot of a tracker's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackingStats {
    pub live: usize,
    pub live_bytes: usize,
    pub allocations: u64,
    pub adopted: u64,
    pub releases: u64,
    pub failed_allocations: u64,
    pub faults: Vec<Fault>,
}

/// Allocator wrapper that enforces single release per region.
pub struct Tracking<A> {
    inner: A,
    live: DashMap<usize, usize>,
    retired: Mutex<Retired>,
    allocations: AtomicU64,
    adopted: AtomicU64,
    releases: AtomicU64,
    failed: AtomicU64,
    faults: Mutex<Vec<Fault>>,
}

/// Most recently released addresses, oldest first.
#[derive(Debug, Default)]
struct Retired {
    window: usize,
    order: VecDeque<usize>,
    set: HashSet<usize>,
}

impl Retired {
    fn insert(&mut self, addr: usize) {
        if self.set.insert(addr) {
            self.order.push_back(addr);
        }
        while self.order.len() > self.window {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
    }

    /// The address is live again.
    fn revive(&mut self, addr: usize) {
        if self.set.remove(&addr) {
            self.order.retain(|&a| a != addr);
        }
    }

    fn contains(&self, addr: usize) -> bool {
        self.set.contains(&addr)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // Avoid panicking if the mutex is poisoned; recover the inner value
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl<A: NativeAllocator> Tracking<A> {
    pub fn new(inner: A) -> Self {
        Self::with_retired_window(inner, RETIRED_WINDOW)
    }

    /// Tracker remembering the last `window` released addresses.
    pub fn with_retired_window(inner: A, window: usize) -> Self {
        Self {
            inner,
            live: DashMap::new(),
            retired: Mutex::new(Retired { window, ..Retired::default() }),
            allocations: AtomicU64::new(0),
            adopted: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            faults: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    /// Whether `ptr` is currently a live region of this tracker.
    pub fn is_live<T>(&self, ptr: *const T) -> bool {
        self.live.contains_key(&(ptr as usize))
    }

    /// Register a region the inner allocator handed out without going through
    /// this tracker, typically a buffer the native library allocated itself.
    ///
    /// Returns `false`, changing nothing, if `ptr` is already live here.
    ///
    /// # Safety
    /// `ptr` is a live region of the inner allocator, valid for `len` bytes,
    /// that nobody else will release.
    pub unsafe fn adopt(&self, ptr: NonNull<u8>, len: usize) -> bool {
        let addr = ptr.as_ptr() as usize;
        match self.live.entry(addr) {
            Entry::Occupied(_) => {
                warn!(addr, backend = self.inner.name(), "region already tracked");
                return false;
            }
            Entry::Vacant(slot) => {
                lock(&self.retired).revive(addr);
                slot.insert(len);
            }
        }
        self.adopted.fetch_add(1, Ordering::Relaxed);
        debug!(addr, len, backend = self.inner.name(), "adopt");
        true
    }

    /// Faults recorded so far.
    pub fn faults(&self) -> Vec<Fault> {
        lock(&self.faults).clone()
    }

    pub fn fault_count(&self) -> usize {
        lock(&self.faults).len()
    }

    /// Number of released addresses currently remembered.
    pub fn retired_count(&self) -> usize {
        lock(&self.retired).order.len()
    }

    pub fn stats(&self) -> TrackingStats {
        TrackingStats {
            live: self.live.len(),
            live_bytes: self.live.iter().map(|e| *e.value()).sum(),
            allocations: self.allocations.load(Ordering::Relaxed),
            adopted: self.adopted.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            failed_allocations: self.failed.load(Ordering::Relaxed),
            faults: self.faults(),
        }
    }

    fn record(&self, fault: Fault) {
        error!(?fault, backend = self.inner.name(), "release refused");
        lock(&self.faults).push(fault);
    }

    /// Take `ptr` out of the live set and hand it to the inner allocator.
    ///
    /// # Safety
    /// If `ptr` is live in this tracker, nothing else may use it afterwards.
    unsafe fn retire(&self, ptr: NonNull<u8>, wipe: bool) {
        let addr = ptr.as_ptr() as usize;
        let Some((_, len)) = self.live.remove(&addr) else {
            let fault = if lock(&self.retired).contains(addr) {
                Fault::DoubleRelease { addr }
            } else {
                Fault::ForeignRelease { addr }
            };
            self.record(fault);
            return;
        };
        // SAFETY: the region was live with `len` bytes and is exclusively ours now.
        unsafe { std::ptr::write_bytes(ptr.as_ptr(), POISON, len) };
        // Mark before the inner free; the address may be handed out again right after
        lock(&self.retired).insert(addr);
        self.releases.fetch_add(1, Ordering::Relaxed);
        debug!(addr, len, wipe, backend = self.inner.name(), "release");
        if wipe {
            // SAFETY: region came from `inner` with at least `len` bytes.
            unsafe { self.inner.clear_release(ptr, len) }
        } else {
            // SAFETY: region came from `inner` and is released once.
            unsafe { self.inner.release(ptr) }
        }
    }
}

// SAFETY: regions come from `inner`; release only forwards addresses that are live.
unsafe impl<A: NativeAllocator> NativeAllocator for Tracking<A> {
    fn name(&self) -> &'static str {
        "tracking"
    }

    fn allocate(&self, len: usize) -> Option<NonNull<u8>> {
        match self.inner.allocate(len) {
            Some(p) => {
                let addr = p.as_ptr() as usize;
                lock(&self.retired).revive(addr);
                self.live.insert(addr, len);
                self.allocations.fetch_add(1, Ordering::Relaxed);
                debug!(addr, len, backend = self.inner.name(), "allocate");
                Some(p)
            }
            None => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(requested = len, backend = self.inner.name(), "allocation failed");
                None
            }
        }
    }

    unsafe fn release(&self, ptr: NonNull<u8>) {
        // SAFETY: forwarded caller contract; unknown addresses are refused.
        unsafe { self.retire(ptr, false) }
    }

    /// The tracked size wins over `len`, so the whole region is wiped.
    unsafe fn clear_release(&self, ptr: NonNull<u8>, _len: usize) {
        // SAFETY: forwarded caller contract; unknown addresses are refused.
        unsafe { self.retire(ptr, true) }
    }
}

impl<A> Drop for Tracking<A> {
    fn drop(&mut self) {
        if !self.live.is_empty() {
            warn!(leaked = self.live.len(), "tracker dropped with live regions");
        }
    }
}

impl<A> std::fmt::Debug for Tracking<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracking")
            .field("live", &self.live.len())
            .field("allocations", &self.allocations.load(Ordering::Relaxed))
            .field("releases", &self.releases.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
