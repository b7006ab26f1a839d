// Test harness for allocator bridge integration tests
//
// Provides infrastructure for:
// - Tracing setup honoring RUST_LOG
// - Many threads running independent allocate -> write -> verify -> release cycles
// - Aggregated counters for post-run assertions
//
// Each worker owns its handles exclusively; only the allocator is shared.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Barrier, Once};
use std::time::{Duration, Instant};

use anyhow::{ensure, Result};
use nyx_alloc_bridge::{NativeAllocator, NativeBuf};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Test result type alias
pub type TestResult<T> = Result<T>;

static TRACING: Once = Once::new();

/// Install a test subscriber once per binary. Defaults to `warn`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}

/// Shape of a stress run
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Worker threads started together behind a barrier
    pub threads: usize,
    /// Allocate/release cycles per worker
    pub cycles_per_thread: usize,
    /// Largest request; sizes are drawn from `0..=max_len`
    pub max_len: usize,
    /// Base RNG seed; worker `i` uses `seed + i`
    pub seed: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self { threads: 16, cycles_per_thread: 2_000, max_len: 4096, seed: 0x4E59_58 }
    }
}

/// What a stress run observed
#[derive(Debug, Default)]
pub struct StressReport {
    pub cycles: u64,
    pub bytes: u64,
    pub corrupted: u64,
    pub failed_allocations: u64,
    pub elapsed: Duration,
}

#[derive(Default)]
struct Counters {
    cycles: AtomicU64,
    bytes: AtomicU64,
    corrupted: AtomicU64,
    failed: AtomicU64,
}

/// Run `cfg.threads` workers against one shared allocator.
///
/// Every cycle allocates a handle, fills it with a worker-specific pattern,
/// reads it back and drops it. A mismatch means two owners touched one region.
pub fn run_workers<A>(alloc: &A, cfg: &StressConfig) -> TestResult<StressReport>
where
    A: NativeAllocator,
{
    ensure!(cfg.threads > 0, "stress run needs at least one worker");
    let counters = Counters::default();
    let barrier = Barrier::new(cfg.threads);
    let start = Instant::now();

    std::thread::scope(|scope| {
        for worker in 0..cfg.threads {
            let (counters, barrier) = (&counters, &barrier);
            scope.spawn(move || {
                let mut rng = StdRng::seed_from_u64(cfg.seed + worker as u64);
                let tag = (worker % 251) as u8;
                barrier.wait();
                for _ in 0..cfg.cycles_per_thread {
                    let len = rng.gen_range(0..=cfg.max_len);
                    let mut buf = match NativeBuf::<_, u8>::new_in(alloc, len) {
                        Ok(b) => b,
                        Err(_) => {
                            counters.failed.fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                    };
                    for (i, b) in buf.iter_mut().enumerate() {
                        *b = tag ^ (i as u8);
                    }
                    std::thread::yield_now();
                    if !buf.iter().enumerate().all(|(i, &b)| b == tag ^ (i as u8)) {
                        counters.corrupted.fetch_add(1, Ordering::Relaxed);
                    }
                    counters.cycles.fetch_add(1, Ordering::Relaxed);
                    counters.bytes.fetch_add(len as u64, Ordering::Relaxed);
                }
            });
        }
    });

    let report = StressReport {
        cycles: counters.cycles.load(Ordering::Relaxed),
        bytes: counters.bytes.load(Ordering::Relaxed),
        corrupted: counters.corrupted.load(Ordering::Relaxed),
        failed_allocations: counters.failed.load(Ordering::Relaxed),
        elapsed: start.elapsed(),
    };
    info!(?report, backend = alloc.name(), "stress run complete");
    Ok(report)
}
