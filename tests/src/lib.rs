// Integration test support for the Nyx allocator bridge
//
// This crate provides shared infrastructure for concurrency stress runs and
// ownership hand-off scenarios across nyx-alloc-bridge and nyx-alloc-ffi.

pub mod test_harness;

// Re-export common utilities for integration tests
pub use test_harness::{init_tracing, run_workers, StressConfig, StressReport, TestResult};
