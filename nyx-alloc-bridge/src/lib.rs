//!
//! Nyx native allocator bridge.
//! - Allocator seam: `NativeAllocator` over the C heap or libcrypto (feature=openssl)
//! - Handle: move-only `NativeBuf` released exactly once, on every exit path
//! - Raw convention: null-on-failure allocate, null-safe signed/unsigned release
//! - Tracking: poisoning allocator that refuses double and foreign releases
#![warn(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::unreachable,
    clippy::todo,
    clippy::unimplemented
)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

//! Buffers handed out by a cryptographic library's private heap must go back to
//! that heap, exactly once. This crate turns the native "free it yourself"
//! convention into an owned handle and keeps the raw convention available for
//! code on the other side of a language boundary.
//!
//! ```
//! use nyx_alloc_bridge::{CHeap, NativeBuf};
//!
//! let mut buf: NativeBuf<CHeap> = NativeBuf::new_in(CHeap, 16)?;
//! buf.fill(0xA5);
//! assert!(buf.iter().all(|&b| b == 0xA5));
//! // released through CHeap here
//! # Ok::<(), nyx_alloc_bridge::Error>(())
//! ```

/// Native allocator seam and the C heap backend.
pub mod allocator;
/// Move-only buffer handle.
pub mod buf;
/// Bridge configuration (TOML file or environment).
pub mod config;
/// Signed/unsigned element views.
pub mod element;
mod error;
/// libcrypto backend.
#[cfg(feature = "openssl")]
pub mod openssl;
/// Raw pointer entry points in the native convention.
pub mod raw;
/// Backend selection by configuration.
pub mod system;
/// Runtime-checked guard and poisoning allocator.
pub mod tracking;
#[cfg(test)]
mod testing;

pub use allocator::{CHeap, NativeAllocator};
pub use buf::NativeBuf;
pub use config::{Backend, BridgeConfig};
pub use element::Element;
pub use error::{Error, Result};
#[cfg(feature = "openssl")]
pub use openssl::OpenSsl;
pub use system::SystemAllocator;
pub use tracking::{Fault, Tracking, TrackingStats, POISON, RETIRED_WINDOW};
