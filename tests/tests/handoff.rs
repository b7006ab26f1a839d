//! Ownership hand-off scenarios between a simulated native library and its caller.

use std::os::raw::c_char;
use std::ptr::NonNull;

use anyhow::anyhow;
use nyx_alloc_bridge::{
    raw, Backend, BridgeConfig, CHeap, Error, NativeAllocator, NativeBuf, SystemAllocator, Tracking,
};
use nyx_alloc_integration_tests::{init_tracing, TestResult};

/// Stand-in for a library routine that renders into a buffer from its own heap
/// and hands ownership to the caller (the `BN_bn2hex` shape).
fn native_hex<A: NativeAllocator>(alloc: &A, bytes: &[u8]) -> *mut c_char {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let p = raw::allocate(alloc, bytes.len() * 2 + 1);
    if p.is_null() {
        return p.cast();
    }
    // SAFETY: `p` holds `2n + 1` bytes.
    let out = unsafe { std::slice::from_raw_parts_mut(p, bytes.len() * 2 + 1) };
    for (i, b) in bytes.iter().enumerate() {
        out[2 * i] = HEX[usize::from(b >> 4)];
        out[2 * i + 1] = HEX[usize::from(b & 0x0F)];
    }
    out[bytes.len() * 2] = 0;
    p.cast()
}

/// Stand-in for a two-call encoder: first the size, then the encoding
/// (the `i2o_ECPublicKey` shape). Fails on the fill call when `fail` is set.
fn encode_point(out: Option<&mut [u8]>, fail: bool) -> Result<usize, Error> {
    let point = [0x04u8, 0x11, 0x22, 0x33, 0x44];
    match out {
        None => Ok(point.len()),
        Some(_) if fail => Err(Error::config("encoder rejected key")),
        Some(dst) => {
            dst[..point.len()].copy_from_slice(&point);
            Ok(point.len())
        }
    }
}

#[test]
fn native_string_is_adopted_and_released_once() -> TestResult<()> {
    init_tracing();
    let t = Tracking::new(CHeap);
    let p = native_hex(&t, &[0xDE, 0xAD, 0xBE, 0xEF]);
    // SAFETY: NUL-terminated, produced by `t`, ownership transferred here.
    let hex = unsafe { NativeBuf::from_c_str_in(&t, p) }.ok_or_else(|| anyhow!("no buffer"))?;
    assert_eq!(hex.to_str()?, "DEADBEEF");
    assert_eq!(t.stats().live, 1);
    drop(hex);
    let s = t.stats();
    assert_eq!((s.live, s.releases), (0, 1));
    assert!(s.faults.is_empty());
    Ok(())
}

#[test]
fn string_from_backend_heap_is_adopted_by_tracker() -> TestResult<()> {
    init_tracing();
    let t = Tracking::new(CHeap);
    // The library allocates on the backend itself; the tracker never saw it.
    let p = native_hex(t.inner(), &[0xDE, 0xAD, 0xBE, 0xEF]);
    let addr = NonNull::new(p.cast::<u8>()).ok_or_else(|| anyhow!("no buffer"))?;
    assert!(!t.is_live(p));
    // SAFETY: live CHeap region of 9 bytes, handed to us by the library.
    assert!(unsafe { t.adopt(addr, 9) });
    // SAFETY: NUL-terminated and now live in `t`; ownership moves to the handle.
    let hex = unsafe { NativeBuf::from_c_str_in(&t, p) }.ok_or_else(|| anyhow!("no buffer"))?;
    assert_eq!(hex.to_str()?, "DEADBEEF");
    drop(hex);
    let s = t.stats();
    assert_eq!((s.adopted, s.releases, s.live), (1, 1, 0));
    assert!(s.faults.is_empty());
    Ok(())
}

#[test]
fn size_query_then_fill_releases_on_error() -> TestResult<()> {
    init_tracing();
    let t = Tracking::new(CHeap);
    let len = encode_point(None, false)?;

    let ok = NativeBuf::<_, u8>::fill_in(&t, len, |dst| encode_point(Some(dst), false))?;
    assert_eq!(&ok[..], &[0x04, 0x11, 0x22, 0x33, 0x44]);
    let copied = ok.to_vec();
    drop(ok);

    let err = NativeBuf::<_, u8>::fill_in(&t, len, |dst| encode_point(Some(dst), true));
    assert!(err.is_err());

    let s = t.stats();
    assert_eq!((s.allocations, s.releases, s.live), (2, 2, 0), "error path must not leak");
    assert_eq!(copied.len(), 5);
    Ok(())
}

#[test]
fn buffer_crosses_back_into_raw_convention() -> TestResult<()> {
    init_tracing();
    let t = Tracking::new(CHeap);
    let key = NativeBuf::<_, u8>::from_slice_in(&t, &[7u8; 32])?.with_wipe();
    let (ptr, len, cap, _alloc) = key.into_raw_parts();
    assert_eq!((len, cap), (32, 32));
    assert!(t.is_live(ptr.as_ptr()));

    // The native side now owns it and frees it with its own function.
    // SAFETY: live region of `t`, released once.
    unsafe { raw::release_unsigned(&t, ptr.as_ptr()) };
    let s = t.stats();
    assert_eq!(s.live, 0);
    assert!(s.faults.is_empty());
    Ok(())
}

#[test]
fn misuse_through_raw_convention_is_caught() {
    init_tracing();
    let t = Tracking::new(CHeap);
    let p = raw::allocate(&t, 8);
    assert!(!p.is_null());
    // SAFETY: first release is legitimate; the tracker refuses the second.
    unsafe {
        raw::release_signed(&t, p.cast());
        raw::release_unsigned(&t, p);
    }
    assert_eq!(t.stats().faults.len(), 1);
}

#[test]
fn separate_trackers_do_not_accept_each_others_regions() {
    init_tracing();
    let a = Tracking::new(CHeap);
    let b = Tracking::new(CHeap);
    let Some(p) = a.allocate(16) else { panic!("allocation failed") };
    // SAFETY: `b` refuses a region it never produced.
    unsafe { b.release(p) };
    assert_eq!(b.fault_count(), 1);
    assert!(a.is_live(p.as_ptr()));
    // SAFETY: live region of `a`.
    unsafe { a.release(p) };
    assert_eq!(a.stats().live, 0);
}

#[test]
fn config_file_selects_backend() -> TestResult<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nyx-alloc.toml");
    std::fs::write(&path, "backend = \"c-heap\"\ntrack_allocations = true\nmax_allocation = 4096\n")?;
    let cfg = BridgeConfig::load_from_file(&path)?;
    assert_eq!(cfg.backend, Backend::CHeap);
    assert!(cfg.check_request(4097).is_err());

    let sys = SystemAllocator::from_backend(cfg.backend)?;
    let buf = NativeBuf::<_, u8>::zeroed_in(sys, 128)?;
    assert!(buf.iter().all(|&b| b == 0));
    Ok(())
}

#[test]
fn null_from_native_library_is_not_adopted() {
    init_tracing();
    // SAFETY: null is accepted and yields no handle.
    let s = unsafe { NativeBuf::from_c_str_in(CHeap, std::ptr::null_mut()) };
    assert!(s.is_none());
    assert!(NonNull::new(raw::allocate(&CHeap, usize::MAX)).is_none());
}
