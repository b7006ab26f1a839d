#![no_main]

use libfuzzer_sys::fuzz_target;
use nyx_alloc_bridge::{raw, CHeap, NativeBuf, Tracking};

fuzz_target!(|data: &[u8]| {
    // Interpret input as a program of allocate / write / release / hand-off ops
    // over a small slot table. Handles are owned; raw regions go through the tracker.
    let tracker = Tracking::new(CHeap);
    let mut owned: Vec<Option<NativeBuf<&Tracking<CHeap>>>> = (0..8).map(|_| None).collect();
    let mut loose: Vec<*mut u8> = Vec::new();

    for chunk in data.chunks_exact(3) {
        let (op, slot, arg) = (chunk[0], usize::from(chunk[1]) % 8, chunk[2]);
        match op % 5 {
            // allocate (replacing an existing handle releases it)
            0 => owned[slot] = NativeBuf::new_in(&tracker, usize::from(arg) * 17).ok(),
            // write a pattern and verify it
            1 => {
                if let Some(buf) = owned[slot].as_mut() {
                    buf.fill(arg);
                    assert!(buf.iter().all(|&b| b == arg));
                }
            }
            // release
            2 => owned[slot] = None,
            // hand off to the raw convention
            3 => {
                if let Some(buf) = owned[slot].take() {
                    loose.push(buf.into_raw());
                }
            }
            // release a raw region through one of the two views
            _ => {
                if let Some(p) = loose.pop() {
                    // SAFETY: `p` came from `into_raw` and is released once.
                    unsafe {
                        if arg & 1 == 0 {
                            raw::release_unsigned(&tracker, p);
                        } else {
                            raw::release_signed(&tracker, p.cast());
                        }
                    }
                }
            }
        }
    }

    drop(owned);
    for p in loose {
        // SAFETY: remaining raw regions, each released once.
        unsafe { raw::release_unsigned(&tracker, p) };
    }
    let stats = tracker.stats();
    assert_eq!(stats.live, 0);
    assert!(stats.faults.is_empty());
});
