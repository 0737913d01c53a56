//! Global monotonic event-id / drop-counter allocation.
//!
//! BPF maps are the only mutable global state a probe has; a plain `static
//! AtomicU64` is not an option inside `#![no_std]` BPF bytecode. The usual
//! aya idiom is a one-entry `Array` map whose backing memory is reinterpreted
//! as an atomic and bumped with `fetch_add` — eid uniqueness only needs the
//! read-modify-write itself to be atomic, not cross-CPU visibility ordering
//! (spec §9 "Global counters").

use core::sync::atomic::{AtomicU64, Ordering};

use crate::maps::{DROP_COUNTER, EID_COUNTER};

#[inline(always)]
fn bump(map: &aya_ebpf::maps::Array<u64>) -> u64 {
    match map.get_ptr_mut(0) {
        Some(ptr) => {
            let atomic = unsafe { AtomicU64::from_ptr(ptr as *mut u64) };
            atomic.fetch_add(1, Ordering::Relaxed)
        }
        None => 0,
    }
}

/// Allocate the next globally unique `eid`.
#[inline(always)]
pub fn next_eid() -> u64 {
    bump(&EID_COUNTER)
}

/// Bump the global drop counter (capacity exhaustion, §7.iii) and return the
/// new value, mostly useful for tests exercising the counter in isolation.
#[inline(always)]
pub fn record_drop() -> u64 {
    bump(&DROP_COUNTER)
}
