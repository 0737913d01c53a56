//! argv/envp streaming (spec §4.1 entry path step 3).
//!
//! `ARGC_MAX` (233017) is far too large to unroll as a plain Rust `for` loop
//! under the verifier's instruction budget, so the walk uses the
//! `bpf_loop` kernel helper, which the verifier accepts in O(1) instructions
//! regardless of the iteration bound. The callback reads one pointer, reads
//! its target string into per-CPU scratch, and submits one `STRING` record.

use aya_ebpf::macros::map;
use aya_ebpf::maps::PerCpuArray;
use aya_ebpf::helpers::{bpf_probe_read_user, bpf_probe_read_user_str_bytes};
use aya_ebpf::helpers::gen::bpf_loop;
use core::ffi::c_void;

use tracexec_ebpf_common::{flags, EventHeader, EventType, StringRecord, ARGC_MAX, STRING_MAX};

use crate::maps::EVENTS;

#[repr(C)]
struct StringScratch {
    buf: [u8; STRING_MAX],
}

#[map]
static STRING_SCRATCH: PerCpuArray<StringScratch> = PerCpuArray::with_max_entries(1, 0);

/// Arguments threaded through the `bpf_loop` callback. Plain data only —
/// the callback receives this by raw pointer, not by Rust reference capture.
#[repr(C)]
struct StreamCtx {
    base: u64,
    stride: u32,
    id_offset: u32,
    eid: u64,
    pid: i32,
    emitted: u32,
    aggregate_flags: u32,
    stopped: u8,
}

/// Stream one of argv or envp, returning (count emitted, aggregate flags).
/// `id_offset` is 0 for argv, `argc` for envp.
#[inline(always)]
pub fn stream_strings(base: u64, is_compat: bool, eid: u64, pid: i32, id_offset: u32) -> (u32, u32) {
    if base == 0 {
        return (0, 0);
    }

    let mut ctx = StreamCtx {
        base,
        stride: if is_compat { 4 } else { 8 },
        id_offset,
        eid,
        pid,
        emitted: 0,
        aggregate_flags: 0,
        stopped: 0,
    };

    unsafe {
        bpf_loop(
            ARGC_MAX,
            stream_callback as *mut c_void,
            &mut ctx as *mut StreamCtx as *mut c_void,
            0,
        );
    }

    if ctx.stopped == 0 && ctx.emitted >= ARGC_MAX {
        ctx.aggregate_flags |= flags::TOO_MANY_ITEMS;
    }

    (ctx.emitted, ctx.aggregate_flags)
}

/// `bpf_loop` callback: return 1 to stop iteration, 0 to continue.
extern "C" fn stream_callback(index: u32, ctx_ptr: *mut c_void) -> i64 {
    let ctx = unsafe { &mut *(ctx_ptr as *mut StreamCtx) };

    let ptr_addr = ctx.base + (index as u64) * (ctx.stride as u64);
    let argp: u64 = if ctx.stride == 8 {
        match unsafe { bpf_probe_read_user(ptr_addr as *const u64) } {
            Ok(v) => v,
            Err(_) => {
                ctx.aggregate_flags |= flags::PTR_READ_FAILURE;
                ctx.stopped = 1;
                return 1;
            }
        }
    } else {
        match unsafe { bpf_probe_read_user(ptr_addr as *const u32) } {
            Ok(v) => v as u64,
            Err(_) => {
                ctx.aggregate_flags |= flags::PTR_READ_FAILURE;
                ctx.stopped = 1;
                return 1;
            }
        }
    };

    if argp == 0 {
        ctx.stopped = 1;
        return 1;
    }

    let scratch = match STRING_SCRATCH.get_ptr_mut(0) {
        Some(p) => unsafe { &mut *p },
        None => {
            ctx.aggregate_flags |= flags::NO_ROOM;
            ctx.stopped = 1;
            return 1;
        }
    };

    let read_len = match unsafe { bpf_probe_read_user_str_bytes(argp as *const u8, &mut scratch.buf) }
    {
        Ok(s) => s.len() as u32,
        Err(_) => {
            ctx.aggregate_flags |= flags::STR_READ_FAILURE;
            0
        }
    };

    let mut rec_flags = 0u32;
    if read_len as usize >= STRING_MAX - 1 {
        rec_flags |= flags::POSSIBLE_TRUNCATION;
    }

    if let Some(mut entry) = EVENTS.reserve::<StringRecord>(0) {
        let rec = entry.as_mut_ptr();
        unsafe {
            (*rec).header = EventHeader::new(ctx.pid, ctx.eid, ctx.id_offset + index, EventType::String);
            (*rec).header.flags = rec_flags;
            (*rec).len = read_len;
            (*rec).data = scratch.buf;
        }
        entry.submit(0);
    } else {
        ctx.aggregate_flags |= flags::OUTPUT_FAILURE;
    }

    ctx.emitted = index + 1;
    ctx.aggregate_flags |= rec_flags & flags::STR_READ_FAILURE;
    0
}
