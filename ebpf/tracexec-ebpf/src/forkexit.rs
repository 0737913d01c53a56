//! `sched_process_fork` / `sched_process_exit` tracepoint handlers
//! (spec §4.1 "Fork handling" / "Exit handling").

use aya_ebpf::helpers::bpf_get_current_task_btf;
use aya_ebpf::macros::tracepoint;
use aya_ebpf::maps::ring_buf::RingBufEntry;
use aya_ebpf::programs::TracePointContext;

use tracexec_ebpf_common::{EventHeader, EventType, ExitRecord, ForkRecord};

use crate::eid::next_eid;
use crate::filter::should_trace;
use crate::maps::{CONFIG, EVENTS, TRACEE_CLOSURE};
use crate::offsets::{offsets, read_field};

const BPF_RB_FORCE_WAKEUP: u64 = 2;

#[repr(C)]
struct SchedProcessForkArgs {
    _common_type: u16,
    _common_flags: u8,
    _common_preempt_count: u8,
    _common_pid: i32,
    parent_comm: [u8; 16],
    parent_pid: i32,
    child_comm: [u8; 16],
    child_pid: i32,
}

#[repr(C)]
struct SchedProcessExitArgs {
    _common_type: u16,
    _common_flags: u8,
    _common_preempt_count: u8,
    _common_pid: i32,
    comm: [u8; 16],
    pid: i32,
    prio: i32,
}

#[tracepoint]
pub fn sched_process_fork(ctx: TracePointContext) -> u32 {
    match try_fork(&ctx) {
        Ok(()) => 0,
        Err(_) => 0,
    }
}

#[tracepoint]
pub fn sched_process_exit(ctx: TracePointContext) -> u32 {
    match try_exit(&ctx) {
        Ok(()) => 0,
        Err(_) => 0,
    }
}

fn try_fork(ctx: &TracePointContext) -> Result<(), i64> {
    let args: SchedProcessForkArgs = unsafe { ctx.read_at(0).map_err(|_| 1i64)? };

    let cfg = match CONFIG.get(0) {
        Some(c) => *c,
        None => return Ok(()),
    };
    if cfg.follow_fork == 0 {
        return Ok(());
    }

    let parent_tgid = args.parent_pid as u32;
    if !should_trace(parent_tgid) {
        return Ok(());
    }

    let child_tgid = args.child_pid as u32;
    let _ = TRACEE_CLOSURE.insert(&child_tgid, &1u8, 0);

    let eid = next_eid();
    if let Some(mut entry) = reserve_with_wakeup::<ForkRecord>() {
        let rec = entry.as_mut_ptr();
        unsafe {
            (*rec).header = EventHeader::new(child_tgid as i32, eid, 0, EventType::Fork);
            (*rec).parent_tgid = parent_tgid;
        }
        entry.submit(BPF_RB_FORCE_WAKEUP);
    }

    Ok(())
}

fn try_exit(ctx: &TracePointContext) -> Result<(), i64> {
    let args: SchedProcessExitArgs = unsafe { ctx.read_at(0).map_err(|_| 1i64)? };

    let tgid = args.pid as u32;
    let cfg = match CONFIG.get(0) {
        Some(c) => *c,
        None => return Ok(()),
    };

    let is_root_tracee = cfg.tracee_pid != 0 && tgid as i32 == cfg.tracee_pid;
    if !is_root_tracee && unsafe { TRACEE_CLOSURE.get(&tgid) }.is_none() {
        return Ok(());
    }

    let _ = TRACEE_CLOSURE.remove(&tgid);

    // `sched_process_exit` fires in the exiting task's own context, so
    // `current == task`; the tracepoint args don't carry the raw wait-status,
    // only `task_struct->exit_code` does.
    let task = unsafe { bpf_get_current_task_btf() } as u64;
    let off = offsets();
    let raw_status: i32 = unsafe { read_field(task, off.task_exit_code) }.unwrap_or(0);

    let eid = next_eid();
    if let Some(mut entry) = reserve_with_wakeup::<ExitRecord>() {
        let rec = entry.as_mut_ptr();
        unsafe {
            (*rec).header = EventHeader::new(tgid as i32, eid, 0, EventType::Exit);
            (*rec).exit_code = (raw_status >> 8) & 0xff;
            (*rec).exit_signal = raw_status & 0x7f;
            (*rec).is_root_tracee = is_root_tracee as u8;
            (*rec)._pad = [0; 3];
        }
        entry.submit(BPF_RB_FORCE_WAKEUP);
    }

    Ok(())
}

#[inline(always)]
fn reserve_with_wakeup<T>() -> Option<RingBufEntry<T>> {
    EVENTS.reserve::<T>(0)
}
