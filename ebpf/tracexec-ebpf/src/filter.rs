//! Tracee-closure filter (component C, spec §4.4).
//!
//! Trace-decision policy, verbatim from spec.md §4.4: (a) if `follow_fork`
//! is off, trace all — there is no process tree to restrict to, and
//! `tracee_pid == 0` means "ignore follow_fork, trace all" for the same
//! reason; (b) otherwise consult the tgid closure, falling back on a miss to
//! a pid-namespace identity walk that recognizes the root tracee on its very
//! first exec (before any `sched_process_fork` could have added it).

use aya_ebpf::helpers::bpf_get_current_task_btf;
use tracexec_ebpf_common::ProbeConfig;

use crate::maps::{CONFIG, TRACEE_CLOSURE};
use crate::offsets::{offsets, read_at, read_field, read_ptr};
use crate::rcu::RcuGuard;

#[inline(always)]
pub fn should_trace(tgid: u32) -> bool {
    let cfg = match CONFIG.get(0) {
        Some(c) => *c,
        None => return false,
    };

    if cfg.tracee_pid == 0 || cfg.follow_fork == 0 {
        return true;
    }

    if unsafe { TRACEE_CLOSURE.get(&tgid) }.is_some() {
        return true;
    }

    resolve_root_tracee(tgid, &cfg)
}

/// Walk `current->thread_pid` to its deepest pid-namespace entry and compare
/// `(pid_in_that_ns, pid_ns_inode)` against the configured root tracee
/// identity (spec.md §4.4). On a match, `tgid` is the root tracee taking its
/// very first exec: record it in the closure and return true. Must run
/// under RCU, same as the fd-table walk — `thread_pid`/`numbers[]` are only
/// guaranteed stable for the duration of the read-side critical section.
#[inline(always)]
fn resolve_root_tracee(tgid: u32, cfg: &ProbeConfig) -> bool {
    let off = offsets();
    let _rcu = RcuGuard::lock();

    let task = unsafe { bpf_get_current_task_btf() } as u64;
    let thread_pid = match unsafe { read_ptr(task, off.task_thread_pid) } {
        Some(p) if p != 0 => p,
        _ => return false,
    };

    let level: u32 = unsafe { read_field(thread_pid, off.pid_level) }.unwrap_or(0);
    let numbers_base = thread_pid.wrapping_add(off.pid_numbers as u64);
    let upid_addr = numbers_base.wrapping_add((level as u64) * tracexec_ebpf_common::UPID_SIZE);

    let pid_in_ns: i32 =
        unsafe { read_at(upid_addr.wrapping_add(off.upid_nr as u64)) }.unwrap_or(0);
    let ns_ptr: u64 =
        unsafe { read_at(upid_addr.wrapping_add(off.upid_ns as u64)) }.unwrap_or(0);
    if ns_ptr == 0 {
        return false;
    }

    let ns_common_addr = ns_ptr.wrapping_add(off.pid_namespace_ns as u64);
    let ns_inum: u32 =
        unsafe { read_field(ns_common_addr, off.ns_common_inum) }.unwrap_or(0);

    if ns_inum != 0 && pid_in_ns == cfg.tracee_pid && ns_inum == cfg.tracee_pidns_inum {
        let _ = TRACEE_CLOSURE.insert(&tgid, &1u8, 0);
        true
    } else {
        false
    }
}
