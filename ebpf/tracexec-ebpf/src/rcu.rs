//! RCU read-side critical section guard.
//!
//! Maps spec §5's "lease a consistent snapshot of `(files, fdt)`; release
//! before doing anything unbounded" onto a small RAII type so the unlock
//! always runs, including on an early `?`/`return` out of the fd-table or
//! pid-namespace walk.

use aya_ebpf::helpers::gen::{bpf_rcu_read_lock, bpf_rcu_read_unlock};

pub struct RcuGuard;

impl RcuGuard {
    #[inline(always)]
    pub fn lock() -> Self {
        unsafe { bpf_rcu_read_lock() };
        RcuGuard
    }
}

impl Drop for RcuGuard {
    #[inline(always)]
    fn drop(&mut self) {
        unsafe { bpf_rcu_read_unlock() };
    }
}
