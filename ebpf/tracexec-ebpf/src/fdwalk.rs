//! Open file-descriptor table walk (component D, spec §4.2).
//!
//! Copies `current->files->fdt`'s `open_fds`/`close_on_exec` bitmaps word by
//! word into per-CPU scratch under an RCU read-side critical section, then
//! scans the copy with ordinary find-first-set iteration — the unbounded
//! part (resolving each fd's path) happens after the lease is released.

use tracexec_ebpf_common::{flags, FDSET_SIZE_MAX_IN_LONG};

use crate::maps::FD_SCRATCH;
use crate::offsets::{offsets, read_at, read_field, read_ptr};
use crate::rcu::RcuGuard;
use crate::state::ExecState;

/// One bit set in the copied `open_fds` bitmap.
pub struct OpenFd {
    pub fd_num: i32,
    /// `struct file *`, still to be resolved by the caller (flags/pos/inode,
    /// then path via [`crate::pathwalk`]).
    pub file: u64,
    pub close_on_exec: bool,
}

/// Snapshot `current`'s fd table into per-CPU scratch and return the list of
/// currently-open fds as `(fd_num, struct file*, cloexec)`. Caller bounds how
/// many of these it actually resolves into `FD`/`PATH` records; this only
/// decodes the bitmap.
#[inline(always)]
pub fn snapshot_open_fds(task: u64, out: &mut [OpenFd], state: &mut ExecState) -> (usize, u32) {
    let off = offsets();
    let _rcu = RcuGuard::lock();

    let scratch = match FD_SCRATCH.get_ptr_mut(0) {
        Some(p) => unsafe { &mut *p },
        None => return (0, flags::NO_ROOM),
    };

    let files = match unsafe { read_ptr(task, off.task_files) } {
        Some(p) if p != 0 => p,
        _ => return (0, flags::FDS_PROBE_FAILURE),
    };

    let fdt = match unsafe { read_ptr(files, off.files_fdt) } {
        Some(p) if p != 0 => p,
        _ => return (0, flags::FDS_PROBE_FAILURE),
    };

    let max_fds: u32 = unsafe { read_field(fdt, off.fdtable_max_fds) }.unwrap_or(0);
    let word_count = ((max_fds as usize + 63) / 64).min(FDSET_SIZE_MAX_IN_LONG);

    let open_fds_ptr = unsafe { read_ptr(fdt, off.fdtable_open_fds) }.unwrap_or(0);
    let cloexec_ptr = unsafe { read_ptr(fdt, off.fdtable_close_on_exec) }.unwrap_or(0);
    let fd_array = unsafe { read_ptr(fdt, off.fdtable_fd) }.unwrap_or(0);

    let mut agg_flags = 0u32;
    let mut i = 0usize;
    while i < word_count {
        scratch.open_fds[i] = if open_fds_ptr == 0 {
            0
        } else {
            unsafe { read_at::<u64>(open_fds_ptr + (i as u64) * 8) }.unwrap_or_else(|| {
                agg_flags |= flags::FDS_PROBE_FAILURE;
                0
            })
        };
        scratch.close_on_exec[i] = if cloexec_ptr == 0 {
            0
        } else {
            unsafe { read_at::<u64>(cloexec_ptr + (i as u64) * 8) }.unwrap_or(0)
        };
        i += 1;
    }

    let mut found = 0usize;
    let mut word = 0usize;
    while word < word_count {
        let mut bits = scratch.open_fds[word];
        while bits != 0 {
            if found >= out.len() {
                // More set bits remain in the bitmap than `out` can hold.
                // Stop storing but keep scanning only long enough to know
                // this happened — the caller's declared fd_count must not
                // silently undercount what was actually open (Property 3).
                agg_flags |= flags::NO_ROOM;
                state.fd_emitted = found as u32;
                return (found, agg_flags);
            }
            let bit = bits.trailing_zeros() as usize;
            bits &= bits - 1;
            let fd_num = (word * 64 + bit) as i32;

            let file_ptr = if fd_array == 0 {
                0
            } else {
                unsafe { read_at::<u64>(fd_array + ((word * 64 + bit) as u64) * 8) }.unwrap_or(0)
            };

            let cloexec = (scratch.close_on_exec[word] >> bit) & 1 != 0;

            out[found] = OpenFd {
                fd_num,
                file: file_ptr,
                close_on_exec: cloexec,
            };
            found += 1;
        }
        word += 1;
    }

    state.fd_emitted = found as u32;
    (found, agg_flags)
}
