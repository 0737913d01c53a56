//! Per-pid in-flight exec state (component: per-pid event slot, spec §4.1).

use tracexec_ebpf_common::{COMM_LEN, PATH_MAX};

/// Value type of the per-pid (per kernel tid) `HashMap` slot that bridges
/// `sys_enter_exec*` to `sys_exit_exec*`. Only scalar fields: BPF map values
/// cannot own a `Vec` or pointer.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ExecState {
    pub eid: u64,
    /// tgid at syscall entry. Used instead of the post-exec tgid when
    /// re-checking `should_trace` on exit, per spec §4.1 ("exit path
    /// procedure"): for a successful exec the thread's tid becomes the new
    /// tgid, which would silently change which closure membership applies.
    pub old_tgid: u32,
    pub ppid: u32,
    pub uid: u32,
    pub gid: u32,
    pub comm: [u8; COMM_LEN],
    pub filename: [u8; PATH_MAX],
    pub filename_len: u32,
    pub argc_emitted: u32,
    pub envc_emitted: u32,
    pub fd_emitted: u32,
    pub next_path_id: u32,
    pub flags: u32,
    pub execveat_fd: i32,
    pub execveat_flags: i32,
    pub is_execveat: u8,
    pub _pad: [u8; 3],
}

impl ExecState {
    pub const fn zeroed() -> Self {
        Self {
            eid: 0,
            old_tgid: 0,
            ppid: 0,
            uid: 0,
            gid: 0,
            comm: [0; COMM_LEN],
            filename: [0; PATH_MAX],
            filename_len: 0,
            argc_emitted: 0,
            envc_emitted: 0,
            fd_emitted: 0,
            next_path_id: 0,
            flags: 0,
            execveat_fd: -1,
            execveat_flags: 0,
            is_execveat: 0,
            _pad: [0; 3],
        }
    }

    /// Allocate the next path_id for a to-be-resolved `FD`/cwd path group.
    #[inline(always)]
    pub fn alloc_path_id(&mut self) -> u32 {
        let id = self.next_path_id;
        self.next_path_id += 1;
        id
    }
}
