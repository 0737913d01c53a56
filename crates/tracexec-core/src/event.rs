//! Consumer-facing event shapes — the joined view [`crate::reassembly`]
//! builds out of the wire sub-events defined in `tracexec-ebpf-common`.

/// One path, leaf-first segments as captured off the kernel's dentry chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathInfo {
    /// Leaf-first path components, e.g. `["target", "bin", "usr"]` for
    /// `/usr/bin/target`.
    pub segments: Vec<Vec<u8>>,
    /// Set when the expected segment count (from the `PATH` terminator)
    /// didn't match how many `PATH_SEGMENT` records actually arrived —
    /// the path is a best-effort prefix/suffix, not a guaranteed-complete
    /// string (spec property 6, drop-marker honesty).
    pub truncated: bool,
}

impl PathInfo {
    /// Join the leaf-first segments into a `/`-separated absolute path.
    /// Lossy: non-UTF8 bytes are replaced, matching how a terminal would
    /// show them.
    pub fn display_path(&self) -> String {
        let mut out = String::new();
        for seg in self.segments.iter().rev() {
            out.push('/');
            out.push_str(&String::from_utf8_lossy(seg));
        }
        if out.is_empty() {
            out.push('/');
        }
        out
    }
}

/// One open file descriptor observed at `execve` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FdInfo {
    pub fd_num: i32,
    pub open_flags: u32,
    pub mnt_id: i32,
    pub inode: u64,
    pub file_pos: i64,
    pub fstype: String,
    pub path: PathInfo,
}

impl FdInfo {
    pub fn close_on_exec(&self) -> bool {
        self.open_flags & tracexec_ebpf_common::O_CLOEXEC != 0
    }
}

/// A fully reassembled `execve`/`execveat` observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecEvent {
    /// Correlation id this event was assembled from.
    pub eid: u64,
    pub pid: i32,
    pub ppid: u32,
    pub uid: u32,
    pub gid: u32,
    pub comm: String,
    pub filename: Vec<u8>,
    pub argv: Vec<Vec<u8>>,
    pub envp: Vec<Vec<u8>>,
    pub fds: Vec<FdInfo>,
    pub cwd: PathInfo,
    pub is_execveat: bool,
    pub execveat_fd: i32,
    pub execveat_flags: i32,
    pub retval: i64,
    /// Raw advisory flag bits OR'd across every sub-event that made up this
    /// exec event (see `tracexec_ebpf_common::flags`). A nonzero value does
    /// not mean the event is unusable — it means part of it is
    /// best-effort; inspect with [`ExecEvent::has_flag`].
    pub flags: u32,
}

impl ExecEvent {
    pub fn has_flag(&self, bit: u32) -> bool {
        self.flags & bit != 0
    }

    pub fn succeeded(&self) -> bool {
        self.retval == 0
    }

    pub fn filename_lossy(&self) -> String {
        String::from_utf8_lossy(&self.filename).into_owned()
    }
}

/// A distinct process exit belonging to the traced closure (spec §4.1
/// "Exit handling"). Not joined with any exec event — exits are reported
/// standalone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitEvent {
    pub pid: i32,
    pub exit_code: i32,
    pub exit_signal: i32,
    pub is_root_tracee: bool,
}

/// A fork observed inside the traced closure (spec §4.1 "Fork handling").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkEvent {
    pub child_pid: i32,
    pub parent_pid: u32,
}

/// One item returned by [`crate::session::TraceSession::next`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Exec(ExecEvent),
    Exit(ExitEvent),
    Fork(ForkEvent),
    /// `next` timed out with nothing ready; not an error.
    Idle,
    /// The session is draining its last events after [`crate::session::TraceSession::close`]
    /// was requested concurrently, or the kernel side detached.
    Shutdown,
}
