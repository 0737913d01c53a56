//! A single in-flight `eid`'s accumulated sub-events.
//!
//! Sub-events for one `eid` all arrive before its `SYSEXIT` record — the
//! kernel probe only emits `SYSEXIT` from the exit-path tracepoint, after
//! every `STRING`/`FD`/`PATH_SEGMENT`/`PATH` record for that exec was
//! already submitted from the entry path. So the state machine is simple:
//! accumulate sub-events in `Open`, transition to `NeedsCommit` the moment
//! `SYSEXIT` arrives, reconcile counts, then `Complete`.

use std::collections::HashMap;
use std::time::Instant;

use tracexec_ebpf_common::{flags, SysExitRecord};

use crate::event::{ExecEvent, FdInfo, PathInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialState {
    Open,
    NeedsCommit,
    Complete,
}

#[derive(Debug, Clone)]
pub(crate) struct SysExitInfo {
    pub pid: i32,
    pub ppid: u32,
    pub uid: u32,
    pub gid: u32,
    pub comm: String,
    pub filename: Vec<u8>,
    pub is_execveat: bool,
    pub execveat_fd: i32,
    pub execveat_flags: i32,
    pub argc: u32,
    pub envc: u32,
    pub fd_count: u32,
    pub path_count: u32,
    pub retval: i64,
    pub flags: u32,
}

impl SysExitInfo {
    pub(crate) fn from_record(rec: &SysExitRecord) -> Self {
        let comm_end = rec.comm.iter().position(|&b| b == 0).unwrap_or(rec.comm.len());
        Self {
            pid: rec.header.pid,
            ppid: rec.ppid,
            uid: rec.uid,
            gid: rec.gid,
            comm: String::from_utf8_lossy(&rec.comm[..comm_end]).into_owned(),
            filename: rec.filename[..rec.filename_len as usize.min(rec.filename.len())].to_vec(),
            is_execveat: rec.is_execveat != 0,
            execveat_fd: rec.execveat_fd,
            execveat_flags: rec.execveat_flags,
            argc: rec.argc,
            envc: rec.envc,
            fd_count: rec.fd_count,
            path_count: rec.path_count,
            retval: rec.retval,
            flags: rec.header.flags,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct PathPartial {
    /// segment index -> bytes.
    pub segments: HashMap<u32, Vec<u8>>,
    /// `segment_count` reported by the `PATH` terminator, once seen.
    pub expected: Option<u32>,
}

#[derive(Debug, Clone)]
pub(crate) struct FdPartial {
    pub fd_num: i32,
    pub open_flags: u32,
    pub mnt_id: i32,
    pub inode: u64,
    pub file_pos: i64,
    pub fstype: String,
    pub path_id: u32,
}

#[derive(Debug)]
pub(crate) struct PartialEvent {
    pub eid: u64,
    pub state: PartialState,
    pub sysexit: Option<SysExitInfo>,
    pub strings: HashMap<u32, Vec<u8>>,
    pub fds: Vec<FdPartial>,
    pub paths: HashMap<u32, PathPartial>,
    pub first_seen: Instant,
}

impl PartialEvent {
    pub(crate) fn new(eid: u64) -> Self {
        Self {
            eid,
            state: PartialState::Open,
            sysexit: None,
            strings: HashMap::new(),
            fds: Vec::new(),
            paths: HashMap::new(),
            first_seen: Instant::now(),
        }
    }

    pub(crate) fn is_stale(&self, max_age: std::time::Duration) -> bool {
        self.state != PartialState::Complete && self.first_seen.elapsed() >= max_age
    }

    /// Force-complete an event whose `SYSEXIT` never arrived (watchdog
    /// sweep, spec §9 open question (a)). Synthesizes a placeholder
    /// `SysExitInfo` from whatever was accumulated so far and flags the
    /// result [`flags::BAIL_OUT`].
    pub(crate) fn force_finish(mut self) -> ExecEvent {
        if self.sysexit.is_none() {
            // No SYSEXIT ever arrived, so argv/envp can't be split at the
            // real argc boundary — surface everything accumulated as argv.
            let argc = self.strings.len() as u32;
            self.sysexit = Some(SysExitInfo {
                pid: 0,
                ppid: 0,
                uid: 0,
                gid: 0,
                comm: String::new(),
                filename: Vec::new(),
                is_execveat: false,
                execveat_fd: -1,
                execveat_flags: 0,
                argc,
                envc: 0,
                fd_count: self.fds.len() as u32,
                path_count: self.paths.len() as u32,
                retval: 0,
                flags: flags::BAIL_OUT,
            });
        } else if let Some(info) = self.sysexit.as_mut() {
            info.flags |= flags::BAIL_OUT;
        }
        self.finish()
    }

    /// Reconcile accumulated sub-events against the `SYSEXIT` counts and
    /// produce the joined [`ExecEvent`]. Always succeeds — missing pieces
    /// are reported via `flags`/`truncated` rather than an error (spec
    /// property 6: drop-marker honesty, never silent).
    pub(crate) fn finish(mut self) -> ExecEvent {
        let info = self.sysexit.take().expect("finish called before SYSEXIT arrived");
        let mut agg_flags = info.flags;

        let mut argv = Vec::with_capacity(info.argc as usize);
        for id in 0..info.argc {
            match self.strings.remove(&id) {
                Some(s) => argv.push(s),
                None => {
                    agg_flags |= flags::USERSPACE_DROP_MARKER;
                    argv.push(Vec::new());
                }
            }
        }
        let mut envp = Vec::with_capacity(info.envc as usize);
        for id in info.argc..info.argc + info.envc {
            match self.strings.remove(&id) {
                Some(s) => envp.push(s),
                None => {
                    agg_flags |= flags::USERSPACE_DROP_MARKER;
                    envp.push(Vec::new());
                }
            }
        }

        if self.fds.len() != info.fd_count as usize {
            agg_flags |= flags::USERSPACE_DROP_MARKER;
        }

        let mut cwd = PathInfo::default();
        let mut fds = Vec::with_capacity(self.fds.len());
        for fd in self.fds.drain(..) {
            let path = resolve_path(&mut self.paths, fd.path_id, &mut agg_flags);
            fds.push(FdInfo {
                fd_num: fd.fd_num,
                open_flags: fd.open_flags,
                mnt_id: fd.mnt_id,
                inode: fd.inode,
                file_pos: fd.file_pos,
                fstype: fd.fstype,
                path,
            });
        }

        // The cwd path group is always the last `path_id` allocated
        // (spec §4.1: one group per fd, plus one for cwd).
        if info.path_count > 0 {
            let cwd_path_id = info.path_count - 1;
            cwd = resolve_path(&mut self.paths, cwd_path_id, &mut agg_flags);
        }

        if self.paths.keys().count() > fds.len() + 1 {
            agg_flags |= flags::USERSPACE_DROP_MARKER;
        }

        ExecEvent {
            eid: self.eid,
            pid: info.pid,
            ppid: info.ppid,
            uid: info.uid,
            gid: info.gid,
            comm: info.comm,
            filename: info.filename,
            argv,
            envp,
            fds,
            cwd,
            is_execveat: info.is_execveat,
            execveat_fd: info.execveat_fd,
            execveat_flags: info.execveat_flags,
            retval: info.retval,
            flags: agg_flags,
        }
    }
}

fn resolve_path(paths: &mut HashMap<u32, PathPartial>, path_id: u32, agg_flags: &mut u32) -> PathInfo {
    let Some(partial) = paths.remove(&path_id) else {
        *agg_flags |= flags::USERSPACE_DROP_MARKER;
        return PathInfo { segments: Vec::new(), truncated: true };
    };

    let expected = partial.expected.unwrap_or(0);
    let mut segments = Vec::with_capacity(expected as usize);
    let mut truncated = partial.expected.is_none();
    for idx in 0..expected {
        match partial.segments.get(&idx) {
            Some(bytes) => segments.push(bytes.clone()),
            None => {
                truncated = true;
                break;
            }
        }
    }
    if truncated {
        *agg_flags |= flags::USERSPACE_DROP_MARKER;
    }
    PathInfo { segments, truncated }
}
