//! Joins wire sub-events by `eid` and hands back complete [`ExecEvent`]s in
//! ascending `eid` order (spec property 2).

use std::collections::{BinaryHeap, HashMap};
use std::cmp::Reverse;
use std::time::Duration;

use tracexec_ebpf_common::{FdRecord, PathRecord, PathSegmentRecord, StringRecord, SysExitRecord};

use super::partial::{FdPartial, PartialEvent, PartialState, PathPartial, SysExitInfo};
use crate::event::ExecEvent;

#[derive(Default)]
pub struct ReassemblyTable {
    open: HashMap<u64, PartialEvent>,
    completed: HashMap<u64, ExecEvent>,
    ready: BinaryHeap<Reverse<u64>>,
}

impl ReassemblyTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, eid: u64) -> &mut PartialEvent {
        self.open.entry(eid).or_insert_with(|| PartialEvent::new(eid))
    }

    pub fn ingest_string(&mut self, rec: &StringRecord) {
        let eid = rec.header.eid;
        let id = rec.header.id;
        let bytes = rec.data[..(rec.len as usize).min(rec.data.len())].to_vec();
        self.entry(eid).strings.insert(id, bytes);
    }

    pub fn ingest_fd(&mut self, rec: &FdRecord) {
        let eid = rec.header.eid;
        let end = rec.fstype_name_len as usize;
        let fstype = String::from_utf8_lossy(&rec.fstype_name[..end.min(rec.fstype_name.len())]).into_owned();
        self.entry(eid).fds.push(FdPartial {
            fd_num: rec.fd_num,
            open_flags: rec.open_flags,
            mnt_id: rec.mnt_id,
            inode: rec.inode,
            file_pos: rec.file_pos,
            fstype,
            path_id: rec.path_id,
        });
    }

    pub fn ingest_path_segment(&mut self, rec: &PathSegmentRecord) {
        let eid = rec.header.eid;
        let path_id = rec.header.id;
        let bytes = rec.data[..(rec.len as usize).min(rec.data.len())].to_vec();
        self.entry(eid)
            .paths
            .entry(path_id)
            .or_insert_with(PathPartial::default)
            .segments
            .insert(rec.index, bytes);
    }

    pub fn ingest_path(&mut self, rec: &PathRecord) {
        let eid = rec.header.eid;
        let path_id = rec.header.id;
        self.entry(eid)
            .paths
            .entry(path_id)
            .or_insert_with(PathPartial::default)
            .expected = Some(rec.segment_count);
    }

    /// `SYSEXIT` commits the eid: everything else for this exec has already
    /// arrived, so the event can be finished and queued for emission
    /// immediately (spec §4.3, §4.5 single-pass reassembly).
    pub fn ingest_sysexit(&mut self, rec: &SysExitRecord) {
        let eid = rec.header.eid;
        let mut partial = self.open.remove(&eid).unwrap_or_else(|| PartialEvent::new(eid));
        partial.sysexit = Some(SysExitInfo::from_record(rec));
        partial.state = PartialState::NeedsCommit;
        let event = partial.finish();
        self.completed.insert(eid, event);
        self.ready.push(Reverse(eid));
    }

    /// Pop the lowest-`eid` completed event, if any. Callers must drain
    /// this fully before declaring a `next()` call idle, since multiple
    /// events can complete between polls.
    pub fn pop_ready(&mut self) -> Option<ExecEvent> {
        let Reverse(eid) = self.ready.pop()?;
        self.completed.remove(&eid)
    }

    /// Force-complete any still-open event older than `max_age` (spec §9
    /// open question (a), watchdog force-completion). Returns them in
    /// ascending `eid` order via the same ready queue.
    pub fn sweep_stale(&mut self, max_age: Duration) {
        let stale: Vec<u64> = self
            .open
            .iter()
            .filter(|(_, p)| p.is_stale(max_age))
            .map(|(eid, _)| *eid)
            .collect();

        for eid in stale {
            if let Some(partial) = self.open.remove(&eid) {
                let event = partial.force_finish();
                self.completed.insert(eid, event);
                self.ready.push(Reverse(eid));
            }
        }
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracexec_ebpf_common::{EventHeader, EventType};

    fn header(eid: u64, id: u32, ty: EventType) -> EventHeader {
        EventHeader::new(100, eid, id, ty)
    }

    fn sysexit(eid: u64, argc: u32, envc: u32, fd_count: u32, path_count: u32) -> SysExitRecord {
        SysExitRecord {
            header: header(eid, 0, EventType::SysExit),
            ppid: 1,
            uid: 0,
            gid: 0,
            comm: *b"bash\0\0\0\0\0\0\0\0\0\0\0\0",
            filename: [0u8; tracexec_ebpf_common::PATH_MAX],
            filename_len: 0,
            is_execveat: 0,
            _pad: [0; 3],
            execveat_fd: -1,
            execveat_flags: 0,
            argc,
            envc,
            fd_count,
            path_count,
            retval: 0,
        }
    }

    fn string_rec(eid: u64, id: u32, s: &str) -> StringRecord {
        let mut data = [0u8; tracexec_ebpf_common::STRING_MAX];
        data[..s.len()].copy_from_slice(s.as_bytes());
        StringRecord {
            header: header(eid, id, EventType::String),
            len: s.len() as u32,
            data,
        }
    }

    #[test]
    fn joins_argv_and_envp_in_order() {
        let mut table = ReassemblyTable::new();
        table.ingest_string(&string_rec(1, 0, "/bin/ls"));
        table.ingest_string(&string_rec(1, 1, "-la"));
        table.ingest_string(&string_rec(1, 2, "PATH=/usr/bin"));
        table.ingest_sysexit(&sysexit(1, 2, 1, 0, 0));

        let event = table.pop_ready().expect("event ready");
        assert_eq!(event.argv, vec![b"/bin/ls".to_vec(), b"-la".to_vec()]);
        assert_eq!(event.envp, vec![b"PATH=/usr/bin".to_vec()]);
        assert_eq!(event.flags, 0);
    }

    #[test]
    fn emits_in_ascending_eid_order_regardless_of_arrival_order() {
        let mut table = ReassemblyTable::new();
        table.ingest_sysexit(&sysexit(5, 0, 0, 0, 0));
        table.ingest_sysexit(&sysexit(2, 0, 0, 0, 0));
        table.ingest_sysexit(&sysexit(9, 0, 0, 0, 0));

        let mut seen = Vec::new();
        while let Some(e) = table.pop_ready() {
            seen.push(e.eid);
        }
        assert_eq!(seen, vec![2, 5, 9]);
    }

    #[test]
    fn missing_argv_string_sets_drop_marker_honestly() {
        let mut table = ReassemblyTable::new();
        table.ingest_string(&string_rec(3, 0, "/bin/ls"));
        // id 1 never arrives, argc says 2.
        table.ingest_sysexit(&sysexit(3, 2, 0, 0, 0));

        let event = table.pop_ready().unwrap();
        assert!(event.has_flag(tracexec_ebpf_common::flags::USERSPACE_DROP_MARKER));
        assert_eq!(event.argv.len(), 2);
        assert!(event.argv[1].is_empty());
    }

    fn segment_rec(eid: u64, path_id: u32, index: u32, s: &str) -> PathSegmentRecord {
        let mut data = [0u8; tracexec_ebpf_common::PATH_SEGMENT_MAX];
        data[..s.len()].copy_from_slice(s.as_bytes());
        PathSegmentRecord {
            header: header(eid, path_id, EventType::PathSegment),
            index,
            len: s.len() as u16,
            _pad: [0; 2],
            data,
        }
    }

    fn path_rec(eid: u64, path_id: u32, segment_count: u32) -> PathRecord {
        PathRecord {
            header: header(eid, path_id, EventType::Path),
            segment_count,
        }
    }

    fn fd_rec(eid: u64, fd_num: i32, path_id: u32, open_flags: u32) -> FdRecord {
        FdRecord {
            header: header(eid, fd_num as u32, EventType::Fd),
            fd_num,
            open_flags,
            mnt_id: 1,
            inode: 42,
            file_pos: 0,
            fstype_name: [0u8; tracexec_ebpf_common::FSTYPE_NAME_MAX],
            fstype_name_len: 0,
            path_id,
        }
    }

    #[test]
    fn joins_leaf_first_path_segments_into_absolute_path() {
        let mut table = ReassemblyTable::new();
        // /usr/bin/ls -> leaf-first: ls, bin, usr
        table.ingest_path_segment(&segment_rec(4, 0, 0, "ls"));
        table.ingest_path_segment(&segment_rec(4, 0, 1, "bin"));
        table.ingest_path_segment(&segment_rec(4, 0, 2, "usr"));
        table.ingest_path(&path_rec(4, 0, 3));
        table.ingest_fd(&fd_rec(4, 3, 0, tracexec_ebpf_common::O_CLOEXEC));
        table.ingest_sysexit(&sysexit(4, 0, 0, 1, 1));

        let event = table.pop_ready().unwrap();
        assert_eq!(event.fds.len(), 1);
        assert!(event.fds[0].close_on_exec());
        assert_eq!(event.fds[0].path.display_path(), "/usr/bin/ls");
        assert!(!event.fds[0].path.truncated);
    }

    #[test]
    fn missing_path_segment_marks_path_truncated() {
        let mut table = ReassemblyTable::new();
        table.ingest_path_segment(&segment_rec(6, 0, 0, "ls"));
        // index 1 never arrives, segment_count says 2.
        table.ingest_path(&path_rec(6, 0, 2));
        table.ingest_fd(&fd_rec(6, 3, 0, 0));
        table.ingest_sysexit(&sysexit(6, 0, 0, 1, 1));

        let event = table.pop_ready().unwrap();
        assert!(event.fds[0].path.truncated);
        assert!(event.has_flag(tracexec_ebpf_common::flags::USERSPACE_DROP_MARKER));
    }

    #[test]
    fn watchdog_force_completes_stale_open_event() {
        let mut table = ReassemblyTable::new();
        table.ingest_string(&string_rec(7, 0, "/bin/sleep"));
        assert_eq!(table.open_count(), 1);

        table.sweep_stale(Duration::from_secs(0));
        assert_eq!(table.open_count(), 0);

        let event = table.pop_ready().unwrap();
        assert_eq!(event.eid, 7);
        assert!(event.has_flag(tracexec_ebpf_common::flags::BAIL_OUT));
    }
}
