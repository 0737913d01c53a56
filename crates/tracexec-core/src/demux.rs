//! Raw ring-buffer record dispatch, kept separate from [`crate::session`] so
//! the priority/shutdown rules (spec property 7) are testable against
//! synthetic byte buffers without a live probe.

use std::mem::size_of;
use std::time::Duration;

use tracing::warn;

use tracexec_ebpf_common::{
    EventHeader, EventType, ExitRecord, FdRecord, ForkRecord, PathRecord, PathSegmentRecord,
    StringRecord, SysExitRecord,
};

use crate::event::{Event, ExitEvent, ForkEvent};
use crate::reassembly::ReassemblyTable;

#[derive(Default)]
pub(crate) struct Demux {
    table: ReassemblyTable,
    /// FORK/EXIT records aren't joined by `eid` — they're queued and handed
    /// back in arrival order, ahead of reassembled exec events.
    pending_forks: Vec<ForkEvent>,
    pending_exits: Vec<ExitEvent>,
    /// Set the moment an `EXIT{is_root_tracee: true}` is dispatched. Once
    /// set, the session stops waiting out its timeout on empty polls.
    pub(crate) root_exited: bool,
}

impl Demux {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn dispatch(&mut self, data: &[u8]) {
        if data.len() < size_of::<EventHeader>() {
            warn!("ring buffer record shorter than a header, dropping");
            return;
        }
        let header: EventHeader = unsafe { *(data.as_ptr() as *const EventHeader) };
        let Some(event_type) = EventType::from_u32(header.event_type) else {
            warn!("unknown event_type {} on the wire, dropping", header.event_type);
            return;
        };

        match event_type {
            EventType::String => {
                if let Some(rec) = read_record::<StringRecord>(data) {
                    self.table.ingest_string(rec);
                }
            }
            EventType::Fd => {
                if let Some(rec) = read_record::<FdRecord>(data) {
                    self.table.ingest_fd(rec);
                }
            }
            EventType::PathSegment => {
                if let Some(rec) = read_record::<PathSegmentRecord>(data) {
                    self.table.ingest_path_segment(rec);
                }
            }
            EventType::Path => {
                if let Some(rec) = read_record::<PathRecord>(data) {
                    self.table.ingest_path(rec);
                }
            }
            EventType::SysExit => {
                if let Some(rec) = read_record::<SysExitRecord>(data) {
                    self.table.ingest_sysexit(rec);
                }
            }
            EventType::Fork => {
                if let Some(rec) = read_record::<ForkRecord>(data) {
                    self.pending_forks.push(ForkEvent {
                        child_pid: rec.header.pid,
                        parent_pid: rec.parent_tgid,
                    });
                }
            }
            EventType::Exit => {
                if let Some(rec) = read_record::<ExitRecord>(data) {
                    let is_root_tracee = rec.is_root_tracee != 0;
                    if is_root_tracee {
                        self.root_exited = true;
                    }
                    self.pending_exits.push(ExitEvent {
                        pid: rec.header.pid,
                        exit_code: rec.exit_code,
                        exit_signal: rec.exit_signal,
                        is_root_tracee,
                    });
                }
            }
            EventType::SysEnter => {
                // The entry tracepoint never emits a standalone SYSENTER
                // record on the wire; it only drives STRING/FD/PATH
                // emission. Nothing to ingest here.
            }
        }
    }

    /// Pop whatever event is ready next, in a fixed priority: forks and
    /// exits (simple FIFO queues) ahead of reassembled execs (ascending
    /// `eid` order). Neither queue is large in practice — exec reassembly
    /// is the bottleneck — so this ordering doesn't starve either side.
    pub(crate) fn take_ready(&mut self) -> Option<Event> {
        if !self.pending_forks.is_empty() {
            return Some(Event::Fork(self.pending_forks.remove(0)));
        }
        if !self.pending_exits.is_empty() {
            return Some(Event::Exit(self.pending_exits.remove(0)));
        }
        self.table.pop_ready().map(Event::Exec)
    }

    pub(crate) fn sweep_stale(&mut self, max_age: Duration) {
        self.table.sweep_stale(max_age);
    }
}

fn read_record<T: Copy>(data: &[u8]) -> Option<&T> {
    if data.len() < size_of::<T>() {
        warn!("short ring buffer record for {}", std::any::type_name::<T>());
        return None;
    }
    Some(unsafe { &*(data.as_ptr() as *const T) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracexec_ebpf_common::EventType as Ty;

    fn header(eid: u64, id: u32, ty: Ty) -> EventHeader {
        EventHeader::new(100, eid, id, ty)
    }

    fn exit_bytes(pid: i32, is_root_tracee: bool) -> ExitRecord {
        ExitRecord {
            header: EventHeader::new(pid, 0, 0, Ty::Exit),
            exit_code: 0,
            exit_signal: 0,
            is_root_tracee: is_root_tracee as u8,
            _pad: [0; 3],
        }
    }

    fn as_bytes<T: Copy>(rec: &T) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts((rec as *const T) as *const u8, size_of::<T>())
        }
    }

    #[test]
    fn root_tracee_exit_sets_shutdown_flag() {
        let mut demux = Demux::new();
        assert!(!demux.root_exited);

        demux.dispatch(as_bytes(&exit_bytes(42, false)));
        assert!(!demux.root_exited);

        demux.dispatch(as_bytes(&exit_bytes(7, true)));
        assert!(demux.root_exited);

        let ev = demux.take_ready().unwrap();
        match ev {
            Event::Exit(e) => {
                assert_eq!(e.pid, 42);
                assert!(!e.is_root_tracee);
            }
            other => panic!("expected first queued exit, got {other:?}"),
        }
        let ev2 = demux.take_ready().unwrap();
        match ev2 {
            Event::Exit(e) => {
                assert_eq!(e.pid, 7);
                assert!(e.is_root_tracee);
            }
            other => panic!("expected root-tracee exit, got {other:?}"),
        }
    }

    #[test]
    fn short_record_is_dropped_not_panicked() {
        let mut demux = Demux::new();
        demux.dispatch(&[0u8; 2]);
        assert!(demux.take_ready().is_none());
    }

    #[test]
    fn forks_drain_ahead_of_exits_and_execs() {
        let mut demux = Demux::new();
        let fork = ForkRecord {
            header: header(1, 0, Ty::Fork),
            parent_tgid: 10,
        };
        demux.dispatch(as_bytes(&fork));
        demux.dispatch(as_bytes(&exit_bytes(5, false)));

        match demux.take_ready().unwrap() {
            Event::Fork(f) => assert_eq!(f.parent_tgid, 10),
            other => panic!("expected fork first, got {other:?}"),
        }
        match demux.take_ready().unwrap() {
            Event::Exit(e) => assert_eq!(e.pid, 5),
            other => panic!("expected exit second, got {other:?}"),
        }
    }
}
