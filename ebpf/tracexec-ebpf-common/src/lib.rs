#![cfg_attr(not(feature = "user"), no_std)]

//! Wire ABI shared between the `tracexec-ebpf` probe and the userspace
//! reassembler.
//!
//! Every struct in this crate is `#[repr(C)]`, `Copy`, and free of pointers
//! so that it can be written directly into a [`aya_ebpf::maps::RingBuf`]
//! reservation on the kernel side and reinterpreted from the same bytes on
//! the userspace side. Layout, not behavior, lives here — see
//! `tracexec-core::reassembly` for what the records mean once joined.

/// Length of `current->comm` on Linux.
pub const COMM_LEN: usize = 16;

/// `include/uapi/linux/limits.h` `PATH_MAX`.
pub const PATH_MAX: usize = 4096;

/// One path component is capped at this many bytes before the segment is
/// truncated (the kernel rarely has longer single components; `NAME_MAX`
/// on most filesystems is 255).
pub const PATH_SEGMENT_MAX: usize = 256;

/// Bound on `vfsmount->mnt_sb->s_type->name`.
pub const FSTYPE_NAME_MAX: usize = 256;

/// `getconf ARG_MAX` on a typical x86_64 host.
pub const SC_ARG_MAX: usize = 2_097_152;

/// ceil(ARG_MAX / 9): each argv/envp pointer costs 8 bytes and each string
/// contains at least one NUL, so this bounds the verifier-admissible argv+envp
/// iteration count.
pub const ARGC_MAX: u32 = 233_017;

/// Per-string payload bound carried on the wire. Longer strings are
/// truncated with [`flags::POSSIBLE_TRUNCATION`] set on the `STRING` record.
/// Distinct from `SC_ARG_MAX`, which bounds the *total* argv+envp budget,
/// not one string.
pub const STRING_MAX: usize = 1024;

/// `BITS_PER_LONG` on the architectures this probe targets.
pub const BITS_PER_LONG: usize = 64;

/// Upper bound on `fdtable->max_fds` words scanned per exec
/// (2 MiB worth of fd bits / 8 bytes per word).
pub const FDSET_SIZE_MAX_IN_LONG: usize = (2 * 1024 * 1024) / 8;

/// Bound on dentry-chain + mount-tree hops walked per path.
pub const PATH_DEPTH_MAX: u32 = 65536;

/// `sizeof(struct upid)` on the 64-bit architectures this probe targets:
/// one `int nr` plus one `struct pid_namespace *ns`, padded to 8-byte
/// alignment. Used to index `struct pid`'s trailing `numbers[]` array,
/// which BTF can't size for us the way it sizes a named field.
pub const UPID_SIZE: u64 = 16;

/// `O_CLOEXEC` per `include/uapi/asm-generic/fcntl.h`.
pub const O_CLOEXEC: u32 = 0o2000000;

/// `AT_FDCWD`.
pub const AT_FDCWD: i32 = -100;

/// Advisory flag bits. Exact wire values — never reorder.
pub mod flags {
    pub const ERROR: u32 = 1;
    pub const TOO_MANY_ITEMS: u32 = 2;
    pub const COMM_READ_FAILURE: u32 = 4;
    pub const POSSIBLE_TRUNCATION: u32 = 8;
    pub const PTR_READ_FAILURE: u32 = 16;
    pub const NO_ROOM: u32 = 32;
    pub const STR_READ_FAILURE: u32 = 64;
    pub const FDS_PROBE_FAILURE: u32 = 128;
    pub const OUTPUT_FAILURE: u32 = 256;
    pub const FLAGS_READ_FAILURE: u32 = 512;
    pub const USERSPACE_DROP_MARKER: u32 = 1024;
    pub const BAIL_OUT: u32 = 2048;
    pub const LOOP_FAIL: u32 = 4096;
    pub const PATH_READ_ERR: u32 = 8192;
    pub const INO_READ_ERR: u32 = 16384;
    pub const MNTID_READ_ERR: u32 = 32768;
    pub const FILENAME_READ_ERR: u32 = 65536;
    pub const POS_READ_ERR: u32 = 131072;
}

/// Sentinel substituted for an unreadable kernel string (e.g. an empty
/// `d_name.name`, or a failed `bpf_probe_read_kernel_str`).
pub const UNKNOWN_SENTINEL: &[u8] = b"[tracexec: unknown]";

/// Discriminant carried in [`EventHeader::event_type`]. Exact wire values.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    SysEnter = 0,
    SysExit = 1,
    String = 2,
    Fd = 3,
    PathSegment = 4,
    Path = 5,
    Exit = 6,
    Fork = 7,
}

impl EventType {
    pub const fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => EventType::SysEnter,
            1 => EventType::SysExit,
            2 => EventType::String,
            3 => EventType::Fd,
            4 => EventType::PathSegment,
            5 => EventType::Path,
            6 => EventType::Exit,
            7 => EventType::Fork,
            _ => return None,
        })
    }
}

/// Common header prefixing every ring-buffer record.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct EventHeader {
    /// Kernel-view tgid the record belongs to.
    pub pid: i32,
    /// Advisory flag bits, see [`flags`].
    pub flags: u32,
    /// Correlation id joining sub-events into one logical exec event.
    pub eid: u64,
    /// Locally meaningful index: argv/envp position, fd-assignment order,
    /// path-segment index, or (for `FORK`) the unused value 0.
    pub id: u32,
    /// Wire discriminant, see [`EventType`].
    pub event_type: u32,
}

impl EventHeader {
    pub fn new(pid: i32, eid: u64, id: u32, event_type: EventType) -> Self {
        Self {
            pid,
            flags: 0,
            eid,
            id,
            event_type: event_type as u32,
        }
    }
}

/// `SYSEXIT` body: the bulk exec record. Arrival commits the `eid` — no
/// further sub-event for it will follow on the ring.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SysExitRecord {
    pub header: EventHeader,
    pub ppid: u32,
    pub uid: u32,
    pub gid: u32,
    pub comm: [u8; COMM_LEN],
    pub filename: [u8; PATH_MAX],
    pub filename_len: u32,
    /// Set when the syscall was `execveat` rather than `execve`.
    pub is_execveat: u8,
    pub _pad: [u8; 3],
    pub execveat_fd: i32,
    pub execveat_flags: i32,
    pub argc: u32,
    pub envc: u32,
    pub fd_count: u32,
    /// Number of distinct `path_id` groups that will terminate with a
    /// `PATH` record (one per `FD`, plus one for the cwd).
    pub path_count: u32,
    pub retval: i64,
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for SysExitRecord {}

/// `STRING` body: one argv or envp entry.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct StringRecord {
    pub header: EventHeader,
    pub len: u32,
    pub data: [u8; STRING_MAX],
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for StringRecord {}

/// `FD` body: one open file descriptor observed at `execve` entry.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FdRecord {
    pub header: EventHeader,
    pub fd_num: i32,
    /// `file->f_flags`, OR'd with [`O_CLOEXEC`] when the fd's
    /// `close_on_exec` bit was set.
    pub open_flags: u32,
    pub mnt_id: i32,
    pub inode: u64,
    pub file_pos: i64,
    pub fstype_name: [u8; FSTYPE_NAME_MAX],
    pub fstype_name_len: u32,
    /// Correlates this record with the `PATH_SEGMENT`/`PATH` group that
    /// resolves its absolute path.
    pub path_id: u32,
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for FdRecord {}

/// `PATH_SEGMENT` body: one path component, leaf-most first.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct PathSegmentRecord {
    pub header: EventHeader,
    /// Monotonically increasing within `(eid, path_id)`; 0 is the leaf.
    pub index: u32,
    pub len: u16,
    pub _pad: [u8; 2],
    pub data: [u8; PATH_SEGMENT_MAX],
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for PathSegmentRecord {}

/// `PATH` body: terminator + count-reconciler for a `PATH_SEGMENT` group.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct PathRecord {
    pub header: EventHeader,
    pub segment_count: u32,
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for PathRecord {}

/// `FORK` body. `header.pid` carries the new tgid.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ForkRecord {
    pub header: EventHeader,
    pub parent_tgid: u32,
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for ForkRecord {}

/// `EXIT` body.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ExitRecord {
    pub header: EventHeader,
    pub exit_code: i32,
    pub exit_signal: i32,
    pub is_root_tracee: u8,
    pub _pad: [u8; 3],
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for ExitRecord {}

/// Configuration consumed by the kernel probe at load time, handed to
/// `TraceSession::open` on the userspace side and mirrored into BPF maps by
/// the loader.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ProbeConfig {
    pub max_num_cpus: u32,
    /// Upper bound for fd scans (`RLIMIT_NOFILE` ceiling).
    pub nofile: u32,
    pub follow_fork: u8,
    pub _pad: [u8; 3],
    /// pid of the root tracee, in its own pid namespace.
    pub tracee_pid: i32,
    /// inode number of that pid namespace.
    pub tracee_pidns_inum: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_num_cpus: 1,
            nofile: 2_147_483_584,
            follow_fork: 0,
            _pad: [0; 3],
            tracee_pid: 0,
            tracee_pidns_inum: 0,
        }
    }
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for ProbeConfig {}

/// Byte offsets of the kernel struct fields the probe needs, resolved by the
/// userspace loader from BTF at load time and mirrored into the `OFFSETS`
/// map. Kernel struct layouts are not ABI-stable across builds, so the probe
/// never hardcodes an offset — it always indexes through this table. A field
/// left at 0 means "not resolved"; readers treat that as a decode failure
/// rather than dereferencing a bogus offset.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct FieldOffsets {
    pub task_tgid: u32,
    pub task_pid: u32,
    pub task_real_parent: u32,
    pub task_real_cred: u32,
    pub task_files: u32,
    pub task_fs: u32,
    pub task_thread_pid: u32,
    pub task_exit_code: u32,
    pub cred_uid: u32,
    pub cred_gid: u32,
    /// Offset of `struct pid`'s `level` field — the index of its deepest
    /// (innermost) entry in `numbers[]`.
    pub pid_level: u32,
    /// Offset of `struct pid`'s trailing `numbers[]` array. Indexed by
    /// `level * UPID_SIZE`, not read as a fixed-offset scalar field.
    pub pid_numbers: u32,
    pub upid_nr: u32,
    pub upid_ns: u32,
    /// Offset of `struct pid_namespace`'s embedded `ns_common ns`.
    pub pid_namespace_ns: u32,
    pub ns_common_inum: u32,
    pub files_fdt: u32,
    pub fdtable_max_fds: u32,
    pub fdtable_open_fds: u32,
    pub fdtable_close_on_exec: u32,
    pub fdtable_fd: u32,
    pub fs_pwd: u32,
    pub fs_root: u32,
    pub path_dentry: u32,
    pub path_mnt: u32,
    pub dentry_parent: u32,
    pub dentry_name: u32,
    pub qstr_len: u32,
    pub qstr_name: u32,
    pub vfsmount_mnt_root: u32,
    pub vfsmount_mnt_sb: u32,
    pub mount_mnt: u32,
    pub mount_mnt_parent: u32,
    pub mount_mnt_mountpoint: u32,
    pub mount_mnt_id: u32,
    pub super_block_s_type: u32,
    pub file_system_type_name: u32,
    pub file_f_path: u32,
    pub file_f_flags: u32,
    pub file_f_pos: u32,
    pub file_f_inode: u32,
    pub inode_i_ino: u32,
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for FieldOffsets {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_round_trips_exact_wire_values() {
        assert_eq!(EventType::SysEnter as u32, 0);
        assert_eq!(EventType::SysExit as u32, 1);
        assert_eq!(EventType::String as u32, 2);
        assert_eq!(EventType::Fd as u32, 3);
        assert_eq!(EventType::PathSegment as u32, 4);
        assert_eq!(EventType::Path as u32, 5);
        assert_eq!(EventType::Exit as u32, 6);
        assert_eq!(EventType::Fork as u32, 7);
        for v in 0..8u32 {
            assert_eq!(EventType::from_u32(v).unwrap() as u32, v);
        }
        assert!(EventType::from_u32(8).is_none());
    }

    #[test]
    fn flag_bits_match_spec() {
        assert_eq!(flags::ERROR, 1);
        assert_eq!(flags::TOO_MANY_ITEMS, 2);
        assert_eq!(flags::COMM_READ_FAILURE, 4);
        assert_eq!(flags::POSSIBLE_TRUNCATION, 8);
        assert_eq!(flags::PTR_READ_FAILURE, 16);
        assert_eq!(flags::NO_ROOM, 32);
        assert_eq!(flags::STR_READ_FAILURE, 64);
        assert_eq!(flags::FDS_PROBE_FAILURE, 128);
        assert_eq!(flags::OUTPUT_FAILURE, 256);
        assert_eq!(flags::FLAGS_READ_FAILURE, 512);
        assert_eq!(flags::USERSPACE_DROP_MARKER, 1024);
        assert_eq!(flags::BAIL_OUT, 2048);
        assert_eq!(flags::LOOP_FAIL, 4096);
        assert_eq!(flags::PATH_READ_ERR, 8192);
        assert_eq!(flags::INO_READ_ERR, 16384);
        assert_eq!(flags::MNTID_READ_ERR, 32768);
        assert_eq!(flags::FILENAME_READ_ERR, 65536);
        assert_eq!(flags::POS_READ_ERR, 131072);
    }

    #[test]
    fn header_constructor_zeroes_flags() {
        let h = EventHeader::new(42, 7, 3, EventType::Fd);
        assert_eq!(h.pid, 42);
        assert_eq!(h.eid, 7);
        assert_eq!(h.id, 3);
        assert_eq!(h.flags, 0);
        assert_eq!(h.event_type, EventType::Fd as u32);
    }
}
