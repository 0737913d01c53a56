//! Kernel probe load/attach glue (components B, D, E).
//!
//! Resolves the kernel struct field offsets the probe needs from BTF (the
//! "Runtime Offset Discovery" approach — never hardcode a layout that
//! shifts between kernel builds), writes them into the `OFFSETS` map
//! alongside `CONFIG`, then loads and attaches every tracepoint program.

use aya::maps::{Array, RingBuf};
use aya::programs::TracePoint;
use aya::{Btf, Ebpf};
use aya_obj::btf::BtfType;
use tracing::{debug, warn};

use tracexec_ebpf_common::{FieldOffsets, ProbeConfig};

use crate::config::TracerConfig;
use crate::error::{Result, TracerError};

/// `(struct name, field name)` pairs resolved from BTF into [`FieldOffsets`].
/// Order matches the struct's field declaration order.
const FIELDS: &[(&str, &str)] = &[
    ("task_struct", "tgid"),
    ("task_struct", "pid"),
    ("task_struct", "real_parent"),
    ("task_struct", "real_cred"),
    ("task_struct", "files"),
    ("task_struct", "fs"),
    ("task_struct", "thread_pid"),
    ("task_struct", "exit_code"),
    ("cred", "uid"),
    ("cred", "gid"),
    ("pid", "level"),
    ("pid", "numbers"),
    ("upid", "nr"),
    ("upid", "ns"),
    ("pid_namespace", "ns"),
    ("ns_common", "inum"),
    ("files_struct", "fdt"),
    ("fdtable", "max_fds"),
    ("fdtable", "open_fds"),
    ("fdtable", "close_on_exec"),
    ("fdtable", "fd"),
    ("fs_struct", "pwd"),
    ("fs_struct", "root"),
    ("path", "dentry"),
    ("path", "mnt"),
    ("dentry", "d_parent"),
    ("dentry", "d_name"),
    ("qstr", "len"),
    ("qstr", "name"),
    ("vfsmount", "mnt_root"),
    ("vfsmount", "mnt_sb"),
    ("mount", "mnt"),
    ("mount", "mnt_parent"),
    ("mount", "mnt_mountpoint"),
    ("mount", "mnt_id"),
    ("super_block", "s_type"),
    ("file_system_type", "name"),
    ("file", "f_path"),
    ("file", "f_flags"),
    ("file", "f_pos"),
    ("file", "f_inode"),
    ("inode", "i_ino"),
];

/// Best-effort BTF field-offset lookup. Returns 0 (the probe's
/// "unresolved" sentinel) rather than erroring when a field can't be
/// found, since older/newer kernels rename or drop fields this probe
/// treats as optional context (pid-namespace bookkeeping in particular).
fn resolve_offsets(btf: &Btf) -> FieldOffsets {
    let mut values = [0u32; FIELDS.len()];
    for (i, (struct_name, field_name)) in FIELDS.iter().enumerate() {
        match field_byte_offset(btf, struct_name, field_name) {
            Some(off) => values[i] = off,
            None => debug!("BTF: {struct_name}.{field_name} not found, leaving unresolved"),
        }
    }

    FieldOffsets {
        task_tgid: values[0],
        task_pid: values[1],
        task_real_parent: values[2],
        task_real_cred: values[3],
        task_files: values[4],
        task_fs: values[5],
        task_thread_pid: values[6],
        task_exit_code: values[7],
        cred_uid: values[8],
        cred_gid: values[9],
        pid_level: values[10],
        pid_numbers: values[11],
        upid_nr: values[12],
        upid_ns: values[13],
        pid_namespace_ns: values[14],
        ns_common_inum: values[15],
        files_fdt: values[16],
        fdtable_max_fds: values[17],
        fdtable_open_fds: values[18],
        fdtable_close_on_exec: values[19],
        fdtable_fd: values[20],
        fs_pwd: values[21],
        fs_root: values[22],
        path_dentry: values[23],
        path_mnt: values[24],
        dentry_parent: values[25],
        dentry_name: values[26],
        qstr_len: values[27],
        qstr_name: values[28],
        vfsmount_mnt_root: values[29],
        vfsmount_mnt_sb: values[30],
        mount_mnt: values[31],
        mount_mnt_parent: values[32],
        mount_mnt_mountpoint: values[33],
        mount_mnt_id: values[34],
        super_block_s_type: values[35],
        file_system_type_name: values[36],
        file_f_path: values[37],
        file_f_flags: values[38],
        file_f_pos: values[39],
        file_f_inode: values[40],
        inode_i_ino: values[41],
    }
}

/// Look up `struct_name::field_name`'s byte offset by walking BTF member
/// descriptors directly, rather than trusting a fixed `vmlinux.h` layout.
/// Returns `None` on any lookup failure (unknown type, renamed field) —
/// the caller treats that identically to "kernel doesn't have this field".
fn field_byte_offset(btf: &Btf, struct_name: &str, field_name: &str) -> Option<u32> {
    let type_id = btf.resolve_type_by_name(struct_name).ok()?;
    let ty = btf.type_by_id(type_id).ok()?;
    let members = match ty {
        BtfType::Struct(t) => &t.members,
        _ => return None,
    };
    for member in members {
        let name = btf.string_at(member.name_offset).ok()?;
        if name == field_name {
            return Some(member.bit_offset() / 8);
        }
    }
    None
}

/// A loaded, attached probe. Dropping this detaches every program.
pub struct Probe {
    ebpf: Ebpf,
}

impl Probe {
    pub fn load(config: &TracerConfig) -> Result<Self> {
        bump_memlock_rlimit();

        let mut ebpf = Ebpf::load(aya::include_bytes_aligned!(concat!(
            env!("OUT_DIR"),
            "/tracexec-ebpf"
        )))?;

        let btf = Btf::from_sys_fs().map_err(|e| TracerError::Btf(e.to_string()))?;
        let offsets = resolve_offsets(&btf);

        let max_num_cpus = aya::util::nr_cpus().unwrap_or(1) as u32;
        let probe_config = config.to_probe_config(max_num_cpus);

        {
            let mut cfg_map: Array<_, ProbeConfig> = ebpf
                .take_map("CONFIG")
                .ok_or(TracerError::MapNotFound("CONFIG"))?
                .try_into()
                .map_err(|_| TracerError::MapNotFound("CONFIG"))?;
            cfg_map
                .set(0, probe_config, 0)
                .map_err(|e| TracerError::RingBuf(e.to_string()))?;
        }
        {
            let mut off_map: Array<_, FieldOffsets> = ebpf
                .take_map("OFFSETS")
                .ok_or(TracerError::MapNotFound("OFFSETS"))?
                .try_into()
                .map_err(|_| TracerError::MapNotFound("OFFSETS"))?;
            off_map
                .set(0, offsets, 0)
                .map_err(|e| TracerError::RingBuf(e.to_string()))?;
        }

        attach_tracepoint(&mut ebpf, "sys_enter_execve", "syscalls", "sys_enter_execve")?;
        attach_tracepoint(&mut ebpf, "sys_exit_execve", "syscalls", "sys_exit_execve")?;
        if let Err(e) = attach_tracepoint(&mut ebpf, "sys_enter_execveat", "syscalls", "sys_enter_execveat") {
            debug!("execveat entry tracepoint unavailable, continuing without it: {e}");
        }
        if let Err(e) = attach_tracepoint(&mut ebpf, "sys_exit_execveat", "syscalls", "sys_exit_execveat") {
            debug!("execveat exit tracepoint unavailable, continuing without it: {e}");
        }
        attach_compat_execve_tracepoints(&mut ebpf);

        if config.follow_fork {
            attach_tracepoint(&mut ebpf, "sched_process_fork", "sched", "sched_process_fork")?;
        }
        attach_tracepoint(&mut ebpf, "sched_process_exit", "sched", "sched_process_exit")?;

        Ok(Self { ebpf })
    }

    pub fn open_ring_buf(&mut self) -> Result<RingBuf<aya::maps::MapData>> {
        let map = self
            .ebpf
            .take_map("EVENTS")
            .ok_or(TracerError::MapNotFound("EVENTS"))?;
        RingBuf::try_from(map).map_err(|e| TracerError::RingBuf(e.to_string()))
    }
}

/// 32-bit compat `execve`/`execveat` tracepoint names to probe for, in the
/// (category, name) form `attach_tracepoint` expects. This is a genuine
/// probe, not an assumption: `TracePoint::attach` itself resolves the name
/// against tracefs, so trying each candidate and keeping whichever succeeds
/// *is* the check. Most kernels route 32-bit syscalls through the very same
/// `sys_enter_execve`/`sys_enter_execveat` tracepoints already attached
/// above — `trace_sys_enter()` is keyed by the syscall's generic name, not
/// its calling ABI — so finding none of these is the common, correct
/// outcome, not a failure to cover compat processes.
const COMPAT_EXECVE_ENTRY_CANDIDATES: &[&str] =
    &["sys_enter_compat_execve", "sys_enter_execve32", "sys_enter_ia32_execve"];
const COMPAT_EXECVEAT_ENTRY_CANDIDATES: &[&str] = &[
    "sys_enter_compat_execveat",
    "sys_enter_execveat32",
    "sys_enter_ia32_execveat",
];
const COMPAT_EXECVE_EXIT_CANDIDATES: &[&str] =
    &["sys_exit_compat_execve", "sys_exit_execve32", "sys_exit_ia32_execve"];
const COMPAT_EXECVEAT_EXIT_CANDIDATES: &[&str] = &[
    "sys_exit_compat_execveat",
    "sys_exit_execveat32",
    "sys_exit_ia32_execveat",
];

/// Best-effort attach of the four compat-variant programs, trying each
/// candidate tracefs name in turn and stopping at the first that attaches.
/// Never fatal: a host with no split compat tracepoints is the overwhelming
/// common case, already covered transparently by the native tracepoints.
fn attach_compat_execve_tracepoints(ebpf: &mut Ebpf) {
    attach_first_match(ebpf, "sys_enter_compat_execve", COMPAT_EXECVE_ENTRY_CANDIDATES);
    attach_first_match(ebpf, "sys_enter_compat_execveat", COMPAT_EXECVEAT_ENTRY_CANDIDATES);
    attach_first_match(ebpf, "sys_exit_compat_execve", COMPAT_EXECVE_EXIT_CANDIDATES);
    attach_first_match(ebpf, "sys_exit_compat_execveat", COMPAT_EXECVEAT_EXIT_CANDIDATES);
}

fn attach_first_match(ebpf: &mut Ebpf, prog_name: &str, candidates: &[&str]) {
    let program: &mut TracePoint = match ebpf.program_mut(prog_name) {
        Some(p) => match p.try_into() {
            Ok(p) => p,
            Err(_) => return,
        },
        None => return,
    };
    if let Err(e) = program.load() {
        debug!("{prog_name}: failed to load: {e}");
        return;
    }

    for name in candidates {
        match program.attach("syscalls", name) {
            Ok(_) => {
                debug!("{prog_name}: attached compat tracepoint syscalls/{name}");
                return;
            }
            Err(e) => debug!("{prog_name}: syscalls/{name} unavailable: {e}"),
        }
    }
    debug!(
        "{prog_name}: no compat tracepoint found under any known name; assuming the native \
         tracepoint already covers compat execs on this kernel"
    );
}

fn attach_tracepoint(ebpf: &mut Ebpf, prog_name: &str, category: &str, name: &str) -> Result<()> {
    let program: &mut TracePoint = ebpf
        .program_mut(prog_name)
        .ok_or_else(|| TracerError::ProgramAttach(prog_name.to_string()))?
        .try_into()
        .map_err(|_| TracerError::ProgramAttach(prog_name.to_string()))?;
    program.load()?;
    program
        .attach(category, name)
        .map_err(|_| TracerError::ProgramAttach(format!("{category}/{name}")))?;
    Ok(())
}

fn bump_memlock_rlimit() {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        debug!("failed to remove memlock rlimit, ret={ret}");
    }
}
