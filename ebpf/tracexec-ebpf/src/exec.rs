//! `sys_enter_execve{,at}` / `sys_exit_execve{,at}` tracepoint handlers
//! (spec §4.1 "entry path procedure" / "exit path procedure").

use aya_ebpf::helpers::{
    bpf_get_current_comm, bpf_get_current_pid_tgid, bpf_get_current_task_btf,
    bpf_get_current_uid_gid, bpf_probe_read_user_str_bytes,
};
use aya_ebpf::macros::tracepoint;
use aya_ebpf::programs::TracePointContext;

use tracexec_ebpf_common::{
    flags, EventHeader, EventType, SysExitRecord, AT_FDCWD, COMM_LEN, PATH_MAX,
};

use crate::eid::{next_eid, record_drop};
use crate::fdwalk::{snapshot_open_fds, OpenFd};
use crate::filter::should_trace;
use crate::maps::{EVENTS, EXEC_STATE};
use crate::offsets::{offsets, read_field, read_ptr};
use crate::pathwalk::{resolve_fstype, resolve_mnt_id, resolve_path};
use crate::state::ExecState;
use tracexec_ebpf_common::FdRecord;

#[repr(C)]
struct EnterExecveArgs {
    _common_type: u16,
    _common_flags: u8,
    _common_preempt_count: u8,
    _common_pid: i32,
    filename_ptr: u64,
    argv_ptr: u64,
    envp_ptr: u64,
}

#[repr(C)]
struct EnterExecveatArgs {
    _common_type: u16,
    _common_flags: u8,
    _common_preempt_count: u8,
    _common_pid: i32,
    fd: i32,
    filename_ptr: u64,
    argv_ptr: u64,
    envp_ptr: u64,
    exec_flags: i32,
}

#[repr(C)]
struct ExitExecArgs {
    _common_type: u16,
    _common_flags: u8,
    _common_preempt_count: u8,
    _common_pid: i32,
    __syscall_nr: i32,
    ret: i64,
}

#[tracepoint]
pub fn sys_enter_execve(ctx: TracePointContext) -> u32 {
    match try_enter(&ctx, false, false) {
        Ok(()) => 0,
        Err(_) => 0,
    }
}

#[tracepoint]
pub fn sys_enter_execveat(ctx: TracePointContext) -> u32 {
    match try_enter(&ctx, true, false) {
        Ok(()) => 0,
        Err(_) => 0,
    }
}

#[tracepoint]
pub fn sys_exit_execve(ctx: TracePointContext) -> u32 {
    match try_exit(&ctx) {
        Ok(()) => 0,
        Err(_) => 0,
    }
}

#[tracepoint]
pub fn sys_exit_execveat(ctx: TracePointContext) -> u32 {
    match try_exit(&ctx) {
        Ok(()) => 0,
        Err(_) => 0,
    }
}

/// 32-bit compat variants (spec.md §4.1 "including the 32-bit compatibility
/// variants"). The entry args carry the same `unsigned long`-sized fields as
/// their native counterparts — only the pointee argv/envp pointer *arrays*
/// are 4-byte-strided instead of 8 — so only `try_enter`'s `is_compat` bit
/// differs. Attached by `tracexec-core::probe` only when the host actually
/// exposes a distinct compat tracepoint (see its tracefs-probing comment);
/// most kernels route 32-bit `execve`/`execveat` through the native
/// tracepoints above, in which case these two never fire.
#[tracepoint]
pub fn sys_enter_compat_execve(ctx: TracePointContext) -> u32 {
    match try_enter(&ctx, false, true) {
        Ok(()) => 0,
        Err(_) => 0,
    }
}

#[tracepoint]
pub fn sys_enter_compat_execveat(ctx: TracePointContext) -> u32 {
    match try_enter(&ctx, true, true) {
        Ok(()) => 0,
        Err(_) => 0,
    }
}

#[tracepoint]
pub fn sys_exit_compat_execve(ctx: TracePointContext) -> u32 {
    match try_exit(&ctx) {
        Ok(()) => 0,
        Err(_) => 0,
    }
}

#[tracepoint]
pub fn sys_exit_compat_execveat(ctx: TracePointContext) -> u32 {
    match try_exit(&ctx) {
        Ok(()) => 0,
        Err(_) => 0,
    }
}

fn try_enter(ctx: &TracePointContext, is_execveat: bool, is_compat: bool) -> Result<(), i64> {
    let pid_tgid = bpf_get_current_pid_tgid();
    let tid = pid_tgid as u32;
    let tgid = (pid_tgid >> 32) as u32;

    if !should_trace(tgid) {
        return Ok(());
    }

    let (filename_ptr, argv_ptr, envp_ptr, execveat_fd, execveat_flags) = if is_execveat {
        let args: EnterExecveatArgs = unsafe { ctx.read_at(0).map_err(|_| 1i64)? };
        (args.filename_ptr, args.argv_ptr, args.envp_ptr, args.fd, args.exec_flags)
    } else {
        let args: EnterExecveArgs = unsafe { ctx.read_at(0).map_err(|_| 1i64)? };
        (args.filename_ptr, args.argv_ptr, args.envp_ptr, AT_FDCWD, 0)
    };

    let uid_gid = bpf_get_current_uid_gid();
    let task = unsafe { bpf_get_current_task_btf() } as u64;
    let off = offsets();
    let ppid = unsafe { read_ptr(task, off.task_real_parent) }
        .and_then(|parent| unsafe { read_field::<u32>(parent, off.task_tgid) })
        .unwrap_or(0);

    let mut state = ExecState::zeroed();
    state.eid = next_eid();
    state.old_tgid = tgid;
    state.ppid = ppid;
    state.uid = uid_gid as u32;
    state.gid = (uid_gid >> 32) as u32;
    state.execveat_fd = execveat_fd;
    state.execveat_flags = execveat_flags;
    state.is_execveat = is_execveat as u8;
    if let Ok(comm) = bpf_get_current_comm() {
        state.comm = comm;
    } else {
        state.flags |= flags::COMM_READ_FAILURE;
    }

    if filename_ptr != 0 {
        match unsafe { bpf_probe_read_user_str_bytes(filename_ptr as *const u8, &mut state.filename) } {
            Ok(s) => {
                state.filename_len = s.len() as u32;
                if state.filename_len as usize >= PATH_MAX - 1 {
                    state.flags |= flags::POSSIBLE_TRUNCATION;
                }
            }
            Err(_) => state.flags |= flags::FILENAME_READ_ERR,
        }
    }

    let eid = state.eid;
    let (argc, arg_flags) = crate::strings::stream_strings(argv_ptr, is_compat, eid, tgid as i32, 0);
    state.argc_emitted = argc;
    state.flags |= arg_flags;
    let (envc, env_flags) =
        crate::strings::stream_strings(envp_ptr, is_compat, eid, tgid as i32, argc);
    state.envc_emitted = envc;
    state.flags |= env_flags;

    let mut fds: [OpenFd; 64] = unsafe { core::mem::zeroed() };
    let (fd_count, fd_flags) = snapshot_open_fds(task, &mut fds, &mut state);
    state.flags |= fd_flags;

    let (fs_root_dentry, fs_root_mnt) = unsafe { read_ptr(task, off.task_fs) }
        .map(|fs| {
            let root_addr = fs.wrapping_add(off.fs_root as u64);
            let dentry = unsafe { read_field::<u64>(root_addr, off.path_dentry) }.unwrap_or(0);
            let mnt = unsafe { read_field::<u64>(root_addr, off.path_mnt) }.unwrap_or(0);
            (dentry, mnt)
        })
        .unwrap_or((0, 0));

    let mut path_count = 0u32;
    for fd in fds.iter().take(fd_count) {
        let path_id = state.alloc_path_id();
        let file_path_addr = fd.file.wrapping_add(off.file_f_path as u64);
        let dentry = unsafe { read_field::<u64>(file_path_addr, off.path_dentry) }.unwrap_or(0);
        let mnt = unsafe { read_field::<u64>(file_path_addr, off.path_mnt) }.unwrap_or(0);

        let open_flags = unsafe { read_field::<u32>(fd.file, off.file_f_flags) }.unwrap_or(0)
            | if fd.close_on_exec { tracexec_ebpf_common::O_CLOEXEC } else { 0 };
        let file_pos = unsafe { read_field::<i64>(fd.file, off.file_f_pos) }.unwrap_or(0);
        let inode_ptr = unsafe { read_field::<u64>(fd.file, off.file_f_inode) }.unwrap_or(0);
        let inode = unsafe { read_field::<u64>(inode_ptr, off.inode_i_ino) }.unwrap_or(0);

        let mut fstype_name = [0u8; tracexec_ebpf_common::FSTYPE_NAME_MAX];
        let (fstype_len, fstype_flags) = resolve_fstype(mnt, &mut fstype_name);
        let mnt_id = resolve_mnt_id(mnt).unwrap_or(-1);

        if let Some(mut entry) = EVENTS.reserve::<FdRecord>(0) {
            let rec = entry.as_mut_ptr();
            unsafe {
                (*rec).header = EventHeader::new(tgid as i32, eid, fd.fd_num as u32, EventType::Fd);
                (*rec).header.flags = fstype_flags;
                (*rec).fd_num = fd.fd_num;
                (*rec).open_flags = open_flags;
                (*rec).mnt_id = mnt_id;
                (*rec).inode = inode;
                (*rec).file_pos = file_pos;
                (*rec).fstype_name = fstype_name;
                (*rec).fstype_name_len = fstype_len;
                (*rec).path_id = path_id;
            }
            entry.submit(0);
        } else {
            state.flags |= flags::OUTPUT_FAILURE;
        }

        let walk_flags = resolve_path(
            dentry,
            mnt,
            fs_root_dentry,
            fs_root_mnt,
            eid,
            tgid as i32,
            path_id,
        );
        state.flags |= walk_flags;
        path_count += 1;
    }

    let cwd_path_id = state.alloc_path_id();
    if let Some(fs) = unsafe { read_ptr(task, off.task_fs) } {
        let pwd_addr = fs.wrapping_add(off.fs_pwd as u64);
        let dentry = unsafe { read_field::<u64>(pwd_addr, off.path_dentry) }.unwrap_or(0);
        let mnt = unsafe { read_field::<u64>(pwd_addr, off.path_mnt) }.unwrap_or(0);
        state.flags |= resolve_path(
            dentry,
            mnt,
            fs_root_dentry,
            fs_root_mnt,
            eid,
            tgid as i32,
            cwd_path_id,
        );
        path_count += 1;
    }

    state.next_path_id = path_count;
    EXEC_STATE.insert(&tid, &state, 0).map_err(|_| {
        record_drop();
        1i64
    })?;

    Ok(())
}

fn try_exit(ctx: &TracePointContext) -> Result<(), i64> {
    let pid_tgid = bpf_get_current_pid_tgid();
    let tid = pid_tgid as u32;

    let state = match unsafe { EXEC_STATE.get(&tid) } {
        Some(s) => *s,
        None => return Ok(()),
    };

    if !should_trace(state.old_tgid) {
        let _ = EXEC_STATE.remove(&tid);
        return Ok(());
    }

    let args: ExitExecArgs = unsafe { ctx.read_at(0).map_err(|_| 1i64)? };

    if let Some(mut entry) = EVENTS.reserve::<SysExitRecord>(0) {
        let rec = entry.as_mut_ptr();
        unsafe {
            (*rec).header = EventHeader::new(state.old_tgid as i32, state.eid, 0, EventType::SysExit);
            (*rec).header.flags = state.flags;
            (*rec).ppid = state.ppid;
            (*rec).uid = state.uid;
            (*rec).gid = state.gid;
            (*rec).comm = state.comm;
            (*rec).filename = state.filename;
            (*rec).filename_len = state.filename_len;
            (*rec).is_execveat = state.is_execveat;
            (*rec)._pad = [0; 3];
            (*rec).execveat_fd = state.execveat_fd;
            (*rec).execveat_flags = state.execveat_flags;
            (*rec).argc = state.argc_emitted;
            (*rec).envc = state.envc_emitted;
            (*rec).fd_count = state.fd_emitted;
            (*rec).path_count = state.next_path_id;
            (*rec).retval = args.ret;
        }
        entry.submit(0);
    }

    let _ = EXEC_STATE.remove(&tid);
    Ok(())
}
