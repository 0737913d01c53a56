//! Dentry/mount path resolution (spec §4.2, `PATH_SEGMENT`/`PATH`).
//!
//! Walks `d_parent` leaf-to-root, crossing `vfsmount->mnt_root` boundaries
//! into the parent mount via `container_of(vfsmount, mount, mnt)`, exactly
//! like `prepend_path` in the kernel's own `fs/d_path.c` minus the
//! seqlock retry (not expressible under the verifier, and the trace is
//! advisory rather than POSIX-exact — a torn read just costs one flag bit).
//! Bounded by `PATH_DEPTH_MAX` via `bpf_loop` for the same verifier-budget
//! reason as [`crate::strings`].

use aya_ebpf::helpers::bpf_probe_read_kernel_str_bytes;
use aya_ebpf::helpers::gen::bpf_loop;
use core::ffi::c_void;

use tracexec_ebpf_common::{
    flags, EventHeader, EventType, PathRecord, PathSegmentRecord, FSTYPE_NAME_MAX, PATH_DEPTH_MAX,
    PATH_SEGMENT_MAX, UNKNOWN_SENTINEL,
};

use crate::maps::EVENTS;
use crate::offsets::{offsets, read_field, read_ptr};

#[repr(C)]
struct WalkCtx {
    dentry: u64,
    mnt: u64,
    /// The task's `fs->root`, the other valid stop condition alongside a
    /// mount's own root (spec.md §4.2: "whichever is hit first").
    fs_root_dentry: u64,
    fs_root_mnt: u64,
    eid: u64,
    pid: i32,
    path_id: u32,
    index: u32,
    flags: u32,
    done: u8,
}

/// Resolve one `(dentry, vfsmount)` pair into a `PATH_SEGMENT*` + `PATH`
/// group tagged with `path_id`. Returns the aggregate advisory flags.
/// `fs_root` is the task's `fs->root` at the time of `execve`; the walk
/// stops there even if the mount root hasn't been reached yet, which is
/// what keeps a chroot'd process's paths from over-walking past its root.
#[inline(always)]
pub fn resolve_path(
    dentry: u64,
    mnt: u64,
    fs_root_dentry: u64,
    fs_root_mnt: u64,
    eid: u64,
    pid: i32,
    path_id: u32,
) -> u32 {
    if dentry == 0 || mnt == 0 {
        return flags::PATH_READ_ERR;
    }

    let mut ctx = WalkCtx {
        dentry,
        mnt,
        fs_root_dentry,
        fs_root_mnt,
        eid,
        pid,
        path_id,
        index: 0,
        flags: 0,
        done: 0,
    };

    unsafe {
        bpf_loop(
            PATH_DEPTH_MAX,
            walk_callback as *mut c_void,
            &mut ctx as *mut WalkCtx as *mut c_void,
            0,
        );
    }

    if ctx.done == 0 {
        ctx.flags |= flags::LOOP_FAIL;
    }

    if let Some(mut entry) = EVENTS.reserve::<PathRecord>(0) {
        let rec = entry.as_mut_ptr();
        unsafe {
            (*rec).header = EventHeader::new(pid, eid, path_id, EventType::Path);
            (*rec).header.flags = ctx.flags;
            (*rec).segment_count = ctx.index;
        }
        entry.submit(0);
    } else {
        ctx.flags |= flags::OUTPUT_FAILURE;
    }

    ctx.flags
}

extern "C" fn walk_callback(_index: u32, ctx_ptr: *mut c_void) -> i64 {
    let ctx = unsafe { &mut *(ctx_ptr as *mut WalkCtx) };
    let off = offsets();

    if ctx.fs_root_dentry != 0
        && ctx.dentry == ctx.fs_root_dentry
        && ctx.mnt == ctx.fs_root_mnt
    {
        ctx.done = 1;
        return 1;
    }

    let mnt_root = match unsafe { read_ptr(ctx.mnt, off.vfsmount_mnt_root) } {
        Some(p) => p,
        None => {
            ctx.flags |= flags::MNTID_READ_ERR;
            ctx.done = 1;
            return 1;
        }
    };

    if ctx.dentry == mnt_root {
        let mount_addr = ctx.mnt.wrapping_sub(off.mount_mnt as u64);
        let parent_mount = unsafe { read_ptr(mount_addr, off.mount_mnt_parent) }.unwrap_or(0);
        if parent_mount == 0 || parent_mount == mount_addr {
            ctx.done = 1;
            return 1;
        }
        let mountpoint = unsafe { read_ptr(mount_addr, off.mount_mnt_mountpoint) }.unwrap_or(0);
        ctx.dentry = mountpoint;
        ctx.mnt = parent_mount.wrapping_add(off.mount_mnt as u64);
        return 0;
    }

    let parent = match unsafe { read_ptr(ctx.dentry, off.dentry_parent) } {
        Some(p) => p,
        None => {
            ctx.flags |= flags::PATH_READ_ERR;
            ctx.done = 1;
            return 1;
        }
    };

    if parent == ctx.dentry {
        ctx.done = 1;
        return 1;
    }

    emit_segment(ctx, off.qstr_len, off.qstr_name, off.dentry_name);
    ctx.dentry = parent;
    0
}

fn emit_segment(ctx: &mut WalkCtx, qstr_len_off: u32, qstr_name_off: u32, dentry_name_off: u32) {
    let qstr_addr = ctx.dentry.wrapping_add(dentry_name_off as u64);
    let name_ptr = unsafe { read_field::<u64>(qstr_addr, qstr_name_off) }.unwrap_or(0);
    let _len_hint: u32 = unsafe { read_field(qstr_addr, qstr_len_off) }.unwrap_or(0);

    let mut buf = [0u8; PATH_SEGMENT_MAX];
    let written = if name_ptr == 0 {
        buf[..UNKNOWN_SENTINEL.len()].copy_from_slice(UNKNOWN_SENTINEL);
        UNKNOWN_SENTINEL.len() as u16
    } else {
        match unsafe { bpf_probe_read_kernel_str_bytes(name_ptr as *const u8, &mut buf) } {
            Ok(s) => s.len() as u16,
            Err(_) => {
                ctx.flags |= flags::PATH_READ_ERR;
                buf[..UNKNOWN_SENTINEL.len()].copy_from_slice(UNKNOWN_SENTINEL);
                UNKNOWN_SENTINEL.len() as u16
            }
        }
    };

    if let Some(mut entry) = EVENTS.reserve::<PathSegmentRecord>(0) {
        let rec = entry.as_mut_ptr();
        unsafe {
            (*rec).header = EventHeader::new(ctx.pid, ctx.eid, ctx.path_id, EventType::PathSegment);
            (*rec).header.flags = 0;
            (*rec).index = ctx.index;
            (*rec).len = written;
            (*rec).data = buf;
        }
        entry.submit(0);
        ctx.index += 1;
    } else {
        ctx.flags |= flags::OUTPUT_FAILURE;
    }
}

/// Resolve the `fstype_name` for an `FD` record from its `vfsmount`.
#[inline(always)]
pub fn resolve_fstype(mnt: u64, out: &mut [u8; FSTYPE_NAME_MAX]) -> (u32, u32) {
    let off = offsets();
    let sb = match unsafe { read_ptr(mnt, off.vfsmount_mnt_sb) } {
        Some(p) if p != 0 => p,
        _ => return (0, flags::FILENAME_READ_ERR),
    };
    let s_type = match unsafe { read_ptr(sb, off.super_block_s_type) } {
        Some(p) if p != 0 => p,
        _ => return (0, flags::FILENAME_READ_ERR),
    };
    let name_ptr = unsafe { read_ptr(s_type, off.file_system_type_name) }.unwrap_or(0);
    if name_ptr == 0 {
        return (0, flags::FILENAME_READ_ERR);
    }
    match unsafe { bpf_probe_read_kernel_str_bytes(name_ptr as *const u8, out) } {
        Ok(s) => (s.len() as u32, 0),
        Err(_) => (0, flags::FILENAME_READ_ERR),
    }
}

/// `mnt_id` for an `FD` record, read off the enclosing `struct mount`.
#[inline(always)]
pub fn resolve_mnt_id(mnt: u64) -> Option<i32> {
    let off = offsets();
    let mount_addr = mnt.wrapping_sub(off.mount_mnt as u64);
    unsafe { read_ptr(mount_addr, off.mount_mnt_id) }.map(|v| v as i32)
}
