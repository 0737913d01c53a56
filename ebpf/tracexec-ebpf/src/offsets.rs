//! Dynamic kernel-struct field access.
//!
//! `task_struct`/`files_struct`/`dentry`/... layouts shift between kernel
//! builds, so the probe never bakes in an offset. Userspace resolves every
//! offset it needs from BTF at load time (see `tracexec-core::probe`) and
//! writes them into [`crate::maps::OFFSETS`]; the probe reads through that
//! table with plain `bpf_probe_read_kernel` at a computed address.

use aya_ebpf::helpers::bpf_probe_read_kernel;

use crate::maps::OFFSETS;
use tracexec_ebpf_common::FieldOffsets;

#[inline(always)]
pub fn offsets() -> FieldOffsets {
    match OFFSETS.get(0) {
        Some(o) => *o,
        None => FieldOffsets::default(),
    }
}

/// Read a `T` at `base + offset`. A zero offset means "unresolved" and is
/// treated as a read failure rather than dereferencing `base` itself.
#[inline(always)]
pub unsafe fn read_field<T: Copy>(base: u64, offset: u32) -> Option<T> {
    if base == 0 || offset == 0 {
        return None;
    }
    let ptr = (base + offset as u64) as *const T;
    bpf_probe_read_kernel(ptr).ok()
}

/// Read a pointer-sized field and return it as a `u64` address.
#[inline(always)]
pub unsafe fn read_ptr(base: u64, offset: u32) -> Option<u64> {
    read_field::<u64>(base, offset)
}

/// Read a `T` at a plain address, e.g. `array_base + index * size`. Unlike
/// [`read_field`], index 0 is a legitimate address here, so there is no
/// "offset 0 means unresolved" guard — only a null-base check.
#[inline(always)]
pub unsafe fn read_at<T: Copy>(addr: u64) -> Option<T> {
    if addr == 0 {
        return None;
    }
    bpf_probe_read_kernel(addr as *const T).ok()
}
