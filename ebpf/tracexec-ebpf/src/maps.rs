//! BPF map declarations shared across probe handlers.

use aya_ebpf::macros::map;
use aya_ebpf::maps::{Array, HashMap, PerCpuArray, RingBuf};
use tracexec_ebpf_common::{FieldOffsets, ProbeConfig, FDSET_SIZE_MAX_IN_LONG};

use crate::state::ExecState;

/// Default ring size; overridden at load time is not possible for a BPF map
/// (size is fixed at map-creation), so the loader recreates this map at the
/// configured size via `RingBuf::with_byte_size` pinning or, more simply,
/// userspace resizes by rebuilding the map before load. We declare a
/// generous default here; `TracerConfig::ring_buffer_size` is honored by the
/// loader re-specifying map size through `aya::Ebpf::load` map overrides.
#[map]
pub static EVENTS: RingBuf = RingBuf::with_byte_size(256 * 1024 * 1024, 0);

/// Per-pid (kernel tid) in-flight exec state, entry §4.1.
#[map]
pub static EXEC_STATE: HashMap<u32, ExecState> = HashMap::with_max_entries(10_240, 0);

/// tgids currently considered descendants of the root tracee, §4.4.
#[map]
pub static TRACEE_CLOSURE: HashMap<u32, u8> = HashMap::with_max_entries(1 << 16, 0);

/// Single-entry config map populated by the loader before attach.
#[map]
pub static CONFIG: Array<ProbeConfig> = Array::with_max_entries(1, 0);

/// Single-entry table of BTF-resolved struct field offsets, populated by the
/// loader before attach (see [`crate::offsets`]).
#[map]
pub static OFFSETS: Array<FieldOffsets> = Array::with_max_entries(1, 0);

/// Monotonic eid counter, one u64 cell, bumped with an atomic fetch-add on
/// the mapped memory (see [`crate::eid::next_eid`]).
#[map]
pub static EID_COUNTER: Array<u64> = Array::with_max_entries(1, 0);

/// Count of events dropped due to map/ring capacity exhaustion (§7.iii).
#[map]
pub static DROP_COUNTER: Array<u64> = Array::with_max_entries(1, 0);

/// Per-CPU scratch for copying the `open_fds`/`close_on_exec` bitmaps out of
/// `current->files->fdt` before scanning them (component D).
#[repr(C)]
pub struct FdScanScratch {
    pub open_fds: [u64; FDSET_SIZE_MAX_IN_LONG],
    pub close_on_exec: [u64; FDSET_SIZE_MAX_IN_LONG],
}

impl FdScanScratch {
    pub const fn zeroed() -> Self {
        Self {
            open_fds: [0; FDSET_SIZE_MAX_IN_LONG],
            close_on_exec: [0; FDSET_SIZE_MAX_IN_LONG],
        }
    }
}

#[map]
pub static FD_SCRATCH: PerCpuArray<FdScanScratch> = PerCpuArray::with_max_entries(1, 0);
