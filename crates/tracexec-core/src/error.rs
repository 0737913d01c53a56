//! Error types for tracexec-core.

use thiserror::Error;

/// Errors surfaced by [`crate::session::TraceSession`].
///
/// Advisory decode failures on individual records never become an `Err`
/// here — only failures to load, attach, or operate the probe itself do
/// (see the module docs on [`crate::event::ExecEvent::flags`] for where
/// per-record failures actually surface).
#[derive(Debug, Error)]
pub enum TracerError {
    /// The eBPF program failed to load into the kernel.
    #[error("failed to load eBPF program: {0}")]
    Load(#[from] aya::EbpfError),

    /// A program loaded but could not be attached to its tracepoint.
    #[error("failed to attach program {0}")]
    ProgramAttach(String),

    /// BTF could not be loaded from `/sys/kernel/btf/vmlinux` at all —
    /// distinct from a single unresolved field, which is tolerated.
    #[error("BTF unavailable: {0}")]
    Btf(String),

    /// A map declared in `tracexec-ebpf` was not found at load time — a
    /// sign of a skew between `tracexec-core` and the embedded probe.
    #[error("map not found: {0}")]
    MapNotFound(&'static str),

    /// The ring buffer map could not be opened for polling.
    #[error("ring buffer error: {0}")]
    RingBuf(String),

    /// A [`crate::config::TracerConfig`] value was rejected before load.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The session was used after [`crate::session::TraceSession::close`].
    #[error("trace session already closed")]
    AlreadyClosed,
}

pub type Result<T> = core::result::Result<T, TracerError>;
