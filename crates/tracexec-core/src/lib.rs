//! Userspace half of the exec-tracing probe: loads and attaches the
//! `tracexec-ebpf` kernel programs, reassembles the wire sub-events they
//! emit into whole exec/fork/exit observations, and hands them to the
//! caller through a cooperative-pull [`TraceSession`].
//!
//! This crate never installs a `tracing` subscriber itself — callers wire
//! up their own, same as the teacher's other binaries do.

pub mod config;
mod demux;
pub mod error;
pub mod event;
mod probe;
mod reassembly;
pub mod session;

pub use config::TracerConfig;
pub use error::{Result, TracerError};
pub use event::{Event, ExecEvent, ExitEvent, FdInfo, ForkEvent, PathInfo};
pub use session::TraceSession;
