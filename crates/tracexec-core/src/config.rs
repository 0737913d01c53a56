//! Programmatic configuration for [`crate::session::TraceSession`].
//!
//! Unlike the rest of this repo's teacher, there is no file or environment
//! parsing here — the spec this crate implements treats configuration as a
//! Rust value the caller constructs directly.

use std::time::Duration;

use crate::error::{Result, TracerError};

/// Default ring-buffer byte size: 256 MiB.
pub const DEFAULT_RING_BUFFER_SIZE: u32 = 256 * 1024 * 1024;

/// Default watchdog sweep interval.
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(5);

/// Configuration consumed by [`crate::session::TraceSession::open`].
#[derive(Debug, Clone)]
pub struct TracerConfig {
    /// pid of the root tracee to follow, in the caller's own pid namespace.
    /// `0` traces every `execve`/`execveat` system-wide.
    pub tracee_pid: i32,

    /// Whether descendants of `tracee_pid` (via fork) are also traced.
    /// Ignored when `tracee_pid` is 0.
    pub follow_fork: bool,

    /// Upper bound on file descriptors scanned per exec, mirrors
    /// `RLIMIT_NOFILE`.
    pub nofile: u32,

    /// Byte size of the underlying `RingBuf` map. Must be a power of two
    /// and a multiple of the page size; see
    /// [`TracerConfig::validate`].
    pub ring_buffer_size: u32,

    /// How often [`crate::session::TraceSession::next`] sweeps the
    /// reassembly table for stale partial events (spec §9 open question
    /// (a)): any `eid` whose `SYSEXIT` record never arrived is force-
    /// completed and emitted with [`tracexec_ebpf_common::flags::BAIL_OUT`]
    /// once it has sat open longer than this interval.
    pub watchdog_interval: Duration,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            tracee_pid: 0,
            follow_fork: true,
            nofile: 1_048_576,
            ring_buffer_size: DEFAULT_RING_BUFFER_SIZE,
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
        }
    }
}

impl TracerConfig {
    /// Trace only `pid` (and, if `follow_fork`, its fork descendants).
    pub fn for_pid(pid: i32, follow_fork: bool) -> Self {
        Self {
            tracee_pid: pid,
            follow_fork,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.tracee_pid < 0 {
            return Err(TracerError::InvalidConfig(
                "tracee_pid must not be negative".into(),
            ));
        }
        if self.ring_buffer_size == 0 || !self.ring_buffer_size.is_power_of_two() {
            return Err(TracerError::InvalidConfig(
                "ring_buffer_size must be a nonzero power of two".into(),
            ));
        }
        if self.nofile == 0 {
            return Err(TracerError::InvalidConfig("nofile must be nonzero".into()));
        }
        Ok(())
    }

    pub(crate) fn to_probe_config(&self, max_num_cpus: u32) -> tracexec_ebpf_common::ProbeConfig {
        tracexec_ebpf_common::ProbeConfig {
            max_num_cpus,
            nofile: self.nofile,
            follow_fork: self.follow_fork as u8,
            _pad: [0; 3],
            tracee_pid: self.tracee_pid,
            tracee_pidns_inum: if self.tracee_pid != 0 {
                current_pidns_inum().unwrap_or(0)
            } else {
                0
            },
        }
    }
}

/// The inode number of this process's own pid namespace, i.e. the
/// namespace `tracee_pid` is interpreted in. The kernel exposes each
/// namespace's identity as the inode of its `nsfs` entry; comparing pid
/// *and* this inode (rather than pid alone) is what the kernel probe's
/// pid-namespace walk matches against a configured root tracee (spec §4.4).
fn current_pidns_inum() -> Option<u32> {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata("/proc/self/ns/pid")
        .ok()
        .map(|m| m.ino() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(TracerConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_power_of_two_ring_size() {
        let mut cfg = TracerConfig::default();
        cfg.ring_buffer_size = 3 * 1024 * 1024;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_negative_tracee_pid() {
        let cfg = TracerConfig::for_pid(-1, true);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn for_pid_disables_system_wide_trace() {
        let cfg = TracerConfig::for_pid(1234, false);
        assert_eq!(cfg.tracee_pid, 1234);
        assert!(!cfg.follow_fork);
    }
}
