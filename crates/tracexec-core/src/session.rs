//! The cooperative-pull consumer interface (spec §5): `open`, `next`, `close`.
//! No callbacks, no background thread — the caller drives polling, matching
//! the teacher's own ring-buffer drain loop (see `oisp-ebpf-capture`).

use std::time::{Duration, Instant};

use aya::maps::{MapData, RingBuf};

use crate::config::TracerConfig;
use crate::demux::Demux;
use crate::error::{Result, TracerError};
use crate::event::Event;
use crate::probe::Probe;

/// How long a single `next()` call sleeps between ring-buffer drains while
/// waiting out its timeout. Matches the teacher's capture-loop cadence.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A running trace. Owns the loaded probe and the ring buffer it reads from.
pub struct TraceSession {
    // Held for its `Drop` impl, which detaches every program — never read
    // again once the ring buffer has been taken out of it.
    #[allow(dead_code)]
    probe: Probe,
    ring_buf: RingBuf<MapData>,
    demux: Demux,
    watchdog_interval: Duration,
    last_sweep: Instant,
    closed: bool,
}

impl TraceSession {
    /// Load and attach the probe, open its ring buffer, and start tracing.
    pub fn open(config: TracerConfig) -> Result<Self> {
        config.validate()?;
        let mut probe = Probe::load(&config)?;
        let ring_buf = probe.open_ring_buf()?;
        Ok(Self {
            probe,
            ring_buf,
            demux: Demux::new(),
            watchdog_interval: config.watchdog_interval,
            last_sweep: Instant::now(),
            closed: false,
        })
    }

    /// Block up to `timeout` for the next event. Returns [`Event::Idle`] if
    /// nothing became ready in that window — not an error, callers are
    /// expected to loop on this. Once the root tracee's `EXIT` has been
    /// observed, this stops waiting out `timeout` on empty polls and instead
    /// force-completes and drains whatever is left, ending in
    /// [`Event::Shutdown`] (spec property 7).
    pub fn next(&mut self, timeout: Duration) -> Result<Event> {
        if self.closed {
            return Err(TracerError::AlreadyClosed);
        }

        let deadline = Instant::now() + timeout;
        loop {
            self.drain_ring_buf();

            if let Some(ev) = self.demux.take_ready() {
                return Ok(ev);
            }

            if self.demux.root_exited {
                self.demux.sweep_stale(Duration::from_secs(0));
                match self.demux.take_ready() {
                    Some(ev) => return Ok(ev),
                    None => {
                        self.closed = true;
                        return Ok(Event::Shutdown);
                    }
                }
            }

            if self.last_sweep.elapsed() >= self.watchdog_interval {
                self.demux.sweep_stale(self.watchdog_interval);
                self.last_sweep = Instant::now();
                if let Some(ev) = self.demux.take_ready() {
                    return Ok(ev);
                }
            }

            if Instant::now() >= deadline {
                return Ok(Event::Idle);
            }
            std::thread::sleep(POLL_INTERVAL.min(timeout));
        }
    }

    /// Drain every event currently queued, then consume the session. Any
    /// `eid`s still open are force-completed so a caller that drains to
    /// exhaustion never silently loses an in-flight exec (spec property 7,
    /// shutdown drain).
    pub fn close(mut self) -> Result<Vec<Event>> {
        self.drain_ring_buf();
        self.demux.sweep_stale(Duration::from_secs(0));

        let mut drained = Vec::new();
        while let Some(ev) = self.demux.take_ready() {
            drained.push(ev);
        }
        drained.push(Event::Shutdown);
        self.closed = true;
        Ok(drained)
    }

    fn drain_ring_buf(&mut self) {
        while let Some(item) = self.ring_buf.next() {
            self.demux.dispatch(item.as_ref());
        }
    }
}
