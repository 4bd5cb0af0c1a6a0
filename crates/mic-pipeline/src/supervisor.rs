//! Stream health supervision.
//!
//! The supervisor watches read sizes and per-chunk levels and decides when the stream has lost
//! byte sync (resync) or when the device itself is misbehaving (reconnect). It owns no I/O; the
//! driver performs the recovery and reports back how each attempt went.
//!
//! ```text
//!            overload / flatline                  attempts exhausted, torn or idle reads
//! Healthy ──────────────────────► Resyncing ─────────────────────────────► Reconnecting
//!    ▲                               │                                          │
//!    └────── positive sync score ────┘◄──────── good probe ─────────────────────┘
//! ```

use std::fmt;

use crate::config::OverloadConfig;
use crate::gain::ChunkStats;

/// Tumbling window of per-chunk volume measurements.
#[derive(Clone, Debug)]
pub struct VolumeWindow {
    capacity: usize,
    threshold_percent: f64,
    len: usize,
    over: usize,
}

impl VolumeWindow {
    pub fn new(capacity: usize, threshold_percent: f64) -> Self {
        Self {
            capacity: capacity.max(1),
            threshold_percent,
            len: 0,
            over: 0,
        }
    }

    /// Record one chunk's volume. Values strictly above the threshold count as hot.
    pub fn record(&mut self, volume_percent: f64) {
        if self.is_full() {
            return;
        }
        self.len += 1;
        if volume_percent > self.threshold_percent {
            self.over += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    pub fn over_count(&self) -> usize {
        self.over
    }

    pub fn over_ratio(&self) -> f64 {
        if self.len == 0 {
            0.0
        } else {
            self.over as f64 / self.len as f64
        }
    }

    pub fn reset(&mut self) {
        self.len = 0;
        self.over = 0;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Healthy,
    /// `attempt` counts failed alignment attempts so far.
    Resyncing { attempt: u32 },
    /// `attempt` counts failed connection attempts so far.
    Reconnecting { attempt: u32 },
}

/// Why the supervisor left the healthy state.
#[derive(Clone, Debug, PartialEq)]
pub enum RecoveryCause {
    Startup,
    Overload { ratio: f64 },
    Flatline { chunks: u32 },
    TornRead { got: usize, expected: usize },
    Idle { reads: u32 },
    SyncExhausted { attempts: u32 },
    ReadFailed { message: String },
}

impl fmt::Display for RecoveryCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryCause::Startup => write!(f, "startup"),
            RecoveryCause::Overload { ratio } => {
                write!(f, "overload ({:.0}% of chunks too loud)", ratio * 100.0)
            }
            RecoveryCause::Flatline { chunks } => {
                write!(f, "{chunks} saturated chunks without zero crossings")
            }
            RecoveryCause::TornRead { got, expected } => {
                write!(f, "torn read ({got} of {expected} bytes)")
            }
            RecoveryCause::Idle { reads } => write!(f, "no data for {reads} reads"),
            RecoveryCause::SyncExhausted { attempts } => {
                write!(f, "alignment failed {attempts} times")
            }
            RecoveryCause::ReadFailed { message } => write!(f, "read failed: {message}"),
        }
    }
}

/// What the driver should do after an observation.
#[derive(Clone, Debug, PartialEq)]
pub enum Verdict {
    Continue,
    Resync(RecoveryCause),
    Reconnect(RecoveryCause),
}

/// Classification of a single chunk read.
#[derive(Clone, Debug, PartialEq)]
pub enum ReadOutcome {
    /// A whole chunk arrived.
    Chunk,
    /// Nothing arrived before the timeout.
    Empty,
    /// The read was abnormal and the supervisor has left `Healthy`.
    Escalate(Verdict),
}

/// Result of a reconnect attempt as seen by the supervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectStep {
    Recovered,
    Retry,
    Exhausted,
}

/// Running totals, for status lines and the run summary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SupervisorCounters {
    pub chunks: u64,
    pub hot_chunks: u64,
    pub windows_evaluated: u64,
    pub overloads: u64,
    pub flatlines: u64,
    pub torn_reads: u64,
    pub idle_escalations: u64,
    pub resyncs: u64,
    pub reconnects: u64,
}

/// Drives the `Healthy` / `Resyncing` / `Reconnecting` state machine.
#[derive(Debug)]
pub struct OverloadSupervisor {
    config: OverloadConfig,
    state: StreamState,
    window: VolumeWindow,
    flatline_run: u32,
    idle_run: u32,
    last_cause: RecoveryCause,
    counters: SupervisorCounters,
}

impl OverloadSupervisor {
    /// Starts in `Reconnecting`; the first connection goes through the same path as a reconnect.
    pub fn new(config: OverloadConfig) -> Self {
        let window = VolumeWindow::new(config.window_chunks, config.volume_threshold_percent);
        Self {
            config,
            state: StreamState::Reconnecting { attempt: 0 },
            window,
            flatline_run: 0,
            idle_run: 0,
            last_cause: RecoveryCause::Startup,
            counters: SupervisorCounters::default(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_healthy(&self) -> bool {
        self.state == StreamState::Healthy
    }

    pub fn window(&self) -> &VolumeWindow {
        &self.window
    }

    pub fn counters(&self) -> SupervisorCounters {
        self.counters
    }

    pub fn config(&self) -> &OverloadConfig {
        &self.config
    }

    /// The reason for the most recent departure from `Healthy`.
    pub fn last_cause(&self) -> &RecoveryCause {
        &self.last_cause
    }

    /// Classify a read by its byte count.
    pub fn observe_read(&mut self, got: usize, expected: usize) -> ReadOutcome {
        if got == expected && got > 0 {
            self.idle_run = 0;
            return ReadOutcome::Chunk;
        }
        if got == 0 {
            self.idle_run += 1;
            if self.idle_run < self.config.max_idle_reads {
                return ReadOutcome::Empty;
            }
            self.counters.idle_escalations += 1;
            let cause = RecoveryCause::Idle {
                reads: self.idle_run,
            };
            self.begin_reconnect(cause.clone());
            return ReadOutcome::Escalate(Verdict::Reconnect(cause));
        }

        self.counters.torn_reads += 1;
        let cause = RecoveryCause::TornRead { got, expected };
        self.begin_reconnect(cause.clone());
        ReadOutcome::Escalate(Verdict::Reconnect(cause))
    }

    /// Feed the statistics of a raw, aligned chunk (before filter and gain).
    pub fn observe_chunk(&mut self, stats: &ChunkStats) -> Verdict {
        self.counters.chunks += 1;
        if stats.volume_percent > self.config.volume_threshold_percent {
            self.counters.hot_chunks += 1;
        }

        if stats.is_flatlined() {
            self.flatline_run += 1;
        } else {
            self.flatline_run = 0;
        }
        if self.config.max_flatline_chunks > 0 && self.flatline_run >= self.config.max_flatline_chunks
        {
            self.counters.flatlines += 1;
            let cause = RecoveryCause::Flatline {
                chunks: self.flatline_run,
            };
            self.begin_resync(cause.clone());
            return Verdict::Resync(cause);
        }

        self.window.record(stats.volume_percent);
        if !self.window.is_full() {
            return Verdict::Continue;
        }

        self.counters.windows_evaluated += 1;
        let ratio = self.window.over_ratio();
        self.window.reset();
        if ratio > self.config.threshold_ratio {
            self.counters.overloads += 1;
            let cause = RecoveryCause::Overload { ratio };
            self.begin_resync(cause.clone());
            return Verdict::Resync(cause);
        }
        Verdict::Continue
    }

    /// Leave `Healthy` for `Resyncing`.
    pub fn begin_resync(&mut self, cause: RecoveryCause) {
        tracing::warn!(%cause, "stream lost sync; realigning");
        self.counters.resyncs += 1;
        self.leave_healthy(StreamState::Resyncing { attempt: 0 }, cause);
    }

    /// Enter `Reconnecting` from any state.
    pub fn begin_reconnect(&mut self, cause: RecoveryCause) {
        tracing::warn!(%cause, "reconnecting to the device");
        self.counters.reconnects += 1;
        self.leave_healthy(StreamState::Reconnecting { attempt: 0 }, cause);
    }

    /// Report the outcome of one alignment attempt made while `Resyncing`.
    ///
    /// Success returns to `Healthy`; the last permitted failure escalates to `Reconnecting`.
    pub fn record_sync_attempt(&mut self, success: bool) -> Verdict {
        let StreamState::Resyncing { attempt } = self.state else {
            return Verdict::Continue;
        };
        if success {
            tracing::info!(attempts = attempt + 1, "sync recovered");
            self.enter_healthy();
            return Verdict::Continue;
        }

        let attempt = attempt + 1;
        if attempt >= self.config.max_sync_attempts {
            let cause = RecoveryCause::SyncExhausted { attempts: attempt };
            self.begin_reconnect(cause.clone());
            return Verdict::Reconnect(cause);
        }
        tracing::debug!(attempt, "alignment attempt failed");
        self.state = StreamState::Resyncing { attempt };
        Verdict::Resync(self.last_cause.clone())
    }

    /// Report the outcome of one connect + probe + align attempt made while `Reconnecting`.
    pub fn record_reconnect_attempt(&mut self, success: bool) -> ReconnectStep {
        let StreamState::Reconnecting { attempt } = self.state else {
            return ReconnectStep::Recovered;
        };
        if success {
            tracing::info!(attempts = attempt + 1, "stream established");
            self.enter_healthy();
            return ReconnectStep::Recovered;
        }

        let attempt = attempt + 1;
        self.state = StreamState::Reconnecting { attempt };
        if attempt >= self.config.max_reconnect_retries {
            ReconnectStep::Exhausted
        } else {
            ReconnectStep::Retry
        }
    }

    fn leave_healthy(&mut self, next: StreamState, cause: RecoveryCause) {
        self.state = next;
        self.last_cause = cause;
        self.window.reset();
        self.flatline_run = 0;
        self.idle_run = 0;
    }

    fn enter_healthy(&mut self) {
        self.state = StreamState::Healthy;
        self.window.reset();
        self.flatline_run = 0;
        self.idle_run = 0;
    }
}

/// Short post-connect check that the stream is not already overloaded.
#[derive(Clone, Debug)]
pub struct QualityProbe {
    window: VolumeWindow,
    threshold_ratio: f64,
    flatlined: usize,
}

impl QualityProbe {
    pub fn new(config: &OverloadConfig, chunks: usize) -> Self {
        Self {
            window: VolumeWindow::new(chunks, config.volume_threshold_percent),
            threshold_ratio: config.threshold_ratio,
            flatlined: 0,
        }
    }

    pub fn observe(&mut self, stats: &ChunkStats) {
        self.window.record(stats.volume_percent);
        if stats.is_flatlined() {
            self.flatlined += 1;
        }
    }

    pub fn is_complete(&self) -> bool {
        self.window.is_full()
    }

    pub fn chunks(&self) -> usize {
        self.window.len()
    }

    pub fn over_ratio(&self) -> f64 {
        self.window.over_ratio()
    }

    /// A probe that saw no audio, or mostly hot or pinned chunks, is a failure.
    pub fn passed(&self) -> bool {
        if self.window.is_empty() {
            return false;
        }
        let flat_ratio = self.flatlined as f64 / self.window.len() as f64;
        self.window.over_ratio() <= self.threshold_ratio && flat_ratio <= self.threshold_ratio
    }
}
