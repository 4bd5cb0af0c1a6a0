//! The read → supervise → filter → gain → sink loop.
//!
//! [`PipelineDriver`] owns every stage and runs on the calling thread. Each iteration does one
//! of three things depending on the supervisor state: read and emit a chunk (`Healthy`), make
//! one alignment attempt (`Resyncing`), or make one connect attempt (`Reconnecting`). The cancel
//! flag is checked between iterations and inside every wait.

mod establish;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::PipelineConfig;
use crate::error::{ConnectError, PipelineError, Result};
use crate::filter::ContinuousFilter;
use crate::gain::{self, GainStage};
use crate::pcm;
use crate::sink::AudioSink;
use crate::source::{ByteStreamReader, Connector};
use crate::status::{StatusTicker, StreamStatus};
use crate::supervisor::{
    OverloadSupervisor, ReadOutcome, RecoveryCause, StreamState, SupervisorCounters, Verdict,
};

/// Granularity of cancel checks while sleeping.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// What a finished run did.
#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub chunks: u64,
    pub samples: u64,
    pub bytes: u64,
    pub sink_errors: u64,
    pub cancelled: bool,
    pub elapsed: Duration,
    pub supervisor: SupervisorCounters,
}

/// Drives a byte source through the processing chain into a sink.
pub struct PipelineDriver<C: Connector, S: AudioSink> {
    config: PipelineConfig,
    connector: C,
    sink: S,
    cancel: Arc<AtomicBool>,
    sample_limit: Option<u64>,
    filter: ContinuousFilter,
    gain: GainStage,
    supervisor: OverloadSupervisor,
    status: StreamStatus,
    reader: Option<C::Reader>,
    emitted: u64,
    last_connect_error: Option<ConnectError>,
    last_failure: String,
}

impl<C: Connector, S: AudioSink> PipelineDriver<C, S> {
    pub fn new(config: PipelineConfig, connector: C, sink: S, cancel: Arc<AtomicBool>) -> Self {
        let filter = ContinuousFilter::new(config.filter, config.format.sample_rate);
        let gain = GainStage::new(config.gain);
        let supervisor = OverloadSupervisor::new(config.overload.clone());
        let status = StreamStatus::new(config.overload.volume_threshold_percent);
        Self {
            config,
            connector,
            sink,
            cancel,
            sample_limit: None,
            filter,
            gain,
            supervisor,
            status,
            reader: None,
            emitted: 0,
            last_connect_error: None,
            last_failure: String::new(),
        }
    }

    /// Stop normally once `samples` processed samples have reached the sink.
    pub fn with_sample_limit(mut self, samples: u64) -> Self {
        self.sample_limit = Some(samples);
        self
    }

    pub fn filter_mut(&mut self) -> &mut ContinuousFilter {
        &mut self.filter
    }

    pub fn gain_mut(&mut self) -> &mut GainStage {
        &mut self.gain
    }

    pub fn supervisor(&self) -> &OverloadSupervisor {
        &self.supervisor
    }

    /// Run until cancelled, the sample limit is reached, or recovery gives up.
    ///
    /// The connection is closed and the sink closed on every path. Cancellation is a normal
    /// exit and reported through [`RunSummary::cancelled`].
    pub fn run(mut self) -> Result<RunSummary> {
        tracing::info!(
            source = %self.connector.describe(),
            sample_rate = self.config.format.sample_rate,
            chunk_samples = self.config.format.chunk_samples,
            filter = ?self.filter.kind(),
            gain_db = self.gain.gain_db(),
            "pipeline starting"
        );

        let outcome = self.run_loop();
        self.reader = None;
        let closed = self.sink.close();

        let cancelled = match outcome {
            Ok(()) => false,
            Err(PipelineError::Cancelled) => true,
            Err(err) => {
                if let Err(close_err) = closed {
                    tracing::warn!(error = %format!("{close_err:#}"), "sink close failed");
                }
                tracing::error!(error = %err, "pipeline stopped");
                return Err(err);
            }
        };
        closed.map_err(PipelineError::Sink)?;

        let summary = self.summary(cancelled);
        tracing::info!(
            chunks = summary.chunks,
            samples = summary.samples,
            resyncs = summary.supervisor.resyncs,
            reconnects = summary.supervisor.reconnects,
            cancelled,
            "pipeline finished"
        );
        Ok(summary)
    }

    fn run_loop(&mut self) -> Result<()> {
        let expected = self.config.format.chunk_bytes();
        let mut buf = vec![0u8; expected];
        let mut ticker = self.config.status_interval.map(StatusTicker::new);

        loop {
            self.check_cancel()?;
            if self.limit_reached() {
                tracing::info!(samples = self.emitted, "sample limit reached");
                return Ok(());
            }

            match self.supervisor.state() {
                StreamState::Reconnecting { attempt } => self.reconnect_attempt(attempt)?,
                StreamState::Resyncing { .. } => self.resync_attempt()?,
                StreamState::Healthy => self.step(&mut buf)?,
            }

            if let Some(ticker) = ticker.as_mut() {
                if ticker.due() {
                    self.sync_status_counters();
                    tracing::info!("{}", self.status.status_line());
                }
            }
        }
    }

    /// Read one chunk and either emit it or hand control to recovery.
    fn step(&mut self, buf: &mut [u8]) -> Result<()> {
        let timeout = self.config.serial.read_timeout;
        let Some(reader) = self.reader.as_mut() else {
            self.supervisor.begin_reconnect(RecoveryCause::ReadFailed {
                message: "no open connection".to_string(),
            });
            return Ok(());
        };

        let got = match reader.read(buf, timeout) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "serial read failed");
                self.supervisor.begin_reconnect(RecoveryCause::ReadFailed {
                    message: e.to_string(),
                });
                self.on_left_healthy();
                return Ok(());
            }
        };

        match self.supervisor.observe_read(got, buf.len()) {
            ReadOutcome::Empty => Ok(()),
            ReadOutcome::Escalate(_) => {
                self.on_left_healthy();
                Ok(())
            }
            ReadOutcome::Chunk => {
                let raw = pcm::decode_le(&buf[..got]);
                let raw_stats = gain::statistics(&raw);
                match self.supervisor.observe_chunk(&raw_stats) {
                    Verdict::Continue => {
                        self.status.record_chunk(got, &raw_stats);
                        self.emit(&raw);
                    }
                    Verdict::Resync(_) | Verdict::Reconnect(_) => self.on_left_healthy(),
                }
                Ok(())
            }
        }
    }

    /// Filter, amplify and deliver one aligned chunk. Sink failures are logged and skipped.
    fn emit(&mut self, raw: &[i16]) {
        let filtered = self.filter.process(raw);
        let gained = self.gain.apply(&filtered);

        let take = match self.sample_limit {
            Some(limit) => (limit.saturating_sub(self.emitted) as usize).min(gained.len()),
            None => gained.len(),
        };
        let out = &gained[..take];

        if tracing::enabled!(tracing::Level::TRACE) {
            let stats = gain::statistics(out);
            tracing::trace!(
                rms_db = stats.rms_db,
                peak_db = stats.peak_db,
                zero_crossings = stats.zero_crossings,
                "chunk emitted"
            );
        }

        match self.sink.write(out) {
            Ok(()) => self.emitted += take as u64,
            Err(e) => {
                self.status.sink_errors += 1;
                tracing::warn!(error = %format!("{e:#}"), "sink write failed; skipping chunk");
                self.filter.reset_state();
            }
        }
    }

    /// Per-departure cleanup: filter history from before the fault must not bleed into new audio.
    fn on_left_healthy(&mut self) {
        self.filter.reset_state();
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early with `Cancelled` if the flag is raised.
    fn sleep(&self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        loop {
            self.check_cancel()?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            thread::sleep(remaining.min(CANCEL_POLL));
        }
    }

    fn limit_reached(&self) -> bool {
        self.sample_limit
            .map(|limit| self.emitted >= limit)
            .unwrap_or(false)
    }

    fn sync_status_counters(&mut self) {
        let counters = self.supervisor.counters();
        self.status.resyncs = counters.resyncs;
        self.status.reconnects = counters.reconnects;
    }

    fn summary(&mut self, cancelled: bool) -> RunSummary {
        self.sync_status_counters();
        RunSummary {
            chunks: self.status.chunks,
            samples: self.emitted,
            bytes: self.status.bytes,
            sink_errors: self.status.sink_errors,
            cancelled,
            elapsed: self.status.elapsed(),
            supervisor: self.supervisor.counters(),
        }
    }
}
