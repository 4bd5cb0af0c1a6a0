//! Connection setup and recovery attempts.

use std::time::{Duration, Instant};

use super::PipelineDriver;
use crate::align;
use crate::error::{ConnectError, PipelineError, Result};
use crate::gain;
use crate::pcm;
use crate::sink::AudioSink;
use crate::source::{self, ByteStreamReader, Connector};
use crate::supervisor::{QualityProbe, ReconnectStep, RecoveryCause, Verdict};

/// Why a connect attempt did not produce a usable stream.
enum AttemptFailure {
    Connect(ConnectError),
    Unusable(String),
}

impl From<ConnectError> for AttemptFailure {
    fn from(err: ConnectError) -> Self {
        AttemptFailure::Connect(err)
    }
}

impl From<std::io::Error> for AttemptFailure {
    fn from(err: std::io::Error) -> Self {
        AttemptFailure::Unusable(format!("I/O error: {err}"))
    }
}

impl<C: Connector, S: AudioSink> PipelineDriver<C, S> {
    /// One connect + settle + align + probe attempt while `Reconnecting`.
    pub(super) fn reconnect_attempt(&mut self, failed_so_far: u32) -> Result<()> {
        let had_connection = self.reader.take().is_some();
        if had_connection || failed_so_far > 0 {
            self.sleep(self.config.overload.reconnect_backoff)?;
        }

        let attempt = failed_so_far + 1;
        tracing::info!(
            attempt,
            max = self.config.overload.max_reconnect_retries,
            source = %self.connector.describe(),
            "connecting"
        );

        let success = match self.open_stream() {
            Ok(reader) => {
                self.reader = Some(reader);
                self.last_connect_error = None;
                true
            }
            Err(Some(AttemptFailure::Connect(err))) => {
                tracing::warn!(attempt, error = %err, "connect failed");
                self.last_failure = err.to_string();
                self.last_connect_error = Some(err);
                false
            }
            Err(Some(AttemptFailure::Unusable(reason))) => {
                tracing::warn!(attempt, %reason, "stream unusable; closing");
                self.last_connect_error = None;
                self.last_failure = reason;
                false
            }
            Err(None) => return Err(PipelineError::Cancelled),
        };

        match self.supervisor.record_reconnect_attempt(success) {
            ReconnectStep::Recovered => {
                self.filter.reset_state();
                Ok(())
            }
            ReconnectStep::Retry => Ok(()),
            ReconnectStep::Exhausted => {
                let attempts = attempt;
                Err(match self.last_connect_error.take() {
                    Some(source) => PipelineError::ConnectFailed { attempts, source },
                    None => PipelineError::UnstableStream {
                        attempts,
                        reason: std::mem::take(&mut self.last_failure),
                    },
                })
            }
        }
    }

    /// One realignment attempt while `Resyncing`.
    pub(super) fn resync_attempt(&mut self) -> Result<()> {
        let Some(mut reader) = self.reader.take() else {
            self.supervisor.begin_reconnect(RecoveryCause::ReadFailed {
                message: "no open connection".to_string(),
            });
            return Ok(());
        };

        let aligned = match reader
            .reset_input_buffer()
            .and_then(|()| self.align_stream(&mut reader))
        {
            Ok(aligned) => aligned,
            Err(e) => {
                tracing::warn!(error = %e, "I/O error while realigning");
                self.supervisor.begin_reconnect(RecoveryCause::ReadFailed {
                    message: e.to_string(),
                });
                self.filter.reset_state();
                return Ok(());
            }
        };
        self.reader = Some(reader);
        self.check_cancel()?;

        if let Verdict::Reconnect(_) = self.supervisor.record_sync_attempt(aligned) {
            self.filter.reset_state();
        }
        Ok(())
    }

    /// Open, clear, settle, align and probe. `Err(None)` means cancelled.
    fn open_stream(&mut self) -> std::result::Result<C::Reader, Option<AttemptFailure>> {
        let mut reader = self.connector.connect().map_err(|e| Some(e.into()))?;
        reader
            .reset_input_buffer()
            .map_err(|e| Some(e.into()))?;
        self.sleep(self.config.overload.settle_delay)
            .map_err(|_| None)?;

        if !self.align_stream(&mut reader).map_err(|e| Some(e.into()))? {
            return Err(Some(AttemptFailure::Unusable(
                "could not find byte alignment".to_string(),
            )));
        }
        self.check_cancel().map_err(|_| None)?;

        let probe = self.probe(&mut reader).map_err(|e| Some(e.into()))?;
        if !probe.passed() {
            return Err(Some(AttemptFailure::Unusable(format!(
                "quality probe failed ({} chunks, {:.0}% over threshold)",
                probe.chunks(),
                probe.over_ratio() * 100.0
            ))));
        }
        tracing::debug!(chunks = probe.chunks(), "quality probe passed");
        Ok(reader)
    }

    /// Collect a second or so of audio, pick the byte parity and drop bytes to match it.
    ///
    /// Returns `false` when the stream does not look like audio at either parity.
    fn align_stream(&self, reader: &mut C::Reader) -> std::io::Result<bool> {
        let overload = &self.config.overload;
        let want = self.config.format.bytes_for(overload.sync_seconds);
        let max_wait = Duration::from_secs_f64((overload.sync_seconds * 2.0).max(0.0));
        let raw = source::collect_bytes(reader, want, max_wait)?;

        let Some(alignment) = align::find_alignment(&raw) else {
            tracing::warn!(collected = raw.len(), "not enough data to align");
            return Ok(false);
        };
        if !alignment.is_confident() {
            tracing::warn!(
                offset = alignment.offset,
                score = alignment.score,
                "alignment score too low"
            );
            return Ok(false);
        }

        let skip = alignment.discard_after(raw.len());
        if skip > 0 {
            let dropped = source::discard(reader, skip, self.config.serial.read_timeout)?;
            if dropped < skip {
                return Ok(false);
            }
        }
        tracing::info!(
            offset = alignment.offset,
            score = alignment.score,
            discarded = skip,
            "byte alignment found"
        );
        Ok(true)
    }

    /// Read chunks for the probe horizon and judge them with the volume-window rule.
    fn probe(&self, reader: &mut C::Reader) -> std::io::Result<QualityProbe> {
        let format = self.config.format;
        let horizon = self.config.overload.probe_duration;
        let chunk_secs = format.chunk_samples as f64 / format.sample_rate.max(1) as f64;
        let chunks = ((horizon.as_secs_f64() / chunk_secs).ceil() as usize).max(1);
        let mut probe = QualityProbe::new(&self.config.overload, chunks);

        let expected = format.chunk_bytes();
        let mut buf = vec![0u8; expected];
        let deadline = Instant::now() + horizon * 2 + self.config.serial.read_timeout;
        while !probe.is_complete() && Instant::now() < deadline {
            if self.check_cancel().is_err() {
                break;
            }
            let got = reader.read(&mut buf, self.config.serial.read_timeout)?;
            if got == 0 {
                continue;
            }
            if got != expected {
                tracing::warn!(got, expected, "torn read during probe");
                return Ok(QualityProbe::new(&self.config.overload, chunks));
            }
            probe.observe(&gain::statistics(&pcm::decode_le(&buf)));
        }
        Ok(probe)
    }
}
