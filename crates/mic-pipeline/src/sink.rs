//! Audio sinks: where processed chunks end up.
//!
//! [`CpalSink`] plays through an output device, resampling when the device cannot run at the
//! microphone rate. The WAV sink lives in [`crate::wav`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use cpal::traits::StreamTrait;
use crossbeam_channel::Receiver;

use crate::config::OutputConfig;
use crate::device;
use crate::pcm::FULL_SCALE;
use crate::playback::{self, PlaybackCounters};
use crate::queue::{SampleQueue, capacity_for};
use crate::resample::{self, ResampleConfig};

/// Consumer of processed mono `i16` chunks.
///
/// `write` may block for backpressure. `close` flushes and releases the output; dropping a sink
/// without closing it releases resources without flushing.
pub trait AudioSink {
    fn write(&mut self, samples: &[i16]) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

impl<S: AudioSink + ?Sized> AudioSink for Box<S> {
    fn write(&mut self, samples: &[i16]) -> Result<()> {
        (**self).write(samples)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Plays audio on a CPAL output device.
pub struct CpalSink {
    srcq: Arc<SampleQueue>,
    dstq: Arc<SampleQueue>,
    stream: cpal::Stream,
    errors: Receiver<String>,
    counters: Arc<PlaybackCounters>,
    stall_timeout: Duration,
    drain_timeout: Duration,
    scratch: Vec<f32>,
    closed: bool,
}

impl CpalSink {
    /// Open the configured output device and start its stream.
    pub fn open(source_rate: u32, config: &OutputConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = device::pick_device(&host, config.device.as_deref())?;
        let supported = device::pick_output_config(&device, source_rate)?;
        let mut stream_config: cpal::StreamConfig = supported.clone().into();
        if let Some(buffer_size) = device::pick_buffer_size(&supported) {
            stream_config.buffer_size = buffer_size;
        }
        let device_rate = stream_config.sample_rate;
        tracing::info!(
            device = %device::device_name(&device),
            rate_hz = device_rate,
            channels = stream_config.channels,
            format = ?supported.sample_format(),
            "output device"
        );

        let srcq = Arc::new(SampleQueue::new(capacity_for(
            source_rate,
            config.buffer_seconds,
        )));
        let dstq = if device_rate == source_rate {
            tracing::info!(rate_hz = device_rate, "resample skipped");
            srcq.clone()
        } else {
            tracing::info!(from_hz = source_rate, to_hz = device_rate, "resampling");
            resample::start_resampler(
                srcq.clone(),
                source_rate,
                device_rate,
                ResampleConfig {
                    buffer_seconds: config.buffer_seconds,
                    ..ResampleConfig::default()
                },
            )?
        };

        let (err_tx, err_rx) = crossbeam_channel::bounded(8);
        let counters = Arc::new(PlaybackCounters::default());
        let stream = playback::build_output_stream(
            &device,
            &stream_config,
            supported.sample_format(),
            &dstq,
            config.refill_max_samples,
            counters.clone(),
            err_tx,
        )?;
        stream.play().context("start output stream")?;

        Ok(Self {
            srcq,
            dstq,
            stream,
            errors: err_rx,
            counters,
            stall_timeout: config.stall_timeout,
            drain_timeout: Duration::from_secs_f32(config.buffer_seconds.max(0.0))
                + Duration::from_secs(1),
            scratch: Vec::new(),
            closed: false,
        })
    }

    pub fn counters(&self) -> &PlaybackCounters {
        &self.counters
    }
}

impl AudioSink for CpalSink {
    fn write(&mut self, samples: &[i16]) -> Result<()> {
        if self.closed {
            bail!("output sink already closed");
        }
        if let Ok(err) = self.errors.try_recv() {
            return Err(anyhow!("output stream failed: {err}"));
        }

        self.scratch.clear();
        self.scratch
            .extend(samples.iter().map(|&s| (s as f64 / FULL_SCALE) as f32));
        let pushed = self.srcq.push_blocking(&self.scratch, self.stall_timeout);
        if pushed < samples.len() {
            bail!(
                "output stalled; dropped {} of {} samples",
                samples.len() - pushed,
                samples.len()
            );
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.srcq.close();
        let drained = self.srcq.wait_until_drained(self.drain_timeout)
            && self.dstq.wait_until_drained(self.drain_timeout);
        if !drained {
            tracing::warn!(remaining = self.dstq.len(), "output did not drain before close");
        }
        self.dstq.close();
        self.stream.pause().context("stop output stream")?;
        tracing::info!(
            played_frames = self.counters.played(),
            underruns = self.counters.underruns(),
            "output closed"
        );
        Ok(())
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.srcq.close();
        self.dstq.close();
    }
}
