//! CPAL output stream fed from a [`SampleQueue`].
//!
//! The callback refills a small local buffer without blocking, copies each mono sample to every
//! device channel, and converts to the device sample format. Missing data is played as silence
//! and counted as an underrun. Stream errors are forwarded on a channel so the writer side can
//! notice them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;
use crossbeam_channel::Sender;

use crate::queue::{PopStrategy, SampleQueue};

/// Counters updated from the output callback.
#[derive(Debug, Default)]
pub struct PlaybackCounters {
    pub played_frames: AtomicU64,
    pub underrun_frames: AtomicU64,
    pub underrun_events: AtomicU64,
}

impl PlaybackCounters {
    pub fn played(&self) -> u64 {
        self.played_frames.load(Ordering::Relaxed)
    }

    pub fn underruns(&self) -> u64 {
        self.underrun_events.load(Ordering::Relaxed)
    }
}

/// Build an output stream that plays mono audio from `queue` on every channel of `config`.
///
/// `queue` must already run at the device sample rate.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<SampleQueue>,
    refill_max_samples: usize,
    counters: Arc<PlaybackCounters>,
    errors: Sender<String>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => {
            build_stream::<f32>(device, config, queue, refill_max_samples, counters, errors)
        }
        cpal::SampleFormat::I16 => {
            build_stream::<i16>(device, config, queue, refill_max_samples, counters, errors)
        }
        cpal::SampleFormat::I32 => {
            build_stream::<i32>(device, config, queue, refill_max_samples, counters, errors)
        }
        cpal::SampleFormat::U16 => {
            build_stream::<u16>(device, config, queue, refill_max_samples, counters, errors)
        }
        other => Err(anyhow!("unsupported output sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<SampleQueue>,
    refill_max_samples: usize,
    counters: Arc<PlaybackCounters>,
    errors: Sender<String>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = (config.channels as usize).max(1);
    let refill = refill_max_samples.max(1);
    let queue = queue.clone();
    let mut local = LocalBuffer::default();

    let err_fn = move |err: cpal::StreamError| {
        tracing::warn!("output stream error: {err}");
        let _ = errors.try_send(err.to_string());
    };

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let frames = data.len() / channels;
            let filled = fill_frames(data, channels, &mut local, || {
                queue.pop(PopStrategy::NonBlocking {
                    max_samples: refill,
                })
            });
            counters
                .played_frames
                .fetch_add(filled as u64, Ordering::Relaxed);
            if filled < frames {
                counters.underrun_events.fetch_add(1, Ordering::Relaxed);
                counters
                    .underrun_frames
                    .fetch_add((frames - filled) as u64, Ordering::Relaxed);
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Samples already taken from the queue but not yet written to the device.
#[derive(Debug, Default)]
struct LocalBuffer {
    pos: usize,
    samples: Vec<f32>,
}

/// Write mono samples into an interleaved output buffer, duplicating across channels.
///
/// `refill` is called whenever the local buffer runs dry. Frames it cannot cover are zeroed.
/// Returns the number of frames filled with real audio.
fn fill_frames<T, F>(data: &mut [T], channels: usize, local: &mut LocalBuffer, mut refill: F) -> usize
where
    T: cpal::Sample + cpal::FromSample<f32>,
    F: FnMut() -> Option<Vec<f32>>,
{
    let mut filled = 0;
    for frame in data.chunks_mut(channels) {
        if local.pos >= local.samples.len() {
            match refill() {
                Some(next) if !next.is_empty() => {
                    local.samples = next;
                    local.pos = 0;
                }
                _ => {
                    local.samples.clear();
                    local.pos = 0;
                    break;
                }
            }
        }
        let value = <T as cpal::Sample>::from_sample::<f32>(local.samples[local.pos]);
        frame.fill(value);
        local.pos += 1;
        filled += 1;
    }

    let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);
    for sample in &mut data[filled * channels..] {
        *sample = silence;
    }
    filled
}
