//! Sample-rate conversion between the microphone rate and the output device rate.
//!
//! A background thread pulls fixed-size blocks from one [`SampleQueue`], runs them through
//! Rubato's sinc resampler and pushes the result into a second queue read by the output
//! callback. Closing the source queue flushes the tail and closes the destination.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::queue::{PopStrategy, SampleQueue, capacity_for};

/// Longest the resampler waits for the output callback to make room.
const PUSH_STALL: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug)]
pub struct ResampleConfig {
    /// Input block size in samples.
    pub chunk_samples: usize,
    /// Buffering of the output queue, in seconds.
    pub buffer_seconds: f32,
}

impl Default for ResampleConfig {
    fn default() -> Self {
        Self {
            chunk_samples: 1024,
            buffer_seconds: 0.5,
        }
    }
}

/// Spawn the resampler thread and return the queue it fills at `dst_rate`.
pub fn start_resampler(
    srcq: Arc<SampleQueue>,
    src_rate: u32,
    dst_rate: u32,
    cfg: ResampleConfig,
) -> Result<Arc<SampleQueue>> {
    anyhow::ensure!(src_rate > 0 && dst_rate > 0, "sample rates must be positive");
    let dstq = Arc::new(SampleQueue::new(capacity_for(dst_rate, cfg.buffer_seconds)));
    let ratio = dst_rate as f64 / src_rate as f64;
    let chunk = cfg.chunk_samples.max(1);

    let sinc_len = 128;
    let window = WindowFunction::BlackmanHarris2;
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff: calculate_cutoff(sinc_len, window),
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window,
    };

    tracing::info!(src_rate, dst_rate, chunk, "starting resampler");

    let dstq_thread = dstq.clone();
    thread::Builder::new()
        .name("resampler".to_string())
        .spawn(move || {
            let mut resampler: Box<dyn Resampler<f32>> =
                match Async::<f32>::new_sinc(ratio, 1.1, &params, chunk, 1, FixedAsync::Input) {
                    Ok(r) => Box::new(r),
                    Err(e) => {
                        tracing::error!("resampler init error: {e:#}");
                        dstq_thread.close();
                        return;
                    }
                };
            if let Err(e) = run(resampler.as_mut(), &srcq, &dstq_thread, chunk, ratio) {
                tracing::error!("resampler stopped: {e:#}");
            }
            dstq_thread.close();
        })
        .context("spawn resampler thread")?;

    Ok(dstq)
}

fn run(
    resampler: &mut dyn Resampler<f32>,
    srcq: &SampleQueue,
    dstq: &SampleQueue,
    chunk: usize,
    ratio: f64,
) -> Result<()> {
    let out_capacity = ((chunk as f64 * ratio * 1.1).ceil() as usize + 16).max(chunk * 3);
    let mut out = vec![0.0f32; out_capacity];

    while let Some(block) = srcq.pop(PopStrategy::BlockingExact { samples: chunk }) {
        let produced = process_block(resampler, &block, &mut out, None)?;
        if dstq.push_blocking(&out[..produced], PUSH_STALL) < produced {
            return Ok(());
        }
    }

    while let Some(tail) = srcq.pop(PopStrategy::BlockingUpTo { max_samples: chunk }) {
        let produced = process_block(resampler, &tail, &mut out, Some(tail.len()))?;
        if produced > 0 && dstq.push_blocking(&out[..produced], PUSH_STALL) < produced {
            return Ok(());
        }
    }
    Ok(())
}

/// Resample one mono block into `out`, returning the number of samples produced.
///
/// `partial` marks a short final block that the resampler pads internally.
fn process_block(
    resampler: &mut dyn Resampler<f32>,
    input: &[f32],
    out: &mut [f32],
    partial: Option<usize>,
) -> Result<usize> {
    let input_adapter = InterleavedSlice::new(input, 1, input.len()).context("input buffer")?;
    let capacity = out.len();
    let mut output_adapter =
        InterleavedSlice::new_mut(out, 1, capacity).context("output buffer")?;
    let indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len: partial,
    };
    let (_consumed, produced) = resampler
        .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
        .context("resample block")?;
    Ok(produced)
}
