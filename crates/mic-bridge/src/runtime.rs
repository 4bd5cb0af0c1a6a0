//! Bridge runtime helpers.
//!
//! Wires the serial connector, the pipeline driver and one of the two sinks together.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result};

use crate::config::{PlayConfig, RecordConfig};
use mic_pipeline::{
    CpalSink, PipelineConfig, PipelineDriver, RunSummary, SerialConnector, WavSink, device,
};

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    device::list_devices(&host)
}

/// Stream the processed microphone to an output device until cancelled.
pub fn run_play(config: PlayConfig, cancel: Arc<AtomicBool>) -> Result<RunSummary> {
    let sink = CpalSink::open(config.pipeline.format.sample_rate, &config.output)?;
    let connector = SerialConnector::new(config.pipeline.serial.clone());
    let summary = PipelineDriver::new(config.pipeline, connector, sink, cancel)
        .run()
        .context("microphone stream failed")?;
    log_summary(&summary);
    Ok(summary)
}

/// Record `config.seconds` of processed audio to a WAV file.
pub fn run_record(config: RecordConfig, cancel: Arc<AtomicBool>) -> Result<RunSummary> {
    let limit = sample_limit(&config.pipeline, config.seconds);
    let sink = WavSink::create(&config.path, config.pipeline.format.sample_rate)?;
    tracing::info!(
        path = %config.path.display(),
        seconds = config.seconds,
        samples = limit,
        "recording"
    );

    let connector = SerialConnector::new(config.pipeline.serial.clone());
    let summary = PipelineDriver::new(config.pipeline, connector, sink, cancel)
        .with_sample_limit(limit)
        .run()
        .with_context(|| format!("recording to {} failed", config.path.display()))?;
    log_summary(&summary);
    Ok(summary)
}

/// Samples needed for `seconds` of audio at the configured rate.
pub fn sample_limit(pipeline: &PipelineConfig, seconds: f64) -> u64 {
    (pipeline.format.sample_rate as f64 * seconds.max(0.0)).round() as u64
}

fn log_summary(summary: &RunSummary) {
    tracing::info!(
        chunks = summary.chunks,
        samples = summary.samples,
        kilobytes = summary.bytes / 1024,
        elapsed = ?summary.elapsed,
        sink_errors = summary.sink_errors,
        resyncs = summary.supervisor.resyncs,
        reconnects = summary.supervisor.reconnects,
        overloads = summary.supervisor.overloads,
        cancelled = summary.cancelled,
        "session summary"
    );
}
