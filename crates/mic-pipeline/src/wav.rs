//! WAV file sink.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::sink::AudioSink;

/// Writes processed audio to a mono 16-bit WAV file. The header is finalized on `close`.
pub struct WavSink {
    path: PathBuf,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    samples_written: u64,
}

impl WavSink {
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(&path, spec)
            .with_context(|| format!("create WAV file {}", path.display()))?;
        tracing::info!(path = %path.display(), sample_rate, "recording to WAV");
        Ok(Self {
            path,
            writer: Some(writer),
            samples_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }
}

impl AudioSink for WavSink {
    fn write(&mut self, samples: &[i16]) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            bail!("WAV file {} already closed", self.path.display());
        };
        for &s in samples {
            writer
                .write_sample(s)
                .with_context(|| format!("write WAV samples to {}", self.path.display()))?;
        }
        self.samples_written += samples.len() as u64;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        writer
            .finalize()
            .with_context(|| format!("finalize WAV file {}", self.path.display()))?;
        tracing::info!(
            path = %self.path.display(),
            samples = self.samples_written,
            "WAV file finalized"
        );
        Ok(())
    }
}
