//! Gain and level measurement.

use std::borrow::Cow;

use crate::align::SATURATION_LIMIT;
use crate::config::{GainConfig, GainMode};
use crate::pcm::{self, FULL_SCALE};

/// Magnitude floor applied before taking a logarithm.
pub const DB_FLOOR: f64 = 1e-6;
/// Zero-crossing fraction below which a saturated chunk counts as flatlined.
const FLATLINE_CROSSING_FRACTION: f64 = 0.05;

/// Convert decibels to a linear multiplier.
pub fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Convert a linear magnitude to decibels, flooring at [`DB_FLOOR`].
pub fn linear_to_db(value: f64) -> f64 {
    20.0 * value.max(DB_FLOOR).log10()
}

/// Scale a chunk, saturating at the `i16` range.
pub fn apply_gain(chunk: &[i16], gain_linear: f64) -> Vec<i16> {
    chunk
        .iter()
        .map(|&s| pcm::saturate(s as f64 * gain_linear))
        .collect()
}

/// Level summary of one chunk, measured on samples normalized to `[-1, 1]`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ChunkStats {
    pub samples: usize,
    pub rms: f64,
    pub peak: f64,
    pub rms_db: f64,
    pub peak_db: f64,
    /// RMS as a percentage of full scale.
    pub volume_percent: f64,
    pub zero_crossings: usize,
    pub max_abs: i32,
}

impl ChunkStats {
    pub fn zero_crossing_ratio(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.zero_crossings as f64 / self.samples as f64
        }
    }

    /// Pinned near full scale with almost no sign changes, the signature of lost byte sync.
    pub fn is_flatlined(&self) -> bool {
        self.max_abs > SATURATION_LIMIT && self.zero_crossing_ratio() < FLATLINE_CROSSING_FRACTION
    }
}

/// Measure a chunk. Empty chunks report zero levels and floor decibels.
pub fn statistics(chunk: &[i16]) -> ChunkStats {
    if chunk.is_empty() {
        let floor_db = linear_to_db(0.0);
        return ChunkStats {
            rms_db: floor_db,
            peak_db: floor_db,
            ..ChunkStats::default()
        };
    }

    let sum_sq: f64 = chunk
        .iter()
        .map(|&s| {
            let x = s as f64 / FULL_SCALE;
            x * x
        })
        .sum();
    let rms = (sum_sq / chunk.len() as f64).sqrt();
    let max_abs = pcm::max_abs(chunk);
    let peak = max_abs as f64 / FULL_SCALE;

    ChunkStats {
        samples: chunk.len(),
        rms,
        peak,
        rms_db: linear_to_db(rms),
        peak_db: linear_to_db(peak),
        volume_percent: rms * 100.0,
        zero_crossings: pcm::zero_crossings(chunk),
        max_abs,
    }
}

/// Applies the configured gain policy to each chunk.
#[derive(Clone, Debug)]
pub struct GainStage {
    gain_db: f64,
    gain_linear: f64,
    mode: GainMode,
}

impl GainStage {
    pub fn new(config: GainConfig) -> Self {
        Self {
            gain_db: config.gain_db,
            gain_linear: db_to_linear(config.gain_db),
            mode: config.mode,
        }
    }

    pub fn gain_db(&self) -> f64 {
        self.gain_db
    }

    pub fn gain_linear(&self) -> f64 {
        self.gain_linear
    }

    pub fn mode(&self) -> GainMode {
        self.mode
    }

    /// Change the fixed gain between chunks.
    pub fn update(&mut self, gain_db: f64) {
        self.gain_db = gain_db;
        self.gain_linear = db_to_linear(gain_db);
        tracing::debug!(gain_db, gain_linear = self.gain_linear, "gain updated");
    }

    /// Run a chunk through the gain policy. Unity gain returns the input untouched.
    pub fn apply<'a>(&self, chunk: &'a [i16]) -> Cow<'a, [i16]> {
        let linear = match self.mode {
            GainMode::Fixed => self.gain_linear,
            GainMode::AutoPeak { target_peak } => {
                let peak = pcm::max_abs(chunk);
                if peak == 0 {
                    1.0
                } else {
                    (target_peak as f64 / peak as f64).min(1.0)
                }
            }
        };
        if linear == 1.0 {
            Cow::Borrowed(chunk)
        } else {
            Cow::Owned(apply_gain(chunk, linear))
        }
    }
}
