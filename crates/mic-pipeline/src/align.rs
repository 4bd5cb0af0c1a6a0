//! Byte-alignment recovery for the unframed sample stream.
//!
//! A 16-bit stream only has two possible byte parities. Each one is decoded and scored with a
//! few cheap statistics; the best-scoring parity wins. Everything here is a pure function of
//! its input.
//!
//! ## Score
//! - `-1000` when the largest magnitude exceeds [`SATURATION_LIMIT`], `+100` otherwise
//! - `+300 * continuity`, the fraction of sample-to-sample steps under [`MAX_CROSSING_STEP`]
//! - `+2` per plausible zero crossing, once crossings exceed 10 % of the sample count and the
//!   candidate is mostly continuous
//! - `+500 * distinct_values / samples`
//!
//! A byte-shifted stream turns the random low byte of every sample into its high byte, which
//! produces sign flips between far-apart values. Those flips are discontinuities rather than
//! crossings, so only sign changes whose step stays under [`MAX_CROSSING_STEP`] are counted.
//! Tones whose period is a handful of samples (8 kHz at 48 kHz) can still fool the score.

use crate::pcm::{self, BYTES_PER_SAMPLE};

/// Buffers shorter than this are not worth scoring.
pub const MIN_SYNC_BYTES: usize = 100;
/// Minimum decoded samples for a candidate offset to be scored.
pub const MIN_CANDIDATE_SAMPLES: usize = 50;
/// Magnitude above which audio is treated as saturated (about 97.6 % of full scale).
pub const SATURATION_LIMIT: i32 = 32_000;
/// Largest sample-to-sample step still counted as a zero crossing.
pub const MAX_CROSSING_STEP: i32 = 8192;

const SATURATION_PENALTY: f64 = -1000.0;
const VALIDITY_REWARD: f64 = 100.0;
const MIN_CROSSING_FRACTION: f64 = 0.1;
const CROSSING_WEIGHT: f64 = 2.0;
const CONTINUITY_WEIGHT: f64 = 300.0;
const MIN_CONTINUITY_FOR_CROSSINGS: f64 = 0.5;
const UNIQUENESS_WEIGHT: f64 = 500.0;

/// The chosen parity and how convincing it was.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Alignment {
    /// Byte offset (0 or 1) where samples start inside the scored buffer.
    pub offset: usize,
    pub score: f64,
}

impl Alignment {
    /// A positive score means the stream looks like real audio at this offset.
    pub fn is_confident(&self) -> bool {
        self.score > 0.0
    }

    /// Bytes to drop from the live stream, given that `consumed` bytes were read to score it.
    ///
    /// The next live byte sits at `consumed`, so only the parity of the sum matters.
    pub fn discard_after(&self, consumed: usize) -> usize {
        (self.offset + consumed) % BYTES_PER_SAMPLE
    }
}

/// Statistics behind a single candidate's score.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CandidateScore {
    pub offset: usize,
    pub score: f64,
    pub samples: usize,
    pub max_abs: i32,
    pub zero_crossings: usize,
    pub continuity: f64,
    pub unique_ratio: f64,
}

/// Score `raw[offset..]` decoded as little-endian `i16`.
///
/// Returns `None` when fewer than [`MIN_CANDIDATE_SAMPLES`] samples decode.
pub fn score_offset(raw: &[u8], offset: usize) -> Option<CandidateScore> {
    let samples = pcm::decode_le(raw.get(offset..)?);
    if samples.len() < MIN_CANDIDATE_SAMPLES {
        return None;
    }

    let n = samples.len();
    let max_abs = pcm::max_abs(&samples);
    let crossings = plausible_crossings(&samples);
    let continuity = small_steps(&samples) as f64 / (n - 1) as f64;
    let unique_ratio = distinct_values(&samples) as f64 / n as f64;

    let mut score = if max_abs > SATURATION_LIMIT {
        SATURATION_PENALTY
    } else {
        VALIDITY_REWARD
    };
    if continuity >= MIN_CONTINUITY_FOR_CROSSINGS
        && crossings as f64 > n as f64 * MIN_CROSSING_FRACTION
    {
        score += crossings as f64 * CROSSING_WEIGHT;
    }
    score += continuity * CONTINUITY_WEIGHT;
    score += unique_ratio * UNIQUENESS_WEIGHT;

    Some(CandidateScore {
        offset,
        score,
        samples: n,
        max_abs,
        zero_crossings: crossings,
        continuity,
        unique_ratio,
    })
}

/// Pick the byte parity that makes `raw` look most like audio.
///
/// Ties keep offset 0. Returns `None` when the buffer is too short to score; callers then keep
/// their current alignment. A negative winning score is still returned so the caller can decide
/// whether it is good enough.
pub fn find_alignment(raw: &[u8]) -> Option<Alignment> {
    if raw.len() < MIN_SYNC_BYTES {
        return None;
    }

    let mut best: Option<CandidateScore> = None;
    for offset in 0..BYTES_PER_SAMPLE {
        let Some(candidate) = score_offset(raw, offset) else {
            continue;
        };
        tracing::debug!(
            offset,
            score = candidate.score,
            max_abs = candidate.max_abs,
            zero_crossings = candidate.zero_crossings,
            continuity = candidate.continuity,
            unique_ratio = candidate.unique_ratio,
            "alignment candidate"
        );
        if best.map(|b| candidate.score > b.score).unwrap_or(true) {
            best = Some(candidate);
        }
    }

    best.map(|b| Alignment {
        offset: b.offset,
        score: b.score,
    })
}

fn plausible_crossings(samples: &[i16]) -> usize {
    samples
        .windows(2)
        .filter(|w| {
            let (a, b) = (w[0] as i32, w[1] as i32);
            (a < 0) != (b < 0) && (a - b).abs() < MAX_CROSSING_STEP
        })
        .count()
}

fn small_steps(samples: &[i16]) -> usize {
    samples
        .windows(2)
        .filter(|w| (w[0] as i32 - w[1] as i32).abs() < MAX_CROSSING_STEP)
        .count()
}

fn distinct_values(samples: &[i16]) -> usize {
    let mut seen = vec![0u64; (u16::MAX as usize + 1) / 64];
    let mut distinct = 0;
    for &s in samples {
        let idx = s as u16 as usize;
        let (word, bit) = (idx / 64, idx % 64);
        if seen[word] & (1 << bit) == 0 {
            seen[word] |= 1 << bit;
            distinct += 1;
        }
    }
    distinct
}
