//! Raw PCM helpers shared by the alignment, filter and gain stages.
//!
//! The device streams signed 16-bit little-endian mono samples with no framing, so every
//! helper here works on plain `i16` slices or raw byte buffers.

/// Bytes per sample on the wire.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Scale used to map `i16` samples to the normalized `[-1, 1)` range.
pub const FULL_SCALE: f64 = 32768.0;

/// Decode little-endian `i16` samples, dropping a trailing odd byte.
pub fn decode_le(raw: &[u8]) -> Vec<i16> {
    raw.chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encode samples as little-endian bytes.
pub fn encode_le(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Count sign changes between adjacent samples. Zero counts as non-negative.
pub fn zero_crossings(samples: &[i16]) -> usize {
    samples
        .windows(2)
        .filter(|w| (w[0] < 0) != (w[1] < 0))
        .count()
}

/// Largest absolute sample value, widened so `i16::MIN` does not overflow.
pub fn max_abs(samples: &[i16]) -> i32 {
    samples
        .iter()
        .map(|&s| (s as i32).abs())
        .max()
        .unwrap_or(0)
}

/// Convert a normalized value back to `i16`, saturating at the sample range.
#[inline]
pub fn saturate(value: f64) -> i16 {
    // NaN maps to 0.
    value.clamp(i16::MIN as f64, i16::MAX as f64) as i16
}
