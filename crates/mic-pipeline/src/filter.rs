//! Streaming IIR filtering with state carried across chunks.
//!
//! Lowpass and highpass are fourth-order Butterworth responses built from two cascaded
//! second-order sections. Bandpass is a fourth-order highpass at `low_hz` followed by a
//! fourth-order lowpass at `high_hz`. Sections run in transposed direct form II in `f64`, so a
//! stream split into arbitrary chunks produces the same output as the whole stream at once.

use std::borrow::Cow;
use std::f64::consts::PI;

use crate::config::{FilterConfig, FilterKind};
use crate::error::FilterConfigError;
use crate::pcm::{self, FULL_SCALE};

/// Per-section Q for a fourth-order Butterworth: `1 / (2 cos(pi/8))` and `1 / (2 cos(3pi/8))`.
const BUTTERWORTH_Q: [f64; 2] = [0.541_196_100_146_197, 1.306_562_964_876_377];

#[derive(Clone, Copy, Debug, PartialEq)]
enum Response {
    Lowpass,
    Highpass,
}

/// One second-order section.
#[derive(Clone, Copy, Debug)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: f64,
    z2: f64,
}

impl Biquad {
    /// Bilinear-transform section with the cutoff prewarped (`tan(w0/2)` folded into `alpha`).
    fn new(response: Response, cutoff_hz: f64, q: f64, sample_rate: f64) -> Self {
        let w0 = 2.0 * PI * cutoff_hz / sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);

        let (b0, b1, b2) = match response {
            Response::Lowpass => {
                let b = (1.0 - cos_w0) / 2.0;
                (b, 1.0 - cos_w0, b)
            }
            Response::Highpass => {
                let b = (1.0 + cos_w0) / 2.0;
                (b, -(1.0 + cos_w0), b)
            }
        };
        let a0 = 1.0 + alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: -2.0 * cos_w0 / a0,
            a2: (1.0 - alpha) / a0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, x: f64) -> f64 {
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }

    fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

fn butterworth4(response: Response, cutoff_hz: f64, sample_rate: f64) -> [Biquad; 2] {
    BUTTERWORTH_Q.map(|q| Biquad::new(response, cutoff_hz, q, sample_rate))
}

/// Check a filter configuration against the sample rate.
pub fn validate(config: &FilterConfig, sample_rate: u32) -> Result<(), FilterConfigError> {
    if config.kind == FilterKind::Passthrough {
        return Ok(());
    }
    if sample_rate == 0 {
        return Err(FilterConfigError::InvalidSampleRate);
    }
    let nyquist = sample_rate as f64 / 2.0;
    let check = |hz: f64| {
        if hz.is_finite() && hz > 0.0 && hz < nyquist {
            Ok(())
        } else {
            Err(FilterConfigError::CutoffOutOfRange { hz, nyquist })
        }
    };
    match config.kind {
        FilterKind::Passthrough => Ok(()),
        FilterKind::Lowpass => check(config.high_hz),
        FilterKind::Highpass => check(config.low_hz),
        FilterKind::Bandpass => {
            check(config.low_hz)?;
            check(config.high_hz)?;
            if config.low_hz >= config.high_hz {
                return Err(FilterConfigError::InvertedBand {
                    low: config.low_hz,
                    high: config.high_hz,
                });
            }
            Ok(())
        }
    }
}

/// A frequency filter whose delay lines survive from one chunk to the next.
#[derive(Debug)]
pub struct ContinuousFilter {
    requested: FilterConfig,
    sample_rate: u32,
    active: FilterKind,
    sections: Vec<Biquad>,
    last_error: Option<FilterConfigError>,
}

impl ContinuousFilter {
    /// Build a filter. An invalid configuration is logged and degrades to passthrough.
    pub fn new(config: FilterConfig, sample_rate: u32) -> Self {
        let mut filter = Self {
            requested: config,
            sample_rate,
            active: FilterKind::Passthrough,
            sections: Vec::new(),
            last_error: None,
        };
        filter.rebuild();
        filter
    }

    /// The response actually applied, which is `Passthrough` after a rejected configuration.
    pub fn kind(&self) -> FilterKind {
        self.active
    }

    /// The configuration last asked for, valid or not.
    pub fn requested(&self) -> &FilterConfig {
        &self.requested
    }

    /// Why the last configuration was rejected, if it was.
    pub fn last_error(&self) -> Option<&FilterConfigError> {
        self.last_error.as_ref()
    }

    /// Filter one chunk. Passthrough hands the input back without copying.
    pub fn process<'a>(&mut self, chunk: &'a [i16]) -> Cow<'a, [i16]> {
        if self.sections.is_empty() {
            return Cow::Borrowed(chunk);
        }
        let out = chunk
            .iter()
            .map(|&s| {
                let x = s as f64 / FULL_SCALE;
                let y = self
                    .sections
                    .iter_mut()
                    .fold(x, |acc, section| section.process(acc));
                pcm::saturate(y * FULL_SCALE)
            })
            .collect();
        Cow::Owned(out)
    }

    /// Switch response or cutoffs. State is only discarded when something actually changed.
    pub fn reconfigure(&mut self, kind: FilterKind, low_hz: f64, high_hz: f64) {
        let next = FilterConfig {
            kind,
            low_hz,
            high_hz,
        };
        if next == self.requested {
            return;
        }
        self.requested = next;
        self.rebuild();
    }

    /// Zero every delay line, as if the filter had only ever seen silence.
    pub fn reset_state(&mut self) {
        for section in &mut self.sections {
            section.reset();
        }
    }

    fn rebuild(&mut self) {
        self.sections.clear();
        match validate(&self.requested, self.sample_rate) {
            Ok(()) => {
                self.last_error = None;
                self.active = self.requested.kind;
            }
            Err(err) => {
                tracing::warn!(
                    kind = ?self.requested.kind,
                    low_hz = self.requested.low_hz,
                    high_hz = self.requested.high_hz,
                    error = %err,
                    "invalid filter configuration; passing audio through"
                );
                self.last_error = Some(err);
                self.active = FilterKind::Passthrough;
                return;
            }
        }

        let rate = self.sample_rate as f64;
        let FilterConfig {
            low_hz, high_hz, ..
        } = self.requested;
        match self.active {
            FilterKind::Passthrough => {}
            FilterKind::Lowpass => {
                self.sections
                    .extend(butterworth4(Response::Lowpass, high_hz, rate));
            }
            FilterKind::Highpass => {
                self.sections
                    .extend(butterworth4(Response::Highpass, low_hz, rate));
            }
            FilterKind::Bandpass => {
                self.sections
                    .extend(butterworth4(Response::Highpass, low_hz, rate));
                self.sections
                    .extend(butterworth4(Response::Lowpass, high_hz, rate));
            }
        }
        tracing::debug!(
            kind = ?self.active,
            low_hz,
            high_hz,
            sections = self.sections.len(),
            "filter configured"
        );
    }
}
