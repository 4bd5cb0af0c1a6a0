//! Pipeline tuning parameters shared by the serial, filter, gain and supervisor stages.

use std::time::Duration;

use crate::pcm::BYTES_PER_SAMPLE;

/// Serial link parameters.
#[derive(Clone, Debug)]
pub struct SerialConfig {
    /// Device path (`/dev/ttyUSB0`, `COM26`, ...).
    pub port: String,
    /// Link speed; the microphone firmware runs at 1.5 Mbaud.
    pub baud_rate: u32,
    /// Upper bound for a single chunk read.
    pub read_timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 1_500_000,
            read_timeout: Duration::from_millis(100),
        }
    }
}

/// Sample stream layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    /// Nominal samples per read cycle.
    pub chunk_samples: usize,
}

impl AudioFormat {
    /// Bytes a full chunk occupies on the wire.
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_samples * BYTES_PER_SAMPLE
    }

    /// Bytes for `seconds` of audio, rounded down to a whole sample.
    pub fn bytes_for(&self, seconds: f64) -> usize {
        let samples = (self.sample_rate as f64 * seconds.max(0.0)) as usize;
        samples * BYTES_PER_SAMPLE
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            chunk_samples: 1024,
        }
    }
}

/// Frequency filter selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterKind {
    Passthrough,
    Bandpass,
    Lowpass,
    Highpass,
}

/// Filter type plus cutoffs. Lowpass uses `high_hz`, highpass uses `low_hz`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FilterConfig {
    pub kind: FilterKind,
    pub low_hz: f64,
    pub high_hz: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            kind: FilterKind::Bandpass,
            low_hz: 100.0,
            high_hz: 3000.0,
        }
    }
}

/// How the gain stage picks its multiplier.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GainMode {
    /// Fixed decibel gain with hard clipping.
    Fixed,
    /// Scale each chunk so its peak lands on `target_peak`, never boosting.
    AutoPeak { target_peak: i16 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GainConfig {
    pub gain_db: f64,
    pub mode: GainMode,
}

impl Default for GainConfig {
    fn default() -> Self {
        Self {
            gain_db: 20.0,
            mode: GainMode::Fixed,
        }
    }
}

/// Overload detection and recovery limits.
#[derive(Clone, Debug)]
pub struct OverloadConfig {
    /// Chunk volume (RMS percent of full scale) counted as "hot".
    pub volume_threshold_percent: f64,
    /// Chunks per evaluation window.
    pub window_chunks: usize,
    /// Hot fraction above which the window is overloaded.
    pub threshold_ratio: f64,
    pub max_sync_attempts: u32,
    pub max_reconnect_retries: u32,
    /// Pause between closing and reopening the connection.
    pub reconnect_backoff: Duration,
    /// Wait after clearing the input buffer of a fresh connection.
    pub settle_delay: Duration,
    /// Quality probe horizon after (re)connecting.
    pub probe_duration: Duration,
    /// Audio collected per alignment attempt.
    pub sync_seconds: f64,
    /// Consecutive saturated, crossing-free chunks that force a resync.
    pub max_flatline_chunks: u32,
    /// Consecutive empty reads before the device is considered gone.
    pub max_idle_reads: u32,
}

impl Default for OverloadConfig {
    fn default() -> Self {
        Self {
            volume_threshold_percent: 15.0,
            window_chunks: 50,
            threshold_ratio: 0.5,
            max_sync_attempts: 3,
            max_reconnect_retries: 3,
            reconnect_backoff: Duration::from_secs(1),
            settle_delay: Duration::from_millis(500),
            probe_duration: Duration::from_millis(500),
            sync_seconds: 1.0,
            max_flatline_chunks: 5,
            max_idle_reads: 20,
        }
    }
}

/// Speaker output tuning.
#[derive(Clone, Debug)]
pub struct OutputConfig {
    /// Substring of the output device name; `None` picks the host default.
    pub device: Option<String>,
    /// Queue depth between the pipeline and the output callback.
    pub buffer_seconds: f32,
    /// Most samples pulled from the queue per callback refill.
    pub refill_max_samples: usize,
    /// How long a write may wait on a full queue before the sink reports a stall.
    pub stall_timeout: Duration,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            device: None,
            buffer_seconds: 0.5,
            refill_max_samples: 4096,
            stall_timeout: Duration::from_secs(2),
        }
    }
}

/// Everything the driver needs, passed down to each stage at construction.
#[derive(Clone, Debug, Default)]
pub struct PipelineConfig {
    pub serial: SerialConfig,
    pub format: AudioFormat,
    pub filter: FilterConfig,
    pub gain: GainConfig,
    pub overload: OverloadConfig,
    /// Interval between status log lines; `None` disables them.
    pub status_interval: Option<Duration>,
}

/// Named filter + gain combinations for common listening situations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterPreset {
    VoiceChat,
    Meeting,
    NoisyEnvironment,
    LowNoise,
    HighNoise,
    Raw,
}

impl FilterPreset {
    /// Filter settings and gain (dB) for this preset.
    pub fn settings(self) -> (FilterConfig, f64) {
        let (kind, low_hz, high_hz, gain_db) = match self {
            FilterPreset::VoiceChat => (FilterKind::Bandpass, 100.0, 3000.0, 20.0),
            FilterPreset::Meeting => (FilterKind::Bandpass, 150.0, 2800.0, 22.0),
            FilterPreset::NoisyEnvironment => (FilterKind::Bandpass, 200.0, 2500.0, 25.0),
            FilterPreset::LowNoise => (FilterKind::Highpass, 200.0, 3000.0, 18.0),
            FilterPreset::HighNoise => (FilterKind::Lowpass, 100.0, 2000.0, 18.0),
            FilterPreset::Raw => (FilterKind::Passthrough, 20.0, 20_000.0, 16.0),
        };
        (
            FilterConfig {
                kind,
                low_hz,
                high_hz,
            },
            gain_db,
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            FilterPreset::VoiceChat => "voice chat",
            FilterPreset::Meeting => "meeting",
            FilterPreset::NoisyEnvironment => "noisy environment",
            FilterPreset::LowNoise => "remove low-frequency noise",
            FilterPreset::HighNoise => "remove high-frequency noise",
            FilterPreset::Raw => "raw",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_bytes_is_two_per_sample() {
        let format = AudioFormat {
            sample_rate: 48_000,
            chunk_samples: 256,
        };
        assert_eq!(format.chunk_bytes(), 512);
    }

    #[test]
    fn bytes_for_one_second_at_48k() {
        assert_eq!(AudioFormat::default().bytes_for(1.0), 96_000);
        assert_eq!(AudioFormat::default().bytes_for(-3.0), 0);
    }

    #[test]
    fn defaults_match_microphone_firmware() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.serial.baud_rate, 1_500_000);
        assert_eq!(cfg.format.sample_rate, 48_000);
        assert_eq!(cfg.overload.window_chunks, 50);
        assert_eq!(cfg.overload.volume_threshold_percent, 15.0);
        assert_eq!(cfg.gain.mode, GainMode::Fixed);
    }

    #[test]
    fn voice_chat_preset_is_the_default_filter() {
        let (filter, gain_db) = FilterPreset::VoiceChat.settings();
        assert_eq!(filter, FilterConfig::default());
        assert_eq!(gain_db, 20.0);
    }

    #[test]
    fn every_preset_has_its_own_label() {
        let presets = [
            FilterPreset::VoiceChat,
            FilterPreset::Meeting,
            FilterPreset::NoisyEnvironment,
            FilterPreset::LowNoise,
            FilterPreset::HighNoise,
            FilterPreset::Raw,
        ];
        let mut labels: Vec<&str> = presets.iter().map(|p| p.label()).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), presets.len());
        assert_eq!(FilterPreset::NoisyEnvironment.label(), "noisy environment");
    }

    #[test]
    fn raw_preset_disables_filtering() {
        let (filter, _) = FilterPreset::Raw.settings();
        assert_eq!(filter.kind, FilterKind::Passthrough);
    }
}
