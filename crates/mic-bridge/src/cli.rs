use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use mic_pipeline::config::{FilterKind, FilterPreset};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "mic-bridge", version = VERSION)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Serial port the microphone is attached to
    #[arg(long, default_value = "/dev/ttyUSB0")]
    pub port: String,

    /// Serial baud rate
    #[arg(long, default_value_t = 1_500_000)]
    pub baud: u32,

    /// Sample rate the microphone streams at (Hz)
    #[arg(long, default_value_t = 48_000)]
    pub sample_rate: u32,

    /// Samples per processing chunk
    #[arg(long, default_value_t = 1024)]
    pub chunk_samples: usize,

    /// Serial read timeout in milliseconds
    #[arg(long, default_value_t = 100)]
    pub read_timeout_ms: u64,

    /// Filter and gain preset; explicit filter/gain flags override it
    #[arg(long, value_enum, default_value_t = Preset::VoiceChat)]
    pub preset: Preset,

    /// Filter type (overrides the preset)
    #[arg(long, value_enum)]
    pub filter: Option<FilterArg>,

    /// Low cutoff in Hz (overrides the preset)
    #[arg(long)]
    pub low_hz: Option<f64>,

    /// High cutoff in Hz (overrides the preset)
    #[arg(long)]
    pub high_hz: Option<f64>,

    /// Fixed gain in dB (overrides the preset)
    #[arg(long, allow_negative_numbers = true)]
    pub gain_db: Option<f64>,

    /// Scale each chunk down to a fixed peak instead of applying fixed gain
    #[arg(long)]
    pub auto_gain: bool,

    /// Chunk volume (% of full scale) above which a chunk counts as hot
    #[arg(long, default_value_t = 15.0)]
    pub volume_threshold: f64,

    /// Chunks per overload evaluation window
    #[arg(long, default_value_t = 50)]
    pub window_chunks: usize,

    /// Fraction of hot chunks in a window that triggers realignment
    #[arg(long, default_value_t = 0.5)]
    pub threshold_ratio: f64,

    /// Alignment attempts before reconnecting
    #[arg(long, default_value_t = 3)]
    pub max_sync_attempts: u32,

    /// Reconnect attempts before giving up
    #[arg(long, default_value_t = 3)]
    pub max_reconnects: u32,

    /// Status line interval in milliseconds (0 disables it)
    #[arg(long, default_value_t = 500)]
    pub status_interval_ms: u64,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play the processed microphone stream on an output device
    Play {
        /// Use a specific output device by substring match
        #[arg(long)]
        device: Option<String>,

        /// Output queue target in seconds
        #[arg(long, default_value_t = 0.5)]
        buffer_seconds: f32,
    },

    /// Record the processed microphone stream to a WAV file
    Record {
        /// Output path (defaults to recording_<timestamp>.wav)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Seconds of processed audio to record
        #[arg(long, default_value_t = 10.0)]
        seconds: f64,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Preset {
    VoiceChat,
    Meeting,
    NoisyEnvironment,
    LowNoise,
    HighNoise,
    Raw,
}

impl From<Preset> for FilterPreset {
    fn from(preset: Preset) -> Self {
        match preset {
            Preset::VoiceChat => FilterPreset::VoiceChat,
            Preset::Meeting => FilterPreset::Meeting,
            Preset::NoisyEnvironment => FilterPreset::NoisyEnvironment,
            Preset::LowNoise => FilterPreset::LowNoise,
            Preset::HighNoise => FilterPreset::HighNoise,
            Preset::Raw => FilterPreset::Raw,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FilterArg {
    None,
    Bandpass,
    Lowpass,
    Highpass,
}

impl From<FilterArg> for FilterKind {
    fn from(arg: FilterArg) -> Self {
        match arg {
            FilterArg::None => FilterKind::Passthrough,
            FilterArg::Bandpass => FilterKind::Bandpass,
            FilterArg::Lowpass => FilterKind::Lowpass,
            FilterArg::Highpass => FilterKind::Highpass,
        }
    }
}
