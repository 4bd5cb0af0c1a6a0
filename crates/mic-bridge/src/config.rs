//! Turn command-line arguments into pipeline and output settings.

use std::path::PathBuf;
use std::time::Duration;

use time::OffsetDateTime;
use time::macros::format_description;

use crate::cli::{Args, Command};
use mic_pipeline::config::{
    AudioFormat, FilterConfig, FilterPreset, GainConfig, GainMode, OutputConfig, OverloadConfig,
    PipelineConfig, SerialConfig,
};

/// Peak that `--auto-gain` scales loud chunks down to.
pub const AUTO_GAIN_TARGET_PEAK: i16 = 20_000;

#[derive(Clone, Debug)]
pub struct PlayConfig {
    pub pipeline: PipelineConfig,
    pub output: OutputConfig,
}

#[derive(Clone, Debug)]
pub struct RecordConfig {
    pub pipeline: PipelineConfig,
    pub path: PathBuf,
    pub seconds: f64,
}

#[derive(Clone, Debug)]
pub enum BridgeConfig {
    Play(PlayConfig),
    Record(RecordConfig),
}

impl BridgeConfig {
    pub fn from_args(args: &Args) -> Self {
        let pipeline = pipeline_config(args);
        match &args.cmd {
            Command::Play {
                device,
                buffer_seconds,
            } => BridgeConfig::Play(PlayConfig {
                pipeline,
                output: OutputConfig {
                    device: normalize_device_name(device.clone()),
                    buffer_seconds: *buffer_seconds,
                    ..OutputConfig::default()
                },
            }),
            Command::Record { output, seconds } => BridgeConfig::Record(RecordConfig {
                pipeline,
                path: output
                    .clone()
                    .unwrap_or_else(|| default_recording_name(now())),
                seconds: *seconds,
            }),
        }
    }
}

/// Preset first, then any explicit filter or gain flag on top.
pub fn pipeline_config(args: &Args) -> PipelineConfig {
    let preset = FilterPreset::from(args.preset);
    let (preset_filter, preset_gain_db) = preset.settings();
    let filter = FilterConfig {
        kind: args.filter.map(Into::into).unwrap_or(preset_filter.kind),
        low_hz: args.low_hz.unwrap_or(preset_filter.low_hz),
        high_hz: args.high_hz.unwrap_or(preset_filter.high_hz),
    };
    let gain = GainConfig {
        gain_db: args.gain_db.unwrap_or(preset_gain_db),
        mode: if args.auto_gain {
            GainMode::AutoPeak {
                target_peak: AUTO_GAIN_TARGET_PEAK,
            }
        } else {
            GainMode::Fixed
        },
    };
    tracing::info!(
        preset = preset.label(),
        filter = ?filter.kind,
        low_hz = filter.low_hz,
        high_hz = filter.high_hz,
        gain_db = gain.gain_db,
        "processing settings"
    );

    PipelineConfig {
        serial: SerialConfig {
            port: args.port.clone(),
            baud_rate: args.baud,
            read_timeout: Duration::from_millis(args.read_timeout_ms),
        },
        format: AudioFormat {
            sample_rate: args.sample_rate,
            chunk_samples: args.chunk_samples.max(1),
        },
        filter,
        gain,
        overload: OverloadConfig {
            volume_threshold_percent: args.volume_threshold,
            window_chunks: args.window_chunks,
            threshold_ratio: args.threshold_ratio,
            max_sync_attempts: args.max_sync_attempts,
            max_reconnect_retries: args.max_reconnects,
            ..OverloadConfig::default()
        },
        status_interval: (args.status_interval_ms > 0)
            .then(|| Duration::from_millis(args.status_interval_ms)),
    }
}

/// `recording_YYYYmmdd_HHMMSS.wav` in the working directory.
pub fn default_recording_name(at: OffsetDateTime) -> PathBuf {
    let stamp = at
        .format(format_description!(
            "[year][month][day]_[hour][minute][second]"
        ))
        .unwrap_or_else(|_| at.unix_timestamp().to_string());
    PathBuf::from(format!("recording_{stamp}.wav"))
}

fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

fn normalize_device_name(name: Option<String>) -> Option<String> {
    name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use mic_pipeline::config::FilterKind;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_follow_voice_chat_preset() {
        let cfg = pipeline_config(&parse(&["mic-bridge", "play"]));
        assert_eq!(cfg.filter, FilterConfig::default());
        assert_eq!(cfg.gain.gain_db, 20.0);
        assert_eq!(cfg.gain.mode, GainMode::Fixed);
        assert_eq!(cfg.serial.baud_rate, 1_500_000);
        assert_eq!(cfg.status_interval, Some(Duration::from_millis(500)));
    }

    #[test]
    fn explicit_flags_override_preset() {
        let args = parse(&[
            "mic-bridge",
            "--preset",
            "meeting",
            "--high-hz",
            "3400",
            "--gain-db",
            "-6",
            "record",
        ]);
        let cfg = pipeline_config(&args);
        assert_eq!(cfg.filter.kind, FilterKind::Bandpass);
        assert_eq!(cfg.filter.low_hz, 150.0);
        assert_eq!(cfg.filter.high_hz, 3400.0);
        assert_eq!(cfg.gain.gain_db, -6.0);
    }

    #[test]
    fn filter_none_and_auto_gain() {
        let args = parse(&["mic-bridge", "--filter", "none", "--auto-gain", "play"]);
        let cfg = pipeline_config(&args);
        assert_eq!(cfg.filter.kind, FilterKind::Passthrough);
        assert_eq!(
            cfg.gain.mode,
            GainMode::AutoPeak {
                target_peak: AUTO_GAIN_TARGET_PEAK
            }
        );
    }

    #[test]
    fn zero_status_interval_disables_status_line() {
        let cfg = pipeline_config(&parse(&["mic-bridge", "--status-interval-ms", "0", "play"]));
        assert_eq!(cfg.status_interval, None);
    }

    #[test]
    fn play_trims_blank_device_name() {
        let args = parse(&["mic-bridge", "play", "--device", "  "]);
        let BridgeConfig::Play(play) = BridgeConfig::from_args(&args) else {
            panic!("expected play config");
        };
        assert_eq!(play.output.device, None);
    }

    #[test]
    fn record_defaults() {
        let args = parse(&["mic-bridge", "record", "-o", "take.wav"]);
        let BridgeConfig::Record(record) = BridgeConfig::from_args(&args) else {
            panic!("expected record config");
        };
        assert_eq!(record.path, PathBuf::from("take.wav"));
        assert_eq!(record.seconds, 10.0);
    }

    #[test]
    fn recording_name_uses_timestamp() {
        let at = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(
            default_recording_name(at),
            PathBuf::from("recording_20231114_221320.wav")
        );
    }
}
