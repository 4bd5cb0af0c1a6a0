//! Output device discovery and stream configuration.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Largest fixed callback buffer requested from a device.
const MAX_BUFFER_FRAMES: u32 = 16_384;

/// Pick the first output device whose name contains `needle` (case-insensitive), or the host
/// default when no needle is given.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let mut devices = host.output_devices().context("no output devices")?;
        return devices
            .find(|d| {
                d.description()
                    .map(|desc| matches_device_name(&desc.name(), needle))
                    .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("no output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("no default output device"))
}

/// Human-readable device name for logs.
pub fn device_name(device: &cpal::Device) -> String {
    device
        .description()
        .map(|d| d.name().to_string())
        .unwrap_or_else(|_| "<unknown>".to_string())
}

/// Choose an output configuration as close to `target_rate` as the device allows.
///
/// A range containing the target wins outright; otherwise the nearest supported rate is used
/// and the caller resamples. Ties prefer float output.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(Candidate, cpal::SupportedStreamConfigRange)> = None;
    for range in device
        .supported_output_configs()
        .context("query output configs")?
    {
        let rate = clamp_rate(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let candidate = Candidate {
            distance: rate.abs_diff(target_rate),
            rate,
            format_rank: sample_format_rank(range.sample_format()),
        };
        if best
            .as_ref()
            .map(|(b, _)| candidate.is_better_than(b))
            .unwrap_or(true)
        {
            best = Some((candidate, range));
        }
    }

    let (candidate, range) = best.ok_or_else(|| anyhow!("no supported output configs"))?;
    Ok(range.with_sample_rate(candidate.rate))
}

/// Prefer the largest advertised fixed buffer (capped) to ride out scheduling hiccups.
///
/// `None` leaves the choice to the device.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed(cap_buffer_frames(*min, *max)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Print the host's output devices, one per line.
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let devices = host.output_devices().context("no output devices")?;
    for (i, d) in devices.enumerate() {
        println!("#{i}: {}", device_name(&d));
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Candidate {
    distance: u32,
    rate: u32,
    format_rank: u8,
}

impl Candidate {
    fn is_better_than(&self, other: &Candidate) -> bool {
        (self.distance, std::cmp::Reverse(self.rate), self.format_rank)
            < (other.distance, std::cmp::Reverse(other.rate), other.format_rank)
    }
}

fn clamp_rate(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn cap_buffer_frames(min: u32, max: u32) -> u32 {
    if max > MAX_BUFFER_FRAMES {
        min.max(MAX_BUFFER_FRAMES)
    } else {
        max
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    !needle.is_empty() && name.to_lowercase().contains(&needle.to_lowercase())
}
