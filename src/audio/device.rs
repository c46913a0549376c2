//! # Audio Device Detection and Selection
//!
//! Finds input/output devices on the host and picks a stream configuration
//! as close as possible to what a voice session needs. When a device cannot
//! open at the requested rate or channel count, the caller falls back to the
//! device default and converts in software.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleRate, SupportedStreamConfig, SupportedStreamConfigRange};
use thiserror::Error;
use tracing::{debug, info};

/// Failures while acquiring an audio device.
///
/// Fatal to session start: the controller reports "Access Denied" and never
/// reaches Active.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceAccessError {
    #[error("no default {0} device available")]
    NoDefaultDevice(Direction),

    #[error("{direction} device not found: {name}")]
    DeviceNotFound { direction: Direction, name: String },

    #[error("failed to enumerate audio devices: {0}")]
    Enumeration(String),

    #[error("unsupported stream configuration: {0}")]
    UnsupportedConfig(String),

    #[error("failed to open audio stream: {0}")]
    Stream(String),
}

/// Which side of the audio path a device serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// Find a device by name substring, or the host default when `name` is
/// `None` or `"default"`.
pub fn find_device(
    host: &cpal::Host,
    direction: Direction,
    name: Option<&str>,
) -> Result<cpal::Device, DeviceAccessError> {
    let wanted = match name {
        None | Some("default") | Some("") => {
            let device = match direction {
                Direction::Input => host.default_input_device(),
                Direction::Output => host.default_output_device(),
            };
            return device.ok_or(DeviceAccessError::NoDefaultDevice(direction));
        }
        Some(name) => name,
    };

    let devices: Vec<cpal::Device> = match direction {
        Direction::Input => host.input_devices().map(|d| d.collect()),
        Direction::Output => host.output_devices().map(|d| d.collect()),
    }
    .map_err(|e| DeviceAccessError::Enumeration(e.to_string()))?;

    for device in devices {
        if let Ok(device_name) = device.name() {
            if device_name.contains(wanted) {
                info!("Using {} device: {}", direction, device_name);
                return Ok(device);
            }
        }
    }

    Err(DeviceAccessError::DeviceNotFound {
        direction,
        name: wanted.to_string(),
    })
}

/// Names of every device the default host exposes in one direction.
pub fn list_devices(direction: Direction) -> Vec<String> {
    let host = cpal::default_host();
    let devices = match direction {
        Direction::Input => host.input_devices().map(|d| d.collect::<Vec<_>>()),
        Direction::Output => host.output_devices().map(|d| d.collect::<Vec<_>>()),
    };

    devices
        .map(|devices| devices.iter().filter_map(|d| d.name().ok()).collect())
        .unwrap_or_default()
}

/// Pick a supported configuration for the requested rate and channel count.
///
/// ## Preference order:
/// 1. Exact channel count with the rate inside the supported range
/// 2. Any channel count with the rate inside the supported range
/// 3. The device default (the caller resamples and down-mixes)
pub fn choose_stream_config(
    ranges: impl IntoIterator<Item = SupportedStreamConfigRange>,
    fallback: SupportedStreamConfig,
    sample_rate: u32,
    channels: u16,
) -> SupportedStreamConfig {
    let rate = SampleRate(sample_rate);
    let candidates: Vec<SupportedStreamConfigRange> = ranges
        .into_iter()
        .filter(|r| r.min_sample_rate() <= rate && r.max_sample_rate() >= rate)
        .collect();

    if let Some(exact) = candidates.iter().find(|r| r.channels() == channels) {
        return exact.clone().with_sample_rate(rate);
    }
    if let Some(any) = candidates.into_iter().next() {
        return any.with_sample_rate(rate);
    }

    debug!(
        "No config at {} Hz / {} ch, falling back to device default {} Hz / {} ch",
        sample_rate,
        channels,
        fallback.sample_rate().0,
        fallback.channels()
    );
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpal::{SampleFormat, SupportedBufferSize};

    fn range(channels: u16, min: u32, max: u32) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            channels,
            SampleRate(min),
            SampleRate(max),
            SupportedBufferSize::Unknown,
            SampleFormat::F32,
        )
    }

    fn fallback() -> SupportedStreamConfig {
        SupportedStreamConfig::new(
            2,
            SampleRate(48_000),
            SupportedBufferSize::Unknown,
            SampleFormat::F32,
        )
    }

    #[test]
    fn test_prefers_exact_channel_match() {
        let chosen = choose_stream_config(
            vec![range(2, 8_000, 48_000), range(1, 8_000, 48_000)],
            fallback(),
            16_000,
            1,
        );
        assert_eq!(chosen.channels(), 1);
        assert_eq!(chosen.sample_rate(), SampleRate(16_000));
    }

    #[test]
    fn test_accepts_other_channel_count_at_right_rate() {
        let chosen = choose_stream_config(vec![range(2, 8_000, 48_000)], fallback(), 24_000, 1);
        assert_eq!(chosen.channels(), 2);
        assert_eq!(chosen.sample_rate(), SampleRate(24_000));
    }

    #[test]
    fn test_falls_back_to_default_when_rate_unsupported() {
        let chosen = choose_stream_config(vec![range(1, 44_100, 48_000)], fallback(), 16_000, 1);
        assert_eq!(chosen, fallback());
    }
}
