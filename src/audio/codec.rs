//! # Audio Wire Codec
//!
//! Stateless conversions between linear PCM and the base64 representation used
//! by the Live transport. Used by both directions of a voice session:
//!
//! - **Outbound**: microphone floats → clamped int16 → little-endian bytes → base64
//! - **Inbound**: base64 → bytes → de-interleaved, normalized float buffer
//!
//! ## Sample Format:
//! - **Bit Depth**: 16-bit signed PCM
//! - **Byte Order**: Little-endian
//! - **Normalization**: `sample / 32768.0`, so every value lands in [-1.0, 1.0)

use base64::{engine::general_purpose::STANDARD, Engine as _};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use thiserror::Error;

/// Scale factor between int16 PCM and normalized floats.
pub const PCM_SCALE: f32 = 32768.0;

/// Errors produced while decoding inbound audio.
///
/// These are local to a single payload: the controller drops the offending
/// chunk, logs it, and keeps the session running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("malformed base64 payload: {0}")]
    MalformedPayload(String),

    #[error("truncated audio: {len} bytes is not a multiple of {frame_bytes}")]
    TruncatedAudio { len: usize, frame_bytes: usize },

    #[error("channel count must be at least 1")]
    InvalidChannelCount,
}

/// A decoded block of audio ready to be scheduled on an output clock.
///
/// Samples are stored per channel (planar), already normalized to floats.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayableBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl PlayableBuffer {
    /// Build a buffer from planar channel data.
    ///
    /// All channels are expected to hold the same number of frames.
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Convenience constructor for a single channel.
    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self::new(sample_rate, vec![samples])
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Playback length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Average all channels down to one.
    ///
    /// The software mixer plays mono voices and fans them out to every
    /// device channel.
    pub fn to_mono(&self) -> Vec<f32> {
        match self.channels.len() {
            0 => Vec::new(),
            1 => self.channels[0].clone(),
            n => (0..self.frames())
                .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() / n as f32)
                .collect(),
        }
    }
}

/// Encode raw bytes as standard (padded) base64.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a base64 payload back into bytes.
///
/// ## Errors:
/// Returns `CodecError::MalformedPayload` when the input is not valid base64.
pub fn decode(payload: &str) -> Result<Vec<u8>, CodecError> {
    STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| CodecError::MalformedPayload(e.to_string()))
}

/// Interpret little-endian int16 PCM bytes as a playable buffer.
///
/// ## Layout:
/// Interleaved frames: `[c0, c1, ..., c0, c1, ...]`. Each sample is divided by
/// 32768.0, so `i16::MIN` maps to exactly -1.0.
///
/// ## Errors:
/// - `InvalidChannelCount` when `channel_count` is zero
/// - `TruncatedAudio` when the byte length is not a multiple of `2 * channel_count`
pub fn decode_pcm(
    bytes: &[u8],
    sample_rate: u32,
    channel_count: u16,
) -> Result<PlayableBuffer, CodecError> {
    if channel_count == 0 {
        return Err(CodecError::InvalidChannelCount);
    }

    let channel_count = channel_count as usize;
    let frame_bytes = 2 * channel_count;
    if bytes.len() % frame_bytes != 0 {
        return Err(CodecError::TruncatedAudio {
            len: bytes.len(),
            frame_bytes,
        });
    }

    let frame_count = bytes.len() / frame_bytes;
    let mut channels = vec![Vec::with_capacity(frame_count); channel_count];
    let mut cursor = Cursor::new(bytes);

    for _ in 0..frame_count {
        for channel in channels.iter_mut() {
            // Length was checked above, so every read is in bounds.
            let sample = cursor
                .read_i16::<LittleEndian>()
                .map_err(|_| CodecError::TruncatedAudio {
                    len: bytes.len(),
                    frame_bytes,
                })?;
            channel.push(sample as f32 / PCM_SCALE);
        }
    }

    Ok(PlayableBuffer::new(sample_rate, channels))
}

/// Convert one normalized float sample to int16.
///
/// `round(sample * 32768)` clamped to the int16 range. Without the clamp a
/// full-scale positive sample (1.0) would overflow to 32768.
pub fn float_to_pcm16(sample: f32) -> i16 {
    (sample * PCM_SCALE).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Serialize int16 samples as little-endian bytes.
pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        // Writing into a Vec cannot fail.
        let _ = bytes.write_i16::<LittleEndian>(sample);
    }
    bytes
}
