//! # Capture Framing
//!
//! Turns the irregular sample blocks delivered by an input device into the
//! fixed-size frames the Live endpoint expects.
//!
//! ## Outbound Format:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Frame Size**: 4096 samples (256ms)
//!
//! Devices rarely deliver exactly 4096 samples per callback, and many cannot
//! open at 16kHz at all. `FrameChunker` accumulates samples across callbacks,
//! and `LinearResampler` plus `downmix` adapt whatever the device provides.

use crate::audio::codec::{float_to_pcm16, pcm16_to_le_bytes};

/// Sample rate of outbound microphone audio.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of synthesized audio returned by the model.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Samples per outbound frame.
pub const FRAME_SIZE: usize = 4096;

/// How the microphone should be opened and framed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_size: usize,
    /// Device name substring, or `None` for the host default.
    pub device: Option<String>,
}

impl Default for CaptureSpec {
    fn default() -> Self {
        Self {
            sample_rate: INPUT_SAMPLE_RATE,
            channels: 1,
            frame_size: FRAME_SIZE,
            device: None,
        }
    }
}

/// One fixed-length block of outbound int16 PCM.
///
/// Frames are immutable once produced; the transport consumes each exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    seq: u64,
    sample_rate: u32,
    samples: Vec<i16>,
}

impl AudioFrame {
    pub fn new(seq: u64, sample_rate: u32, samples: Vec<i16>) -> Self {
        Self {
            seq,
            sample_rate,
            samples,
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Little-endian byte view, ready for base64 encoding.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        pcm16_to_le_bytes(&self.samples)
    }
}

/// Accumulates converted samples and cuts them into fixed-size frames.
///
/// ## Memory:
/// Holds at most `frame_size - 1` pending samples between calls; completed
/// frames are handed back immediately and never buffered here.
#[derive(Debug)]
pub struct FrameChunker {
    frame_size: usize,
    sample_rate: u32,
    pending: Vec<i16>,
    next_seq: u64,
}

impl FrameChunker {
    pub fn new(frame_size: usize, sample_rate: u32) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            sample_rate,
            pending: Vec::with_capacity(frame_size),
            next_seq: 0,
        }
    }

    /// Push normalized float samples, returning any frames completed by them.
    pub fn push_f32(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        for &sample in samples {
            self.pending.push(float_to_pcm16(sample));
            if self.pending.len() == self.frame_size {
                frames.push(self.take_frame());
            }
        }
        frames
    }

    /// Samples waiting for the next frame boundary.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn take_frame(&mut self) -> AudioFrame {
        let samples = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
        let frame = AudioFrame::new(self.next_seq, self.sample_rate, samples);
        self.next_seq += 1;
        frame
    }
}

/// Average interleaved multi-channel samples into mono.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Streaming linear-interpolation resampler for mono audio.
///
/// Keeps the last sample of each block so interpolation is continuous across
/// device callbacks.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    step: f64,
    position: f64,
    carry: Option<f32>,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            step: from_rate.max(1) as f64 / to_rate.max(1) as f64,
            position: 0.0,
            carry: None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.step == 1.0
    }

    /// Resample one block, appending output samples to `out`.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        if input.is_empty() {
            return;
        }
        if self.is_passthrough() {
            out.extend_from_slice(input);
            return;
        }

        let mut window = Vec::with_capacity(input.len() + 1);
        if let Some(previous) = self.carry {
            window.push(previous);
        }
        window.extend_from_slice(input);

        while self.position + 1.0 < window.len() as f64 {
            let index = self.position.floor() as usize;
            let frac = (self.position - index as f64) as f32;
            out.push(window[index] * (1.0 - frac) + window[index + 1] * frac);
            self.position += self.step;
        }

        // The last sample becomes index 0 of the next window.
        self.position -= (window.len() - 1) as f64;
        self.carry = window.last().copied();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunker_emits_fixed_frames_across_callbacks() {
        let mut chunker = FrameChunker::new(4, INPUT_SAMPLE_RATE);

        assert!(chunker.push_f32(&[0.0, 0.1, 0.2]).is_empty());
        assert_eq!(chunker.pending(), 3);

        let frames = chunker.push_f32(&[0.3, 0.4, 0.5, 0.6, 0.7, 0.8]);
        assert_eq!(frames.len(), 2);
        assert_eq!(chunker.pending(), 1);

        assert_eq!(frames[0].seq(), 0);
        assert_eq!(frames[1].seq(), 1);
        assert!(frames.iter().all(|f| f.len() == 4));
        assert_eq!(frames[0].samples()[0], 0);
        assert_eq!(frames[1].samples()[3], float_to_pcm16(0.7));
    }

    #[test]
    fn test_chunker_clamps_full_scale_input() {
        let mut chunker = FrameChunker::new(2, INPUT_SAMPLE_RATE);
        let frames = chunker.push_f32(&[1.0, -1.0]);
        assert_eq!(frames[0].samples(), &[i16::MAX, i16::MIN]);
        assert_eq!(frames[0].to_le_bytes(), vec![0xff, 0x7f, 0x00, 0x80]);
    }

    #[test]
    fn test_downmix_averages_channels() {
        let mono = downmix(&[1.0, 0.0, 0.5, 0.5, -1.0, 1.0], 2);
        assert_eq!(mono, vec![0.5, 0.5, 0.0]);
        assert_eq!(downmix(&[0.25, 0.5], 1), vec![0.25, 0.5]);
    }

    #[test]
    fn test_resampler_48k_to_16k_produces_a_third() {
        let mut resampler = LinearResampler::new(48_000, INPUT_SAMPLE_RATE);
        let mut out = Vec::new();
        // Ten callbacks of 480 samples = 4800 input samples.
        for block in 0..10 {
            let input: Vec<f32> = (0..480).map(|i| ((block * 480 + i) as f32) / 4800.0).collect();
            resampler.process(&input, &mut out);
        }
        assert!((out.len() as i64 - 1600).abs() <= 1, "got {}", out.len());
        // A ramp stays a monotonic ramp through interpolation.
        assert!(out.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn test_resampler_passthrough_copies_input() {
        let mut resampler = LinearResampler::new(INPUT_SAMPLE_RATE, INPUT_SAMPLE_RATE);
        let mut out = Vec::new();
        resampler.process(&[0.1, 0.2, 0.3], &mut out);
        assert_eq!(out, vec![0.1, 0.2, 0.3]);
    }
}
