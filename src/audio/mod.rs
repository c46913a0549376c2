//! # Audio Module
//!
//! Everything between the physical devices and the Live transport.
//!
//! ## Key Components:
//! - **Capture**: microphone stream → 16kHz mono int16 frames (`capture`, `frame`)
//! - **Codec**: base64 and PCM conversions for the wire (`codec`)
//! - **Playback**: gap-free scheduling of model audio on an output clock (`playback`, `output`)
//! - **Devices**: host device lookup and stream configuration (`device`)
//!
//! ## Audio Formats:
//! - **Outbound**: 16kHz, 16-bit PCM, mono, 4096-sample frames
//! - **Inbound**: 24kHz (unless the MIME type says otherwise), 16-bit PCM, mono

pub mod capture;  // Microphone acquisition and framing pipeline
pub mod codec;    // Base64 and PCM conversions
pub mod device;   // Device lookup and stream config selection
pub mod frame;    // Fixed-size frames, down-mixing, resampling
pub mod output;   // cpal speaker output and software mixer
pub mod playback; // Playback cursor and active source tracking

pub use capture::{AudioInput, CpalInput, FrameSink, Microphone};
pub use codec::{CodecError, PlayableBuffer};
pub use device::DeviceAccessError;
pub use frame::{AudioFrame, CaptureSpec};
pub use output::CpalOutputDevice;
pub use playback::{AudioOutput, OutputDevice, PlaybackScheduler, SourceId};
