//! # Voice Session Module
//!
//! The state machine that ties capture, transport and playback together,
//! and the task that hosts it.
//!
//! ## Key Components:
//! - **Controller**: session lifecycle and event handling (`controller`)
//! - **Status**: the UI-facing projection and counters (`status`)
//! - **Service**: single-task host with a cloneable handle (`service`)

pub mod controller;  // Session state machine
pub mod service;     // Task host and VoiceHandle
pub mod status;      // SessionStatus and SessionStats

#[cfg(test)]
pub(crate) mod testing;

pub use controller::{VoiceConfig, VoiceController};
pub use service::{ServiceError, StartOutcome, VoiceHandle, VoiceService};
pub use status::{SessionState, SessionStatus, StatsSnapshot};
