//! # Nexus Voice
//!
//! Realtime bidirectional voice sessions against a Live model endpoint:
//! microphone capture, PCM codec, WebSocket transport, gapless playback
//! scheduling and the controller state machine that ties them together,
//! plus a small HTTP control surface.
//!
//! ## Module Layout:
//! - **audio**: devices, capture pipeline, codec and playback scheduling
//! - **live**: wire protocol and the WebSocket transport
//! - **session**: controller state machine and the task that hosts it
//! - **config / state / error**: ambient application plumbing
//! - **health / handlers / websocket**: HTTP and WebSocket endpoints

pub mod audio;      // Capture, codec, playback (audio/ directory)
pub mod live;       // Live endpoint protocol and transport (live/ directory)
pub mod session;    // Voice controller and service (session/ directory)

pub mod config;     // Configuration management (config.rs)
pub mod error;      // HTTP error types (error.rs)
pub mod state;      // Shared application state (state.rs)
pub mod health;     // Health and metrics endpoints (health.rs)
pub mod handlers;   // HTTP request handlers (handlers/ directory)
pub mod websocket;  // Status feed WebSocket (websocket.rs)
