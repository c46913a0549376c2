//! # Session Status
//!
//! The projection of controller state that the host UI sees, plus the
//! counters behind the metrics endpoint.
//!
//! ## State Machine:
//! ```text
//! Standby ──start──→ Connecting ──open──→ Active ──stop/close──→ Standby
//!                        │                  │
//!                        └──failure──→ Error ←──transport error──┘
//! ```
//! `Error` accepts a new `start` (→ Connecting) or `stop` (→ Standby).

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const STANDBY_MESSAGE: &str = "Standby";
pub const CONNECTING_MESSAGE: &str = "Initializing...";
pub const ACTIVE_MESSAGE: &str = "Nexus is listening...";
pub const ACCESS_DENIED_MESSAGE: &str = "Access Denied";
pub const OUTPUT_UNAVAILABLE_MESSAGE: &str = "Audio output unavailable";

/// Lifecycle state of the voice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Standby,
    Connecting,
    Active,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Standby => "standby",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Error => "error",
        }
    }

    /// Whether a session currently holds devices or a connection.
    pub fn is_busy(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Active)
    }
}

/// Status published on every transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SessionStatus {
    pub fn new(state: SessionState, message: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            state,
            message: message.into(),
            session_id,
            updated_at: Utc::now(),
        }
    }

    pub fn standby() -> Self {
        Self::new(SessionState::Standby, STANDBY_MESSAGE, None)
    }

    pub fn connecting(session_id: String) -> Self {
        Self::new(SessionState::Connecting, CONNECTING_MESSAGE, Some(session_id))
    }

    pub fn active(session_id: String) -> Self {
        Self::new(SessionState::Active, ACTIVE_MESSAGE, Some(session_id))
    }

    pub fn error(message: impl Into<String>, session_id: Option<String>) -> Self {
        Self::new(SessionState::Error, message, session_id)
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::standby()
    }
}

/// Running counters across all sessions of one controller.
///
/// Shared with the capture thread (dropped frames) and the HTTP layer.
#[derive(Debug, Default)]
pub struct SessionStats {
    pub sessions_started: AtomicU64,
    pub sessions_failed: AtomicU64,
    pub frames_sent: AtomicU64,
    pub frames_dropped: Arc<AtomicU64>,
    pub chunks_scheduled: AtomicU64,
    pub payloads_dropped: AtomicU64,
    pub interruptions: AtomicU64,
    pub transport_errors: AtomicU64,
}

/// Point-in-time copy of `SessionStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub sessions_started: u64,
    pub sessions_failed: u64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub chunks_scheduled: u64,
    pub payloads_dropped: u64,
    pub interruptions: u64,
    pub transport_errors: u64,
}

impl SessionStats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            chunks_scheduled: self.chunks_scheduled.load(Ordering::Relaxed),
            payloads_dropped: self.payloads_dropped.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
        }
    }
}
