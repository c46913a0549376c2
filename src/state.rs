//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket actor.
//!
//! ## Key Rust Concepts:
//! - **Arc<RwLock<AppConfig>>**: many readers, one writer, shared across worker threads
//! - **VoiceHandle**: already cheap to clone; the voice controller itself lives on its own task
//! - **Instant**: a monotonic start time for uptime reporting
//!
//! Session counters live in the voice service (`VoiceHandle::stats`), so
//! nothing here needs per-request bookkeeping.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::session::VoiceHandle;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// State shared by all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Current configuration; updates apply to the next voice session
    pub config: Arc<RwLock<AppConfig>>,

    /// Control channel to the voice session service
    pub voice: VoiceHandle,

    /// When the server started
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, voice: VoiceHandle) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            voice,
            start_time: Instant::now(),
        }
    }

    /// Copy of the current configuration.
    ///
    /// Cloning releases the lock immediately so readers never block each other for long.
    pub fn get_config(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Validate and store a new configuration, then hand the session part to
    /// the voice service.
    pub async fn update_config(&self, new_config: AppConfig) -> AppResult<()> {
        new_config
            .validate()
            .map_err(|e| AppError::ValidationError(e.to_string()))?;

        let voice_config = new_config.voice_config();
        *self
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = new_config;

        self.voice.reconfigure(voice_config).await?;
        Ok(())
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
