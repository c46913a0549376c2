//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - Default values (built into the code)
//! - An optional `config` file (`config.toml`, `config.json`, ...)
//! - Environment variables (with the `APP` prefix)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST`, `PORT`, `GEMINI_API_KEY` / `API_KEY`
//! 2. Environment variables (`APP__SERVER__PORT`, `APP__LIVE__VOICE`, ...)
//! 3. Configuration file
//! 4. Default values (defined in the Default impl)
//!
//! ## Rust Concepts Used:
//! - **Serde**: the same structs are read from TOML/env and written as JSON
//! - **Layered builder**: each `add_source` overrides the ones before it

use crate::audio::frame::{CaptureSpec, FRAME_SIZE, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use crate::live::protocol::{ResponseModality, DEFAULT_ENDPOINT};
use crate::live::transport::{LiveConfig, DEFAULT_MODEL, DEFAULT_SYSTEM_INSTRUCTION, DEFAULT_VOICE};
use crate::session::controller::VoiceConfig;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::env;
use std::ops::RangeInclusive;

/// Sample rates a capture or playback stream may be configured with.
pub const SAMPLE_RATE_RANGE: RangeInclusive<u32> = 8_000..=192_000;

/// Samples per outbound frame; 65536 samples is about four seconds at 16kHz.
pub const FRAME_SIZE_RANGE: RangeInclusive<usize> = 1..=65_536;

/// Main application configuration.
///
/// ## Sections:
/// - **server**: where the control surface listens
/// - **live**: remote endpoint, credentials, model and voice
/// - **audio**: sample rates, frame size and device selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub live: LiveSettings,
    pub audio: AudioSettings,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: only accept connections from this machine
/// - `host = "0.0.0.0"`: accept connections from any address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Remote model settings.
///
/// `api_key` is never returned by the config endpoint; see `AppConfig::redacted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveSettings {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
}

/// Audio pipeline settings.
///
/// Device names are matched as substrings; `"default"` selects the host default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSettings {
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub frame_size: usize,
    pub input_device: String,
    pub output_device: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            live: LiveSettings {
                endpoint: DEFAULT_ENDPOINT.to_string(),
                api_key: String::new(),
                model: DEFAULT_MODEL.to_string(),
                voice: DEFAULT_VOICE.to_string(),
                system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            },
            audio: AudioSettings {
                input_sample_rate: INPUT_SAMPLE_RATE,
                output_sample_rate: OUTPUT_SAMPLE_RATE,
                frame_size: FRAME_SIZE,
                input_device: "default".to_string(),
                output_device: "default".to_string(),
            },
        }
    }
}

fn device_selector(name: &str) -> Option<String> {
    match name.trim() {
        "" | "default" => None,
        name => Some(name.to_string()),
    }
}

impl AppConfig {
    /// Load configuration from defaults, the optional config file and the
    /// environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP__SERVER__PORT=3000`
    /// - `APP__LIVE__VOICE=Puck`
    /// - `APP__AUDIO__INPUT_DEVICE=USB`
    /// - `GEMINI_API_KEY=...` (or `API_KEY=...`)
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var("GEMINI_API_KEY").or_else(|_| env::var("API_KEY")) {
            settings = settings.set_override("live.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Check that the configuration can actually run a session.
    ///
    /// A missing API key is not an error here: the server still starts and
    /// sessions fail with a connection error until a key is supplied.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if !(self.live.endpoint.starts_with("wss://") || self.live.endpoint.starts_with("ws://")) {
            return Err(anyhow::anyhow!("Live endpoint must be a ws:// or wss:// URL"));
        }

        if self.live.model.trim().is_empty() {
            return Err(anyhow::anyhow!("Model cannot be empty"));
        }

        if self.live.voice.trim().is_empty() {
            return Err(anyhow::anyhow!("Voice cannot be empty"));
        }

        for (name, rate) in [
            ("Input", self.audio.input_sample_rate),
            ("Output", self.audio.output_sample_rate),
        ] {
            if !SAMPLE_RATE_RANGE.contains(&rate) {
                return Err(anyhow::anyhow!(
                    "{} sample rate must be between {} and {} Hz, got {}",
                    name,
                    SAMPLE_RATE_RANGE.start(),
                    SAMPLE_RATE_RANGE.end(),
                    rate
                ));
            }
        }

        if !FRAME_SIZE_RANGE.contains(&self.audio.frame_size) {
            return Err(anyhow::anyhow!(
                "Frame size must be between {} and {} samples, got {}",
                FRAME_SIZE_RANGE.start(),
                FRAME_SIZE_RANGE.end(),
                self.audio.frame_size
            ));
        }

        Ok(())
    }

    /// Apply a partial JSON update, e.g. `{"live": {"voice": "Puck"}}`.
    ///
    /// Only the fields present are changed; the result is validated.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = u16::try_from(port)
                    .map_err(|_| anyhow::anyhow!("Server port out of range: {}", port))?;
            }
        }

        if let Some(live) = partial_config.get("live") {
            let text = |key: &str| live.get(key).and_then(|v| v.as_str()).map(str::to_string);
            if let Some(endpoint) = text("endpoint") {
                self.live.endpoint = endpoint;
            }
            if let Some(api_key) = text("api_key") {
                self.live.api_key = api_key;
            }
            if let Some(model) = text("model") {
                self.live.model = model;
            }
            if let Some(voice) = text("voice") {
                self.live.voice = voice;
            }
            if let Some(instruction) = text("system_instruction") {
                self.live.system_instruction = instruction;
            }
        }

        if let Some(audio) = partial_config.get("audio") {
            if let Some(rate) = audio.get("input_sample_rate").and_then(|v| v.as_u64()) {
                self.audio.input_sample_rate = u32::try_from(rate)
                    .map_err(|_| anyhow::anyhow!("Input sample rate out of range: {}", rate))?;
            }
            if let Some(rate) = audio.get("output_sample_rate").and_then(|v| v.as_u64()) {
                self.audio.output_sample_rate = u32::try_from(rate)
                    .map_err(|_| anyhow::anyhow!("Output sample rate out of range: {}", rate))?;
            }
            if let Some(frame_size) = audio.get("frame_size").and_then(|v| v.as_u64()) {
                self.audio.frame_size = usize::try_from(frame_size)
                    .map_err(|_| anyhow::anyhow!("Frame size out of range: {}", frame_size))?;
            }
            if let Some(device) = audio.get("input_device").and_then(|v| v.as_str()) {
                self.audio.input_device = device.to_string();
            }
            if let Some(device) = audio.get("output_device").and_then(|v| v.as_str()) {
                self.audio.output_device = device.to_string();
            }
        }

        self.validate()?;
        Ok(())
    }

    pub fn has_api_key(&self) -> bool {
        !self.live.api_key.trim().is_empty()
    }

    /// JSON view of the configuration with the API key masked.
    pub fn redacted(&self) -> serde_json::Value {
        json!({
            "server": {
                "host": self.server.host,
                "port": self.server.port
            },
            "live": {
                "endpoint": self.live.endpoint,
                "api_key": if self.has_api_key() { "********" } else { "" },
                "model": self.live.model,
                "voice": self.live.voice,
                "system_instruction": self.live.system_instruction
            },
            "audio": {
                "input_sample_rate": self.audio.input_sample_rate,
                "output_sample_rate": self.audio.output_sample_rate,
                "frame_size": self.audio.frame_size,
                "input_device": self.audio.input_device,
                "output_device": self.audio.output_device
            }
        })
    }

    /// Session configuration derived from these settings.
    pub fn voice_config(&self) -> VoiceConfig {
        VoiceConfig {
            live: LiveConfig {
                model: self.live.model.clone(),
                response_modality: ResponseModality::Audio,
                voice: self.live.voice.clone(),
                system_instruction: self.live.system_instruction.clone(),
            },
            capture: CaptureSpec {
                sample_rate: self.audio.input_sample_rate,
                channels: 1,
                frame_size: self.audio.frame_size,
                device: device_selector(&self.audio.input_device),
            },
            output_sample_rate: self.audio.output_sample_rate,
        }
    }

    pub fn output_device(&self) -> Option<String> {
        device_selector(&self.audio.output_device)
    }
}
