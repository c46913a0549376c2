//! # Live Wire Protocol
//!
//! JSON messages exchanged with the Live `BidiGenerateContent` endpoint.
//!
//! ## Message Flow:
//! 1. Client → `{"setup": {...}}` (model, voice, system instruction)
//! 2. Server → `{"setupComplete": {}}`
//! 3. Client → `{"realtimeInput": {"audio": {"data", "mimeType"}}}` per frame
//! 4. Server → `{"serverContent": {"modelTurn": {"parts": [{"inlineData": ...}]}}}`
//!
//! All keys are camelCase on the wire.

use crate::audio::codec;
use crate::audio::frame::AudioFrame;
use crate::live::transport::LiveConfig;
use serde::{Deserialize, Serialize};

/// Live endpoint, without the `key` query parameter.
pub const DEFAULT_ENDPOINT: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// MIME type of outbound microphone audio.
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Response modalities supported by a voice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseModality {
    #[default]
    Audio,
}

// ── Setup ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<ResponseModality>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceSelection,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSelection {
    pub prebuilt_voice_config: PrebuiltVoice,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoice {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextPart {
    pub text: String,
}

impl SetupMessage {
    pub fn new(config: &LiveConfig) -> Self {
        Self {
            setup: Setup {
                model: config.model_path(),
                generation_config: GenerationConfig {
                    response_modalities: vec![config.response_modality],
                    speech_config: SpeechConfig {
                        voice_config: VoiceSelection {
                            prebuilt_voice_config: PrebuiltVoice {
                                voice_name: config.voice.clone(),
                            },
                        },
                    },
                },
                system_instruction: Content {
                    parts: vec![TextPart {
                        text: config.system_instruction.clone(),
                    }],
                },
            },
        }
    }
}

// ── Realtime input ─────────────────────────────────────────────────

/// Base64 payload plus its MIME type. Used in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub data: String,
    #[serde(default)]
    pub mime_type: String,
}

/// One outbound media chunk, as handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaInput {
    pub media: Blob,
}

impl MediaInput {
    /// Encode a capture frame as 16kHz PCM.
    pub fn from_frame(frame: &AudioFrame) -> Self {
        Self {
            media: Blob {
                data: codec::encode(&frame.to_le_bytes()),
                mime_type: INPUT_MIME_TYPE.to_string(),
            },
        }
    }
}

/// Wire envelope for a media chunk.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeInput {
    pub audio: Blob,
}

impl From<MediaInput> for RealtimeInputMessage {
    fn from(input: MediaInput) -> Self {
        Self {
            realtime_input: RealtimeInput { audio: input.media },
        }
    }
}

// ── Server messages ────────────────────────────────────────────────

/// Any message the server sends. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    pub interrupted: bool,
    pub turn_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct ModelTurn {
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Part {
    pub inline_data: Option<Blob>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoAway {
    pub time_left: Option<String>,
}

impl ServerMessage {
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Whether the model's current turn was cut off by user speech.
    pub fn is_interrupted(&self) -> bool {
        self.server_content.as_ref().is_some_and(|c| c.interrupted)
    }

    pub fn is_turn_complete(&self) -> bool {
        self.server_content.as_ref().is_some_and(|c| c.turn_complete)
    }

    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.server_content
            .iter()
            .filter_map(|c| c.model_turn.as_ref())
            .flat_map(|turn| turn.parts.iter())
    }

    /// Inline audio payloads, in arrival order.
    pub fn audio_parts(&self) -> impl Iterator<Item = &Blob> {
        self.parts()
            .filter_map(|part| part.inline_data.as_ref())
            .filter(|blob| blob.mime_type.is_empty() || blob.mime_type.starts_with("audio/"))
    }

    pub fn text_parts(&self) -> impl Iterator<Item = &str> {
        self.parts().filter_map(|part| part.text.as_deref())
    }
}

/// Extract the `rate=` parameter of a PCM MIME type.
///
/// `"audio/pcm;rate=24000"` → `Some(24000)`.
pub fn sample_rate_from_mime(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame::INPUT_SAMPLE_RATE;
    use serde_json::json;

    #[test]
    fn test_setup_message_shape() {
        let config = LiveConfig::default();
        let value = serde_json::to_value(SetupMessage::new(&config)).unwrap();

        assert_eq!(
            value,
            json!({
                "setup": {
                    "model": "models/gemini-2.5-flash-native-audio-preview-09-2025",
                    "generationConfig": {
                        "responseModalities": ["AUDIO"],
                        "speechConfig": {
                            "voiceConfig": {"prebuiltVoiceConfig": {"voiceName": "Zephyr"}}
                        }
                    },
                    "systemInstruction": {
                        "parts": [{"text": "You are Nexus, a calm and helpful voice assistant. Keep responses concise and human-like."}]
                    }
                }
            })
        );
    }

    #[test]
    fn test_media_input_wraps_frame_in_realtime_input() {
        let frame = AudioFrame::new(0, INPUT_SAMPLE_RATE, vec![1, -1]);
        let media = MediaInput::from_frame(&frame);
        assert_eq!(media.media.mime_type, "audio/pcm;rate=16000");
        assert_eq!(codec::decode(&media.media.data).unwrap(), vec![0x01, 0x00, 0xff, 0xff]);

        let value = serde_json::to_value(RealtimeInputMessage::from(media.clone())).unwrap();
        assert_eq!(
            value,
            json!({"realtimeInput": {"audio": {"data": media.media.data, "mimeType": "audio/pcm;rate=16000"}}})
        );
    }

    #[test]
    fn test_parse_audio_with_interruption() {
        let message = ServerMessage::parse(
            r#"{"serverContent": {
                "interrupted": true,
                "modelTurn": {"parts": [
                    {"inlineData": {"data": "AAA=", "mimeType": "audio/pcm;rate=24000"}},
                    {"text": "thinking"},
                    {"inlineData": {"data": "AQA=", "mimeType": "audio/pcm;rate=24000"}}
                ]}
            }}"#,
        )
        .unwrap();

        assert!(message.is_interrupted());
        assert!(!message.is_turn_complete());
        assert!(!message.is_setup_complete());
        let audio: Vec<&str> = message.audio_parts().map(|b| b.data.as_str()).collect();
        assert_eq!(audio, vec!["AAA=", "AQA="]);
        assert_eq!(message.text_parts().collect::<Vec<_>>(), vec!["thinking"]);
    }

    #[test]
    fn test_parse_control_messages() {
        assert!(ServerMessage::parse(r#"{"setupComplete": {}}"#)
            .unwrap()
            .is_setup_complete());

        let done = ServerMessage::parse(r#"{"serverContent": {"turnComplete": true}}"#).unwrap();
        assert!(done.is_turn_complete());
        assert_eq!(done.audio_parts().count(), 0);

        let go_away = ServerMessage::parse(r#"{"goAway": {"timeLeft": "10s"}, "usageMetadata": {}}"#).unwrap();
        assert_eq!(go_away.go_away.unwrap().time_left.as_deref(), Some("10s"));

        assert!(ServerMessage::parse("not json").is_err());
    }

    #[test]
    fn test_sample_rate_from_mime() {
        assert_eq!(sample_rate_from_mime("audio/pcm;rate=24000"), Some(24_000));
        assert_eq!(sample_rate_from_mime("audio/pcm; rate=16000"), Some(16_000));
        assert_eq!(sample_rate_from_mime("audio/pcm"), None);
        assert_eq!(sample_rate_from_mime("audio/pcm;rate=fast"), None);
    }
}
