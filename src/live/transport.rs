//! # Session Transport
//!
//! The duplex link between the controller and the remote model, reduced to a
//! tagged event stream so the controller can drive it from a single task.
//!
//! ## Lifecycle:
//! ```text
//! connect() → Pending ──Open──→ Open ──Close/Error──→ Closed
//!                 └──────────Close/Error────────────────┘
//! ```
//!
//! `LiveSession` enforces the rules a raw `SessionLink` cannot: frames are
//! only accepted once `Open` has been seen, `Open` is reported once, and
//! nothing is yielded after the first `Close` or `Error`.

use crate::audio::frame::AudioFrame;
use crate::live::protocol::{MediaInput, ResponseModality, ServerMessage};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";
pub const DEFAULT_VOICE: &str = "Zephyr";
pub const DEFAULT_SYSTEM_INSTRUCTION: &str =
    "You are Nexus, a calm and helpful voice assistant. Keep responses concise and human-like.";

/// Fixed per-session configuration sent in the setup message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveConfig {
    pub model: String,
    pub response_modality: ResponseModality,
    pub voice: String,
    pub system_instruction: String,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            response_modality: ResponseModality::Audio,
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
        }
    }
}

impl LiveConfig {
    /// Model resource name as the endpoint expects it (`models/<id>`).
    pub fn model_path(&self) -> String {
        if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        }
    }
}

/// Transport failures. Fatal to the session, except `NotOpen` and `Closed`
/// which only reject a single send.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("session is not open")]
    NotOpen,

    #[error("session is closed")]
    Closed,

    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connection lost: {0}")]
    Connection(String),
}

/// Lifecycle events, consumed one at a time.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open,
    Message(ServerMessage),
    Error(TransportError),
    Close { reason: String },
}

/// Requests from the session to the connection task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Media(MediaInput),
    Close,
}

/// Raw channel pair returned by a `Connector`.
#[derive(Debug)]
pub struct SessionLink {
    pub outbound: mpsc::UnboundedSender<Outbound>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl SessionLink {
    /// Two linked ends: the link, plus the connection side that feeds it.
    pub fn pair() -> (
        Self,
        mpsc::UnboundedReceiver<Outbound>,
        mpsc::UnboundedSender<TransportEvent>,
    ) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound: outbound_tx,
                events: events_rx,
            },
            outbound_rx,
            events_tx,
        )
    }
}

/// Opens sessions to a remote voice endpoint.
pub trait Connector: Send + Sync {
    /// Begin connecting. Returns immediately with a pending link; the outcome
    /// arrives as the first `Open`, `Error` or `Close` event.
    fn connect(&self, config: LiveConfig) -> SessionLink;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Pending,
    Open,
    Closed,
}

/// A session link with its lifecycle rules enforced.
#[derive(Debug)]
pub struct LiveSession {
    outbound: mpsc::UnboundedSender<Outbound>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    state: LinkState,
    finished: bool,
}

impl LiveSession {
    pub fn new(link: SessionLink) -> Self {
        Self {
            outbound: link.outbound,
            events: link.events,
            state: LinkState::Pending,
            finished: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == LinkState::Open
    }

    /// Next lifecycle event, or `None` once the session is over.
    ///
    /// Cancel-safe: state only changes after an event has been received.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        loop {
            if self.finished {
                return None;
            }

            let Some(event) = self.events.recv().await else {
                self.finished = true;
                if self.state == LinkState::Closed {
                    return None;
                }
                self.state = LinkState::Closed;
                return Some(TransportEvent::Close {
                    reason: "connection task ended".to_string(),
                });
            };

            match event {
                TransportEvent::Open => {
                    if self.state != LinkState::Pending {
                        debug!("Ignoring repeated open event");
                        continue;
                    }
                    self.state = LinkState::Open;
                    return Some(TransportEvent::Open);
                }
                TransportEvent::Message(message) => {
                    return Some(TransportEvent::Message(message));
                }
                terminal @ (TransportEvent::Error(_) | TransportEvent::Close { .. }) => {
                    self.state = LinkState::Closed;
                    self.finished = true;
                    return Some(terminal);
                }
            }
        }
    }

    /// Queue one frame for sending. Fire-and-forget.
    pub fn send(&self, frame: &AudioFrame) -> Result<(), TransportError> {
        match self.state {
            LinkState::Pending => Err(TransportError::NotOpen),
            LinkState::Closed => Err(TransportError::Closed),
            LinkState::Open => self
                .outbound
                .send(Outbound::Media(MediaInput::from_frame(frame)))
                .map_err(|_| TransportError::Closed),
        }
    }

    /// Ask the connection to close. Idempotent; no events follow.
    pub fn close(&mut self) {
        if self.state != LinkState::Closed {
            let _ = self.outbound.send(Outbound::Close);
            self.state = LinkState::Closed;
        }
        self.finished = true;
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame::INPUT_SAMPLE_RATE;

    fn frame(seq: u64) -> AudioFrame {
        AudioFrame::new(seq, INPUT_SAMPLE_RATE, vec![0; 8])
    }

    #[tokio::test]
    async fn test_send_before_open_is_rejected_and_not_queued() {
        let (link, mut outbound, events) = SessionLink::pair();
        let mut session = LiveSession::new(link);

        assert_eq!(session.send(&frame(0)), Err(TransportError::NotOpen));
        assert!(outbound.try_recv().is_err());

        events.send(TransportEvent::Open).unwrap();
        assert_eq!(session.next_event().await, Some(TransportEvent::Open));

        session.send(&frame(1)).unwrap();
        assert!(matches!(outbound.try_recv(), Ok(Outbound::Media(_))));
    }

    #[tokio::test]
    async fn test_open_is_delivered_once() {
        let (link, _outbound, events) = SessionLink::pair();
        let mut session = LiveSession::new(link);

        events.send(TransportEvent::Open).unwrap();
        events.send(TransportEvent::Open).unwrap();
        events
            .send(TransportEvent::Message(ServerMessage::default()))
            .unwrap();

        assert_eq!(session.next_event().await, Some(TransportEvent::Open));
        assert_eq!(
            session.next_event().await,
            Some(TransportEvent::Message(ServerMessage::default()))
        );
    }

    #[tokio::test]
    async fn test_nothing_follows_a_terminal_event() {
        let (link, _outbound, events) = SessionLink::pair();
        let mut session = LiveSession::new(link);

        events.send(TransportEvent::Open).unwrap();
        events
            .send(TransportEvent::Error(TransportError::Connection("reset".into())))
            .unwrap();
        events
            .send(TransportEvent::Message(ServerMessage::default()))
            .unwrap();

        assert_eq!(session.next_event().await, Some(TransportEvent::Open));
        assert!(matches!(session.next_event().await, Some(TransportEvent::Error(_))));
        assert_eq!(session.next_event().await, None);
        assert_eq!(session.send(&frame(0)), Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_sends_one_close_request() {
        let (link, mut outbound, _events) = SessionLink::pair();
        let mut session = LiveSession::new(link);

        session.close();
        session.close();
        drop(session);

        assert_eq!(outbound.try_recv(), Ok(Outbound::Close));
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_connection_reads_as_close() {
        let (link, _outbound, events) = SessionLink::pair();
        let mut session = LiveSession::new(link);
        drop(events);

        assert!(matches!(
            session.next_event().await,
            Some(TransportEvent::Close { .. })
        ));
        assert_eq!(session.next_event().await, None);
    }

    #[test]
    fn test_model_path_adds_prefix_once() {
        let mut config = LiveConfig::default();
        assert_eq!(config.model_path(), format!("models/{}", DEFAULT_MODEL));
        config.model = "models/custom".to_string();
        assert_eq!(config.model_path(), "models/custom");
    }
}
