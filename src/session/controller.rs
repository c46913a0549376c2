//! # Voice Session Controller
//!
//! Owns every resource of a live voice conversation and is the only place
//! where device and transport failures turn into user-visible status.
//!
//! ## Session Lifecycle:
//! 1. **start**: publish Connecting, acquire the microphone, open the output
//!    clock, begin connecting
//! 2. **Open**: wire capture frames into the transport, publish Active
//! 3. **Message**: interrupt playback if asked, then schedule every audio part
//! 4. **stop / Close / Error**: close the transport, release the microphone,
//!    tear down playback
//!
//! ## Single-Task Dispatch:
//! Transport events, capture frames and playback completions are multiplexed
//! by `next_input` and handled one at a time by `dispatch`. Nothing else
//! touches controller state, so no locking is needed.

use crate::audio::capture::{AudioInput, FrameSink, Microphone};
use crate::audio::codec::{self, PlayableBuffer};
use crate::audio::frame::{AudioFrame, CaptureSpec, OUTPUT_SAMPLE_RATE};
use crate::audio::playback::{OutputDevice, PlaybackScheduler, SourceId};
use crate::live::protocol::{sample_rate_from_mime, ServerMessage};
use crate::live::transport::{Connector, LiveConfig, LiveSession, TransportError, TransportEvent};
use crate::session::status::{
    SessionState, SessionStats, SessionStatus, ACCESS_DENIED_MESSAGE, OUTPUT_UNAVAILABLE_MESSAGE,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Everything needed to start a session. Changes apply to the next session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceConfig {
    pub live: LiveConfig,
    pub capture: CaptureSpec,
    /// Rate assumed for inbound audio whose MIME type carries none.
    pub output_sample_rate: u32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            live: LiveConfig::default(),
            capture: CaptureSpec::default(),
            output_sample_rate: OUTPUT_SAMPLE_RATE,
        }
    }
}

/// One unit of work for the controller task.
#[derive(Debug)]
pub enum ControllerInput {
    Transport(TransportEvent),
    Frame(AudioFrame),
    SourceEnded(SourceId),
}

struct Session {
    id: Uuid,
    link: LiveSession,
    opened: bool,
    microphone: Box<dyn Microphone>,
    /// Handed to the microphone on Open.
    frames_tx: Option<mpsc::Sender<AudioFrame>>,
    frames: mpsc::Receiver<AudioFrame>,
    scheduler: PlaybackScheduler,
    ended: mpsc::UnboundedReceiver<SourceId>,
}

/// The voice session state machine.
pub struct VoiceController {
    config: VoiceConfig,
    input: Arc<dyn AudioInput>,
    output: Arc<dyn OutputDevice>,
    connector: Arc<dyn Connector>,
    status: watch::Sender<SessionStatus>,
    stats: Arc<SessionStats>,
    session: Option<Session>,
}

impl VoiceController {
    pub fn new(
        config: VoiceConfig,
        input: Arc<dyn AudioInput>,
        output: Arc<dyn OutputDevice>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (status, _) = watch::channel(SessionStatus::standby());
        Self {
            config,
            input,
            output,
            connector,
            status,
            stats: Arc::new(SessionStats::default()),
            session: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        self.stats.clone()
    }

    pub fn config(&self) -> &VoiceConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: VoiceConfig) {
        info!(model = %config.live.model, voice = %config.live.voice, "Voice configuration updated");
        self.config = config;
    }

    /// Begin a new session.
    ///
    /// Returns `false` without side effects when a session is already
    /// connecting or active. Device failures are reported through status,
    /// not the return value.
    pub fn start(&mut self) -> bool {
        if self.state().is_busy() {
            warn!("Start ignored, a session is already {}", self.state().as_str());
            return false;
        }

        let id = Uuid::new_v4();
        SessionStats::bump(&self.stats.sessions_started);
        self.publish(SessionStatus::connecting(id.to_string()));
        info!(session_id = %id, "Starting voice session");

        let mut microphone = match self.input.acquire(&self.config.capture) {
            Ok(microphone) => microphone,
            Err(e) => {
                warn!(session_id = %id, error = %e, "Microphone unavailable");
                self.fail(id, ACCESS_DENIED_MESSAGE.to_string());
                return true;
            }
        };

        let (ended_tx, ended) = mpsc::unbounded_channel();
        let output = match self.output.open(self.config.output_sample_rate, ended_tx) {
            Ok(output) => output,
            Err(e) => {
                warn!(session_id = %id, error = %e, "Speaker unavailable");
                microphone.release();
                self.fail(id, OUTPUT_UNAVAILABLE_MESSAGE.to_string());
                return true;
            }
        };

        let link = LiveSession::new(self.connector.connect(self.config.live.clone()));
        // Room for one frame: the capture side never runs more than a frame ahead.
        let (frames_tx, frames) = mpsc::channel(1);

        self.session = Some(Session {
            id,
            link,
            opened: false,
            microphone,
            frames_tx: Some(frames_tx),
            frames,
            scheduler: PlaybackScheduler::new(output),
            ended,
        });
        true
    }

    /// End the session and release every resource. Idempotent.
    ///
    /// The microphone and output clock are released before this returns;
    /// the network close may finish later.
    pub fn stop(&mut self) {
        let had_session = self.teardown().is_some();
        if had_session || self.state() != SessionState::Standby {
            self.publish(SessionStatus::standby());
        }
    }

    /// Wait for the next input of the current session.
    ///
    /// Never resolves while there is no session. Cancel-safe, so it can sit
    /// in a `select!` next to a command channel.
    pub async fn next_input(&mut self) -> ControllerInput {
        let Some(session) = self.session.as_mut() else {
            return std::future::pending().await;
        };

        tokio::select! {
            Some(event) = session.link.next_event() => ControllerInput::Transport(event),
            Some(frame) = session.frames.recv() => ControllerInput::Frame(frame),
            Some(id) = session.ended.recv() => ControllerInput::SourceEnded(id),
            else => std::future::pending().await,
        }
    }

    pub fn dispatch(&mut self, input: ControllerInput) {
        match input {
            ControllerInput::Transport(TransportEvent::Open) => self.on_open(),
            ControllerInput::Transport(TransportEvent::Message(message)) => self.on_message(&message),
            ControllerInput::Transport(TransportEvent::Error(error)) => self.on_transport_error(error),
            ControllerInput::Transport(TransportEvent::Close { reason }) => self.on_close(reason),
            ControllerInput::Frame(frame) => self.on_frame(frame),
            ControllerInput::SourceEnded(id) => {
                if let Some(session) = self.session.as_mut() {
                    session.scheduler.source_ended(id);
                }
            }
        }
    }

    fn on_open(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.opened = true;
        if let Some(frames_tx) = session.frames_tx.take() {
            let sink = FrameSink::new(frames_tx, self.stats.frames_dropped.clone());
            session.microphone.start(sink);
        }
        let id = session.id;
        info!(session_id = %id, "Voice session active");
        self.publish(SessionStatus::active(id.to_string()));
    }

    fn on_message(&mut self, message: &ServerMessage) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if let Some(go_away) = &message.go_away {
            warn!(session_id = %session.id, time_left = ?go_away.time_left, "Server is about to close the session");
        }

        // Barge-in: silence the old turn before anything in this message plays.
        if message.is_interrupted() {
            let stopped = session.scheduler.interrupt();
            SessionStats::bump(&self.stats.interruptions);
            info!(session_id = %session.id, stopped, "Model interrupted by user speech");
        }

        for blob in message.audio_parts() {
            let sample_rate =
                sample_rate_from_mime(&blob.mime_type).unwrap_or(self.config.output_sample_rate);
            match decode_chunk(&blob.data, sample_rate) {
                Ok(buffer) => {
                    if session.scheduler.enqueue(buffer).is_some() {
                        SessionStats::bump(&self.stats.chunks_scheduled);
                    }
                }
                Err(e) => {
                    SessionStats::bump(&self.stats.payloads_dropped);
                    warn!(session_id = %session.id, error = %e, "Dropping undecodable audio payload");
                }
            }
        }

        for text in message.text_parts() {
            debug!(session_id = %session.id, text, "Model text");
        }
        if message.is_turn_complete() {
            debug!(session_id = %session.id, "Model turn complete");
        }
    }

    fn on_frame(&mut self, frame: AudioFrame) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        match session.link.send(&frame) {
            Ok(()) => SessionStats::bump(&self.stats.frames_sent),
            Err(e) => debug!(session_id = %session.id, seq = frame.seq(), error = %e, "Frame not sent"),
        }
    }

    fn on_transport_error(&mut self, error: TransportError) {
        let Some(id) = self.teardown() else {
            debug!(error = %error, "Transport error after teardown ignored");
            return;
        };
        SessionStats::bump(&self.stats.transport_errors);
        warn!(session_id = %id, error = %error, "Transport failed");
        self.fail(id, format!("Connection error: {}", error));
    }

    fn on_close(&mut self, reason: String) {
        let opened = self.session.as_ref().is_some_and(|s| s.opened);
        let Some(id) = self.teardown() else {
            return;
        };
        if opened {
            info!(session_id = %id, reason = %reason, "Voice session closed");
            self.publish(SessionStatus::standby());
        } else {
            warn!(session_id = %id, reason = %reason, "Connection closed before the session opened");
            self.fail(id, format!("Connection error: {}", reason));
        }
    }

    /// Release everything the current session holds.
    fn teardown(&mut self) -> Option<Uuid> {
        let mut session = self.session.take()?;
        session.link.close();
        session.microphone.release();
        session.scheduler.teardown();
        debug!(session_id = %session.id, "Session resources released");
        Some(session.id)
    }

    fn fail(&mut self, id: Uuid, message: String) {
        SessionStats::bump(&self.stats.sessions_failed);
        self.publish(SessionStatus::error(message, Some(id.to_string())));
    }

    fn publish(&self, status: SessionStatus) {
        info!(state = status.state.as_str(), message = %status.message, "Session status");
        self.status.send_replace(status);
    }
}

impl Drop for VoiceController {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn decode_chunk(data: &str, sample_rate: u32) -> Result<PlayableBuffer, codec::CodecError> {
    let bytes = codec::decode(data)?;
    codec::decode_pcm(&bytes, sample_rate, 1)
}
