//! # Session Status WebSocket
//!
//! Pushes every voice session status change to connected clients and accepts
//! start/stop commands on the same socket. Clients connect to `/ws/status`.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: the current status is sent immediately
//! 2. **Updates**: one `status` message per transition
//! 3. **Commands**: `{"type": "start"}` and `{"type": "stop"}` control the session
//! 4. **Heartbeat**: a `ping` every 30s; clients silent for 60s are dropped
//!
//! ## Message Format:
//! - **Client → Server**: `start`, `stop`, `ping`, `pong`
//! - **Server → Client**: `status`, `error`, `ping`, `pong`
//!
//! Audio never crosses this socket: capture and playback stay on the host's
//! own devices.

use crate::session::{ServiceError, SessionStatus, StartOutcome, VoiceHandle};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Messages accepted from the client.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedRequest {
    Start,
    Stop,
    Ping {
        /// Echoed back in the pong for latency measurement
        timestamp: u64,
    },
    /// Reply to a heartbeat ping
    Pong {
        #[serde(default)]
        timestamp: u64,
    },
}

/// Messages sent to the client.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    /// A session status transition
    Status {
        #[serde(flatten)]
        status: SessionStatus,
    },

    /// A command that could not be carried out
    Error {
        code: String,
        message: String,
    },

    /// Heartbeat; clients answer with a `pong`
    Ping {
        timestamp: u64,
    },

    Pong {
        timestamp: u64,
    },
}

impl FeedEvent {
    fn error(code: &str, message: impl Into<String>) -> Self {
        FeedEvent::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// One connected status client.
pub struct StatusFeed {
    voice: VoiceHandle,
    last_heartbeat: Instant,
}

impl StatusFeed {
    pub fn new(voice: VoiceHandle) -> Self {
        Self {
            voice,
            last_heartbeat: Instant::now(),
        }
    }

    fn send(&self, ctx: &mut ws::WebsocketContext<Self>, event: &FeedEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            ctx.text(json);
        }
    }

    fn handle_start(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let voice = self.voice.clone();
        let request = async move { voice.start().await }
            .into_actor(self)
            .map(|result: Result<StartOutcome, ServiceError>, act, ctx| match result {
                Ok(outcome) if !outcome.accepted => act.send(
                    ctx,
                    &FeedEvent::error(
                        "session_busy",
                        format!("A session is already {}", outcome.status.state.as_str()),
                    ),
                ),
                Ok(_) => {}
                Err(e) => act.send(ctx, &FeedEvent::error("service_unavailable", e.to_string())),
            });
        ctx.spawn(request);
    }

    fn handle_stop(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let voice = self.voice.clone();
        let request = async move { voice.stop().await }
            .into_actor(self)
            .map(|result: Result<SessionStatus, ServiceError>, act, ctx| {
                if let Err(e) = result {
                    act.send(ctx, &FeedEvent::error("service_unavailable", e.to_string()));
                }
            });
        ctx.spawn(request);
    }

    fn handle_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        match serde_json::from_str::<FeedRequest>(text) {
            Ok(FeedRequest::Start) => self.handle_start(ctx),
            Ok(FeedRequest::Stop) => self.handle_stop(ctx),
            Ok(FeedRequest::Ping { timestamp }) => self.send(ctx, &FeedEvent::Pong { timestamp }),
            Ok(FeedRequest::Pong { .. }) => {}
            Err(e) => {
                debug!("Unrecognised status feed message: {}", e);
                self.send(ctx, &FeedEvent::error("invalid_message", e.to_string()));
            }
        }
    }
}

impl Actor for StatusFeed {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Status feed connected");

        // The watch stream yields the current value first, then every change.
        ctx.add_stream(WatchStream::new(self.voice.subscribe()));

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("Status feed heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                let ping = FeedEvent::Ping {
                    timestamp: chrono::Utc::now().timestamp_millis() as u64,
                };
                act.send(ctx, &ping);
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("Status feed disconnected");
    }
}

impl StreamHandler<SessionStatus> for StatusFeed {
    fn handle(&mut self, status: SessionStatus, ctx: &mut Self::Context) {
        self.send(ctx, &FeedEvent::Status { status });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for StatusFeed {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.handle_text(&text, ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Binary(_)) => {
                self.send(ctx, &FeedEvent::error("invalid_message", "Binary messages are not accepted"));
            }
            Ok(ws::Message::Close(reason)) => {
                debug!("Status feed closed by client: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                warn!("Status feed protocol error: {}", e);
                ctx.stop();
            }
        }
    }
}

/// Upgrade `/ws/status` to a `StatusFeed`.
pub async fn status_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    debug!("Status feed request from: {:?}", req.connection_info().peer_addr());
    ws::start(StatusFeed::new(app_state.voice.clone()), &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;

    #[test]
    fn test_status_event_is_flattened() {
        let event = FeedEvent::Status {
            status: SessionStatus::new(SessionState::Active, "Nexus is listening...", Some("abc".to_string())),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "status");
        assert_eq!(value["state"], "active");
        assert_eq!(value["message"], "Nexus is listening...");
        assert_eq!(value["session_id"], "abc");
    }

    #[test]
    fn test_heartbeat_ping_shape() {
        let value = serde_json::to_value(FeedEvent::Ping { timestamp: 7 }).unwrap();
        assert_eq!(value, serde_json::json!({"type": "ping", "timestamp": 7}));
    }

    #[test]
    fn test_error_event_shape() {
        let value = serde_json::to_value(FeedEvent::error("session_busy", "busy")).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["code"], "session_busy");
        assert_eq!(value["message"], "busy");
    }

    #[test]
    fn test_requests_parse() {
        assert!(matches!(
            serde_json::from_str::<FeedRequest>(r#"{"type": "start"}"#),
            Ok(FeedRequest::Start)
        ));
        assert!(matches!(
            serde_json::from_str::<FeedRequest>(r#"{"type": "stop"}"#),
            Ok(FeedRequest::Stop)
        ));
        assert!(matches!(
            serde_json::from_str::<FeedRequest>(r#"{"type": "ping", "timestamp": 42}"#),
            Ok(FeedRequest::Ping { timestamp: 42 })
        ));
        assert!(matches!(
            serde_json::from_str::<FeedRequest>(r#"{"type": "pong"}"#),
            Ok(FeedRequest::Pong { timestamp: 0 })
        ));
        assert!(serde_json::from_str::<FeedRequest>(r#"{"type": "record"}"#).is_err());
    }
}
