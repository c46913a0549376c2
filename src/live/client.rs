//! # Live WebSocket Client
//!
//! `Connector` implementation for the hosted Live endpoint, built on
//! tokio-tungstenite. Each session runs as one spawned task that owns the
//! socket:
//!
//! 1. **Connect** to the endpoint with the API key
//! 2. **Setup**: send the setup message and wait for `setupComplete`
//! 3. **Open**: report `Open`, then pump outbound media and inbound messages
//! 4. **Close**: on request, remote close, or error, report the outcome once
//!
//! The server may send JSON inside binary frames, so both frame kinds are
//! parsed. Setup has no timeout.

use crate::live::protocol::{RealtimeInputMessage, ServerMessage, SetupMessage};
use crate::live::transport::{Connector, LiveConfig, Outbound, SessionLink, TransportError, TransportEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

/// Connects to the Live endpoint over a secure WebSocket.
#[derive(Clone)]
pub struct WebSocketConnector {
    endpoint: String,
    api_key: String,
}

impl std::fmt::Debug for WebSocketConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnector")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl WebSocketConnector {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    fn url(&self) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}key={}", self.endpoint, separator, self.api_key)
    }
}

impl Connector for WebSocketConnector {
    fn connect(&self, config: LiveConfig) -> SessionLink {
        let (link, outbound, events) = SessionLink::pair();
        let url = self.url();
        let endpoint = self.endpoint.clone();

        tokio::spawn(async move {
            info!(endpoint = %endpoint, model = %config.model, "Connecting to Live endpoint");
            let event = match run_connection(url, config, outbound, &events).await {
                Ok(reason) => TransportEvent::Close { reason },
                Err(err) => TransportEvent::Error(err),
            };
            debug!("Live connection finished: {:?}", event);
            let _ = events.send(event);
        });

        link
    }
}

/// How a single inbound frame should be handled.
#[derive(Debug, PartialEq)]
enum Inbound {
    Message(ServerMessage),
    Close(String),
    Ignore,
}

fn classify(frame: WsMessage) -> Inbound {
    let text = match frame {
        WsMessage::Text(text) => text,
        WsMessage::Binary(bytes) => match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => {
                warn!("Skipping non-UTF-8 binary frame");
                return Inbound::Ignore;
            }
        },
        WsMessage::Close(frame) => {
            let reason = frame
                .map(|f| f.reason.to_string())
                .filter(|reason| !reason.is_empty())
                .unwrap_or_else(|| "remote closed the connection".to_string());
            return Inbound::Close(reason);
        }
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => return Inbound::Ignore,
    };

    match ServerMessage::parse(&text) {
        Ok(message) => Inbound::Message(message),
        Err(e) => {
            warn!(error = %e, len = text.len(), "Skipping unparseable server message");
            Inbound::Ignore
        }
    }
}

/// Drive one connection to completion.
///
/// Returns the close reason on an orderly end and the error otherwise.
async fn run_connection(
    url: String,
    config: LiveConfig,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> Result<String, TransportError> {
    let (mut socket, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;

    let setup = serde_json::to_string(&SetupMessage::new(&config))
        .map_err(|e| TransportError::Protocol(e.to_string()))?;
    socket
        .send(WsMessage::Text(setup))
        .await
        .map_err(|e| TransportError::Connection(e.to_string()))?;
    debug!("Setup sent, waiting for setupComplete");

    loop {
        tokio::select! {
            request = outbound.recv() => match request {
                Some(Outbound::Media(_)) => {}
                Some(Outbound::Close) | None => {
                    let _ = socket.close(None).await;
                    return Ok("closed by client".to_string());
                }
            },
            frame = socket.next() => match frame {
                None => {
                    return Err(TransportError::Connection(
                        "stream ended before setup completed".to_string(),
                    ));
                }
                Some(Err(e)) => return Err(TransportError::Connection(e.to_string())),
                Some(Ok(frame)) => match classify(frame) {
                    Inbound::Message(message) if message.is_setup_complete() => break,
                    Inbound::Message(_) | Inbound::Ignore => {}
                    Inbound::Close(reason) => return Ok(reason),
                },
            },
        }
    }

    info!("Live session ready");
    if events.send(TransportEvent::Open).is_err() {
        let _ = socket.close(None).await;
        return Ok("session dropped".to_string());
    }

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            request = outbound.recv() => match request {
                Some(Outbound::Media(media)) => {
                    let json = serde_json::to_string(&RealtimeInputMessage::from(media))
                        .map_err(|e| TransportError::Protocol(e.to_string()))?;
                    sink.send(WsMessage::Text(json))
                        .await
                        .map_err(|e| TransportError::Connection(e.to_string()))?;
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return Ok("closed by client".to_string());
                }
            },
            frame = stream.next() => match frame {
                None => return Ok("connection ended".to_string()),
                Some(Err(e)) => return Err(TransportError::Connection(e.to_string())),
                Some(Ok(frame)) => match classify(frame) {
                    Inbound::Message(message) => {
                        if events.send(TransportEvent::Message(message)).is_err() {
                            let _ = sink.send(WsMessage::Close(None)).await;
                            return Ok("session dropped".to_string());
                        }
                    }
                    Inbound::Close(reason) => return Ok(reason),
                    Inbound::Ignore => {}
                },
            },
        }
    }
}
