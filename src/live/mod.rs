//! # Live Session Module
//!
//! Connection to the remote realtime model.
//!
//! ## Key Components:
//! - **Protocol**: setup, realtime input and server message types (`protocol`)
//! - **Transport**: lifecycle events and the send/close rules (`transport`)
//! - **Client**: tokio-tungstenite connector for the hosted endpoint (`client`)

pub mod client;     // WebSocket connector
pub mod protocol;   // Wire message types
pub mod transport;  // Session lifecycle and event stream

pub use client::WebSocketConnector;
pub use protocol::ServerMessage;
pub use transport::{Connector, LiveConfig, LiveSession, TransportError, TransportEvent};
