//! Transport layer for the code relay.
//!
//! Provides:
//! - HTTP routes (editor page, file download)
//! - WebSocket transport, one session per socket

pub mod http;
pub mod websocket;

pub use http::{AppState, TransportError, WS_PATH, router};
pub use websocket::ws_handler;
