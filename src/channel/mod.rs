//! Push channel transport.
//!
//! The live channel is STOMP over a WebSocket. This module splits it in two
//! layers so the connection logic can run against a scripted transport in
//! tests:
//!
//! ```text
//! ConnectionManager (crate::connection)
//!     │  STOMP frames (stomp::Frame)
//!     ▼
//! PushTransport (trait) ── open(url) ──► (FrameSink, FrameSource)
//!     │
//!     └── WsTransport (websocket.rs, over crate::ws)
//! ```
//!
//! A transport only moves text messages; framing lives in [`stomp`].

pub mod stomp;
pub mod websocket;

use async_trait::async_trait;

pub use websocket::WsTransport;

/// Push connection state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection. Initial state, and the state after logout or a
    /// transport error.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Handshake acknowledged and subscription sent.
    Connected,
    /// Torn down for good; nothing is delivered any more.
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Errors on the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Could not open the connection.
    ConnectionFailed(String),
    /// Peer sent something that is not valid STOMP, or closed mid-handshake.
    Protocol(String),
    /// Server sent an `ERROR` frame.
    Rejected(String),
    /// Send or receive on a connection that has gone away.
    Closed,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionFailed(msg) => write!(f, "Connection failed: {msg}"),
            Self::Protocol(msg) => write!(f, "Protocol error: {msg}"),
            Self::Rejected(msg) => write!(f, "Server rejected connection: {msg}"),
            Self::Closed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<stomp::FrameError> for TransportError {
    fn from(err: stomp::FrameError) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Write half of an open push connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text message.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the connection. Errors are ignored.
    async fn close(&mut self);
}

/// Read half of an open push connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Next text message, or `None` once the peer has closed.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;
}

/// Opens push connections.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Open a connection to `url`. The credential is already in the URL.
    async fn open(
        &self,
        url: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>), TransportError>;
}
