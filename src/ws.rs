//! WebSocket plumbing for the push channel.
//!
//! Thin wrapper around `tokio-tungstenite` providing type-isolated
//! reader/writer halves, so the rest of the crate never names
//! `tokio-tungstenite` types directly.
//!
//! [`connect`] performs the handshake (plain or TLS) and returns a
//! ([`WsWriter`], [`WsReader`]) pair ready for use in `tokio::select!` loops.
//! Pings are answered by `tokio-tungstenite` while reading.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;

/// Concrete WebSocket stream type (avoids repeating the 6-line generic everywhere).
type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Received WebSocket message.
#[derive(Debug)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    /// Send a UTF-8 text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails (connection closed, I/O error).
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Text(text.to_string()))
            .await
            .context("WebSocket send_text failed")
    }

    /// Flush pending writes and close the sink.
    ///
    /// # Errors
    ///
    /// Returns an error if closing fails.
    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await.context("WebSocket close failed")
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WsReader {
    /// Receive the next data or close message, returning `None` when the
    /// stream ends.
    ///
    /// Control frames (ping, pong, raw) are skipped.
    pub async fn recv(&mut self) -> Option<Result<WsMessage>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(anyhow::anyhow!("WebSocket read error: {e}"))),
            };
            match message {
                tungstenite::Message::Text(text) => return Some(Ok(WsMessage::Text(text))),
                tungstenite::Message::Binary(data) => {
                    return Some(Ok(WsMessage::Binary(data.to_vec())));
                }
                tungstenite::Message::Close(close_frame) => {
                    let (code, reason) = close_frame
                        .map_or((1005, String::new()), |cf| (cf.code.into(), cf.reason.to_string()));
                    return Some(Ok(WsMessage::Close { code, reason }));
                }
                tungstenite::Message::Ping(_)
                | tungstenite::Message::Pong(_)
                | tungstenite::Message::Frame(_) => {}
            }
        }
    }
}

/// Connect to a WebSocket URL.
///
/// Any credential must already be part of `url`; no headers are added.
///
/// # Errors
///
/// Returns an error if the URL is invalid or the WebSocket handshake fails.
pub async fn connect(url: &str) -> Result<(WsWriter, WsReader)> {
    use tungstenite::client::IntoClientRequest;

    let request = url
        .into_client_request()
        .with_context(|| format!("invalid WebSocket URL: {}", redact_query(url)))?;

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .context("WebSocket connect failed")?;

    let (sink, stream) = ws_stream.split();

    Ok((WsWriter { sink }, WsReader { stream }))
}

/// Drop the query string so credentials in it never reach logs.
#[must_use]
pub fn redact_query(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else {
        url.replace("https://", "wss://")
            .replace("http://", "ws://")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_to_ws_scheme_https() {
        assert_eq!(
            http_to_ws_scheme("https://example.com"),
            "wss://example.com"
        );
    }

    #[test]
    fn test_http_to_ws_scheme_http() {
        assert_eq!(
            http_to_ws_scheme("http://localhost:8080"),
            "ws://localhost:8080"
        );
    }

    #[test]
    fn test_http_to_ws_scheme_wss_passthrough() {
        assert_eq!(
            http_to_ws_scheme("wss://book.example.com/ws"),
            "wss://book.example.com/ws"
        );
    }

    #[test]
    fn test_http_to_ws_scheme_ws_passthrough() {
        assert_eq!(
            http_to_ws_scheme("ws://localhost:8080/ws"),
            "ws://localhost:8080/ws"
        );
    }

    #[test]
    fn test_http_to_ws_scheme_with_path() {
        assert_eq!(
            http_to_ws_scheme("https://example.com/api/v1"),
            "wss://example.com/api/v1"
        );
    }

    #[test]
    fn test_redact_query() {
        assert_eq!(redact_query("ws://h:8080/ws?token=abc"), "ws://h:8080/ws");
        assert_eq!(redact_query("ws://h:8080/ws"), "ws://h:8080/ws");
    }

    #[tokio::test]
    async fn test_connect_invalid_url_returns_error() {
        let result = connect("not-a-url").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_connect_unreachable_host_returns_error() {
        let result = connect("ws://127.0.0.1:1/ws?token=x").await;
        assert!(result.is_err());
    }
}
