//! [`PushTransport`] over a WebSocket.

use async_trait::async_trait;

use super::{FrameSink, FrameSource, PushTransport, TransportError};
use crate::ws::{self, WsMessage, WsReader, WsWriter};

/// Opens push connections with `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

impl WsTransport {
    /// Create a transport.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PushTransport for WsTransport {
    async fn open(
        &self,
        url: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>), TransportError> {
        log::info!("[Push] Connecting to {}", ws::redact_query(url));
        let (writer, reader) = ws::connect(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{e:#}")))?;
        log::debug!("[Push] WebSocket open");
        Ok((Box::new(WsFrameSink { writer }), Box::new(WsFrameSource { reader })))
    }
}

struct WsFrameSink {
    writer: WsWriter,
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.writer.send_text(&text).await.map_err(|e| {
            log::debug!("[Push] Send failed: {e:#}");
            TransportError::Closed
        })
    }

    async fn close(&mut self) {
        if let Err(e) = self.writer.close().await {
            log::debug!("[Push] Close failed: {e:#}");
        }
    }
}

struct WsFrameSource {
    reader: WsReader,
}

#[async_trait]
impl FrameSource for WsFrameSource {
    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        match self.reader.recv().await? {
            Ok(WsMessage::Text(text)) => Some(Ok(text)),
            Ok(WsMessage::Binary(data)) => Some(
                String::from_utf8(data)
                    .map_err(|e| TransportError::Protocol(format!("binary frame is not UTF-8: {e}"))),
            ),
            Ok(WsMessage::Close { code, reason }) => {
                log::info!("[Push] Server closed connection ({}): {}", code, reason);
                None
            }
            Err(e) => Some(Err(TransportError::ConnectionFailed(format!("{e:#}")))),
        }
    }
}
