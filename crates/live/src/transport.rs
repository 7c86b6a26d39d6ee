//! Transport abstraction for per-job event streams.
//!
//! The connection manager only talks to a [`Transport`] (which opens
//! connections) and the [`TransportConnection`]s it returns. The
//! production implementation is [`WsTransport`], backed by
//! `tokio-tungstenite`; tests inject an in-memory fake.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Errors that can occur on a transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Failed to establish the connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an already-established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Writing a frame failed.
    #[error("Send error: {0}")]
    Send(String),
}

/// Opens connections to an endpoint address.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, endpoint: &str) -> Result<Box<dyn TransportConnection>, TransportError>;
}

/// One live, bidirectional connection.
#[async_trait]
pub trait TransportConnection: Send {
    /// Transmit a text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Wait for the next inbound text frame.
    ///
    /// Returns `None` once the peer closed the connection or the stream
    /// ended. Must be cancel-safe: the manager races it against
    /// outbound sends and shutdown.
    async fn next_text(&mut self) -> Option<Result<String, TransportError>>;

    /// Close the connection. Errors are not actionable and are ignored.
    async fn close(&mut self);
}

/// WebSocket transport backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, endpoint: &str) -> Result<Box<dyn TransportConnection>, TransportError> {
        let (stream, _response) = connect_async(endpoint).await.map_err(|e| {
            TransportError::Connection(format!("Failed to connect to {endpoint}: {e}"))
        })?;

        tracing::debug!(endpoint, "WebSocket handshake complete");

        Ok(Box::new(WsConnection { stream }))
    }
}

/// A live WebSocket connection.
pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

#[async_trait]
impl TransportConnection for WsConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        while let Some(msg) = self.stream.next().await {
            match msg {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => {
                    tracing::trace!(len = bytes.len(), "Ignoring binary frame");
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {
                    // Handled automatically by tungstenite.
                }
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "Peer closed WebSocket");
                    return None;
                }
                Ok(Message::Frame(_)) => {}
                Err(e) => return Some(Err(TransportError::Protocol(e.to_string()))),
            }
        }
        None
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "WebSocket close handshake failed");
        }
    }
}
