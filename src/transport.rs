//! Stream transport layer.
//!
//! Single responsibility: open a live channel for one conversation and move
//! raw frames across it. No knowledge of message ordering, retries, or the
//! session state machine - the session driver owns all of that.
//!
//! A channel you hold is a channel that already opened: [`Transport::open`]
//! resolves only once the connection is established, so sending into a
//! half-open connection is unrepresentable here. Rejections before the
//! stream is up surface as [`CourierError::Rejected`] and are treated as
//! fatal by the session, everything else is retryable.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::CourierError;
use crate::message::{ConversationId, ParticipantId};

/// Factory for live channels. Called on the initial connect and after every
/// disconnect.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Channel: Channel;

    /// Open a channel for one conversation.
    ///
    /// Resolves only once the channel is ready.
    async fn open(
        &self,
        conversation: &ConversationId,
        participant: &ParticipantId,
    ) -> Result<Self::Channel, CourierError>;
}

/// A shared transport is itself a transport: opening delegates to the inner
/// value. Lets callers retain an `Arc` handle (to observe or reconfigure the
/// factory) while handing a clone to the session.
#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    type Channel = T::Channel;

    async fn open(
        &self,
        conversation: &ConversationId,
        participant: &ParticipantId,
    ) -> Result<Self::Channel, CourierError> {
        (**self).open(conversation, participant).await
    }
}

/// One live connection to the conversation stream.
#[async_trait]
pub trait Channel: Send + 'static {
    /// Write one outbound payload to the channel.
    async fn send(&mut self, payload: String) -> Result<(), CourierError>;

    /// Receive the next pushed frame.
    ///
    /// Returns `Ok(None)` when the server closes the channel cleanly.
    async fn recv(&mut self) -> Result<Option<String>, CourierError>;

    /// Keepalive probe. Implementations without one keep the default no-op.
    async fn ping(&mut self) -> Result<(), CourierError> {
        Ok(())
    }

    /// Close the channel. Closing an already-closed channel is a no-op.
    async fn close(&mut self);
}

/// Type alias for the WebSocket send half
pub type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, WsMessage>;

/// Type alias for the WebSocket receive half
pub type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// WebSocket transport to the marketplace conversation stream.
pub struct WsTransport {
    base_url: String,
}

impl WsTransport {
    /// `base_url` is the ws(s) root of the stream API, e.g.
    /// `wss://api.example.com/rt`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn stream_url(&self, conversation: &ConversationId, participant: &ParticipantId) -> String {
        format!(
            "{}/conversations/{}/stream?participant={}",
            self.base_url, conversation, participant
        )
    }
}

#[async_trait]
impl Transport for WsTransport {
    type Channel = WsChannel;

    async fn open(
        &self,
        conversation: &ConversationId,
        participant: &ParticipantId,
    ) -> Result<WsChannel, CourierError> {
        let url = self.stream_url(conversation, participant);
        debug!(url = %url, "Opening conversation stream");

        let (ws, _) = connect_async(url.as_str()).await.map_err(map_connect_error)?;
        let (sink, stream) = ws.split();

        debug!(conversation = %conversation, "Conversation stream open");
        Ok(WsChannel {
            sink,
            stream,
            closed: false,
        })
    }
}

/// An open WebSocket channel for one conversation.
pub struct WsChannel {
    sink: WsSink,
    stream: WsStream,
    closed: bool,
}

#[async_trait]
impl Channel for WsChannel {
    async fn send(&mut self, payload: String) -> Result<(), CourierError> {
        self.sink
            .send(WsMessage::Text(payload))
            .await
            .map_err(|e| CourierError::Transport(format!("Failed to send: {}", e)))
    }

    async fn recv(&mut self) -> Result<Option<String>, CourierError> {
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Text(text))) => return Ok(Some(text)),
                Some(Ok(WsMessage::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => {
                        debug!("Skipping non-UTF-8 binary frame");
                        continue;
                    }
                },
                Some(Ok(WsMessage::Close(_))) => return Ok(None),
                // Pong is handled automatically by tungstenite
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(CourierError::Transport(format!("Stream error: {}", e)))
                }
                None => return Ok(None),
            }
        }
    }

    async fn ping(&mut self) -> Result<(), CourierError> {
        self.sink
            .send(WsMessage::Ping(Vec::new()))
            .await
            .map_err(|e| CourierError::Transport(format!("Ping failed: {}", e)))
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let _ = self.sink.send(WsMessage::Close(None)).await;
        let _ = self.sink.close().await;
    }
}

/// Map a connect-time error to the session taxonomy. An HTTP error response
/// to the upgrade means the server actively refused this conversation;
/// retrying cannot help.
fn map_connect_error(e: WsError) -> CourierError {
    match e {
        WsError::Http(response) => CourierError::Rejected(format!(
            "Server refused stream handshake: HTTP {}",
            response.status()
        )),
        other => CourierError::Transport(format!("WebSocket connect failed: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_url() {
        let transport = WsTransport::new("wss://api.example.com/rt/");

        assert_eq!(
            transport.stream_url(&"bk-2041".into(), &"guest-17".into()),
            "wss://api.example.com/rt/conversations/bk-2041/stream?participant=guest-17"
        );
    }

    #[test]
    fn test_handshake_rejection_is_fatal() {
        let response = tokio_tungstenite::tungstenite::http::Response::builder()
            .status(403)
            .body(None)
            .unwrap();

        let err = map_connect_error(WsError::Http(response));
        assert!(matches!(err, CourierError::Rejected(_)));
    }

    #[test]
    fn test_io_failure_is_retryable() {
        let err = map_connect_error(WsError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        )));

        assert!(matches!(err, CourierError::Transport(_)));
    }
}
