//! WebSocket Sink
//!
//! Each relayed message becomes one text frame (`{"code", "data"}`). The
//! read half of the connection is only watched for the client going away: a
//! close frame, a protocol error, or the end of the stream is the disconnect
//! signal that makes the consumer unsubscribe.

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use std::fmt::Debug;
use std::hash::Hash;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;

use super::payload::ws_frame_text;
use super::{RelayError, StreamSink};
use crate::consumer::{observe, ObserveOutcome};
use crate::message::Message;
use crate::registry::StreamRegistry;

impl From<WsError> for RelayError {
    fn from(error: WsError) -> Self {
        match error {
            WsError::ConnectionClosed | WsError::AlreadyClosed => Self::Closed,
            other => Self::WebSocket(Box::new(other)),
        }
    }
}

/// Why the client side of a WebSocket went away
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientDisconnect {
    /// Client sent a close frame
    Closed,
    /// The stream ended without a close frame
    Ended,
    /// Reading failed
    Error(String),
}

/// Wait until the client disconnects
///
/// Frames other than close are ignored.
pub async fn client_disconnect<S>(mut stream: S) -> ClientDisconnect
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Close(_)) => return ClientDisconnect::Closed,
            Ok(other) => {
                tracing::trace!(len = other.len(), "Ignoring client frame on stream");
            }
            Err(e) => return ClientDisconnect::Error(e.to_string()),
        }
    }
    ClientDisconnect::Ended
}

/// Writes relayed messages as WebSocket text frames
#[derive(Debug)]
pub struct WebSocketSink<S> {
    sink: S,
}

impl<S> WebSocketSink<S>
where
    S: Sink<WsMessage, Error = WsError> + Unpin + Send,
{
    /// Wrap the write half of a connection
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    /// Close with an abnormal-closure code
    ///
    /// # Errors
    ///
    /// Returns an error if the close frame cannot be written.
    pub async fn close_abnormal(&mut self) -> Result<(), RelayError> {
        self.close_with(CloseCode::Abnormal).await
    }

    async fn close_with(&mut self, code: CloseCode) -> Result<(), RelayError> {
        let frame = CloseFrame {
            code,
            reason: "".into(),
        };
        match self.sink.send(WsMessage::Close(Some(frame))).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Recover the underlying sink
    pub fn into_inner(self) -> S {
        self.sink
    }
}

#[async_trait]
impl<T, S> StreamSink<T> for WebSocketSink<S>
where
    T: Serialize + Send + Sync,
    S: Sink<WsMessage, Error = WsError> + Unpin + Send,
{
    async fn send(&mut self, message: &Message<T>) -> Result<(), RelayError> {
        let text = ws_frame_text(message)?;
        self.sink.send(WsMessage::Text(text)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        self.close_with(CloseCode::Normal).await
    }
}

/// Run the consumer protocol over an accepted WebSocket connection
///
/// Splits the connection, relays the operation for `key` to the write half,
/// and watches the read half for the client leaving. If the client went away
/// with a read error, an abnormal-closure frame is attempted.
///
/// # Errors
///
/// Returns an error if writing to the connection fails.
pub async fn observe_websocket<K, T, S>(
    registry: &StreamRegistry<K, T>,
    key: &K,
    connection: WebSocketStream<S>,
) -> Result<ObserveOutcome, RelayError>
where
    K: Eq + Hash + Clone + Debug,
    T: Clone + Serialize + Send + Sync,
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (write, read) = connection.split();
    let mut sink = WebSocketSink::new(write);

    let (reason_tx, mut reason_rx) = oneshot::channel();
    let disconnect = async move {
        let reason = client_disconnect(read).await;
        let _ = reason_tx.send(reason);
    };

    let outcome = observe(registry, key, &mut sink, disconnect).await?;

    if let Ok(ClientDisconnect::Error(error)) = reason_rx.try_recv() {
        tracing::debug!(operation = ?key, %error, "WebSocket client errored, closing abnormally");
        if let Err(e) = sink.close_abnormal().await {
            tracing::debug!(error = %e, "Abnormal close not delivered");
        }
    }

    Ok(outcome)
}
