//! Downstream Transports
//!
//! A [`StreamSink`] is whatever a relayed message is written to: the chunked
//! body of an HTTP response, a WebSocket connection, or an in-process
//! channel. Both the producer (for the request that started an operation)
//! and every consumer write through this trait, so one operation looks the
//! same to every client regardless of how it attached.
//!
//! - [`ndjson`]: one JSON object per line, for HTTP long-poll responses
//! - [`websocket`]: one text frame per message (feature `websocket`)
//! - [`in_process`]: tokio channel, for embedded observers and tests

pub mod in_process;
pub mod ndjson;
pub mod payload;
#[cfg(feature = "websocket")]
pub mod websocket;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::{Message, OperationFailure};

pub use in_process::ChannelSink;
pub use ndjson::NdjsonSink;
pub use payload::{ResultBody, StreamPayload, WsStreamPayload};
#[cfg(feature = "websocket")]
pub use websocket::{client_disconnect, observe_websocket, ClientDisconnect, WebSocketSink};

/// Text reported to a client asking for an operation that is not running
pub const NOT_FOUND_MESSAGE: &str = "Key doesn't exist";

/// Status code reported alongside [`NOT_FOUND_MESSAGE`]
pub const NOT_FOUND_CODE: u16 = 404;

/// Errors raised while writing to a downstream transport
#[derive(Debug, Error)]
pub enum RelayError {
    /// The client side of the transport is gone
    #[error("Transport closed")]
    Closed,

    /// I/O error while writing
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// WebSocket protocol error
    #[cfg(feature = "websocket")]
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),
}

/// Destination for relayed operation messages
#[async_trait]
pub trait StreamSink<T>: Send
where
    T: Send + Sync,
{
    /// Write one message
    async fn send(&mut self, message: &Message<T>) -> Result<(), RelayError>;

    /// Tell the client there is no such in-flight operation
    async fn send_not_found(&mut self) -> Result<(), RelayError> {
        let failure = OperationFailure::with_code(NOT_FOUND_MESSAGE, NOT_FOUND_CODE);
        self.send(&Message::Failure(failure)).await
    }

    /// Finish the response
    async fn close(&mut self) -> Result<(), RelayError> {
        Ok(())
    }
}

#[async_trait]
impl<T, S> StreamSink<T> for Box<S>
where
    T: Send + Sync,
    S: StreamSink<T> + ?Sized,
{
    async fn send(&mut self, message: &Message<T>) -> Result<(), RelayError> {
        (**self).send(message).await
    }

    async fn send_not_found(&mut self) -> Result<(), RelayError> {
        (**self).send_not_found().await
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        (**self).close().await
    }
}
