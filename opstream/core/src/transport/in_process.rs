//! In-Process Sink
//!
//! Relays messages into a tokio channel. Used when the observer lives in the
//! same process as the operation (embedded callers, the demo binary, tests).
//!
//! # Usage
//!
//! ```ignore
//! let (mut sink, mut rx) = ChannelSink::new_pair(32);
//! tokio::spawn(async move { observe(&registry, &key, &mut sink, pending()).await });
//! while let Some(msg) = rx.recv().await { /* render */ }
//! ```

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{RelayError, StreamSink};
use crate::message::Message;

/// Sink that forwards into an mpsc channel
#[derive(Debug)]
pub struct ChannelSink<T> {
    tx: mpsc::Sender<Message<T>>,
}

impl<T> ChannelSink<T> {
    /// Wrap an existing sender
    pub fn new(tx: mpsc::Sender<Message<T>>) -> Self {
        Self { tx }
    }

    /// Create a sink and the receiver that observes it
    #[must_use]
    pub fn new_pair(capacity: usize) -> (Self, mpsc::Receiver<Message<T>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl<T> StreamSink<T> for ChannelSink<T>
where
    T: Clone + Send + Sync,
{
    async fn send(&mut self, message: &Message<T>) -> Result<(), RelayError> {
        self.tx
            .send(message.clone())
            .await
            .map_err(|_| RelayError::Closed)
    }
}
