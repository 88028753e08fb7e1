//! Newline-Delimited JSON Sink
//!
//! Writes each message as one JSON object followed by `\n` and flushes, so
//! an HTTP client reading a chunked response sees progress as it happens.
//! The sink is generic over any `AsyncWrite`; binding it to a particular HTTP
//! server's response body is the caller's job.

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::payload::StreamPayload;
use super::{RelayError, StreamSink};
use crate::message::Message;

/// NDJSON writer over an async byte sink
#[derive(Debug)]
pub struct NdjsonSink<W> {
    writer: W,
    lines_written: usize,
}

impl<W> NdjsonSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Wrap a writer
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            lines_written: 0,
        }
    }

    /// Number of lines written so far
    #[must_use]
    pub fn lines_written(&self) -> usize {
        self.lines_written
    }

    /// Recover the underlying writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<T, W> StreamSink<T> for NdjsonSink<W>
where
    T: Serialize + Send + Sync,
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, message: &Message<T>) -> Result<(), RelayError> {
        let mut line = serde_json::to_vec(&StreamPayload::from_message(message))?;
        line.push(b'\n');

        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        self.lines_written += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
