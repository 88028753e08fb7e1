//! Producer Adapter
//!
//! The task that issued the upstream call owns an [`Operation`]. It creates
//! the operation's [`Streamer`], registers it the first time there is
//! something to see, publishes every upstream result, and tears everything
//! down when it is dropped.
//!
//! # Lifecycle
//!
//! ```text
//!   begin(registry, key)        Busy if a live producer already owns key
//!        │
//!   publish(first) ──▶ registry.add(key, streamer)   (once, lazily)
//!   publish(...)   ──▶ streamer.publish
//!   fail(error)    ──▶ streamer.publish(Failure)      (terminal)
//!        │
//!   drop / finish  ──▶ streamer.stop()
//!                  ──▶ registry.remove(key, streamer) (if registered)
//! ```
//!
//! Teardown runs from `Drop`, so an early return, a `?`, or a panic in the
//! request handler still stops the streamer and frees the key. The producer
//! writes to its own client directly; it never subscribes to itself.

use std::fmt::Debug;
use std::hash::Hash;

use futures::{Stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use crate::config::StreamerConfig;
use crate::message::{Message, OperationFailure};
use crate::registry::{RegistryError, StreamRegistry};
use crate::streamer::{FanoutResult, Streamer, StreamerId};
use crate::transport::StreamSink;

// ============================================================================
// Operation guard
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Registration {
    /// Nothing published yet
    Pending,
    Registered,
    /// Lazy add lost a race; running unregistered
    Conflicted,
}

/// Totals reported when an operation is torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSummary {
    /// Streamer that carried the operation
    pub streamer_id: StreamerId,
    /// Messages published, including a terminal failure
    pub published: u64,
    /// Deliveries skipped because an observer's queue was full
    pub dropped: u64,
    /// Whether the streamer was ever visible in the registry
    pub registered: bool,
}

/// Owner of one in-flight operation's streamer
///
/// Dropping the guard stops the streamer and removes its registry entry.
pub struct Operation<K, T>
where
    K: Eq + Hash + Clone + Debug,
{
    key: K,
    registry: StreamRegistry<K, T>,
    streamer: Streamer<T>,
    registration: Registration,
    failed: bool,
    finished: bool,
}

impl<K, T> Operation<K, T>
where
    K: Eq + Hash + Clone + Debug,
{
    /// Start producing for `key`
    ///
    /// The streamer is not registered until the first progress message.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Busy` if a live operation already owns `key`.
    /// The caller should observe that operation instead of starting another.
    pub fn begin(
        registry: &StreamRegistry<K, T>,
        key: K,
        config: &StreamerConfig,
    ) -> Result<Self, RegistryError<K>> {
        if registry.contains_live(&key) {
            tracing::debug!(operation = ?key, "Operation already in flight");
            return Err(RegistryError::Busy { key });
        }

        let streamer = Streamer::new(config);
        tracing::debug!(operation = ?key, streamer_id = %streamer.id(), "Operation started");

        Ok(Self {
            key,
            registry: registry.clone(),
            streamer,
            registration: Registration::Pending,
            failed: false,
            finished: false,
        })
    }

    /// Key this operation produces for
    #[must_use]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Handle to the operation's streamer
    #[must_use]
    pub fn streamer(&self) -> &Streamer<T> {
        &self.streamer
    }

    /// Whether observers can currently find this operation in the registry
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registration == Registration::Registered
    }

    fn register(&mut self) {
        if self.registration != Registration::Pending {
            return;
        }
        match self.registry.add(self.key.clone(), self.streamer.clone()) {
            Ok(()) => self.registration = Registration::Registered,
            Err(e) => {
                tracing::warn!(
                    operation = ?self.key,
                    streamer_id = %self.streamer.id(),
                    error = %e,
                    "Lost registration race, continuing unobserved"
                );
                self.registration = Registration::Conflicted;
            }
        }
    }

    /// Stop the streamer and remove the registry entry (runs once)
    fn teardown(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        if std::thread::panicking() {
            tracing::warn!(
                operation = ?self.key,
                streamer_id = %self.streamer.id(),
                "Operation unwinding, releasing stream"
            );
        }

        self.streamer.stop();
        if self.registration == Registration::Registered {
            self.registry.remove(&self.key, &self.streamer);
        }
    }

    /// Tear the operation down and report its totals
    pub fn finish(mut self) -> OperationSummary {
        self.teardown();
        let stats = self.streamer.stats();
        let summary = OperationSummary {
            streamer_id: self.streamer.id(),
            published: stats.published,
            dropped: stats.dropped,
            registered: self.registration == Registration::Registered,
        };
        tracing::info!(
            operation = ?self.key,
            streamer_id = %summary.streamer_id,
            published = summary.published,
            dropped = summary.dropped,
            "Operation finished"
        );
        summary
    }
}

impl<K, T> Operation<K, T>
where
    K: Eq + Hash + Clone + Debug,
    T: Clone,
{
    /// Publish one progress payload
    pub fn publish(&mut self, payload: T) -> FanoutResult {
        self.publish_message(Message::Progress(payload))
    }

    /// Publish a message
    ///
    /// The first progress message registers the streamer. Anything published
    /// after a failure is rejected.
    pub fn publish_message(&mut self, message: Message<T>) -> FanoutResult {
        if self.failed {
            tracing::error!(
                operation = ?self.key,
                streamer_id = %self.streamer.id(),
                "Publish after failure rejected"
            );
            return FanoutResult {
                rejected: true,
                ..FanoutResult::default()
            };
        }

        match message {
            Message::Progress(_) => self.register(),
            Message::Failure(_) => self.failed = true,
        }
        self.streamer.publish(message)
    }

    /// Publish the terminal failure
    pub fn fail(&mut self, failure: OperationFailure) -> FanoutResult {
        tracing::info!(
            operation = ?self.key,
            streamer_id = %self.streamer.id(),
            error = %failure,
            "Operation failed"
        );
        self.publish_message(Message::Failure(failure))
    }
}

impl<K, T> Drop for Operation<K, T>
where
    K: Eq + Hash + Clone + Debug,
{
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<K, T> std::fmt::Debug for Operation<K, T>
where
    K: Eq + Hash + Clone + Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("key", &self.key)
            .field("streamer", &self.streamer)
            .field("registration", &self.registration)
            .field("failed", &self.failed)
            .finish()
    }
}

// ============================================================================
// Driving an upstream call
// ============================================================================

/// How a driven operation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// Upstream ran to completion
    Completed(OperationSummary),
    /// Upstream returned an error, relayed as the terminal failure
    Failed {
        /// The relayed failure
        failure: OperationFailure,
        /// Totals at teardown
        summary: OperationSummary,
    },
}

impl OperationOutcome {
    /// Totals at teardown
    #[must_use]
    pub fn summary(&self) -> &OperationSummary {
        match self {
            Self::Completed(summary) | Self::Failed { summary, .. } => summary,
        }
    }
}

/// Drive `upstream` to completion as the producer for `key`
///
/// Every result is published for observers and relayed to `sink` (the
/// initiating client). If the sink fails the operation keeps running for
/// everyone else. An upstream error is published as the terminal failure.
///
/// # Errors
///
/// Returns `RegistryError::Busy` before touching `upstream` if a live
/// operation already owns `key`.
pub async fn run_operation<K, T, E, U, S>(
    registry: &StreamRegistry<K, T>,
    key: K,
    config: &StreamerConfig,
    upstream: U,
    sink: &mut S,
) -> Result<OperationOutcome, RegistryError<K>>
where
    K: Eq + Hash + Clone + Debug,
    T: Clone + Send + Sync,
    E: std::error::Error,
    U: Stream<Item = Result<T, E>>,
    S: StreamSink<T> + ?Sized,
{
    let mut operation = Operation::begin(registry, key, config)?;
    let mut sink_open = true;
    tokio::pin!(upstream);

    while let Some(item) = upstream.next().await {
        let payload = match item {
            Ok(payload) => payload,
            Err(e) => {
                let failure = OperationFailure::from_error(&e);
                operation.fail(failure.clone());
                let message = Message::Failure(failure.clone());
                relay(&mut sink_open, sink, &message, operation.key()).await;

                let summary = operation.finish();
                close(sink_open, sink).await;
                return Ok(OperationOutcome::Failed { failure, summary });
            }
        };

        let message = Message::Progress(payload);
        operation.publish_message(message.clone());
        relay(&mut sink_open, sink, &message, operation.key()).await;
    }

    let summary = operation.finish();
    close(sink_open, sink).await;
    Ok(OperationOutcome::Completed(summary))
}

async fn relay<K, T, S>(sink_open: &mut bool, sink: &mut S, message: &Message<T>, key: &K)
where
    K: Debug,
    T: Send + Sync,
    S: StreamSink<T> + ?Sized,
{
    if !*sink_open {
        return;
    }
    if let Err(e) = sink.send(message).await {
        tracing::warn!(
            operation = ?key,
            error = %e,
            "Initiating client gone, operation continues for observers"
        );
        *sink_open = false;
    }
}

async fn close<T, S>(sink_open: bool, sink: &mut S)
where
    T: Send + Sync,
    S: StreamSink<T> + ?Sized,
{
    if !sink_open {
        return;
    }
    if let Err(e) = sink.close().await {
        tracing::debug!(error = %e, "Closing initiating client failed");
    }
}

/// Drain `upstream` into a list, without streaming
///
/// # Errors
///
/// Returns the first upstream error.
pub async fn collect_results<T, E, U>(upstream: U) -> Result<Vec<T>, E>
where
    U: Stream<Item = Result<T, E>>,
{
    upstream.try_collect().await
}
