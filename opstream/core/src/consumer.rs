//! Consumer Adapter
//!
//! Attaches a downstream client to an operation some other task is already
//! running. The consumer never touches the upstream call: it looks the
//! operation up, subscribes, and relays until one of three things happens.
//!
//! ```text
//!   registry.get(key) ──None──▶ send_not_found, close      ─▶ NotFound
//!          │
//!      subscribe() ──Stopped──▶ send_not_found, close      ─▶ NotFound
//!          │
//!          ▼
//!   ┌─ select ──────────────────────────────────────────────┐
//!   │ disconnect resolves  ─▶ unsubscribe                   ─▶ Disconnected
//!   │ Failure relayed      ─▶ close                         ─▶ Failed
//!   │ subscription closed  ─▶ close                         ─▶ Completed
//!   └───────────────────────────────────────────────────────┘
//! ```
//!
//! A client that went away only loses its own subscription; the operation
//! and every other observer are unaffected.

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::registry::StreamRegistry;
use crate::streamer::SubscribeError;
use crate::transport::{RelayError, StreamSink};

/// How an observation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObserveOutcome {
    /// No in-flight operation for the key
    NotFound,
    /// The operation finished and every queued message was relayed
    Completed {
        /// Messages written to the sink
        relayed: usize,
    },
    /// The operation's failure was relayed
    Failed {
        /// Messages written to the sink, including the failure
        relayed: usize,
    },
    /// The client went away first
    Disconnected {
        /// Messages written to the sink before the disconnect
        relayed: usize,
    },
}

impl ObserveOutcome {
    /// Number of messages written to the sink
    #[must_use]
    pub fn relayed(&self) -> usize {
        match self {
            Self::NotFound => 0,
            Self::Completed { relayed }
            | Self::Failed { relayed }
            | Self::Disconnected { relayed } => *relayed,
        }
    }
}

/// Observe the operation registered for `key`
///
/// `disconnect` resolves when the client goes away (use
/// `std::future::pending()` for clients that cannot signal it). It is polled
/// ahead of the subscription, so a client that already left is not written to.
///
/// # Errors
///
/// Returns the sink's error if writing to the client fails. The subscription
/// is released before returning.
pub async fn observe<K, T, S, D>(
    registry: &StreamRegistry<K, T>,
    key: &K,
    sink: &mut S,
    disconnect: D,
) -> Result<ObserveOutcome, RelayError>
where
    K: Eq + Hash + Clone + Debug,
    T: Clone + Send + Sync,
    S: StreamSink<T> + ?Sized,
    D: Future<Output = ()>,
{
    let subscribed = match registry.get(key) {
        Some(streamer) => streamer.subscribe(),
        None => {
            tracing::debug!(operation = ?key, "No in-flight operation to observe");
            return not_found(sink).await;
        }
    };

    let mut subscription = match subscribed {
        Ok(subscription) => subscription,
        Err(SubscribeError::Stopped(streamer_id)) => {
            tracing::debug!(
                operation = ?key,
                streamer_id = %streamer_id,
                "Operation finished before subscribe"
            );
            return not_found(sink).await;
        }
    };

    tracing::debug!(
        operation = ?key,
        subscriber_id = %subscription.id(),
        replayed = subscription.replayed(),
        "Observer attached"
    );

    tokio::pin!(disconnect);
    let mut relayed = 0;

    loop {
        tokio::select! {
            biased;

            () = &mut disconnect => {
                tracing::debug!(
                    operation = ?key,
                    subscriber_id = %subscription.id(),
                    relayed,
                    "Observer disconnected"
                );
                subscription.unsubscribe();
                return Ok(ObserveOutcome::Disconnected { relayed });
            }

            next = subscription.recv() => {
                let Some(message) = next else {
                    sink.close().await?;
                    return Ok(ObserveOutcome::Completed { relayed });
                };

                if let Err(e) = sink.send(&message).await {
                    tracing::debug!(
                        operation = ?key,
                        subscriber_id = %subscription.id(),
                        error = %e,
                        "Relay to observer failed"
                    );
                    subscription.unsubscribe();
                    return Err(e);
                }
                relayed += 1;

                if message.is_terminal() {
                    subscription.unsubscribe();
                    sink.close().await?;
                    return Ok(ObserveOutcome::Failed { relayed });
                }
            }
        }
    }
}

async fn not_found<T, S>(sink: &mut S) -> Result<ObserveOutcome, RelayError>
where
    T: Send + Sync,
    S: StreamSink<T> + ?Sized,
{
    sink.send_not_found().await?;
    sink.close().await?;
    Ok(ObserveOutcome::NotFound)
}
