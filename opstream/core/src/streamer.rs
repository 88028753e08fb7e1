//! Streamer - Per-Operation Broadcast Buffer
//!
//! A `Streamer` is the fan-out point for one in-flight operation. The
//! producer publishes into it; any number of consumers subscribe and receive
//! the full history followed by live messages.
//!
//! # Architecture
//!
//! ```text
//!                 Producer task
//!                      │ publish()
//!                      ▼
//!        ┌──────────────────────────────┐
//!        │ Streamer (Mutex<State>)      │
//!        │  history: [m0, m1, m2, ...]  │──── replay on subscribe()
//!        │  subscribers: {id -> tx}     │
//!        └──────┬────────┬────────┬─────┘
//!               │try_send│        │
//!        ┌──────▼──┐ ┌───▼─────┐ ┌▼────────┐
//!        │ sub-1   │ │ sub-2   │ │ sub-3   │   bounded queues
//!        └─────────┘ └─────────┘ └─────────┘
//! ```
//!
//! # Concurrency Contract
//!
//! Every mutation (publish, subscribe, unsubscribe, stop) happens under one
//! `parking_lot::Mutex`, and nothing awaits while holding it. Publishing is
//! therefore totally ordered, and a subscriber registered concurrently with a
//! publish either sees the message in its replay or receives it live, never
//! both and never neither.
//!
//! # Backpressure
//!
//! Subscriber queues are bounded. `publish` never blocks: when a queue is
//! full the message is dropped for that subscriber only. A lagging observer
//! loses messages; the producing operation always makes progress.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::config::{StreamerConfig, MAX_QUEUE_CAPACITY};
use crate::message::{Message, OperationFailure};

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier of a streamer instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamerId(u64);

impl StreamerId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw numeric value
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "streamer-{}", self.0)
    }
}

/// Unique identifier of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberId(u64);

impl SubscriberId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw numeric value
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ============================================================================
// Results and Errors
// ============================================================================

/// Error returned by [`Streamer::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubscribeError {
    /// The operation already finished; nothing more will be published
    #[error("{0} has already been stopped")]
    Stopped(StreamerId),
}

/// Outcome of fanning one message out to the subscriber set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutResult {
    /// Subscribers that accepted the message
    pub delivered: usize,
    /// Subscribers whose queue was full
    pub dropped: usize,
    /// Subscribers found closed and removed
    pub pruned: usize,
    /// IDs of the subscribers that missed the message
    pub dropped_ids: Vec<SubscriberId>,
    /// Set when the streamer was already stopped and nothing happened
    pub rejected: bool,
}

impl FanoutResult {
    fn rejected() -> Self {
        Self {
            rejected: true,
            ..Self::default()
        }
    }

    /// Check if every live subscriber received the message
    #[must_use]
    pub fn all_delivered(&self) -> bool {
        !self.rejected && self.dropped == 0
    }
}

/// Counters for one streamer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamerStats {
    /// Messages appended to the history
    pub published: u64,
    /// Per-subscriber deliveries skipped because a queue was full
    pub dropped: u64,
    /// Subscriptions handed out over the lifetime of the streamer
    pub subscriptions: u64,
}

// ============================================================================
// Streamer
// ============================================================================

struct State<T> {
    history: Vec<Message<T>>,
    subscribers: HashMap<SubscriberId, mpsc::Sender<Message<T>>>,
    stopped: bool,
    stats: StreamerStats,
}

struct Shared<T> {
    id: StreamerId,
    queue_capacity: usize,
    state: Mutex<State<T>>,
}

impl<T> Shared<T> {
    fn remove_subscriber(&self, subscriber: SubscriberId) -> bool {
        let removed = self.state.lock().subscribers.remove(&subscriber).is_some();
        if removed {
            tracing::debug!(
                streamer_id = %self.id,
                subscriber_id = %subscriber,
                "Subscriber removed"
            );
        }
        removed
    }
}

/// Broadcast buffer for one operation
///
/// Cloning a `Streamer` yields another handle to the same instance. Two
/// handles refer to the same operation iff [`Streamer::same_stream`] is true.
pub struct Streamer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Streamer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for Streamer<T> {
    fn default() -> Self {
        Self::new(&StreamerConfig::default())
    }
}

impl<T> Streamer<T> {
    /// Create a streamer using the given configuration
    ///
    /// Out-of-range capacities are clamped, see [`Streamer::with_capacity`].
    #[must_use]
    pub fn new(config: &StreamerConfig) -> Self {
        Self::with_capacity(config.queue_capacity)
    }

    /// Create a streamer whose subscriber queues hold `queue_capacity` messages
    ///
    /// The capacity is clamped to `1..=MAX_QUEUE_CAPACITY`.
    #[must_use]
    pub fn with_capacity(queue_capacity: usize) -> Self {
        let id = StreamerId::next();
        tracing::trace!(streamer_id = %id, queue_capacity, "Streamer created");
        Self {
            shared: Arc::new(Shared {
                id,
                queue_capacity: queue_capacity.clamp(1, MAX_QUEUE_CAPACITY),
                state: Mutex::new(State {
                    history: Vec::new(),
                    subscribers: HashMap::new(),
                    stopped: false,
                    stats: StreamerStats::default(),
                }),
            }),
        }
    }

    /// Get the streamer's identifier
    #[must_use]
    pub fn id(&self) -> StreamerId {
        self.shared.id
    }

    /// Capacity of each subscriber queue
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.shared.queue_capacity
    }

    /// Whether both handles refer to the same streamer instance
    #[must_use]
    pub fn same_stream(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Whether `stop` has run
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shared.state.lock().stopped
    }

    /// Number of currently registered subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared.state.lock().subscribers.len()
    }

    /// Number of messages published so far
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.shared.state.lock().history.len()
    }

    /// Snapshot of the counters
    #[must_use]
    pub fn stats(&self) -> StreamerStats {
        self.shared.state.lock().stats
    }

    /// Drop a subscriber from the fan-out set by id
    ///
    /// Its queue stops receiving, but messages already queued stay readable
    /// to the holder. To leave and discard the backlog, use
    /// [`Subscription::unsubscribe`]. Returns false if the subscriber was
    /// already gone.
    pub fn remove_subscriber(&self, subscriber: SubscriberId) -> bool {
        self.shared.remove_subscriber(subscriber)
    }

    /// Mark the streamer terminal and close every subscription
    ///
    /// Subscribers drain whatever is still queued and then observe the end
    /// of the stream. Returns false if the streamer was already stopped.
    pub fn stop(&self) -> bool {
        let closed = {
            let mut state = self.shared.state.lock();
            if state.stopped {
                return false;
            }
            state.stopped = true;
            let closed = state.subscribers.len();
            state.subscribers.clear();
            closed
        };

        tracing::info!(
            streamer_id = %self.shared.id,
            closed_subscribers = closed,
            "Streamer stopped"
        );
        true
    }
}

impl<T: Clone> Streamer<T> {
    /// Append a message to the history and offer it to every subscriber
    ///
    /// Never blocks. A full subscriber queue loses this message; a closed
    /// one is pruned. Publishing after [`stop`](Self::stop) is a bug in the
    /// caller: the message is discarded and the result is marked rejected.
    pub fn publish(&self, message: Message<T>) -> FanoutResult {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;

        if state.stopped {
            drop(guard);
            tracing::error!(
                streamer_id = %self.shared.id,
                "Publish after stop rejected"
            );
            return FanoutResult::rejected();
        }

        let mut result = FanoutResult::default();
        let mut closed = Vec::new();

        for (id, tx) in &state.subscribers {
            match tx.try_send(message.clone()) {
                Ok(()) => result.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    result.dropped += 1;
                    result.dropped_ids.push(*id);
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        for id in &closed {
            state.subscribers.remove(id);
        }
        result.pruned = closed.len();

        state.history.push(message);
        state.stats.published += 1;
        state.stats.dropped += result.dropped as u64;
        let sequence = state.stats.published;
        drop(guard);

        if result.dropped > 0 {
            tracing::debug!(
                streamer_id = %self.shared.id,
                sequence,
                dropped = result.dropped,
                "Subscriber queue full, message dropped"
            );
        }
        if result.pruned > 0 {
            tracing::debug!(
                streamer_id = %self.shared.id,
                pruned = result.pruned,
                "Pruned closed subscribers"
            );
        }

        result
    }

    /// Publish a progress payload
    pub fn publish_progress(&self, payload: T) -> FanoutResult {
        self.publish(Message::Progress(payload))
    }

    /// Publish the terminal failure
    pub fn publish_failure(&self, failure: OperationFailure) -> FanoutResult {
        self.publish(Message::Failure(failure))
    }

    /// Register a new subscriber and replay the history into it
    ///
    /// Registration and replay happen in one critical section with respect
    /// to `publish`. Replay is best effort: it stops once the queue is full.
    ///
    /// # Errors
    ///
    /// Returns `SubscribeError::Stopped` if the operation already finished.
    pub fn subscribe(&self) -> Result<Subscription<T>, SubscribeError> {
        let (tx, rx) = mpsc::channel(self.shared.queue_capacity);
        let id = SubscriberId::next();

        let (replayed, skipped) = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            if state.stopped {
                return Err(SubscribeError::Stopped(self.shared.id));
            }

            let mut replayed = 0;
            for message in &state.history {
                if tx.try_send(message.clone()).is_err() {
                    break;
                }
                replayed += 1;
            }
            let skipped = state.history.len() - replayed;

            state.subscribers.insert(id, tx);
            state.stats.subscriptions += 1;
            state.stats.dropped += skipped as u64;
            (replayed, skipped)
        };

        tracing::debug!(
            streamer_id = %self.shared.id,
            subscriber_id = %id,
            replayed,
            skipped,
            "Subscriber registered"
        );

        Ok(Subscription {
            id,
            receiver: rx,
            streamer: Arc::downgrade(&self.shared),
            replayed,
            detached: false,
        })
    }

    /// Snapshot of everything published so far
    #[must_use]
    pub fn history(&self) -> Vec<Message<T>> {
        self.shared.state.lock().history.clone()
    }
}

impl<T> fmt::Debug for Streamer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Streamer")
            .field("id", &self.shared.id)
            .field("history_len", &state.history.len())
            .field("subscribers", &state.subscribers.len())
            .field("stopped", &state.stopped)
            .finish()
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Bounded queue of messages owned by one consumer
///
/// Yields the replayed history, then live messages, then `None` once the
/// streamer stops (or the subscription is removed) and the queue drains.
/// Dropping a subscription unsubscribes it.
pub struct Subscription<T> {
    id: SubscriberId,
    receiver: mpsc::Receiver<Message<T>>,
    streamer: Weak<Shared<T>>,
    replayed: usize,
    detached: bool,
}

impl<T> Subscription<T> {
    /// Get the subscription's identifier
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Number of history messages placed in the queue at subscribe time
    #[must_use]
    pub fn replayed(&self) -> usize {
        self.replayed
    }

    /// Wait for the next message
    ///
    /// Returns `None` once the subscription is closed and drained.
    pub async fn recv(&mut self) -> Option<Message<T>> {
        self.receiver.recv().await
    }

    /// Take the next queued message without waiting
    pub fn try_recv(&mut self) -> Option<Message<T>> {
        self.receiver.try_recv().ok()
    }

    /// Leave the stream
    ///
    /// No further messages are read from this subscription, including any
    /// still queued.
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        self.receiver.close();
        if let Some(shared) = self.streamer.upgrade() {
            shared.remove_subscriber(self.id);
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.detach();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = Message<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("replayed", &self.replayed)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;

    fn drain(sub: &mut Subscription<u32>) -> Vec<u32> {
        let mut out = Vec::new();
        while let Some(msg) = sub.try_recv() {
            if let Message::Progress(n) = msg {
                out.push(n);
            }
        }
        out
    }

    #[test]
    fn test_ids_display() {
        let streamer: Streamer<u32> = Streamer::with_capacity(4);
        assert!(streamer.id().to_string().starts_with("streamer-"));

        let sub = streamer.subscribe().unwrap();
        assert!(sub.id().to_string().starts_with("sub-"));
    }

    #[test]
    fn test_publish_reaches_subscribers() {
        let streamer = Streamer::with_capacity(8);
        let mut a = streamer.subscribe().unwrap();
        let mut b = streamer.subscribe().unwrap();

        let result = streamer.publish_progress(7u32);
        assert_eq!(result.delivered, 2);
        assert!(result.all_delivered());

        assert_eq!(drain(&mut a), vec![7]);
        assert_eq!(drain(&mut b), vec![7]);
        assert_eq!(streamer.history_len(), 1);
    }

    #[test]
    fn test_replay_history_then_live() {
        let streamer = Streamer::with_capacity(8);
        streamer.publish_progress(0u32);
        streamer.publish_progress(1);

        let mut sub = streamer.subscribe().unwrap();
        assert_eq!(sub.replayed(), 2);

        streamer.publish_progress(2);
        assert_eq!(drain(&mut sub), vec![0, 1, 2]);
    }

    #[test]
    fn test_full_queue_drops_for_that_subscriber_only() {
        let streamer = Streamer::with_capacity(2);
        let mut slow = streamer.subscribe().unwrap();
        let mut fast = streamer.subscribe().unwrap();

        streamer.publish_progress(0u32);
        streamer.publish_progress(1);
        assert_eq!(drain(&mut fast), vec![0, 1]);

        let result = streamer.publish_progress(2);
        assert_eq!(result.delivered, 1);
        assert_eq!(result.dropped, 1);
        assert_eq!(result.dropped_ids, vec![slow.id()]);
        assert!(!result.all_delivered());

        assert_eq!(drain(&mut slow), vec![0, 1]);
        assert_eq!(drain(&mut fast), vec![2]);
        assert_eq!(streamer.stats().dropped, 1);
        assert_eq!(streamer.history_len(), 3);
    }

    #[test]
    fn test_replay_truncated_at_capacity() {
        let streamer = Streamer::with_capacity(3);
        for n in 0..5u32 {
            streamer.publish_progress(n);
        }

        let mut sub = streamer.subscribe().unwrap();
        assert_eq!(sub.replayed(), 3);
        assert_eq!(drain(&mut sub), vec![0, 1, 2]);
        assert_eq!(streamer.stats().dropped, 2);
    }

    #[tokio::test]
    async fn test_stop_closes_subscribers_after_drain() {
        let streamer = Streamer::with_capacity(8);
        let mut sub = streamer.subscribe().unwrap();

        streamer.publish_progress(1u32);
        assert!(streamer.stop());
        assert!(!streamer.stop(), "second stop is a no-op");

        assert_eq!(sub.recv().await, Some(Message::Progress(1)));
        assert_eq!(sub.recv().await, None);
        assert_eq!(streamer.subscriber_count(), 0);
        assert!(streamer.is_stopped());
    }

    #[test]
    fn test_subscribe_after_stop_fails() {
        let streamer: Streamer<u32> = Streamer::with_capacity(8);
        streamer.stop();

        let err = streamer.subscribe().unwrap_err();
        assert_eq!(err, SubscribeError::Stopped(streamer.id()));
    }

    #[test]
    fn test_publish_after_stop_rejected() {
        let streamer = Streamer::with_capacity(8);
        streamer.publish_progress(1u32);
        streamer.stop();

        let result = streamer.publish_progress(2);
        assert!(result.rejected);
        assert_eq!(streamer.history_len(), 1);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let streamer: Streamer<u32> = Streamer::with_capacity(8);
        let sub = streamer.subscribe().unwrap();
        let id = sub.id();

        assert!(streamer.remove_subscriber(id));
        assert!(!streamer.remove_subscriber(id));
        sub.unsubscribe();
        assert_eq!(streamer.subscriber_count(), 0);
    }

    #[test]
    fn test_remove_subscriber_keeps_backlog_readable() {
        let streamer = Streamer::with_capacity(8);
        let mut sub = streamer.subscribe().unwrap();
        streamer.publish_progress(1u32);
        streamer.publish_progress(2);

        assert!(streamer.remove_subscriber(sub.id()));
        streamer.publish_progress(3);

        assert_eq!(drain(&mut sub), vec![1, 2]);
    }

    #[test]
    fn test_oversized_capacity_is_clamped() {
        let streamer: Streamer<u32> = Streamer::with_capacity(usize::MAX);
        assert_eq!(streamer.queue_capacity(), MAX_QUEUE_CAPACITY);

        let mut sub = streamer.subscribe().unwrap();
        streamer.publish_progress(7);
        assert_eq!(sub.try_recv(), Some(Message::Progress(7)));

        let zero: Streamer<u32> = Streamer::with_capacity(0);
        assert_eq!(zero.queue_capacity(), 1);
    }

    #[test]
    fn test_drop_subscription_unsubscribes() {
        let streamer: Streamer<u32> = Streamer::with_capacity(8);
        let sub = streamer.subscribe().unwrap();
        assert_eq!(streamer.subscriber_count(), 1);

        drop(sub);
        assert_eq!(streamer.subscriber_count(), 0);
    }

    #[test]
    fn test_subscription_outlives_streamer() {
        let streamer: Streamer<u32> = Streamer::with_capacity(8);
        let sub = streamer.subscribe().unwrap();
        drop(streamer);

        // Weak reference is dead; dropping must not panic
        sub.unsubscribe();
    }

    #[test]
    fn test_same_stream_identity() {
        let a: Streamer<u32> = Streamer::with_capacity(8);
        let a2 = a.clone();
        let b: Streamer<u32> = Streamer::with_capacity(8);

        assert!(a.same_stream(&a2));
        assert!(!a.same_stream(&b));
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_subscription_is_a_stream() {
        let streamer = Streamer::with_capacity(8);
        let sub = streamer.subscribe().unwrap();

        streamer.publish_progress(1u32);
        streamer.publish_failure(OperationFailure::new("down"));
        streamer.stop();

        let collected: Vec<_> = sub.collect().await;
        assert_eq!(collected.len(), 2);
        assert!(collected[1].is_terminal());
    }

    #[test]
    fn test_recv_wakes_on_publish() {
        let streamer = Streamer::with_capacity(8);
        let mut sub = streamer.subscribe().unwrap();

        let mut recv = tokio_test::task::spawn(sub.recv());
        tokio_test::assert_pending!(recv.poll());

        streamer.publish_progress(3u32);
        assert!(recv.is_woken());
        assert_eq!(
            tokio_test::assert_ready!(recv.poll()),
            Some(Message::Progress(3))
        );
    }

    #[test]
    fn test_stats_count_subscriptions() {
        let streamer: Streamer<u32> = Streamer::with_capacity(8);
        let _a = streamer.subscribe().unwrap();
        let _b = streamer.subscribe().unwrap();
        streamer.publish_progress(1);

        let stats = streamer.stats();
        assert_eq!(stats.subscriptions, 2);
        assert_eq!(stats.published, 1);
        assert_eq!(stats.dropped, 0);
    }
}
