//! Stream Registry - Keyed Lookup of In-Flight Operations
//!
//! Maps an operation key to the [`Streamer`] currently producing for it, so a
//! second request for the same resource can attach to the running operation
//! instead of starting a new one.
//!
//! A registry is an ordinary value: construct one per resource kind and hand
//! clones to whatever wires up the transport handlers. Clones share the same
//! table.
//!
//! # Invariants
//!
//! - At most one live (non-stopped) streamer per key; [`StreamRegistry::add`]
//!   rejects a second producer.
//! - [`StreamRegistry::remove`] only deletes the entry if it still holds the
//!   exact instance being removed, so a slow teardown of one operation cannot
//!   evict the streamer of the next operation on the same key.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::streamer::Streamer;

/// Error returned when registering a streamer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError<K: fmt::Debug> {
    /// Another live operation already owns this key
    #[error("Publisher is busy for {key:?}")]
    Busy {
        /// The contested key
        key: K,
    },
}

/// Summary of registry contents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistrySummary {
    /// Entries in the table
    pub total_entries: usize,
    /// Entries whose streamer has not been stopped
    pub live_entries: usize,
    /// Subscribers attached across all entries
    pub total_subscribers: usize,
}

/// Keyed table of in-flight streamers
pub struct StreamRegistry<K, T> {
    inner: Arc<Mutex<HashMap<K, Streamer<T>>>>,
}

impl<K, T> Clone for StreamRegistry<K, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, T> Default for StreamRegistry<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> StreamRegistry<K, T> {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of entries, including any stale ones
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Check if the registry holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Summarize the table
    #[must_use]
    pub fn summary(&self) -> RegistrySummary {
        // Snapshot first so no streamer lock is taken under the table lock
        let streamers: Vec<Streamer<T>> = self.inner.lock().values().cloned().collect();

        let mut summary = RegistrySummary {
            total_entries: streamers.len(),
            ..RegistrySummary::default()
        };
        for streamer in &streamers {
            if !streamer.is_stopped() {
                summary.live_entries += 1;
            }
            summary.total_subscribers += streamer.subscriber_count();
        }
        summary
    }
}

impl<K, T> StreamRegistry<K, T>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    /// Look up the live streamer for `key`
    ///
    /// Does not subscribe. An entry whose streamer has already stopped is
    /// reported as absent.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<Streamer<T>> {
        let streamer = self.inner.lock().get(key).cloned()?;
        if streamer.is_stopped() {
            tracing::debug!(operation = ?key, streamer_id = %streamer.id(), "Ignoring stopped streamer");
            return None;
        }
        Some(streamer)
    }

    /// Check whether a live streamer is registered for `key`
    #[must_use]
    pub fn contains_live(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Register `streamer` as the producer for `key`
    ///
    /// Re-adding the instance already registered is a no-op. A stale entry
    /// (stopped but never removed) is replaced.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Busy` if a different live streamer is
    /// registered for `key`. Callers that only want to observe must use
    /// [`get`](Self::get) and subscribe instead.
    pub fn add(&self, key: K, streamer: Streamer<T>) -> Result<(), RegistryError<K>> {
        let mut inner = self.inner.lock();

        if let Some(existing) = inner.get(&key) {
            if existing.same_stream(&streamer) {
                return Ok(());
            }
            if !existing.is_stopped() {
                let existing_id = existing.id();
                drop(inner);
                tracing::warn!(
                    operation = ?key,
                    existing = %existing_id,
                    rejected = %streamer.id(),
                    "Rejected second producer for in-flight operation"
                );
                return Err(RegistryError::Busy { key });
            }
            tracing::warn!(
                operation = ?key,
                stale = %existing.id(),
                "Replacing stale streamer that was never removed"
            );
        }

        let id = streamer.id();
        inner.insert(key.clone(), streamer);
        drop(inner);

        tracing::info!(operation = ?key, streamer_id = %id, "Streamer registered");
        Ok(())
    }

    /// Remove the entry for `key` if it holds `streamer`
    ///
    /// Returns true if an entry was removed.
    pub fn remove(&self, key: &K, streamer: &Streamer<T>) -> bool {
        let mut inner = self.inner.lock();
        let matches = inner
            .get(key)
            .is_some_and(|existing| existing.same_stream(streamer));
        if matches {
            inner.remove(key);
        }
        drop(inner);

        if matches {
            tracing::info!(operation = ?key, streamer_id = %streamer.id(), "Streamer removed");
        } else {
            tracing::debug!(
                operation = ?key,
                streamer_id = %streamer.id(),
                "Skipped removal, entry belongs to another streamer"
            );
        }
        matches
    }

    /// Keys of all entries
    #[must_use]
    pub fn keys(&self) -> Vec<K> {
        self.inner.lock().keys().cloned().collect()
    }
}

impl<K: fmt::Debug, T> fmt::Debug for StreamRegistry<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("StreamRegistry")
            .field("entries", &inner.len())
            .field("keys", &inner.keys().collect::<Vec<_>>())
            .finish()
    }
}
