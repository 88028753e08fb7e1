//! opstream Core - Fan-Out of Long-Running Operation Progress
//!
//! A long-running operation (create, delete, update, refresh of a managed
//! resource) is one server-streaming call to a remote service, owned by
//! exactly one task. This crate lets any number of downstream clients watch
//! that operation at the same time, including clients that arrive after
//! progress has already been reported, without issuing the upstream call
//! again.
//!
//! # Architecture
//!
//! ```text
//!   upstream call (Stream<Result<T, E>>)
//!            │
//! ┌──────────▼───────────┐   registry.add (lazy)   ┌─────────────────────┐
//! │ Operation (producer) │────────────────────────▶│ StreamRegistry<K,T> │
//! │  relays to its own   │◀──── drop: stop+remove ─│   key -> Streamer   │
//! │  client directly     │                         └──────────┬──────────┘
//! └──────────┬───────────┘                                    │ get(key)
//!            │ publish                                        │
//! ┌──────────▼─────────────────────────────────────┐          │
//! │ Streamer<T>: history + bounded subscriber set  │◀─────────┘
//! └───────┬───────────────┬───────────────┬────────┘  subscribe + replay
//!         │               │               │
//!   ┌─────▼─────┐   ┌─────▼─────┐   ┌─────▼─────┐
//!   │ observe() │   │ observe() │   │ observe() │   consumers
//!   └─────┬─────┘   └─────┬─────┘   └─────┬─────┘
//!     NdjsonSink     WebSocketSink     ChannelSink
//! ```
//!
//! # Key Types
//!
//! - [`Streamer`]: per-operation broadcast buffer with replay
//! - [`Subscription`]: one consumer's bounded queue
//! - [`StreamRegistry`]: keyed table of in-flight streamers
//! - [`Operation`]: producer-side RAII guard
//! - [`StreamSink`]: where relayed messages are written
//!
//! # Quick Start
//!
//! ```ignore
//! use opstream_core::{observe, run_operation, StreamRegistry, StreamerConfig};
//! use opstream_core::transport::NdjsonSink;
//!
//! let registry: StreamRegistry<ResourceKey, Progress> = StreamRegistry::new();
//!
//! // Request that starts the operation
//! let mut sink = NdjsonSink::new(response_body);
//! match run_operation(&registry, key.clone(), &config, upstream, &mut sink).await {
//!     Ok(outcome) => tracing::info!(?outcome, "done"),
//!     // Someone else is already running it: watch instead
//!     Err(_busy) => { observe(&registry, &key, &mut sink, client_gone).await?; }
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`message`]: progress and failure messages
//! - [`streamer`]: the broadcast buffer and subscriptions
//! - [`registry`]: keyed lookup of in-flight operations
//! - [`producer`]: operation guard and upstream driver
//! - [`consumer`]: attaching a client to a running operation
//! - [`transport`]: NDJSON, WebSocket, and in-process sinks
//! - [`key`]: ready-made resource key
//! - [`config`]: TOML and environment configuration

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod consumer;
pub mod key;
pub mod message;
pub mod producer;
pub mod registry;
pub mod streamer;
pub mod transport;

// Re-exports for convenience
pub use config::{
    load_config, load_config_from_path, ConfigError, ConfigSource, OpstreamConfig,
    StreamerConfig, DEFAULT_QUEUE_CAPACITY, MAX_QUEUE_CAPACITY,
};
pub use consumer::{observe, ObserveOutcome};
pub use key::ResourceKey;
pub use message::{Message, OperationFailure, DEFAULT_FAILURE_CODE};
pub use producer::{
    collect_results, run_operation, Operation, OperationOutcome, OperationSummary,
};
pub use registry::{RegistryError, RegistrySummary, StreamRegistry};
pub use streamer::{
    FanoutResult, StreamerId, StreamerStats, Streamer, SubscribeError, SubscriberId,
    Subscription,
};
pub use transport::{ChannelSink, NdjsonSink, RelayError, StreamSink};
