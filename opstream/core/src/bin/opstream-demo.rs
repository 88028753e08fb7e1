//! opstream Demo
//!
//! Runs one simulated long-running operation and attaches several observers
//! to it, so the fan-out behaviour can be watched from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # Operation progress as NDJSON on stdout, observer activity on stderr
//! opstream-demo
//!
//! # Smaller observer queues, verbose logging
//! OPSTREAM_QUEUE_CAPACITY=2 RUST_LOG=debug opstream-demo
//!
//! # End the operation with an upstream error
//! OPSTREAM_DEMO_FAIL=1 opstream-demo
//!
//! # Also accept WebSocket observers (feature "websocket"); a client sends
//! # the resource name ("cluster-1") as its first text frame
//! OPSTREAM_WS_ADDR=127.0.0.1:9090 opstream-demo
//! ```

use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::IntervalStream;
use tracing::{info, warn};

use opstream_core::{
    load_config, observe, run_operation, ChannelSink, NdjsonSink, ObserveOutcome,
    OperationOutcome, ResourceKey, StreamRegistry,
};

const STEPS: usize = 8;
const STEP_INTERVAL: Duration = Duration::from_millis(250);

/// One progress report of the simulated operation
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProgressUpdate {
    step: usize,
    message: String,
}

type Registry = StreamRegistry<ResourceKey, ProgressUpdate>;

fn demo_key(name: &str) -> ResourceKey {
    ResourceKey::new("demo-org", name).in_region("local")
}

/// Spawn an in-process observer
///
/// `join_after` delays attaching; `leave_after` disconnects early.
fn spawn_observer(
    registry: Registry,
    key: ResourceKey,
    label: &'static str,
    join_after: Duration,
    leave_after: Option<Duration>,
) -> tokio::task::JoinHandle<anyhow::Result<ObserveOutcome>> {
    tokio::spawn(async move {
        tokio::time::sleep(join_after).await;

        let (mut sink, mut rx) = ChannelSink::<ProgressUpdate>::new_pair(STEPS);
        let printer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message.progress() {
                    Some(update) => info!(observer = label, step = update.step, "{}", update.message),
                    None => warn!(observer = label, ?message, "Observed failure"),
                }
            }
        });

        let disconnect = async move {
            match leave_after {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending().await,
            }
        };
        let outcome = observe(&registry, &key, &mut sink, disconnect).await?;
        drop(sink);
        printer.await?;

        info!(observer = label, ?outcome, "Observer finished");
        Ok(outcome)
    })
}

#[cfg(feature = "websocket")]
async fn serve_websocket(registry: Registry, addr: String) -> anyhow::Result<()> {
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Accepting WebSocket observers");

    loop {
        let (stream, peer) = listener.accept().await?;
        let registry = registry.clone();
        tokio::spawn(async move {
            let mut ws = match tokio_tungstenite::accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!(%peer, error = %e, "WebSocket handshake failed");
                    return;
                }
            };
            let name = match ws.next().await {
                Some(Ok(WsMessage::Text(name))) => name,
                other => {
                    warn!(%peer, ?other, "Expected resource name as first frame");
                    return;
                }
            };
            let key = demo_key(name.trim());
            match opstream_core::transport::observe_websocket(&registry, &key, ws).await {
                Ok(outcome) => info!(%peer, ?outcome, "WebSocket observer finished"),
                Err(e) => warn!(%peer, error = %e, "WebSocket observer failed"),
            }
        });
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the NDJSON stream
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("opstream_core=info".parse()?)
                .add_directive("opstream_demo=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let config = load_config()?;
    info!(
        source = %config.source(),
        queue_capacity = config.streamer.queue_capacity,
        "Configuration loaded"
    );

    let registry = Registry::new();
    let key = demo_key("cluster-1");

    #[cfg(feature = "websocket")]
    if let Ok(addr) = std::env::var("OPSTREAM_WS_ADDR") {
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_websocket(registry, addr).await {
                warn!(error = %e, "WebSocket listener stopped");
            }
        });
    }

    let fail = std::env::var("OPSTREAM_DEMO_FAIL").is_ok();
    let upstream = IntervalStream::new(tokio::time::interval(STEP_INTERVAL))
        .take(STEPS)
        .enumerate()
        .map(move |(step, _)| {
            if fail && step + 1 == STEPS {
                return Err(std::io::Error::other("simulated upstream failure"));
            }
            Ok(ProgressUpdate {
                step,
                message: format!("Creating cluster, step {} of {STEPS}", step + 1),
            })
        });

    let observers = vec![
        spawn_observer(
            registry.clone(),
            key.clone(),
            "early",
            STEP_INTERVAL / 2,
            None,
        ),
        spawn_observer(
            registry.clone(),
            key.clone(),
            "late",
            STEP_INTERVAL * 4,
            None,
        ),
        spawn_observer(
            registry.clone(),
            key.clone(),
            "leaver",
            STEP_INTERVAL,
            Some(STEP_INTERVAL * 2),
        ),
    ];

    let mut sink = NdjsonSink::new(tokio::io::stdout());
    let outcome = run_operation(&registry, key, &config.streamer, upstream, &mut sink).await?;
    match &outcome {
        OperationOutcome::Completed(summary) => info!(?summary, "Operation completed"),
        OperationOutcome::Failed { failure, summary } => {
            warn!(error = %failure, ?summary, "Operation failed");
        }
    }

    for observer in observers {
        observer.await??;
    }

    let summary = registry.summary();
    info!(
        entries = summary.total_entries,
        live = summary.live_entries,
        "Registry after shutdown"
    );
    Ok(())
}
