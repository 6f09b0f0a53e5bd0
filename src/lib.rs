//! Host bridge library.
//!
//! Messaging layer between an embedded web UI and its host process. It handles:
//! - Topic-routed events with wildcard subscriptions and priorities
//! - Request/response over plain events
//! - Forwarding to, and dispatch from, the host process
//! - Supervision of the host connection (heartbeat, bounded reconnect)
//!
//! # Architecture
//!
//! - `bus`: event bus, middleware, history, request/reply, outbound batching
//! - `host`: host boundary (forwarder trait, inbound bridge, stdio framing)
//! - `transport`: connection supervisor and its state
//! - `config`: runtime configuration

pub mod bus;
pub mod config;
pub mod host;
pub mod transport;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

use bus::{AppEvent, BatchConfig, EventBus, HostBatcher};
use config::AppConfig;
use host::stdio::{pump_lines, LineSink};
use host::HostBridge;
use transport::{BusLink, SupervisorConfig, TransportSupervisor};

pub const DEFAULT_LOG_FILTER: &str = "hostbridge_lib=debug,hostbridge=debug,info";

// ---------------------------------------------------------------------------
// Shared error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Bus(#[from] bus::BusError),
    #[error("{0}")]
    Bridge(#[from] host::BridgeError),
    #[error("{0}")]
    Transport(#[from] transport::TransportError),
    #[error("{0}")]
    Config(#[from] config::ConfigError),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Application entry point
// ---------------------------------------------------------------------------

fn init_tracing(config: &AppConfig) {
    let fallback = config.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries the host protocol
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run() {
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("warning: failed to load .env file: {e}");
        }
    }

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("hostbridge: {e}");
            std::process::exit(2);
        }
    };
    init_tracing(&config);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to start async runtime");
            std::process::exit(1);
        }
    };

    let outcome = runtime.block_on(serve(config));
    // A blocking stdin read may still be parked on a runtime thread.
    runtime.shutdown_timeout(Duration::from_millis(500));

    if let Err(e) = outcome {
        tracing::error!(error = %e, "hostbridge exited with error");
        std::process::exit(1);
    }
}

/// Wire the bus to the host over stdin/stdout and run until stdin closes or
/// Ctrl-C.
pub async fn serve(config: AppConfig) -> Result<(), AppError> {
    let bus = EventBus::with_history_capacity(config.history_capacity);

    let (batcher, batch_task) = HostBatcher::start(
        LineSink::new(tokio::io::stdout()),
        BatchConfig {
            flush_interval: config.batch_flush_interval(),
            max_batch: config.batch_max_size,
        },
    );
    bus.set_forwarder(Arc::new(batcher));

    let bridge = HostBridge::new(bus.clone());
    let link = BusLink::new(bus.clone(), config.probe_timeout());
    let supervisor = TransportSupervisor::new(
        bus.clone(),
        Arc::new(link),
        SupervisorConfig::from(&config),
    );
    supervisor.start();

    bus.publish(AppEvent::AppStarted {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
    .await?;
    tracing::info!("hostbridge started");

    let outcome = tokio::select! {
        pumped = pump_lines(BufReader::new(tokio::io::stdin()), &bridge) => {
            pumped.map(|lines| tracing::info!(lines, "host closed stdin")).map_err(AppError::from)
        }
        signal = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received");
            signal.map_err(AppError::from)
        }
    };

    if let Err(e) = bus.publish(AppEvent::AppShutdown).await {
        tracing::warn!(error = %e, "failed to publish shutdown event");
    }
    supervisor.disconnect().await;
    bus.clear_forwarder();
    if let Err(e) = batch_task.await {
        tracing::warn!(error = %e, "host batcher did not shut down cleanly");
    }
    tracing::info!(stats = ?bus.stats(), "hostbridge stopped");
    outcome
}
