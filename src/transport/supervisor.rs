//! Connection supervisor.
//!
//! One driver task owns the connect/heartbeat/reconnect cycle:
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──ok──▶ Connected
//!      ▲                        │                  │
//!      └──── wait `reconnect_delay` ◀── failure ───┘
//! ```
//!
//! Every failed connect and every drop of an established connection counts
//! towards `max_reconnect_attempts`; a successful connect clears the count.
//! Once the ceiling is reached the supervisor stays `Disconnected`, publishes
//! `connection.failed` once and the driver exits. Every transition is also
//! published on the bus as a `connection.*` event.
//!
//! Host signals (`host.connected`, `host.disconnected`) reach the driver via
//! bus subscriptions. The command channel's sender lives in the supervisor, so
//! a bus `reset()` only drops the subscriptions; the driver notices and
//! subscribes again on its next step.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use super::state::{ConnectionQuality, ConnectionRecord, ConnectionSnapshot, ConnectionState};
use super::{HostTransport, TransportError};
use crate::bus::event_types::{
    CONNECTION_CONNECTED, CONNECTION_CONNECTING, CONNECTION_DISCONNECTED, CONNECTION_ERROR,
    CONNECTION_FAILED, CONNECTION_QUALITY_CHANGED, HOST_CONNECTED, HOST_DISCONNECTED,
};
use crate::bus::{EmitOptions, EventBus, Propagation, SubscriptionHandle};
use crate::config::AppConfig;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
pub const DEFAULT_TRANSITION_LOG_SIZE: usize = 20;
pub const DEFAULT_ERROR_LOG_SIZE: usize = 50;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub heartbeat_interval: Duration,
    /// Upper bound on one probe; should not exceed `heartbeat_interval`.
    pub probe_timeout: Duration,
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub transition_log_size: usize,
    pub error_log_size: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            transition_log_size: DEFAULT_TRANSITION_LOG_SIZE,
            error_log_size: DEFAULT_ERROR_LOG_SIZE,
        }
    }
}

impl From<&AppConfig> for SupervisorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            probe_timeout: config.probe_timeout(),
            connect_timeout: config.request_timeout(),
            reconnect_delay: config.reconnect_delay(),
            max_reconnect_attempts: config.max_reconnect_attempts,
            transition_log_size: config.transition_log_size,
            error_log_size: config.error_log_size,
        }
    }
}

#[derive(Debug)]
enum Command {
    HostConnected,
    HostDisconnected(String),
}

enum Step {
    Connect,
    Heartbeat,
    Wait(Duration),
    Stop,
}

struct SupervisorInner {
    bus: EventBus,
    transport: Arc<dyn HostTransport>,
    config: SupervisorConfig,
    record: Mutex<ConnectionRecord>,
    failure_reported: AtomicBool,
    driver: Mutex<Option<JoinHandle<()>>>,
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    host_subscriptions: Mutex<Vec<SubscriptionHandle>>,
}

/// Keeps the host channel alive and reports on it.
///
/// Cheap to clone; clones control the same driver.
#[derive(Clone)]
pub struct TransportSupervisor {
    inner: Arc<SupervisorInner>,
}

impl TransportSupervisor {
    pub fn new(bus: EventBus, transport: Arc<dyn HostTransport>, config: SupervisorConfig) -> Self {
        let record = ConnectionRecord::new(config.transition_log_size, config.error_log_size);
        Self {
            inner: Arc::new(SupervisorInner {
                bus,
                transport,
                config,
                record: Mutex::new(record),
                failure_reported: AtomicBool::new(false),
                driver: Mutex::new(None),
                commands: Mutex::new(None),
                host_subscriptions: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// Spawn the driver and begin connecting. Re-arms a supervisor that gave
    /// up or was disconnected; a no-op while the driver is running.
    pub fn start(&self) {
        let mut driver = lock(&self.inner.driver);
        if driver.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("supervisor already running");
            return;
        }

        lock(&self.inner.record).reconnect_attempts = 0;
        self.inner.failure_reported.store(false, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.inner.commands) = Some(tx);
        self.inner.unwatch_host_signals();
        self.inner.watch_host_signals();

        let inner = self.inner.clone();
        *driver = Some(tokio::spawn(async move { inner.drive(rx).await }));
        info!("transport supervisor started");
    }

    /// Manual disconnect. Reconnection is disabled until the next
    /// [`start`](Self::start).
    pub async fn disconnect(&self) {
        if let Some(task) = lock(&self.inner.driver).take() {
            task.abort();
        }
        lock(&self.inner.commands).take();
        self.inner.unwatch_host_signals();

        let previous = {
            let mut record = lock(&self.inner.record);
            record.reconnect_attempts = self.inner.config.max_reconnect_attempts;
            record.transition(ConnectionState::Disconnected, "manual disconnect")
        };
        if let Some(previous) = previous {
            self.inner
                .publish_transition(previous, ConnectionState::Disconnected, "manual disconnect")
                .await;
        }
        if let Err(e) = self.inner.transport.close().await {
            warn!(error = %e, "failed to close host transport");
        }
        info!("transport disconnected by request");
    }

    /// Wait for the driver to finish, e.g. after it gave up.
    pub async fn shutdown(&self) {
        let task = lock(&self.inner.driver).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!(error = %e, "supervisor driver panicked");
                }
            }
        }
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        lock(&self.inner.record).snapshot()
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.inner.record).state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn quality(&self) -> ConnectionQuality {
        lock(&self.inner.record).quality()
    }

    pub fn reset_metrics(&self) {
        lock(&self.inner.record).reset_metrics();
        info!("connection metrics reset");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SupervisorInner {
    /// Subscribe to host signals unless every subscription is still live.
    /// Re-entered on each driver step so a bus reset is recovered from.
    fn watch_host_signals(&self) {
        let Some(tx) = lock(&self.commands).clone() else {
            return;
        };
        let mut subscriptions = lock(&self.host_subscriptions);
        if !subscriptions.is_empty() && subscriptions.iter().all(SubscriptionHandle::is_active) {
            return;
        }
        for handle in subscriptions.drain(..) {
            handle.unsubscribe();
        }

        let connected_tx = tx.clone();
        let connected = self.bus.on(HOST_CONNECTED, move |_| {
            let _ = connected_tx.send(Command::HostConnected);
            async { Ok(Propagation::Continue) }
        });
        let disconnected = self.bus.on(HOST_DISCONNECTED, move |envelope| {
            let reason = envelope.data["reason"]
                .as_str()
                .unwrap_or("host reported disconnect")
                .to_string();
            let _ = tx.send(Command::HostDisconnected(reason));
            async { Ok(Propagation::Continue) }
        });
        // Both names are constants, so these only fail on an empty pattern.
        subscriptions.extend(connected.into_iter().chain(disconnected));
        debug!("watching host signals");
    }

    fn unwatch_host_signals(&self) {
        for handle in lock(&self.host_subscriptions).drain(..) {
            handle.unsubscribe();
        }
    }

    async fn drive(self: Arc<Self>, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut step = Step::Connect;
        loop {
            step = match step {
                Step::Connect => self.connect().await,
                Step::Heartbeat => self.heartbeat(&mut commands).await,
                Step::Wait(delay) => self.wait(delay, &mut commands).await,
                Step::Stop => break,
            };
        }
        debug!("supervisor driver stopped");
    }

    async fn connect(&self) -> Step {
        let (previous, attempt) = {
            let mut record = lock(&self.record);
            record.metrics.connection_attempts += 1;
            let previous = record.transition(ConnectionState::Connecting, "connecting");
            (previous, record.reconnect_attempts + 1)
        };
        if let Some(previous) = previous {
            self.publish_transition(previous, ConnectionState::Connecting, "connecting")
                .await;
        }
        debug!(attempt, max = self.config.max_reconnect_attempts, "connecting to host");

        let outcome = match time::timeout(self.config.connect_timeout, self.transport.connect()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.config.connect_timeout)),
        };

        match outcome {
            Ok(()) => {
                {
                    let mut record = lock(&self.record);
                    record.reconnect_attempts = 0;
                    record.metrics.successful_connections += 1;
                    record.transition(ConnectionState::Connected, "connected");
                }
                info!("connected to host");
                self.publish_transition(ConnectionState::Connecting, ConnectionState::Connected, "connected")
                    .await;
                Step::Heartbeat
            }
            Err(e) => {
                let reason = format!("connect failed: {e}");
                let attempts = {
                    let mut record = lock(&self.record);
                    record.reconnect_attempts += 1;
                    record.metrics.failed_connections += 1;
                    record.transition(ConnectionState::Disconnected, &reason);
                    record.reconnect_attempts
                };
                warn!(
                    attempt = attempts,
                    max = self.config.max_reconnect_attempts,
                    error = %e,
                    "failed to connect to host"
                );
                self.record_error(&reason).await;
                self.publish_transition(ConnectionState::Connecting, ConnectionState::Disconnected, &reason)
                    .await;
                self.after_disconnect().await
            }
        }
    }

    async fn heartbeat(&self, commands: &mut mpsc::UnboundedReceiver<Command>) -> Step {
        let period = self.config.heartbeat_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        let mut quality = ConnectionQuality::Unknown;

        loop {
            self.watch_host_signals();
            tokio::select! {
                _ = ticker.tick() => {
                    match self.probe().await {
                        Ok(current) => {
                            if current != quality {
                                self.publish_quality(quality, current).await;
                                quality = current;
                            }
                        }
                        Err(e) => {
                            let reason = format!("heartbeat failed: {e}");
                            warn!(error = %e, "host heartbeat failed");
                            self.record_error(&reason).await;
                            return self.drop_connection(&reason).await;
                        }
                    }
                }
                command = commands.recv() => match command {
                    Some(Command::HostDisconnected(reason)) => {
                        info!(%reason, "host reported disconnect");
                        return self.drop_connection(&reason).await;
                    }
                    Some(Command::HostConnected) => {}
                    None => return Step::Stop,
                },
            }
        }
    }

    async fn probe(&self) -> Result<ConnectionQuality, TransportError> {
        lock(&self.record).record_ping();
        match time::timeout(self.config.probe_timeout, self.transport.ping()).await {
            Ok(Ok(())) => {
                let mut record = lock(&self.record);
                record.record_pong();
                Ok(record.quality())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::Timeout(self.config.probe_timeout)),
        }
    }

    async fn wait(&self, delay: Duration, commands: &mut mpsc::UnboundedReceiver<Command>) -> Step {
        let sleep = time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            self.watch_host_signals();
            tokio::select! {
                _ = &mut sleep => return Step::Connect,
                command = commands.recv() => match command {
                    Some(Command::HostConnected) => {
                        debug!("host announced itself, reconnecting now");
                        return Step::Connect;
                    }
                    Some(Command::HostDisconnected(_)) => {}
                    None => return Step::Stop,
                },
            }
        }
    }

    async fn drop_connection(&self, reason: &str) -> Step {
        let previous = {
            let mut record = lock(&self.record);
            record.reconnect_attempts += 1;
            record.transition(ConnectionState::Disconnected, reason)
        };
        if let Some(previous) = previous {
            self.publish_transition(previous, ConnectionState::Disconnected, reason)
                .await;
        }
        self.after_disconnect().await
    }

    /// Schedule the next connect attempt, or give up at the ceiling.
    async fn after_disconnect(&self) -> Step {
        let attempts = lock(&self.record).reconnect_attempts;
        if attempts < self.config.max_reconnect_attempts {
            return Step::Wait(self.config.reconnect_delay);
        }
        if !self.failure_reported.swap(true, Ordering::SeqCst) {
            let last_error = lock(&self.record).metrics.last_error.clone();
            error!(
                attempts,
                "maximum reconnection attempts reached, giving up on host connection"
            );
            self.publish(
                CONNECTION_FAILED,
                json!({
                    "attempts": attempts,
                    "max_attempts": self.config.max_reconnect_attempts,
                    "last_error": last_error,
                    "timestamp": Utc::now().timestamp_millis(),
                }),
            )
            .await;
        }
        Step::Stop
    }

    async fn record_error(&self, message: &str) {
        let metrics = {
            let mut record = lock(&self.record);
            record.record_error(message);
            record.metrics.clone()
        };
        self.publish(
            CONNECTION_ERROR,
            json!({
                "error": message,
                "timestamp": Utc::now().timestamp_millis(),
                "metrics": metrics,
            }),
        )
        .await;
    }

    async fn publish_transition(&self, previous: ConnectionState, current: ConnectionState, reason: &str) {
        let name = match current {
            ConnectionState::Connecting => CONNECTION_CONNECTING,
            ConnectionState::Connected => CONNECTION_CONNECTED,
            ConnectionState::Disconnected => CONNECTION_DISCONNECTED,
        };
        self.publish(
            name,
            json!({
                "previous_state": previous,
                "current_state": current,
                "reason": reason,
                "timestamp": Utc::now().timestamp_millis(),
            }),
        )
        .await;
    }

    async fn publish_quality(&self, previous: ConnectionQuality, current: ConnectionQuality) {
        let latency_ms = lock(&self.record).latency().map(|l| l.as_millis() as u64);
        debug!(%previous, %current, ?latency_ms, "connection quality changed");
        self.publish(
            CONNECTION_QUALITY_CHANGED,
            json!({
                "previous": previous,
                "current": current,
                "latency_ms": latency_ms,
                "timestamp": Utc::now().timestamp_millis(),
            }),
        )
        .await;
    }

    async fn publish(&self, name: &str, payload: Value) {
        if let Err(e) = self.bus.emit(name, payload, EmitOptions::local()).await {
            error!(event = name, error = %e, "failed to publish connection event");
        }
    }
}
