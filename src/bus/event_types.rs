//! Well-known event names and flush policy.
//!
//! Producers and consumers agree on these names by convention; the bus does
//! not enforce them. [`AppEvent`] gives the common ones a typed payload.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::envelope::{EmitOptions, Envelope};
use super::error::BusError;
use super::event_bus::EventBus;
use super::request::REPLY_TOPIC_PREFIX;

// ---------------------------------------------------------------------------
// Namespaces
// ---------------------------------------------------------------------------

pub const NS_COUNTER: &str = "counter";
pub const NS_DATABASE: &str = "database";
pub const NS_SYSTEM: &str = "system";
pub const NS_CONNECTION: &str = "connection";
pub const NS_HOST: &str = "host";
pub const NS_BUILD: &str = "build";
pub const NS_WEBUI: &str = "webui";
pub const NS_APP: &str = "app";

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

pub const COUNTER_INCREMENT: &str = "counter.increment";
pub const COUNTER_RESET: &str = "counter.reset";
pub const COUNTER_VALUE_CHANGED: &str = "counter.value_changed";

pub const DATABASE_CONNECTED: &str = "database.connected";
pub const DATABASE_DISCONNECTED: &str = "database.disconnected";
pub const DATABASE_USERS_FETCHED: &str = "database.users_fetched";
pub const DATABASE_USER_ADDED: &str = "database.user_added";
pub const DATABASE_USER_UPDATED: &str = "database.user_updated";
pub const DATABASE_USER_DELETED: &str = "database.user_deleted";
pub const DATABASE_ERROR: &str = "database.error";

pub const SYSTEM_INFO_REQUESTED: &str = "system.info_requested";
pub const SYSTEM_INFO_RECEIVED: &str = "system.info_received";

pub const CONNECTION_CONNECTING: &str = "connection.connecting";
pub const CONNECTION_CONNECTED: &str = "connection.connected";
pub const CONNECTION_DISCONNECTED: &str = "connection.disconnected";
pub const CONNECTION_ERROR: &str = "connection.error";
pub const CONNECTION_FAILED: &str = "connection.failed";
pub const CONNECTION_QUALITY_CHANGED: &str = "connection.quality_changed";

/// Host announces the channel is up.
pub const HOST_CONNECTED: &str = "host.connected";
pub const HOST_DISCONNECTED: &str = "host.disconnected";
/// Liveness probe, answered by the host through the request/reply path.
pub const HOST_PING: &str = "host.ping";
pub const HOST_HANDSHAKE: &str = "host.handshake";

pub const BUILD_STARTED: &str = "build.started";
pub const BUILD_PROGRESS: &str = "build.progress";
pub const BUILD_COMPLETED: &str = "build.completed";

pub const WEBUI_CONNECTED: &str = "webui.connected";
pub const WEBUI_READY: &str = "webui.ready";
pub const WEBUI_DISCONNECTED: &str = "webui.disconnected";

pub const APP_STARTED: &str = "app.started";
pub const APP_SHUTDOWN: &str = "app.shutdown";

// ---------------------------------------------------------------------------
// Typed events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    CounterIncrement,
    CounterReset,
    CounterValueChanged { value: i64 },
    DatabaseConnected,
    DatabaseDisconnected,
    UsersFetched { users: Vec<UserRecord> },
    UserAdded(UserRecord),
    UserUpdated(UserRecord),
    UserDeleted { id: i64 },
    DatabaseError { message: String },
    SystemInfoRequested,
    SystemInfoReceived { cpu: String, memory: String, os: String },
    WebUiConnected,
    WebUiReady,
    WebUiDisconnected,
    BuildStarted { build_id: String },
    BuildProgress { build_id: String, step: String, progress: f32 },
    BuildCompleted { build_id: String, success: bool, duration_ms: u64 },
    AppStarted { version: String },
    AppShutdown,
    /// Anything outside the catalogue.
    Custom { name: String, payload: Value },
}

impl AppEvent {
    pub fn name(&self) -> &str {
        match self {
            Self::CounterIncrement => COUNTER_INCREMENT,
            Self::CounterReset => COUNTER_RESET,
            Self::CounterValueChanged { .. } => COUNTER_VALUE_CHANGED,
            Self::DatabaseConnected => DATABASE_CONNECTED,
            Self::DatabaseDisconnected => DATABASE_DISCONNECTED,
            Self::UsersFetched { .. } => DATABASE_USERS_FETCHED,
            Self::UserAdded(_) => DATABASE_USER_ADDED,
            Self::UserUpdated(_) => DATABASE_USER_UPDATED,
            Self::UserDeleted { .. } => DATABASE_USER_DELETED,
            Self::DatabaseError { .. } => DATABASE_ERROR,
            Self::SystemInfoRequested => SYSTEM_INFO_REQUESTED,
            Self::SystemInfoReceived { .. } => SYSTEM_INFO_RECEIVED,
            Self::WebUiConnected => WEBUI_CONNECTED,
            Self::WebUiReady => WEBUI_READY,
            Self::WebUiDisconnected => WEBUI_DISCONNECTED,
            Self::BuildStarted { .. } => BUILD_STARTED,
            Self::BuildProgress { .. } => BUILD_PROGRESS,
            Self::BuildCompleted { .. } => BUILD_COMPLETED,
            Self::AppStarted { .. } => APP_STARTED,
            Self::AppShutdown => APP_SHUTDOWN,
            Self::Custom { name, .. } => name,
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Self::CounterIncrement
            | Self::CounterReset
            | Self::DatabaseConnected
            | Self::DatabaseDisconnected
            | Self::SystemInfoRequested
            | Self::WebUiConnected
            | Self::WebUiReady
            | Self::WebUiDisconnected
            | Self::AppShutdown => json!({}),
            Self::CounterValueChanged { value } => json!({ "value": value }),
            Self::UsersFetched { users } => json!({ "count": users.len(), "users": users }),
            Self::UserAdded(user) | Self::UserUpdated(user) => json!(user),
            Self::UserDeleted { id } => json!({ "id": id }),
            Self::DatabaseError { message } => json!({ "message": message }),
            Self::SystemInfoReceived { cpu, memory, os } => {
                json!({ "cpu": cpu, "memory": memory, "os": os })
            }
            Self::BuildStarted { build_id } => json!({ "buildId": build_id }),
            Self::BuildProgress {
                build_id,
                step,
                progress,
            } => json!({ "buildId": build_id, "step": step, "progress": progress }),
            Self::BuildCompleted {
                build_id,
                success,
                duration_ms,
            } => json!({ "buildId": build_id, "success": success, "durationMs": duration_ms }),
            Self::AppStarted { version } => json!({ "version": version }),
            Self::Custom { payload, .. } => payload.clone(),
        }
    }
}

impl EventBus {
    /// Emit a catalogue event with default options.
    pub async fn publish(&self, event: AppEvent) -> Result<Arc<Envelope>, BusError> {
        self.emit(event.name(), event.payload(), EmitOptions::default())
            .await
    }
}

// ---------------------------------------------------------------------------
// Flush policy
// ---------------------------------------------------------------------------

/// Returns true if this envelope should reach the host without waiting in the
/// outbound batch. Immediate envelopes still go out after whatever is already
/// buffered so ordering is preserved.
pub fn should_flush_immediately(envelope: &Envelope) -> bool {
    if envelope.correlation_id.is_some() || envelope.reply_to.is_some() {
        return true;
    }
    matches!(
        envelope.namespace(),
        NS_CONNECTION | NS_HOST | REPLY_TOPIC_PREFIX
    ) || envelope.name == APP_SHUTDOWN
}
