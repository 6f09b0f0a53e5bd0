use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);
static LAST_TIMESTAMP: AtomicI64 = AtomicI64::new(0);

/// Which side of the host boundary an event originated on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    #[default]
    Frontend,
    Backend,
}

impl EventSource {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Frontend => "frontend",
            Self::Backend => "backend",
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One emitted event. Built once by the bus and shared as `Arc<Envelope>`;
/// nothing mutates it after dispatch begins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub id: String,
    pub name: String,
    pub data: serde_json::Value,
    /// Unix milliseconds, non-decreasing within the process.
    pub timestamp: i64,
    pub source: EventSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Envelope {
    pub(crate) fn new(name: &str, data: serde_json::Value, options: EmitOptions) -> Self {
        let timestamp = next_timestamp();
        Self {
            id: next_id(timestamp),
            name: name.to_string(),
            data,
            timestamp,
            source: options.source,
            correlation_id: options.correlation_id,
            reply_to: options.reply_to,
            metadata: options.metadata,
        }
    }

    /// True if a reply is expected on `reply_to`.
    pub fn is_request(&self) -> bool {
        self.reply_to.is_some()
    }

    pub fn is_from_backend(&self) -> bool {
        self.source == EventSource::Backend
    }

    /// First segment of the name (`database` for `database.user_added`).
    pub fn namespace(&self) -> &str {
        self.name.split('.').next().unwrap_or_default()
    }
}

fn next_timestamp() -> i64 {
    let now = Utc::now().timestamp_millis();
    let previous = LAST_TIMESTAMP.fetch_max(now, Ordering::SeqCst);
    now.max(previous)
}

/// Time component, process sequence and a random suffix. Zero padding keeps
/// lexical order equal to emission order.
fn next_id(timestamp: i64) -> String {
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let suffix: u16 = rand::random();
    format!("evt-{timestamp:013}-{seq:08}-{suffix:04x}")
}

/// Per-call emission options.
#[derive(Debug, Clone)]
pub struct EmitOptions {
    pub source: EventSource,
    /// Forward to the host boundary. Ignored for backend-sourced events, which
    /// are never sent back.
    pub forward: bool,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            source: EventSource::Frontend,
            forward: true,
            correlation_id: None,
            reply_to: None,
            metadata: HashMap::new(),
        }
    }
}

impl EmitOptions {
    /// Options for events that arrived from the host.
    pub fn from_backend() -> Self {
        Self {
            source: EventSource::Backend,
            forward: false,
            ..Default::default()
        }
    }

    /// Options for events that stay inside this process.
    pub fn local() -> Self {
        Self {
            forward: false,
            ..Default::default()
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_forward(mut self, forward: bool) -> Self {
        self.forward = forward;
        self
    }

    /// Whether the bus should hand the envelope to the host forwarder.
    pub(crate) fn should_forward(&self) -> bool {
        self.forward && self.source != EventSource::Backend
    }
}
