//! The boundary to the host process.
//!
//! Outbound, the bus hands envelopes to a [`HostForwarder`]. Inbound, the host
//! calls [`HostBridge::dispatch`] with a JSON string; the event is re-emitted
//! locally as `source = backend` and never forwarded back.

pub mod stdio;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{trace, warn};

use crate::bus::{BusError, EmitOptions, Envelope, EventBus, EventSource};
use crate::transport::TransportError;

/// Outbound path from the bus to the host.
#[async_trait]
pub trait HostForwarder: Send + Sync {
    async fn forward(&self, envelope: Arc<Envelope>) -> Result<(), TransportError>;
}

/// Adapter turning an async closure into a [`HostForwarder`].
pub struct FnForwarder<F>(F);

pub fn forwarder_fn<F, Fut>(f: F) -> Arc<FnForwarder<F>>
where
    F: Fn(Arc<Envelope>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TransportError>> + Send + 'static,
{
    Arc::new(FnForwarder(f))
}

#[async_trait]
impl<F, Fut> HostForwarder for FnForwarder<F>
where
    F: Fn(Arc<Envelope>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TransportError>> + Send + 'static,
{
    async fn forward(&self, envelope: Arc<Envelope>) -> Result<(), TransportError> {
        (self.0)(envelope).await
    }
}

/// What the host sends us.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

/// What we send the host for each forwarded envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub id: String,
    pub event: String,
    pub data: Value,
    pub timestamp: i64,
    pub source: EventSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl From<&Envelope> for OutboundMessage {
    fn from(envelope: &Envelope) -> Self {
        Self {
            id: envelope.id.clone(),
            event: envelope.name.clone(),
            data: envelope.data.clone(),
            timestamp: envelope.timestamp,
            source: envelope.source,
            correlation_id: envelope.correlation_id.clone(),
            reply_to: envelope.reply_to.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("malformed host message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("host event rejected: {0}")]
    Rejected(#[from] BusError),
}

/// Inbound entry point for host messages.
#[derive(Clone)]
pub struct HostBridge {
    bus: EventBus,
}

impl HostBridge {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Parse one raw host message and emit it locally. Malformed input is
    /// logged and returned as an error; nothing is emitted for it.
    pub async fn dispatch(&self, raw: &str) -> Result<Arc<Envelope>, BridgeError> {
        let message: InboundMessage = serde_json::from_str(raw).map_err(|e| {
            warn!(error = %e, "dropping malformed host message");
            BridgeError::Malformed(e)
        })?;
        self.dispatch_message(message).await
    }

    pub async fn dispatch_message(&self, message: InboundMessage) -> Result<Arc<Envelope>, BridgeError> {
        trace!(event = %message.event, "host message received");
        let mut options = EmitOptions::from_backend();
        if let Some(correlation_id) = message.correlation_id {
            options = options.with_correlation_id(correlation_id);
        }
        if let Some(reply_to) = message.reply_to {
            options = options.with_reply_to(reply_to);
        }
        for (key, value) in message.metadata {
            options = options.with_metadata(key, value);
        }

        self.bus
            .emit(&message.event, message.data, options)
            .await
            .map_err(|e| {
                warn!(event = %message.event, error = %e, "host event rejected");
                BridgeError::Rejected(e)
            })
    }
}
