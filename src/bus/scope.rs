use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::envelope::{EmitOptions, Envelope};
use super::error::BusError;
use super::event_bus::EventBus;
use super::registry::{HandlerResult, SubscribeOptions, SubscriptionHandle};
use super::topic::{MULTI_WILDCARD, SEPARATOR};

/// Namespaced view of an [`EventBus`].
///
/// Every name and pattern passed in is prefixed with `namespace.` before it
/// reaches the bus, so `scope("ui").emit("clicked", ..)` emits `ui.clicked`.
/// Subscriptions made here are ordinary bus subscriptions.
#[derive(Clone)]
pub struct ScopedBus {
    bus: EventBus,
    namespace: String,
}

impl ScopedBus {
    pub(crate) fn new(bus: EventBus, namespace: &str) -> Self {
        Self {
            bus,
            namespace: namespace.to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    fn qualify(&self, name: &str) -> String {
        format!("{}{SEPARATOR}{name}", self.namespace)
    }

    pub async fn emit(
        &self,
        name: &str,
        data: Value,
        options: EmitOptions,
    ) -> Result<Arc<Envelope>, BusError> {
        self.bus.emit(&self.qualify(name), data, options).await
    }

    pub fn subscribe<F, Fut>(
        &self,
        pattern: &str,
        options: SubscribeOptions,
        handler: F,
    ) -> Result<SubscriptionHandle, BusError>
    where
        F: Fn(Arc<Envelope>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        if pattern.is_empty() {
            return Err(BusError::EmptyPattern);
        }
        self.bus.subscribe(&self.qualify(pattern), options, handler)
    }

    pub fn on<F, Fut>(&self, pattern: &str, handler: F) -> Result<SubscriptionHandle, BusError>
    where
        F: Fn(Arc<Envelope>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.subscribe(pattern, SubscribeOptions::default(), handler)
    }

    pub async fn request(&self, name: &str, data: Value, timeout: Duration) -> Result<Value, BusError> {
        self.bus.request(&self.qualify(name), data, timeout).await
    }

    /// History entries under this namespace.
    pub fn history(&self, limit: Option<usize>) -> Vec<Arc<Envelope>> {
        self.bus.history(Some(&self.qualify(MULTI_WILDCARD)), limit)
    }

    pub fn scope(&self, namespace: &str) -> ScopedBus {
        ScopedBus::new(self.bus.clone(), &self.qualify(namespace))
    }
}
