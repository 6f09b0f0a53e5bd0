use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use futures::FutureExt;
use tokio::sync::broadcast;
use tracing::{debug, error, trace, warn};

use super::envelope::{EmitOptions, Envelope};
use super::error::BusError;
use super::history::{History, DEFAULT_HISTORY_CAPACITY};
use super::middleware::{Flow, Middleware, MiddlewareChain, MiddlewareHandle};
use super::registry::{
    HandlerResult, Propagation, SubscribeOptions, Subscription, SubscriptionHandle,
    SubscriptionRegistry,
};
use super::scope::ScopedBus;
use super::stats::{BusStats, StatsRecorder};
use super::topic;
use crate::host::HostForwarder;

const TAP_CAPACITY: usize = 1024;

pub(crate) struct BusInner {
    registry: Arc<SubscriptionRegistry>,
    middleware: Arc<MiddlewareChain>,
    history: History,
    stats: StatsRecorder,
    forwarder: RwLock<Option<Arc<dyn HostForwarder>>>,
    tap: broadcast::Sender<Arc<Envelope>>,
}

/// Topic-routed event bus.
///
/// Cheap to clone; clones share subscriptions, middleware, history and the
/// host forwarder. Each `emit` runs its subscribers one after another, but
/// separate `emit` calls are not serialized against each other and may
/// interleave at `.await` points inside handlers.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(capacity: usize) -> Self {
        let (tap, _) = broadcast::channel(TAP_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                registry: Arc::new(SubscriptionRegistry::new()),
                middleware: Arc::new(MiddlewareChain::default()),
                history: History::new(capacity),
                stats: StatsRecorder::default(),
                forwarder: RwLock::new(None),
                tap,
            }),
        }
    }

    /// Handles held inside the bus's own subscriptions must not keep it alive.
    pub(crate) fn downgrade(&self) -> std::sync::Weak<BusInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(inner: &std::sync::Weak<BusInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Register `handler` for every event whose name matches `pattern`.
    ///
    /// Only the empty pattern is rejected; misplaced wildcards are accepted and
    /// simply never match.
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
        let subscription = Arc::new(Subscription::new(pattern, options, handler));
        let handle = SubscriptionHandle::new(&subscription, &self.inner.registry);
        debug!(
            pattern,
            id = subscription.id(),
            priority = subscription.priority(),
            once = subscription.is_once(),
            "subscribed"
        );
        self.inner.registry.add(subscription);
        Ok(handle)
    }

    pub fn on<F, Fut>(&self, pattern: &str, handler: F) -> Result<SubscriptionHandle, BusError>
    where
        F: Fn(Arc<Envelope>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.subscribe(pattern, SubscribeOptions::default(), handler)
    }

    pub fn once<F, Fut>(&self, pattern: &str, handler: F) -> Result<SubscriptionHandle, BusError>
    where
        F: Fn(Arc<Envelope>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.subscribe(pattern, SubscribeOptions::default().once(), handler)
    }

    pub fn use_middleware<M>(&self, middleware: M) -> MiddlewareHandle
    where
        M: Middleware + 'static,
    {
        let id = self.inner.middleware.add(Arc::new(middleware));
        MiddlewareHandle::new(id, &self.inner.middleware)
    }

    /// Install the outbound path to the host, replacing any previous one.
    pub fn set_forwarder(&self, forwarder: Arc<dyn HostForwarder>) {
        *self
            .inner
            .forwarder
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(forwarder);
    }

    pub fn clear_forwarder(&self) {
        self.inner
            .forwarder
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Passive receiver of every envelope that reaches fan-out.
    pub fn tap(&self) -> broadcast::Receiver<Arc<Envelope>> {
        self.inner.tap.subscribe()
    }

    // -----------------------------------------------------------------------
    // Emission
    // -----------------------------------------------------------------------

    /// Emit an event.
    ///
    /// Order of work: build the envelope, record it in history, run middleware
    /// (any `Flow::Cancel` stops here), forward to the host, then invoke
    /// matching subscribers by descending priority. Returns once every handler
    /// for this emit has finished.
    pub async fn emit(
        &self,
        name: &str,
        data: serde_json::Value,
        options: EmitOptions,
    ) -> Result<Arc<Envelope>, BusError> {
        topic::validate_name(name)?;
        let forward = options.should_forward();
        let envelope = Arc::new(Envelope::new(name, data, options));
        trace!(
            event = %envelope.name,
            id = %envelope.id,
            source = %envelope.source,
            "emitting event"
        );

        self.inner.history.push(envelope.clone());
        self.inner.stats.record_emitted(&envelope);

        if self.run_middleware(&envelope).await == Flow::Cancel {
            self.inner.stats.record_cancelled();
            debug!(event = %envelope.name, id = %envelope.id, "event cancelled by middleware");
            return Ok(envelope);
        }

        if forward {
            self.forward(&envelope).await;
        }

        // No receivers is the normal case.
        let _ = self.inner.tap.send(envelope.clone());

        let delivered = self.dispatch(&envelope).await;
        trace!(event = %envelope.name, delivered, "event dispatched");
        Ok(envelope)
    }

    async fn run_middleware(&self, envelope: &Arc<Envelope>) -> Flow {
        for middleware in self.inner.middleware.snapshot() {
            let outcome = AssertUnwindSafe(middleware.process(envelope.clone()))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(Flow::Continue)) => {}
                Ok(Ok(Flow::Cancel)) => return Flow::Cancel,
                Ok(Err(e)) => {
                    warn!(event = %envelope.name, error = %e, "middleware failed, continuing");
                }
                Err(_) => {
                    warn!(event = %envelope.name, "middleware panicked, continuing");
                }
            }
        }
        Flow::Continue
    }

    async fn forward(&self, envelope: &Arc<Envelope>) {
        let forwarder = self
            .inner
            .forwarder
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(forwarder) = forwarder else {
            return;
        };
        match forwarder.forward(envelope.clone()).await {
            Ok(()) => self.inner.stats.record_forwarded(),
            Err(e) => {
                self.inner.stats.record_forward_error();
                warn!(event = %envelope.name, error = %e, "failed to forward event to host");
            }
        }
    }

    async fn dispatch(&self, envelope: &Arc<Envelope>) -> usize {
        let candidates = self.inner.registry.matching(&envelope.name);
        let mut delivered = 0;

        for subscription in candidates {
            if !self
                .inner
                .registry
                .is_active(subscription.pattern(), subscription.id())
            {
                continue;
            }
            if !subscription.accepts(envelope) {
                continue;
            }
            if !subscription.try_claim() {
                continue;
            }

            let outcome = AssertUnwindSafe(subscription.invoke(envelope.clone()))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(propagation)) => {
                    delivered += 1;
                    self.inner.stats.record_delivered(&envelope.name);
                    if subscription.is_once() {
                        self.inner
                            .registry
                            .remove(subscription.pattern(), subscription.id());
                    }
                    if propagation == Propagation::Stop {
                        debug!(
                            event = %envelope.name,
                            subscription = subscription.id(),
                            "propagation stopped"
                        );
                        break;
                    }
                }
                Ok(Err(e)) => {
                    subscription.release();
                    self.inner.stats.record_handler_error();
                    error!(
                        event = %envelope.name,
                        pattern = subscription.pattern(),
                        subscription = subscription.id(),
                        error = %e,
                        "event handler failed"
                    );
                }
                Err(_) => {
                    subscription.release();
                    self.inner.stats.record_handler_error();
                    error!(
                        event = %envelope.name,
                        pattern = subscription.pattern(),
                        subscription = subscription.id(),
                        "event handler panicked"
                    );
                }
            }
        }

        delivered
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Retained envelopes in emission order, optionally narrowed by pattern
    /// and limited to the most recent `limit`.
    pub fn history(&self, pattern: Option<&str>, limit: Option<usize>) -> Vec<Arc<Envelope>> {
        self.inner.history.query(pattern, limit)
    }

    pub fn history_capacity(&self) -> usize {
        self.inner.history.capacity()
    }

    pub fn stats(&self) -> BusStats {
        self.inner.stats.snapshot()
    }

    /// Distinct names present in history.
    pub fn event_names(&self) -> Vec<String> {
        self.inner.history.names()
    }

    pub fn active_patterns(&self) -> Vec<String> {
        self.inner.registry.patterns()
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn middleware_count(&self) -> usize {
        self.inner.middleware.len()
    }

    /// Drop all subscriptions, middleware, history and counters. The
    /// forwarder stays installed.
    pub fn reset(&self) {
        self.inner.registry.clear();
        self.inner.middleware.clear();
        self.inner.history.clear();
        self.inner.stats.reset();
        debug!("event bus reset");
    }

    /// View of this bus that prefixes every name and pattern with
    /// `namespace.`.
    pub fn scope(&self, namespace: &str) -> ScopedBus {
        ScopedBus::new(self.clone(), namespace)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
