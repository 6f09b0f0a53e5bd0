//! Subscription storage.
//!
//! Subscriptions are grouped by pattern. Each pattern's list is kept sorted by
//! descending priority with a stable sort, so equal priorities keep insertion
//! order. A pattern key disappears as soon as its list is empty.
//!
//! Dispatch never iterates a live list: callers take a snapshot of `Arc`s and
//! re-check [`SubscriptionRegistry::is_active`] before each invocation, so a
//! handler may unsubscribe itself or any other subscription mid-round.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::future::BoxFuture;
use futures::FutureExt;
use uuid::Uuid;

use super::envelope::Envelope;
use super::error::HandlerError;
use super::topic;

static INSERTION_SEQ: AtomicU64 = AtomicU64::new(0);

/// What a handler asks the bus to do with the rest of the fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Propagation {
    #[default]
    Continue,
    /// Skip the remaining subscribers of this emit only.
    Stop,
}

pub type HandlerResult = Result<Propagation, HandlerError>;
pub type HandlerFuture = BoxFuture<'static, HandlerResult>;
pub type Filter = Arc<dyn Fn(&Envelope) -> bool + Send + Sync>;
type Handler = Arc<dyn Fn(Arc<Envelope>) -> HandlerFuture + Send + Sync>;

/// Options for [`EventBus::subscribe`](super::EventBus::subscribe).
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    /// Higher runs first.
    pub priority: i32,
    /// A rejected envelope neither removes the subscription nor consumes `once`.
    pub filter: Option<Filter>,
    /// Remove after the first successful invocation.
    pub once: bool,
}

impl SubscribeOptions {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Envelope) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }
}

impl fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("priority", &self.priority)
            .field("filter", &self.filter.is_some())
            .field("once", &self.once)
            .finish()
    }
}

pub struct Subscription {
    id: String,
    pattern: String,
    priority: i32,
    once: bool,
    seq: u64,
    filter: Option<Filter>,
    handler: Handler,
    /// Held while a `once` invocation is in flight so interleaved emits
    /// cannot run it twice.
    claimed: AtomicBool,
}

impl Subscription {
    pub(crate) fn new<F, Fut>(pattern: &str, options: SubscribeOptions, handler: F) -> Self
    where
        F: Fn(Arc<Envelope>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            id: Uuid::new_v4().to_string(),
            pattern: pattern.to_string(),
            priority: options.priority,
            once: options.once,
            seq: INSERTION_SEQ.fetch_add(1, Ordering::Relaxed),
            filter: options.filter,
            handler: Arc::new(move |envelope| handler(envelope).boxed()),
            claimed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn is_once(&self) -> bool {
        self.once
    }

    pub(crate) fn accepts(&self, envelope: &Envelope) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(envelope))
    }

    pub(crate) fn try_claim(&self) -> bool {
        !self.once
            || self
                .claimed
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    pub(crate) fn release(&self) {
        if self.once {
            self.claimed.store(false, Ordering::Release);
        }
    }

    pub(crate) fn invoke(&self, envelope: Arc<Envelope>) -> HandlerFuture {
        (self.handler)(envelope)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .field("priority", &self.priority)
            .field("once", &self.once)
            .finish()
    }
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    by_pattern: Mutex<HashMap<String, Vec<Arc<Subscription>>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Arc<Subscription>>>> {
        self.by_pattern.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append, then re-sort the pattern's list by descending priority.
    pub fn add(&self, subscription: Arc<Subscription>) {
        let mut map = self.lock();
        let list = map.entry(subscription.pattern.clone()).or_default();
        list.push(subscription);
        list.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Remove by id. Returns false if it was already gone.
    pub fn remove(&self, pattern: &str, id: &str) -> bool {
        let mut map = self.lock();
        let Some(list) = map.get_mut(pattern) else {
            return false;
        };
        let before = list.len();
        list.retain(|subscription| subscription.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            map.remove(pattern);
        }
        removed
    }

    pub fn is_active(&self, pattern: &str, id: &str) -> bool {
        self.lock()
            .get(pattern)
            .is_some_and(|list| list.iter().any(|subscription| subscription.id == id))
    }

    /// Registered pattern keys that select `name`.
    pub fn patterns_matching(&self, name: &str) -> Vec<String> {
        self.lock()
            .keys()
            .filter(|pattern| topic::matches(pattern, name))
            .cloned()
            .collect()
    }

    /// Copy of one pattern's list, in dispatch order.
    pub fn snapshot(&self, pattern: &str) -> Vec<Arc<Subscription>> {
        self.lock().get(pattern).cloned().unwrap_or_default()
    }

    /// Snapshot of every subscription selecting `name`, ordered by priority
    /// (descending) and then insertion order. Which pattern a subscription was
    /// registered under does not affect its position.
    ///
    /// Pattern keys are selected first and each list is re-fetched, so a
    /// pattern emptied in between contributes nothing.
    pub fn matching(&self, name: &str) -> Vec<Arc<Subscription>> {
        let mut selected: Vec<Arc<Subscription>> = self
            .patterns_matching(name)
            .iter()
            .flat_map(|pattern| self.snapshot(pattern))
            .collect();
        selected.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        selected
    }

    pub fn patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = self.lock().keys().cloned().collect();
        patterns.sort();
        patterns
    }

    pub fn len(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// Returned by `subscribe`. Dropping it leaves the subscription in place;
/// call [`unsubscribe`](Self::unsubscribe) to remove it.
pub struct SubscriptionHandle {
    id: String,
    pattern: String,
    registry: Weak<SubscriptionRegistry>,
    released: AtomicBool,
}

impl SubscriptionHandle {
    pub(crate) fn new(subscription: &Subscription, registry: &Arc<SubscriptionRegistry>) -> Self {
        Self {
            id: subscription.id.clone(),
            pattern: subscription.pattern.clone(),
            registry: Arc::downgrade(registry),
            released: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// True while the subscription is still registered.
    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.is_active(&self.pattern, &self.id))
    }

    /// Remove the subscription. Only the first call can return true; later
    /// calls are no-ops.
    pub fn unsubscribe(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.remove(&self.pattern, &self.id))
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .finish()
    }
}
