//! Middleware chain run before fan-out.
//!
//! Middleware sees every envelope in insertion order and may cancel it. A
//! failing middleware is logged by the bus and treated as `Flow::Continue`.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use async_trait::async_trait;

use super::envelope::Envelope;
use super::error::HandlerError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Flow {
    #[default]
    Continue,
    /// Drop the event: no subscriber runs and nothing is forwarded.
    Cancel,
}

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn process(&self, envelope: Arc<Envelope>) -> Result<Flow, HandlerError>;
}

/// Adapter turning an async closure into [`Middleware`].
pub struct FnMiddleware<F>(F);

/// Build a middleware from an async closure.
pub fn from_fn<F, Fut>(f: F) -> FnMiddleware<F>
where
    F: Fn(Arc<Envelope>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Flow, HandlerError>> + Send + 'static,
{
    FnMiddleware(f)
}

#[async_trait]
impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(Arc<Envelope>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Flow, HandlerError>> + Send + 'static,
{
    async fn process(&self, envelope: Arc<Envelope>) -> Result<Flow, HandlerError> {
        (self.0)(envelope).await
    }
}

#[derive(Default)]
pub(crate) struct MiddlewareChain {
    entries: RwLock<Vec<(u64, Arc<dyn Middleware>)>>,
    next_id: AtomicU64,
}

impl MiddlewareChain {
    pub(crate) fn add(&self, middleware: Arc<dyn Middleware>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, middleware));
        id
    }

    pub(crate) fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn Middleware>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, middleware)| middleware.clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub(crate) fn clear(&self) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Returned by [`EventBus::use_middleware`](super::EventBus::use_middleware).
pub struct MiddlewareHandle {
    id: u64,
    chain: Weak<MiddlewareChain>,
    removed: AtomicBool,
}

impl MiddlewareHandle {
    pub(crate) fn new(id: u64, chain: &Arc<MiddlewareChain>) -> Self {
        Self {
            id,
            chain: Arc::downgrade(chain),
            removed: AtomicBool::new(false),
        }
    }

    /// Take the middleware out of the chain. Later calls return false.
    pub fn remove(&self) -> bool {
        if self.removed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.chain.upgrade().is_some_and(|chain| chain.remove(self.id))
    }
}

impl fmt::Debug for MiddlewareHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareHandle").field("id", &self.id).finish()
    }
}
