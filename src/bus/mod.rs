//! Event bus for messaging between the embedded UI and the host process.
//!
//! The bus provides:
//! - Topic routing with `*` (one segment) and trailing `**` (the rest) wildcards
//! - Priority-ordered fan-out, filters and one-shot subscriptions
//! - A middleware chain that may cancel events
//! - Request/response over plain events via a correlation id
//! - Bounded history and delivery counters
//!
//! # Architecture
//!
//! Events flow from emitter → middleware → host forwarder → subscribers:
//! - `EventBus`: owns the registry, middleware chain, history and forwarder
//! - `HostBatcher`: buffers forwarded envelopes (100ms/50 events) before they
//!   reach the host
//! - Events from the host come back in through `host::HostBridge` with
//!   `source = backend` and are never forwarded again

mod batcher;
mod envelope;
mod error;
mod event_bus;
pub mod event_types;
mod history;
mod middleware;
mod registry;
mod request;
mod scope;
mod stats;
pub mod topic;

pub use batcher::{BatchConfig, BatchSink, HostBatcher, DEFAULT_FLUSH_INTERVAL, DEFAULT_MAX_BATCH};
pub use envelope::{EmitOptions, Envelope, EventSource};
pub use error::{BusError, HandlerError};
pub use event_bus::EventBus;
pub use event_types::AppEvent;
pub use history::DEFAULT_HISTORY_CAPACITY;
pub use middleware::{from_fn, FnMiddleware, Flow, Middleware, MiddlewareHandle};
pub use registry::{
    Filter, HandlerFuture, HandlerResult, Propagation, SubscribeOptions, Subscription,
    SubscriptionHandle, SubscriptionRegistry,
};
pub use request::{reply_topic, REPLY_TOPIC_PREFIX};
pub use scope::ScopedBus;
pub use stats::BusStats;
