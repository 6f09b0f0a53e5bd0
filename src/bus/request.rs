//! Request/response layered over plain emits.
//!
//! A request is an ordinary event carrying a `correlation_id` and a private
//! `reply_to` topic. Whoever handles it emits the answer on that topic with
//! the same correlation id; the requester holds a one-shot subscription there
//! until the reply arrives or the timeout fires.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use super::envelope::{EmitOptions, Envelope};
use super::error::{BusError, HandlerError};
use super::event_bus::EventBus;
use super::registry::{Propagation, SubscribeOptions, SubscriptionHandle};
use super::topic;

pub const REPLY_TOPIC_PREFIX: &str = "reply";

pub fn reply_topic(correlation_id: &str) -> String {
    format!("{REPLY_TOPIC_PREFIX}.{correlation_id}")
}

impl EventBus {
    /// Emit `name` as a request and wait for the first reply.
    ///
    /// The timeout spans the whole exchange, including local handlers of the
    /// request itself; those keep running after a timeout. The reply
    /// subscription is removed on every exit path. A reply arriving after the
    /// timeout finds no subscriber and is dropped.
    pub async fn request(
        &self,
        name: &str,
        data: Value,
        timeout: Duration,
    ) -> Result<Value, BusError> {
        self.request_with(name, data, EmitOptions::default(), timeout)
            .await
    }

    /// Like [`request`](Self::request) with explicit emit options. Any
    /// correlation id or reply topic in `options` is replaced.
    pub async fn request_with(
        &self,
        name: &str,
        data: Value,
        options: EmitOptions,
        timeout: Duration,
    ) -> Result<Value, BusError> {
        topic::validate_name(name)?;
        let correlation_id = Uuid::new_v4().simple().to_string();
        let reply_to = reply_topic(&correlation_id);

        let (tx, rx) = oneshot::channel::<Value>();
        // Only the reply subscription owns the sender, so tearing the
        // subscription down without a reply drops it and wakes `rx`.
        let reply_slot = Arc::new(Mutex::new(Some(tx)));
        let pending = Arc::downgrade(&reply_slot);
        let expected = correlation_id.clone();
        let handle = self.subscribe(
            &reply_to,
            SubscribeOptions::default()
                .once()
                .with_filter(move |reply| {
                    reply
                        .correlation_id
                        .as_deref()
                        .map_or(true, |id| id == expected)
                }),
            move |reply| {
                let reply_slot = reply_slot.clone();
                async move {
                    let sender = reply_slot
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .take();
                    if let Some(sender) = sender {
                        // Receiver may already be gone after a timeout.
                        let _ = sender.send(reply.data.clone());
                    }
                    Ok(Propagation::Continue)
                }
            },
        )?;
        let _guard = ReplyGuard(handle);

        debug!(event = name, correlation_id = %correlation_id, "sending request");
        // Fan-out runs on its own task: the deadline below covers slow or
        // stuck handlers without cancelling them mid-dispatch.
        let bus = self.clone();
        let event = name.to_string();
        let options = options
            .with_correlation_id(correlation_id.clone())
            .with_reply_to(reply_to);
        tokio::spawn(async move {
            if let Err(e) = bus.emit(&event, data, options).await {
                warn!(event = %event, error = %e, "failed to emit request");
            }
        });

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(BusError::RequestCancelled {
                topic: name.to_string(),
            }),
            Err(_) => {
                if let Some(slot) = pending.upgrade() {
                    slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                }
                warn!(event = name, correlation_id = %correlation_id, ?timeout, "request timed out");
                Err(BusError::RequestTimeout {
                    topic: name.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Answer `request` on its reply topic. Returns `Ok(None)` when the
    /// envelope carries no `reply_to`.
    ///
    /// The reply goes back to the host only when the request came from it.
    pub async fn respond(
        &self,
        request: &Envelope,
        data: Value,
    ) -> Result<Option<Arc<Envelope>>, BusError> {
        let Some(reply_to) = request.reply_to.as_deref() else {
            return Ok(None);
        };
        let mut options = EmitOptions::default().with_forward(request.is_from_backend());
        if let Some(correlation_id) = &request.correlation_id {
            options = options.with_correlation_id(correlation_id.clone());
        }
        self.emit(reply_to, data, options).await.map(Some)
    }

    /// Subscribe a responder whose result is sent back automatically. Events
    /// without a `reply_to` still run the responder; its value is discarded.
    pub fn handle<F, Fut>(&self, pattern: &str, responder: F) -> Result<SubscriptionHandle, BusError>
    where
        F: Fn(Arc<Envelope>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        let bus = self.downgrade();
        let responder = Arc::new(responder);
        self.on(pattern, move |envelope| {
            let bus = bus.clone();
            let responder = responder.clone();
            async move {
                let value = responder(envelope.clone()).await?;
                if let Some(bus) = EventBus::upgrade(&bus) {
                    bus.respond(&envelope, value).await?;
                }
                Ok(Propagation::Continue)
            }
        })
    }
}

/// Unsubscribes the pending reply subscription when the request future
/// completes or is dropped.
struct ReplyGuard(SubscriptionHandle);

impl Drop for ReplyGuard {
    fn drop(&mut self) {
        self.0.unsubscribe();
    }
}
