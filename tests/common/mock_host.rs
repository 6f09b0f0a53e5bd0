// tests/common/mock_host.rs
//! In-process stand-in for the host process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use hostbridge_lib::bus::event_types::{HOST_HANDSHAKE, HOST_PING};
use hostbridge_lib::bus::{Envelope, EventBus};
use hostbridge_lib::host::{HostBridge, HostForwarder, OutboundMessage};
use hostbridge_lib::transport::TransportError;

/// Receives forwarded envelopes over the JSON wire shape and answers
/// `host.handshake` / `host.ping` requests through a [`HostBridge`], the same
/// way a real host would.
pub struct MockHost {
    bridge: HostBridge,
    online: AtomicBool,
    reply_delay: Mutex<Duration>,
    received: Mutex<Vec<OutboundMessage>>,
}

impl MockHost {
    /// Create a host and install it as the bus forwarder.
    pub fn attach(bus: &EventBus) -> Arc<Self> {
        let host = Arc::new(Self {
            bridge: HostBridge::new(bus.clone()),
            online: AtomicBool::new(true),
            reply_delay: Mutex::new(Duration::ZERO),
            received: Mutex::new(Vec::new()),
        });
        bus.set_forwarder(host.clone());
        host
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_reply_delay(&self, delay: Duration) {
        *self.reply_delay.lock().unwrap() = delay;
    }

    pub fn received(&self) -> Vec<OutboundMessage> {
        self.received.lock().unwrap().clone()
    }

    pub fn received_names(&self) -> Vec<String> {
        self.received().into_iter().map(|m| m.event).collect()
    }

    pub fn count(&self, event: &str) -> usize {
        self.received().iter().filter(|m| m.event == event).count()
    }

    /// Send a raw message from the host side.
    pub async fn send(&self, message: Value) -> Arc<Envelope> {
        self.bridge.dispatch(&message.to_string()).await.unwrap()
    }

    fn answer(&self, message: &OutboundMessage) -> Option<Value> {
        match message.event.as_str() {
            HOST_HANDSHAKE => Some(json!({ "accepted": true })),
            HOST_PING => Some(json!({ "pong": message.data["sentAt"] })),
            _ => None,
        }
    }
}

#[async_trait]
impl HostForwarder for MockHost {
    async fn forward(&self, envelope: Arc<Envelope>) -> Result<(), TransportError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(TransportError::connection("host offline"));
        }

        let wire = serde_json::to_string(&OutboundMessage::from(envelope.as_ref()))
            .map_err(TransportError::serialization)?;
        let message: OutboundMessage =
            serde_json::from_str(&wire).map_err(TransportError::serialization)?;
        self.received.lock().unwrap().push(message.clone());

        let (Some(reply_to), Some(data)) = (message.reply_to.clone(), self.answer(&message)) else {
            return Ok(());
        };
        let reply = json!({
            "event": reply_to,
            "data": data,
            "correlationId": message.correlation_id,
        });
        let bridge = self.bridge.clone();
        let delay = *self.reply_delay.lock().unwrap();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _ = bridge.dispatch(&reply.to_string()).await;
        });
        Ok(())
    }
}
