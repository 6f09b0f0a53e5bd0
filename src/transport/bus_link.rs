use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, trace};

use super::{HostTransport, TransportError};
use crate::bus::event_types::{HOST_HANDSHAKE, HOST_PING};
use crate::bus::EventBus;

/// [`HostTransport`] over the bus's own request/reply path.
///
/// The handshake and the probe are ordinary requests (`host.handshake`,
/// `host.ping`) forwarded to the host; the host answers on the reply topic.
/// With no forwarder installed nothing ever answers and both time out.
#[derive(Clone)]
pub struct BusLink {
    bus: EventBus,
    timeout: Duration,
}

impl BusLink {
    pub fn new(bus: EventBus, timeout: Duration) -> Self {
        Self { bus, timeout }
    }
}

#[async_trait]
impl HostTransport for BusLink {
    async fn connect(&self) -> Result<(), TransportError> {
        let reply = self
            .bus
            .request(
                HOST_HANDSHAKE,
                json!({ "client": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION") }),
                self.timeout,
            )
            .await?;

        if reply.get("accepted").and_then(|v| v.as_bool()) == Some(false) {
            let reason = reply
                .get("reason")
                .and_then(|v| v.as_str())
                .unwrap_or("handshake refused");
            return Err(TransportError::Rejected(reason.to_string()));
        }
        debug!(?reply, "host handshake accepted");
        Ok(())
    }

    async fn ping(&self) -> Result<(), TransportError> {
        let sent_at = Utc::now().timestamp_millis();
        self.bus
            .request(HOST_PING, json!({ "sentAt": sent_at }), self.timeout)
            .await?;
        trace!(sent_at, "host answered ping");
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        debug!("bus link closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handshake_and_ping_use_request_reply() {
        let bus = EventBus::new();
        bus.handle(HOST_HANDSHAKE, |_| async { Ok(json!({ "accepted": true })) })
            .unwrap();
        bus.handle(HOST_PING, |e| async move { Ok(json!({ "echo": e.data["sentAt"] })) })
            .unwrap();

        let link = BusLink::new(bus, Duration::from_secs(1));
        link.connect().await.unwrap();
        link.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_refused_handshake() {
        let bus = EventBus::new();
        bus.handle(HOST_HANDSHAKE, |_| async {
            Ok(json!({ "accepted": false, "reason": "version mismatch" }))
        })
        .unwrap();

        let link = BusLink::new(bus, Duration::from_secs(1));
        let err = link.connect().await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected(reason) if reason == "version mismatch"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_host_times_out() {
        let link = BusLink::new(EventBus::new(), Duration::from_millis(100));
        let err = link.ping().await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }
}
