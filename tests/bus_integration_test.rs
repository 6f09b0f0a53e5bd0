// tests/bus_integration_test.rs
//! End-to-end bus behaviour with a mock host on the other side of the
//! forwarder.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use common::{record_names, MockHost};
use hostbridge_lib::bus::event_types::{HOST_PING, SYSTEM_INFO_REQUESTED};
use hostbridge_lib::bus::{
    from_fn, AppEvent, BusError, EmitOptions, Envelope, EventBus, EventSource, Flow, Propagation,
    SubscribeOptions,
};

#[tokio::test]
async fn test_priority_orders_across_patterns() {
    let bus = EventBus::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    for (pattern, priority, label) in [
        ("ui.*", 0, "single"),
        ("ui.**", 10, "multi"),
        ("ui.clicked", 5, "exact"),
        ("ui.*", 10, "single-high"),
    ] {
        let order = order.clone();
        bus.subscribe(
            pattern,
            SubscribeOptions::default().with_priority(priority),
            move |_| {
                order.lock().unwrap().push(label);
                async { Ok(Propagation::Continue) }
            },
        )
        .unwrap();
    }

    bus.emit("ui.clicked", json!(null), EmitOptions::default())
        .await
        .unwrap();

    assert_eq!(
        *order.lock().unwrap(),
        vec!["multi", "single-high", "exact", "single"]
    );
}

#[tokio::test]
async fn test_request_answered_by_host() {
    let bus = EventBus::new();
    let host = MockHost::attach(&bus);

    let reply = bus
        .request(HOST_PING, json!({ "sentAt": 42 }), Duration::from_secs(1))
        .await
        .unwrap();

    assert_eq!(reply, json!({ "pong": 42 }));
    let sent = host.received();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].reply_to.as_deref().unwrap().starts_with("reply."));
    assert!(sent[0].correlation_id.is_some());
    // the reply subscription is gone once the request resolves
    assert_eq!(bus.subscription_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_request_times_out_when_host_offline() {
    let bus = EventBus::new();
    let host = MockHost::attach(&bus);
    host.set_online(false);

    let err = bus
        .request(HOST_PING, json!({ "sentAt": 1 }), Duration::from_millis(200))
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(bus.stats().forward_errors, 1);
    assert_eq!(bus.subscription_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_late_host_reply_is_dropped() {
    let bus = EventBus::new();
    let host = MockHost::attach(&bus);
    host.set_reply_delay(Duration::from_millis(500));
    let replies = record_names(&bus, "reply.*");

    let err = bus
        .request(HOST_PING, json!({ "sentAt": 1 }), Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::RequestTimeout { .. }));

    tokio::time::sleep(Duration::from_millis(600)).await;
    // the reply still reaches ordinary listeners, but nobody is waiting on it
    assert_eq!(replies.lock().unwrap().len(), 1);
    assert_eq!(bus.subscription_count(), 1);
}

#[tokio::test]
async fn test_host_events_are_not_echoed_back() {
    let bus = EventBus::new();
    let host = MockHost::attach(&bus);
    let seen = Arc::new(Mutex::new(Vec::<Arc<Envelope>>::new()));
    let sink = seen.clone();
    bus.on("build.*", move |envelope| {
        sink.lock().unwrap().push(envelope);
        async { Ok(Propagation::Continue) }
    })
    .unwrap();

    host.send(json!({ "event": "build.started", "data": { "target": "web" } }))
        .await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].source, EventSource::Backend);
    assert_eq!(seen[0].data["target"], "web");
    assert_eq!(host.count("build.started"), 0);
}

#[tokio::test]
async fn test_host_request_is_answered_back_to_host() {
    let bus = EventBus::new();
    let host = MockHost::attach(&bus);
    bus.handle(SYSTEM_INFO_REQUESTED, |_| async {
        Ok(json!({ "os": "test" }))
    })
    .unwrap();

    host.send(json!({
        "event": SYSTEM_INFO_REQUESTED,
        "data": {},
        "correlationId": "abc",
        "replyTo": "reply.abc",
    }))
    .await;

    let sent = host.received();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].event, "reply.abc");
    assert_eq!(sent[0].correlation_id.as_deref(), Some("abc"));
    assert_eq!(sent[0].data, json!({ "os": "test" }));
}

#[tokio::test]
async fn test_local_replies_stay_local() {
    let bus = EventBus::new();
    let host = MockHost::attach(&bus);
    bus.handle("math.double", |e| async move {
        let n = e.data["n"].as_i64().unwrap_or_default();
        Ok(json!(n * 2))
    })
    .unwrap();

    let reply = bus
        .request("math.double", json!({ "n": 21 }), Duration::from_secs(1))
        .await
        .unwrap();

    assert_eq!(reply, json!(42));
    // the request itself is forwarded; the reply is not
    assert_eq!(host.received_names(), vec!["math.double"]);
}

#[tokio::test]
async fn test_scoped_bus_forwards_qualified_names() {
    let bus = EventBus::new();
    let host = MockHost::attach(&bus);
    let webui = bus.scope("webui");

    webui
        .emit("ready", json!({ "route": "/" }), EmitOptions::default())
        .await
        .unwrap();
    webui
        .scope("panel")
        .emit("opened", json!(null), EmitOptions::default())
        .await
        .unwrap();
    bus.emit("build.started", json!(null), EmitOptions::default())
        .await
        .unwrap();

    assert_eq!(
        host.received_names(),
        vec!["webui.ready", "webui.panel.opened", "build.started"]
    );
    let scoped: Vec<String> = webui.history(None).iter().map(|e| e.name.clone()).collect();
    assert_eq!(scoped, vec!["webui.ready", "webui.panel.opened"]);
}

#[tokio::test]
async fn test_middleware_cancel_blocks_forward_and_delivery() {
    let bus = EventBus::new();
    let host = MockHost::attach(&bus);
    let delivered = record_names(&bus, "**");
    bus.use_middleware(from_fn(|envelope: Arc<Envelope>| {
        let flow = if envelope.name.starts_with("secret.") {
            Flow::Cancel
        } else {
            Flow::Continue
        };
        async move { Ok(flow) }
    }));

    bus.emit("secret.token", json!("x"), EmitOptions::default())
        .await
        .unwrap();
    bus.emit("public.note", json!("y"), EmitOptions::default())
        .await
        .unwrap();

    assert_eq!(*delivered.lock().unwrap(), vec!["public.note"]);
    assert_eq!(host.received_names(), vec!["public.note"]);
    let stats = bus.stats();
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.total_emitted, 2);
    // cancelled events are still recorded
    assert_eq!(bus.history(None, None).len(), 2);
}

#[tokio::test]
async fn test_history_keeps_most_recent() {
    let bus = EventBus::with_history_capacity(3);
    for n in 0..5 {
        bus.publish(AppEvent::CounterValueChanged { value: n })
            .await
            .unwrap();
    }

    let values: Vec<i64> = bus
        .history(Some("counter.*"), None)
        .iter()
        .map(|e| e.data["value"].as_i64().unwrap())
        .collect();
    assert_eq!(values, vec![2, 3, 4]);
    assert_eq!(bus.history(None, Some(1)).len(), 1);
    assert_eq!(bus.stats().total_emitted, 5);
}

#[tokio::test]
async fn test_reset_cancels_pending_request() {
    let bus = EventBus::new();
    let pending = {
        let bus = bus.clone();
        tokio::spawn(async move {
            bus.request("never.answered", json!(null), Duration::from_secs(60))
                .await
        })
    };
    tokio::task::yield_now().await;
    assert_eq!(bus.subscription_count(), 1);

    bus.reset();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, BusError::RequestCancelled { .. }));
}
