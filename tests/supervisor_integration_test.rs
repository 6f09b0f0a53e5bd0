// tests/supervisor_integration_test.rs
//! Supervisor driving a [`BusLink`] against a mock host, on paused time.

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::time::sleep;

use common::{record_names, MockHost};
use hostbridge_lib::bus::event_types::{
    CONNECTION_CONNECTED, CONNECTION_DISCONNECTED, CONNECTION_FAILED, HOST_CONNECTED,
    HOST_DISCONNECTED, HOST_HANDSHAKE, HOST_PING,
};
use hostbridge_lib::bus::EventBus;
use hostbridge_lib::transport::{
    BusLink, ConnectionQuality, ConnectionState, SupervisorConfig, TransportSupervisor,
};

fn config(max_attempts: u32, reconnect_delay: Duration) -> SupervisorConfig {
    SupervisorConfig {
        heartbeat_interval: Duration::from_millis(100),
        probe_timeout: Duration::from_millis(50),
        connect_timeout: Duration::from_millis(50),
        reconnect_delay,
        max_reconnect_attempts: max_attempts,
        ..SupervisorConfig::default()
    }
}

fn setup(config: SupervisorConfig) -> (EventBus, Arc<MockHost>, TransportSupervisor) {
    let bus = EventBus::new();
    let host = MockHost::attach(&bus);
    let link = BusLink::new(bus.clone(), config.probe_timeout);
    let supervisor = TransportSupervisor::new(bus.clone(), Arc::new(link), config);
    (bus, host, supervisor)
}

fn count(names: &[String], name: &str) -> usize {
    names.iter().filter(|n| n.as_str() == name).count()
}

#[tokio::test(start_paused = true)]
async fn test_handshake_then_heartbeat() {
    let (bus, host, supervisor) = setup(config(3, Duration::from_millis(200)));
    let events = record_names(&bus, "connection.*");

    supervisor.start();
    sleep(Duration::from_millis(350)).await;

    assert!(supervisor.is_connected());
    assert_eq!(host.count(HOST_HANDSHAKE), 1);
    assert_eq!(host.count(HOST_PING), 3);

    let snapshot = supervisor.snapshot();
    assert_eq!(snapshot.metrics.pongs_received, 3);
    assert_eq!(snapshot.quality, ConnectionQuality::Excellent);
    assert!(snapshot.connected_since.is_some());

    // connectivity events stay on this side of the bridge
    assert!(host.received_names().iter().all(|n| n.starts_with("host.")));
    assert_eq!(count(&events.lock().unwrap(), CONNECTION_CONNECTED), 1);
}

#[tokio::test(start_paused = true)]
async fn test_recovers_after_host_outage() {
    let (bus, host, supervisor) = setup(config(5, Duration::from_millis(200)));
    let events = record_names(&bus, "connection.*");

    supervisor.start();
    sleep(Duration::from_millis(150)).await;
    assert!(supervisor.is_connected());

    host.set_online(false);
    sleep(Duration::from_millis(400)).await;
    assert!(!supervisor.is_connected());
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|n| n == CONNECTION_DISCONNECTED));

    host.set_online(true);
    sleep(Duration::from_millis(400)).await;

    assert!(supervisor.is_connected());
    let snapshot = supervisor.snapshot();
    assert_eq!(snapshot.metrics.successful_connections, 2);
    assert_eq!(snapshot.reconnect_attempts, 0);
    assert!(snapshot.error_count >= 1);
    assert_eq!(count(&events.lock().unwrap(), CONNECTION_CONNECTED), 2);
    assert!(count(&events.lock().unwrap(), CONNECTION_FAILED) == 0);
}

#[tokio::test(start_paused = true)]
async fn test_host_announcement_skips_reconnect_delay() {
    let (_bus, host, supervisor) = setup(config(5, Duration::from_secs(30)));
    host.set_online(false);

    supervisor.start();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(supervisor.state(), ConnectionState::Disconnected);

    host.set_online(true);
    host.send(json!({ "event": HOST_CONNECTED, "data": {} })).await;
    sleep(Duration::from_millis(100)).await;

    assert!(supervisor.is_connected());
    assert_eq!(host.count(HOST_HANDSHAKE), 1);
}

#[tokio::test(start_paused = true)]
async fn test_host_disconnect_notice_drops_connection() {
    let (bus, host, supervisor) = setup(config(5, Duration::from_secs(30)));
    let events = record_names(&bus, "connection.*");

    supervisor.start();
    sleep(Duration::from_millis(50)).await;
    assert!(supervisor.is_connected());

    host.send(json!({ "event": HOST_DISCONNECTED, "data": { "reason": "host restarting" } }))
        .await;
    sleep(Duration::from_millis(10)).await;

    assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    let snapshot = supervisor.snapshot();
    let last = snapshot.transitions.last().unwrap();
    assert_eq!(last.to, ConnectionState::Disconnected);
    assert_eq!(last.reason, "host restarting");
    assert_eq!(events.lock().unwrap().last().unwrap(), CONNECTION_DISCONNECTED);
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_max_attempts() {
    let (bus, host, supervisor) = setup(config(3, Duration::from_millis(200)));
    let events = record_names(&bus, "connection.*");
    host.set_online(false);

    supervisor.start();
    sleep(Duration::from_secs(2)).await;

    let snapshot = supervisor.snapshot();
    assert_eq!(snapshot.state, ConnectionState::Disconnected);
    assert_eq!(snapshot.reconnect_attempts, 3);
    assert_eq!(snapshot.metrics.connection_attempts, 3);
    assert_eq!(snapshot.metrics.failed_connections, 3);
    assert_eq!(count(&events.lock().unwrap(), CONNECTION_FAILED), 1);

    // an announcement no longer wakes a driver that gave up
    host.set_online(true);
    host.send(json!({ "event": HOST_CONNECTED })).await;
    sleep(Duration::from_secs(1)).await;
    assert!(!supervisor.is_connected());
    assert_eq!(count(&events.lock().unwrap(), CONNECTION_FAILED), 1);

    // starting again re-arms it
    supervisor.start();
    sleep(Duration::from_millis(50)).await;
    assert!(supervisor.is_connected());
    assert_eq!(supervisor.snapshot().reconnect_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_manual_disconnect_stays_down() {
    let (bus, host, supervisor) = setup(config(5, Duration::from_millis(200)));
    let events = record_names(&bus, "connection.*");

    supervisor.start();
    sleep(Duration::from_millis(150)).await;
    assert!(supervisor.is_connected());

    supervisor.disconnect().await;
    assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    assert_eq!(events.lock().unwrap().last().unwrap(), CONNECTION_DISCONNECTED);

    host.send(json!({ "event": HOST_CONNECTED })).await;
    sleep(Duration::from_secs(1)).await;

    assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    assert_eq!(host.count(HOST_HANDSHAKE), 1);
    assert_eq!(host.count(HOST_PING), 1);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_continues_after_bus_reset() {
    let (bus, host, supervisor) = setup(config(5, Duration::from_millis(200)));

    supervisor.start();
    sleep(Duration::from_millis(150)).await;
    assert!(supervisor.is_connected());

    bus.reset();
    sleep(Duration::from_millis(300)).await;

    assert!(supervisor.is_connected());
    assert_eq!(host.count(HOST_PING), 4);
    assert_eq!(supervisor.snapshot().metrics.pongs_received, 4);
}
