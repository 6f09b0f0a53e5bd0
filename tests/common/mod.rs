// tests/common/mod.rs
//! Common test utilities for bus and supervisor integration tests.

#![allow(dead_code)]

pub mod mock_host;

pub use mock_host::MockHost;

use std::sync::{Arc, Mutex};

use hostbridge_lib::bus::{EventBus, Propagation};

/// Record the name of every event matching `pattern`.
pub fn record_names(bus: &EventBus, pattern: &str) -> Arc<Mutex<Vec<String>>> {
    let names = Arc::new(Mutex::new(Vec::new()));
    let sink = names.clone();
    bus.on(pattern, move |envelope| {
        sink.lock().unwrap().push(envelope.name.clone());
        async { Ok(Propagation::Continue) }
    })
    .unwrap();
    names
}
