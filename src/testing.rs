//! Shared helpers for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::bus::Envelope;
use crate::host::HostForwarder;
use crate::transport::{HostTransport, TransportError};

pub type Recorder = Arc<dyn Fn(String) + Send + Sync>;

/// A shared call log and a cloneable closure appending to it.
pub fn recorder() -> (Arc<Mutex<Vec<String>>>, Recorder) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = calls.clone();
    let record: Recorder = Arc::new(move |entry| sink.lock().unwrap().push(entry));
    (calls, record)
}

/// Forwarder that keeps everything it is given.
#[derive(Default)]
pub struct RecordingForwarder {
    sent: Mutex<Vec<Arc<Envelope>>>,
}

impl RecordingForwarder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn envelopes(&self) -> Vec<Arc<Envelope>> {
        self.sent.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.envelopes().iter().map(|e| e.name.clone()).collect()
    }
}

#[async_trait]
impl HostForwarder for RecordingForwarder {
    async fn forward(&self, envelope: Arc<Envelope>) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(envelope);
        Ok(())
    }
}

/// Host transport whose outcomes are flipped by the test.
pub struct ScriptedTransport {
    connect_ok: AtomicBool,
    ping_ok: AtomicBool,
    ping_delay: Mutex<Duration>,
    connects: AtomicUsize,
    pings: AtomicUsize,
    closes: AtomicUsize,
}

impl ScriptedTransport {
    fn with(connect_ok: bool, ping_ok: bool) -> Arc<Self> {
        Arc::new(Self {
            connect_ok: AtomicBool::new(connect_ok),
            ping_ok: AtomicBool::new(ping_ok),
            ping_delay: Mutex::new(Duration::ZERO),
            connects: AtomicUsize::new(0),
            pings: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        })
    }

    pub fn healthy() -> Arc<Self> {
        Self::with(true, true)
    }

    pub fn unreachable() -> Arc<Self> {
        Self::with(false, false)
    }

    pub fn set_connect_ok(&self, ok: bool) {
        self.connect_ok.store(ok, Ordering::SeqCst);
    }

    pub fn set_ping_ok(&self, ok: bool) {
        self.ping_ok.store(ok, Ordering::SeqCst);
    }

    pub fn set_ping_delay(&self, delay: Duration) {
        *self.ping_delay.lock().unwrap() = delay;
    }

    pub fn connect_calls(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn ping_calls(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostTransport for ScriptedTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.connect_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::connection("host unreachable"))
        }
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        let delay = *self.ping_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.ping_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::connection("no pong"))
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
