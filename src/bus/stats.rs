use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

use super::envelope::{Envelope, EventSource};

/// Point-in-time copy of the bus counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub total_emitted: u64,
    pub total_delivered: u64,
    pub cancelled: u64,
    pub handler_errors: u64,
    pub forwarded: u64,
    pub forward_errors: u64,
    pub emitted_by_topic: BTreeMap<String, u64>,
    /// Successful handler invocations per topic.
    pub received_by_topic: BTreeMap<String, u64>,
    pub emitted_by_source: BTreeMap<String, u64>,
}

#[derive(Default)]
pub(crate) struct StatsRecorder {
    emitted: AtomicU64,
    delivered: AtomicU64,
    cancelled: AtomicU64,
    handler_errors: AtomicU64,
    forwarded: AtomicU64,
    forward_errors: AtomicU64,
    emitted_by_topic: DashMap<String, u64>,
    received_by_topic: DashMap<String, u64>,
    emitted_by_source: DashMap<EventSource, u64>,
}

impl StatsRecorder {
    pub(crate) fn record_emitted(&self, envelope: &Envelope) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        *self.emitted_by_topic.entry(envelope.name.clone()).or_insert(0) += 1;
        *self.emitted_by_source.entry(envelope.source).or_insert(0) += 1;
    }

    pub(crate) fn record_delivered(&self, name: &str) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        *self.received_by_topic.entry(name.to_string()).or_insert(0) += 1;
    }

    pub(crate) fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_forward_error(&self) {
        self.forward_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BusStats {
        BusStats {
            total_emitted: self.emitted.load(Ordering::Relaxed),
            total_delivered: self.delivered.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            forward_errors: self.forward_errors.load(Ordering::Relaxed),
            emitted_by_topic: self
                .emitted_by_topic
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
            received_by_topic: self
                .received_by_topic
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
            emitted_by_source: self
                .emitted_by_source
                .iter()
                .map(|entry| (entry.key().to_string(), *entry.value()))
                .collect(),
        }
    }

    pub(crate) fn reset(&self) {
        for counter in [
            &self.emitted,
            &self.delivered,
            &self.cancelled,
            &self.handler_errors,
            &self.forwarded,
            &self.forward_errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.emitted_by_topic.clear();
        self.received_by_topic.clear();
        self.emitted_by_source.clear();
    }
}
