use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::envelope::Envelope;
use super::topic;

pub const DEFAULT_HISTORY_CAPACITY: usize = 500;

/// Bounded FIFO of recent envelopes. Pushing never blocks or fails; the oldest
/// entry is evicted once the buffer is full. A capacity of zero keeps nothing.
pub(crate) struct History {
    capacity: usize,
    entries: Mutex<VecDeque<Arc<Envelope>>>,
}

impl History {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Arc<Envelope>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn push(&self, envelope: Arc<Envelope>) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(envelope);
    }

    /// Chronological slice of the history. `pattern` narrows it with topic
    /// matching; `limit` keeps only the most recent entries.
    pub(crate) fn query(&self, pattern: Option<&str>, limit: Option<usize>) -> Vec<Arc<Envelope>> {
        let entries = self.lock();
        let mut selected: Vec<Arc<Envelope>> = entries
            .iter()
            .rev()
            .filter(|envelope| pattern.map_or(true, |p| topic::matches(p, &envelope.name)))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        selected.reverse();
        selected
    }

    /// Distinct event names currently retained, sorted.
    pub(crate) fn names(&self) -> Vec<String> {
        self.lock()
            .iter()
            .map(|envelope| envelope.name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn clear(&self) {
        self.lock().clear();
    }
}
