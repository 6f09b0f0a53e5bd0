use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;

use super::envelope::Envelope;
use super::event_types::should_flush_immediately;
use crate::host::HostForwarder;
use crate::transport::TransportError;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_BATCH: usize = 50;

/// Where flushed batches go.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn send_batch(&self, batch: Vec<Arc<Envelope>>) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    pub flush_interval: Duration,
    pub max_batch: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_batch: DEFAULT_MAX_BATCH,
        }
    }
}

/// [`HostForwarder`] that buffers envelopes and hands them to a [`BatchSink`]
/// in batches.
///
/// - Connectivity, host and request/reply envelopes are flushed right away as
///   a single-element batch, after draining the buffer.
/// - Everything else is buffered and flushed every `flush_interval` or when
///   the buffer reaches `max_batch`.
///
/// `forward` only enqueues, so sink failures are logged by the batch task and
/// never reach the emitter.
#[derive(Clone)]
pub struct HostBatcher {
    tx: mpsc::UnboundedSender<Arc<Envelope>>,
}

impl HostBatcher {
    /// Spawn the batch task. It runs until every `HostBatcher` clone is
    /// dropped, then flushes the remainder and exits.
    pub fn start<S>(sink: S, config: BatchConfig) -> (Self, JoinHandle<()>)
    where
        S: BatchSink + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Arc<Envelope>>();
        let max_batch = config.max_batch.max(1);

        let task = tokio::spawn(async move {
            let mut buffer: Vec<Arc<Envelope>> = Vec::with_capacity(max_batch);
            let mut interval = time::interval(config.flush_interval);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    received = rx.recv() => {
                        let Some(envelope) = received else {
                            flush(&sink, &mut buffer).await;
                            tracing::debug!("host batcher closed");
                            break;
                        };
                        if should_flush_immediately(&envelope) {
                            // Flush buffer first so ordering is preserved
                            flush(&sink, &mut buffer).await;
                            buffer.push(envelope);
                            flush(&sink, &mut buffer).await;
                        } else {
                            buffer.push(envelope);
                            if buffer.len() >= max_batch {
                                flush(&sink, &mut buffer).await;
                            }
                        }
                    }
                    _ = interval.tick() => {
                        flush(&sink, &mut buffer).await;
                    }
                }
            }
        });

        (Self { tx }, task)
    }
}

#[async_trait]
impl HostForwarder for HostBatcher {
    async fn forward(&self, envelope: Arc<Envelope>) -> Result<(), TransportError> {
        self.tx.send(envelope).map_err(|_| TransportError::Closed)
    }
}

async fn flush<S: BatchSink>(sink: &S, buffer: &mut Vec<Arc<Envelope>>) {
    if buffer.is_empty() {
        return;
    }
    let batch = std::mem::take(buffer);
    let size = batch.len();
    if let Err(e) = sink.send_batch(batch).await {
        tracing::warn!(size, error = %e, "failed to deliver event batch to host");
    }
}
