//! Newline-delimited JSON over a byte stream (stdin/stdout in production).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, trace, warn};

use super::{HostBridge, OutboundMessage};
use crate::bus::{BatchSink, Envelope};
use crate::transport::TransportError;

/// Writes each envelope of a batch as one JSON line.
pub struct LineSink<W> {
    writer: Mutex<W>,
}

impl<W> LineSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W> BatchSink for LineSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send_batch(&self, batch: Vec<Arc<Envelope>>) -> Result<(), TransportError> {
        let mut framed = String::new();
        for envelope in &batch {
            let line = serde_json::to_string(&OutboundMessage::from(envelope.as_ref()))
                .map_err(TransportError::serialization)?;
            framed.push_str(&line);
            framed.push('\n');
        }

        let mut writer = self.writer.lock().await;
        writer.write_all(framed.as_bytes()).await?;
        writer.flush().await?;
        trace!(size = batch.len(), "wrote batch to host");
        Ok(())
    }
}

/// Feed every line from `reader` through `bridge` until EOF. Blank lines are
/// skipped; malformed ones are logged by the bridge and skipped. Returns the
/// number of lines dispatched successfully.
///
/// Each line is dispatched on its own task, so a slow handler never holds up
/// later host messages (including replies to pending requests). In-flight
/// dispatches are awaited before returning and aborted if the pump is dropped.
pub async fn pump_lines<R>(reader: R, bridge: &HostBridge) -> Result<u64, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut inflight = JoinSet::new();
    let mut dispatched = 0;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        let bridge = bridge.clone();
        inflight.spawn(async move { bridge.dispatch(&line).await.is_ok() });

        while let Some(done) = inflight.try_join_next() {
            dispatched += settled(done);
        }
    }
    while let Some(done) = inflight.join_next().await {
        dispatched += settled(done);
    }
    debug!(dispatched, "host input closed");
    Ok(dispatched)
}

fn settled(done: Result<bool, JoinError>) -> u64 {
    match done {
        Ok(ok) => u64::from(ok),
        Err(e) => {
            warn!(error = %e, "host message dispatch aborted");
            0
        }
    }
}
