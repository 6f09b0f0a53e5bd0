use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    #[default]
    Unknown,
    Excellent,
    Good,
    Fair,
    Poor,
}

impl ConnectionQuality {
    pub fn from_latency(latency: Duration) -> Self {
        match latency.as_millis() {
            0..=99 => Self::Excellent,
            100..=299 => Self::Good,
            300..=999 => Self::Fair,
            _ => Self::Poor,
        }
    }
}

impl fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionQuality::Unknown => "unknown",
            ConnectionQuality::Excellent => "excellent",
            ConnectionQuality::Good => "good",
            ConnectionQuality::Fair => "fair",
            ConnectionQuality::Poor => "poor",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEntry {
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Running counters over the supervisor's lifetime, cleared by
/// [`reset_metrics`](super::TransportSupervisor::reset_metrics).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMetrics {
    pub connection_attempts: u64,
    pub successful_connections: u64,
    pub failed_connections: u64,
    pub pings_sent: u64,
    pub pongs_received: u64,
    /// Mean round trip over every completed probe.
    pub average_latency_ms: Option<f64>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

/// Live state, owned by the supervisor and only handed out as snapshots.
#[derive(Debug)]
pub(crate) struct ConnectionRecord {
    pub(crate) state: ConnectionState,
    pub(crate) last_ping_at: Option<Instant>,
    pub(crate) last_pong_at: Option<Instant>,
    probe_in_flight: bool,
    pub(crate) reconnect_attempts: u32,
    pub(crate) error_count: u64,
    pub(crate) connected_since: Option<DateTime<Utc>>,
    pub(crate) metrics: ConnectionMetrics,
    latency_total: Duration,
    transitions: VecDeque<Transition>,
    transition_capacity: usize,
    errors: VecDeque<ErrorEntry>,
    error_capacity: usize,
}

impl ConnectionRecord {
    pub(crate) fn new(transition_capacity: usize, error_capacity: usize) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            last_ping_at: None,
            last_pong_at: None,
            probe_in_flight: false,
            reconnect_attempts: 0,
            error_count: 0,
            connected_since: None,
            metrics: ConnectionMetrics::default(),
            latency_total: Duration::ZERO,
            transitions: VecDeque::with_capacity(transition_capacity),
            transition_capacity,
            errors: VecDeque::with_capacity(error_capacity),
            error_capacity,
        }
    }

    /// Move to `to`, logging the transition. Returns the previous state, or
    /// `None` when already there.
    pub(crate) fn transition(&mut self, to: ConnectionState, reason: &str) -> Option<ConnectionState> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        self.connected_since = match to {
            ConnectionState::Connected => Some(Utc::now()),
            _ => None,
        };
        if to != ConnectionState::Connected {
            self.last_ping_at = None;
            self.last_pong_at = None;
            self.probe_in_flight = false;
        }
        push_bounded(
            &mut self.transitions,
            self.transition_capacity,
            Transition {
                from,
                to,
                reason: reason.to_string(),
                at: Utc::now(),
            },
        );
        Some(from)
    }

    pub(crate) fn record_error(&mut self, message: &str) {
        let at = Utc::now();
        self.error_count += 1;
        self.metrics.last_error = Some(message.to_string());
        self.metrics.last_error_at = Some(at);
        push_bounded(
            &mut self.errors,
            self.error_capacity,
            ErrorEntry {
                message: message.to_string(),
                at,
            },
        );
    }

    pub(crate) fn record_ping(&mut self) {
        self.last_ping_at = Some(Instant::now());
        self.probe_in_flight = true;
        self.metrics.pings_sent += 1;
    }

    pub(crate) fn record_pong(&mut self) {
        let now = Instant::now();
        self.last_pong_at = Some(now);
        self.probe_in_flight = false;
        self.metrics.pongs_received += 1;
        if let Some(sent) = self.last_ping_at {
            self.latency_total += now.saturating_duration_since(sent);
            self.metrics.average_latency_ms = Some(
                self.latency_total.as_secs_f64() * 1000.0 / self.metrics.pongs_received as f64,
            );
        }
    }

    /// Round trip of the last completed probe. `None` while a probe is in
    /// flight or before the first one completes.
    pub(crate) fn latency(&self) -> Option<Duration> {
        if self.probe_in_flight {
            return None;
        }
        match (self.last_ping_at, self.last_pong_at) {
            (Some(ping), Some(pong)) => Some(pong.saturating_duration_since(ping)),
            _ => None,
        }
    }

    pub(crate) fn quality(&self) -> ConnectionQuality {
        self.latency()
            .map_or(ConnectionQuality::Unknown, ConnectionQuality::from_latency)
    }

    pub(crate) fn reset_metrics(&mut self) {
        self.metrics = ConnectionMetrics::default();
        self.latency_total = Duration::ZERO;
        self.error_count = 0;
        self.errors.clear();
    }

    pub(crate) fn snapshot(&self) -> ConnectionSnapshot {
        let latency = self.latency();
        ConnectionSnapshot {
            state: self.state,
            quality: self.quality(),
            latency_ms: latency.map(|l| l.as_millis() as u64),
            reconnect_attempts: self.reconnect_attempts,
            error_count: self.error_count,
            connected_since: self.connected_since,
            metrics: self.metrics.clone(),
            transitions: self.transitions.iter().cloned().collect(),
            errors: self.errors.iter().cloned().collect(),
        }
    }
}

fn push_bounded<T>(ring: &mut VecDeque<T>, capacity: usize, item: T) {
    if capacity == 0 {
        return;
    }
    while ring.len() >= capacity {
        ring.pop_front();
    }
    ring.push_back(item);
}

/// Deep copy of the connection record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub quality: ConnectionQuality,
    pub latency_ms: Option<u64>,
    pub reconnect_attempts: u32,
    pub error_count: u64,
    pub connected_since: Option<DateTime<Utc>>,
    pub metrics: ConnectionMetrics,
    /// Oldest first.
    pub transitions: Vec<Transition>,
    pub errors: Vec<ErrorEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_tiers() {
        assert_eq!(
            ConnectionQuality::from_latency(Duration::from_millis(99)),
            ConnectionQuality::Excellent
        );
        assert_eq!(
            ConnectionQuality::from_latency(Duration::from_millis(100)),
            ConnectionQuality::Good
        );
        assert_eq!(
            ConnectionQuality::from_latency(Duration::from_millis(999)),
            ConnectionQuality::Fair
        );
        assert_eq!(
            ConnectionQuality::from_latency(Duration::from_secs(1)),
            ConnectionQuality::Poor
        );
    }

    #[test]
    fn test_transition_log_is_bounded() {
        let mut record = ConnectionRecord::new(2, 10);
        record.transition(ConnectionState::Connecting, "start");
        record.transition(ConnectionState::Connected, "handshake");
        record.transition(ConnectionState::Disconnected, "probe failed");

        let snapshot = record.snapshot();
        let reasons: Vec<&str> = snapshot.transitions.iter().map(|t| t.reason.as_str()).collect();
        assert_eq!(reasons, vec!["handshake", "probe failed"]);
        assert!(record.transition(ConnectionState::Disconnected, "again").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_quality_unknown_while_probe_in_flight() {
        let mut record = ConnectionRecord::new(4, 4);
        record.transition(ConnectionState::Connected, "up");
        assert_eq!(record.quality(), ConnectionQuality::Unknown);

        record.record_ping();
        tokio::time::advance(Duration::from_millis(150)).await;
        record.record_pong();
        assert_eq!(record.quality(), ConnectionQuality::Good);

        record.record_ping();
        assert_eq!(record.quality(), ConnectionQuality::Unknown);
    }

    #[test]
    fn test_errors_and_reset() {
        let mut record = ConnectionRecord::new(4, 2);
        for n in 0..3 {
            record.record_error(&format!("boom {n}"));
        }
        let snapshot = record.snapshot();
        assert_eq!(snapshot.error_count, 3);
        assert_eq!(snapshot.errors.len(), 2);
        assert_eq!(snapshot.metrics.last_error.as_deref(), Some("boom 2"));

        record.reset_metrics();
        let snapshot = record.snapshot();
        assert_eq!(snapshot.error_count, 0);
        assert!(snapshot.errors.is_empty());
        assert_eq!(snapshot.metrics, ConnectionMetrics::default());
    }
}
