//! Supervision of the duplex channel to the host process.
//!
//! - [`HostTransport`]: what the supervisor drives (handshake, probe, close)
//! - [`TransportSupervisor`]: connect/heartbeat/reconnect state machine
//! - [`BusLink`]: transport that rides on the event bus itself

mod bus_link;
pub mod state;
mod supervisor;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::bus::BusError;

pub use bus_link::BusLink;
pub use state::{
    ConnectionMetrics, ConnectionQuality, ConnectionSnapshot, ConnectionState, ErrorEntry,
    Transition,
};
pub use supervisor::{SupervisorConfig, TransportSupervisor};

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("rejected by host: {0}")]
    Rejected(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    pub fn connection<E: std::fmt::Display>(err: E) -> Self {
        Self::Connection(err.to_string())
    }

    pub fn io<E: std::fmt::Display>(err: E) -> Self {
        Self::Io(err.to_string())
    }

    pub fn serialization<E: std::fmt::Display>(err: E) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<BusError> for TransportError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::RequestTimeout { timeout, .. } => Self::Timeout(timeout),
            BusError::RequestCancelled { .. } => Self::Closed,
            BusError::Serialization(e) => Self::serialization(e),
            other => Self::Rejected(other.to_string()),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err)
    }
}

/// The channel the supervisor keeps alive.
#[async_trait]
pub trait HostTransport: Send + Sync {
    /// Establish the channel. Called on every (re)connect attempt.
    async fn connect(&self) -> Result<(), TransportError>;

    /// One liveness probe. The supervisor bounds it with its probe timeout.
    async fn ping(&self) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}
