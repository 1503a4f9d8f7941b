//! Probe module: one ICMP echo exchange against one target.
//!
//! The resolver and the raw socket transport sit behind traits so the host
//! checker can be driven without privileges in tests.

mod packet;
mod resolve;
mod session;
mod socket;

#[cfg(test)]
pub(crate) mod testing;

pub use packet::*;
pub use resolve::*;
pub use session::*;
pub use socket::*;

use std::time::Duration;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to resolve {host}: {reason}")]
    Resolution { host: String, reason: String },
    #[error("failed to open ICMP socket: {0}")]
    Socket(String),
    #[error("failed to send echo request: {0}")]
    Send(String),
    #[error("no matching reply within {0:?}")]
    ReceiveTimeout(Duration),
    #[error("cannot allocate {0} byte echo buffer")]
    Buffer(usize),
}

impl ProbeError {
    /// A lost probe, as opposed to a fault that aborts the batch.
    pub fn is_loss(&self) -> bool {
        matches!(self, ProbeError::ReceiveTimeout(_))
    }
}

/// Immutable per-host probe configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    /// Host name or literal address.
    pub host: String,
    /// ICMP echo identifier, unique per target.
    pub probe_id: u16,
    /// Consecutive failed batches before the host is declared down.
    pub unavailable_threshold: u32,
    /// Echo payload bytes; the buffer is allocated once per session.
    pub payload_size: usize,
    /// Extra latency/loss bounds a batch must meet to count as `Ok`.
    pub bounds: Option<HostBounds>,
}

/// Host-level classification bounds used by watched hosts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostBounds {
    pub max_duration_ms: f64,
    pub max_loss: f64,
}

impl Target {
    pub fn new(host: &str, probe_id: u16, unavailable_threshold: u32) -> Self {
        Self {
            host: host.to_string(),
            probe_id,
            unavailable_threshold: unavailable_threshold.max(1),
            payload_size: 32,
            bounds: None,
        }
    }

    pub fn with_payload_size(mut self, payload_size: usize) -> Self {
        self.payload_size = payload_size;
        self
    }

    pub fn with_bounds(mut self, bounds: HostBounds) -> Self {
        self.bounds = Some(bounds);
        self
    }
}
