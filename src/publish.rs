//! Per-cycle snapshot and the publishers it is handed to.

use std::io::{self, Write};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::monitor::{HostBatchResult, InternetVerdict};

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Immutable result of one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishSnapshot {
    pub timestamp: DateTime<Utc>,
    /// Internet reference hosts, in configured order
    pub hosts: Vec<HostBatchResult>,
    /// Watched hosts checked in this cycle; empty unless the cycle was clean
    pub watched: Vec<HostBatchResult>,
    pub inet: InternetVerdict,
}

/// A downstream consumer of cycle snapshots.
pub trait Publisher: Send {
    fn name(&self) -> &str;

    fn publish(&mut self, snapshot: &PublishSnapshot) -> Result<(), PublishError>;
}

/// Logs one summary line per cycle.
#[derive(Debug, Default)]
pub struct TracingPublisher;

impl Publisher for TracingPublisher {
    fn name(&self) -> &str {
        "tracing"
    }

    fn publish(&mut self, snapshot: &PublishSnapshot) -> Result<(), PublishError> {
        let inet = &snapshot.inet;
        tracing::info!(
            "Internet {:?}: {}/{} hosts, {:.0} ms, {:.1}% loss",
            inet.state,
            inet.hosts_available,
            inet.hosts_count,
            inet.duration_ms_total,
            inet.loss_total
        );
        for host in &snapshot.hosts {
            tracing::debug!(
                "Host [ {} ] {:?}: {:.0} ms, {:.1}% loss",
                host.host,
                host.state,
                host.duration_ms,
                host.loss
            );
        }
        Ok(())
    }
}

/// Writes each snapshot as one JSON object per line.
pub struct JsonPublisher<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonPublisher<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> Publisher for JsonPublisher<W> {
    fn name(&self) -> &str {
        "json"
    }

    fn publish(&mut self, snapshot: &PublishSnapshot) -> Result<(), PublishError> {
        serde_json::to_writer(&mut self.writer, snapshot)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}
