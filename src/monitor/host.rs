//! Host checker: one batch of probes against one target, plus debounce.

use std::net::IpAddr;
use std::time::Instant;

use serde::Serialize;

use crate::config::PingerConfig;
use crate::probe::{sanitize_elapsed, ProbeError, ProbeSession};

/// Classification of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HostState {
    Ok,
    Unavailable,
    Failed,
}

/// Snapshot of one host's batch, produced once per cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostBatchResult {
    pub host: String,
    pub address: Option<IpAddr>,
    pub transmitted: u32,
    pub received: u32,
    /// Sum of all round trips in the batch, lost probes included
    pub total_time_ms: f64,
    /// Average round trip
    pub duration_ms: f64,
    /// Packet loss, 0-100
    pub loss: f64,
    pub ttl: u8,
    pub state: HostState,
    /// Unix time the host became unavailable, 0 while available
    pub time_unavailable: i64,
}

impl HostBatchResult {
    pub fn is_available(&self) -> bool {
        self.state == HostState::Ok
    }
}

/// Per-host debounce counters, kept across cycles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostDebounceState {
    pub count_unavailable: u32,
    pub notified: bool,
    pub time_unavailable: i64,
}

/// A debounced host availability transition.
#[derive(Debug, Clone, PartialEq)]
pub enum HostTransition {
    /// Back after a notified outage; carries the outage start.
    Available(HostBatchResult),
    Unavailable(HostBatchResult),
}

impl HostDebounceState {
    /// Fold one batch classification into the counters.
    ///
    /// `result.time_unavailable` is filled in from the debounce state. A
    /// transition is returned at most once per outage in each direction.
    pub fn update(
        &mut self,
        result: &mut HostBatchResult,
        threshold: u32,
        now: i64,
    ) -> Option<HostTransition> {
        if result.state == HostState::Ok {
            if !self.notified && self.count_unavailable == 0 {
                return None;
            }

            tracing::info!("Host [ {} ] is available", result.host);
            let was_notified = self.notified;
            let mut restored = result.clone();
            restored.time_unavailable = self.time_unavailable;
            *self = HostDebounceState::default();

            return was_notified.then_some(HostTransition::Available(restored));
        }

        if self.time_unavailable == 0 {
            self.time_unavailable = now;
        }
        self.count_unavailable += 1;
        result.time_unavailable = self.time_unavailable;
        tracing::warn!(
            "Host [ {} ] is not available (count={})",
            result.host,
            self.count_unavailable
        );

        if !self.notified && self.count_unavailable >= threshold {
            self.notified = true;
            return Some(HostTransition::Unavailable(result.clone()));
        }
        None
    }
}

/// Drives a [`ProbeSession`] through batches and debounces the outcome.
pub struct HostChecker {
    session: ProbeSession,
    debounce: HostDebounceState,
}

impl HostChecker {
    pub fn new(session: ProbeSession) -> Self {
        Self {
            session,
            debounce: HostDebounceState::default(),
        }
    }

    pub fn host(&self) -> &str {
        &self.session.target().host
    }

    pub fn debounce(&self) -> &HostDebounceState {
        &self.debounce
    }

    pub fn close(&mut self) {
        self.session.close();
    }

    /// Run one batch and update the debounce state.
    pub fn check(&mut self, cfg: &PingerConfig, now: i64) -> (HostBatchResult, Option<HostTransition>) {
        let mut result = self.run_batch(cfg);

        tracing::debug!(
            "Ping statistics for [{} : {}]: {} packets transmitted, {} received, {:.1}% packet loss, average time {:.0} ms",
            result.host,
            result.address.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string()),
            result.transmitted,
            result.received,
            result.loss,
            result.duration_ms
        );

        let threshold = self.session.target().unavailable_threshold;
        let transition = self.debounce.update(&mut result, threshold, now);
        (result, transition)
    }

    fn run_batch(&mut self, cfg: &PingerConfig) -> HostBatchResult {
        match self.exchange(cfg) {
            Ok(()) => {
                if !cfg.keep_socket {
                    self.session.close();
                }
                self.batch_result()
            }
            Err(e) => {
                tracing::error!("Ping [ {} ] failed: {}", self.host(), e);
                self.session.close();
                self.failed_result(cfg)
            }
        }
    }

    /// Resolve, open and run `count` send/receive exchanges.
    fn exchange(&mut self, cfg: &PingerConfig) -> Result<(), ProbeError> {
        // Decided on the previous batch's replies
        let stale = self.session.received == 0 || self.session.needs_resolve(cfg.ip_validity);
        self.session.reset_counters();

        if stale {
            self.session.invalidate();
            self.session.resolve(cfg.dns_timeout)?;
        }

        if !self.session.is_open() {
            self.session.open(cfg.timeout, cfg.tos, cfg.dns_timeout)?;
        }

        for _ in 0..cfg.count {
            let start = Instant::now();
            self.session.send_echo()?;

            let reply = self.session.recv_echo(cfg.timeout);
            let elapsed = sanitize_elapsed(Instant::now().checked_duration_since(start), cfg.timeout);
            self.session.total_time_ms += elapsed;

            match reply {
                Ok(ttl) => tracing::trace!(
                    "Reply from [{}]: icmp_seq={} ttl={:?} time={:.1} ms",
                    self.host(),
                    self.session.sequence(),
                    ttl,
                    elapsed
                ),
                Err(e) if e.is_loss() => tracing::trace!(
                    "Packet loss for [{}]: icmp_seq={}",
                    self.host(),
                    self.session.sequence()
                ),
                Err(e) => return Err(e),
            }
        }

        if self.session.transmitted == 0 {
            return Err(ProbeError::Send("no probes transmitted".to_string()));
        }
        Ok(())
    }

    fn batch_result(&self) -> HostBatchResult {
        let s = &self.session;
        let (duration_ms, loss) = batch_stats(s.transmitted, s.received, s.total_time_ms);

        let within_bounds = s
            .target()
            .bounds
            .map_or(true, |b| duration_ms < b.max_duration_ms && loss < b.max_loss);
        let state = if s.received > 0 && within_bounds {
            HostState::Ok
        } else {
            HostState::Unavailable
        };

        HostBatchResult {
            host: s.target().host.clone(),
            address: s.address(),
            transmitted: s.transmitted,
            received: s.received,
            total_time_ms: s.total_time_ms,
            duration_ms,
            loss,
            ttl: s.ttl,
            state,
            time_unavailable: 0,
        }
    }

    fn failed_result(&mut self, cfg: &PingerConfig) -> HostBatchResult {
        // Force re-resolution on the next batch
        self.session.received = 0;
        let timeout_ms = cfg.timeout.as_millis() as f64;

        HostBatchResult {
            host: self.session.target().host.clone(),
            address: self.session.address(),
            transmitted: self.session.transmitted,
            received: 0,
            total_time_ms: self.session.total_time_ms,
            duration_ms: timeout_ms,
            loss: 100.0,
            ttl: self.session.ttl,
            state: HostState::Failed,
            time_unavailable: 0,
        }
    }
}

/// Average round trip and loss percentage of a batch.
pub fn batch_stats(transmitted: u32, received: u32, total_time_ms: f64) -> (f64, f64) {
    if transmitted == 0 {
        return (0.0, 100.0);
    }
    let received = received.min(transmitted);
    let duration = total_time_ms / transmitted as f64;
    let loss = (1.0 - received as f64 / transmitted as f64) * 100.0;
    (duration, loss.clamp(0.0, 100.0))
}
