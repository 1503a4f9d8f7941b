//! Monitor module: the probe-and-verdict engine.
//!
//! One [`Monitor`] owns every host session, the smoothing window and the
//! verdict. It is driven one cycle at a time by the service worker and is
//! never shared.

mod aggregate;
mod filter;
mod host;
mod verdict;

pub use aggregate::*;
pub use filter::*;
pub use host::*;
pub use verdict::*;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;

use crate::config::{HostsConfig, PingerConfig};
use crate::events::PingEvent;
use crate::probe::{HostBounds, ProbeSession, Resolver, Target, Transport};
use crate::publish::PublishSnapshot;

/// Probe identifiers of the internet reference hosts.
const HOST_PROBE_ID: u16 = 7001;
/// Probe identifiers of the watched hosts.
const WATCH_PROBE_ID: u16 = 8101;

/// Everything one cycle produced.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub snapshot: PublishSnapshot,
    /// Transitions in the order they happened
    pub events: Vec<PingEvent>,
    pub next_interval: Duration,
}

pub struct Monitor {
    hosts: Vec<HostChecker>,
    watched: Vec<HostChecker>,
    filter: FilterWindow,
    verdict: VerdictMachine,
    config: watch::Receiver<PingerConfig>,
}

impl Monitor {
    /// Build one session per configured host.
    ///
    /// A host whose echo buffer cannot be allocated is logged and left out;
    /// it never counts toward `hosts_count`.
    pub fn new(
        hosts: &HostsConfig,
        config: watch::Receiver<PingerConfig>,
        resolver: Arc<dyn Resolver>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let cfg = config.borrow().clone();

        let internet = hosts.hosts.iter().enumerate().map(|(i, host)| {
            Target::new(host, HOST_PROBE_ID + i as u16, hosts.host_threshold)
                .with_payload_size(cfg.datasize)
        });
        let watched = hosts.watch_hosts.iter().enumerate().map(|(i, host)| {
            Target::new(host, WATCH_PROBE_ID + i as u16, hosts.watch_threshold)
                .with_payload_size(cfg.datasize)
                .with_bounds(HostBounds {
                    max_duration_ms: cfg.unavailable_duration_ms,
                    max_loss: cfg.unavailable_loss,
                })
        });

        let hosts: Vec<HostChecker> = internet
            .filter_map(|t| build_checker(t, &resolver, &transport))
            .collect();
        let watched = watched
            .filter_map(|t| build_checker(t, &resolver, &transport))
            .collect();

        tracing::info!("Monitor created with {} internet hosts", hosts.len());

        Self {
            verdict: VerdictMachine::new(hosts.len() as u32),
            filter: FilterWindow::new(cfg.filter_mode, cfg.filter_size),
            hosts,
            watched,
            config,
        }
    }

    pub fn hosts_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn verdict(&self) -> &InternetVerdict {
        self.verdict.verdict()
    }

    /// Forget the public verdict and the filter history, as after a resume.
    pub fn reset_state(&mut self) {
        self.verdict.reset();
        let cfg = self.config.borrow();
        self.filter = FilterWindow::new(cfg.filter_mode, cfg.filter_size);
    }

    /// Release every socket.
    pub fn close(&mut self) {
        for checker in self.hosts.iter_mut().chain(self.watched.iter_mut()) {
            checker.close();
        }
    }

    /// Run one full cycle. Blocks for at most
    /// `hosts x count x timeout` plus resolution time.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        let cfg = self.config.borrow_and_update().clone();
        let started = Instant::now();
        let now = Utc::now();
        let mut events = Vec::new();

        tracing::info!("Internet access is checked...");
        self.filter.reconfigure(cfg.filter_mode, cfg.filter_size);

        let mut results = Vec::with_capacity(self.hosts.len());
        for checker in &mut self.hosts {
            let (result, transition) = checker.check(&cfg, now.timestamp());
            match transition {
                Some(HostTransition::Available(r)) => events.push(PingEvent::HostAvailable(r)),
                Some(HostTransition::Unavailable(r)) => events.push(PingEvent::HostUnavailable(r)),
                None => {}
            }
            results.push(result);
        }

        let raw = aggregate(
            &results,
            cfg.result_mode,
            cfg.unavailable_duration_ms,
            cfg.unavailable_loss,
        );
        let raw_ok = raw.hosts_available > 0
            && raw.duration_ms_total < cfg.slowdown_duration_ms
            && raw.loss_total < cfg.slowdown_loss;

        let mut filtered = raw;
        filtered.duration_ms_total = self.filter.push(raw.duration_ms_total);

        let (candidate, transition) = self.verdict.update(&cfg, &filtered, now.timestamp());
        match transition {
            Some(InetTransition::Available(v)) => events.push(PingEvent::InternetAvailable(v)),
            Some(InetTransition::Slowdown(v)) => events.push(PingEvent::InternetSlowdown(v)),
            Some(InetTransition::Unavailable(v)) => events.push(PingEvent::InternetUnavailable(v)),
            None => {}
        }

        let clean = raw_ok && candidate == InetState::Available;
        let mut watched = Vec::new();
        if clean {
            for checker in &mut self.watched {
                let (result, transition) = checker.check(&cfg, now.timestamp());
                watched.push(result);
                match transition {
                    Some(HostTransition::Available(r)) => {
                        events.push(PingEvent::WatchedHostAvailable(r))
                    }
                    Some(HostTransition::Unavailable(r)) => {
                        events.push(PingEvent::WatchedHostUnavailable(r))
                    }
                    None => {}
                }
            }
        }

        let snapshot = PublishSnapshot {
            timestamp: now,
            hosts: results,
            watched,
            inet: self.verdict.verdict().clone(),
        };

        CycleOutcome {
            snapshot,
            events,
            next_interval: next_interval(&cfg, clean, started.elapsed()),
        }
    }
}

fn build_checker(
    target: Target,
    resolver: &Arc<dyn Resolver>,
    transport: &Arc<dyn Transport>,
) -> Option<HostChecker> {
    let host = target.host.clone();
    match ProbeSession::new(Arc::new(target), resolver.clone(), transport.clone()) {
        Ok(session) => Some(HostChecker::new(session)),
        Err(e) => {
            tracing::error!("Session for [ {} ] disabled: {}", host, e);
            None
        }
    }
}
