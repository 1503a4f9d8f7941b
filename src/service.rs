//! Service module: lifecycle control around the monitor.
//!
//! A single worker task owns the [`Monitor`]. It sleeps for the interval the
//! last cycle asked for, or until a control message arrives. Cycles run on
//! the blocking pool since probes block on socket reads.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{ConfigError, HostsConfig, PingerConfig};
use crate::events::{EventSink, PingEvent};
use crate::monitor::{CycleOutcome, Monitor};
use crate::probe::{Resolver, Transport};
use crate::publish::Publisher;

/// Service error types.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("pinger service is not running")]
    Closed,
    #[error("pinger worker failed: {0}")]
    Worker(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Start,
    Stop,
    Shutdown,
}

enum Wake {
    Control(Control),
    Poll,
}

/// Handle to a running pinger.
pub struct PingerService {
    control: mpsc::Sender<Control>,
    config: watch::Sender<PingerConfig>,
    worker: Option<JoinHandle<Result<(), ServiceError>>>,
}

impl PingerService {
    /// Build the monitor and start polling right away.
    pub fn spawn(
        hosts: &HostsConfig,
        config: PingerConfig,
        resolver: Arc<dyn Resolver>,
        transport: Arc<dyn Transport>,
        events: Arc<dyn EventSink>,
        publishers: Vec<Box<dyn Publisher>>,
    ) -> Self {
        let (config_tx, config_rx) = watch::channel(config);
        let monitor = Monitor::new(hosts, config_rx, resolver, transport);
        let (control_tx, control_rx) = mpsc::channel(8);

        let worker = tokio::spawn(run_worker(monitor, control_rx, events, publishers));

        Self {
            control: control_tx,
            config: config_tx,
            worker: Some(worker),
        }
    }

    /// Pause polling at the next wait point.
    pub async fn suspend(&self) -> Result<(), ServiceError> {
        self.send(Control::Stop).await
    }

    /// Resume polling and run a cycle immediately.
    pub async fn resume(&self) -> Result<(), ServiceError> {
        self.send(Control::Start).await
    }

    /// Replace the cycle parameters; the next cycle picks them up.
    pub fn update_config(&self, config: PingerConfig) -> Result<(), ServiceError> {
        config.validate()?;
        self.config.send(config).map_err(|_| ServiceError::Closed)
    }

    pub fn config(&self) -> PingerConfig {
        self.config.borrow().clone()
    }

    /// Stop the worker and wait for it to release its sockets.
    pub async fn stop(&mut self) -> Result<(), ServiceError> {
        let worker = self.worker.take().ok_or(ServiceError::Closed)?;
        // A worker that already exited has dropped the receiver
        let _ = self.control.send(Control::Shutdown).await;

        match worker.await {
            Ok(result) => result,
            Err(e) => Err(ServiceError::Worker(e.to_string())),
        }
    }

    async fn send(&self, msg: Control) -> Result<(), ServiceError> {
        self.control.send(msg).await.map_err(|_| ServiceError::Closed)
    }
}

async fn run_worker(
    mut monitor: Monitor,
    mut control: mpsc::Receiver<Control>,
    events: Arc<dyn EventSink>,
    mut publishers: Vec<Box<dyn Publisher>>,
) -> Result<(), ServiceError> {
    let mut enabled = true;
    let mut wait = Duration::ZERO;

    tracing::info!("Pinger service started");
    events.post(PingEvent::ServiceStarted);

    loop {
        let wake = if enabled {
            tokio::select! {
                msg = control.recv() => msg.map(Wake::Control),
                _ = tokio::time::sleep(wait) => Some(Wake::Poll),
            }
        } else {
            control.recv().await.map(Wake::Control)
        };

        match wake {
            Some(Wake::Poll) => {}
            Some(Wake::Control(Control::Start)) => {
                if !enabled {
                    enabled = true;
                    monitor.reset_state();
                    tracing::info!("Pinger service started");
                    events.post(PingEvent::ServiceStarted);
                }
            }
            Some(Wake::Control(Control::Stop)) => {
                if enabled {
                    enabled = false;
                    monitor.close();
                    tracing::info!("Pinger service stopped");
                    events.post(PingEvent::ServiceStopped);
                }
                continue;
            }
            Some(Wake::Control(Control::Shutdown)) | None => break,
        }

        let (returned, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = monitor.run_cycle();
            (monitor, outcome)
        })
        .await
        .map_err(|e| {
            tracing::error!("Ping cycle aborted: {}", e);
            ServiceError::Worker(e.to_string())
        })?;
        monitor = returned;

        wait = deliver(outcome, events.as_ref(), &mut publishers);
        tracing::debug!("Next check in {:?}", wait);
    }

    monitor.close();
    if enabled {
        tracing::info!("Pinger service stopped");
        events.post(PingEvent::ServiceStopped);
    }
    Ok(())
}

/// Post the cycle's events, then hand the snapshot to every publisher.
fn deliver(
    outcome: CycleOutcome,
    events: &dyn EventSink,
    publishers: &mut [Box<dyn Publisher>],
) -> Duration {
    for event in outcome.events {
        events.post(event);
    }
    for publisher in publishers.iter_mut() {
        if let Err(e) = publisher.publish(&outcome.snapshot) {
            tracing::warn!("Publisher {} failed: {}", publisher.name(), e);
        }
    }
    outcome.next_interval
}
