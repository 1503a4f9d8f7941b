//! Events posted by the pinger and the bus that carries them.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::monitor::{HostBatchResult, InternetVerdict};

/// A state change worth telling other components about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PingEvent {
    ServiceStarted,
    ServiceStopped,
    /// Host back after a notified outage; `time_unavailable` is the outage start.
    HostAvailable(HostBatchResult),
    HostUnavailable(HostBatchResult),
    WatchedHostAvailable(HostBatchResult),
    WatchedHostUnavailable(HostBatchResult),
    InternetAvailable(InternetVerdict),
    InternetSlowdown(InternetVerdict),
    InternetUnavailable(InternetVerdict),
}

impl PingEvent {
    /// Topic name used when the event leaves the process.
    pub fn name(&self) -> &'static str {
        match self {
            PingEvent::ServiceStarted => "service_started",
            PingEvent::ServiceStopped => "service_stopped",
            PingEvent::HostAvailable(_) => "host_available",
            PingEvent::HostUnavailable(_) => "host_unavailable",
            PingEvent::WatchedHostAvailable(_) => "watched_host_available",
            PingEvent::WatchedHostUnavailable(_) => "watched_host_unavailable",
            PingEvent::InternetAvailable(_) => "internet_available",
            PingEvent::InternetSlowdown(_) => "internet_slowdown",
            PingEvent::InternetUnavailable(_) => "internet_unavailable",
        }
    }

    pub fn is_internet(&self) -> bool {
        matches!(
            self,
            PingEvent::InternetAvailable(_)
                | PingEvent::InternetSlowdown(_)
                | PingEvent::InternetUnavailable(_)
        )
    }
}

/// Fire-and-forget event destination.
pub trait EventSink: Send + Sync {
    fn post(&self, event: PingEvent);
}

/// In-process event bus on a tokio broadcast channel.
///
/// Posting never blocks. A subscriber that falls more than `capacity` events
/// behind loses the oldest ones.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PingEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PingEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EventSink for EventBus {
    fn post(&self, event: PingEvent) {
        tracing::debug!("Posting event {}", event.name());
        // No subscribers is not an error
        let _ = self.tx.send(event);
    }
}
