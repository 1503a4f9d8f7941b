//! Uplink pinger
//!
//! Probes a few well-known hosts over ICMP and turns the noisy results into a
//! debounced internet availability verdict.

pub mod config;
pub mod events;
pub mod monitor;
pub mod probe;
pub mod publish;
pub mod service;

pub use config::{ConfigError, HostsConfig, PingerConfig};
pub use events::{EventBus, EventSink, PingEvent};
pub use monitor::{InetState, InternetVerdict, Monitor};
pub use publish::{JsonPublisher, PublishSnapshot, Publisher, TracingPublisher};
pub use service::{PingerService, ServiceError};
