//! Uplink pinger service binary.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uplink_pinger::probe::{IcmpTransport, SystemResolver};
use uplink_pinger::{
    EventBus, HostsConfig, JsonPublisher, PingerConfig, PingerService, Publisher,
    TracingPublisher,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("uplink_pinger=info".parse()?))
        .init();

    // Load configuration
    let hosts = HostsConfig::load()?;
    let cfg = PingerConfig::load()?;
    tracing::info!("Checking internet access via {}", hosts.hosts.join(", "));
    if !hosts.watch_hosts.is_empty() {
        tracing::info!("Watching {}", hosts.watch_hosts.join(", "));
    }

    let mut publishers: Vec<Box<dyn Publisher>> = vec![Box::new(TracingPublisher)];
    if cfg.publish_json {
        publishers.push(Box::new(JsonPublisher::new(std::io::stdout())));
    }

    // Log every event the service posts
    let bus = EventBus::default();
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => tracing::info!("Event: {}", event.name()),
                Err(RecvError::Lagged(n)) => tracing::warn!("Event log skipped {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut service = PingerService::spawn(
        &hosts,
        cfg,
        Arc::new(SystemResolver::current()),
        Arc::new(IcmpTransport),
        Arc::new(bus),
        publishers,
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");
    service.stop().await?;

    Ok(())
}
