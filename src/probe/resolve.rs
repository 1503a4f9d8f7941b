//! Host name resolution with a bounded wait.

use std::net::IpAddr;
use std::time::Duration;

use tokio::runtime::Handle;

use super::ProbeError;

/// Name resolution used by probe sessions.
///
/// Called from the blocking probe worker, never from an async context.
pub trait Resolver: Send + Sync {
    fn resolve(&self, host: &str, timeout: Duration) -> Result<IpAddr, ProbeError>;
}

/// Resolver backed by the system lookup on the tokio runtime.
#[derive(Debug, Clone)]
pub struct SystemResolver {
    runtime: Handle,
}

impl SystemResolver {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Bind to the runtime the caller is running on.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Resolver for SystemResolver {
    fn resolve(&self, host: &str, timeout: Duration) -> Result<IpAddr, ProbeError> {
        if let Some(ip) = parse_literal(host) {
            return Ok(ip);
        }

        let lookup = tokio::net::lookup_host(format!("{}:0", host));
        let addrs: Vec<_> = self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, lookup).await })
            .map_err(|_| ProbeError::Resolution {
                host: host.to_string(),
                reason: format!("DNS timeout after {:?}", timeout),
            })?
            .map_err(|e| ProbeError::Resolution {
                host: host.to_string(),
                reason: e.to_string(),
            })?
            .collect();

        // Prefer IPv4: ICMPv6 is best effort only
        addrs
            .iter()
            .find(|sa| sa.is_ipv4())
            .or_else(|| addrs.first())
            .map(|sa| sa.ip())
            .ok_or_else(|| ProbeError::Resolution {
                host: host.to_string(),
                reason: "no addresses found".to_string(),
            })
    }
}

/// Literal addresses bypass resolution.
pub fn parse_literal(host: &str) -> Option<IpAddr> {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .ok()
}
