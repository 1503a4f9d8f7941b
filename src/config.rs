//! Configuration module for the pinger.
//!
//! Loads configuration from environment variables with sensible defaults and
//! validates every value against the limits the service accepts.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Configuration error types.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("cannot parse {field}={value:?}")]
    Parse { field: &'static str, value: String },
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// How per-host results are collapsed into one internet figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultMode {
    Min,
    Average,
    Max,
}

impl FromStr for ResultMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "min" | "minimum" => Ok(ResultMode::Min),
            "1" | "avg" | "average" => Ok(ResultMode::Average),
            "2" | "max" | "maximum" => Ok(ResultMode::Max),
            _ => Err(()),
        }
    }
}

/// Smoothing filter applied to the aggregate latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    None,
    Average,
    Median,
}

impl FromStr for FilterMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "none" | "off" => Ok(FilterMode::None),
            "1" | "avg" | "average" => Ok(FilterMode::Average),
            "2" | "median" => Ok(FilterMode::Median),
            _ => Err(()),
        }
    }
}

/// Hosts probed by the engine. Fixed for the lifetime of the service.
#[derive(Debug, Clone, PartialEq)]
pub struct HostsConfig {
    /// Internet reference hosts (1-3)
    pub hosts: Vec<String>,
    /// Confirmation threshold for per-host unavailable events
    pub host_threshold: u32,
    /// Additional hosts checked only while the internet looks healthy (0-2)
    pub watch_hosts: Vec<String>,
    pub watch_threshold: u32,
}

impl Default for HostsConfig {
    fn default() -> Self {
        Self {
            hosts: vec![
                "8.8.8.8".to_string(),
                "1.1.1.1".to_string(),
                "77.88.8.8".to_string(),
            ],
            host_threshold: 1,
            watch_hosts: Vec::new(),
            watch_threshold: 3,
        }
    }
}

/// Per-cycle engine parameters. May be replaced between cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct PingerConfig {
    /// Probes per host per cycle
    pub count: u32,
    pub timeout: Duration,
    /// Echo payload size in bytes
    pub datasize: usize,
    pub tos: u8,
    pub result_mode: ResultMode,
    pub slowdown_duration_ms: f64,
    pub slowdown_loss: f64,
    pub unavailable_duration_ms: f64,
    pub unavailable_loss: f64,
    /// Consecutive cycles before the internet is declared unavailable
    pub unavailable_threshold: u32,
    pub interval_available: Duration,
    pub interval_unavailable: Duration,
    pub filter_mode: FilterMode,
    pub filter_size: usize,
    /// How long a resolved address is trusted
    pub ip_validity: Duration,
    pub dns_timeout: Duration,
    /// Keep sockets open between cycles
    pub keep_socket: bool,
    pub publish_json: bool,
}

impl Default for PingerConfig {
    fn default() -> Self {
        Self {
            count: 5,
            timeout: Duration::from_millis(1000),
            datasize: 32,
            tos: 0,
            result_mode: ResultMode::Average,
            slowdown_duration_ms: 300.0,
            slowdown_loss: 20.0,
            unavailable_duration_ms: 1000.0,
            unavailable_loss: 80.0,
            unavailable_threshold: 3,
            interval_available: Duration::from_secs(60),
            interval_unavailable: Duration::from_secs(10),
            filter_mode: FilterMode::Median,
            filter_size: 5,
            ip_validity: Duration::from_secs(3600),
            dns_timeout: Duration::from_secs(10),
            keep_socket: false,
            publish_json: false,
        }
    }
}

pub const MAX_HOSTS: usize = 3;
pub const MAX_WATCH_HOSTS: usize = 2;
pub const MAX_FILTER_SIZE: usize = 32;

impl PingerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables (all optional):
    /// - `PINGER_COUNT`, `PINGER_TIMEOUT_MS`, `PINGER_DATASIZE`, `PINGER_TOS`
    /// - `PINGER_RESULT_MODE`: `min`, `average` or `max`
    /// - `PINGER_SLOWDOWN_DURATION_MS`, `PINGER_SLOWDOWN_LOSS`
    /// - `PINGER_UNAVAILABLE_DURATION_MS`, `PINGER_UNAVAILABLE_LOSS`,
    ///   `PINGER_UNAVAILABLE_THRESHOLD`
    /// - `PINGER_INTERVAL_AVAILABLE_MS`, `PINGER_INTERVAL_UNAVAILABLE_MS`
    /// - `PINGER_FILTER_MODE`: `none`, `average` or `median`; `PINGER_FILTER_SIZE`
    /// - `PINGER_IP_VALIDITY_SECS`, `PINGER_DNS_TIMEOUT_MS`
    /// - `PINGER_KEEP_SOCKET`, `PINGER_PUBLISH_JSON`
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, then validate.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(v) = parse_var(&lookup, "PINGER_COUNT")? {
            cfg.count = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "PINGER_TIMEOUT_MS")? {
            cfg.timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse_var(&lookup, "PINGER_DATASIZE")? {
            cfg.datasize = v;
        }
        if let Some(v) = parse_var(&lookup, "PINGER_TOS")? {
            cfg.tos = v;
        }
        if let Some(v) = parse_var(&lookup, "PINGER_RESULT_MODE")? {
            cfg.result_mode = v;
        }
        if let Some(v) = parse_var(&lookup, "PINGER_SLOWDOWN_DURATION_MS")? {
            cfg.slowdown_duration_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "PINGER_SLOWDOWN_LOSS")? {
            cfg.slowdown_loss = v;
        }
        if let Some(v) = parse_var(&lookup, "PINGER_UNAVAILABLE_DURATION_MS")? {
            cfg.unavailable_duration_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "PINGER_UNAVAILABLE_LOSS")? {
            cfg.unavailable_loss = v;
        }
        if let Some(v) = parse_var(&lookup, "PINGER_UNAVAILABLE_THRESHOLD")? {
            cfg.unavailable_threshold = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "PINGER_INTERVAL_AVAILABLE_MS")? {
            cfg.interval_available = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "PINGER_INTERVAL_UNAVAILABLE_MS")? {
            cfg.interval_unavailable = Duration::from_millis(v);
        }
        if let Some(v) = parse_var(&lookup, "PINGER_FILTER_MODE")? {
            cfg.filter_mode = v;
        }
        if let Some(v) = parse_var(&lookup, "PINGER_FILTER_SIZE")? {
            cfg.filter_size = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "PINGER_IP_VALIDITY_SECS")? {
            cfg.ip_validity = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "PINGER_DNS_TIMEOUT_MS")? {
            cfg.dns_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse_bool(&lookup, "PINGER_KEEP_SOCKET")? {
            cfg.keep_socket = v;
        }
        if let Some(v) = parse_bool(&lookup, "PINGER_PUBLISH_JSON")? {
            cfg.publish_json = v;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Check every value against the accepted limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("count", self.count as u64, 1, 25)?;
        check_range("timeout", millis(self.timeout), 100, 60_000)?;
        check_range("datasize", self.datasize as u64, 1, 255)?;
        check_range("unavailable_threshold", self.unavailable_threshold as u64, 1, 255)?;
        check_range("interval_available", millis(self.interval_available), 1000, 3_600_000)?;
        check_range("interval_unavailable", millis(self.interval_unavailable), 1000, 3_600_000)?;
        check_range("filter_size", self.filter_size as u64, 0, MAX_FILTER_SIZE as u64)?;
        check_range("dns_timeout", millis(self.dns_timeout), 100, 60_000)?;

        if self.ip_validity.is_zero() {
            return Err(invalid("ip_validity", "must be positive"));
        }

        for (field, loss) in [
            ("slowdown_loss", self.slowdown_loss),
            ("unavailable_loss", self.unavailable_loss),
        ] {
            if !(0.0..=100.0).contains(&loss) {
                return Err(invalid(field, format!("{} is outside 0..=100", loss)));
            }
        }

        for (field, ms) in [
            ("slowdown_duration_ms", self.slowdown_duration_ms),
            ("unavailable_duration_ms", self.unavailable_duration_ms),
        ] {
            if !ms.is_finite() {
                return Err(invalid(field, format!("{} is not a finite number", ms)));
            }
        }
        if self.slowdown_duration_ms <= 0.0 {
            return Err(invalid("slowdown_duration_ms", "must be positive"));
        }
        if self.unavailable_duration_ms <= self.slowdown_duration_ms {
            return Err(invalid(
                "unavailable_duration_ms",
                "must be greater than slowdown_duration_ms",
            ));
        }
        if self.unavailable_loss <= self.slowdown_loss {
            return Err(invalid("unavailable_loss", "must be greater than slowdown_loss"));
        }

        Ok(())
    }
}

impl HostsConfig {
    /// Load host lists from environment variables.
    ///
    /// - `PINGER_HOSTS`: comma separated reference hosts (1-3)
    /// - `PINGER_HOST_THRESHOLD`
    /// - `PINGER_WATCH_HOSTS`: comma separated extra hosts (0-2)
    /// - `PINGER_WATCH_THRESHOLD`
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(list) = lookup("PINGER_HOSTS") {
            cfg.hosts = split_hosts(&list);
        }
        if let Some(v) = parse_var(&lookup, "PINGER_HOST_THRESHOLD")? {
            cfg.host_threshold = v;
        }
        if let Some(list) = lookup("PINGER_WATCH_HOSTS") {
            cfg.watch_hosts = split_hosts(&list);
        }
        if let Some(v) = parse_var(&lookup, "PINGER_WATCH_THRESHOLD")? {
            cfg.watch_threshold = v;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hosts.is_empty() || self.hosts.len() > MAX_HOSTS {
            return Err(invalid(
                "hosts",
                format!("expected 1 to {} hosts, got {}", MAX_HOSTS, self.hosts.len()),
            ));
        }
        if self.watch_hosts.len() > MAX_WATCH_HOSTS {
            return Err(invalid(
                "watch_hosts",
                format!("at most {} watched hosts", MAX_WATCH_HOSTS),
            ));
        }
        check_range("host_threshold", self.host_threshold as u64, 1, 255)?;
        check_range("watch_threshold", self.watch_threshold as u64, 1, 255)?;
        Ok(())
    }
}

fn split_hosts(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_var<T, F>(lookup: &F, field: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(field) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Parse { field, value }),
        None => Ok(None),
    }
}

fn parse_bool<F>(lookup: &F, field: &'static str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(field) {
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::Parse { field, value }),
        },
        None => Ok(None),
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn check_range(field: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(invalid(field, format!("{} is outside {}..={}", value, min, max)));
    }
    Ok(())
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}
