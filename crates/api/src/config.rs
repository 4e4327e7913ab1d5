//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use dispatch::CollisionPolicy;
use thiserror::Error;

/// An environment variable held a value that could not be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Which publisher committed events go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    /// In-memory capture with synchronous local dispatch.
    Capture,
    /// Partitioned message log with dead-letter fallback.
    Log,
}

impl FromStr for SinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "capture" => Ok(SinkKind::Capture),
            "log" => Ok(SinkKind::Log),
            _ => Err("expected 'capture' or 'log'".to_string()),
        }
    }
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err("expected 'pretty' or 'json'".to_string()),
        }
    }
}

/// Server and pipeline configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
/// - `EVENT_SINK`: `capture` or `log` (default: `capture`)
/// - `EVENT_NAMESPACE`: topic namespace (default: `"domain"`)
/// - `EVENT_PARTITIONS`: partitions per in-memory topic (default: `3`)
/// - `MONITOR_TIMEOUT_MS`: processing timeout (default: `30000`)
/// - `MONITOR_SWEEP_INTERVAL_MS`: timeout sweep period (default: `5000`)
/// - `HANDLER_COLLISION_POLICY`: `overwrite` or `reject` (default: `overwrite`)
/// - `KAFKA_BROKERS`: broker list, only with the `kafka` feature
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub sink: SinkKind,
    pub namespace: String,
    pub partitions: u32,
    pub monitor_timeout: Duration,
    pub sweep_interval: Duration,
    pub collision_policy: CollisionPolicy,
    /// Upper bound on aggregates the sequence tracker remembers.
    pub sequence_max_aggregates: usize,
    #[cfg(feature = "kafka")]
    pub kafka_brokers: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let partitions: u32 = parse_var("EVENT_PARTITIONS", defaults.partitions)?;
        if partitions == 0 {
            return Err(ConfigError::Invalid {
                name: "EVENT_PARTITIONS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let collision_policy = match std::env::var("HANDLER_COLLISION_POLICY") {
            Ok(raw) => raw.parse().map_err(|e: dispatch::DispatchError| ConfigError::Invalid {
                name: "HANDLER_COLLISION_POLICY",
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            Err(_) => defaults.collision_policy,
        };

        Ok(Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: parse_var("PORT", defaults.port)?,
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parse_var("LOG_FORMAT", defaults.log_format)?,
            sink: parse_var("EVENT_SINK", defaults.sink)?,
            namespace: std::env::var("EVENT_NAMESPACE").unwrap_or(defaults.namespace),
            partitions,
            monitor_timeout: Duration::from_millis(parse_var(
                "MONITOR_TIMEOUT_MS",
                defaults.monitor_timeout.as_millis() as u64,
            )?),
            sweep_interval: Duration::from_millis(parse_var(
                "MONITOR_SWEEP_INTERVAL_MS",
                defaults.sweep_interval.as_millis() as u64,
            )?),
            collision_policy,
            sequence_max_aggregates: parse_var(
                "SEQUENCE_MAX_AGGREGATES",
                defaults.sequence_max_aggregates,
            )?,
            #[cfg(feature = "kafka")]
            kafka_brokers: std::env::var("KAFKA_BROKERS").ok(),
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            sink: SinkKind::Capture,
            namespace: "domain".to_string(),
            partitions: 3,
            monitor_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
            collision_policy: CollisionPolicy::Overwrite,
            sequence_max_aggregates: 100_000,
            #[cfg(feature = "kafka")]
            kafka_brokers: None,
        }
    }
}

/// Parses `name` when set, otherwise returns `default`.
fn parse_var<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
