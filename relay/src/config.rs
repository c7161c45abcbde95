//! Relay configuration.
//!
//! Provides configuration options for the relay server, loaded from the
//! environment with a default for every setting.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default bind host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default bind port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default per-connection outbound queue capacity.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Default idle timeout in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;

/// Default heartbeat interval in seconds.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 30;

/// Default limit on a single socket write, in seconds.
pub const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 10;

/// Default maximum inbound message size in bytes.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// Default registry command queue capacity.
pub const DEFAULT_COMMAND_QUEUE: usize = 1024;

/// Default interval between stats log lines, in seconds.
pub const DEFAULT_STATS_INTERVAL_SECS: u64 = 30;

/// What to do when a subscriber's outbound queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Treat the full queue as a failed delivery and drop the connection.
    #[default]
    Disconnect,
    /// Drop the message for that subscriber only.
    DropNewest,
}

impl FromStr for OverflowPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disconnect" => Ok(Self::Disconnect),
            "drop-newest" | "drop_newest" => Ok(Self::DropNewest),
            _ => Err(ConfigError::invalid("RELAY_OVERFLOW_POLICY", s)),
        }
    }
}

/// Who may publish into which rooms.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PublishPolicy {
    /// Any connected client may publish into any room.
    #[default]
    Open,
    /// Only in-process backend publishers may publish.
    BackendOnly,
    /// Clients may publish only into rooms starting with one of these prefixes.
    Prefixes(Vec<String>),
}

impl FromStr for PublishPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        if let Some(list) = value.strip_prefix("prefix:") {
            let prefixes: Vec<String> = list
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(ToString::to_string)
                .collect();
            if prefixes.is_empty() {
                return Err(ConfigError::invalid("RELAY_PUBLISH_POLICY", s));
            }
            return Ok(Self::Prefixes(prefixes));
        }

        match value.to_ascii_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "backend-only" | "backend_only" => Ok(Self::BackendOnly),
            _ => Err(ConfigError::invalid("RELAY_PUBLISH_POLICY", s)),
        }
    }
}

/// Configuration for the relay server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Bind host.
    pub host: String,

    /// Bind port.
    pub port: u16,

    /// Capacity of each connection's outbound queue.
    pub outbound_capacity: usize,

    /// Policy applied when an outbound queue is full.
    pub overflow_policy: OverflowPolicy,

    /// Close connections with no inbound activity for this long.
    pub idle_timeout: Duration,

    /// Interval between server pings.
    pub heartbeat_interval: Duration,

    /// Close connections whose socket does not accept a frame within this long.
    pub write_timeout: Duration,

    /// Maximum inbound message size in bytes.
    pub max_message_bytes: usize,

    /// Capacity of the registry command queue.
    pub command_queue: usize,

    /// Interval between stats log lines (None disables).
    pub stats_interval: Option<Duration>,

    /// Publish authorization policy for client publishes.
    pub publish_policy: PublishPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            overflow_policy: OverflowPolicy::default(),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            write_timeout: Duration::from_secs(DEFAULT_WRITE_TIMEOUT_SECS),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            command_queue: DEFAULT_COMMAND_QUEUE,
            stats_interval: Some(Duration::from_secs(DEFAULT_STATS_INTERVAL_SECS)),
            publish_policy: PublishPolicy::default(),
        }
    }
}

impl RelayConfig {
    /// Creates a new configuration bound to the given address.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Loads the configuration from `RELAY_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or the result is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through a key lookup function.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be parsed or the result is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let stats_secs: u64 = parse_or(&lookup, "RELAY_STATS_INTERVAL_SECS", DEFAULT_STATS_INTERVAL_SECS)?;

        let config = Self {
            host: lookup("RELAY_HOST").unwrap_or(defaults.host),
            port: parse_or(&lookup, "RELAY_PORT", defaults.port)?,
            outbound_capacity: parse_or(&lookup, "RELAY_OUTBOUND_CAPACITY", defaults.outbound_capacity)?,
            overflow_policy: parse_or(&lookup, "RELAY_OVERFLOW_POLICY", defaults.overflow_policy)?,
            idle_timeout: Duration::from_secs(parse_or(
                &lookup,
                "RELAY_IDLE_TIMEOUT_SECS",
                DEFAULT_IDLE_TIMEOUT_SECS,
            )?),
            heartbeat_interval: Duration::from_secs(parse_or(
                &lookup,
                "RELAY_HEARTBEAT_SECS",
                DEFAULT_HEARTBEAT_SECS,
            )?),
            write_timeout: Duration::from_secs(parse_or(
                &lookup,
                "RELAY_WRITE_TIMEOUT_SECS",
                DEFAULT_WRITE_TIMEOUT_SECS,
            )?),
            max_message_bytes: parse_or(&lookup, "RELAY_MAX_MESSAGE_BYTES", defaults.max_message_bytes)?,
            command_queue: parse_or(&lookup, "RELAY_COMMAND_QUEUE", defaults.command_queue)?,
            stats_interval: (stats_secs > 0).then(|| Duration::from_secs(stats_secs)),
            publish_policy: parse_or(&lookup, "RELAY_PUBLISH_POLICY", defaults.publish_policy)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Sets the outbound queue capacity.
    #[must_use]
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    /// Sets the overflow policy.
    #[must_use]
    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    /// Sets the idle timeout and heartbeat interval.
    #[must_use]
    pub fn with_liveness(mut self, idle_timeout: Duration, heartbeat_interval: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self.heartbeat_interval = heartbeat_interval;
        self
    }

    /// Sets the socket write timeout.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Sets the stats log interval.
    #[must_use]
    pub fn with_stats_interval(mut self, interval: Option<Duration>) -> Self {
        self.stats_interval = interval;
        self
    }

    /// Sets the publish policy.
    #[must_use]
    pub fn with_publish_policy(mut self, policy: PublishPolicy) -> Self {
        self.publish_policy = policy;
        self
    }

    /// Returns the `host:port` bind address.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }

        if self.outbound_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("outbound_capacity"));
        }

        if self.command_queue == 0 {
            return Err(ConfigError::ZeroCapacity("command_queue"));
        }

        if self.max_message_bytes == 0 {
            return Err(ConfigError::ZeroCapacity("max_message_bytes"));
        }

        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::InvalidHeartbeat);
        }

        if self.idle_timeout <= self.heartbeat_interval {
            return Err(ConfigError::IdleTimeoutTooShort);
        }

        if self.write_timeout.is_zero() {
            return Err(ConfigError::InvalidWriteTimeout);
        }

        Ok(())
    }
}

fn parse_or<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::invalid(key, &raw)),
        None => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A variable could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
    },

    /// Empty bind host.
    #[error("host cannot be empty")]
    EmptyHost,

    /// A capacity that must be positive is zero.
    #[error("{0} must be > 0")]
    ZeroCapacity(&'static str),

    /// Zero heartbeat interval.
    #[error("heartbeat_interval must be > 0")]
    InvalidHeartbeat,

    /// Zero write timeout.
    #[error("write_timeout must be > 0")]
    InvalidWriteTimeout,

    /// Idle timeout shorter than one heartbeat.
    #[error("idle_timeout must be greater than heartbeat_interval")]
    IdleTimeoutTooShort,
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str) -> Self {
        Self::InvalidValue {
            key,
            value: value.to_string(),
        }
    }
}
