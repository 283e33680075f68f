//! Gateway configuration.
//!
//! Loaded from a TOML file; every key is optional:
//!
//! ```toml
//! address = "127.0.0.1:8080"
//! log_level = "info"
//!
//! [session]
//! outbound_capacity = 256
//! ping_interval_ms = 1000
//! pong_wait_ms = 60000
//! write_wait_ms = 10000
//! max_message_size = 65536
//! max_batch_size = 20
//! flush_interval_ms = 5000
//!
//! [datasources.tweets]
//! type = "memory"
//! name = "Tweets"
//! path = "fixtures/tweets.jsonl"
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_outbound_capacity() -> usize {
    256
}

fn default_ping_interval_ms() -> u64 {
    1_000
}

fn default_pong_wait_ms() -> u64 {
    60_000
}

fn default_write_wait_ms() -> u64 {
    10_000
}

/// 64 KiB.
fn default_max_message_size() -> usize {
    65_536
}

fn default_max_batch_size() -> usize {
    20
}

fn default_flush_interval_ms() -> u64 {
    5_000
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level gateway configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Listen address.
    #[serde(default = "default_address")]
    pub address: String,
    /// Log filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Per-session tuning.
    #[serde(default)]
    pub session: SessionConfig,
    /// Datasource tables keyed by id.
    #[serde(default)]
    pub datasources: BTreeMap<String, toml::Table>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            log_level: default_log_level(),
            session: SessionConfig::default(),
            datasources: BTreeMap::new(),
        }
    }
}

impl ServerConfig {
    /// Reads and validates a configuration file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parses and validates a configuration document.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;
        self.session.validate()
    }

    /// Listen address as a socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.address
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("address '{}': {e}", self.address)))
    }
}

/// Per-session tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Capacity of the outbound message queue.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
    /// Keepalive ping period.
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// Read deadline, reset on every pong.
    #[serde(default = "default_pong_wait_ms")]
    pub pong_wait_ms: u64,
    /// Deadline for a single frame write.
    #[serde(default = "default_write_wait_ms")]
    pub write_wait_ms: u64,
    /// Largest accepted inbound frame in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Graph nodes per `SEARCH_RECEIVE` batch.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Period of the partial batch flush.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: default_outbound_capacity(),
            ping_interval_ms: default_ping_interval_ms(),
            pong_wait_ms: default_pong_wait_ms(),
            write_wait_ms: default_write_wait_ms(),
            max_message_size: default_max_message_size(),
            max_batch_size: default_max_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl SessionConfig {
    /// Keepalive ping period.
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Read deadline.
    #[must_use]
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    /// Write deadline.
    #[must_use]
    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }

    /// Partial batch flush period.
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("outbound_capacity", self.outbound_capacity as u64),
            ("ping_interval_ms", self.ping_interval_ms),
            ("pong_wait_ms", self.pong_wait_ms),
            ("write_wait_ms", self.write_wait_ms),
            ("max_message_size", self.max_message_size as u64),
            ("max_batch_size", self.max_batch_size as u64),
            ("flush_interval_ms", self.flush_interval_ms),
        ];
        if let Some((key, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("session.{key} must be > 0")));
        }
        if self.pong_wait_ms <= self.ping_interval_ms {
            return Err(ConfigError::Invalid(
                "session.pong_wait_ms must exceed session.ping_interval_ms".into(),
            ));
        }
        Ok(())
    }
}
