//! TOML-based client configuration.
//!
//! Every field is defaulted through `#[serde(default = "fn")]` helpers so a
//! partial file (or none at all) yields a working configuration, and the
//! `Default` impls are built from the same helpers. The numeric defaults
//! follow the KNX standard timing constants: 10 s for control-channel
//! requests, 1 s per tunneling attempt with 3 attempts, and the
//! 60/10/120 s heartbeat triple.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

use knxnet_core::protocol::body::{DEFAULT_PORT, MULTICAST_GROUP};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// An endpoint string is not a valid `ip:port` pair.
    #[error("invalid endpoint address {0:?}")]
    InvalidEndpoint(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClientConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub pool: PoolConfig,
}

/// Where and how to reach the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    /// Gateway control endpoint as `ip:port`.
    #[serde(default = "default_gateway")]
    pub gateway: String,
    /// Use one socket for control and data, advertising the NAT wildcard
    /// endpoint so the gateway replies to the datagram source.
    #[serde(default = "default_true")]
    pub nat_mode: bool,
    /// Routing mode: multicast group traffic instead of a tunnel.
    #[serde(default)]
    pub routing: bool,
    /// System-setup multicast group for discovery and routing.
    #[serde(default = "default_multicast_group")]
    pub multicast_group: String,
    /// UDP port of the multicast group.
    #[serde(default = "default_port")]
    pub multicast_port: u16,
}

/// Per-operation response budgets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutConfig {
    /// Per-attempt budget for connect/connection-state/disconnect/describe.
    #[serde(default = "default_connect_ms")]
    pub connect_ms: u64,
    /// Per-attempt budget for a tunneling ack.
    #[serde(default = "default_data_ms")]
    pub data_ms: u64,
    /// Budget for the asynchronous group-value response after a read.
    #[serde(default = "default_read_ms")]
    pub read_ms: u64,
    /// How long to collect search responses after a discovery request.
    #[serde(default = "default_search_window_ms")]
    pub search_window_ms: u64,
}

/// Retry behaviour of `send_and_wait`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Maximum sends of one request, first attempt included.
    #[serde(default = "default_total_attempts")]
    pub total_attempts: u32,
    /// Upper bound on one notification wait before re-checking the cell.
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
}

/// Connection-state heartbeat timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatConfig {
    /// Gap between keep-alive requests while the connection is healthy.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub interval_secs: u64,
    /// Re-send the pending request after this long without an answer.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Declare the connection dead after this long without any answer.
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
    /// Poll interval of the heartbeat state machine.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Queue and concurrency bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Outbox queue depth per communicator.
    #[serde(default = "default_outbox_depth")]
    pub outbox_depth: usize,
    /// Concurrent `send_and_wait` callers per communicator.
    #[serde(default = "default_max_concurrent_waits")]
    pub max_concurrent_waits: usize,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_gateway() -> String {
    format!("192.168.1.10:{DEFAULT_PORT}")
}
fn default_true() -> bool {
    true
}
fn default_multicast_group() -> String {
    MULTICAST_GROUP.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_connect_ms() -> u64 {
    10_000
}
fn default_data_ms() -> u64 {
    1_000
}
fn default_read_ms() -> u64 {
    3_000
}
fn default_search_window_ms() -> u64 {
    3_000
}
fn default_total_attempts() -> u32 {
    3
}
fn default_check_interval_ms() -> u64 {
    50
}
fn default_heartbeat_interval_secs() -> u64 {
    60
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_connection_timeout_secs() -> u64 {
    120
}
fn default_poll_interval_ms() -> u64 {
    1_000
}
fn default_outbox_depth() -> usize {
    64
}
fn default_max_concurrent_waits() -> usize {
    8
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            gateway: default_gateway(),
            nat_mode: default_true(),
            routing: false,
            multicast_group: default_multicast_group(),
            multicast_port: default_port(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: default_connect_ms(),
            data_ms: default_data_ms(),
            read_ms: default_read_ms(),
            search_window_ms: default_search_window_ms(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            total_attempts: default_total_attempts(),
            check_interval_ms: default_check_interval_ms(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_heartbeat_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            connection_timeout_secs: default_connection_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            outbox_depth: default_outbox_depth(),
            max_concurrent_waits: default_max_concurrent_waits(),
        }
    }
}

// ── Typed accessors ───────────────────────────────────────────────────────────

impl ConnectionConfig {
    /// Parses the gateway endpoint string.
    pub fn gateway_addr(&self) -> Result<SocketAddrV4, ConfigError> {
        self.gateway
            .parse()
            .map_err(|_| ConfigError::InvalidEndpoint(self.gateway.clone()))
    }

    /// Multicast endpoint for discovery and routing traffic.
    pub fn multicast_addr(&self) -> Result<SocketAddrV4, ConfigError> {
        let group: Ipv4Addr = self
            .multicast_group
            .parse()
            .map_err(|_| ConfigError::InvalidEndpoint(self.multicast_group.clone()))?;
        Ok(SocketAddrV4::new(group, self.multicast_port))
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }
    pub fn data(&self) -> Duration {
        Duration::from_millis(self.data_ms)
    }
    pub fn read(&self) -> Duration {
        Duration::from_millis(self.read_ms)
    }
    pub fn search_window(&self) -> Duration {
        Duration::from_millis(self.search_window_ms)
    }
}

impl RetryConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ── Load / save ───────────────────────────────────────────────────────────────

impl ClientConfig {
    /// Loads the configuration from `path`, returning defaults if the file
    /// does not yet exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Persists the configuration to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                    path: dir.to_path_buf(),
                    source,
                })?;
            }
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
