//! Configuration for Freelance clients and servers, with defaults.
//!
//! The defaults are the protocol constants: a request fails after 2.5 s
//! without an answer, servers are pinged every 2 s and presumed dead after
//! 6 s of silence. A TOML file may override any of them per process.

use crate::error::{FreelanceError, FreelanceResult};
use freelance_wire::SocketConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// If not a single server replies within this time, give up (ms).
pub const DEFAULT_GLOBAL_TIMEOUT_MS: u64 = 2500;
/// Heartbeat cadence per server (ms).
pub const DEFAULT_PING_INTERVAL_MS: u64 = 2000;
/// Server considered dead if silent for this long (ms).
pub const DEFAULT_SERVER_TTL_MS: u64 = 6000;
/// Pause after each connect so the connection can come up (ms).
pub const DEFAULT_CONNECT_GRACE_MS: u64 = 100;
/// Capacity of the frontend/agent pipe and of the socket queues.
pub const DEFAULT_PIPE_CAPACITY: usize = 1000;
/// Delay between outbound reconnection attempts (ms).
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 100;

/// Freelance configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreelanceConfig {
    /// Maximum time to wait for any server to answer a request.
    pub global_timeout_ms: u64,
    /// Heartbeat cadence per server.
    pub ping_interval_ms: u64,
    /// Silence after which a server is presumed dead.
    pub server_ttl_ms: u64,
    /// Grace period `connect` waits before returning.
    pub connect_grace_ms: u64,
    /// Capacity of the internal pipe.
    pub pipe_capacity: usize,
    /// Delay between outbound reconnection attempts.
    pub reconnect_interval_ms: u64,
}

impl Default for FreelanceConfig {
    fn default() -> Self {
        Self {
            global_timeout_ms: DEFAULT_GLOBAL_TIMEOUT_MS,
            ping_interval_ms: DEFAULT_PING_INTERVAL_MS,
            server_ttl_ms: DEFAULT_SERVER_TTL_MS,
            connect_grace_ms: DEFAULT_CONNECT_GRACE_MS,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
        }
    }
}

/// Deadlines the client agent works with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Timing {
    pub global_timeout: Duration,
    pub ping_interval: Duration,
    pub server_ttl: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        FreelanceConfig::default().timing()
    }
}

impl FreelanceConfig {
    pub fn global_timeout(&self) -> Duration {
        Duration::from_millis(self.global_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn server_ttl(&self) -> Duration {
        Duration::from_millis(self.server_ttl_ms)
    }

    pub fn connect_grace(&self) -> Duration {
        Duration::from_millis(self.connect_grace_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(contents: &str) -> FreelanceResult<Self> {
        let config: Self =
            toml::from_str(contents).map_err(|e| FreelanceError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the agents cannot work with.
    pub fn validate(&self) -> FreelanceResult<()> {
        let positive = [
            ("global_timeout_ms", self.global_timeout_ms),
            ("ping_interval_ms", self.ping_interval_ms),
            ("server_ttl_ms", self.server_ttl_ms),
            ("pipe_capacity", self.pipe_capacity as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(FreelanceError::Config(format!("{name} must be positive")));
            }
        }
        Ok(())
    }

    pub(crate) fn timing(&self) -> Timing {
        Timing {
            global_timeout: self.global_timeout(),
            ping_interval: self.ping_interval(),
            server_ttl: self.server_ttl(),
        }
    }

    pub(crate) fn socket_config(&self) -> SocketConfig {
        SocketConfig {
            reconnect_interval: self.reconnect_interval(),
            queue_capacity: self.pipe_capacity.max(1),
            ..SocketConfig::default()
        }
    }
}

/// Load configuration from a TOML file, with defaults.
///
/// Without a path, or when the file is missing or invalid, the protocol
/// defaults are used and the problem is logged.
pub fn load_config(path: Option<&Path>) -> FreelanceConfig {
    let Some(path) = path else {
        return FreelanceConfig::default();
    };

    if !path.exists() {
        info!(path = %path.display(), "Config file not found, using defaults");
        return FreelanceConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match FreelanceConfig::from_toml_str(&contents) {
            Ok(config) => {
                info!(path = %path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %path.display(),
                    "Failed to parse config, using defaults"
                );
                FreelanceConfig::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %path.display(),
                "Failed to read config file, using defaults"
            );
            FreelanceConfig::default()
        }
    }
}
