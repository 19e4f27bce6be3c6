//! Server configuration.
//!
//! Loading flow:
//! 1. Start with compiled [`ServerConfig::default()`]
//! 2. If a config file is given and exists, layer its values over defaults
//! 3. Apply `RELAY_*` environment variable overrides (highest priority)

use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configuration loading failure.
#[derive(Debug, thiserror::Error)]
#[error("invalid configuration: {source}")]
pub struct ConfigError {
    #[source]
    source: Box<figment::Error>,
}

/// Configuration for the relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket subscribers.
    pub max_connections: usize,
    /// Heartbeat ping interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Heartbeat timeout in seconds (close after this long without pongs).
    pub heartbeat_timeout_secs: u64,
    /// Timeout for draining sessions at shutdown, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 256,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            shutdown_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    /// Load configuration from an optional JSON file and `RELAY_*`
    /// environment variables.
    ///
    /// A missing file is fine (defaults apply); a present but malformed
    /// file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            debug!(?path, "loading configuration file");
            figment = figment.merge(Json::file(path));
        }
        figment
            .merge(Env::prefixed("RELAY_"))
            .extract()
            .map_err(|e| ConfigError {
                source: Box::new(e),
            })
    }

    /// Heartbeat ping interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// How long a subscriber may stay silent before being closed.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Session drain timeout at shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// The `host:port` string to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
