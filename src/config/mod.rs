//! Configuration management for the gateway.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP/WebSocket server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// WebSocket keepalive configuration.
    #[serde(default)]
    pub websocket: WebSocketConfig,

    /// Reflector directory configuration.
    #[serde(default)]
    pub reflector: ReflectorConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.websocket.pong_wait <= self.websocket.ping_interval {
            return Err(Error::Config(
                "websocket pong_wait must exceed ping_interval".into(),
            ));
        }

        if let Some(path) = &self.reflector.host_file {
            if path.as_os_str().is_empty() {
                return Err(Error::Config("reflector host_file is empty".into()));
            }
        }

        Ok(())
    }
}

/// HTTP/WebSocket server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address for the HTTP/WebSocket server.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Server name announced in the `welcome` message.
    #[serde(default)]
    pub server_name: String,

    /// Maximum concurrent sessions (0 = unbounded).
    #[serde(default)]
    pub max_sessions: usize,

    /// Allowed CORS/WebSocket origins (`*`, exact, or one-`*` wildcard).
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Allowed CORS request headers.
    #[serde(default = "default_allowed_headers")]
    pub allowed_headers: Vec<String>,

    /// Allowed CORS methods.
    #[serde(default = "default_allowed_methods")]
    pub allowed_methods: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            server_name: String::new(),
            max_sessions: 0,
            allowed_origins: Vec::new(),
            allowed_headers: default_allowed_headers(),
            allowed_methods: default_allowed_methods(),
        }
    }
}

/// WebSocket keepalive settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Keepalive ping interval.
    #[serde(default = "default_ping_interval", with = "humantime_serde")]
    pub ping_interval: Duration,

    /// Read deadline; the browser must show life within this window.
    #[serde(default = "default_pong_wait", with = "humantime_serde")]
    pub pong_wait: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            ping_interval: default_ping_interval(),
            pong_wait: default_pong_wait(),
        }
    }
}

/// Reflector directory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectorConfig {
    /// Path to the M17 host file (JSON).
    #[serde(default)]
    pub host_file: Option<PathBuf>,

    /// How often the host file is re-checked.
    #[serde(default = "default_refresh_interval", with = "humantime_serde")]
    pub refresh_interval: Duration,
}

impl Default for ReflectorConfig {
    fn default() -> Self {
        Self {
            host_file: None,
            refresh_interval: default_refresh_interval(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], crate::DEFAULT_PORT))
}

fn default_allowed_headers() -> Vec<String> {
    vec!["Content-Type".to_string()]
}

fn default_allowed_methods() -> Vec<String> {
    vec!["GET".to_string(), "POST".to_string(), "OPTIONS".to_string()]
}

fn default_ping_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_pong_wait() -> Duration {
    Duration::from_secs(60)
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(60)
}
