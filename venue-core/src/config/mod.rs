//! Feed configuration.
//!
//! The core consumes an already-validated `FeedConfig` value passed at
//! construction; there is no hidden global state. `from_env` layers
//! defaults under `FEED_`-prefixed environment variables for binaries.

use config::{Config, Environment};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn default_data_url() -> String {
    "wss://stream.data.example.test/v2/iex".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_connection_timeout_ms() -> u64 {
    30_000
}

/// Configuration consumed by the market data session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// API key sent in the auth frame
    #[serde(default)]
    pub api_key: String,
    /// API secret sent in the auth frame
    #[serde(default)]
    pub api_secret: String,
    /// Upstream stream URL, `ws://` or `wss://`
    #[serde(default = "default_data_url")]
    pub data_url: String,
    /// Base unit of the linear reconnect backoff
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Consecutive failed attempts before the session gives up
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Heartbeat check period; the stream is stale after twice this
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Timeout for the connect and handshake phases
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    /// Development only: skip peer certificate verification
    #[serde(default)]
    pub danger_accept_invalid_certs: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            data_url: default_data_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            connection_timeout_ms: default_connection_timeout_ms(),
            danger_accept_invalid_certs: false,
        }
    }
}

impl FeedConfig {
    /// Load from `FEED_`-prefixed environment variables, falling back to
    /// the defaults above (e.g. `FEED_API_KEY`, `FEED_DATA_URL`).
    pub fn from_env() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(Environment::with_prefix("FEED").try_parsing(true))
            .build()?;
        let config: FeedConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check required fields and the endpoint URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.is_empty() {
            return Err(ConfigError::MissingField("api_key"));
        }
        if self.api_secret.is_empty() {
            return Err(ConfigError::MissingField("api_secret"));
        }
        Endpoint::parse(&self.data_url)?;
        Ok(())
    }
}

/// A parsed stream endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub secure: bool,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Endpoint {
    /// Split a `ws://` / `wss://` URL into host, port and path.
    ///
    /// The port defaults to 443 (secure) or 80 (insecure) and the path to
    /// `/`. Any other scheme is a configuration error.
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let (secure, rest) = if let Some(rest) = url.strip_prefix("wss://") {
            (true, rest)
        } else if let Some(rest) = url.strip_prefix("ws://") {
            (false, rest)
        } else {
            return Err(ConfigError::InvalidValue {
                field: "data_url",
                reason: format!("unsupported scheme in '{}', expected ws:// or wss://", url),
            });
        };

        let (authority, path) = match rest.find('/') {
            Some(index) => (&rest[..index], rest[index..].to_string()),
            None => (rest, "/".to_string()),
        };
        if authority.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "data_url",
                reason: "missing host".to_string(),
            });
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                    field: "data_url",
                    reason: format!("invalid port '{}'", port),
                })?;
                (host.to_string(), port)
            }
            None => (
                authority.to_string(),
                if secure { 443 } else { 80 },
            ),
        };
        if host.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "data_url",
                reason: "missing host".to_string(),
            });
        }

        Ok(Self {
            secure,
            host,
            port,
            path,
        })
    }

    /// Reassemble the URL for the WebSocket client request.
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}{}", scheme, self.host, self.port, self.path)
    }
}
