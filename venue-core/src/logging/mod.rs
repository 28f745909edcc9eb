//! Standardized logging setup shared by the venue binaries and tests.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: standard tracing filter (e.g. `info`, `feed_manager=debug`)
//! - `LOG_FORMAT`: `pretty` (default), `compact`, or `json`
//! - `LOG_TIMESTAMPS`: `local` (default), `utc`, or `none`
//! - `LOG_LEVEL`: default level when `RUST_LOG` is unset

use std::env;

use tracing_subscriber::fmt;
use tracing_subscriber::fmt::time::{ChronoLocal, ChronoUtc};
use tracing_subscriber::EnvFilter;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable output with colors on a terminal
    #[default]
    Pretty,
    /// Compact single-line output
    Compact,
    /// JSON lines for machine parsing
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

/// Timestamp rendering in log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampFormat {
    /// Local time with offset
    #[default]
    Local,
    /// UTC, ISO 8601
    Utc,
    /// No timestamps
    None,
}

impl TimestampFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "utc" => TimestampFormat::Utc,
            "none" | "off" => TimestampFormat::None,
            _ => TimestampFormat::Local,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    pub timestamps: TimestampFormat,
    /// Default filter when `RUST_LOG` is unset
    pub default_level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            timestamps: TimestampFormat::Local,
            default_level: "info".to_string(),
        }
    }
}

impl LogConfig {
    /// Build a config from `LOG_FORMAT` / `LOG_TIMESTAMPS` / `LOG_LEVEL`.
    pub fn from_env() -> Self {
        Self {
            format: env::var("LOG_FORMAT")
                .map(|s| LogFormat::parse(&s))
                .unwrap_or_default(),
            timestamps: env::var("LOG_TIMESTAMPS")
                .map(|s| TimestampFormat::parse(&s))
                .unwrap_or_default(),
            default_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if a subscriber is already installed.
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_level));
    let ansi = atty::is(atty::Stream::Stdout);

    match (config.format, config.timestamps) {
        (LogFormat::Json, _) => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_timer(ChronoUtc::new("%Y-%m-%dT%H:%M:%S%.3fZ".to_string()))
                .try_init()?;
        }
        (LogFormat::Compact, TimestampFormat::None) => {
            fmt()
                .compact()
                .with_env_filter(env_filter)
                .with_ansi(ansi)
                .without_time()
                .try_init()?;
        }
        (LogFormat::Compact, TimestampFormat::Utc) => {
            fmt()
                .compact()
                .with_env_filter(env_filter)
                .with_ansi(ansi)
                .with_timer(ChronoUtc::new("%Y-%m-%dT%H:%M:%S%.3fZ".to_string()))
                .try_init()?;
        }
        (LogFormat::Compact, TimestampFormat::Local) => {
            fmt()
                .compact()
                .with_env_filter(env_filter)
                .with_ansi(ansi)
                .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f %z".to_string()))
                .try_init()?;
        }
        (LogFormat::Pretty, TimestampFormat::None) => {
            fmt()
                .with_env_filter(env_filter)
                .with_ansi(ansi)
                .without_time()
                .try_init()?;
        }
        (LogFormat::Pretty, TimestampFormat::Utc) => {
            fmt()
                .with_env_filter(env_filter)
                .with_ansi(ansi)
                .with_timer(ChronoUtc::new("%Y-%m-%dT%H:%M:%S%.3fZ".to_string()))
                .try_init()?;
        }
        (LogFormat::Pretty, TimestampFormat::Local) => {
            fmt()
                .with_env_filter(env_filter)
                .with_ansi(ansi)
                .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f %z".to_string()))
                .try_init()?;
        }
    }

    Ok(())
}
