//! Common error types shared across the venue crates.
//!
//! Each failure domain gets its own enum. Crate-specific errors wrap these
//! using `#[from]` where appropriate.

use thiserror::Error;

/// Rejections returned to an order submitter.
///
/// These are expected, non-fatal outcomes: the caller validates input and
/// receives the reason back. Invariant violations inside the engine are
/// handled with assertions instead.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum OrderRejection {
    /// Order quantity must be positive
    #[error("Order quantity must be positive")]
    ZeroQuantity,

    /// Limit orders require a positive price
    #[error("Limit price {0} is not positive")]
    NonPositivePrice(f64),

    /// Symbol must be non-empty
    #[error("Order symbol is empty")]
    EmptySymbol,

    /// Side string did not parse
    #[error("Unknown order side: {0}")]
    UnknownSide(String),

    /// Order type string did not parse
    #[error("Unknown order type: {0}")]
    UnknownOrderType(String),

    /// No market data cached for the symbol (market orders need a quote)
    #[error("No market data available for {0}")]
    NoMarketData(String),

    /// A broker risk limit blocked the order
    #[error("Risk limit violated: {0}")]
    RiskLimit(String),
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// Required field is missing or empty
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Field has an invalid value
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// Underlying configuration source failed to load or parse
    #[error("Configuration parse error: {0}")]
    Parse(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

/// Event sink errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SinkError {
    /// Writing a log record failed
    #[error("Sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be serialized
    #[error("Sink serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The sink worker has shut down
    #[error("Sink closed")]
    Closed,
}
