//! Feed session error types.

use std::time::Duration;

use thiserror::Error;
use venue_core::error::ConfigError;

/// Errors raised by the market data session.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FeedError {
    /// Configuration was invalid
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// TCP connect failed
    #[error("Connection failed: {0}")]
    Connection(String),

    /// TLS or WebSocket upgrade failed
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Connect or handshake did not finish in time
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Read or write on the established stream failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Upstream sent an error frame
    #[error("Upstream protocol error: {0}")]
    Protocol(String),

    /// Inbound frame could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Upstream rejected the credentials
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    /// No frame arrived within twice the heartbeat interval
    #[error("Heartbeat timeout: no frame for {0:?}")]
    HeartbeatTimeout(Duration),

    /// All reconnect attempts were used up; the session stays down until
    /// explicitly restarted
    #[error("Gave up after {attempts} reconnect attempts")]
    ReconnectExhausted { attempts: u32 },
}

pub type FeedResult<T> = Result<T, FeedError>;
