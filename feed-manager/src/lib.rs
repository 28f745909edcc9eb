// feed-manager: authenticated upstream market data session.
// Decodes the heterogeneous JSON stream into typed ticks and fans them out
// to registered listeners with reconnect and heartbeat supervision.

pub mod decoder;
pub mod error;
pub mod messages;
pub mod session;
pub mod subscriptions;

pub use decoder::FeedEvent;
pub use error::FeedError;
pub use session::{MarketDataFeed, SessionState};
