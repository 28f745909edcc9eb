//! The order book and matching engine.
//!
//! One book per symbol. Bids and asks are price-ordered maps of FIFO
//! levels; matching follows strict price-time priority and emits trades
//! into an append-only log.

mod order_book;
mod price_level;

pub use order_book::{BookCounts, BookSnapshot, LevelSummary, OrderBook, Submission};
pub use price_level::PriceLevel;
