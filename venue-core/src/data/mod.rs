//! Market data types delivered by the upstream feed.
//!
//! A tick is one upstream event: a trade print, a best bid/offer quote, or
//! an OHLCV bar. Ticks are informational only; the matcher never consumes
//! them.

use std::fmt;
use std::time::Instant;

/// Channel of an upstream market data event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarketDataType {
    Trade,
    Quote,
    Bar,
}

impl fmt::Display for MarketDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketDataType::Trade => write!(f, "trade"),
            MarketDataType::Quote => write!(f, "quote"),
            MarketDataType::Bar => write!(f, "bar"),
        }
    }
}

/// Variant payload of a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickKind {
    /// A trade print
    Trade { price: f64, size: u64 },
    /// Best bid and offer
    Quote {
        bid_price: f64,
        ask_price: f64,
        bid_size: u64,
        ask_size: u64,
    },
    /// Aggregated OHLCV interval
    Bar {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
    },
}

/// One upstream market data event.
#[derive(Debug, Clone)]
pub struct MarketTick {
    pub symbol: String,
    /// Monotonic receive stamp
    pub timestamp: Instant,
    pub kind: TickKind,
}

impl MarketTick {
    pub fn trade(symbol: impl Into<String>, price: f64, size: u64) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp: Instant::now(),
            kind: TickKind::Trade { price, size },
        }
    }

    pub fn quote(
        symbol: impl Into<String>,
        bid_price: f64,
        ask_price: f64,
        bid_size: u64,
        ask_size: u64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp: Instant::now(),
            kind: TickKind::Quote {
                bid_price,
                ask_price,
                bid_size,
                ask_size,
            },
        }
    }

    pub fn bar(
        symbol: impl Into<String>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp: Instant::now(),
            kind: TickKind::Bar {
                open,
                high,
                low,
                close,
                volume,
            },
        }
    }

    /// Channel this tick belongs to.
    pub fn data_type(&self) -> MarketDataType {
        match self.kind {
            TickKind::Trade { .. } => MarketDataType::Trade,
            TickKind::Quote { .. } => MarketDataType::Quote,
            TickKind::Bar { .. } => MarketDataType::Bar,
        }
    }
}

impl PartialEq for MarketTick {
    /// Ticks compare by symbol and payload; the receive stamp is ignored.
    fn eq(&self, other: &Self) -> bool {
        self.symbol == other.symbol && self.kind == other.kind
    }
}

/// A requested subscription: one symbol and the desired channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketSubscription {
    pub symbol: String,
    pub trades: bool,
    pub quotes: bool,
    pub bars: bool,
}

impl MarketSubscription {
    pub fn new(symbol: impl Into<String>, trades: bool, quotes: bool, bars: bool) -> Self {
        Self {
            symbol: symbol.into(),
            trades,
            quotes,
            bars,
        }
    }
}
