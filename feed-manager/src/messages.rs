//! Wire message types for the upstream stream.
//!
//! Inbound frames are JSON objects (or arrays of objects) dispatched on
//! their `T` field; outbound frames are the auth and subscription
//! requests. Field names follow the upstream schema, so every struct
//! carries rename attributes. Absent numeric fields decode to zero and an
//! absent symbol to the empty string.

use serde::{Deserialize, Serialize};
use venue_core::data::MarketSubscription;

/// Outbound authentication frame: `{"action":"auth","key":…,"secret":…}`.
#[derive(Debug, Serialize)]
pub struct AuthRequest<'a> {
    pub action: &'static str,
    pub key: &'a str,
    pub secret: &'a str,
}

impl<'a> AuthRequest<'a> {
    pub fn new(key: &'a str, secret: &'a str) -> Self {
        Self {
            action: "auth",
            key,
            secret,
        }
    }
}

/// Outbound subscribe/unsubscribe frame. Empty channels are omitted.
#[derive(Debug, Serialize)]
pub struct SubscriptionRequest {
    pub action: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trades: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub quotes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bars: Vec<String>,
}

impl SubscriptionRequest {
    /// One subscribe frame covering every pending subscription.
    pub fn subscribe(pending: &[MarketSubscription]) -> Self {
        let mut request = Self {
            action: "subscribe",
            trades: Vec::new(),
            quotes: Vec::new(),
            bars: Vec::new(),
        };
        for subscription in pending {
            if subscription.trades {
                request.trades.push(subscription.symbol.clone());
            }
            if subscription.quotes {
                request.quotes.push(subscription.symbol.clone());
            }
            if subscription.bars {
                request.bars.push(subscription.symbol.clone());
            }
        }
        request
    }

    /// An unsubscribe frame covering all three channels for one symbol.
    pub fn unsubscribe(symbol: &str) -> Self {
        Self {
            action: "unsubscribe",
            trades: vec![symbol.to_string()],
            quotes: vec![symbol.to_string()],
            bars: vec![symbol.to_string()],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty() && self.quotes.is_empty() && self.bars.is_empty()
    }
}

/// Inbound trade print: `{"T":"t","S":…,"p":…,"s":…}`.
#[derive(Debug, Deserialize)]
pub struct TradeFrame {
    #[serde(rename = "S", default)]
    pub symbol: String,
    #[serde(rename = "p", default)]
    pub price: f64,
    #[serde(rename = "s", default)]
    pub size: u64,
}

/// Inbound quote: `{"T":"q","S":…,"bp":…,"ap":…,"bs":…,"as":…}`.
#[derive(Debug, Deserialize)]
pub struct QuoteFrame {
    #[serde(rename = "S", default)]
    pub symbol: String,
    #[serde(rename = "bp", default)]
    pub bid_price: f64,
    #[serde(rename = "ap", default)]
    pub ask_price: f64,
    #[serde(rename = "bs", default)]
    pub bid_size: u64,
    #[serde(rename = "as", default)]
    pub ask_size: u64,
}

/// Inbound bar (`b`, `d` and `u` subtypes all decode to this shape).
#[derive(Debug, Deserialize)]
pub struct BarFrame {
    #[serde(rename = "S", default)]
    pub symbol: String,
    #[serde(rename = "o", default)]
    pub open: f64,
    #[serde(rename = "h", default)]
    pub high: f64,
    #[serde(rename = "l", default)]
    pub low: f64,
    #[serde(rename = "c", default)]
    pub close: f64,
    #[serde(rename = "v", default)]
    pub volume: u64,
}

/// Inbound subscription ack carrying the authoritative channel sets.
#[derive(Debug, Default, Deserialize)]
pub struct SubscriptionAck {
    #[serde(default)]
    pub trades: Vec<String>,
    #[serde(default)]
    pub quotes: Vec<String>,
    #[serde(default)]
    pub bars: Vec<String>,
    #[serde(rename = "updatedBars", default)]
    pub updated_bars: Vec<String>,
    #[serde(rename = "dailyBars", default)]
    pub daily_bars: Vec<String>,
}

impl SubscriptionAck {
    /// Union of every channel in the ack; this is the new active set.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .trades
            .iter()
            .chain(&self.quotes)
            .chain(&self.bars)
            .chain(&self.updated_bars)
            .chain(&self.daily_bars)
            .cloned()
            .collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }
}

/// Inbound error frame: optional `code`, message in `msg` or `message`.
#[derive(Debug, Deserialize)]
pub struct ErrorFrame {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorFrame {
    pub fn text(&self) -> String {
        self.msg
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "Unknown error".to_string())
    }
}
