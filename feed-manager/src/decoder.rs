//! Frame decoder: inbound JSON text to typed events.
//!
//! A frame is either one JSON object or an array of objects; arrays are a
//! batch and every element is decoded independently. Dispatch is on the
//! `T` field. Objects without `T` are ignored; unknown `T` values are
//! logged and skipped. A tick whose symbol decodes to empty is dropped
//! before dispatch.

use serde_json::Value;
use tracing::{debug, warn};
use venue_core::data::{MarketTick, TickKind};

use crate::error::FeedError;
use crate::messages::{BarFrame, ErrorFrame, QuoteFrame, SubscriptionAck, TradeFrame};

/// A decoded inbound event.
#[derive(Debug)]
pub enum FeedEvent {
    /// `success` frame with `msg = "connected"` (informational)
    Connected,
    /// `success` frame with `msg = "authenticated"`
    Authenticated,
    /// `subscription` frame: the authoritative subscription set
    SubscriptionAck(SubscriptionAck),
    /// `error` frame from upstream
    UpstreamError { code: Option<i64>, message: String },
    /// A decoded market data tick
    Tick(MarketTick),
}

/// Decode one text frame into zero or more events.
///
/// Malformed JSON is a `Decode` error; the caller reports it and keeps the
/// session running.
pub fn decode_frame(text: &str) -> Result<Vec<FeedEvent>, FeedError> {
    let value: Value =
        serde_json::from_str(text).map_err(|err| FeedError::Decode(err.to_string()))?;

    let mut events = Vec::new();
    match value {
        Value::Array(items) => {
            for item in items {
                if let Some(event) = decode_value(&item)? {
                    events.push(event);
                }
            }
        }
        other => {
            if let Some(event) = decode_value(&other)? {
                events.push(event);
            }
        }
    }
    Ok(events)
}

fn decode_value(value: &Value) -> Result<Option<FeedEvent>, FeedError> {
    let Some(frame_type) = value.get("T").and_then(Value::as_str) else {
        debug!("frame without T field ignored");
        return Ok(None);
    };

    let event = match frame_type {
        "success" => match value.get("msg").and_then(Value::as_str) {
            Some("authenticated") => Some(FeedEvent::Authenticated),
            Some("connected") => Some(FeedEvent::Connected),
            other => {
                debug!(?other, "unhandled success frame");
                None
            }
        },
        "subscription" => {
            let ack: SubscriptionAck = serde_json::from_value(value.clone())
                .map_err(|err| FeedError::Decode(err.to_string()))?;
            Some(FeedEvent::SubscriptionAck(ack))
        }
        "error" => {
            let frame: ErrorFrame = serde_json::from_value(value.clone())
                .map_err(|err| FeedError::Decode(err.to_string()))?;
            Some(FeedEvent::UpstreamError {
                code: frame.code,
                message: frame.text(),
            })
        }
        "t" => {
            let frame: TradeFrame = serde_json::from_value(value.clone())
                .map_err(|err| FeedError::Decode(err.to_string()))?;
            if frame.symbol.is_empty() {
                debug!("trade tick without symbol dropped");
                None
            } else {
                Some(FeedEvent::Tick(MarketTick::trade(
                    frame.symbol,
                    frame.price,
                    frame.size,
                )))
            }
        }
        "q" => {
            let frame: QuoteFrame = serde_json::from_value(value.clone())
                .map_err(|err| FeedError::Decode(err.to_string()))?;
            if frame.symbol.is_empty() {
                debug!("quote tick without symbol dropped");
                None
            } else {
                Some(FeedEvent::Tick(MarketTick::quote(
                    frame.symbol,
                    frame.bid_price,
                    frame.ask_price,
                    frame.bid_size,
                    frame.ask_size,
                )))
            }
        }
        "b" | "d" | "u" => {
            let frame: BarFrame = serde_json::from_value(value.clone())
                .map_err(|err| FeedError::Decode(err.to_string()))?;
            if frame.symbol.is_empty() {
                debug!("bar tick without symbol dropped");
                None
            } else {
                Some(FeedEvent::Tick(MarketTick::bar(
                    frame.symbol,
                    frame.open,
                    frame.high,
                    frame.low,
                    frame.close,
                    frame.volume,
                )))
            }
        }
        other => {
            warn!(frame_type = other, "unknown frame type ignored");
            None
        }
    };
    Ok(event)
}

/// Encode a tick back into the upstream wire shape. Decoding the result
/// yields an equal tick (timestamps excepted).
pub fn encode_tick(tick: &MarketTick) -> Value {
    match tick.kind {
        TickKind::Trade { price, size } => serde_json::json!({
            "T": "t",
            "S": tick.symbol,
            "p": price,
            "s": size,
        }),
        TickKind::Quote {
            bid_price,
            ask_price,
            bid_size,
            ask_size,
        } => serde_json::json!({
            "T": "q",
            "S": tick.symbol,
            "bp": bid_price,
            "ap": ask_price,
            "bs": bid_size,
            "as": ask_size,
        }),
        TickKind::Bar {
            open,
            high,
            low,
            close,
            volume,
        } => serde_json::json!({
            "T": "b",
            "S": tick.symbol,
            "o": open,
            "h": high,
            "l": low,
            "c": close,
            "v": volume,
        }),
    }
}
