//! The order record.
//!
//! Orders are created by callers with a client identifier and submitted to
//! the book, which mints the engine-side `id` and stamps the admission
//! time. Resting orders are owned by the book's price-level queues; copies
//! handed back to callers are snapshots.

use std::time::Instant;

use crate::error::OrderRejection;

use super::types::{OrderStatus, OrderType, Side};

/// Engine-minted order identifier, unique and monotonically increasing per
/// book instance.
pub type OrderId = u64;

/// A single order, resting or in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    /// Engine identifier, 0 until admission
    pub id: OrderId,
    /// Opaque identifier supplied by the submitter
    pub client_id: u64,
    /// Instrument symbol; all orders in one book share one symbol
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    /// Limit price; meaningless for market orders
    pub price: f64,
    /// Original quantity
    pub quantity: u64,
    /// Unexecuted quantity, decreases monotonically to zero
    pub remaining_quantity: u64,
    pub status: OrderStatus,
    /// Monotonic admission stamp, set by the book; time tiebreaker
    pub timestamp: Instant,
}

impl Order {
    /// Create a limit order ready for submission.
    pub fn limit(
        client_id: u64,
        symbol: impl Into<String>,
        side: Side,
        price: f64,
        quantity: u64,
    ) -> Self {
        Self {
            id: 0,
            client_id,
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            price,
            quantity,
            remaining_quantity: quantity,
            status: OrderStatus::Active,
            timestamp: Instant::now(),
        }
    }

    /// Create a market order ready for submission.
    ///
    /// Market orders carry no meaningful price; the stored price is zero.
    pub fn market(client_id: u64, symbol: impl Into<String>, side: Side, quantity: u64) -> Self {
        Self {
            id: 0,
            client_id,
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            price: 0.0,
            quantity,
            remaining_quantity: quantity,
            status: OrderStatus::Active,
            timestamp: Instant::now(),
        }
    }

    /// Validate the order for admission.
    ///
    /// Rejects non-positive quantity, an empty symbol and, for limit
    /// orders, a non-positive price. The engine additionally asserts these
    /// conditions; validation is the caller-facing path.
    pub fn validate(&self) -> Result<(), OrderRejection> {
        if self.quantity == 0 {
            return Err(OrderRejection::ZeroQuantity);
        }
        if self.symbol.is_empty() {
            return Err(OrderRejection::EmptySymbol);
        }
        if self.order_type == OrderType::Limit && self.price <= 0.0 {
            return Err(OrderRejection::NonPositivePrice(self.price));
        }
        Ok(())
    }

    pub fn is_buy(&self) -> bool {
        self.side.is_buy()
    }

    pub fn is_sell(&self) -> bool {
        self.side.is_sell()
    }

    pub fn is_limit(&self) -> bool {
        self.order_type == OrderType::Limit
    }

    pub fn is_market(&self) -> bool {
        self.order_type == OrderType::Market
    }

    /// Quantity executed so far.
    pub fn filled_quantity(&self) -> u64 {
        self.quantity - self.remaining_quantity
    }

    /// Executed share of the original quantity, in percent.
    pub fn fill_percentage(&self) -> f64 {
        if self.quantity == 0 {
            return 0.0;
        }
        self.filled_quantity() as f64 / self.quantity as f64 * 100.0
    }

    /// Apply a fill of `quantity` and derive the resulting status.
    ///
    /// Status is a pure function of remaining quantity: zero remaining is
    /// Filled, anything less than the original is PartiallyFilled.
    pub(crate) fn fill(&mut self, quantity: u64) {
        debug_assert!(
            quantity > 0 && quantity <= self.remaining_quantity,
            "fill {} exceeds remaining {}",
            quantity,
            self.remaining_quantity
        );
        self.remaining_quantity -= quantity;
        self.status = if self.remaining_quantity == 0 {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
    }

    /// Mark the order cancelled. Terminal states never reopen.
    pub(crate) fn cancel(&mut self) {
        debug_assert!(!self.status.is_terminal(), "cancel of terminal order");
        self.status = OrderStatus::Cancelled;
    }
}
