//! The matching engine.
//!
//! Concurrency model: multi-reader / single-writer. Read operations take a
//! shared lock and observe a consistent instantaneous view; `submit`,
//! `cancel` and `clear` take the exclusive lock. Admission, matching,
//! trade emission and statistics update for one submission form a single
//! critical section, so observers never see a half-matched book.
//!
//! Trade listeners run inside that critical section and must not block or
//! call back into the book; hand heavy work off to a channel.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use ordered_float::OrderedFloat;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::debug;

use crate::error::OrderRejection;
use crate::orders::{Order, OrderId, OrderStatus, Side};
use crate::trades::{Trade, TradeLog, TradeStatistics};

use super::price_level::PriceLevel;

type Price = OrderedFloat<f64>;

/// Callback invoked for every emitted trade, in emission order.
pub type TradeListener = Arc<dyn Fn(&Trade) + Send + Sync>;

/// Outcome of a submission: the admitted order snapshot (engine id and
/// post-match status filled in) and the trades this submission generated,
/// in emission order.
#[derive(Debug, Clone)]
pub struct Submission {
    pub order: Order,
    pub trades: Vec<Trade>,
}

/// Aggregated view of one price level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelSummary {
    pub price: f64,
    pub quantity: u64,
    pub orders: usize,
}

/// Top-of-book snapshot down to a requested depth.
#[derive(Debug, Clone, Serialize)]
pub struct BookSnapshot {
    pub bids: Vec<LevelSummary>,
    pub asks: Vec<LevelSummary>,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub spread: f64,
}

/// Book occupancy statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookCounts {
    pub bid_levels: usize,
    pub ask_levels: usize,
    pub bid_orders: usize,
    pub ask_orders: usize,
    pub total_orders: usize,
    pub total_trades: usize,
}

struct BookState {
    /// Buy side; highest price is the best bid (iterated from the back)
    bids: BTreeMap<Price, PriceLevel>,
    /// Sell side; lowest price is the best ask (iterated from the front)
    asks: BTreeMap<Price, PriceLevel>,
    /// Locator index: order id -> side and price level of the resting order
    resting: HashMap<OrderId, (Side, Price)>,
    log: TradeLog,
    next_order_id: u64,
    next_trade_id: u64,
}

impl BookState {
    fn new() -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            resting: HashMap::new(),
            log: TradeLog::new(),
            next_order_id: 1,
            next_trade_id: 1,
        }
    }

    fn uncrossed(&self) -> bool {
        match (self.bids.keys().next_back(), self.asks.keys().next()) {
            (Some(bid), Some(ask)) => bid < ask,
            _ => true,
        }
    }
}

/// Price-time priority order book for a single symbol.
pub struct OrderBook {
    symbol: String,
    state: RwLock<BookState>,
    listeners: Mutex<Vec<TradeListener>>,
}

impl OrderBook {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            state: RwLock::new(BookState::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Register a trade listener. Every trade emitted after registration
    /// is delivered exactly once, in emission order.
    pub fn on_trade(&self, listener: impl Fn(&Trade) + Send + Sync + 'static) {
        self.listeners.lock().push(Arc::new(listener));
    }

    /// Admit an order, run the match loop and return the generated trades.
    ///
    /// Limit orders with remaining quantity rest at the back of their
    /// price level. Market orders never rest: any remainder after the
    /// match loop is discarded and the caller can infer the unfilled
    /// quantity from the returned trades.
    pub fn submit(&self, order: Order) -> Result<Submission, OrderRejection> {
        order.validate()?;
        let listeners: Vec<TradeListener> = self.listeners.lock().clone();

        let mut state = self.state.write();
        let mut incoming = order;
        incoming.id = state.next_order_id;
        state.next_order_id += 1;
        incoming.timestamp = Instant::now();
        incoming.status = OrderStatus::Active;
        incoming.remaining_quantity = incoming.quantity;

        let mut trades = Vec::new();
        match incoming.side {
            Side::Buy => Self::match_buy(&mut state, &mut incoming, &listeners, &mut trades),
            Side::Sell => Self::match_sell(&mut state, &mut incoming, &listeners, &mut trades),
        }

        if incoming.is_limit() && incoming.remaining_quantity > 0 {
            let price = OrderedFloat(incoming.price);
            state.resting.insert(incoming.id, (incoming.side, price));
            let level = match incoming.side {
                Side::Buy => state.bids.entry(price).or_default(),
                Side::Sell => state.asks.entry(price).or_default(),
            };
            level.push_back(incoming.clone());
        } else if incoming.is_market() && incoming.remaining_quantity > 0 {
            debug!(
                order_id = incoming.id,
                remaining = incoming.remaining_quantity,
                "market order remainder discarded"
            );
        }

        assert!(state.uncrossed(), "book crossed at rest after submit");
        Ok(Submission {
            order: incoming,
            trades,
        })
    }

    /// Cancel a resting order by id. Returns whether a removal occurred.
    /// Synchronous: on a true return the order is no longer matchable.
    pub fn cancel(&self, order_id: OrderId) -> bool {
        let mut state = self.state.write();
        let Some((side, price)) = state.resting.remove(&order_id) else {
            return false;
        };

        let book_side = match side {
            Side::Buy => &mut state.bids,
            Side::Sell => &mut state.asks,
        };
        let Some(level) = book_side.get_mut(&price) else {
            debug_assert!(false, "resting index points at missing level");
            return false;
        };
        let Some(mut order) = level.remove(order_id) else {
            debug_assert!(false, "resting index points at missing order");
            return false;
        };
        order.cancel();
        let now_empty = level.is_empty();
        if now_empty {
            book_side.remove(&price);
        }
        true
    }

    /// Highest resting bid price, if any.
    pub fn best_bid(&self) -> Option<f64> {
        self.state.read().bids.keys().next_back().map(|p| p.0)
    }

    /// Lowest resting ask price, if any.
    pub fn best_ask(&self) -> Option<f64> {
        self.state.read().asks.keys().next().map(|p| p.0)
    }

    /// Ask minus bid, or 0.0 when either side is empty.
    pub fn spread(&self) -> f64 {
        let state = self.state.read();
        match (state.bids.keys().next_back(), state.asks.keys().next()) {
            (Some(bid), Some(ask)) => ask.0 - bid.0,
            _ => 0.0,
        }
    }

    /// Aggregated view of the top `depth` levels on each side.
    pub fn snapshot(&self, depth: usize) -> BookSnapshot {
        let state = self.state.read();

        let bids = state
            .bids
            .iter()
            .rev()
            .take(depth)
            .map(|(price, level)| LevelSummary {
                price: price.0,
                quantity: level.total_remaining(),
                orders: level.order_count(),
            })
            .collect();
        let asks = state
            .asks
            .iter()
            .take(depth)
            .map(|(price, level)| LevelSummary {
                price: price.0,
                quantity: level.total_remaining(),
                orders: level.order_count(),
            })
            .collect();

        let best_bid = state.bids.keys().next_back().map(|p| p.0);
        let best_ask = state.asks.keys().next().map(|p| p.0);
        let spread = match (best_bid, best_ask) {
            (Some(bid), Some(ask)) => ask - bid,
            _ => 0.0,
        };

        BookSnapshot {
            bids,
            asks,
            best_bid,
            best_ask,
            spread,
        }
    }

    /// Owned copy of the trade log, in emission order.
    pub fn trade_log(&self) -> Vec<Trade> {
        self.state.read().log.trades().to_vec()
    }

    /// Running trade statistics.
    pub fn statistics(&self) -> TradeStatistics {
        self.state.read().log.statistics().clone()
    }

    /// Book occupancy counts.
    pub fn book_counts(&self) -> BookCounts {
        let state = self.state.read();
        let bid_orders: usize = state.bids.values().map(|l| l.order_count()).sum();
        let ask_orders: usize = state.asks.values().map(|l| l.order_count()).sum();
        BookCounts {
            bid_levels: state.bids.len(),
            ask_levels: state.asks.len(),
            bid_orders,
            ask_orders,
            total_orders: bid_orders + ask_orders,
            total_trades: state.log.len(),
        }
    }

    /// Total number of resting orders on both sides.
    pub fn total_orders(&self) -> usize {
        let state = self.state.read();
        state.bids.values().map(|l| l.order_count()).sum::<usize>()
            + state.asks.values().map(|l| l.order_count()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.read();
        state.bids.is_empty() && state.asks.is_empty()
    }

    /// Reset the book to empty: all resting orders, the trade log and the
    /// id counters.
    pub fn clear(&self) {
        let mut state = self.state.write();
        *state = BookState::new();
    }

    /// `true` when a buy at `buy_price` can execute against a sell at
    /// `sell_price`. Consulted for limit orders only; market orders are
    /// unconditionally crossable.
    fn prices_cross(buy_price: f64, sell_price: f64) -> bool {
        buy_price >= sell_price
    }

    fn match_buy(
        state: &mut BookState,
        incoming: &mut Order,
        listeners: &[TradeListener],
        out: &mut Vec<Trade>,
    ) {
        while incoming.remaining_quantity > 0 {
            let Some(&level_price) = state.asks.keys().next() else {
                break;
            };
            if !(incoming.is_market() || Self::prices_cross(incoming.price, level_price.0)) {
                break;
            }

            let trade_id = state.next_trade_id;
            state.next_trade_id += 1;

            let level = state.asks.get_mut(&level_price).expect("peeked level");
            let resting = level.front_mut().expect("levels are never empty");
            let quantity = incoming.remaining_quantity.min(resting.remaining_quantity);
            // Taker crosses the spread: execution at the resting price
            let trade = Trade::new(
                trade_id,
                incoming.id,
                resting.id,
                incoming.symbol.as_str(),
                level_price.0,
                quantity,
            );

            incoming.fill(quantity);
            resting.fill(quantity);

            if resting.remaining_quantity == 0 {
                let filled = level.pop_front().expect("front order");
                state.resting.remove(&filled.id);
                if level.is_empty() {
                    state.asks.remove(&level_price);
                }
            }

            state.log.append(trade.clone());
            for listener in listeners {
                listener(&trade);
            }
            out.push(trade);
        }
    }

    fn match_sell(
        state: &mut BookState,
        incoming: &mut Order,
        listeners: &[TradeListener],
        out: &mut Vec<Trade>,
    ) {
        while incoming.remaining_quantity > 0 {
            let Some(&level_price) = state.bids.keys().next_back() else {
                break;
            };
            if !(incoming.is_market() || Self::prices_cross(level_price.0, incoming.price)) {
                break;
            }

            let trade_id = state.next_trade_id;
            state.next_trade_id += 1;

            let level = state.bids.get_mut(&level_price).expect("peeked level");
            let resting = level.front_mut().expect("levels are never empty");
            let quantity = incoming.remaining_quantity.min(resting.remaining_quantity);
            let trade = Trade::new(
                trade_id,
                resting.id,
                incoming.id,
                incoming.symbol.as_str(),
                level_price.0,
                quantity,
            );

            incoming.fill(quantity);
            resting.fill(quantity);

            if resting.remaining_quantity == 0 {
                let filled = level.pop_front().expect("front order");
                state.resting.remove(&filled.id);
                if level.is_empty() {
                    state.bids.remove(&level_price);
                }
            }

            state.log.append(trade.clone());
            for listener in listeners {
                listener(&trade);
            }
            out.push(trade);
        }
    }
}
