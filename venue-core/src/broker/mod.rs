//! Paper trading broker: positions, portfolio and simulated execution.
//!
//! The broker consumes market ticks to keep a per-symbol quote cache and
//! mark positions to market, and fills client orders against that cache.
//! It never feeds the matching engine; the two sides are decoupled.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::data::{MarketTick, TickKind};
use crate::error::OrderRejection;
use crate::orders::{Order, OrderId, OrderStatus, OrderType, Side};

/// Default starting cash balance.
const DEFAULT_INITIAL_BALANCE: f64 = 100_000.0;

/// A position in one symbol.
#[derive(Debug, Clone, Default)]
pub struct Position {
    pub symbol: String,
    /// Signed share count; positive is long
    pub quantity: i64,
    pub average_price: f64,
    pub cost_basis: f64,
    pub market_value: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
}

impl Position {
    fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Default::default()
        }
    }

    /// Re-mark the position at the given price.
    pub fn update_market_value(&mut self, current_price: f64) {
        self.market_value = self.quantity as f64 * current_price;
        self.unrealized_pnl = self.market_value - self.cost_basis;
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == 0
    }
}

/// Account-level portfolio state.
#[derive(Debug, Clone)]
pub struct Portfolio {
    pub cash_balance: f64,
    pub buying_power: f64,
    pub total_equity: f64,
    pub total_realized_pnl: f64,
    pub total_unrealized_pnl: f64,
    pub positions: HashMap<String, Position>,
}

impl Portfolio {
    fn new(initial_balance: f64) -> Self {
        Self {
            cash_balance: initial_balance,
            buying_power: initial_balance,
            total_equity: initial_balance,
            total_realized_pnl: 0.0,
            total_unrealized_pnl: 0.0,
            positions: HashMap::new(),
        }
    }
}

/// One execution against a client order.
#[derive(Debug, Clone)]
pub struct OrderFill {
    pub order_id: OrderId,
    pub symbol: String,
    pub fill_price: f64,
    pub fill_quantity: u64,
    pub fill_time: Instant,
    pub commission: f64,
}

/// Cached market state per symbol, fed by ticks.
#[derive(Debug, Clone, Copy, Default)]
struct MarketQuote {
    bid: f64,
    ask: f64,
    last: f64,
}

impl MarketQuote {
    fn has_price(&self) -> bool {
        self.last > 0.0 || self.bid > 0.0 || self.ask > 0.0
    }

    /// Best available reference for a marketable fill on `side`.
    fn fill_price(&self, side: Side) -> f64 {
        let quoted = match side {
            Side::Buy => self.ask,
            Side::Sell => self.bid,
        };
        if quoted > 0.0 {
            quoted
        } else {
            self.last
        }
    }
}

pub type OrderUpdateCallback = Arc<dyn Fn(&Order) + Send + Sync>;
pub type FillCallback = Arc<dyn Fn(&OrderFill) + Send + Sync>;
pub type PortfolioUpdateCallback = Arc<dyn Fn(&Portfolio) + Send + Sync>;

#[derive(Default)]
struct BrokerCallbacks {
    order_update: Option<OrderUpdateCallback>,
    fill: Option<FillCallback>,
    portfolio_update: Option<PortfolioUpdateCallback>,
}

struct BrokerState {
    next_order_id: u64,
    portfolio: Portfolio,
    active_orders: HashMap<OrderId, Order>,
    order_history: Vec<Order>,
    market: HashMap<String, MarketQuote>,
    commission_rate: f64,
    max_order_value: f64,
    max_position_sizes: HashMap<String, i64>,
}

/// Events collected under the state lock and delivered after it is
/// released, so callbacks may call back into the broker.
enum BrokerEvent {
    OrderUpdate(Order),
    Fill(OrderFill),
    PortfolioUpdate(Portfolio),
}

/// Simulated broker tracking a cash account and positions.
pub struct PaperBroker {
    state: Mutex<BrokerState>,
    callbacks: Mutex<BrokerCallbacks>,
}

impl PaperBroker {
    pub fn new() -> Self {
        Self::with_balance(DEFAULT_INITIAL_BALANCE)
    }

    pub fn with_balance(initial_balance: f64) -> Self {
        Self {
            state: Mutex::new(BrokerState {
                next_order_id: 1,
                portfolio: Portfolio::new(initial_balance),
                active_orders: HashMap::new(),
                order_history: Vec::new(),
                market: HashMap::new(),
                commission_rate: 0.0,
                max_order_value: 1_000_000.0,
                max_position_sizes: HashMap::new(),
            }),
            callbacks: Mutex::new(BrokerCallbacks::default()),
        }
    }

    pub fn on_order_update(&self, callback: impl Fn(&Order) + Send + Sync + 'static) {
        self.callbacks.lock().order_update = Some(Arc::new(callback));
    }

    pub fn on_fill(&self, callback: impl Fn(&OrderFill) + Send + Sync + 'static) {
        self.callbacks.lock().fill = Some(Arc::new(callback));
    }

    pub fn on_portfolio_update(&self, callback: impl Fn(&Portfolio) + Send + Sync + 'static) {
        self.callbacks.lock().portfolio_update = Some(Arc::new(callback));
    }

    /// Commission charged per fill as a fraction of gross value.
    pub fn set_commission_rate(&self, rate: f64) {
        self.state.lock().commission_rate = rate.max(0.0);
    }

    /// Reject any single order whose gross value exceeds this limit.
    pub fn set_max_order_value(&self, limit: f64) {
        self.state.lock().max_order_value = limit;
    }

    /// Cap the absolute position size for one symbol.
    pub fn set_max_position_size(&self, symbol: impl Into<String>, max_shares: i64) {
        self.state
            .lock()
            .max_position_sizes
            .insert(symbol.into(), max_shares);
    }

    /// Submit an order. Market orders fill immediately against the cached
    /// quote; limit orders fill when marketable, otherwise they rest until
    /// a tick reaches their price. Returns the broker-assigned order id.
    pub fn submit_order(&self, order: Order) -> Result<OrderId, OrderRejection> {
        order.validate()?;

        let mut events = Vec::new();
        let order_id;
        {
            let mut state = self.state.lock();
            Self::check_risk_limits(&state, &order)?;

            let mut order = order;
            order.id = state.next_order_id;
            state.next_order_id += 1;
            order.timestamp = Instant::now();
            order_id = order.id;

            let quote = state.market.get(&order.symbol).copied().unwrap_or_default();
            match order.order_type {
                OrderType::Market => {
                    if !quote.has_price() {
                        return Err(OrderRejection::NoMarketData(order.symbol.clone()));
                    }
                    let price = quote.fill_price(order.side);
                    Self::execute(&mut state, &mut order, price, &mut events);
                    state.order_history.push(order.clone());
                    events.push(BrokerEvent::OrderUpdate(order));
                }
                OrderType::Limit => {
                    if quote.has_price() && Self::is_marketable(&order, &quote) {
                        let price = order.price;
                        Self::execute(&mut state, &mut order, price, &mut events);
                        state.order_history.push(order.clone());
                        events.push(BrokerEvent::OrderUpdate(order));
                    } else {
                        debug!(order_id, symbol = %order.symbol, "limit order resting");
                        events.push(BrokerEvent::OrderUpdate(order.clone()));
                        state.active_orders.insert(order.id, order);
                    }
                }
            }
        }
        self.deliver(events);
        Ok(order_id)
    }

    /// Cancel a resting order. Returns whether a removal occurred.
    pub fn cancel_order(&self, order_id: OrderId) -> bool {
        let mut events = Vec::new();
        let cancelled = {
            let mut state = self.state.lock();
            match state.active_orders.remove(&order_id) {
                Some(mut order) => {
                    order.status = OrderStatus::Cancelled;
                    state.order_history.push(order.clone());
                    events.push(BrokerEvent::OrderUpdate(order));
                    true
                }
                None => false,
            }
        };
        self.deliver(events);
        cancelled
    }

    /// Feed one market tick: refresh the quote cache, mark positions to
    /// market and trigger any resting limit orders the price has reached.
    pub fn process_tick(&self, tick: &MarketTick) {
        let mut events = Vec::new();
        {
            let mut state = self.state.lock();
            let quote = state.market.entry(tick.symbol.clone()).or_default();
            match tick.kind {
                TickKind::Trade { price, .. } => quote.last = price,
                TickKind::Quote {
                    bid_price,
                    ask_price,
                    ..
                } => {
                    quote.bid = bid_price;
                    quote.ask = ask_price;
                }
                TickKind::Bar { close, .. } => quote.last = close,
            }
            let quote = *quote;

            if let Some(position) = state.portfolio.positions.get_mut(&tick.symbol) {
                let mark = if quote.last > 0.0 {
                    quote.last
                } else {
                    quote.fill_price(Side::Sell)
                };
                if mark > 0.0 {
                    position.update_market_value(mark);
                    Self::refresh_portfolio_totals(&mut state.portfolio);
                }
            }

            // Trigger resting limit orders whose price is now reachable
            let triggered: Vec<OrderId> = state
                .active_orders
                .values()
                .filter(|o| o.symbol == tick.symbol && Self::is_marketable(o, &quote))
                .map(|o| o.id)
                .collect();
            for order_id in triggered {
                let mut order = state
                    .active_orders
                    .remove(&order_id)
                    .expect("triggered order exists");
                let price = order.price;
                Self::execute(&mut state, &mut order, price, &mut events);
                state.order_history.push(order.clone());
                events.push(BrokerEvent::OrderUpdate(order));
            }
        }
        self.deliver(events);
    }

    pub fn portfolio(&self) -> Portfolio {
        self.state.lock().portfolio.clone()
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.state.lock().portfolio.positions.get(symbol).cloned()
    }

    pub fn open_orders(&self) -> Vec<Order> {
        self.state.lock().active_orders.values().cloned().collect()
    }

    pub fn order_history(&self) -> Vec<Order> {
        self.state.lock().order_history.clone()
    }

    fn check_risk_limits(state: &BrokerState, order: &Order) -> Result<(), OrderRejection> {
        let reference_price = if order.is_limit() {
            order.price
        } else {
            state
                .market
                .get(&order.symbol)
                .map(|q| q.fill_price(order.side))
                .unwrap_or(0.0)
        };
        let gross = reference_price * order.quantity as f64;
        if gross > state.max_order_value {
            warn!(symbol = %order.symbol, gross, "order exceeds max order value");
            return Err(OrderRejection::RiskLimit(format!(
                "order value {:.2} exceeds limit {:.2}",
                gross, state.max_order_value
            )));
        }

        if let Some(&max_shares) = state.max_position_sizes.get(&order.symbol) {
            let current = state
                .portfolio
                .positions
                .get(&order.symbol)
                .map(|p| p.quantity)
                .unwrap_or(0);
            let delta = match order.side {
                Side::Buy => order.quantity as i64,
                Side::Sell => -(order.quantity as i64),
            };
            if (current + delta).abs() > max_shares {
                return Err(OrderRejection::RiskLimit(format!(
                    "position in {} would exceed {} shares",
                    order.symbol, max_shares
                )));
            }
        }
        Ok(())
    }

    /// A limit order is marketable when the quote has reached its price.
    fn is_marketable(order: &Order, quote: &MarketQuote) -> bool {
        let reference = quote.fill_price(order.side);
        if reference <= 0.0 {
            return false;
        }
        match order.side {
            Side::Buy => reference <= order.price,
            Side::Sell => reference >= order.price,
        }
    }

    /// Fill the full remaining quantity at `price` and settle cash,
    /// position and PnL.
    fn execute(
        state: &mut BrokerState,
        order: &mut Order,
        price: f64,
        events: &mut Vec<BrokerEvent>,
    ) {
        let quantity = order.remaining_quantity;
        let gross = price * quantity as f64;
        let commission = gross * state.commission_rate;
        order.fill(quantity);

        let position = state
            .portfolio
            .positions
            .entry(order.symbol.clone())
            .or_insert_with(|| Position::new(order.symbol.clone()));

        match order.side {
            Side::Buy => {
                position.cost_basis += gross;
                position.quantity += quantity as i64;
                position.average_price = if position.quantity != 0 {
                    position.cost_basis / position.quantity as f64
                } else {
                    0.0
                };
                state.portfolio.cash_balance -= gross + commission;
            }
            Side::Sell => {
                let closed = quantity as i64;
                let realized = (price - position.average_price) * closed as f64;
                position.realized_pnl += realized;
                position.cost_basis -= position.average_price * closed as f64;
                position.quantity -= closed;
                if position.quantity == 0 {
                    position.cost_basis = 0.0;
                    position.average_price = 0.0;
                }
                state.portfolio.cash_balance += gross - commission;
            }
        }
        position.update_market_value(price);
        Self::refresh_portfolio_totals(&mut state.portfolio);

        info!(
            order_id = order.id,
            symbol = %order.symbol,
            side = %order.side,
            price,
            quantity,
            "order filled"
        );

        events.push(BrokerEvent::Fill(OrderFill {
            order_id: order.id,
            symbol: order.symbol.clone(),
            fill_price: price,
            fill_quantity: quantity,
            fill_time: Instant::now(),
            commission,
        }));
        events.push(BrokerEvent::PortfolioUpdate(state.portfolio.clone()));
    }

    fn refresh_portfolio_totals(portfolio: &mut Portfolio) {
        let market_value: f64 = portfolio.positions.values().map(|p| p.market_value).sum();
        portfolio.total_realized_pnl = portfolio.positions.values().map(|p| p.realized_pnl).sum();
        portfolio.total_unrealized_pnl =
            portfolio.positions.values().map(|p| p.unrealized_pnl).sum();
        portfolio.total_equity = portfolio.cash_balance + market_value;
        portfolio.buying_power = portfolio.cash_balance.max(0.0);
    }

    /// Invoke callbacks outside the state lock.
    fn deliver(&self, events: Vec<BrokerEvent>) {
        if events.is_empty() {
            return;
        }
        let callbacks = self.callbacks.lock();
        let order_update = callbacks.order_update.clone();
        let fill = callbacks.fill.clone();
        let portfolio_update = callbacks.portfolio_update.clone();
        drop(callbacks);

        for event in events {
            match event {
                BrokerEvent::OrderUpdate(order) => {
                    if let Some(cb) = &order_update {
                        cb(&order);
                    }
                }
                BrokerEvent::Fill(f) => {
                    if let Some(cb) = &fill {
                        cb(&f);
                    }
                }
                BrokerEvent::PortfolioUpdate(p) => {
                    if let Some(cb) = &portfolio_update {
                        cb(&p);
                    }
                }
            }
        }
    }
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}
