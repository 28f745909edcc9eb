//! Subscription bookkeeping: the pending queue and the active set.
//!
//! Requests made before the session is Ready queue here and flush as a
//! single frame on Ready entry. A subscription ack from upstream is
//! authoritative: it replaces the active set and clears the queue.

use std::collections::HashSet;

use tracing::debug;
use venue_core::data::MarketSubscription;

use crate::messages::SubscriptionAck;

/// Pending and active subscription state, guarded by the session's
/// subscription mutex (distinct from the callback mutex).
#[derive(Debug, Default)]
pub struct SubscriptionState {
    pending: Vec<MarketSubscription>,
    active: HashSet<String>,
}

impl SubscriptionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a subscription request. Duplicates against the active set or
    /// the pending queue are dropped; returns whether the request was
    /// queued.
    pub fn request(&mut self, subscription: MarketSubscription) -> bool {
        if self.active.contains(&subscription.symbol) {
            debug!(symbol = %subscription.symbol, "already subscribed");
            return false;
        }
        if self.pending.iter().any(|p| p.symbol == subscription.symbol) {
            debug!(symbol = %subscription.symbol, "subscription already pending");
            return false;
        }
        self.pending.push(subscription);
        true
    }

    /// Remove a symbol from both the pending queue and the active set.
    /// Returns whether it was present in either.
    pub fn remove(&mut self, symbol: &str) -> bool {
        let was_active = self.active.remove(symbol);
        let before = self.pending.len();
        self.pending.retain(|p| p.symbol != symbol);
        was_active || self.pending.len() != before
    }

    /// Apply an upstream ack: the active set becomes the union of the
    /// ack's channels and the pending queue is cleared.
    pub fn apply_ack(&mut self, ack: &SubscriptionAck) {
        self.active = ack.symbols().into_iter().collect();
        self.pending.clear();
    }

    pub fn pending(&self) -> &[MarketSubscription] {
        &self.pending
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Sorted view of the active set.
    pub fn active_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.active.iter().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Drop all state, e.g. on permanent shutdown.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.active.clear();
    }
}
