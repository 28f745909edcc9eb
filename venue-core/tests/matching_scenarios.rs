//! End-to-end matching scenarios and book invariants.

use std::sync::Arc;
use std::thread;

use venue_core::book::OrderBook;
use venue_core::orders::{Order, OrderStatus, Side};

fn buy(price: f64, quantity: u64) -> Order {
    Order::limit(1, "AAPL", Side::Buy, price, quantity)
}

fn sell(price: f64, quantity: u64) -> Order {
    Order::limit(2, "AAPL", Side::Sell, price, quantity)
}

#[test]
fn simple_cross() {
    let book = OrderBook::new("AAPL");

    let first = book.submit(buy(100.0, 50)).unwrap();
    assert!(first.trades.is_empty());
    let second = book.submit(sell(101.0, 50)).unwrap();
    assert!(second.trades.is_empty());

    assert_eq!(book.best_bid(), Some(100.0));
    assert_eq!(book.best_ask(), Some(101.0));
    assert!((book.spread() - 1.0).abs() < 1e-9);

    let crossing = book.submit(sell(100.0, 50)).unwrap();
    assert_eq!(crossing.trades.len(), 1);
    let trade = &crossing.trades[0];
    assert_eq!(trade.price, 100.0);
    assert_eq!(trade.quantity, 50);
    assert_eq!(trade.buy_order_id, first.order.id);
    assert_eq!(trade.sell_order_id, crossing.order.id);

    // The resting ask at 101 is untouched; the bid side is swept
    assert_eq!(book.best_bid(), None);
    assert_eq!(book.best_ask(), Some(101.0));
    assert_eq!(crossing.order.status, OrderStatus::Filled);
}

#[test]
fn price_time_priority_within_level() {
    let book = OrderBook::new("AAPL");

    let a = book.submit(buy(100.0, 30)).unwrap();
    let b = book.submit(buy(100.0, 40)).unwrap();

    let crossing = book.submit(sell(100.0, 30)).unwrap();
    assert_eq!(crossing.trades.len(), 1);
    let trade = &crossing.trades[0];
    assert_eq!(trade.buy_order_id, a.order.id);
    assert_eq!(trade.sell_order_id, crossing.order.id);
    assert_eq!(trade.price, 100.0);
    assert_eq!(trade.quantity, 30);

    // A is gone, B still rests with its full 40
    let snapshot = book.snapshot(1);
    assert_eq!(snapshot.bids.len(), 1);
    assert_eq!(snapshot.bids[0].quantity, 40);
    assert_eq!(snapshot.bids[0].orders, 1);
    let _ = b;
}

#[test]
fn price_priority_dominates_time() {
    let book = OrderBook::new("AAPL");

    let _a = book.submit(buy(99.0, 50)).unwrap();
    let b = book.submit(buy(101.0, 50)).unwrap();

    let crossing = book.submit(sell(99.0, 50)).unwrap();
    assert_eq!(crossing.trades.len(), 1);
    let trade = &crossing.trades[0];
    // The younger but better-priced bid wins, at its resting price
    assert_eq!(trade.buy_order_id, b.order.id);
    assert_eq!(trade.price, 101.0);
    assert_eq!(trade.quantity, 50);

    assert_eq!(book.best_bid(), Some(99.0));
}

#[test]
fn partial_fill_keeps_remainder_resting() {
    let book = OrderBook::new("AAPL");

    let a = book.submit(buy(100.0, 100)).unwrap();
    let crossing = book.submit(sell(100.0, 40)).unwrap();

    assert_eq!(crossing.trades.len(), 1);
    assert_eq!(crossing.trades[0].quantity, 40);
    assert_eq!(crossing.order.status, OrderStatus::Filled);

    let snapshot = book.snapshot(1);
    assert_eq!(snapshot.bids[0].quantity, 60);

    // The resting side reports the partial fill through the trade set
    assert_eq!(crossing.trades[0].buy_order_id, a.order.id);
}

#[test]
fn market_order_sweeps_and_never_rests() {
    let book = OrderBook::new("AAPL");

    book.submit(sell(105.0, 50)).unwrap();
    let sweep = book
        .submit(Order::market(3, "AAPL", Side::Buy, 50))
        .unwrap();
    assert_eq!(sweep.trades.len(), 1);
    assert_eq!(sweep.trades[0].price, 105.0);
    assert_eq!(sweep.trades[0].quantity, 50);
    assert!(book.is_empty());

    // Market order against an empty opposite side: no trades, no residue
    let sweep = book
        .submit(Order::market(3, "AAPL", Side::Buy, 20))
        .unwrap();
    assert!(sweep.trades.is_empty());
    assert_eq!(sweep.order.remaining_quantity, 20);
    assert!(book.is_empty());
    assert_eq!(book.total_orders(), 0);
}

#[test]
fn multi_level_match_preserves_fifo() {
    let book = OrderBook::new("AAPL");

    let first = book.submit(buy(100.0, 20)).unwrap();
    let second = book.submit(buy(100.0, 30)).unwrap();
    let third = book.submit(buy(100.0, 25)).unwrap();

    let crossing = book.submit(sell(100.0, 75)).unwrap();
    assert_eq!(crossing.trades.len(), 3);

    let quantities: Vec<u64> = crossing.trades.iter().map(|t| t.quantity).collect();
    assert_eq!(quantities, vec![20, 30, 25]);

    let buyers: Vec<u64> = crossing.trades.iter().map(|t| t.buy_order_id).collect();
    assert_eq!(
        buyers,
        vec![first.order.id, second.order.id, third.order.id]
    );

    assert!(crossing.trades.iter().all(|t| t.price == 100.0));

    // Trade ids are strictly increasing in emission order
    assert!(crossing
        .trades
        .windows(2)
        .all(|pair| pair[0].trade_id < pair[1].trade_id));

    assert!(book.is_empty());
}

#[test]
fn cancellation_race_has_exactly_one_outcome() {
    for _ in 0..50 {
        let book = Arc::new(OrderBook::new("AAPL"));
        let resting = book.submit(buy(100.0, 50)).unwrap();
        let order_id = resting.order.id;

        let canceller = {
            let book = book.clone();
            thread::spawn(move || book.cancel(order_id))
        };
        let crosser = {
            let book = book.clone();
            thread::spawn(move || book.submit(sell(100.0, 50)).unwrap())
        };

        let cancelled = canceller.join().unwrap();
        let crossing = crosser.join().unwrap();

        if cancelled {
            // The cancel won: the sell found nothing and rests
            assert!(crossing.trades.is_empty());
            assert_eq!(book.best_ask(), Some(100.0));
            assert_eq!(book.best_bid(), None);
        } else {
            // The match won: one trade for the full size
            assert_eq!(crossing.trades.len(), 1);
            assert_eq!(crossing.trades[0].price, 100.0);
            assert_eq!(crossing.trades[0].quantity, 50);
            assert!(book.is_empty());
        }
        assert_eq!(book.trade_log().len(), if cancelled { 0 } else { 1 });
    }
}

/// Deterministic mixed workload; checks the standing invariants after
/// every operation.
#[test]
fn mixed_workload_invariants() {
    // Small LCG so the workload is reproducible without a rand dependency
    let mut seed: u64 = 0x2545F4914F6CDD1D;
    let mut next = move || {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        seed >> 33
    };

    let book = OrderBook::new("AAPL");
    let mut submitted_ids = Vec::new();

    for step in 0..500 {
        let roll = next() % 100;
        if roll < 80 {
            let side = if next() % 2 == 0 { Side::Buy } else { Side::Sell };
            let price = 95.0 + (next() % 11) as f64;
            let quantity = 1 + next() % 50;
            let order = if roll < 70 {
                Order::limit(step, "AAPL", side, price, quantity)
            } else {
                Order::market(step, "AAPL", side, quantity)
            };
            let submission = book.submit(order).unwrap();

            // Filled-quantity accounting for this submission
            let traded: u64 = submission.trades.iter().map(|t| t.quantity).sum();
            assert_eq!(
                traded,
                submission.order.quantity - submission.order.remaining_quantity
            );
            if submission.order.is_limit() && submission.order.remaining_quantity > 0 {
                submitted_ids.push(submission.order.id);
            }
        } else if let Some(&id) = submitted_ids.get((next() as usize) % submitted_ids.len().max(1))
        {
            book.cancel(id);
        }

        // Uncrossed at rest after every operation
        if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
            assert!(bid < ask, "book crossed: bid {} >= ask {}", bid, ask);
        }
    }

    // Statistics stay consistent with the log
    let log = book.trade_log();
    let stats = book.statistics();
    assert_eq!(stats.total_trades as usize, log.len());
    assert_eq!(stats.total_volume, log.iter().map(|t| t.quantity).sum::<u64>());
    let total_value: f64 = log.iter().map(|t| t.total_value()).sum();
    assert!((stats.total_value - total_value).abs() < 1e-6);
    if stats.total_volume > 0 {
        assert!((stats.avg_price - total_value / stats.total_volume as f64).abs() < 1e-9);
    }

    // Trade ids strictly increase across all submissions
    assert!(log.windows(2).all(|pair| pair[0].trade_id < pair[1].trade_id));

    assert_eq!(book.book_counts().total_trades, log.len());
}
