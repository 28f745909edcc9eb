//! Append-only JSONL event sink.
//!
//! Callers hand records to a channel; a background task owns the files and
//! performs all I/O, so logging never blocks the engine or the feed
//! reactor. One file per category per day, rotated on date change.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::data::{MarketTick, TickKind};
use crate::error::SinkError;
use crate::orders::Order;
use crate::trades::Trade;

/// Log file categories, one file per category per day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Category {
    Orders,
    Trades,
    MarketData,
    System,
}

impl Category {
    fn file_stem(&self) -> &'static str {
        match self {
            Category::Orders => "orders",
            Category::Trades => "trades",
            Category::MarketData => "market_data",
            Category::System => "system",
        }
    }
}

struct SinkRecord {
    category: Category,
    payload: Value,
}

/// Handle to the background writer. Dropping it (or calling `close`)
/// flushes outstanding records and closes the files.
pub struct EventSink {
    tx: mpsc::UnboundedSender<SinkRecord>,
    worker: Option<JoinHandle<()>>,
}

impl EventSink {
    /// Spawn the writer task. Must be called from within a Tokio runtime.
    pub fn start(directory: impl Into<PathBuf>) -> Self {
        let directory = directory.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_writer(directory, rx));
        Self {
            tx,
            worker: Some(worker),
        }
    }

    pub fn log_order(&self, order: &Order) -> Result<(), SinkError> {
        self.send(
            Category::Orders,
            json!({
                "event": "order",
                "logged_at": Utc::now().to_rfc3339(),
                "id": order.id,
                "client_id": order.client_id,
                "symbol": order.symbol,
                "side": order.side.to_string(),
                "order_type": order.order_type.to_string(),
                "price": order.price,
                "quantity": order.quantity,
                "remaining_quantity": order.remaining_quantity,
                "status": order.status.to_string(),
            }),
        )
    }

    pub fn log_rejection(&self, order: &Order, reason: &str) -> Result<(), SinkError> {
        self.send(
            Category::Orders,
            json!({
                "event": "rejection",
                "logged_at": Utc::now().to_rfc3339(),
                "client_id": order.client_id,
                "symbol": order.symbol,
                "side": order.side.to_string(),
                "order_type": order.order_type.to_string(),
                "price": order.price,
                "quantity": order.quantity,
                "reason": reason,
            }),
        )
    }

    pub fn log_trade(&self, trade: &Trade) -> Result<(), SinkError> {
        self.send(
            Category::Trades,
            json!({
                "event": "trade",
                "logged_at": Utc::now().to_rfc3339(),
                "trade_id": trade.trade_id,
                "buy_order_id": trade.buy_order_id,
                "sell_order_id": trade.sell_order_id,
                "symbol": trade.symbol,
                "price": trade.price,
                "quantity": trade.quantity,
                "total_value": trade.total_value(),
            }),
        )
    }

    pub fn log_tick(&self, tick: &MarketTick) -> Result<(), SinkError> {
        let payload = match tick.kind {
            TickKind::Trade { price, size } => json!({
                "event": "tick",
                "logged_at": Utc::now().to_rfc3339(),
                "channel": "trade",
                "symbol": tick.symbol,
                "price": price,
                "size": size,
            }),
            TickKind::Quote {
                bid_price,
                ask_price,
                bid_size,
                ask_size,
            } => json!({
                "event": "tick",
                "logged_at": Utc::now().to_rfc3339(),
                "channel": "quote",
                "symbol": tick.symbol,
                "bid_price": bid_price,
                "ask_price": ask_price,
                "bid_size": bid_size,
                "ask_size": ask_size,
            }),
            TickKind::Bar {
                open,
                high,
                low,
                close,
                volume,
            } => json!({
                "event": "tick",
                "logged_at": Utc::now().to_rfc3339(),
                "channel": "bar",
                "symbol": tick.symbol,
                "open": open,
                "high": high,
                "low": low,
                "close": close,
                "volume": volume,
            }),
        };
        self.send(Category::MarketData, payload)
    }

    pub fn log_system(&self, event_type: &str, details: Value) -> Result<(), SinkError> {
        self.send(
            Category::System,
            json!({
                "event": event_type,
                "logged_at": Utc::now().to_rfc3339(),
                "details": details,
            }),
        )
    }

    /// Flush outstanding records and stop the writer.
    pub async fn close(mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        // Closing the channel lets the worker drain and exit
        let tx = std::mem::replace(&mut self.tx, mpsc::unbounded_channel().0);
        drop(tx);
        let _ = worker.await;
    }

    fn send(&self, category: Category, payload: Value) -> Result<(), SinkError> {
        self.tx
            .send(SinkRecord { category, payload })
            .map_err(|_| SinkError::Closed)
    }
}

struct OpenLog {
    date: String,
    file: File,
}

async fn run_writer(directory: PathBuf, mut rx: mpsc::UnboundedReceiver<SinkRecord>) {
    if let Err(err) = fs::create_dir_all(&directory).await {
        error!(?directory, %err, "failed to create sink directory");
        return;
    }
    info!(?directory, "event sink started");

    let mut files: HashMap<Category, OpenLog> = HashMap::new();
    while let Some(record) = rx.recv().await {
        if let Err(err) = write_record(&directory, &mut files, &record).await {
            error!(%err, "failed to write sink record");
        }
    }

    for (_, mut log) in files {
        let _ = log.file.flush().await;
    }
    info!("event sink stopped");
}

async fn write_record(
    directory: &PathBuf,
    files: &mut HashMap<Category, OpenLog>,
    record: &SinkRecord,
) -> Result<(), SinkError> {
    let today = Utc::now().format("%Y-%m-%d").to_string();

    let needs_rotate = files
        .get(&record.category)
        .map(|log| log.date != today)
        .unwrap_or(true);
    if needs_rotate {
        let path = directory.join(format!("{}_{}.jsonl", record.category.file_stem(), today));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        files.insert(
            record.category,
            OpenLog {
                date: today,
                file,
            },
        );
    }

    let log = files.get_mut(&record.category).expect("file just opened");
    let mut line = serde_json::to_string(&record.payload)?;
    line.push('\n');
    log.file.write_all(line.as_bytes()).await?;
    log.file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::Side;
    use std::sync::atomic::{AtomicU32, Ordering};

    static TEST_DIR_SEQ: AtomicU32 = AtomicU32::new(0);

    fn test_dir(name: &str) -> PathBuf {
        let seq = TEST_DIR_SEQ.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!(
            "venue-sink-{}-{}-{}",
            name,
            std::process::id(),
            seq
        ))
    }

    #[tokio::test]
    async fn test_trade_records_are_appended() {
        let dir = test_dir("trades");
        let sink = EventSink::start(&dir);

        let trade = Trade::new(1, 10, 20, "AAPL", 100.5, 25);
        sink.log_trade(&trade).unwrap();
        sink.log_trade(&trade).unwrap();
        sink.close().await;

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let contents = std::fs::read_to_string(dir.join(format!("trades_{}.jsonl", today))).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["symbol"], "AAPL");
        assert_eq!(parsed["quantity"], 25);
        assert!((parsed["total_value"].as_f64().unwrap() - 2512.5).abs() < 1e-9);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_categories_use_separate_files() {
        let dir = test_dir("categories");
        let sink = EventSink::start(&dir);

        let order = Order::limit(1, "AAPL", Side::Buy, 100.0, 10);
        sink.log_order(&order).unwrap();
        sink.log_tick(&MarketTick::trade("AAPL", 150.0, 5)).unwrap();
        sink.log_system("startup", json!({"component": "test"}))
            .unwrap();
        sink.close().await;

        let today = Utc::now().format("%Y-%m-%d").to_string();
        assert!(dir.join(format!("orders_{}.jsonl", today)).exists());
        assert!(dir.join(format!("market_data_{}.jsonl", today)).exists());
        assert!(dir.join(format!("system_{}.jsonl", today)).exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
