//! Stream ticks from the configured upstream to the log.
//!
//! Configuration comes from `FEED_`-prefixed environment variables (see
//! `FeedConfig`); `FEED_SYMBOLS` is a comma-separated subscription list.

use anyhow::Context;
use tracing::{error, info};

use feed_manager::MarketDataFeed;
use venue_core::config::FeedConfig;
use venue_core::logging::{init_logging, LogConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging(LogConfig::from_env()).ok();

    let config = FeedConfig::from_env().context("loading feed configuration")?;
    let symbols: Vec<String> = std::env::var("FEED_SYMBOLS")
        .unwrap_or_else(|_| "AAPL,MSFT".to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let feed = MarketDataFeed::new(config).context("building market data feed")?;

    feed.on_connection(|connected| {
        if connected {
            info!("upstream connected");
        } else {
            info!("upstream disconnected");
        }
    });
    feed.on_error(|message| {
        error!(%message, "feed error");
    });
    feed.on_tick(|tick| {
        info!(symbol = %tick.symbol, kind = %tick.data_type(), ?tick.kind, "tick");
    });

    feed.start();
    for symbol in &symbols {
        feed.subscribe(symbol, true, true, false);
    }
    info!(?symbols, "streaming; press ctrl-c to stop");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    feed.stop();
    Ok(())
}
