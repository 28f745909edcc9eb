//! The market data session.
//!
//! One spawned task (the reactor) owns the transport and drives the state
//! machine: Disconnected → Connecting → Handshaking → Authenticating →
//! Ready, with Backoff between an involuntary disconnect and the next
//! attempt. External calls never touch the transport; they mutate
//! mutex-guarded registries or post commands onto the reactor's channel.
//!
//! Ticks are delivered on the reactor task. Callbacks must not block;
//! hand substantial work off to a channel or another executor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, sleep, timeout, Instant as TokioInstant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{client_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use venue_core::config::{Endpoint, FeedConfig};
use venue_core::data::{MarketSubscription, MarketTick};

use crate::decoder::{decode_frame, FeedEvent};
use crate::error::{FeedError, FeedResult};
use crate::messages::{AuthRequest, SubscriptionRequest};
use crate::subscriptions::SubscriptionState;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

pub type TickCallback = Arc<dyn Fn(MarketTick) + Send + Sync>;
pub type ConnectionCallback = Arc<dyn Fn(bool) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Handshaking,
    Authenticating,
    Ready,
    Backoff,
    Closing,
}

/// Commands posted from external threads onto the reactor.
enum FeedCommand {
    FlushSubscriptions,
    Unsubscribe(String),
}

/// Callback registry. Guarded separately from the subscription state so a
/// tick listener may call `subscribe`/`unsubscribe` without reentrant lock
/// acquisition.
#[derive(Default)]
struct Callbacks {
    tick: Mutex<Option<TickCallback>>,
    connection: Mutex<Option<ConnectionCallback>>,
    error: Mutex<Option<ErrorCallback>>,
}

struct FeedShared {
    config: FeedConfig,
    endpoint: Endpoint,
    running: AtomicBool,
    connected: AtomicBool,
    authenticated: AtomicBool,
    state: Mutex<SessionState>,
    subscriptions: Mutex<SubscriptionState>,
    callbacks: Callbacks,
    command_tx: Mutex<mpsc::UnboundedSender<FeedCommand>>,
    shutdown: broadcast::Sender<()>,
}

impl FeedShared {
    fn state(&self) -> SessionState {
        *self.state.lock()
    }

    fn set_state(&self, state: SessionState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!(from = ?*current, to = ?state, "session state change");
            *current = state;
        }
    }

    fn set_connected(&self, connected: bool) {
        let was = self.connected.swap(connected, Ordering::AcqRel);
        if was != connected {
            let callback = self.callbacks.connection.lock().clone();
            if let Some(callback) = callback {
                callback(connected);
            }
        }
    }

    fn report_error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(%message, "feed error");
        let callback = self.callbacks.error.lock().clone();
        if let Some(callback) = callback {
            callback(message);
        }
    }

    fn emit_tick(&self, tick: MarketTick) {
        let callback = self.callbacks.tick.lock().clone();
        if let Some(callback) = callback {
            callback(tick);
        }
    }
}

/// Handle to the upstream market data session.
///
/// All methods may be called from any thread. `start` must be called from
/// within a Tokio runtime; it spawns the reactor task.
pub struct MarketDataFeed {
    inner: Arc<FeedShared>,
}

impl MarketDataFeed {
    /// Validate the configuration and build the session (not yet started).
    pub fn new(config: FeedConfig) -> FeedResult<Self> {
        config.validate()?;
        let endpoint = Endpoint::parse(&config.data_url)?;
        let (shutdown, _) = broadcast::channel(4);
        // Placeholder channel; start() installs a live one
        let (command_tx, _) = mpsc::unbounded_channel();
        Ok(Self {
            inner: Arc::new(FeedShared {
                config,
                endpoint,
                running: AtomicBool::new(false),
                connected: AtomicBool::new(false),
                authenticated: AtomicBool::new(false),
                state: Mutex::new(SessionState::Disconnected),
                subscriptions: Mutex::new(SubscriptionState::new()),
                callbacks: Callbacks::default(),
                command_tx: Mutex::new(command_tx),
                shutdown,
            }),
        })
    }

    /// Start the reactor. Idempotent: a running session is left alone. A
    /// session that gave up after exhausting its reconnect attempts may be
    /// started again.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            debug!("feed already running");
            return;
        }
        info!(url = %self.inner.config.data_url, "starting market data feed");
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        *self.inner.command_tx.lock() = command_tx;
        let shared = self.inner.clone();
        tokio::spawn(run(shared, command_rx));
    }

    /// Stop the reactor and close the transport.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("stopping market data feed");
        let _ = self.inner.shutdown.send(());
    }

    /// Request market data for a symbol. Idempotent against already
    /// subscribed or pending symbols. Queued until the session is Ready,
    /// then flushed as a single frame.
    pub fn subscribe(&self, symbol: &str, trades: bool, quotes: bool, bars: bool) {
        let queued = self
            .inner
            .subscriptions
            .lock()
            .request(MarketSubscription::new(symbol, trades, quotes, bars));
        if !queued {
            return;
        }
        debug!(symbol, "subscription queued");
        if self.state() == SessionState::Ready {
            let _ = self
                .inner
                .command_tx
                .lock()
                .send(FeedCommand::FlushSubscriptions);
        }
    }

    /// Drop a symbol from the pending and active sets and, when Ready,
    /// send an unsubscribe frame covering all three channels.
    pub fn unsubscribe(&self, symbol: &str) {
        if self.inner.subscriptions.lock().remove(symbol) {
            info!(symbol, "unsubscribed");
        }
        if self.state() == SessionState::Ready {
            let _ = self
                .inner
                .command_tx
                .lock()
                .send(FeedCommand::Unsubscribe(symbol.to_string()));
        }
    }

    /// Register the tick callback. Runs on the reactor task.
    pub fn on_tick(&self, callback: impl Fn(MarketTick) + Send + Sync + 'static) {
        *self.inner.callbacks.tick.lock() = Some(Arc::new(callback));
    }

    /// Register the connection-status callback.
    pub fn on_connection(&self, callback: impl Fn(bool) + Send + Sync + 'static) {
        *self.inner.callbacks.connection.lock() = Some(Arc::new(callback));
    }

    /// Register the error callback.
    pub fn on_error(&self, callback: impl Fn(String) + Send + Sync + 'static) {
        *self.inner.callbacks.error.lock() = Some(Arc::new(callback));
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Sorted view of the acknowledged subscription set.
    pub fn subscribed_symbols(&self) -> Vec<String> {
        self.inner.subscriptions.lock().active_symbols()
    }
}

/// Linear backoff: the base delay scaled by the attempt count.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(attempt as u64))
}

/// Reactor main loop: connect, stream, back off, repeat.
async fn run(shared: Arc<FeedShared>, mut command_rx: mpsc::UnboundedReceiver<FeedCommand>) {
    let mut attempts: u32 = 0;
    loop {
        if !shared.running.load(Ordering::Acquire) {
            break;
        }
        shared.set_state(SessionState::Connecting);

        let result = connect_and_stream(&shared, &mut command_rx).await;
        let reached_ready = shared.authenticated.swap(false, Ordering::AcqRel);
        shared.set_connected(false);

        match result {
            Ok(()) => break,
            Err(err) => {
                shared.report_error(err.to_string());
                if !shared.running.load(Ordering::Acquire) {
                    break;
                }

                // A connection that reached Ready resets the
                // consecutive-failure count
                if reached_ready {
                    attempts = 0;
                }
                attempts += 1;
                if attempts > shared.config.max_reconnect_attempts {
                    shared.report_error(
                        FeedError::ReconnectExhausted { attempts: attempts - 1 }.to_string(),
                    );
                    shared.running.store(false, Ordering::Release);
                    break;
                }

                shared.set_state(SessionState::Backoff);
                let delay = backoff_delay(shared.config.reconnect_delay_ms, attempts);
                info!(
                    ?delay,
                    attempt = attempts,
                    max = shared.config.max_reconnect_attempts,
                    "scheduling reconnect"
                );
                let mut shutdown_rx = shared.shutdown.subscribe();
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = shutdown_rx.recv() => break,
                }
            }
        }
    }
    shared.set_state(SessionState::Disconnected);
    info!("market data feed stopped");
}

/// One connection lifetime: connect, handshake, authenticate, stream.
/// `Ok` means a voluntary shutdown; any error schedules a reconnect.
async fn connect_and_stream(
    shared: &Arc<FeedShared>,
    command_rx: &mut mpsc::UnboundedReceiver<FeedCommand>,
) -> FeedResult<()> {
    let mut shutdown_rx = shared.shutdown.subscribe();
    let endpoint = &shared.endpoint;
    let connect_timeout = Duration::from_millis(shared.config.connection_timeout_ms);

    info!(host = %endpoint.host, port = endpoint.port, "connecting to upstream");
    let tcp = timeout(
        connect_timeout,
        TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
    )
    .await
    .map_err(|_| FeedError::Timeout(connect_timeout))?
    .map_err(|err| FeedError::Connection(err.to_string()))?;

    shared.set_state(SessionState::Handshaking);
    let connector = if endpoint.secure {
        Some(build_connector(&shared.config)?)
    } else {
        None
    };
    let url = endpoint.url();
    let (ws, _response) = timeout(
        connect_timeout,
        client_async_tls_with_config(url.as_str(), tcp, None, connector),
    )
    .await
    .map_err(|_| FeedError::Timeout(connect_timeout))?
    .map_err(|err| FeedError::Handshake(err.to_string()))?;

    info!("websocket established");
    shared.set_connected(true);

    let (mut write, mut read): (WsSink, WsSource) = ws.split();

    shared.set_state(SessionState::Authenticating);
    send_json(
        &mut write,
        &AuthRequest::new(&shared.config.api_key, &shared.config.api_secret),
    )
    .await?;
    debug!("auth frame sent");

    let heartbeat_interval = Duration::from_millis(shared.config.heartbeat_interval_ms);
    let mut heartbeat = interval_at(
        TokioInstant::now() + heartbeat_interval,
        heartbeat_interval,
    );
    let mut last_frame = Instant::now();

    loop {
        tokio::select! {
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    last_frame = Instant::now();
                    match decode_frame(&text) {
                        Ok(events) => {
                            for event in events {
                                handle_event(shared, &mut write, event).await?;
                            }
                        }
                        // Malformed frames are reported but do not tear
                        // down the session
                        Err(err) => shared.report_error(err.to_string()),
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    last_frame = Instant::now();
                    if let Err(err) = write.send(Message::Pong(payload)).await {
                        warn!(%err, "failed to send pong");
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    return Err(FeedError::Connection("closed by upstream".to_string()));
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(FeedError::Transport(err.to_string())),
                None => return Err(FeedError::Connection("stream ended".to_string())),
            },
            command = command_rx.recv() => match command {
                Some(FeedCommand::FlushSubscriptions) => {
                    flush_subscriptions(shared, &mut write).await?;
                }
                Some(FeedCommand::Unsubscribe(symbol)) => {
                    if shared.state() == SessionState::Ready {
                        send_json(&mut write, &SubscriptionRequest::unsubscribe(&symbol)).await?;
                    }
                }
                // All handles dropped: treat as shutdown
                None => return Ok(()),
            },
            _ = heartbeat.tick() => {
                if !shared.running.load(Ordering::Acquire) {
                    return Ok(());
                }
                let stale_after = heartbeat_interval * 2;
                if last_frame.elapsed() > stale_after {
                    return Err(FeedError::HeartbeatTimeout(stale_after));
                }
            }
            _ = shutdown_rx.recv() => {
                shared.set_state(SessionState::Closing);
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
        }
    }
}

async fn handle_event(
    shared: &Arc<FeedShared>,
    write: &mut WsSink,
    event: FeedEvent,
) -> FeedResult<()> {
    match event {
        FeedEvent::Connected => {
            info!("upstream session connected");
        }
        FeedEvent::Authenticated => {
            info!("authenticated with upstream");
            shared.authenticated.store(true, Ordering::Release);
            shared.set_state(SessionState::Ready);
            flush_subscriptions(shared, write).await?;
        }
        FeedEvent::SubscriptionAck(ack) => {
            let symbols = {
                let mut subscriptions = shared.subscriptions.lock();
                subscriptions.apply_ack(&ack);
                subscriptions.active_symbols()
            };
            info!(?symbols, "subscription acknowledged");
        }
        FeedEvent::UpstreamError { code, message } => {
            // An error during authentication is fatal for this connection
            if shared.state() == SessionState::Authenticating {
                return Err(FeedError::AuthRejected(message));
            }
            let text = match code {
                Some(code) => format!("upstream error {}: {}", code, message),
                None => format!("upstream error: {}", message),
            };
            shared.report_error(text);
        }
        FeedEvent::Tick(tick) => {
            shared.emit_tick(tick);
        }
    }
    Ok(())
}

/// Send every pending subscription as one frame. No-op unless Ready and
/// something is pending. The subscription lock is released before the
/// write awaits.
async fn flush_subscriptions(shared: &FeedShared, write: &mut WsSink) -> FeedResult<()> {
    if shared.state() != SessionState::Ready {
        return Ok(());
    }
    let request = {
        let subscriptions = shared.subscriptions.lock();
        if !subscriptions.has_pending() {
            return Ok(());
        }
        SubscriptionRequest::subscribe(subscriptions.pending())
    };
    if request.is_empty() {
        return Ok(());
    }
    info!(
        trades = request.trades.len(),
        quotes = request.quotes.len(),
        bars = request.bars.len(),
        "sending subscription request"
    );
    send_json(write, &request).await
}

async fn send_json<T: serde::Serialize>(write: &mut WsSink, payload: &T) -> FeedResult<()> {
    let frame =
        serde_json::to_string(payload).map_err(|err| FeedError::Decode(err.to_string()))?;
    write
        .send(Message::Text(frame))
        .await
        .map_err(|err| FeedError::Transport(err.to_string()))
}

fn build_connector(config: &FeedConfig) -> FeedResult<Connector> {
    let mut builder = native_tls::TlsConnector::builder();
    if config.danger_accept_invalid_certs {
        warn!("peer certificate verification disabled (development only)");
        builder.danger_accept_invalid_certs(true);
    }
    let tls = builder
        .build()
        .map_err(|err| FeedError::Handshake(err.to_string()))?;
    Ok(Connector::NativeTls(tls))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> FeedConfig {
        FeedConfig {
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            data_url: "ws://127.0.0.1:9/".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_new_validates_config() {
        assert!(MarketDataFeed::new(FeedConfig::default()).is_err());
        assert!(MarketDataFeed::new(test_config()).is_ok());

        let bad_url = FeedConfig {
            data_url: "https://example.test".to_string(),
            ..test_config()
        };
        assert!(MarketDataFeed::new(bad_url).is_err());
    }

    #[test]
    fn test_initial_state() {
        let feed = MarketDataFeed::new(test_config()).unwrap();
        assert!(!feed.is_connected());
        assert_eq!(feed.state(), SessionState::Disconnected);
        assert!(feed.subscribed_symbols().is_empty());
        // stop before start is a no-op
        feed.stop();
    }

    #[test]
    fn test_subscribe_queues_while_disconnected() {
        let feed = MarketDataFeed::new(test_config()).unwrap();
        feed.subscribe("AAPL", true, true, false);
        feed.subscribe("AAPL", true, true, false);
        feed.subscribe("MSFT", true, false, false);

        let subscriptions = feed.inner.subscriptions.lock();
        assert_eq!(subscriptions.pending().len(), 2);
    }

    #[test]
    fn test_unsubscribe_drops_pending() {
        let feed = MarketDataFeed::new(test_config()).unwrap();
        feed.subscribe("AAPL", true, true, false);
        feed.unsubscribe("AAPL");
        assert!(!feed.inner.subscriptions.lock().has_pending());
    }

    #[test]
    fn test_backoff_is_linear() {
        assert_eq!(backoff_delay(5000, 1), Duration::from_millis(5000));
        assert_eq!(backoff_delay(5000, 3), Duration::from_millis(15000));
        assert_eq!(backoff_delay(u64::MAX, 2), Duration::from_millis(u64::MAX));
    }
}
