//! Session tests against a local WebSocket server.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use feed_manager::{MarketDataFeed, SessionState};
use venue_core::config::FeedConfig;
use venue_core::data::TickKind;

const WAIT: Duration = Duration::from_secs(5);

fn test_config(addr: std::net::SocketAddr) -> FeedConfig {
    FeedConfig {
        api_key: "test-key".to_string(),
        api_secret: "test-secret".to_string(),
        data_url: format!("ws://{}/stream", addr),
        reconnect_delay_ms: 50,
        max_reconnect_attempts: 10,
        heartbeat_interval_ms: 10_000,
        connection_timeout_ms: 5_000,
        danger_accept_invalid_certs: false,
    }
}

#[tokio::test]
async fn session_authenticates_subscribes_and_streams() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (server_tx, mut server_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        ws.send(Message::Text(
            r#"[{"T":"success","msg":"connected"}]"#.to_string(),
        ))
        .await
        .unwrap();

        let auth = ws.next().await.unwrap().unwrap();
        server_tx.send(auth.to_text().unwrap().to_string()).unwrap();
        ws.send(Message::Text(
            r#"[{"T":"success","msg":"authenticated"}]"#.to_string(),
        ))
        .await
        .unwrap();

        let subscribe = ws.next().await.unwrap().unwrap();
        server_tx
            .send(subscribe.to_text().unwrap().to_string())
            .unwrap();
        ws.send(Message::Text(
            r#"[{"T":"subscription","trades":["AAPL"],"quotes":["AAPL"],"bars":[]}]"#.to_string(),
        ))
        .await
        .unwrap();

        ws.send(Message::Text(
            r#"[{"T":"t","S":"AAPL","p":150.5,"s":100}]"#.to_string(),
        ))
        .await
        .unwrap();

        // Keep the connection open until the client closes it
        while let Some(Ok(message)) = ws.next().await {
            if message.is_close() {
                break;
            }
        }
    });

    let feed = MarketDataFeed::new(test_config(addr)).unwrap();

    let (tick_tx, mut tick_rx) = mpsc::unbounded_channel();
    feed.on_tick(move |tick| {
        let _ = tick_tx.send(tick);
    });
    let (conn_tx, mut conn_rx) = mpsc::unbounded_channel();
    feed.on_connection(move |connected| {
        let _ = conn_tx.send(connected);
    });

    // Subscribed before start: must queue and flush on Ready
    feed.subscribe("AAPL", true, true, false);
    feed.start();

    let connected = timeout(WAIT, conn_rx.recv()).await.unwrap().unwrap();
    assert!(connected);

    let auth_frame = timeout(WAIT, server_rx.recv()).await.unwrap().unwrap();
    assert!(auth_frame.contains(r#""action":"auth""#));
    assert!(auth_frame.contains(r#""key":"test-key""#));
    assert!(auth_frame.contains(r#""secret":"test-secret""#));

    let subscribe_frame = timeout(WAIT, server_rx.recv()).await.unwrap().unwrap();
    assert!(subscribe_frame.contains(r#""action":"subscribe""#));
    assert!(subscribe_frame.contains(r#""trades":["AAPL"]"#));
    assert!(subscribe_frame.contains(r#""quotes":["AAPL"]"#));
    // No bars requested, so the channel is omitted entirely
    assert!(!subscribe_frame.contains("bars"));

    let tick = timeout(WAIT, tick_rx.recv()).await.unwrap().unwrap();
    assert_eq!(tick.symbol, "AAPL");
    assert_eq!(
        tick.kind,
        TickKind::Trade {
            price: 150.5,
            size: 100
        }
    );

    assert!(feed.is_connected());
    assert_eq!(feed.state(), SessionState::Ready);
    assert_eq!(feed.subscribed_symbols(), vec!["AAPL".to_string()]);

    feed.stop();
    let disconnected = timeout(WAIT, conn_rx.recv()).await.unwrap().unwrap();
    assert!(!disconnected);
    assert!(!feed.is_connected());
}

#[tokio::test]
async fn auth_rejection_exhausts_reconnects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(stream).await else {
                    return;
                };
                // Read the auth frame, reject it
                let _ = ws.next().await;
                let _ = ws
                    .send(Message::Text(
                        r#"{"T":"error","code":402,"msg":"auth failed"}"#.to_string(),
                    ))
                    .await;
            });
        }
    });

    let config = FeedConfig {
        max_reconnect_attempts: 2,
        ..test_config(addr)
    };
    let feed = MarketDataFeed::new(config).unwrap();

    let (error_tx, mut error_rx) = mpsc::unbounded_channel::<String>();
    feed.on_error(move |message| {
        let _ = error_tx.send(message);
    });
    feed.start();

    // Every connection fails authentication; after the attempts are used
    // up the session reports a fatal error and stays down.
    let deadline = tokio::time::Instant::now() + WAIT;
    let mut saw_rejection = false;
    let mut saw_give_up = false;
    while tokio::time::Instant::now() < deadline && !(saw_rejection && saw_give_up) {
        match timeout(WAIT, error_rx.recv()).await {
            Ok(Some(message)) => {
                if message.contains("Authentication rejected") {
                    saw_rejection = true;
                }
                if message.contains("Gave up after") {
                    saw_give_up = true;
                }
            }
            _ => break,
        }
    }
    assert!(saw_rejection, "expected an authentication rejection");
    assert!(saw_give_up, "expected reconnect exhaustion");

    // The reactor winds down to Disconnected
    let deadline = tokio::time::Instant::now() + WAIT;
    while feed.state() != SessionState::Disconnected && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(feed.state(), SessionState::Disconnected);
    assert!(!feed.is_connected());
}

#[tokio::test]
async fn heartbeat_timeout_forces_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(stream).await else {
                    return;
                };
                let _ = ws.next().await; // auth frame
                let _ = ws
                    .send(Message::Text(
                        r#"[{"T":"success","msg":"authenticated"}]"#.to_string(),
                    ))
                    .await;
                // Go silent: the client must declare the stream stale
                tokio::time::sleep(Duration::from_secs(30)).await;
            });
        }
    });

    let config = FeedConfig {
        heartbeat_interval_ms: 100,
        reconnect_delay_ms: 50,
        ..test_config(addr)
    };
    let feed = MarketDataFeed::new(config).unwrap();

    let (error_tx, mut error_rx) = mpsc::unbounded_channel::<String>();
    feed.on_error(move |message| {
        let _ = error_tx.send(message);
    });
    feed.start();

    let deadline = tokio::time::Instant::now() + WAIT;
    let mut saw_heartbeat_timeout = false;
    while tokio::time::Instant::now() < deadline {
        match timeout(WAIT, error_rx.recv()).await {
            Ok(Some(message)) if message.contains("Heartbeat timeout") => {
                saw_heartbeat_timeout = true;
                break;
            }
            Ok(Some(_)) => continue,
            _ => break,
        }
    }
    assert!(saw_heartbeat_timeout, "expected a heartbeat timeout");

    feed.stop();
}
