//! Provider Connection Integration Tests
//!
//! Drives a connection manager against the in-memory transport with tokio's
//! paused clock, so backoff and keepalive timings are exact.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, timeout};

use venue_router::application::ports::{HealthSink, NoOpHealthSink};
use venue_router::domain::wire::kind;
use venue_router::infrastructure::stream::{
    ConnectBehavior, MemoryServer, ServerSession, memory_transport,
};
use venue_router::{
    ConnectionError, ConnectionEvent, ConnectionManager, ConnectionSettings, ConnectionState,
    DataMessage, ProviderCapabilities, ProviderRegistry, SubscriptionType, WireMessage,
};

const WAIT: Duration = Duration::from_secs(60);

fn settings() -> ConnectionSettings {
    ConnectionSettings {
        connect_timeout: Duration::from_secs(1),
        ping_interval: Duration::ZERO,
        reconnect_base_delay: Duration::from_millis(100),
        reconnect_max_delay: Duration::from_secs(5),
        max_reconnect_attempts: 3,
        ..ConnectionSettings::default()
    }
}

fn spawn(settings: ConnectionSettings) -> (ConnectionManager, MemoryServer) {
    let (connector, server) = memory_transport();
    let manager =
        ConnectionManager::spawn("kis", settings, Arc::new(connector), Arc::new(NoOpHealthSink));
    (manager, server)
}

async fn connect(manager: &ConnectionManager, server: &mut MemoryServer) -> ServerSession {
    manager.connect().await.unwrap();
    timeout(WAIT, server.accept()).await.unwrap().unwrap()
}

async fn next_event(
    events: &mut broadcast::Receiver<ConnectionEvent>,
    matches: impl Fn(&ConnectionEvent) -> bool,
) -> ConnectionEvent {
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.unwrap();
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not observed")
}

async fn ack(session: &ServerSession, subscription_id: &str) {
    let ack =
        WireMessage::new(kind::SUBSCRIPTION_ACK, json!({}), 2).with_subscription(subscription_id);
    assert!(session.send(&ack).await);
}

async fn subscribed(events: &mut broadcast::Receiver<ConnectionEvent>, subscription_id: &str) {
    next_event(events, |e| {
        matches!(e, ConnectionEvent::Subscribed { subscription_id: id } if id == subscription_id)
    })
    .await;
}

fn market_data(symbol: &str, price: f64) -> WireMessage {
    WireMessage::new(
        kind::MARKET_DATA,
        json!({ "symbol": symbol, "price": price }),
        1,
    )
}

#[tokio::test(start_paused = true)]
async fn abnormal_close_backs_off_then_gives_up_once() {
    let (manager, mut server) = spawn(settings());
    let mut events = manager.events();
    let session = connect(&manager, &mut server).await;

    server.set_behavior(ConnectBehavior::Refuse);
    let dropped_at = Instant::now();
    session.close(Some(1006), "abnormal").await;

    let mut delays = Vec::new();
    let attempts = loop {
        match next_event(&mut events, |e| {
            matches!(
                e,
                ConnectionEvent::Reconnecting { .. }
                    | ConnectionEvent::MaxReconnectAttemptsReached { .. }
            )
        })
        .await
        {
            ConnectionEvent::Reconnecting { attempt, delay } => {
                assert_eq!(attempt as usize, delays.len() + 1);
                delays.push(delay);
            }
            ConnectionEvent::MaxReconnectAttemptsReached { attempts } => break attempts,
            other => panic!("unexpected event {other:?}"),
        }
    };

    assert_eq!(
        delays,
        [
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400)
        ]
    );
    assert_eq!(attempts, 3);
    assert!(dropped_at.elapsed() >= Duration::from_millis(700));
    assert_eq!(manager.connection_state(), ConnectionState::Disconnected);
    assert_eq!(server.connect_attempts(), 4);

    tokio::time::sleep(Duration::from_secs(30)).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(
                event,
                ConnectionEvent::Reconnecting { .. }
                    | ConnectionEvent::MaxReconnectAttemptsReached { .. }
            ),
            "unexpected {event:?} after giving up"
        );
    }
    assert_eq!(server.connect_attempts(), 4);
}

#[tokio::test(start_paused = true)]
async fn zero_reconnect_attempts_gives_up_immediately() {
    let settings = ConnectionSettings {
        max_reconnect_attempts: 0,
        ..settings()
    };
    let (manager, mut server) = spawn(settings);
    let mut events = manager.events();
    let session = connect(&manager, &mut server).await;

    session.close(Some(1006), "abnormal").await;
    let event = next_event(&mut events, |e| {
        matches!(
            e,
            ConnectionEvent::Reconnecting { .. } | ConnectionEvent::MaxReconnectAttemptsReached { .. }
        )
    })
    .await;
    assert_eq!(
        event,
        ConnectionEvent::MaxReconnectAttemptsReached { attempts: 0 }
    );
    assert_eq!(manager.connection_state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(server.connect_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn normal_close_does_not_reconnect() {
    let (manager, mut server) = spawn(settings());
    let mut events = manager.events();
    let session = connect(&manager, &mut server).await;

    session.close(Some(1000), "bye").await;
    let event = next_event(&mut events, |e| {
        matches!(e, ConnectionEvent::Disconnected { .. })
    })
    .await;
    assert_eq!(
        event,
        ConnectionEvent::Disconnected {
            code: Some(1000),
            reason: "bye".into()
        }
    );

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(manager.connection_state(), ConnectionState::Disconnected);
    assert_eq!(server.connect_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn missing_pong_forces_reconnect() {
    let settings = ConnectionSettings {
        ping_interval: Duration::from_secs(1),
        pong_timeout: Duration::from_millis(500),
        ..settings()
    };
    let (manager, mut server) = spawn(settings);
    let mut events = manager.events();
    let mut session = connect(&manager, &mut server).await;

    let ping = timeout(WAIT, session.recv()).await.unwrap().unwrap().unwrap();
    assert_eq!(ping.kind, kind::PING);
    assert_eq!(ping.provider.as_deref(), Some("kis"));

    let event = next_event(&mut events, |e| {
        matches!(e, ConnectionEvent::Disconnected { .. })
    })
    .await;
    assert_eq!(
        event,
        ConnectionEvent::Disconnected {
            code: None,
            reason: "pong timeout".into()
        }
    );
    let event = next_event(&mut events, |e| {
        matches!(e, ConnectionEvent::Reconnecting { .. })
    })
    .await;
    assert_eq!(
        event,
        ConnectionEvent::Reconnecting {
            attempt: 1,
            delay: Duration::from_millis(100)
        }
    );

    let _replacement = timeout(WAIT, server.accept()).await.unwrap().unwrap();
    next_event(&mut events, |e| matches!(e, ConnectionEvent::Connected)).await;
    assert!(manager.connection_state().is_connected());
    assert_eq!(manager.stats().await.unwrap().reconnect_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn pong_round_trip_feeds_provider_latency() {
    let registry = Arc::new(ProviderRegistry::new());
    registry.register("kis", ProviderCapabilities::default());
    let (connector, mut server) = memory_transport();
    let settings = ConnectionSettings {
        ping_interval: Duration::from_secs(1),
        pong_timeout: Duration::from_secs(1),
        ..settings()
    };
    let health: Arc<dyn HealthSink> = registry.clone();
    let manager = ConnectionManager::spawn("kis", settings, Arc::new(connector), health);
    let mut session = connect(&manager, &mut server).await;

    let ping = timeout(WAIT, session.recv()).await.unwrap().unwrap().unwrap();
    assert_eq!(ping.kind, kind::PING);
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(session.send(&WireMessage::pong(ping.timestamp)).await);

    timeout(WAIT, async {
        loop {
            let latency = registry.snapshot().get("kis").unwrap().metrics.latency_ms;
            if (latency - 40.0).abs() < 1.0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("latency sample not applied");
    assert!(manager.connection_state().is_connected());
}

#[tokio::test(start_paused = true)]
async fn subscriptions_are_replayed_after_reconnect() {
    let (manager, mut server) = spawn(settings());
    let mut events = manager.events();
    let handle = manager
        .create_subscription(
            SubscriptionType::MarketData,
            vec!["005930".into()],
            |_| Ok(()),
            None,
        )
        .await
        .unwrap();

    let mut session = connect(&manager, &mut server).await;
    let subscribe = timeout(WAIT, session.recv()).await.unwrap().unwrap().unwrap();
    assert_eq!(subscribe.kind, kind::SUBSCRIBE);
    assert_eq!(subscribe.subscription_id.as_deref(), Some(handle.id()));
    assert_eq!(subscribe.data["symbols"], json!(["005930"]));
    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.subscription_count, 1);
    assert_eq!(stats.active_subscription_count, 0);

    ack(&session, handle.id()).await;
    let event = next_event(&mut events, |e| {
        matches!(e, ConnectionEvent::Subscribed { .. })
    })
    .await;
    assert_eq!(
        event,
        ConnectionEvent::Subscribed {
            subscription_id: handle.id().to_string()
        }
    );
    assert_eq!(manager.stats().await.unwrap().active_subscription_count, 1);

    session.close(Some(1011), "server restart").await;
    let mut replacement = timeout(WAIT, server.accept()).await.unwrap().unwrap();
    let replayed = timeout(WAIT, replacement.recv()).await.unwrap().unwrap().unwrap();
    assert_eq!(replayed.kind, kind::SUBSCRIBE);
    assert_eq!(replayed.subscription_id.as_deref(), Some(handle.id()));
    assert_eq!(manager.stats().await.unwrap().active_subscription_count, 0);

    ack(&replacement, handle.id()).await;
    subscribed(&mut events, handle.id()).await;
    assert_eq!(manager.stats().await.unwrap().active_subscription_count, 1);

    assert!(handle.unsubscribe().await.unwrap());
    let unsubscribe = timeout(WAIT, replacement.recv()).await.unwrap().unwrap().unwrap();
    assert_eq!(unsubscribe.kind, kind::UNSUBSCRIBE);
    assert_eq!(manager.stats().await.unwrap().subscription_count, 0);
    assert!(!handle.unsubscribe().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn queued_messages_flush_in_order_on_connect() {
    let settings = ConnectionSettings {
        queue_capacity: 2,
        ..settings()
    };
    let (manager, mut server) = spawn(settings);

    let err = manager.send(WireMessage::new("order", json!({}), 0)).await;
    assert!(matches!(err, Err(ConnectionError::NetworkError { .. })));

    for ts in 1..=3 {
        manager
            .send_or_queue(WireMessage::new("order", json!({ "n": ts }), ts))
            .await
            .unwrap();
    }
    assert_eq!(manager.stats().await.unwrap().queued_messages, 2);

    let mut session = connect(&manager, &mut server).await;
    let first = timeout(WAIT, session.recv()).await.unwrap().unwrap().unwrap();
    let second = timeout(WAIT, session.recv()).await.unwrap().unwrap().unwrap();
    assert_eq!((first.timestamp, second.timestamp), (2, 3));
    assert_eq!(manager.stats().await.unwrap().queued_messages, 0);

    manager
        .send(WireMessage::new("order", json!({}), 4))
        .await
        .unwrap();
    let live = timeout(WAIT, session.recv()).await.unwrap().unwrap().unwrap();
    assert_eq!(live.timestamp, 4);
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_are_dropped_and_stream_continues() {
    let (manager, mut server) = spawn(settings());
    let mut events = manager.events();
    let (tx, mut rx) = mpsc::unbounded_channel::<DataMessage>();
    let handle = manager
        .create_subscription(
            SubscriptionType::MarketData,
            vec!["AAPL".into()],
            move |message| {
                tx.send(message.clone())?;
                Ok(())
            },
            None,
        )
        .await
        .unwrap();
    let session = connect(&manager, &mut server).await;
    ack(&session, handle.id()).await;
    subscribed(&mut events, handle.id()).await;

    assert!(session.send_text("{not json").await);
    assert!(session.send_text(r#"{"type":"teleport","timestamp":1}"#).await);
    assert!(session.send(&market_data("MSFT", 1.0)).await);
    assert!(session.send(&market_data("AAPL", 190.5)).await);

    next_event(&mut events, |e| {
        matches!(e, ConnectionEvent::MalformedMessage { .. })
    })
    .await;
    let delivered = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(delivered.symbol.as_deref(), Some("AAPL"));
    assert!(rx.try_recv().is_err());

    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.malformed_messages, 2);
    assert_eq!(stats.messages_received, 3);
    assert!(manager.connection_state().is_connected());
}

#[tokio::test(start_paused = true)]
async fn failing_callback_does_not_starve_other_subscribers() {
    let (manager, mut server) = spawn(settings());
    let mut events = manager.events();
    let panicking = manager
        .create_subscription(
            SubscriptionType::MarketData,
            vec!["AAPL".into()],
            |_| panic!("bad handler"),
            None,
        )
        .await
        .unwrap();
    let erroring = manager
        .create_subscription(
            SubscriptionType::MarketData,
            vec!["AAPL".into()],
            |_| Err(anyhow::anyhow!("rejected quote")),
            None,
        )
        .await
        .unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel::<DataMessage>();
    let forwarding = manager
        .create_subscription(
            SubscriptionType::MarketData,
            vec!["AAPL".into()],
            move |message| {
                tx.send(message.clone())?;
                Ok(())
            },
            None,
        )
        .await
        .unwrap();
    let session = connect(&manager, &mut server).await;
    for id in [panicking.id(), erroring.id(), forwarding.id()] {
        ack(&session, id).await;
        subscribed(&mut events, id).await;
    }

    assert!(session.send(&market_data("AAPL", 190.5)).await);

    let delivered = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(delivered.price(), Some(rust_decimal::Decimal::new(1905, 1)));

    let mut failed = Vec::new();
    while failed.len() < 2 {
        if let ConnectionEvent::CallbackFailed {
            subscription_id,
            error,
        } = next_event(&mut events, |e| {
            matches!(e, ConnectionEvent::CallbackFailed { .. })
        })
        .await
        {
            failed.push((subscription_id, error));
        }
    }
    assert_eq!(failed[0].0, panicking.id());
    assert!(failed[0].1.contains("bad handler"));
    assert_eq!(failed[1].0, erroring.id());
    assert!(failed[1].1.contains("rejected quote"));
    assert!(manager.connection_state().is_connected());
}

#[tokio::test(start_paused = true)]
async fn pending_subscription_receives_nothing_until_acked() {
    let (manager, mut server) = spawn(settings());
    let mut events = manager.events();
    let (tx, mut rx) = mpsc::unbounded_channel::<DataMessage>();
    let mut session = connect(&manager, &mut server).await;
    let handle = manager
        .create_subscription(
            SubscriptionType::MarketData,
            vec!["AAPL".into()],
            move |message| {
                tx.send(message.clone())?;
                Ok(())
            },
            None,
        )
        .await
        .unwrap();

    let subscribe = timeout(WAIT, session.recv()).await.unwrap().unwrap().unwrap();
    assert_eq!(subscribe.kind, kind::SUBSCRIBE);
    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.subscription_count, 1);
    assert_eq!(stats.active_subscription_count, 0);
    assert!(!manager.subscriptions().await.unwrap()[0].is_active);

    assert!(session.send(&market_data("AAPL", 190.0)).await);
    ack(&session, handle.id()).await;
    subscribed(&mut events, handle.id()).await;
    assert!(rx.try_recv().is_err());

    assert!(session.send(&market_data("AAPL", 191.0)).await);
    let delivered = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(delivered.price(), Some(rust_decimal::Decimal::from(191)));
    assert_eq!(manager.stats().await.unwrap().active_subscription_count, 1);
}
