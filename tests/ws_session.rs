mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use common::{mem_db, unreachable_config, worker_config};
use monik::config::AppConfig;
use monik::metrics::MetricsService;
use monik::router::RouterClient;
use monik::wan::WanDetector;
use monik::web::{create_router, AppState};
use monik::worker::WorkerPool;
use monik::ws::models::EVENT_TRAFFIC;
use monik::ws::{RealTimeData, WsHub};

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Boots the full HTTP stack on an ephemeral port and returns the base
/// address plus the hub for injecting broadcasts.
async fn start_server(max_connections: usize) -> (String, Arc<WsHub>) {
    let mut config = AppConfig::from_env();
    config.dashboard.max_connections = max_connections;

    let db = mem_db().await;
    let hub = WsHub::new(1024, 64);
    hub.start();
    let client = Arc::new(RouterClient::new(unreachable_config()));
    let wan = Arc::new(WanDetector::new(
        config.wan.clone(),
        Arc::clone(&client),
        Arc::clone(&hub),
    ));
    let pool = WorkerPool::new(worker_config(), client);
    let metrics = MetricsService::new(
        config.metrics.clone(),
        Arc::clone(&hub),
        Arc::clone(&wan),
        Arc::clone(&pool),
    );

    let app = create_router(AppState {
        db,
        config,
        hub: Arc::clone(&hub),
        wan,
        pool,
        metrics,
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("127.0.0.1:{}", addr.port()), hub)
}

async fn next_text(stream: &mut WsStream) -> serde_json::Value {
    loop {
        let msg = timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn expect_silence(stream: &mut WsStream) {
    let outcome = timeout(Duration::from_millis(300), stream.next()).await;
    match outcome {
        Err(_) => {}
        Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => {}
        Ok(other) => panic!("expected no frame, got {other:?}"),
    }
}

fn traffic_sample(name: &str) -> RealTimeData {
    RealTimeData {
        interface_name: name.to_string(),
        rx_rate: 12.5,
        tx_rate: 3.5,
        rx_bytes: 1_000_000,
        tx_bytes: 250_000,
        status: "up".to_string(),
        comment: String::new(),
        timestamp: Utc::now(),
        event_type: EVENT_TRAFFIC.to_string(),
    }
}

#[tokio::test]
async fn subscribe_then_receive_only_that_interface() {
    let (addr, hub) = start_server(100).await;
    let (mut stream, _) = connect_async(format!("ws://{addr}/api/v1/ws")).await.unwrap();

    let welcome = next_text(&mut stream).await;
    assert_eq!(welcome["type"], "welcome");

    stream
        .send(Message::Text(
            r#"{"action":"subscribe","interface":"xether2"}"#.into(),
        ))
        .await
        .unwrap();
    let reply = next_text(&mut stream).await;
    assert_eq!(reply["type"], "success");

    hub.broadcast_data(traffic_sample("xether2"));
    let frame = next_text(&mut stream).await;
    assert_eq!(frame["type"], "data");
    assert_eq!(frame["interface"], "xether2");
    assert_eq!(frame["event_type"], "traffic");

    // Data for an interface we did not subscribe to never arrives.
    hub.broadcast_data(traffic_sample("xether1"));
    expect_silence(&mut stream).await;

    stream
        .send(Message::Text(
            r#"{"action":"unsubscribe","interface":"xether2"}"#.into(),
        ))
        .await
        .unwrap();
    let reply = next_text(&mut stream).await;
    assert_eq!(reply["type"], "success");

    hub.broadcast_data(traffic_sample("xether2"));
    expect_silence(&mut stream).await;
}

#[tokio::test]
async fn ping_and_status_control_messages() {
    let (addr, _hub) = start_server(100).await;
    let (mut stream, _) = connect_async(format!("ws://{addr}/api/v1/ws")).await.unwrap();
    next_text(&mut stream).await; // welcome

    stream
        .send(Message::Text(r#"{"action":"ping"}"#.into()))
        .await
        .unwrap();
    let reply = next_text(&mut stream).await;
    assert_eq!(reply["type"], "pong");

    stream
        .send(Message::Text(r#"{"action":"get_status"}"#.into()))
        .await
        .unwrap();
    let reply = next_text(&mut stream).await;
    assert_eq!(reply["type"], "status");
    assert!(reply["metrics"].is_object());

    stream
        .send(Message::Text(r#"{"action":"warp"}"#.into()))
        .await
        .unwrap();
    let reply = next_text(&mut stream).await;
    assert_eq!(reply["type"], "error");
}

#[tokio::test]
async fn events_reach_unsubscribed_clients_too() {
    let (addr, hub) = start_server(100).await;
    let (mut stream, _) = connect_async(format!("ws://{addr}/api/v1/ws")).await.unwrap();
    next_text(&mut stream).await; // welcome

    hub.broadcast_event(
        "counter_reset",
        "Counter reset detected on xether2",
        serde_json::json!({ "interface": "xether2" }),
    );
    let frame = next_text(&mut stream).await;
    assert_eq!(frame["type"], "event");
    assert_eq!(frame["event"], "counter_reset");
    assert_eq!(frame["data"]["interface"], "xether2");
}

#[tokio::test]
async fn connection_cap_rejects_the_excess_client() {
    let (addr, _hub) = start_server(1).await;
    let (mut stream, _) = connect_async(format!("ws://{addr}/api/v1/ws")).await.unwrap();
    // The welcome frame confirms the first session is registered.
    next_text(&mut stream).await;

    let second = connect_async(format!("ws://{addr}/api/v1/ws")).await;
    assert!(second.is_err());
}
