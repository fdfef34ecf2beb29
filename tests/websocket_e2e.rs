// Real sockets: the router is served on an ephemeral port and driven with
// tokio-tungstenite.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures_util::{SinkExt, StreamExt};
use rig_telemetry::sample::{PhysicsConfig, PhysicsSampleSource};
use rig_telemetry::server::{cors_layer, router, spawn_background_tasks};
use rig_telemetry::{HubConfig, TelemetryHub};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

fn test_config() -> HubConfig {
    HubConfig {
        tick_interval: Duration::from_millis(10),
        handshake_timeout: Duration::from_millis(200),
        ..HubConfig::default()
    }
}

async fn start_server(config: HubConfig) -> (SocketAddr, Arc<TelemetryHub>, CancellationToken) {
    let hub = TelemetryHub::shared(config);
    let shutdown = CancellationToken::new();
    let source = PhysicsSampleSource::seeded(PhysicsConfig::default(), 7, 1_700_000_000_000, 10);
    spawn_background_tasks(hub.clone(), Box::new(source), shutdown.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(hub.clone(), cors_layer(&[]));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, hub, shutdown)
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    client
}

async fn send_json(client: &mut Client, value: Value) {
    client.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Next JSON reply, skipping frames, pings and alarm broadcasts from the mock rig
async fn next_json(client: &mut Client) -> Value {
    tokio::time::timeout(WAIT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => {
                    let value: Value = serde_json::from_str(text.as_str()).unwrap();
                    let is_alarm = value["messageType"]
                        .as_str()
                        .is_some_and(|t| t.starts_with("ALARM_"));
                    if !is_alarm {
                        return value;
                    }
                }
                Some(Ok(Message::Close(frame))) => panic!("closed while waiting for JSON: {:?}", frame),
                Some(Ok(_)) => continue,
                other => panic!("stream ended: {:?}", other),
            }
        }
    })
    .await
    .expect("timed out waiting for JSON")
}

async fn next_close_code(client: &mut Client) -> u16 {
    tokio::time::timeout(WAIT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(Some(frame)))) => return u16::from(frame.code),
                Some(Ok(_)) => continue,
                other => panic!("no close frame: {:?}", other),
            }
        }
    })
    .await
    .expect("timed out waiting for close")
}

#[tokio::test]
async fn test_handshake_subscribe_and_receive_frames() {
    let (addr, _hub, shutdown) = start_server(test_config()).await;
    let mut client = connect(addr).await;

    send_json(&mut client, json!({"messageType": "HANDSHAKE", "schemaId": 1})).await;
    let ack = next_json(&mut client).await;
    assert_eq!(ack["messageType"], "HANDSHAKE_ACK");
    assert_eq!(ack["payload"]["availableStreams"], json!([101, 102]));

    send_json(&mut client, json!({"messageType": "SUBSCRIBE", "streams": [101]})).await;
    let sub = next_json(&mut client).await;
    assert_eq!(sub["messageType"], "SUBSCRIBE_ACK");
    assert_eq!(sub["payload"]["accepted"], json!([101]));

    let frame = tokio::time::timeout(WAIT, async {
        loop {
            if let Some(Ok(Message::Binary(data))) = client.next().await {
                return data;
            }
        }
    })
    .await
    .expect("no telemetry frame");

    assert_eq!(frame.len(), 40);
    assert_eq!(frame[0], 101);
    assert_eq!(frame[1], 1);

    shutdown.cancel();
}

#[tokio::test]
async fn test_message_before_handshake_is_rejected() {
    let (addr, _hub, shutdown) = start_server(test_config()).await;
    let mut client = connect(addr).await;

    send_json(&mut client, json!({"messageType": "SUBSCRIBE", "streams": [101]})).await;

    let err = next_json(&mut client).await;
    assert_eq!(err["messageType"], "ERROR");
    assert_eq!(err["payload"]["code"], "PROTOCOL_VIOLATION");
    assert_eq!(next_close_code(&mut client).await, 1008);

    shutdown.cancel();
}

#[tokio::test]
async fn test_silent_client_times_out() {
    let (addr, hub, shutdown) = start_server(test_config()).await;
    let mut client = connect(addr).await;

    assert_eq!(next_close_code(&mut client).await, 1008);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hub.connection_count(), 0);

    shutdown.cancel();
}

#[tokio::test]
async fn test_health_endpoint() {
    let hub = TelemetryHub::shared(test_config());
    let app = router(hub, cors_layer(&[]));

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let health: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["connections"], 0);
    assert_eq!(health["activeAlarms"], 0);
}

#[tokio::test]
async fn test_alarm_listing() {
    let hub = TelemetryHub::shared(test_config());
    hub.raise_alarm("HIGH_GAS", "Gas above limit", rig_telemetry::Severity::Critical);
    let app = router(hub, cors_layer(&[]));

    let response = app
        .oneshot(Request::builder().uri("/api/alarms").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let alarms: Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(alarms.as_array().unwrap().len(), 1);
    assert_eq!(alarms[0]["code"], "HIGH_GAS");
    assert_eq!(alarms[0]["acknowledged"], false);
}
