//! Integration tests: a full gateway session driven over an in-memory duplex
//! stream, with a manual timer so heartbeats fire only when the test says so.

use async_trait::async_trait;
use lib::gateway::heartbeat::{Timer, LATENCY_WARNING};
use lib::gateway::model::Message;
use lib::gateway::{GatewayClient, HandlerRegistry};
use lib::gateway::GatewayError;
use lib::session::ConnectionState;
use lib::websocket::{Frame, WebSocket, WebSocketFactory};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{duplex, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, Semaphore};

/// Records every requested sleep and only wakes when a permit is released.
struct ManualTimer {
    sleeps: Mutex<Vec<Duration>>,
    release: Semaphore,
}

impl ManualTimer {
    fn new() -> Self {
        Self {
            sleeps: Mutex::new(Vec::new()),
            release: Semaphore::new(0),
        }
    }

    fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().expect("sleeps lock").clone()
    }

    async fn wait_for_sleep(&self) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.sleeps().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("scheduler never slept");
    }
}

#[async_trait]
impl Timer for ManualTimer {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().expect("sleeps lock").push(duration);
        if let Ok(permit) = self.release.acquire().await {
            permit.forget();
        }
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Never wakes from sleep; every `now()` reads eleven seconds later than the last.
struct SteppingTimer {
    start: Instant,
    calls: AtomicU32,
}

#[async_trait]
impl Timer for SteppingTimer {
    async fn sleep(&self, _duration: Duration) {
        std::future::pending::<()>().await;
    }

    fn now(&self) -> Instant {
        let step = self.calls.fetch_add(1, Ordering::SeqCst);
        self.start + Duration::from_secs(11) * step
    }
}

fn factory() -> WebSocketFactory {
    WebSocketFactory::new("/?v=10&encoding=json", "127.0.0.1", 9)
}

async fn send(server: &mut DuplexStream, payload: Value) {
    let frame = Frame::text(&payload.to_string()).serialize_with_mask(None);
    server.write_all(&frame).await.expect("server write");
}

async fn recv(server: &mut DuplexStream) -> Value {
    let frame = tokio::time::timeout(Duration::from_secs(5), Frame::read_from(server))
        .await
        .expect("client frame in time")
        .expect("read frame")
        .expect("frame before eof");
    serde_json::from_slice(&frame.payload).expect("client sent json")
}

fn ready_payload() -> Value {
    json!({
        "op": 0,
        "t": "READY",
        "s": 1,
        "d": {
            "v": 10,
            "user": {"id": "42", "username": "tilde", "bot": true},
            "session_id": "sess-1",
            "resume_gateway_url": "wss://resume.example",
            "guilds": [{"id": "7", "unavailable": true}]
        }
    })
}

#[tokio::test]
async fn full_session_heartbeats_and_dispatches() {
    let (client_io, mut server) = duplex(64 * 1024);
    let timer = Arc::new(ManualTimer::new());
    let ready_calls = Arc::new(AtomicUsize::new(0));
    let (ready_tx, mut ready_rx) = mpsc::unbounded_channel::<String>();
    let (message_tx, mut message_rx) = mpsc::unbounded_channel::<Message>();

    let calls = ready_calls.clone();
    let handlers = HandlerRegistry::new()
        .on_ready(move |client, ready| {
            calls.fetch_add(1, Ordering::SeqCst);
            let tx = ready_tx.clone();
            async move {
                assert_eq!(client.authorization(), "Bot secret");
                let _ = tx.send(ready.session_id);
            }
        })
        .on_typed("MESSAGE_CREATE", move |_, message: Message| {
            let tx = message_tx.clone();
            async move {
                let _ = tx.send(message);
            }
        });

    let client = GatewayClient::new(factory(), "secret", handlers).with_timer(timer.clone());
    let session = client.session();
    let run = tokio::spawn(async move { client.run_on(WebSocket::new(client_io)).await });

    send(&mut server, json!({"op": 10, "d": {"heartbeat_interval": 41250}})).await;

    let first = recv(&mut server).await;
    assert_eq!(first, json!({"op": 1, "d": null}));
    let identify = recv(&mut server).await;
    assert_eq!(identify["op"], 2);
    assert_eq!(identify["d"]["token"], "secret");
    assert!(identify["d"]["properties"]["os"].is_string());

    send(&mut server, ready_payload()).await;
    send(&mut server, json!({"op": 11, "d": null})).await;
    let session_id = tokio::time::timeout(Duration::from_secs(5), ready_rx.recv())
        .await
        .expect("ready handler in time")
        .expect("ready handler ran");
    assert_eq!(session_id, "sess-1");

    timer.wait_for_sleep().await;
    assert_eq!(timer.sleeps()[0], Duration::from_millis(41_250));
    timer.release.add_permits(1);
    let beat = recv(&mut server).await;
    assert_eq!(beat, json!({"op": 1, "d": 1}));

    send(
        &mut server,
        json!({"op": 0, "t": "TYPING_START", "s": 2, "d": {"channel_id": "5"}}),
    )
    .await;
    send(
        &mut server,
        json!({
            "op": 0,
            "t": "MESSAGE_CREATE",
            "s": 3,
            "d": {
                "id": "100",
                "channel_id": "5",
                "author": {"id": "9", "username": "someone"},
                "content": "hello there"
            }
        }),
    )
    .await;
    let message = tokio::time::timeout(Duration::from_secs(5), message_rx.recv())
        .await
        .expect("message handler in time")
        .expect("message handler ran");
    assert_eq!(message.content, "hello there");
    assert_eq!(message.author.username, "someone");

    drop(server);
    let result = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("session ends after peer goes away")
        .expect("run task");
    assert!(result.is_ok(), "run failed: {:?}", result);

    assert_eq!(ready_calls.load(Ordering::SeqCst), 1);
    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.state, ConnectionState::Closed);
    assert_eq!(snapshot.session_id.as_deref(), Some("sess-1"));
    assert_eq!(snapshot.last_sequence, Some(3));
    assert_eq!(snapshot.heartbeat_interval, Some(Duration::from_millis(41_250)));
    assert!(snapshot.last_round_trip.is_some());
    assert!(snapshot.has_client);
}

#[tokio::test]
async fn server_heartbeat_request_is_answered_immediately() {
    let (client_io, mut server) = duplex(64 * 1024);
    let timer = Arc::new(ManualTimer::new());
    let client = GatewayClient::new(factory(), "secret", HandlerRegistry::new()).with_timer(timer);
    let run = tokio::spawn(async move { client.run_on(WebSocket::new(client_io)).await });

    send(&mut server, json!({"op": 10, "d": {"heartbeat_interval": 1000}})).await;
    recv(&mut server).await;
    recv(&mut server).await;

    send(&mut server, json!({"op": 1, "s": 8, "d": null})).await;
    assert_eq!(recv(&mut server).await, json!({"op": 1, "d": 8}));

    drop(server);
    let result = run.await.expect("run task");
    assert!(result.is_ok(), "run failed: {:?}", result);
}

#[tokio::test]
async fn dispatch_before_ready_is_an_error() {
    let (client_io, mut server) = duplex(64 * 1024);
    let timer = Arc::new(ManualTimer::new());
    let handlers = HandlerRegistry::new().on("MESSAGE_CREATE", |_, _| async {});
    let client = GatewayClient::new(factory(), "secret", handlers).with_timer(timer);
    let session = client.session();
    let run = tokio::spawn(async move { client.run_on(WebSocket::new(client_io)).await });

    send(&mut server, json!({"op": 10, "d": {"heartbeat_interval": 1000}})).await;
    recv(&mut server).await;
    recv(&mut server).await;
    send(
        &mut server,
        json!({"op": 0, "t": "MESSAGE_CREATE", "s": 1, "d": {"id": "1"}}),
    )
    .await;

    let result = run.await.expect("run task");
    assert!(matches!(result, Err(GatewayError::IdentityNotEstablished)));
    assert_eq!(session.state().await, ConnectionState::Closed);
}

#[tokio::test]
async fn first_message_must_be_hello() {
    let (client_io, mut server) = duplex(4096);
    let client = GatewayClient::new(factory(), "secret", HandlerRegistry::new())
        .with_timer(Arc::new(ManualTimer::new()));
    let run = tokio::spawn(async move { client.run_on(WebSocket::new(client_io)).await });

    send(&mut server, json!({"op": 11, "d": null})).await;
    let result = run.await.expect("run task");
    assert!(matches!(result, Err(GatewayError::UnexpectedPayload(_))));
}

#[tokio::test]
async fn closed_before_hello_ends_quietly() {
    let (client_io, server) = duplex(4096);
    let client = GatewayClient::new(factory(), "secret", HandlerRegistry::new());
    let session = client.session();
    drop(server);

    let result = client.run_on(WebSocket::new(client_io)).await;
    assert!(result.is_ok());
    assert_eq!(session.state().await, ConnectionState::Closed);
}

#[tokio::test]
async fn hello_without_interval_closes_the_session() {
    let (client_io, mut server) = duplex(4096);
    let client = GatewayClient::new(factory(), "secret", HandlerRegistry::new())
        .with_timer(Arc::new(ManualTimer::new()));
    let session = client.session();
    let run = tokio::spawn(async move { client.run_on(WebSocket::new(client_io)).await });

    send(&mut server, json!({"op": 10, "d": {"interval": 5}})).await;
    let result = run.await.expect("run task");
    assert!(matches!(result, Err(GatewayError::Json(_))), "got {:?}", result);
    assert_eq!(session.state().await, ConnectionState::Closed);
}

#[tokio::test]
async fn slow_heartbeat_ack_is_recorded() {
    let (client_io, mut server) = duplex(64 * 1024);
    let timer = Arc::new(SteppingTimer {
        start: Instant::now(),
        calls: AtomicU32::new(0),
    });
    let client = GatewayClient::new(factory(), "secret", HandlerRegistry::new()).with_timer(timer);
    let session = client.session();
    let run = tokio::spawn(async move { client.run_on(WebSocket::new(client_io)).await });

    send(&mut server, json!({"op": 10, "d": {"heartbeat_interval": 45000}})).await;
    recv(&mut server).await;
    recv(&mut server).await;
    send(&mut server, json!({"op": 11, "d": null})).await;

    drop(server);
    let result = run.await.expect("run task");
    assert!(result.is_ok(), "run failed: {:?}", result);

    let snapshot = session.snapshot().await;
    let round_trip = snapshot.last_round_trip.expect("ack was measured");
    assert!(round_trip >= LATENCY_WARNING, "round trip {:?}", round_trip);
    assert!(!snapshot.heartbeat_pending);
}

#[tokio::test]
async fn second_connection_starts_without_previous_identity() {
    let timer = Arc::new(ManualTimer::new());
    let client = Arc::new(
        GatewayClient::new(factory(), "secret", HandlerRegistry::new()).with_timer(timer.clone()),
    );
    let session = client.session();

    let (client_io, mut server) = duplex(64 * 1024);
    let first = {
        let client = client.clone();
        tokio::spawn(async move { client.run_on(WebSocket::new(client_io)).await })
    };
    send(&mut server, json!({"op": 10, "d": {"heartbeat_interval": 1000}})).await;
    recv(&mut server).await;
    recv(&mut server).await;
    send(&mut server, ready_payload()).await;
    drop(server);
    let result = first.await.expect("first run task");
    assert!(result.is_ok(), "first run failed: {:?}", result);
    let snapshot = session.snapshot().await;
    assert!(snapshot.has_client);
    assert_eq!(snapshot.last_sequence, Some(1));

    let (client_io, mut server) = duplex(64 * 1024);
    let second = {
        let client = client.clone();
        tokio::spawn(async move { client.run_on(WebSocket::new(client_io)).await })
    };
    send(&mut server, json!({"op": 10, "d": {"heartbeat_interval": 1000}})).await;
    assert_eq!(recv(&mut server).await, json!({"op": 1, "d": null}));
    recv(&mut server).await;

    timer.release.add_permits(1);
    assert_eq!(recv(&mut server).await, json!({"op": 1, "d": null}));

    send(
        &mut server,
        json!({"op": 0, "t": "MESSAGE_CREATE", "s": 1, "d": {"id": "1"}}),
    )
    .await;
    let result = second.await.expect("second run task");
    assert!(matches!(result, Err(GatewayError::IdentityNotEstablished)), "got {:?}", result);

    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.state, ConnectionState::Closed);
    assert_eq!(snapshot.session_id, None);
    assert!(!snapshot.has_client);
}
