//! Integration tests for the bridge over real loopback TCP connections.
//!
//! Each test starts a bridge task on `127.0.0.1:0` with a `RecordingEngine`
//! whose call counters are shared with the test through an `Arc`, then drives
//! it with plain `TcpStream` clients speaking the framed JSON protocol. The
//! tests cover what unit tests cannot: admission of a second connection,
//! partial frame delivery across writes, ordering of responses, and the
//! session teardown paths (client disconnect versus operator stop).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, timeout};

use pybridge_core::protocol::{encode_message, MAX_FRAME_BYTES};
use pybridge_server::application::engine::{EngineError, ExecutionEngine};
use pybridge_server::domain::config::ServerConfig;
use pybridge_server::domain::events::BridgeEvent;
use pybridge_server::infrastructure::bridge::{Bridge, BridgeHandle};

// ── Test engine ───────────────────────────────────────────────────────────────

/// Call counters shared between a test and the engine the bridge owns.
#[derive(Debug, Default)]
struct EngineProbe {
    initialize_calls: AtomicUsize,
    reset_calls: AtomicUsize,
}

impl EngineProbe {
    fn resets(&self) -> usize {
        self.reset_calls.load(Ordering::SeqCst)
    }
}

/// Always-ready engine with canned payloads.
struct RecordingEngine {
    probe: Arc<EngineProbe>,
}

impl ExecutionEngine for RecordingEngine {
    fn initialize(&mut self) -> Result<(), EngineError> {
        self.probe.initialize_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn shutdown(&mut self) {}

    fn is_ready(&self) -> bool {
        true
    }

    fn reset_session(&mut self) -> Result<(), EngineError> {
        self.probe.reset_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn execute_python(&mut self, code: &str) -> Result<Value, EngineError> {
        Ok(json!({"ok": true, "code": code}))
    }

    fn inspect_pipeline(&mut self) -> Result<Value, EngineError> {
        Ok(json!({"sources": []}))
    }

    fn capture_screenshot(&mut self, width: i64, height: i64) -> Result<Value, EngineError> {
        Ok(json!({"width": width, "height": height, "image_base64": "QUJD"}))
    }

    fn get_history(&mut self) -> Result<Value, EngineError> {
        Ok(json!([{
            "id": 1,
            "command": "execute_python",
            "timestamp": "2024-05-01T10:00:00Z",
            "status": "success",
            "has_snapshot": true,
        }]))
    }

    fn restore_snapshot(&mut self, entry_id: i64) -> Result<Value, EngineError> {
        Ok(json!({"ok": true, "restored_to": entry_id}))
    }
}

// ── Harness ───────────────────────────────────────────────────────────────────

struct TestServer {
    handle: BridgeHandle,
    addr: SocketAddr,
    probe: Arc<EngineProbe>,
    events: UnboundedReceiver<BridgeEvent>,
}

async fn start_server(token: &str) -> TestServer {
    let probe = Arc::new(EngineProbe::default());
    let engine = RecordingEngine {
        probe: Arc::clone(&probe),
    };

    let (bridge, handle, events) = Bridge::new(Box::new(engine));
    tokio::spawn(bridge.run());

    let addr = handle
        .start(ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            auth_token: token.to_string(),
        })
        .await
        .expect("bridge must start on an ephemeral loopback port");

    TestServer {
        handle,
        addr,
        probe,
        events,
    }
}

async fn send(stream: &mut TcpStream, message: &Value) {
    stream
        .write_all(&encode_message(message))
        .await
        .expect("write frame");
}

async fn read_response(stream: &mut TcpStream) -> Value {
    let mut prefix = [0u8; 4];
    timeout(Duration::from_secs(5), stream.read_exact(&mut prefix))
        .await
        .expect("response prefix within 5s")
        .expect("read prefix");
    let declared = u32::from_be_bytes(prefix) as usize;
    let mut payload = vec![0u8; declared];
    stream.read_exact(&mut payload).await.expect("read payload");
    serde_json::from_slice(&payload).expect("response is JSON")
}

/// Reads until EOF, asserting no further frame arrives first.
async fn expect_eof(stream: &mut TcpStream) {
    let mut byte = [0u8; 1];
    let n = timeout(Duration::from_secs(5), stream.read(&mut byte))
        .await
        .expect("EOF within 5s")
        .expect("read");
    assert_eq!(n, 0, "expected the server to close the connection");
}

fn hello_message(token: &str) -> Value {
    json!({
        "request_id": "hello-1",
        "type": "hello",
        "protocol_version": 2,
        "auth_token": token,
    })
}

/// Connects and completes the handshake.
async fn connected_client(server: &TestServer, token: &str) -> TcpStream {
    let mut stream = TcpStream::connect(server.addr).await.expect("connect");
    send(&mut stream, &hello_message(token)).await;
    let response = read_response(&mut stream).await;
    assert_eq!(response["status"], "success", "handshake must succeed");
    stream
}

async fn wait_until(what: &str, predicate: impl Fn() -> bool) {
    for _ in 0..500 {
        if predicate() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Drains events until one matches, or panics after a timeout.
async fn wait_for_event(
    events: &mut UnboundedReceiver<BridgeEvent>,
    what: &str,
    predicate: impl Fn(&BridgeEvent) -> bool,
) -> BridgeEvent {
    loop {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
            .unwrap_or_else(|| panic!("event channel closed waiting for {what}"));
        if predicate(&event) {
            return event;
        }
    }
}

// ── Handshake and commands ────────────────────────────────────────────────────

#[tokio::test]
async fn test_handshake_then_ping_round_trip() {
    let mut server = start_server("secret").await;
    let mut client = TcpStream::connect(server.addr).await.expect("connect");

    // Step 1: hello with the correct version and token.
    send(&mut client, &hello_message("secret")).await;
    let response = read_response(&mut client).await;

    assert_eq!(response["request_id"], "hello-1");
    assert_eq!(response["status"], "success");
    assert_eq!(response["result"]["protocol_version"], 2);
    assert_eq!(response["result"]["python_ready"], true);
    assert_eq!(
        response["result"]["capabilities"],
        json!(["ping", "execute_python", "inspect_pipeline", "capture_screenshot"])
    );

    // Step 2: a post-handshake ping echoes its request id.
    send(&mut client, &json!({"request_id": "ping-7", "type": "ping"})).await;
    let response = read_response(&mut client).await;

    assert_eq!(response["request_id"], "ping-7");
    assert_eq!(response["status"], "success");
    assert_eq!(response["result"], json!({"ok": true}));

    // The operator console saw the connection happen.
    wait_for_event(&mut server.events, "client-connected status", |e| {
        matches!(e, BridgeEvent::StatusChanged(s) if s == "Client connected")
    })
    .await;
}

#[tokio::test]
async fn test_wrong_token_is_rejected_and_connection_closed() {
    let server = start_server("secret").await;
    let mut client = TcpStream::connect(server.addr).await.expect("connect");

    send(&mut client, &hello_message("wrong")).await;
    let response = read_response(&mut client).await;

    assert_eq!(response["status"], "error");
    assert_eq!(response["error"]["code"], "AUTH_FAILED");
    expect_eof(&mut client).await;
}

#[tokio::test]
async fn test_non_hello_first_message_is_fatal() {
    let server = start_server("secret").await;
    let mut client = TcpStream::connect(server.addr).await.expect("connect");

    send(&mut client, &json!({"request_id": "p1", "type": "ping"})).await;
    let response = read_response(&mut client).await;

    assert_eq!(response["error"]["code"], "HANDSHAKE_REQUIRED");
    expect_eof(&mut client).await;
}

#[tokio::test]
async fn test_execute_python_round_trip_emits_history_event() {
    let mut server = start_server("secret").await;
    let mut client = connected_client(&server, "secret").await;

    send(
        &mut client,
        &json!({
            "request_id": "exec-1",
            "type": "execute_python",
            "params": {"code": "x = 1 + 1"},
        }),
    )
    .await;
    let response = read_response(&mut client).await;

    assert_eq!(response["request_id"], "exec-1");
    assert_eq!(response["result"]["ok"], true);
    assert_eq!(response["result"]["code"], "x = 1 + 1");

    let event = wait_for_event(&mut server.events, "history event", |e| {
        matches!(e, BridgeEvent::HistoryChanged(_))
    })
    .await;
    match event {
        BridgeEvent::HistoryChanged(history) => {
            assert!(history.contains("execute_python"));
        }
        other => panic!("expected HistoryChanged, got {other:?}"),
    }
}

#[tokio::test]
async fn test_restore_snapshot_round_trip_refreshes_history() {
    let mut server = start_server("secret").await;
    let mut client = connected_client(&server, "secret").await;

    send(
        &mut client,
        &json!({
            "request_id": "res-1",
            "type": "restore_snapshot",
            "params": {"entry_id": 3},
        }),
    )
    .await;
    let response = read_response(&mut client).await;

    assert_eq!(response["status"], "success");
    assert_eq!(response["result"]["restored_to"], 3);

    wait_for_event(&mut server.events, "refreshed history event", |e| {
        matches!(e, BridgeEvent::HistoryChanged(h) if !h.is_empty())
    })
    .await;
}

// ── Admission ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_second_connection_receives_client_busy_and_first_stays_usable() {
    let server = start_server("secret").await;
    let mut first = connected_client(&server, "secret").await;

    // A concurrent connection gets exactly one CLIENT_BUSY and is closed
    // without ever reaching the handshake.
    let mut second = TcpStream::connect(server.addr).await.expect("connect");
    let rejection = read_response(&mut second).await;
    assert_eq!(rejection["request_id"], "");
    assert_eq!(rejection["status"], "error");
    assert_eq!(rejection["error"]["code"], "CLIENT_BUSY");
    expect_eof(&mut second).await;

    // The attached session is unaffected.
    send(&mut first, &json!({"request_id": "after", "type": "ping"})).await;
    let response = read_response(&mut first).await;
    assert_eq!(response["request_id"], "after");
    assert_eq!(response["status"], "success");
}

// ── Framing over the wire ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_frame_split_across_many_writes_is_reassembled() {
    let server = start_server("secret").await;
    let mut client = TcpStream::connect(server.addr).await.expect("connect");

    let frame = encode_message(&hello_message("secret"));
    for chunk in frame.chunks(3) {
        client.write_all(chunk).await.expect("write chunk");
        client.flush().await.expect("flush");
        sleep(Duration::from_millis(2)).await;
    }

    let response = read_response(&mut client).await;
    assert_eq!(response["status"], "success");
}

#[tokio::test]
async fn test_two_frames_in_one_write_are_answered_in_order() {
    let server = start_server("secret").await;
    let mut client = connected_client(&server, "secret").await;

    let mut bytes = encode_message(&json!({"request_id": "a", "type": "ping"}));
    bytes.extend_from_slice(&encode_message(&json!({"request_id": "b", "type": "ping"})));
    client.write_all(&bytes).await.expect("write both frames");

    let first = read_response(&mut client).await;
    let second = read_response(&mut client).await;
    assert_eq!(first["request_id"], "a");
    assert_eq!(second["request_id"], "b");
}

#[tokio::test]
async fn test_oversized_frame_is_fatal_protocol_error() {
    let server = start_server("secret").await;
    let mut client = TcpStream::connect(server.addr).await.expect("connect");

    let declared = MAX_FRAME_BYTES + 1;
    client
        .write_all(&declared.to_be_bytes())
        .await
        .expect("write oversized prefix");

    let response = read_response(&mut client).await;
    assert_eq!(response["error"]["code"], "PROTOCOL_ERROR");
    expect_eof(&mut client).await;
}

// ── Session teardown ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_disconnect_resets_engine_exactly_once() {
    let server = start_server("secret").await;
    let client = connected_client(&server, "secret").await;

    // The handshake itself performs one reset.
    assert_eq!(server.probe.resets(), 1);

    drop(client);

    let probe = Arc::clone(&server.probe);
    wait_until("the disconnect reset", move || probe.resets() == 2).await;

    // No further resets trail in.
    sleep(Duration::from_millis(50)).await;
    assert_eq!(server.probe.resets(), 2, "disconnect must reset exactly once");
}

#[tokio::test]
async fn test_stop_closes_client_without_final_message_or_engine_reset() {
    let server = start_server("secret").await;
    let mut client = connected_client(&server, "secret").await;
    assert_eq!(server.probe.resets(), 1);

    server.handle.stop().await;

    // The very next read is EOF: no farewell frame was sent.
    expect_eof(&mut client).await;

    // A full stop is not a protocol reset.
    sleep(Duration::from_millis(50)).await;
    assert_eq!(server.probe.resets(), 1, "stop must not reset the engine");
}

#[tokio::test]
async fn test_restart_replaces_config_and_evicts_the_client() {
    let server = start_server("alpha").await;
    let mut old_client = connected_client(&server, "alpha").await;

    // Restarting with a new config implicitly stops the old listener and
    // force-closes the attached session.
    let new_addr = server
        .handle
        .start(ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            auth_token: "beta".to_string(),
        })
        .await
        .expect("restart");

    expect_eof(&mut old_client).await;

    // The replacement config is in force: the old token is now rejected...
    let mut stale = TcpStream::connect(new_addr).await.expect("connect");
    send(&mut stale, &hello_message("alpha")).await;
    let response = read_response(&mut stale).await;
    assert_eq!(response["error"]["code"], "AUTH_FAILED");
    expect_eof(&mut stale).await;

    // ...and the new token works.
    let mut fresh = TcpStream::connect(new_addr).await.expect("connect");
    send(&mut fresh, &hello_message("beta")).await;
    let response = read_response(&mut fresh).await;
    assert_eq!(response["status"], "success");
}
