//! WebSocket transport tests against a server bound to an ephemeral port.

#![cfg(feature = "websocket")]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use stepguide::protocol::BoundingBox;
use stepguide::server::{ServerConfig, ServerState, WebSocketServer};
use stepguide::task::{Step, Task};
use stepguide::vision::{ScriptedAnalyzer, StaticDetector, Verdict};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const METADATA: &str = r#"{"timestamp": 1714564800.5, "width": 320, "height": 240}"#;
const JPEG: &[u8] = &[0xff, 0xd8, 0xff, 0xd9];

struct TestServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn start(config: ServerConfig, analyzer: ScriptedAnalyzer, detector: StaticDetector) -> TestServer {
    let state = Arc::new(ServerState::new(config, Arc::new(analyzer), Arc::new(detector)));
    let server = WebSocketServer::bind(state.clone()).await.unwrap();
    let addr = server.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(server.run_until(async {
        let _ = rx.await;
    }));
    TestServer {
        addr,
        state,
        shutdown: Some(tx),
    }
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .unwrap();
    client
}

async fn send_frame(client: &mut Client) {
    client.send(Message::text(METADATA.to_string())).await.unwrap();
    client.send(Message::binary(JPEG.to_vec())).await.unwrap();
}

async fn next_message(client: &mut Client) -> Message {
    tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("reply before timeout")
        .expect("stream open")
        .expect("valid message")
}

async fn next_json(client: &mut Client) -> Value {
    let message = next_message(client).await;
    serde_json::from_str(message.to_text().unwrap()).unwrap()
}

fn task() -> Task {
    Task::new(
        "pour a drink",
        vec![
            Step::new("pick up cup", vec!["cup".into()]),
            Step::new("pour water", vec!["cup".into(), "bottle".into()]),
        ],
    )
    .unwrap()
}

// ─── Replies ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_no_task_over_websocket() {
    let dir = tempfile::tempdir().unwrap();
    let server = start(
        ServerConfig::for_testing(dir.path()),
        ScriptedAnalyzer::new(),
        StaticDetector::new(),
    )
    .await;
    let mut client = connect(server.addr).await;

    send_frame(&mut client).await;
    let reply = next_json(&mut client).await;
    assert_eq!(reply["status"], "no_task");
}

#[tokio::test]
async fn test_task_progress_over_websocket() {
    let dir = tempfile::tempdir().unwrap();
    let server = start(
        ServerConfig::for_testing(dir.path()),
        ScriptedAnalyzer::new().then(Verdict::Completed),
        StaticDetector::new().with_box("cup", BoundingBox::new(0.1, 0.1, 0.3, 0.5)),
    )
    .await;
    server.state.activate_task(task(), 0);
    let mut client = connect(server.addr).await;

    send_frame(&mut client).await;
    let first = next_json(&mut client).await;
    assert_eq!(first["current_task_status"], "executing_task");
    assert_eq!(first["action"], "pick up cup");
    assert_eq!(first["objects"][0]["coordinates"]["x"], 0.2);
    assert_eq!(first["objects"][0]["coordinates"]["y"], 0.3);

    server.state.wait_idle().await;
    send_frame(&mut client).await;
    let second = next_json(&mut client).await;
    assert_eq!(second["current_task_status"], "completed_task");
    assert_eq!(second["action"], "pour water");
    assert_eq!(server.state.cursor().unwrap().index(), 1);
}

#[tokio::test]
async fn test_invalid_metadata_over_websocket() {
    let dir = tempfile::tempdir().unwrap();
    let server = start(
        ServerConfig::for_testing(dir.path()),
        ScriptedAnalyzer::new(),
        StaticDetector::new(),
    )
    .await;
    let mut client = connect(server.addr).await;

    client.send(Message::text("nope".to_string())).await.unwrap();
    let reply = next_json(&mut client).await;
    assert_eq!(reply["error"], "Invalid metadata format. Expected valid JSON.");
}

// ─── Closing ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_storage_failure_closes_with_1011() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("media");
    std::fs::write(&blocker, b"file").unwrap();
    let server = start(
        ServerConfig::for_testing(&blocker),
        ScriptedAnalyzer::new(),
        StaticDetector::new(),
    )
    .await;
    server.state.activate_task(task(), 0);
    let mut client = connect(server.addr).await;

    send_frame(&mut client).await;
    match next_message(&mut client).await {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 1011),
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_disconnect_unregisters_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let server = start(
        ServerConfig::for_testing(dir.path()),
        ScriptedAnalyzer::new(),
        StaticDetector::new(),
    )
    .await;
    let mut client = connect(server.addr).await;
    send_frame(&mut client).await;
    next_json(&mut client).await;
    assert_eq!(server.state.connection_count(), 1);

    client.close(None).await.unwrap();

    let frames_dir = server.state.config().frames_dir();
    let mut cleaned = false;
    for _ in 0..200 {
        let remaining = std::fs::read_dir(&frames_dir).map(|d| d.count()).unwrap_or(0);
        if server.state.connection_count() == 0 && remaining == 0 {
            cleaned = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(cleaned, "connection should be unregistered and its frames removed");
}

#[tokio::test]
async fn test_oversized_message_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ServerConfig::for_testing(dir.path());
    config.max_message_size = 1024;
    let server = start(config, ScriptedAnalyzer::new(), StaticDetector::new()).await;
    let mut client = connect(server.addr).await;

    client.send(Message::text(METADATA.to_string())).await.unwrap();
    let _ = client.send(Message::binary(vec![0u8; 64 * 1024])).await;

    let outcome = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("server reacts before timeout");
    assert!(!matches!(outcome, Some(Ok(Message::Text(_)))));
}
