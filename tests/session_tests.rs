//! Session controller against an in-process mock realtime server.
//!
//! The mock accepts one websocket connection on a random local port and runs
//! a scripted conversation. No audio devices are opened.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use realtime_edge_rs::config::{ApiConfig, SessionConfig};
use realtime_edge_rs::frame_buffer::frame_buffer;
use realtime_edge_rs::session::{
    CloseReason, Handshake, RealtimeSession, SessionOutcome, SessionPhase,
};
use realtime_edge_rs::tools::{create_default_registry, ToolRegistry};
use realtime_edge_rs::RealtimeError;

type ServerSocket = WebSocketStream<TcpStream>;

#[derive(Debug, Default, Clone)]
struct SeenHeaders {
    authorization: Option<String>,
    beta: Option<String>,
}

async fn mock_server<F, Fut>(script: F) -> (SocketAddr, Arc<Mutex<SeenHeaders>>, JoinHandle<()>)
where
    F: FnOnce(ServerSocket) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(SeenHeaders::default()));

    let handle = tokio::spawn({
        let seen = Arc::clone(&seen);
        async move {
            let (stream, _) = listener.accept().await.unwrap();
            let callback = |req: &Request, response: Response| {
                let header = |name: &str| {
                    req.headers()
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string)
                };
                let mut seen = seen.lock().unwrap();
                seen.authorization = header("Authorization");
                seen.beta = header("OpenAI-Beta");
                Ok(response)
            };
            let ws = tokio_tungstenite::accept_hdr_async(stream, callback)
                .await
                .unwrap();
            script(ws).await;
        }
    });
    (addr, seen, handle)
}

/// Next client event of `kind`, skipping everything else (audio appends)
async fn expect_event(ws: &mut ServerSocket, kind: &str) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for client event")
            .expect("client hung up")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            let value: Value = serde_json::from_str(text.as_str()).unwrap();
            if value["type"] == kind {
                return value;
            }
        }
    }
}

async fn send(ws: &mut ServerSocket, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn hang_up(mut ws: ServerSocket) {
    let _ = ws.close(None).await;
    while let Some(Ok(_)) = ws.next().await {}
}

fn test_config(addr: SocketAddr) -> SessionConfig {
    SessionConfig {
        url: format!("ws://{}", addr),
        model: String::new(),
        pump_interval: Duration::from_millis(5),
        handshake_timeout: Some(Duration::from_secs(2)),
        ..SessionConfig::default()
    }
}

#[test_log::test(tokio::test)]
async fn test_handshake_tool_round_trip_and_server_close() {
    let (update_tx, update_rx) = oneshot::channel();
    let (output_tx, output_rx) = oneshot::channel();

    let (addr, seen, server) = mock_server(|mut ws| async move {
        let update = expect_event(&mut ws, "session.update").await;
        send(&mut ws, json!({"type": "session.updated", "session": update["session"]})).await;
        update_tx.send(update).unwrap();

        send(
            &mut ws,
            json!({
                "type": "conversation.item.created",
                "item": {
                    "id": "item_1",
                    "type": "function_call",
                    "call_id": "call_1",
                    "name": "calculate_future_time",
                    "arguments": "{\"hours\": 1, \"minutes\": 0}"
                }
            }),
        )
        .await;
        let output = expect_event(&mut ws, "conversation.item.create").await;
        expect_event(&mut ws, "response.create").await;
        output_tx.send(output).unwrap();

        send(&mut ws, json!({"type": "response.created", "response": {"id": "r1"}})).await;
        send(
            &mut ws,
            json!({
                "type": "response.audio.delta",
                "response_id": "r1",
                "delta": BASE64.encode([1u8, 2, 3, 4])
            }),
        )
        .await;
        hang_up(ws).await;
    })
    .await;

    let api = ApiConfig::from_key("sk-test-key".to_string()).unwrap();
    let session = RealtimeSession::new(
        test_config(addr),
        Some(api),
        create_default_registry().build(),
    );
    let state = session.state();
    let (_writer, reader) = frame_buffer(1024);

    let outcome = session
        .run(reader, None, CancellationToken::new())
        .await
        .unwrap();
    server.await.unwrap();

    assert_eq!(outcome.reason, CloseReason::ServerClosed);
    assert_eq!(outcome.handshake, Some(Handshake::Acknowledged));
    assert_eq!(outcome.tool_calls, 1);
    assert_eq!(session.phase(), SessionPhase::Closed);

    let update = update_rx.await.unwrap();
    assert_eq!(update["session"]["input_audio_format"], "pcm16");
    assert_eq!(update["session"]["turn_detection"]["type"], "server_vad");
    let tool_names: Vec<&str> = update["session"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert!(tool_names.contains(&"calculate_future_time"));

    let output = output_rx.await.unwrap();
    assert_eq!(output["item"]["call_id"], "call_1");
    let result: Value = serde_json::from_str(output["item"]["output"].as_str().unwrap()).unwrap();
    assert_eq!(result["hours"], 1);

    assert_eq!(state.lock_responses().get("r1").unwrap().pending_audio(), 4);

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.authorization.as_deref(), Some("Bearer sk-test-key"));
    assert_eq!(seen.beta.as_deref(), Some("realtime=v1"));
}

#[test_log::test(tokio::test)]
async fn test_handshake_timeout_proceeds() {
    let (addr, seen, server) = mock_server(|mut ws| async move {
        expect_event(&mut ws, "session.update").await;
        // Never acknowledge; keep the socket open past the timeout
        tokio::time::sleep(Duration::from_millis(200)).await;
        send(&mut ws, json!({"type": "response.created", "response": {"id": "late"}})).await;
        hang_up(ws).await;
    })
    .await;

    let config = SessionConfig {
        handshake_timeout: Some(Duration::from_millis(50)),
        ..test_config(addr)
    };
    let session = RealtimeSession::new(config, None, ToolRegistry::empty());
    let (_writer, reader) = frame_buffer(64);

    let outcome = session
        .run(reader, None, CancellationToken::new())
        .await
        .unwrap();
    server.await.unwrap();

    assert_eq!(outcome.handshake, Some(Handshake::TimedOut));
    assert_eq!(outcome.reason, CloseReason::ServerClosed);
    assert!(session.state().lock_responses().get("late").is_some());
    assert!(seen.lock().unwrap().authorization.is_none());
}

#[test_log::test(tokio::test)]
async fn test_close_during_handshake_is_an_error() {
    let (addr, _seen, server) = mock_server(|mut ws| async move {
        expect_event(&mut ws, "session.update").await;
        hang_up(ws).await;
    })
    .await;

    let config = SessionConfig {
        handshake_timeout: None,
        ..test_config(addr)
    };
    let session = RealtimeSession::new(config, None, ToolRegistry::empty());
    let (_writer, reader) = frame_buffer(64);

    let result = session.run(reader, None, CancellationToken::new()).await;
    server.await.unwrap();

    assert!(matches!(result, Err(RealtimeError::Handshake(_))));
    assert_eq!(session.phase(), SessionPhase::Closed);
}

/// Stream one capture chunk, then cancel once the server has seen it
async fn stream_then_cancel() -> (SessionOutcome, Vec<u8>, SessionPhase) {
    let (audio_tx, audio_rx) = oneshot::channel();

    let (addr, _seen, server) = mock_server(|mut ws| async move {
        expect_event(&mut ws, "session.update").await;
        send(&mut ws, json!({"type": "session.updated", "session": {}})).await;

        let append = expect_event(&mut ws, "input_audio_buffer.append").await;
        let audio = BASE64.decode(append["audio"].as_str().unwrap()).unwrap();
        audio_tx.send(audio).unwrap();

        // Wait for the client to close its side
        while let Some(Ok(frame)) = ws.next().await {
            if let Message::Close(_) = frame {
                break;
            }
        }
    })
    .await;

    let session = RealtimeSession::new(test_config(addr), None, ToolRegistry::empty());
    let mut phases = session.subscribe();
    let (mut writer, reader) = frame_buffer(64);
    writer.push(&[5, 6, 7, 8]);

    let cancel = CancellationToken::new();
    let canceller = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let audio = audio_rx.await.unwrap();
            cancel.cancel();
            audio
        }
    });

    let outcome = session.run(reader, None, cancel).await.unwrap();
    let audio = canceller.await.unwrap();
    server.await.unwrap();

    assert!(phases.has_changed().unwrap());
    let phase = *phases.borrow_and_update();
    (outcome, audio, phase)
}

#[test_log::test(tokio::test)]
async fn test_capture_is_streamed_until_cancelled() {
    let (outcome, audio, phase) = stream_then_cancel().await;

    assert_eq!(audio, vec![5, 6, 7, 8]);
    assert_eq!(outcome.reason, CloseReason::Cancelled);
    assert_eq!(outcome.pump.bytes_sent, 4);
    assert!(!outcome.pump.connection_closed);
    assert_eq!(phase, SessionPhase::Closed);
}

#[test_log::test(tokio::test)]
async fn test_cancel_is_never_reported_as_writer_stop() {
    // The pump stops on the same token, so both finish together every time
    for _ in 0..25 {
        let (outcome, _, _) = stream_then_cancel().await;
        assert_eq!(outcome.reason, CloseReason::Cancelled);
    }
}

#[test_log::test(tokio::test)]
async fn test_unreachable_endpoint_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let session = RealtimeSession::new(test_config(addr), None, ToolRegistry::empty());
    let (_writer, reader) = frame_buffer(64);
    let result = session.run(reader, None, CancellationToken::new()).await;

    assert!(matches!(result, Err(RealtimeError::WebSocket(_))));
    assert_eq!(session.phase(), SessionPhase::Closed);
}
