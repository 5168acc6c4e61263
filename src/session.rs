//! Session controller: owns the socket and supervises the loops.
//!
//! `disconnected → connecting → handshaking → active → closing → closed`
//!
//! The socket has one writer (a task draining the outbound queue) and one
//! reader (the dispatch loop). Everything else sends through the queue.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use strum::Display;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;

use crate::audio::AudioStreams;
use crate::capture_pump::{CapturePump, PumpStats};
use crate::config::{ApiConfig, ConfigError, SessionConfig};
use crate::dispatcher::EventDispatcher;
use crate::error::{RealtimeError, Result};
use crate::frame_buffer::FrameReader;
use crate::protocol::{ClientEvent, SessionSettings};
use crate::state::SessionState;
use crate::tools::ToolRegistry;

const OUTBOUND_QUEUE: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionPhase {
    Disconnected,
    Connecting,
    Handshaking,
    Active,
    Closing,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Close frame or end of stream from the server
    ServerClosed,
    Transport(String),
    /// The outbound writer stopped, so nothing more can be sent
    WriterStopped,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    Acknowledged,
    /// No acknowledgment within the configured timeout; the session went on
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub reason: CloseReason,
    /// `None` when the session ended before becoming active
    pub handshake: Option<Handshake>,
    pub pump: PumpStats,
    pub tool_calls: usize,
}

pub struct RealtimeSession {
    config: SessionConfig,
    api: Option<ApiConfig>,
    tools: Arc<ToolRegistry>,
    state: Arc<SessionState>,
    phase: watch::Sender<SessionPhase>,
}

impl RealtimeSession {
    /// `api` may be omitted for endpoints that need no credentials
    pub fn new(config: SessionConfig, api: Option<ApiConfig>, tools: ToolRegistry) -> Self {
        let state = Arc::new(SessionState::new(config.max_retained_responses));
        let (phase, _) = watch::channel(SessionPhase::Disconnected);
        Self {
            config,
            api,
            tools: Arc::new(tools),
            state,
            phase,
        }
    }

    /// Shared state; the playback side takes its response store from here
    pub fn state(&self) -> Arc<SessionState> {
        Arc::clone(&self.state)
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.phase.subscribe()
    }

    fn set_phase(&self, phase: SessionPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            log::info!("Session {} → {}", previous, phase);
        }
    }

    /// Run the session until the socket closes or `cancel` fires.
    ///
    /// Only a transport failure before the session is configured is an
    /// error; everything after that ends with a [`SessionOutcome`].
    pub async fn run(
        &self,
        capture: FrameReader,
        hardware: Option<AudioStreams>,
        cancel: CancellationToken,
    ) -> Result<SessionOutcome> {
        self.set_phase(SessionPhase::Connecting);
        let socket = match self.connect().await {
            Ok(socket) => socket,
            Err(e) => {
                self.set_phase(SessionPhase::Closed);
                return Err(e);
            }
        };
        let (sink, stream) = socket.split();

        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let writer_stop = CancellationToken::new();
        let writer = tokio::spawn(write_loop(sink, outbound_rx, writer_stop.clone()));

        let dispatcher = EventDispatcher::new(
            Arc::clone(&self.state),
            Arc::clone(&self.tools),
            outbound.clone(),
        );
        let mut reader = tokio::spawn(read_loop(stream, dispatcher));

        self.set_phase(SessionPhase::Handshaking);
        let handshake = tokio::select! {
            result = self.handshake(&outbound) => result,
            finished = &mut reader => {
                let reason = reader_reason(finished);
                log::error!("Connection lost during handshake: {:?}", reason);
                self.shutdown(writer_stop, writer, hardware).await;
                return Err(RealtimeError::Handshake(format!("{:?}", reason)));
            }
            _ = cancel.cancelled() => {
                reader.abort();
                self.shutdown(writer_stop, writer, hardware).await;
                return Ok(self.outcome(CloseReason::Cancelled, None, PumpStats::default()));
            }
        };
        let handshake = match handshake {
            Ok(handshake) => handshake,
            Err(e) => {
                reader.abort();
                self.shutdown(writer_stop, writer, hardware).await;
                return Err(e);
            }
        };

        self.set_phase(SessionPhase::Active);
        let pump_cancel = cancel.child_token();
        let mut pump: JoinHandle<PumpStats> = tokio::spawn({
            let pump_cancel = pump_cancel.clone();
            let capture_pump = CapturePump::new(self.config.pump_interval);
            async move { capture_pump.run(capture, outbound, pump_cancel).await }
        });

        let mut pump_stats = None;
        // Cancel first: the pump stops on the same token and must not win the race
        let reason = tokio::select! {
            biased;
            _ = cancel.cancelled() => CloseReason::Cancelled,
            finished = &mut reader => reader_reason(finished),
            stats = &mut pump => {
                let stats = stats.unwrap_or_default();
                let reason = pump_reason(&stats);
                pump_stats = Some(stats);
                reason
            }
        };
        log::info!("Session ending: {:?}", reason);

        self.set_phase(SessionPhase::Closing);
        reader.abort();
        let pump_stats = match pump_stats {
            Some(stats) => stats,
            None => {
                pump_cancel.cancel();
                pump.await.unwrap_or_default()
            }
        };
        self.shutdown(writer_stop, writer, hardware).await;

        Ok(self.outcome(reason, Some(handshake), pump_stats))
    }

    async fn connect(&self) -> Result<WsStream> {
        let endpoint = self.config.endpoint()?;
        let mut request = endpoint.as_str().into_client_request()?;

        let headers = request.headers_mut();
        if let Some(api) = &self.api {
            let bearer = HeaderValue::from_str(&format!("Bearer {}", api.openai_key()))
                .map_err(|e| ConfigError::InvalidHeader(e.to_string()))?;
            headers.insert("Authorization", bearer);
        }
        headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        log::info!("🔌 Connecting to {}", endpoint.host_str().unwrap_or("realtime endpoint"));
        let (socket, response) = connect_async(request).await?;
        log::debug!("Handshake response status: {}", response.status());
        Ok(socket)
    }

    /// Send the session configuration and wait for its acknowledgment
    async fn handshake(&self, outbound: &mpsc::Sender<ClientEvent>) -> Result<Handshake> {
        let update = ClientEvent::SessionUpdate {
            session: SessionSettings::from_config(&self.config, self.tools.definitions()),
        };
        let reply_type = update.reply_type().unwrap_or("session.updated");

        // Registered before sending so the reply cannot slip past
        let ack = self.state.pending().register(reply_type);
        if outbound.send(update).await.is_err() {
            return Err(RealtimeError::Handshake(
                "connection closed before session.update was sent".into(),
            ));
        }
        log::info!(
            "Session configuration sent with {} tools: {:?}",
            self.tools.len(),
            self.tools.names()
        );

        match await_reply(ack, self.config.handshake_timeout).await {
            Some(Ok(_)) => {
                log::info!("✅ Session configured");
                Ok(Handshake::Acknowledged)
            }
            Some(Err(_)) => Err(RealtimeError::Handshake(
                "acknowledgment waiter dropped".into(),
            )),
            None => {
                log::warn!(
                    "No {} within {:?}, continuing with server defaults",
                    reply_type,
                    self.config.handshake_timeout
                );
                Ok(Handshake::TimedOut)
            }
        }
    }

    async fn shutdown(
        &self,
        writer_stop: CancellationToken,
        writer: JoinHandle<()>,
        hardware: Option<AudioStreams>,
    ) {
        self.set_phase(SessionPhase::Closing);
        writer_stop.cancel();
        if writer.await.is_err() {
            log::error!("Writer task panicked");
        }
        if let Some(hardware) = hardware {
            hardware.stop();
        }
        self.set_phase(SessionPhase::Closed);
    }

    fn outcome(
        &self,
        reason: CloseReason,
        handshake: Option<Handshake>,
        pump: PumpStats,
    ) -> SessionOutcome {
        SessionOutcome {
            reason,
            handshake,
            pump,
            tool_calls: self.state.tool_calls(),
        }
    }
}

/// `None` on timeout
async fn await_reply(
    reply: oneshot::Receiver<Value>,
    timeout: Option<Duration>,
) -> Option<std::result::Result<Value, oneshot::error::RecvError>> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, reply).await.ok(),
        None => Some(reply.await),
    }
}

/// Why the session ends when the capture pump finishes first
fn pump_reason(stats: &PumpStats) -> CloseReason {
    if stats.connection_closed {
        CloseReason::WriterStopped
    } else {
        CloseReason::Cancelled
    }
}

fn reader_reason(finished: std::result::Result<CloseReason, tokio::task::JoinError>) -> CloseReason {
    finished.unwrap_or_else(|e| CloseReason::Transport(format!("reader task failed: {}", e)))
}

/// Single writer for the socket
async fn write_loop<S>(mut sink: S, mut outbound: mpsc::Receiver<ClientEvent>, stop: CancellationToken)
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    loop {
        let event = tokio::select! {
            _ = stop.cancelled() => break,
            event = outbound.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let text = match event.to_json() {
            Ok(text) => text,
            Err(e) => {
                log::error!("Failed to encode outbound event: {}", e);
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(text.into())).await {
            log::warn!("Failed to send, writer stopping: {}", e);
            return;
        }
    }

    // Anything still queued is dropped; the socket is going away
    outbound.close();
    if let Err(e) = sink.close().await {
        log::debug!("Error closing socket: {}", e);
    }
    log::debug!("Writer stopped");
}

/// Single reader for the socket; messages are dispatched in arrival order
async fn read_loop<S>(mut stream: S, dispatcher: EventDispatcher) -> CloseReason
where
    S: Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let mut received = 0usize;
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                received += 1;
                log::trace!("Received message {}: {}", received, text.as_str());
                dispatcher.dispatch_text(text.as_str());
            }
            Ok(Message::Binary(data)) => {
                log::debug!("Ignoring binary frame ({} bytes)", data.len());
            }
            Ok(Message::Close(frame)) => {
                log::info!("Server closed connection: {:?}", frame);
                return CloseReason::ServerClosed;
            }
            Ok(_) => {}
            Err(e) => {
                log::error!("WebSocket error: {}", e);
                return CloseReason::Transport(e.to_string());
            }
        }
    }
    log::info!("Connection ended after {} messages", received);
    CloseReason::ServerClosed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_await_reply_resolves() {
        let (tx, rx) = oneshot::channel();
        tx.send(serde_json::json!({"type": "session.updated"})).unwrap();
        let reply = await_reply(rx, Some(Duration::from_millis(50))).await;
        assert!(matches!(reply, Some(Ok(_))));
    }

    #[tokio::test]
    async fn test_await_reply_times_out() {
        let (_tx, rx) = oneshot::channel::<Value>();
        let reply = await_reply(rx, Some(Duration::from_millis(10))).await;
        assert!(reply.is_none());
    }

    #[test]
    fn test_pump_reason() {
        let closed = PumpStats {
            connection_closed: true,
            ..PumpStats::default()
        };
        assert_eq!(pump_reason(&closed), CloseReason::WriterStopped);
        assert_eq!(pump_reason(&PumpStats::default()), CloseReason::Cancelled);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(SessionPhase::Handshaking.to_string(), "handshaking");
        let session = RealtimeSession::new(SessionConfig::default(), None, ToolRegistry::empty());
        assert_eq!(session.phase(), SessionPhase::Disconnected);
    }
}
