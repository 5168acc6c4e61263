//! Routing of inbound realtime events.
//!
//! Messages are handled one at a time in arrival order. Routing priority:
//! pending correlation, user transcription, function calls, input buffer
//! lifecycle, response lifecycle, remote errors, everything else.
//! Nothing routed here terminates the session.

use futures_util::FutureExt;
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::protocol::{
    decode_audio, ClientEvent, ConversationItem, InboundMessage, ProtocolError, ServerEvent,
};
use crate::state::{SessionState, Speaker};
use crate::tools::{ToolInput, ToolRegistry};

/// What the dispatcher did with a message
#[derive(Debug)]
pub enum Dispatched {
    /// Handed to a waiter registered for this reply type
    Correlated(String),
    UserTranscript(String),
    ToolInvoked {
        call_id: String,
        task: JoinHandle<()>,
    },
    /// Function call for a tool that is not registered
    ToolUnknown(String),
    /// Function call id that was already invoked
    ToolDuplicate(String),
    ItemCreated,
    InputAudioBuffer,
    Response,
    AssistantTranscript(String),
    RemoteError(String),
    Ignored(String),
    /// Protocol violation, message dropped
    Discarded(ProtocolError),
}

#[derive(Clone)]
pub struct EventDispatcher {
    state: Arc<SessionState>,
    tools: Arc<ToolRegistry>,
    outbound: mpsc::Sender<ClientEvent>,
}

impl EventDispatcher {
    pub fn new(
        state: Arc<SessionState>,
        tools: Arc<ToolRegistry>,
        outbound: mpsc::Sender<ClientEvent>,
    ) -> Self {
        Self {
            state,
            tools,
            outbound,
        }
    }

    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    /// Handle one text frame from the socket
    pub fn dispatch_text(&self, text: &str) -> Dispatched {
        match InboundMessage::parse(text) {
            Ok(message) => self.dispatch(message),
            Err(e) => {
                log::warn!("Discarding undecodable message: {}", e);
                Dispatched::Discarded(e)
            }
        }
    }

    pub fn dispatch(&self, message: InboundMessage) -> Dispatched {
        if self.state.pending().is_pending(&message.kind) {
            if self
                .state
                .pending()
                .resolve(&message.kind, message.body.clone())
            {
                log::debug!("Resolved pending request awaiting '{}'", message.kind);
                return Dispatched::Correlated(message.kind);
            }
            // Every waiter had gone away; route the message normally
            log::debug!("No live waiter for '{}'", message.kind);
        }

        let event = match message.decode() {
            Ok(event) => event,
            Err(e) => {
                log::warn!("Discarding malformed message: {}", e);
                return Dispatched::Discarded(e);
            }
        };

        match self.route(event, &message.kind) {
            Ok(dispatched) => dispatched,
            Err(e) => {
                log::warn!("Discarding '{}': {}", message.kind, e);
                Dispatched::Discarded(e)
            }
        }
    }

    fn route(&self, event: ServerEvent, kind: &str) -> Result<Dispatched, ProtocolError> {
        let dispatched = match event {
            ServerEvent::TranscriptionCompleted { transcript, .. } => {
                let transcript = transcript.trim().to_string();
                log::info!("👤 User: {}", transcript);
                self.state.record_utterance(Speaker::User, &transcript);
                Dispatched::UserTranscript(transcript)
            }

            ServerEvent::ItemCreated { item, .. } => match item {
                ConversationItem::FunctionCall {
                    call_id,
                    name,
                    arguments,
                    ..
                } => self.invoke_tool(call_id, name, arguments),
                other => {
                    log::debug!("Conversation item created: {:?}", other);
                    Dispatched::ItemCreated
                }
            },

            ServerEvent::SpeechStarted { audio_start_ms, .. } => {
                log::debug!("🎤 Speech started at {:?} ms", audio_start_ms);
                self.state.set_user_speaking(true);
                Dispatched::InputAudioBuffer
            }
            ServerEvent::SpeechStopped { audio_end_ms, .. } => {
                log::debug!("🎤 Speech stopped at {:?} ms", audio_end_ms);
                self.state.set_user_speaking(false);
                Dispatched::InputAudioBuffer
            }
            ServerEvent::AudioCommitted { item_id, .. } => {
                log::debug!("Input audio committed as item {:?}", item_id);
                Dispatched::InputAudioBuffer
            }
            ServerEvent::AudioCleared {} => {
                log::debug!("Input audio buffer cleared");
                Dispatched::InputAudioBuffer
            }

            ServerEvent::ResponseCreated { response } => {
                if self.state.lock_responses().create(&response.id) {
                    log::debug!("Response {} created", response.id);
                } else {
                    log::debug!("Response {} already known", response.id);
                }
                Dispatched::Response
            }
            ServerEvent::AudioDelta { response_id, delta } => {
                let bytes = decode_audio(&delta)?;
                let pending = self
                    .state
                    .lock_responses()
                    .append_audio(&response_id, &bytes)?;
                log::trace!(
                    "Response {}: +{} audio bytes ({} pending)",
                    response_id,
                    bytes.len(),
                    pending
                );
                Dispatched::Response
            }
            ServerEvent::AudioDone { response_id } => {
                self.state.lock_responses().finish_audio(&response_id)?;
                log::debug!("Response {} audio complete", response_id);
                Dispatched::Response
            }
            ServerEvent::TranscriptDelta { response_id, delta } => {
                self.state
                    .lock_responses()
                    .append_transcript(&response_id, &delta)?;
                Dispatched::Response
            }
            ServerEvent::TranscriptDone {
                response_id,
                transcript,
            } => {
                let text = self
                    .state
                    .lock_responses()
                    .finish_transcript(&response_id, transcript.as_deref())?;
                log::info!("🗣️  Assistant: {}", text);
                self.state.record_utterance(Speaker::Assistant, &text);
                Dispatched::AssistantTranscript(text)
            }
            ServerEvent::ResponseDone { response } => {
                let mut responses = self.state.lock_responses();
                if responses.get(&response.id).is_some() {
                    responses.finish(&response.id)?;
                }
                log::debug!("Response {} done ({:?})", response.id, response.status);
                Dispatched::Response
            }

            ServerEvent::Error { error } => {
                log::error!(
                    "Realtime API error ({}): {}",
                    error.code.as_deref().or(error.kind.as_deref()).unwrap_or("unknown"),
                    error.message
                );
                Dispatched::RemoteError(error.message)
            }
            ServerEvent::TranscriptionFailed { error, .. } => {
                log::warn!("Input transcription failed: {}", error.message);
                Dispatched::RemoteError(error.message)
            }

            ServerEvent::SessionCreated { .. } => {
                log::info!("Realtime session created");
                Dispatched::Ignored(kind.to_string())
            }
            ServerEvent::SessionUpdated { .. } | ServerEvent::RateLimitsUpdated { .. } => {
                log::debug!("Informational event '{}'", kind);
                Dispatched::Ignored(kind.to_string())
            }
            ServerEvent::Unknown => {
                log::debug!("Ignoring event '{}'", kind);
                Dispatched::Ignored(kind.to_string())
            }
        };
        Ok(dispatched)
    }

    fn invoke_tool(&self, call_id: String, name: String, arguments: String) -> Dispatched {
        let Some(tool) = self.tools.get(&name) else {
            log::warn!("No tool named '{}' for call {}, ignoring", name, call_id);
            return Dispatched::ToolUnknown(name);
        };
        if !self.state.claim_call(&call_id) {
            log::debug!("Call {} already invoked", call_id);
            return Dispatched::ToolDuplicate(call_id);
        }

        log::info!("🔧 Invoking tool '{}' (call {})", name, call_id);

        let input = match tool.input() {
            ToolInput::Arguments => parse_arguments(&arguments),
            ToolInput::SessionState => Ok(self.state.snapshot()),
        };
        let outbound = self.outbound.clone();
        let task_call_id = call_id.clone();

        let task = tokio::spawn(async move {
            let output = match input {
                // A panicking tool still owes the server an output for this call
                Ok(input) => match AssertUnwindSafe(tool.invoke(input)).catch_unwind().await {
                    Ok(Ok(Some(result))) => result,
                    Ok(Ok(None)) => Value::Null,
                    Ok(Err(e)) => {
                        log::error!("Tool '{}' failed: {}", name, e);
                        json!({ "error": e.to_string() })
                    }
                    Err(_) => {
                        log::error!("Tool '{}' panicked (call {})", name, task_call_id);
                        json!({ "error": format!("tool '{}' panicked", name) })
                    }
                },
                Err(reason) => {
                    log::warn!("Bad arguments for tool '{}': {}", name, reason);
                    json!({ "error": reason })
                }
            };

            let reply = ClientEvent::function_output(&task_call_id, &output);
            if outbound.send(reply).await.is_err()
                || outbound.send(ClientEvent::CreateResponse {}).await.is_err()
            {
                log::warn!(
                    "Connection closed, dropping output of '{}' (call {})",
                    name,
                    task_call_id
                );
                return;
            }
            log::debug!("Sent output of '{}' (call {})", name, task_call_id);
        });

        Dispatched::ToolInvoked { call_id, task }
    }
}

fn parse_arguments(arguments: &str) -> Result<Value, String> {
    if arguments.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(arguments).map_err(|e| format!("invalid arguments JSON: {}", e))
}
