//! JSON wire protocol spoken with the realtime service.
//!
//! Inbound messages are decoded in two steps: the raw `type` string is
//! extracted first (request correlation works on it), then the message is
//! decoded into a typed [`ServerEvent`]. Types we do not model decode to
//! [`ServerEvent::Unknown`] and are never an error.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::SessionConfig;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("Message has no 'type' field")]
    MissingType,

    #[error("Malformed '{kind}' event: {source}")]
    Malformed {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Event references unknown response '{0}'")]
    UnknownResponse(String),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// A raw inbound message with its `type` already extracted
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub kind: String,
    pub body: Value,
}

impl InboundMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let body: Value = serde_json::from_str(text).map_err(ProtocolError::InvalidJson)?;
        Self::from_value(body)
    }

    pub fn from_value(body: Value) -> Result<Self, ProtocolError> {
        let kind = body
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?
            .to_string();
        Ok(Self { kind, body })
    }

    /// Decode into a typed event. Unmodelled types become `ServerEvent::Unknown`.
    pub fn decode(&self) -> Result<ServerEvent, ProtocolError> {
        ServerEvent::deserialize(&self.body).map_err(|source| ProtocolError::Malformed {
            kind: self.kind.clone(),
            source,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ApiError {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub param: Option<String>,
    #[serde(default)]
    pub event_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseInfo {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Conversation items that can appear in `conversation.item.*` events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConversationItem {
    #[serde(rename = "message")]
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        role: String,
        #[serde(default)]
        content: Vec<Value>,
    },

    #[serde(rename = "function_call")]
    FunctionCall {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        call_id: String,
        name: String,
        #[serde(default)]
        arguments: String,
    },

    #[serde(rename = "function_call_output")]
    FunctionCallOutput { call_id: String, output: String },

    #[serde(other)]
    Other,
}

/// Inbound events we act on
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: Value,
    },

    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        session: Value,
    },

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: Option<u64>,
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        #[serde(default)]
        audio_end_ms: Option<u64>,
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(rename = "input_audio_buffer.committed")]
    AudioCommitted {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        previous_item_id: Option<String>,
    },

    #[serde(rename = "input_audio_buffer.cleared")]
    AudioCleared {},

    #[serde(rename = "conversation.item.created")]
    ItemCreated {
        item: ConversationItem,
        #[serde(default)]
        previous_item_id: Option<String>,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        #[serde(default)]
        item_id: Option<String>,
        transcript: String,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    TranscriptionFailed {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        error: ApiError,
    },

    #[serde(rename = "response.created")]
    ResponseCreated { response: ResponseInfo },

    #[serde(rename = "response.done")]
    ResponseDone { response: ResponseInfo },

    #[serde(rename = "response.audio.delta")]
    AudioDelta { response_id: String, delta: String },

    #[serde(rename = "response.audio.done")]
    AudioDone { response_id: String },

    #[serde(rename = "response.audio_transcript.delta")]
    TranscriptDelta { response_id: String, delta: String },

    #[serde(rename = "response.audio_transcript.done")]
    TranscriptDone {
        response_id: String,
        #[serde(default)]
        transcript: Option<String>,
    },

    #[serde(rename = "rate_limits.updated")]
    RateLimitsUpdated {
        #[serde(default)]
        rate_limits: Vec<Value>,
    },

    #[serde(rename = "error")]
    Error { error: ApiError },

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptionSettings {
    pub model: String,
}

/// Payload of `session.update`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSettings {
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub turn_detection: TurnDetection,
    pub temperature: f32,
    pub input_audio_transcription: TranscriptionSettings,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

impl SessionSettings {
    pub fn from_config(config: &SessionConfig, tools: Vec<Value>) -> Self {
        let tool_choice = (!tools.is_empty()).then(|| "auto".to_string());
        Self {
            modalities: vec!["text".to_string(), "audio".to_string()],
            instructions: config.instructions.clone(),
            voice: config.voice.clone(),
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            turn_detection: TurnDetection {
                kind: "server_vad".to_string(),
                threshold: config.turn_detection.threshold,
                prefix_padding_ms: config.turn_detection.prefix_padding_ms,
                silence_duration_ms: config.turn_detection.silence_duration_ms,
            },
            temperature: config.temperature,
            input_audio_transcription: TranscriptionSettings {
                model: config.transcription_model.clone(),
            },
            tools,
            tool_choice,
        }
    }
}

/// Outbound events
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionSettings },

    #[serde(rename = "input_audio_buffer.append")]
    AppendAudio { audio: String },

    #[serde(rename = "conversation.item.create")]
    CreateItem { item: ConversationItem },

    #[serde(rename = "response.create")]
    CreateResponse {},
}

impl ClientEvent {
    /// Reply type the server acknowledges this event with, if any
    pub fn reply_type(&self) -> Option<&'static str> {
        match self {
            ClientEvent::SessionUpdate { .. } => Some("session.updated"),
            _ => None,
        }
    }

    pub fn append_audio(pcm: &[u8]) -> Self {
        ClientEvent::AppendAudio {
            audio: BASE64.encode(pcm),
        }
    }

    pub fn function_output(call_id: impl Into<String>, output: &Value) -> Self {
        ClientEvent::CreateItem {
            item: ConversationItem::FunctionCallOutput {
                call_id: call_id.into(),
                output: output.to_string(),
            },
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Decode a base64 audio payload
pub fn decode_audio(delta: &str) -> Result<Vec<u8>, ProtocolError> {
    Ok(BASE64.decode(delta)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: Value) -> ServerEvent {
        InboundMessage::from_value(value).unwrap().decode().unwrap()
    }

    #[test]
    fn test_parse_extracts_type() {
        let msg = InboundMessage::parse(r#"{"type":"session.updated","session":{}}"#).unwrap();
        assert_eq!(msg.kind, "session.updated");
    }

    #[test]
    fn test_parse_rejects_missing_type() {
        let err = InboundMessage::parse(r#"{"event_id":"x"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingType));
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        let err = InboundMessage::parse("{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidJson(_)));
    }

    #[test]
    fn test_unknown_type_decodes_to_unknown() {
        let event = decode(json!({"type": "response.content_part.added", "part": {}}));
        assert_eq!(event, ServerEvent::Unknown);
    }

    #[test]
    fn test_known_type_with_bad_fields_is_malformed() {
        let msg = InboundMessage::from_value(json!({
            "type": "response.audio.delta",
            "response_id": 42
        }))
        .unwrap();
        assert!(matches!(msg.decode(), Err(ProtocolError::Malformed { .. })));
    }

    #[test]
    fn test_decode_function_call_item() {
        let event = decode(json!({
            "type": "conversation.item.created",
            "event_id": "evt_1",
            "previous_item_id": null,
            "item": {
                "id": "item_1",
                "type": "function_call",
                "status": "completed",
                "call_id": "call_1",
                "name": "get_time",
                "arguments": "{}"
            }
        }));
        match event {
            ServerEvent::ItemCreated {
                item: ConversationItem::FunctionCall { call_id, name, .. },
                ..
            } => {
                assert_eq!(call_id, "call_1");
                assert_eq!(name, "get_time");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_decode_other_item_type() {
        let event = decode(json!({
            "type": "conversation.item.created",
            "item": {"type": "reasoning", "id": "r"}
        }));
        assert!(matches!(
            event,
            ServerEvent::ItemCreated {
                item: ConversationItem::Other,
                ..
            }
        ));
    }

    #[test]
    fn test_decode_cleared_ignores_extra_fields() {
        let event = decode(json!({"type": "input_audio_buffer.cleared", "event_id": "e"}));
        assert_eq!(event, ServerEvent::AudioCleared {});
    }

    #[test]
    fn test_session_update_serialization() {
        let config = SessionConfig::default();
        let tools = vec![json!({"type": "function", "name": "get_time"})];
        let event = ClientEvent::SessionUpdate {
            session: SessionSettings::from_config(&config, tools),
        };
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "session.update");
        assert_eq!(value["session"]["voice"], "alloy");
        assert_eq!(value["session"]["turn_detection"]["type"], "server_vad");
        assert_eq!(value["session"]["input_audio_transcription"]["model"], "whisper-1");
        assert_eq!(value["session"]["tools"][0]["name"], "get_time");
        assert_eq!(value["session"]["tool_choice"], "auto");
        assert_eq!(event.reply_type(), Some("session.updated"));
    }

    #[test]
    fn test_session_update_without_tools_omits_tool_fields() {
        let settings = SessionSettings::from_config(&SessionConfig::default(), Vec::new());
        let value = serde_json::to_value(&settings).unwrap();
        assert!(value.get("tools").is_none());
        assert!(value.get("tool_choice").is_none());
    }

    #[test]
    fn test_function_output_serialization() {
        let event = ClientEvent::function_output("call_9", &json!({"ok": true}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "conversation.item.create");
        assert_eq!(value["item"]["type"], "function_call_output");
        assert_eq!(value["item"]["call_id"], "call_9");
        assert_eq!(value["item"]["output"], r#"{"ok":true}"#);
    }

    #[test]
    fn test_response_create_serialization() {
        let value = serde_json::to_value(ClientEvent::CreateResponse {}).unwrap();
        assert_eq!(value, json!({"type": "response.create"}));
    }

    #[test]
    fn test_append_audio_is_base64() {
        let event = ClientEvent::append_audio(&[1, 2, 3, 4]);
        match event {
            ClientEvent::AppendAudio { audio } => {
                assert_eq!(decode_audio(&audio).unwrap(), vec![1, 2, 3, 4]);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
