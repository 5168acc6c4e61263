use super::{Tool, ToolError, ToolInput};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Recalls what was said recently. Works on the session snapshot rather
/// than on call arguments.
pub struct RecentTranscripts {
    limit: usize,
}

impl Default for RecentTranscripts {
    fn default() -> Self {
        Self { limit: 10 }
    }
}

impl RecentTranscripts {
    pub fn with_limit(limit: usize) -> Self {
        Self { limit }
    }
}

#[async_trait]
impl Tool for RecentTranscripts {
    fn name(&self) -> &str {
        "recent_transcripts"
    }

    fn description(&self) -> &str {
        "Recall the most recent things the user and the assistant said in this conversation"
    }

    fn input(&self) -> ToolInput {
        ToolInput::SessionState
    }

    async fn invoke(&self, input: Value) -> Result<Option<Value>, ToolError> {
        let utterances = input
            .get("utterances")
            .and_then(Value::as_array)
            .ok_or_else(|| ToolError::InvalidParameters("missing session utterances".into()))?;

        if utterances.is_empty() {
            return Ok(None);
        }

        let skip = utterances.len().saturating_sub(self.limit);
        let recent: Vec<Value> = utterances
            .iter()
            .skip(skip)
            .map(|u| json!({ "speaker": u["speaker"], "text": u["text"] }))
            .collect();

        Ok(Some(json!({ "recent": recent })))
    }
}
