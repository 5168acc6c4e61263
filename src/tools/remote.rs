//! Tools backed by an external HTTP service.
//!
//! Capabilities that live outside this process (motor control, camera,
//! vision models) are described in a JSON manifest and called by POSTing
//! the tool input to their endpoint.

use super::{Tool, ToolError, ToolInput};
use crate::config::ConfigError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn default_parameters() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

fn default_timeout_secs() -> u64 {
    30
}

/// One manifest entry
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteToolSpec {
    pub name: String,
    pub description: String,
    #[serde(default = "default_parameters")]
    pub parameters: Value,
    pub endpoint: String,
    #[serde(default)]
    pub input: ToolInput,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

pub struct HttpTool {
    spec: RemoteToolSpec,
    client: Client,
}

impl HttpTool {
    pub fn new(spec: RemoteToolSpec) -> Result<Self, ToolError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(spec.timeout_secs))
            .build()?;
        Ok(Self { spec, client })
    }

    pub fn endpoint(&self) -> &str {
        &self.spec.endpoint
    }
}

#[async_trait]
impl Tool for HttpTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn parameters(&self) -> Value {
        self.spec.parameters.clone()
    }

    fn input(&self) -> ToolInput {
        self.spec.input
    }

    async fn invoke(&self, input: Value) -> Result<Option<Value>, ToolError> {
        log::debug!("Calling remote tool '{}' at {}", self.spec.name, self.spec.endpoint);

        let response = self
            .client
            .post(&self.spec.endpoint)
            .json(&input)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ToolError::Timeout(format!("{} after {}s", self.spec.name, self.spec.timeout_secs))
                } else {
                    ToolError::Request(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ToolError::ExecutionFailed(format!(
                "{} returned {}: {}",
                self.spec.name, status, body
            )));
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        let value = serde_json::from_str(&body)
            .unwrap_or(Value::String(body));
        Ok(match value {
            Value::Null => None,
            other => Some(other),
        })
    }
}

/// Parse manifest JSON (an array of tool entries)
pub fn parse_manifest(json: &str) -> Result<Vec<RemoteToolSpec>, serde_json::Error> {
    serde_json::from_str(json)
}

/// Load every tool in a manifest file
pub fn load_manifest(path: &Path) -> Result<Vec<Arc<dyn Tool>>, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidManifest {
        path: path.display().to_string(),
        reason,
    };

    let contents = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
    let specs = parse_manifest(&contents).map_err(|e| invalid(e.to_string()))?;

    let mut tools: Vec<Arc<dyn Tool>> = Vec::with_capacity(specs.len());
    for spec in specs {
        url::Url::parse(&spec.endpoint)
            .map_err(|e| invalid(format!("tool '{}': {}", spec.name, e)))?;
        let tool = HttpTool::new(spec).map_err(|e| invalid(e.to_string()))?;
        log::info!("🔧 Loaded remote tool '{}' -> {}", tool.name(), tool.endpoint());
        tools.push(Arc::new(tool));
    }
    Ok(tools)
}
