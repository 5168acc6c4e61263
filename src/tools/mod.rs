use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub mod quick_actions;
pub mod remote;
pub mod transcripts;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),
    #[error("Tool execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Invalid tool parameters: {0}")]
    InvalidParameters(String),
    #[error("Tool timeout: {0}")]
    Timeout(String),
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// What a tool receives when invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolInput {
    /// The call's decoded argument object
    #[default]
    Arguments,
    /// A snapshot of the session (transcripts, speaking state)
    SessionState,
}

/// A capability the remote session can call by name
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object
    fn parameters(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    fn input(&self) -> ToolInput {
        ToolInput::Arguments
    }

    /// `Ok(None)` means the tool has nothing to report
    async fn invoke(&self, input: Value) -> Result<Option<Value>, ToolError>;
}

/// Immutable name → tool map, built once at startup
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Invoke a tool by name
    pub async fn invoke(&self, name: &str, input: Value) -> Result<Option<Value>, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.invoke(input).await
    }

    /// Tool descriptions in the realtime session format
    pub fn definitions(&self) -> Vec<Value> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                serde_json::json!({
                    "type": "function",
                    "name": tool.name(),
                    "description": tool.description(),
                    "parameters": tool.parameters()
                })
            })
            .collect()
    }
}

#[derive(Default)]
pub struct ToolRegistryBuilder {
    registry: ToolRegistry,
}

impl ToolRegistryBuilder {
    /// Register a tool; a later registration with the same name replaces it
    pub fn register(mut self, tool: Arc<dyn Tool>) -> Self {
        let name = tool.name().to_string();
        if self.registry.tools.insert(name.clone(), tool).is_some() {
            log::warn!("Tool '{}' registered twice, keeping the last one", name);
        } else {
            self.registry.order.push(name);
        }
        self
    }

    pub fn register_all(self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        tools.into_iter().fold(self, ToolRegistryBuilder::register)
    }

    pub fn build(self) -> ToolRegistry {
        self.registry
    }
}

/// Registry with the built-in tools
pub fn create_default_registry() -> ToolRegistryBuilder {
    ToolRegistry::builder()
        .register(Arc::new(quick_actions::GetTime))
        .register(Arc::new(quick_actions::CalculateFutureTime))
        .register(Arc::new(transcripts::RecentTranscripts::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the arguments"
        }

        async fn invoke(&self, input: Value) -> Result<Option<Value>, ToolError> {
            Ok(Some(input))
        }
    }

    #[test]
    fn test_tool_registry_creation() {
        let registry = ToolRegistry::empty();
        assert!(registry.is_empty());
        assert!(registry.definitions().is_empty());
    }

    #[test]
    fn test_tool_definitions() {
        let registry = ToolRegistry::builder().register(Arc::new(Echo)).build();

        let definitions = registry.definitions();
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0]["type"], "function");
        assert_eq!(definitions[0]["name"], "echo");
        assert_eq!(definitions[0]["parameters"]["type"], "object");
    }

    #[test]
    fn test_duplicate_registration_keeps_single_entry() {
        let registry = ToolRegistry::builder()
            .register(Arc::new(Echo))
            .register(Arc::new(Echo))
            .build();
        assert_eq!(registry.names(), &["echo".to_string()]);
    }

    #[test]
    fn test_default_registry_contents() {
        let registry = create_default_registry().build();
        assert_eq!(
            registry.names(),
            &[
                "get_time".to_string(),
                "calculate_future_time".to_string(),
                "recent_transcripts".to_string()
            ]
        );
        assert_eq!(
            registry.get("recent_transcripts").unwrap().input(),
            ToolInput::SessionState
        );
    }

    #[tokio::test]
    async fn test_invoke_by_name() {
        let registry = ToolRegistry::builder().register(Arc::new(Echo)).build();
        let result = registry.invoke("echo", json!({"a": 1})).await.unwrap();
        assert_eq!(result, Some(json!({"a": 1})));

        let missing = registry.invoke("nope", json!({})).await;
        assert!(matches!(missing, Err(ToolError::NotFound(name)) if name == "nope"));
    }
}
