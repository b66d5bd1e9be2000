//! Agent definitions and the collaborator traits the agent manager consumes.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chat::ChatClient;
use crate::error::AgentError;

/// A named, configured chat endpoint that application code addresses by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Unique agent name
    pub name: String,

    /// Agent kind, used to pick the factory that builds its base client
    /// (e.g., "openai", "gemini", "local").
    pub kind: String,

    /// Model to use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Default instructions for the agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Kind-specific settings (endpoint, deployment, ...)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            model: None,
            instructions: None,
            settings: serde_json::Map::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Builds base chat clients for one agent kind.
///
/// Supplied by the embedding application. Implementations may cache the
/// base client per agent name; the agent manager calls `resolve` on every
/// client lookup.
#[async_trait]
pub trait AgentFactory: Send + Sync {
    /// The agent kind this factory serves.
    fn kind(&self) -> &str;

    /// Whether this factory can build clients for `definition`.
    fn supports(&self, definition: &AgentDefinition) -> bool {
        definition.kind == self.kind()
    }

    /// Produce the base (undecorated) client for an agent.
    async fn resolve(&self, definition: &AgentDefinition) -> Result<Arc<dyn ChatClient>, AgentError>;

    /// Forget anything cached for `agent_name`. Called when the agent is
    /// replaced or removed. Returns whether something was dropped.
    fn invalidate(&self, _agent_name: &str) -> bool {
        false
    }
}

/// Live source of the ordered middleware pipeline (outermost first).
///
/// Read on every client resolution so configuration changes apply to the
/// next call without rebuilding anything.
pub trait PipelineSource: Send + Sync {
    fn current(&self) -> Vec<String>;
}

impl PipelineSource for Vec<String> {
    fn current(&self) -> Vec<String> {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_serialization_roundtrip() {
        let def = AgentDefinition::new("support", "openai").with_model("gpt-4o");
        let json = serde_json::to_string(&def).unwrap();
        assert!(!json.contains("settings"));

        let parsed: AgentDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, def);
    }

    #[test]
    fn vec_is_a_static_pipeline() {
        let pipeline = vec!["usage".to_string(), "retry".to_string()];
        assert_eq!(PipelineSource::current(&pipeline), pipeline);
    }
}
