//! The agent manager: named agents resolved into decorated clients.
//!
//! Every `get_client` call re-reads the pipeline and wraps a fresh base
//! client, so pipeline changes apply to the very next call. Only the
//! factory may cache anything (see `CachingAgentFactory`).

use crate::pipeline::{NamedMiddleware, compose, resolve_order};
use parley_core::agent::{AgentDefinition, AgentFactory, PipelineSource};
use parley_core::chat::ChatClient;
use parley_core::error::AgentError;
use parley_core::middleware::ChatMiddleware;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// An agent and the factory that builds its base client.
#[derive(Clone)]
struct RegisteredAgent {
    definition: AgentDefinition,
    factory: Arc<dyn AgentFactory>,
}

/// Resolves agent names into fully decorated chat clients.
pub struct AgentManager {
    agents: RwLock<HashMap<String, RegisteredAgent>>,
    factories: RwLock<Vec<Arc<dyn AgentFactory>>>,
    /// Registration order is the convention-mode order.
    middleware: RwLock<Vec<NamedMiddleware>>,
    pipeline: Arc<dyn PipelineSource>,
}

impl AgentManager {
    /// A manager in convention mode (every middleware, registration order).
    pub fn new() -> Self {
        Self::with_pipeline(Arc::new(Vec::<String>::new()))
    }

    /// A manager reading its middleware order from `pipeline`.
    pub fn with_pipeline(pipeline: Arc<dyn PipelineSource>) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            factories: RwLock::new(Vec::new()),
            middleware: RwLock::new(Vec::new()),
            pipeline,
        }
    }

    /// Register a factory. Replaces any factory for the same kind.
    pub async fn register_factory(&self, factory: Arc<dyn AgentFactory>) {
        let mut factories = self.factories.write().await;
        factories.retain(|f| f.kind() != factory.kind());
        info!(kind = factory.kind(), "Agent factory registered");
        factories.push(factory);
    }

    /// Register a middleware under `name`.
    ///
    /// Re-registering a name replaces the middleware but keeps its position
    /// in the registration order.
    pub async fn register_middleware(&self, name: impl Into<String>, middleware: Arc<dyn ChatMiddleware>) {
        let name = name.into();
        let mut registered = self.middleware.write().await;
        match registered.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => {
                info!(middleware = %name, "Middleware replaced");
                slot.1 = middleware;
            }
            None => {
                info!(middleware = %name, position = registered.len(), "Middleware registered");
                registered.push((name, middleware));
            }
        }
    }

    /// Register (or replace) an agent.
    ///
    /// Fails when no registered factory supports the definition's kind.
    pub async fn add_agent(&self, definition: AgentDefinition) -> Result<(), AgentError> {
        let factory = self
            .factories
            .read()
            .await
            .iter()
            .find(|f| f.supports(&definition))
            .cloned()
            .ok_or_else(|| AgentError::NoFactory {
                agent: definition.name.clone(),
                kind: definition.kind.clone(),
            })?;

        let name = definition.name.clone();
        let previous = self
            .agents
            .write()
            .await
            .insert(name.clone(), RegisteredAgent { definition, factory });
        let replaced = match previous {
            Some(old) => {
                old.factory.invalidate(&name);
                true
            }
            None => false,
        };
        info!(agent = %name, replaced, "Agent registered");
        Ok(())
    }

    /// Forget an agent. Returns whether it existed.
    pub async fn remove_agent(&self, name: &str) -> bool {
        let Some(removed) = self.agents.write().await.remove(name) else {
            return false;
        };
        removed.factory.invalidate(name);
        info!(agent = name, "Agent removed");
        true
    }

    /// All agent names, sorted.
    pub async fn list_agent_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn definition(&self, name: &str) -> Option<AgentDefinition> {
        self.agents
            .read()
            .await
            .get(name)
            .map(|a| a.definition.clone())
    }

    /// The middleware order the next `get_client` would apply, outermost first.
    pub async fn middleware_order(&self) -> Vec<String> {
        let registered = self.middleware.read().await;
        resolve_order(&self.pipeline.current(), &registered)
    }

    /// Build the decorated client for `name`.
    pub async fn get_client(&self, name: &str) -> Result<Arc<dyn ChatClient>, AgentError> {
        let agent = self
            .agents
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| AgentError::NotFound(name.to_string()))?;

        let base = agent.factory.resolve(&agent.definition).await?;

        let registered = self.middleware.read().await.clone();
        let order = resolve_order(&self.pipeline.current(), &registered);
        debug!(agent = name, pipeline = ?order, "Composing client");

        Ok(compose(base, &order, &registered, name))
    }
}

impl Default for AgentManager {
    fn default() -> Self {
        Self::new()
    }
}
