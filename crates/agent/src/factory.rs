//! Base-client factories.
//!
//! The manager asks a factory for the base client on every resolution.
//! [`CachingAgentFactory`] makes that cheap by building each agent's client
//! once and handing out the same instance afterwards.

use async_trait::async_trait;
use parley_core::agent::{AgentDefinition, AgentFactory};
use parley_core::chat::ChatClient;
use parley_core::error::AgentError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Builds a fresh base client for an agent definition.
#[async_trait]
pub trait ClientBuilder: Send + Sync {
    /// The agent kind this builder serves.
    fn kind(&self) -> &str;

    async fn build(&self, definition: &AgentDefinition) -> Result<Arc<dyn ChatClient>, AgentError>;
}

type ClientCell = Arc<OnceCell<Arc<dyn ChatClient>>>;

/// A cell together with the definition it is being built from.
struct CachedClient {
    definition: AgentDefinition,
    cell: ClientCell,
}

/// An [`AgentFactory`] that builds each agent's base client at most once.
///
/// Concurrent first requests for the same agent share a single build. A
/// failed build is not cached; the next request tries again. A changed
/// definition for a known name replaces the cached client.
pub struct CachingAgentFactory<B> {
    builder: B,
    clients: Mutex<HashMap<String, CachedClient>>,
}

impl<B: ClientBuilder> CachingAgentFactory<B> {
    pub fn new(builder: B) -> Self {
        Self {
            builder,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Number of agents with a cell (built or being built).
    pub fn cached_count(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn cell_for(&self, definition: &AgentDefinition) -> ClientCell {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = clients.get(&definition.name) {
            if cached.definition == *definition {
                return cached.cell.clone();
            }
            debug!(agent = %definition.name, "Definition changed, dropping cached base client");
        }
        let cell = ClientCell::default();
        clients.insert(
            definition.name.clone(),
            CachedClient {
                definition: definition.clone(),
                cell: cell.clone(),
            },
        );
        cell
    }
}

#[async_trait]
impl<B: ClientBuilder> AgentFactory for CachingAgentFactory<B> {
    fn kind(&self) -> &str {
        self.builder.kind()
    }

    async fn resolve(&self, definition: &AgentDefinition) -> Result<Arc<dyn ChatClient>, AgentError> {
        let cell = self.cell_for(definition);
        let client = cell
            .get_or_try_init(|| async {
                debug!(agent = %definition.name, kind = %definition.kind, "Building base client");
                self.builder.build(definition).await
            })
            .await?;
        Ok(client.clone())
    }

    /// Drop the cached client for `agent_name`. Returns whether one existed.
    fn invalidate(&self, agent_name: &str) -> bool {
        let removed = self
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(agent_name)
            .is_some();
        if removed {
            info!(agent = agent_name, "Cached base client invalidated");
        }
        removed
    }
}
