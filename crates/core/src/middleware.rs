//! ChatMiddleware: a named decorator that wraps one client into another.

use std::sync::Arc;

use crate::chat::ChatClient;

/// Wraps a chat client with added behavior.
///
/// `wrap` must be cheap and free of side effects: the agent manager calls it
/// on every client resolution. The agent name lets a middleware specialize
/// per agent (tags, stores, policies).
pub trait ChatMiddleware: Send + Sync {
    fn wrap(&self, inner: Arc<dyn ChatClient>, agent_name: &str) -> Arc<dyn ChatClient>;
}

impl<F> ChatMiddleware for F
where
    F: Fn(Arc<dyn ChatClient>, &str) -> Arc<dyn ChatClient> + Send + Sync,
{
    fn wrap(&self, inner: Arc<dyn ChatClient>, agent_name: &str) -> Arc<dyn ChatClient> {
        self(inner, agent_name)
    }
}
