//! Middleware ordering and composition.
//!
//! Lists are outermost first. Composition walks the list in reverse so the
//! first name performs the last, outermost wrap.

use parley_core::chat::ChatClient;
use parley_core::middleware::ChatMiddleware;
use std::sync::Arc;
use tracing::warn;

/// A registered middleware and its name.
pub type NamedMiddleware = (String, Arc<dyn ChatMiddleware>);

/// Decide which registered middleware apply, outermost first.
///
/// An empty `configured` list selects every registered middleware in
/// registration order. Otherwise exactly the configured names are used, in
/// their given order; names nobody registered are skipped.
pub fn resolve_order(configured: &[String], registered: &[NamedMiddleware]) -> Vec<String> {
    if configured.is_empty() {
        return registered.iter().map(|(name, _)| name.clone()).collect();
    }

    configured
        .iter()
        .filter(|name| {
            let known = registered.iter().any(|(registered, _)| registered == *name);
            if !known {
                warn!(middleware = %name, "Pipeline names unregistered middleware, skipping");
            }
            known
        })
        .cloned()
        .collect()
}

/// Wrap `base` with the middleware named in `order` (outermost first).
pub fn compose(
    base: Arc<dyn ChatClient>,
    order: &[String],
    registered: &[NamedMiddleware],
    agent_name: &str,
) -> Arc<dyn ChatClient> {
    order.iter().rev().fold(base, |client, name| {
        match registered.iter().find(|(registered, _)| registered == name) {
            Some((_, middleware)) => middleware.wrap(client, agent_name),
            None => client,
        }
    })
}
