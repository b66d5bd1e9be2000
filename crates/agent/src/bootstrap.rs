//! Build a ready-to-use [`AgentManager`] from [`ParleyConfig`].
//!
//! Registers the built-in middleware in the conventional order (first is
//! outermost):
//!
//! | # | Name | Layer |
//! |---|------|-------|
//! | 1 | `usage` | usage tracking |
//! | 2 | `logging` | request logging |
//! | 3 | `conversation` | stored history + compaction |
//! | 4 | `caching` | cached-prompt expansion |
//! | 5 | `retry` | transient-failure retry |
//!
//! `[pipeline].middleware` (or a live pipeline source) can reorder or
//! drop any of them.

use crate::manager::AgentManager;
use parley_config::{ParleyConfig, RetryConfig, StaticPipeline, StoreKind};
use parley_core::agent::{AgentFactory, PipelineSource};
use parley_core::cache::{CacheStrategy, ServerCacheClient};
use parley_core::conversation::ConversationStore;
use parley_core::usage::UsageTracker;
use parley_memory::{
    FileConversationStore, InMemoryConversationStore, SlidingWindowCompaction,
    SqliteConversationStore,
};
use parley_middleware::{
    CachingMiddleware, ConversationMiddleware, LoggingMiddleware, PassthroughCacheStrategy,
    RetryMiddleware, RetryPolicy, ServerSideCacheStrategy, UsageTrackingMiddleware, names,
};
use parley_telemetry::TracingUsageTracker;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Externally supplied pieces. Anything left `None` gets a default.
#[derive(Default)]
pub struct Collaborators {
    /// One factory per agent kind.
    pub factories: Vec<Arc<dyn AgentFactory>>,
    /// Provider cached-content API; enables the server-side cache strategy.
    pub server_cache: Option<Arc<dyn ServerCacheClient>>,
    /// Usage sink. Defaults to structured log events.
    pub tracker: Option<Arc<dyn UsageTracker>>,
    /// Conversation store. Defaults to the one named in the config.
    pub store: Option<Arc<dyn ConversationStore>>,
    /// Live pipeline. Defaults to the config's `[pipeline]`, fixed.
    pub pipeline: Option<Arc<dyn PipelineSource>>,
}

/// A manager plus the shared services its middleware use.
pub struct Bootstrapped {
    pub manager: AgentManager,
    /// Where callers register cached prompts.
    pub cache: Arc<dyn CacheStrategy>,
    pub store: Arc<dyn ConversationStore>,
    /// TTL for cached prompts when callers have no preference.
    pub default_cache_ttl: Duration,
}

/// Convert retry settings into a middleware policy.
pub fn retry_policy(config: &RetryConfig) -> RetryPolicy {
    RetryPolicy {
        max_attempts: config.max_attempts,
        initial_delay: Duration::from_millis(config.initial_delay_ms),
        max_delay: Duration::from_millis(config.max_delay_ms),
        multiplier: config.multiplier,
        attempt_timeout: config.attempt_timeout_secs.map(Duration::from_secs),
    }
}

async fn open_store(config: &ParleyConfig) -> parley_core::Result<Arc<dyn ConversationStore>> {
    let conversation = &config.conversation;
    let store: Arc<dyn ConversationStore> = match conversation.store {
        StoreKind::Memory => Arc::new(InMemoryConversationStore::new()),
        StoreKind::File => Arc::new(FileConversationStore::new(
            conversation
                .path
                .clone()
                .map(Into::into)
                .unwrap_or_else(FileConversationStore::default_dir),
        )),
        StoreKind::Sqlite => {
            let url = conversation.path.clone().unwrap_or_else(|| {
                format!(
                    "sqlite://{}",
                    ParleyConfig::config_dir().join("conversations.db").display()
                )
            });
            Arc::new(SqliteConversationStore::new(&url).await?)
        }
    };
    info!(store = %conversation.store, "Conversation store ready");
    Ok(store)
}

/// Build a manager with the standard middleware and every configured agent.
pub async fn build_manager(
    config: &ParleyConfig,
    collaborators: Collaborators,
) -> parley_core::Result<Bootstrapped> {
    let store = match collaborators.store {
        Some(store) => store,
        None => open_store(config).await?,
    };

    let cache: Arc<dyn CacheStrategy> = match collaborators.server_cache {
        Some(client) => Arc::new(ServerSideCacheStrategy::with_min_words(
            client,
            config.cache.min_words,
        )),
        None => Arc::new(PassthroughCacheStrategy::new()),
    };

    let tracker = collaborators
        .tracker
        .unwrap_or_else(|| Arc::new(TracingUsageTracker));

    let pipeline = collaborators
        .pipeline
        .unwrap_or_else(|| Arc::new(StaticPipeline(config.pipeline.middleware.clone())));

    let manager = AgentManager::with_pipeline(pipeline);
    for factory in collaborators.factories {
        manager.register_factory(factory).await;
    }

    manager
        .register_middleware(
            names::USAGE,
            Arc::new(
                UsageTrackingMiddleware::new(tracker)
                    .with_default_tags(config.usage.default_tags.clone())
                    .with_streaming(config.usage.track_streaming),
            ),
        )
        .await;
    manager
        .register_middleware(names::LOGGING, Arc::new(LoggingMiddleware))
        .await;
    manager
        .register_middleware(
            names::CONVERSATION,
            Arc::new(ConversationMiddleware::new(
                store.clone(),
                Arc::new(SlidingWindowCompaction {
                    max_messages: config.conversation.max_messages,
                }),
            )),
        )
        .await;
    manager
        .register_middleware(names::CACHING, Arc::new(CachingMiddleware::new(cache.clone())))
        .await;
    manager
        .register_middleware(
            names::RETRY,
            Arc::new(RetryMiddleware::new(retry_policy(&config.retry))),
        )
        .await;

    for agent in &config.agents {
        manager.add_agent(agent.clone()).await?;
    }

    info!(
        agents = config.agents.len(),
        cache = cache.name(),
        "Agent manager bootstrapped"
    );

    Ok(Bootstrapped {
        manager,
        cache,
        store,
        default_cache_ttl: Duration::from_secs(config.cache.default_ttl_secs),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_config::RetryConfig;

    #[test]
    fn retry_policy_mirrors_config() {
        let policy = retry_policy(&RetryConfig {
            max_attempts: 4,
            initial_delay_ms: 50,
            max_delay_ms: 800,
            multiplier: 3.0,
            attempt_timeout_secs: None,
        });
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.initial_delay, Duration::from_millis(50));
        assert_eq!(policy.max_delay, Duration::from_millis(800));
        assert_eq!(policy.attempt_timeout, None);
    }

    #[tokio::test]
    async fn default_bootstrap_registers_standard_order() {
        let built = build_manager(&ParleyConfig::default(), Collaborators::default())
            .await
            .unwrap();
        assert_eq!(
            built.manager.middleware_order().await,
            vec!["usage", "logging", "conversation", "caching", "retry"]
        );
        assert_eq!(built.cache.name(), "passthrough");
        assert_eq!(built.store.name(), "in_memory");
    }

    #[tokio::test]
    async fn agents_without_factory_fail_bootstrap() {
        let config = ParleyConfig {
            agents: vec![parley_core::AgentDefinition::new("support", "openai")],
            ..Default::default()
        };
        assert!(build_manager(&config, Collaborators::default()).await.is_err());
    }

    #[tokio::test]
    async fn file_store_honors_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ParleyConfig::default();
        config.conversation.store = StoreKind::File;
        config.conversation.path = Some(dir.path().display().to_string());

        let built = build_manager(&config, Collaborators::default()).await.unwrap();
        built
            .store
            .save("c", &[parley_core::Message::user("hi")])
            .await
            .unwrap();
        assert!(dir.path().join("c.json").exists());
    }
}
