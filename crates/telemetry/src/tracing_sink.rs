//! Usage records as structured log events.

use async_trait::async_trait;
use parley_core::usage::{UsageRecord, UsageTracker};
use tracing::info;

/// Emits one `info` event per record on the `parley::usage` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingUsageTracker;

#[async_trait]
impl UsageTracker for TracingUsageTracker {
    async fn track(&self, record: UsageRecord) -> parley_core::Result<()> {
        let tags = serde_json::to_string(&record.tags)?;
        info!(
            target: "parley::usage",
            agent = %record.agent_name,
            conversation_id = ?record.conversation_id,
            model = ?record.model,
            input_tokens = ?record.input_tokens,
            output_tokens = ?record.output_tokens,
            cached_input_tokens = ?record.cached_input_tokens,
            total_tokens = ?record.total_tokens,
            tags = %tags,
            "Chat usage"
        );
        Ok(())
    }
}
