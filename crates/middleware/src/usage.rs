//! Usage tracking layer.
//!
//! Turns the usage reported by a completed call into a [`UsageRecord`] and
//! hands it to a [`UsageTracker`]. Tracking is best-effort: a failing
//! tracker is logged and the caller still gets the response.

use async_trait::async_trait;
use parley_core::chat::*;
use parley_core::error::ChatError;
use parley_core::message::Message;
use parley_core::middleware::ChatMiddleware;
use parley_core::usage::{UsageRecord, UsageTracker, merge_tags};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Request details captured before the options move downstream.
#[derive(Clone)]
struct CallContext {
    conversation_id: Option<String>,
    model: Option<String>,
    tags: BTreeMap<String, String>,
}

/// Decorator emitting one usage record per call that reports token counts.
pub struct UsageTrackingChatClient {
    inner: Arc<dyn ChatClient>,
    tracker: Arc<dyn UsageTracker>,
    agent_name: String,
    default_tags: BTreeMap<String, String>,
    track_streaming: bool,
}

impl UsageTrackingChatClient {
    pub fn new(
        inner: Arc<dyn ChatClient>,
        tracker: Arc<dyn UsageTracker>,
        agent_name: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            tracker,
            agent_name: agent_name.into(),
            default_tags: BTreeMap::new(),
            track_streaming: false,
        }
    }

    pub fn with_default_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.default_tags = tags;
        self
    }

    /// Also record usage reported at the end of a stream.
    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.track_streaming = enabled;
        self
    }

    fn context(&self, options: &ChatOptions) -> CallContext {
        CallContext {
            conversation_id: options.conversation_id.clone(),
            model: options.model.clone(),
            tags: merge_tags(&self.default_tags, &options.additional_properties),
        }
    }
}

/// Build and submit a record; tracker failures never reach the caller.
async fn record_usage(
    tracker: &dyn UsageTracker,
    agent_name: &str,
    context: CallContext,
    conversation_id: Option<String>,
    model: Option<String>,
    usage: Option<&UsageDetails>,
) {
    let Some(usage) = usage.filter(|u| u.has_token_counts()) else {
        debug!(agent = agent_name, "No token counts reported, nothing to track");
        return;
    };

    let record = UsageRecord::new(agent_name, usage)
        .with_conversation(conversation_id.or(context.conversation_id))
        .with_model(model.or(context.model))
        .with_tags(context.tags);

    if let Err(e) = tracker.track(record).await {
        warn!(agent = agent_name, error = %e, "Usage tracking failed");
    }
}

#[async_trait]
impl ChatClient for UsageTrackingChatClient {
    fn name(&self) -> &str {
        "usage"
    }

    fn capabilities(&self) -> ClientCapabilities {
        self.inner.capabilities()
    }

    async fn respond(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Result<ChatResponse, ChatError> {
        let context = self.context(&options);
        let response = self.inner.respond(messages, options).await?;

        record_usage(
            self.tracker.as_ref(),
            &self.agent_name,
            context,
            response.conversation_id.clone(),
            response.model.clone(),
            response.usage.as_ref(),
        )
        .await;

        Ok(response)
    }

    async fn respond_streaming(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Result<ChatStream, ChatError> {
        if !self.track_streaming {
            return self.inner.respond_streaming(messages, options).await;
        }

        let context = self.context(&options);
        let mut upstream = self.inner.respond_streaming(messages, options).await?;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let tracker = self.tracker.clone();
        let agent_name = self.agent_name.clone();

        tokio::spawn(async move {
            let mut conversation_id = None;
            let mut model = None;
            let mut usage = None;

            while let Some(item) = upstream.recv().await {
                let failed = item.is_err();
                if let Ok(update) = &item {
                    conversation_id = update.conversation_id.clone().or(conversation_id);
                    model = update.model.clone().or(model);
                    usage = update.usage.clone().or(usage);
                }
                if tx.send(item).await.is_err() || failed {
                    return;
                }
            }

            record_usage(
                tracker.as_ref(),
                &agent_name,
                context,
                conversation_id,
                model,
                usage.as_ref(),
            )
            .await;
        });

        Ok(rx)
    }
}

/// Middleware factory for [`UsageTrackingChatClient`].
pub struct UsageTrackingMiddleware {
    tracker: Arc<dyn UsageTracker>,
    default_tags: BTreeMap<String, String>,
    track_streaming: bool,
}

impl UsageTrackingMiddleware {
    pub fn new(tracker: Arc<dyn UsageTracker>) -> Self {
        Self {
            tracker,
            default_tags: BTreeMap::new(),
            track_streaming: false,
        }
    }

    pub fn with_default_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.default_tags = tags;
        self
    }

    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.track_streaming = enabled;
        self
    }
}

impl ChatMiddleware for UsageTrackingMiddleware {
    fn wrap(&self, inner: Arc<dyn ChatClient>, agent_name: &str) -> Arc<dyn ChatClient> {
        Arc::new(
            UsageTrackingChatClient::new(inner, self.tracker.clone(), agent_name)
                .with_default_tags(self.default_tags.clone())
                .with_streaming(self.track_streaming),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::Error;
    use parley_core::testing::{RecordingTracker, ScriptedChatClient};

    struct FailingTracker;

    #[async_trait]
    impl UsageTracker for FailingTracker {
        async fn track(&self, _record: UsageRecord) -> parley_core::Result<()> {
            Err(Error::Tracking("sink unavailable".into()))
        }
    }

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn records_usage_with_merged_tags() {
        let tracker = Arc::new(RecordingTracker::new());
        let inner = Arc::new(ScriptedChatClient::new("base").with_usage(UsageDetails::new(120, 30)));
        let client = UsageTrackingChatClient::new(inner, tracker.clone(), "support")
            .with_default_tags(tags(&[("team", "cx"), ("env", "prod")]));

        client
            .respond(
                vec![Message::user("hi")],
                ChatOptions::new()
                    .with_conversation_id("c9")
                    .with_property("env", "staging"),
            )
            .await
            .unwrap();

        let records = tracker.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.agent_name, "support");
        assert_eq!(record.conversation_id.as_deref(), Some("c9"));
        assert_eq!(record.input_tokens, Some(120));
        assert_eq!(record.output_tokens, Some(30));
        assert_eq!(record.total_tokens, Some(150));
        assert_eq!(record.tags, tags(&[("team", "cx"), ("env", "staging")]));
    }

    #[tokio::test]
    async fn response_conversation_id_wins_over_request() {
        let tracker = Arc::new(RecordingTracker::new());
        let inner = Arc::new(
            ScriptedChatClient::new("native")
                .native()
                .with_usage(UsageDetails::new(1, 1)),
        );
        let client = UsageTrackingChatClient::new(inner, tracker.clone(), "a");

        client
            .respond(vec![Message::user("hi")], ChatOptions::new().with_conversation_id("srv"))
            .await
            .unwrap();
        assert_eq!(tracker.records()[0].conversation_id.as_deref(), Some("srv"));
    }

    #[tokio::test]
    async fn no_counts_means_no_record() {
        let tracker = Arc::new(RecordingTracker::new());
        let client =
            UsageTrackingChatClient::new(Arc::new(ScriptedChatClient::new("base")), tracker.clone(), "a");

        client
            .respond(vec![Message::user("hi")], ChatOptions::new())
            .await
            .unwrap();
        assert!(tracker.records().is_empty());
    }

    #[tokio::test]
    async fn tracker_failure_does_not_fail_the_call() {
        let inner = Arc::new(ScriptedChatClient::new("base").with_usage(UsageDetails::new(5, 5)));
        let client = UsageTrackingChatClient::new(inner, Arc::new(FailingTracker), "a");

        let response = client
            .respond(vec![Message::user("hi")], ChatOptions::new())
            .await
            .unwrap();
        assert_eq!(response.message.text(), "reply 1");
    }

    #[tokio::test]
    async fn failed_call_is_not_tracked() {
        let tracker = Arc::new(RecordingTracker::new());
        let inner = Arc::new(
            ScriptedChatClient::new("base")
                .with_usage(UsageDetails::new(5, 5))
                .with_errors(vec![ChatError::Timeout("slow".into())]),
        );
        let client = UsageTrackingChatClient::new(inner, tracker.clone(), "a");

        assert!(client.respond(vec![], ChatOptions::new()).await.is_err());
        assert!(tracker.records().is_empty());
    }

    #[tokio::test]
    async fn streaming_is_untracked_by_default() {
        let tracker = Arc::new(RecordingTracker::new());
        let inner = Arc::new(ScriptedChatClient::new("base").with_stream(vec![ChatResponseUpdate {
            usage: Some(UsageDetails::new(3, 4)),
            done: true,
            ..Default::default()
        }]));
        let client = UsageTrackingChatClient::new(inner, tracker.clone(), "a");

        let mut stream = client
            .respond_streaming(vec![], ChatOptions::new())
            .await
            .unwrap();
        while stream.recv().await.is_some() {}
        assert!(tracker.records().is_empty());
    }

    #[tokio::test]
    async fn streaming_usage_recorded_when_enabled() {
        let tracker = Arc::new(RecordingTracker::new());
        let inner = Arc::new(ScriptedChatClient::new("base").with_stream(vec![
            ChatResponseUpdate::text("partial"),
            ChatResponseUpdate {
                usage: Some(UsageDetails::new(3, 4)),
                model: Some("m-1".into()),
                done: true,
                ..Default::default()
            },
        ]));
        let client = UsageTrackingMiddleware::new(tracker.clone())
            .with_streaming(true)
            .wrap(inner, "streamer");

        let mut stream = client
            .respond_streaming(vec![], ChatOptions::new())
            .await
            .unwrap();
        // The forwarding task records before dropping its sender.
        while stream.recv().await.is_some() {}

        let records = tracker.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].agent_name, "streamer");
        assert_eq!(records[0].model.as_deref(), Some("m-1"));
        assert_eq!(records[0].total_tokens, Some(7));
    }
}
