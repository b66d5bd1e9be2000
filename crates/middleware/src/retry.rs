//! Retry with exponential backoff and per-attempt timeouts.
//!
//! Only transient failures (rate limits, network errors, timeouts, 5xx) are
//! retried. Everything else, including cache and store errors raised by
//! layers below, surfaces on the first attempt.

use async_trait::async_trait;
use parley_core::chat::*;
use parley_core::error::ChatError;
use parley_core::message::Message;
use parley_core::middleware::ChatMiddleware;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Backoff settings for [`RetryChatClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Upper bound for a single attempt. `None` waits indefinitely.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            attempt_timeout: Some(Duration::from_secs(120)),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based), honoring a provider's
    /// `retry_after` hint.
    pub fn delay_for(&self, retry: u32, error: &ChatError) -> Duration {
        if let ChatError::RateLimited { retry_after_secs } = error {
            if *retry_after_secs > 0 {
                return Duration::from_secs(*retry_after_secs).min(self.max_delay);
            }
        }
        let factor = self.multiplier.max(1.0).powi(retry as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

/// Decorator re-issuing transient failures.
pub struct RetryChatClient {
    inner: Arc<dyn ChatClient>,
    policy: RetryPolicy,
}

impl RetryChatClient {
    pub fn new(inner: Arc<dyn ChatClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn run<T, F, Fut>(&self, options: ChatOptions, label: &str, mut attempt: F) -> Result<T, ChatError>
    where
        F: FnMut(ChatOptions) -> Fut,
        Fut: Future<Output = Result<T, ChatError>>,
    {
        let cancellation = options.cancellation.clone();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut retry = 0;

        loop {
            if cancellation.is_cancelled() {
                return Err(ChatError::Cancelled);
            }

            let call = attempt(options.clone());
            let outcome = match self.policy.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result,
                    Err(_) => Err(ChatError::Timeout(format!(
                        "'{}' {label} timed out after {}ms",
                        self.inner.name(),
                        limit.as_millis()
                    ))),
                },
                None => call.await,
            };

            let error = match outcome {
                Ok(value) => {
                    if retry > 0 {
                        info!(client = self.inner.name(), attempts = retry + 1, "Retry: {label} succeeded");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !error.is_transient() || retry + 1 >= max_attempts {
                return Err(error);
            }

            let delay = self.policy.delay_for(retry, &error);
            warn!(
                client = self.inner.name(),
                attempt = retry + 1,
                total = max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retry: {label} failed, backing off"
            );

            tokio::select! {
                biased;
                _ = cancellation.cancelled() => return Err(ChatError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            retry += 1;
        }
    }
}

#[async_trait]
impl ChatClient for RetryChatClient {
    fn name(&self) -> &str {
        "retry"
    }

    fn capabilities(&self) -> ClientCapabilities {
        self.inner.capabilities()
    }

    async fn respond(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Result<ChatResponse, ChatError> {
        self.run(options, "request", |options| {
            self.inner.respond(messages.clone(), options)
        })
        .await
    }

    /// Retries establishing the stream; failures after the first update are
    /// the caller's to handle.
    async fn respond_streaming(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Result<ChatStream, ChatError> {
        self.run(options, "stream", |options| {
            self.inner.respond_streaming(messages.clone(), options)
        })
        .await
    }
}

/// Middleware factory for [`RetryChatClient`].
pub struct RetryMiddleware {
    policy: RetryPolicy,
}

impl RetryMiddleware {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl ChatMiddleware for RetryMiddleware {
    fn wrap(&self, inner: Arc<dyn ChatClient>, _agent_name: &str) -> Arc<dyn ChatClient> {
        Arc::new(RetryChatClient::new(inner, self.policy.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::error::CacheError;
    use parley_core::message::Content;
    use parley_core::testing::ScriptedChatClient;
    use tokio_util::sync::CancellationToken;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            multiplier: 2.0,
            attempt_timeout: None,
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        let err = ChatError::Network("x".into());
        assert_eq!(policy.delay_for(0, &err), Duration::from_millis(200));
        assert_eq!(policy.delay_for(1, &err), Duration::from_millis(400));
        assert_eq!(policy.delay_for(10, &err), Duration::from_secs(5));
    }

    #[test]
    fn retry_after_hint_overrides_backoff() {
        let policy = RetryPolicy::default();
        let err = ChatError::RateLimited { retry_after_secs: 2 };
        assert_eq!(policy.delay_for(0, &err), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let inner = Arc::new(ScriptedChatClient::new("flaky").with_errors(vec![
            ChatError::Network("reset".into()),
            ChatError::ApiError {
                status_code: 503,
                message: "overloaded".into(),
            },
        ]));
        let client = RetryChatClient::new(inner.clone(), fast_policy(3));

        let response = client
            .respond(vec![Message::user("hi")], ChatOptions::new())
            .await
            .unwrap();
        assert_eq!(inner.calls(), 3);
        assert_eq!(response.message.text(), "reply 3");
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let inner = Arc::new(ScriptedChatClient::new("down").with_errors(vec![
            ChatError::Network("1".into()),
            ChatError::Network("2".into()),
            ChatError::Network("3".into()),
        ]));
        let client = RetryChatClient::new(inner.clone(), fast_policy(2));

        let err = client.respond(vec![], ChatOptions::new()).await.unwrap_err();
        assert!(matches!(err, ChatError::Network(ref m) if m == "2"));
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test]
    async fn permanent_errors_surface_immediately() {
        let inner = Arc::new(ScriptedChatClient::new("strict").with_errors(vec![ChatError::Cache(
            CacheError::NotFound("cache_x".into()),
        )]));
        let client = RetryChatClient::new(inner.clone(), fast_policy(5));

        let err = client.respond(vec![], ChatOptions::new()).await.unwrap_err();
        assert!(matches!(err, ChatError::Cache(_)));
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let inner = Arc::new(
            ScriptedChatClient::new("limited")
                .with_errors(vec![ChatError::RateLimited { retry_after_secs: 30 }]),
        );
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(60),
            ..fast_policy(3)
        };
        let client = RetryChatClient::new(inner.clone(), policy);
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                token.cancel();
            })
        };

        let err = client
            .respond(vec![], ChatOptions::new().with_cancellation(token))
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, ChatError::Cancelled));
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_times_out_and_is_retried() {
        struct SlowOnce {
            calls: std::sync::atomic::AtomicUsize,
        }

        #[async_trait]
        impl ChatClient for SlowOnce {
            fn name(&self) -> &str {
                "slow"
            }

            async fn respond(
                &self,
                _messages: Vec<Message>,
                _options: ChatOptions,
            ) -> Result<ChatResponse, ChatError> {
                let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if n == 0 {
                    tokio::time::sleep(Duration::from_secs(600)).await;
                }
                Ok(ChatResponse::new(Message::assistant("done")))
            }
        }

        let policy = RetryPolicy {
            attempt_timeout: Some(Duration::from_secs(5)),
            ..fast_policy(2)
        };
        let client = RetryChatClient::new(
            Arc::new(SlowOnce {
                calls: Default::default(),
            }),
            policy,
        );

        let response = client.respond(vec![], ChatOptions::new()).await.unwrap();
        assert_eq!(response.message.text(), "done");
    }

    #[tokio::test]
    async fn stream_establishment_is_retried() {
        let inner = Arc::new(
            ScriptedChatClient::new("flaky")
                .with_stream(vec![ChatResponseUpdate::text("ok")])
                .with_errors(vec![ChatError::Timeout("connect".into())]),
        );
        let client = RetryMiddleware::new(fast_policy(3)).wrap(inner.clone(), "agent");

        let mut stream = client.respond_streaming(vec![], ChatOptions::new()).await.unwrap();
        let first = stream.recv().await.unwrap().unwrap();
        assert!(matches!(&first.contents[0], Content::Text { text } if text == "ok"));
        assert_eq!(inner.calls(), 2);
    }
}
