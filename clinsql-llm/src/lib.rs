//! CLINSQL LLM - Chat-Completion Gateway
//!
//! Provider-agnostic chat-completion abstraction. The gateway is the only
//! component that speaks to a model provider; everything else goes through
//! it. Features:
//! - Async `ChatProvider` trait with an HTTP implementation
//! - Retry-on-empty with linear back-off and cooperative cancellation
//! - SQL and JSON extraction from untrusted model output
//! - Process-wide atomic usage accounting

mod extract;
pub mod providers;

pub use extract::{extract_json, extract_sql};
pub use providers::GroqProvider;

use async_trait::async_trait;
use clinsql_core::{AgentError, ClinsqlError, ClinsqlResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A chat-completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the provider for a JSON object response.
    #[serde(default)]
    pub json_mode: bool,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: 0.1,
            max_tokens: 2048,
            json_mode: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_json_mode(mut self, json_mode: bool) -> Self {
        self.json_mode = json_mode;
        self
    }
}

/// Token usage reported by the provider for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Response from a chat completion. Provider failures surface as
/// `content = None` with `error` set; the pipeline treats the provider as
/// best-effort and falls back downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: Option<String>,
    #[serde(default)]
    pub usage: TokenUsage,
    pub model: String,
    pub error: Option<String>,
}

impl ChatResponse {
    pub fn empty(model: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            content: None,
            usage: TokenUsage::default(),
            model: model.into(),
            error: Some(error.into()),
        }
    }
}

// ============================================================================
// PROVIDER TRAIT
// ============================================================================

/// Async trait for chat-completion providers.
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Perform one chat completion. Transport-level failures should be
    /// mapped into a `ChatResponse` with `error` set rather than `Err`;
    /// `Err` is reserved for unrecoverable conditions.
    async fn complete(&self, request: &ChatRequest) -> ClinsqlResult<ChatResponse>;

    /// Identifier for logging.
    fn provider_id(&self) -> &str;
}

// ============================================================================
// USAGE STATS
// ============================================================================

/// Process-wide usage counters, updated with atomic addition.
#[derive(Debug, Default)]
pub struct UsageCounter {
    total_input_tokens: AtomicU64,
    total_output_tokens: AtomicU64,
    total_requests: AtomicU64,
}

/// Snapshot of the usage counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UsageStats {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_requests: u64,
}

impl UsageCounter {
    fn record(&self, usage: TokenUsage) {
        self.total_input_tokens
            .fetch_add(usage.input_tokens, Ordering::Relaxed);
        self.total_output_tokens
            .fetch_add(usage.output_tokens, Ordering::Relaxed);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> UsageStats {
        UsageStats {
            total_input_tokens: self.total_input_tokens.load(Ordering::Relaxed),
            total_output_tokens: self.total_output_tokens.load(Ordering::Relaxed),
            total_requests: self.total_requests.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.total_input_tokens.store(0, Ordering::Relaxed);
        self.total_output_tokens.store(0, Ordering::Relaxed);
        self.total_requests.store(0, Ordering::Relaxed);
    }
}

// ============================================================================
// GATEWAY
// ============================================================================

/// Number of attempts made before giving up on an empty response.
const MAX_ATTEMPTS: u32 = 3;

/// The single chat-completion abstraction used by every agent and tool.
pub struct LlmGateway {
    provider: Arc<dyn ChatProvider>,
    usage: UsageCounter,
}

impl LlmGateway {
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self {
            provider,
            usage: UsageCounter::default(),
        }
    }

    /// Perform a chat completion, retrying up to three times on empty
    /// content with linear back-off (1s, 2s). Cancellation is observed
    /// between attempts. Usage from every attempt is accounted.
    pub async fn complete(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> ClinsqlResult<ChatResponse> {
        let mut last_error = String::from("empty response");

        for attempt in 0..MAX_ATTEMPTS {
            if cancel.is_cancelled() {
                return Err(ClinsqlError::Agent(AgentError::Cancelled));
            }

            if attempt > 0 {
                let backoff = Duration::from_secs(attempt as u64);
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => {
                        return Err(ClinsqlError::Agent(AgentError::Cancelled));
                    }
                }
            }

            let response = self.provider.complete(request).await?;
            self.usage.record(response.usage);

            let has_content = response
                .content
                .as_deref()
                .is_some_and(|content| !content.trim().is_empty());
            if has_content {
                return Ok(response);
            }

            last_error = response
                .error
                .unwrap_or_else(|| "empty response".to_string());
            tracing::warn!(
                provider = self.provider.provider_id(),
                model = %request.model,
                attempt = attempt + 1,
                error = %last_error,
                "chat completion returned no content, retrying"
            );
        }

        Ok(ChatResponse::empty(request.model.clone(), last_error))
    }

    /// Cumulative usage snapshot.
    pub fn usage_stats(&self) -> UsageStats {
        self.usage.snapshot()
    }

    /// Reset the usage counters.
    pub fn reset_usage_stats(&self) {
        self.usage.reset()
    }
}

impl std::fmt::Debug for LlmGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmGateway")
            .field("provider", &self.provider.provider_id())
            .field("usage", &self.usage.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Scripted provider: pops one canned response per call.
    struct ScriptedProvider {
        responses: Mutex<Vec<ChatResponse>>,
        calls: AtomicU64,
    }

    impl ScriptedProvider {
        fn new(mut responses: Vec<ChatResponse>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                calls: AtomicU64::new(0),
            }
        }

        fn call_count(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        async fn complete(&self, request: &ChatRequest) -> ClinsqlResult<ChatResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            Ok(responses
                .pop()
                .unwrap_or_else(|| ChatResponse::empty(request.model.clone(), "script exhausted")))
        }

        fn provider_id(&self) -> &str {
            "scripted"
        }
    }

    fn make_response(content: &str, input: u64, output: u64) -> ChatResponse {
        ChatResponse {
            content: Some(content.to_string()),
            usage: TokenUsage {
                input_tokens: input,
                output_tokens: output,
            },
            model: "test".to_string(),
            error: None,
        }
    }

    fn make_request() -> ChatRequest {
        ChatRequest::new("test", vec![ChatMessage::user("hi")])
    }

    #[tokio::test]
    async fn test_gateway_returns_first_nonempty_response() {
        let provider = Arc::new(ScriptedProvider::new(vec![make_response("SELECT 1;", 10, 5)]));
        let gateway = LlmGateway::new(provider.clone());

        let response = gateway
            .complete(&make_request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.content.as_deref(), Some("SELECT 1;"));
        assert_eq!(provider.call_count(), 1);
        assert_eq!(gateway.usage_stats().total_requests, 1);
        assert_eq!(gateway.usage_stats().total_input_tokens, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gateway_retries_on_empty_then_succeeds() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ChatResponse::empty("test", "rate limited"),
            make_response("ok", 1, 1),
        ]));
        let gateway = LlmGateway::new(provider.clone());

        let response = gateway
            .complete(&make_request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.content.as_deref(), Some("ok"));
        assert_eq!(provider.call_count(), 2);
        // Both attempts counted.
        assert_eq!(gateway.usage_stats().total_requests, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gateway_gives_up_after_three_empty_attempts() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ChatResponse::empty("test", "e1"),
            ChatResponse::empty("test", "e2"),
            ChatResponse::empty("test", "e3"),
        ]));
        let gateway = LlmGateway::new(provider.clone());

        let response = gateway
            .complete(&make_request(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(response.content.is_none());
        assert_eq!(response.error.as_deref(), Some("e3"));
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_gateway_observes_cancellation_before_calling() {
        let provider = Arc::new(ScriptedProvider::new(vec![make_response("x", 1, 1)]));
        let gateway = LlmGateway::new(provider.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = gateway.complete(&make_request(), &cancel).await;
        assert!(matches!(
            result,
            Err(ClinsqlError::Agent(AgentError::Cancelled))
        ));
        assert_eq!(provider.call_count(), 0);
    }

    #[test]
    fn test_usage_counter_reset() {
        let counter = UsageCounter::default();
        counter.record(TokenUsage {
            input_tokens: 5,
            output_tokens: 7,
        });
        assert_eq!(counter.snapshot().total_output_tokens, 7);
        counter.reset();
        assert_eq!(counter.snapshot(), UsageStats::default());
    }
}
