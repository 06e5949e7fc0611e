//! Groq HTTP provider (OpenAI-compatible chat completions) with bounded
//! in-flight concurrency.

use crate::{ChatProvider, ChatRequest, ChatResponse, TokenUsage};
use async_trait::async_trait;
use clinsql_core::{ClinsqlError, ClinsqlResult, LlmError};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;

const PROVIDER_ID: &str = "groq";
const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [crate::ChatMessage],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: WireErrorBody,
}

#[derive(Debug, Deserialize)]
struct WireErrorBody {
    message: String,
}

// ============================================================================
// PROVIDER
// ============================================================================

/// HTTP client for an OpenAI-compatible chat-completion endpoint.
pub struct GroqProvider {
    client: Client,
    api_key: String,
    base_url: String,
    /// Bounds concurrent in-flight requests; the provider's own rate limits
    /// do the rest.
    in_flight: Arc<Semaphore>,
}

impl GroqProvider {
    /// Create a provider with the default base URL and concurrency bound.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            in_flight: Arc::new(Semaphore::new(8)),
        }
    }

    pub fn with_concurrency(mut self, permits: usize) -> Self {
        self.in_flight = Arc::new(Semaphore::new(permits.max(1)));
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ChatProvider for GroqProvider {
    async fn complete(&self, request: &ChatRequest) -> ClinsqlResult<ChatResponse> {
        let _permit = self.in_flight.acquire().await.map_err(|e| {
            ClinsqlError::Llm(LlmError::RequestFailed {
                provider: PROVIDER_ID.to_string(),
                message: format!("semaphore closed: {}", e),
            })
        })?;

        let body = WireRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.json_mode.then_some(ResponseFormat {
                format_type: "json_object",
            }),
        };

        let response = match self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                // Transport failure: best-effort contract, surface as an
                // empty response so the gateway can retry.
                return Ok(ChatResponse::empty(
                    request.model.clone(),
                    format!("HTTP request failed: {}", e),
                ));
            }
        };

        let status = response.status();
        if status.is_success() {
            let wire: WireResponse = match response.json().await {
                Ok(wire) => wire,
                Err(e) => {
                    return Ok(ChatResponse::empty(
                        request.model.clone(),
                        format!("failed to parse response: {}", e),
                    ))
                }
            };

            let usage = wire
                .usage
                .map(|u| TokenUsage {
                    input_tokens: u.prompt_tokens,
                    output_tokens: u.completion_tokens,
                })
                .unwrap_or_default();

            let content = wire.choices.into_iter().next().and_then(|c| c.message.content);

            return Ok(ChatResponse {
                content,
                usage,
                model: request.model.clone(),
                error: None,
            });
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        let message = serde_json::from_str::<WireError>(&error_text)
            .map(|e| e.error.message)
            .unwrap_or(error_text);

        match status {
            // Auth failures are not retryable; fail the call outright.
            StatusCode::UNAUTHORIZED => Err(ClinsqlError::Llm(LlmError::InvalidApiKey {
                provider: PROVIDER_ID.to_string(),
            })),
            StatusCode::TOO_MANY_REQUESTS => Ok(ChatResponse::empty(
                request.model.clone(),
                format!("rate limited: {}", message),
            )),
            _ => Ok(ChatResponse::empty(
                request.model.clone(),
                format!("provider error {}: {}", status, message),
            )),
        }
    }

    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }
}

impl std::fmt::Debug for GroqProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroqProvider")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}
