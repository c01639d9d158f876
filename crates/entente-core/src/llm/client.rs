//! OpenRouter LLM client implementation
//!
//! Provides the async HTTP client behind both provider seams:
//! - Chat completions for resolution suggestions, with model fallback
//! - Text embeddings for duplicate detection
//! - Rate limit handling with exponential backoff

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use crate::config::LlmConfig;
use crate::domain::providers::{EmbeddingProvider, SuggestionProvider};
use crate::error::{Error, Result};

use super::types::{ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, Message};

/// OpenRouter API base URL
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Maximum number of retry attempts for rate-limited requests
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (in milliseconds)
const BACKOFF_BASE_MS: u64 = 1000;

/// Upper bound on a single backoff wait
const BACKOFF_CAP_MS: u64 = 30_000;

/// OpenRouter LLM client
#[derive(Clone)]
pub struct LlmClient {
    http_client: HttpClient,
    config: LlmConfig,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.base_url)
            .field("default_model", &self.config.default_model)
            .field("embedding_model", &self.config.embedding_model)
            .finish()
    }
}

impl LlmClient {
    /// Create a client against OpenRouter
    pub fn new(config: LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        Self::with_base_url(config, api_key, OPENROUTER_BASE_URL)
    }

    /// Create a client against any OpenAI-compatible endpoint
    pub fn with_base_url(
        config: LlmConfig,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::LLMError("API key is required".to_string()));
        }

        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(Error::NetworkError)?;

        Ok(Self {
            http_client,
            config,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Get the default model from configuration
    pub fn default_model(&self) -> &str {
        &self.config.default_model
    }

    /// Models tried in order: the default, then each fallback
    pub fn model_chain(&self) -> Vec<&str> {
        std::iter::once(self.config.default_model.as_str())
            .chain(self.config.fallback_models.iter().map(String::as_str))
            .collect()
    }

    /// Chat completion with automatic model fallback
    ///
    /// Rate limits and model availability errors move on to the next model;
    /// anything else is returned immediately.
    pub async fn complete_with_fallback(&self, messages: Vec<Message>) -> Result<String> {
        let mut last_error = None;

        for model in self.model_chain() {
            debug!(model = %model, "Attempting chat completion");

            let request = ChatRequest::new(model, messages.clone())
                .with_temperature(self.config.temperature)
                .with_max_tokens(self.config.max_tokens);

            match self.execute_request(&request).await {
                Ok(content) => {
                    info!(model = %model, chars = content.len(), "Chat completion successful");
                    return Ok(content);
                }
                Err(Error::RateLimited(secs)) => {
                    warn!(model = %model, wait_secs = secs, "Rate limited, trying next model");
                    last_error = Some(Error::RateLimited(secs));
                }
                Err(Error::LLMError(msg)) if is_model_error(&msg) => {
                    warn!(model = %model, error = %msg, "Model error, trying next model");
                    last_error = Some(Error::LLMError(msg));
                }
                Err(e) => {
                    error!(model = %model, error = %e, "Non-recoverable error");
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::LLMError("All models failed".to_string())))
    }

    /// Embed a single text with the configured embedding model
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: self.config.embedding_model.clone(),
            input: text.to_string(),
        };
        debug!(model = %request.model, chars = text.len(), "Embedding text");

        let body: EmbeddingResponse = self
            .post("embeddings", &request)
            .await
            .map_err(|e| match e {
                Error::LLMError(msg) => Error::EmbeddingFailed(msg),
                other => other,
            })?;

        let mut data = body.data;
        data.sort_by_key(|d| d.index);
        data.into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::EmbeddingFailed(format!("Empty embedding from {}", body.model)))
    }

    /// Chat request for one model, retrying rate limits with backoff
    async fn execute_request(&self, request: &ChatRequest) -> Result<String> {
        let mut attempt = 1;
        loop {
            match self.chat_once(request).await {
                Err(Error::RateLimited(wait_secs)) if attempt < MAX_RETRY_ATTEMPTS => {
                    let backoff = calculate_backoff(attempt, wait_secs);
                    warn!(model = %request.model, attempt, wait_ms = backoff, "Backing off");
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn chat_once(&self, request: &ChatRequest) -> Result<String> {
        let reply: ChatResponse = self.post("chat/completions", request).await?;

        if let Some(usage) = &reply.usage {
            debug!(
                model = %reply.model,
                input_tokens = usage.prompt_tokens,
                output_tokens = usage.completion_tokens,
                "Chat completion usage"
            );
        }

        reply
            .into_content()
            .ok_or_else(|| Error::LLMError(format!("{} returned no content", request.model)))
    }

    /// POST a JSON body to `endpoint` and decode the JSON reply
    async fn post<Req, Resp>(&self, endpoint: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let response = self
            .http_client
            .post(format!("{}/{}", self.base_url, endpoint))
            .bearer_auth(&self.api_key)
            .header("X-Title", "Entente")
            .json(body)
            .send()
            .await
            .map_err(Error::NetworkError)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        response
            .json()
            .await
            .map_err(|e| Error::LLMError(format!("Undecodable {} reply: {}", endpoint, e)))
    }
}

#[async_trait]
impl SuggestionProvider for LlmClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        self.complete_with_fallback(vec![
            Message::system(system_prompt),
            Message::user(user_prompt),
        ])
        .await
    }
}

#[async_trait]
impl EmbeddingProvider for LlmClient {
    async fn get_text_embedding(&self, text: &str) -> Option<Vec<f32>> {
        match self.embed(text).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                warn!(error = %e, "Embedding request failed");
                None
            }
        }
    }
}

/// Translate a failed HTTP status into the error the fallback loop expects
fn status_error(status: StatusCode, body: &str) -> Error {
    match status {
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimited(extract_retry_after(body).unwrap_or(60)),
        StatusCode::UNAUTHORIZED => Error::LLMError(
            "Unauthorized: invalid API key. Set ENTENTE_API_KEY or OPENROUTER_API_KEY".to_string(),
        ),
        StatusCode::PAYMENT_REQUIRED => Error::LLMError("Payment required: insufficient credits".to_string()),
        StatusCode::NOT_FOUND => Error::LLMError(format!("Model not found: {}", body)),
        s if s.is_server_error() => Error::LLMError(format!("Provider unavailable ({}): {}", s, body)),
        s => Error::LLMError(format!("HTTP {}: {}", s, body)),
    }
}

const MODEL_ERROR_MARKERS: &[&str] = &[
    "model not found",
    "unavailable",
    "not available",
    "no available provider",
    "overloaded",
    "capacity",
];

/// Errors that another model in the chain might not hit
fn is_model_error(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    MODEL_ERROR_MARKERS.iter().any(|marker| msg.contains(marker))
}

/// Backoff delay: exponential, at least the server's suggestion, capped
fn calculate_backoff(attempt: u32, suggested_wait: u64) -> u64 {
    let base = BACKOFF_BASE_MS * 2u64.pow(attempt.saturating_sub(1));
    base.max(suggested_wait.saturating_mul(1000))
        .min(BACKOFF_CAP_MS)
}

/// `retry_after` seconds from a rate-limit body, top level or under `error`
fn extract_retry_after(body: &str) -> Option<u64> {
    let json = serde_json::from_str::<serde_json::Value>(body).ok()?;
    json.get("retry_after")
        .or_else(|| json.get("error").and_then(|e| e.get("retry_after")))
        .and_then(|v| v.as_u64())
}
