// SPDX-License-Identifier: MIT OR Apache-2.0
//! Live OpenRouter-style HTTP client.
//!
//! Implements both provider traits over the chat-completions and
//! embeddings endpoints. Outbound calls pass through the shared token
//! bucket; HTTP status maps onto the retry classification (`429` and
//! `5xx` retryable, `404` is `model_unavailable` and never retried).

use crate::{
    CancellationToken, CompletionProvider, CompletionRequest, CompletionResponse,
    EmbeddingProvider, EmbeddingRequest, EmbeddingResponse, ProviderError,
};
use arb_core::UsageTotals;
use arb_ratelimit::{RateLimit, TokenBucket};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::trace;

/// Environment variable holding the API key; its absence selects mock
/// mode upstream.
pub const OPENROUTER_API_KEY_ENV: &str = "OPENROUTER_API_KEY";

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// The live client.
pub struct OpenRouterClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    limiter: Arc<TokenBucket>,
    embedding_dimensions: usize,
}

impl OpenRouterClient {
    /// Build a client against the production base URL.
    #[must_use]
    pub fn new(api_key: impl Into<String>, limit: RateLimit, embedding_dimensions: usize) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL, limit, embedding_dimensions)
    }

    /// Build a client against an explicit base URL (tests point this at
    /// a local mock server).
    #[must_use]
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        limit: RateLimit,
        embedding_dimensions: usize,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            limiter: Arc::new(TokenBucket::new(limit)),
            embedding_dimensions,
        }
    }

    async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, ProviderError> {
        self.limiter.acquire().await;
        if cancel.is_cancelled() {
            return Err(ProviderError::Aborted);
        }
        let url = format!("{}{path}", self.base_url);
        trace!(%url, "outbound provider call");
        let send = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send();
        let response = tokio::select! {
            () = cancel.cancelled() => return Err(ProviderError::Aborted),
            result = send => result.map_err(|err| ProviderError::Transient {
                message: err.to_string(),
            })?,
        };

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited);
        }
        if status.as_u16() == 404 {
            let model = body
                .get("model")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            return Err(ProviderError::ModelUnavailable { model });
        }
        if status.is_server_error() {
            return Err(ProviderError::Transient {
                message: format!("server returned {status}"),
            });
        }
        if !status.is_success() {
            return Err(ProviderError::Fatal {
                message: format!("server returned {status}"),
                code: Some(status.as_u16().to_string()),
            });
        }
        response
            .json::<serde_json::Value>()
            .await
            .map_err(|err| ProviderError::Transient {
                message: format!("failed to read response body: {err}"),
            })
    }
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    total_tokens: Option<u64>,
    cost: Option<f64>,
}

#[async_trait]
impl CompletionProvider for OpenRouterClient {
    async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, ProviderError> {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
        });
        if let Some(decode) = &request.decode {
            if let Some(t) = decode.temperature {
                body["temperature"] = t.into();
            }
            if let Some(p) = decode.top_p {
                body["top_p"] = p.into();
            }
            if let Some(m) = decode.max_tokens {
                body["max_tokens"] = m.into();
            }
        }
        let value = self.post("/chat/completions", &body, cancel).await?;

        let content = value["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ProviderError::Fatal {
                message: "response has no assistant content".into(),
                code: None,
            })?
            .to_string();
        let usage: WireUsage =
            serde_json::from_value(value["usage"].clone()).unwrap_or(WireUsage {
                prompt_tokens: 0,
                completion_tokens: 0,
                total_tokens: None,
                cost: None,
            });
        Ok(CompletionResponse {
            model: value["model"]
                .as_str()
                .unwrap_or(&request.model)
                .to_string(),
            id: value["id"].as_str().unwrap_or_default().to_string(),
            content,
            usage: UsageTotals {
                prompt: usage.prompt_tokens,
                completion: usage.completion_tokens,
                total: usage
                    .total_tokens
                    .unwrap_or(usage.prompt_tokens + usage.completion_tokens),
                cost: usage.cost,
            },
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenRouterClient {
    fn dimensions(&self) -> usize {
        self.embedding_dimensions
    }

    async fn embed(
        &self,
        request: &EmbeddingRequest,
        cancel: &CancellationToken,
    ) -> Result<EmbeddingResponse, ProviderError> {
        let body = serde_json::json!({
            "model": request.model,
            "input": request.text,
        });
        let value = self.post("/embeddings", &body, cancel).await?;

        let raw = value["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| ProviderError::Fatal {
                message: "response has no embedding vector".into(),
                code: None,
            })?;
        let vector: Vec<f32> = raw
            .iter()
            .map(|v| v.as_f64().unwrap_or(f64::NAN) as f32)
            .collect();
        if vector.len() != self.embedding_dimensions || vector.iter().any(|v| v.is_nan()) {
            return Err(ProviderError::Fatal {
                message: format!(
                    "embedding has wrong shape: got {} values, expected {}",
                    vector.len(),
                    self.embedding_dimensions
                ),
                code: None,
            });
        }
        Ok(EmbeddingResponse {
            vector,
            generation_id: value["id"].as_str().map(str::to_string),
        })
    }
}
