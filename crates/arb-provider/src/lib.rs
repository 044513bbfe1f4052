// SPDX-License-Identifier: MIT OR Apache-2.0
//! Completion and embedding providers.
//!
//! The traits here are the seam between the run engine and the outside
//! world. The mock variants are pure functions of the run seed, which
//! is what makes whole-run determinism testable; the OpenRouter client
//! implements the same contract over HTTP.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod mock;
mod openrouter;
mod retry;

pub use cancel::CancellationToken;
pub use mock::{DegenerateEmbeddingProvider, MockCompletionProvider, MockEmbeddingProvider};
pub use openrouter::{OPENROUTER_API_KEY_ENV, OpenRouterClient};
pub use retry::{RetryOutcome, execute_with_retry};

use arb_core::{DecodeParams, UsageTotals};
use async_trait::async_trait;

/// Message role on the completion wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// System prompt.
    System,
    /// User turn.
    User,
    /// Assistant turn.
    Assistant,
}

/// One chat message.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Message {
    /// Speaker role.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl Message {
    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// An assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A completion request.
///
/// `trial_id` never crosses the wire; it keys the mock providers'
/// deterministic streams.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Trial this call belongs to.
    pub trial_id: u32,
    /// Model slug.
    pub model: String,
    /// Conversation so far.
    pub messages: Vec<Message>,
    /// Decode parameters, when sampled.
    pub decode: Option<DecodeParams>,
}

/// A completion response.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// The model that actually served the call.
    pub model: String,
    /// Provider generation id.
    pub id: String,
    /// Assistant content.
    pub content: String,
    /// Token usage for this call.
    pub usage: UsageTotals,
}

/// An embedding request.
#[derive(Debug, Clone)]
pub struct EmbeddingRequest {
    /// Trial this call belongs to.
    pub trial_id: u32,
    /// Embedding model identifier.
    pub model: String,
    /// Text to embed.
    pub text: String,
}

/// An embedding response.
#[derive(Debug, Clone)]
pub struct EmbeddingResponse {
    /// Fixed-dimension vector.
    pub vector: Vec<f32>,
    /// Provider generation id, when reported.
    pub generation_id: Option<String>,
}

/// Errors from provider calls, classified for retry.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP 429.
    #[error("rate limited by provider")]
    RateLimited,
    /// Transient transport or 5xx failure.
    #[error("transient provider failure: {message}")]
    Transient {
        /// Detail.
        message: String,
    },
    /// HTTP 404: the model does not exist. Never retried.
    #[error("model '{model}' is unavailable")]
    ModelUnavailable {
        /// The missing model slug.
        model: String,
    },
    /// The per-call timeout elapsed.
    #[error("provider call timed out")]
    Timeout,
    /// The call was aborted by cancellation. Retry-agnostic: retry
    /// loops stop without counting it either way.
    #[error("provider call aborted")]
    Aborted,
    /// Anything else.
    #[error("provider failure: {message}")]
    Fatal {
        /// Detail.
        message: String,
        /// Provider error code, when reported.
        code: Option<String>,
    },
}

impl ProviderError {
    /// Whether a retry could plausibly succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Transient { .. } | Self::Timeout
        )
    }

    /// Provider error code, when one was reported.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Fatal { code, .. } => code.as_deref(),
            Self::RateLimited => Some("429"),
            Self::ModelUnavailable { .. } => Some("404"),
            _ => None,
        }
    }
}

/// A completion endpoint.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Execute one completion call.
    async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, ProviderError>;
}

/// An embedding endpoint.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Vector length this provider produces.
    fn dimensions(&self) -> usize;

    /// Embed one text.
    async fn embed(
        &self,
        request: &EmbeddingRequest,
        cancel: &CancellationToken,
    ) -> Result<EmbeddingResponse, ProviderError>;
}
