// SPDX-License-Identifier: MIT OR Apache-2.0
//! Deterministic mock providers.
//!
//! Both providers are pure functions of `(seed, trial_id)` through the
//! shared RNG streams, so two mock runs with the same seed produce
//! bit-identical content and vectors.

use crate::{
    CancellationToken, CompletionProvider, CompletionRequest, CompletionResponse,
    EmbeddingProvider, EmbeddingRequest, EmbeddingResponse, ProviderError,
};
use arb_core::UsageTotals;
use async_trait::async_trait;

const DECISIONS: [&str; 2] = ["yes", "no"];
const RATIONALES: [&str; 4] = [
    "the evidence points that way",
    "the premise does not hold",
    "prior observations agree",
    "the counterexamples dominate",
];

/// A completion provider that fabricates a decision answer from the
/// seed.
#[derive(Debug, Clone)]
pub struct MockCompletionProvider {
    seed: String,
}

impl MockCompletionProvider {
    /// Create a mock keyed to the run seed.
    #[must_use]
    pub fn new(seed: impl Into<String>) -> Self {
        Self { seed: seed.into() }
    }
}

#[async_trait]
impl CompletionProvider for MockCompletionProvider {
    async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, ProviderError> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Aborted);
        }
        let mut rng = arb_hash::rng_for(&self.seed, "completion", request.trial_id);
        let decision = *rng.weighted_pick(&[(DECISIONS[0], 1.0), (DECISIONS[1], 1.0)]);
        let rationale = RATIONALES[rng.sample_integer(0, RATIONALES.len() as i64 - 1) as usize];
        let content = format!(
            "Considering the question, I conclude the answer is {decision}.\n\n```json\n{{\"decision\":\"{decision}\",\"rationale\":\"{rationale}\"}}\n```\n"
        );
        let prompt_tokens: u64 = request
            .messages
            .iter()
            .map(|m| m.content.split_whitespace().count() as u64)
            .sum();
        let completion_tokens = content.split_whitespace().count() as u64;
        Ok(CompletionResponse {
            model: request.model.clone(),
            id: format!("mockgen-{}-{}", request.trial_id, request.messages.len()),
            content,
            usage: UsageTotals {
                prompt: prompt_tokens,
                completion: completion_tokens,
                total: prompt_tokens + completion_tokens,
                cost: Some(0.0),
            },
        })
    }
}

/// An embedding provider that draws vectors from the `embed` stream.
#[derive(Debug, Clone)]
pub struct MockEmbeddingProvider {
    seed: String,
    dims: usize,
}

impl MockEmbeddingProvider {
    /// Create a mock with the given vector length.
    #[must_use]
    pub fn new(seed: impl Into<String>, dims: usize) -> Self {
        Self {
            seed: seed.into(),
            dims,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(
        &self,
        request: &EmbeddingRequest,
        cancel: &CancellationToken,
    ) -> Result<EmbeddingResponse, ProviderError> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Aborted);
        }
        let mut rng = arb_hash::rng_for(&self.seed, "embed", request.trial_id);
        let vector = (0..self.dims)
            .map(|_| (rng.next_f64() * 2.0 - 1.0) as f32)
            .collect();
        Ok(EmbeddingResponse {
            vector,
            generation_id: Some(format!("mockembed-{}", request.trial_id)),
        })
    }
}

/// An embedding provider that returns the same vector for every trial.
///
/// Exists to exercise convergence: with identical vectors, similarity
/// saturates and the stop rule fires as early as the policy allows.
#[derive(Debug, Clone)]
pub struct DegenerateEmbeddingProvider {
    dims: usize,
}

impl DegenerateEmbeddingProvider {
    /// Create a degenerate provider with the given vector length.
    #[must_use]
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait]
impl EmbeddingProvider for DegenerateEmbeddingProvider {
    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(
        &self,
        _request: &EmbeddingRequest,
        cancel: &CancellationToken,
    ) -> Result<EmbeddingResponse, ProviderError> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Aborted);
        }
        let mut vector = vec![0.0_f32; self.dims];
        if let Some(first) = vector.first_mut() {
            *first = 1.0;
        }
        Ok(EmbeddingResponse {
            vector,
            generation_id: None,
        })
    }
}
