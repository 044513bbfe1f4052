// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-trial records: execution outcome, parsed decision, embedding.

use crate::config::EmbedTextSource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parser identifier stamped into every parsed record.
pub const PARSER_VERSION: &str = "arbiter-parse/1";

/// Outcome of executing one trial.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TrialRecord {
    /// Trial identifier.
    pub trial_id: u32,
    /// Terminal classification.
    pub status: TrialStatus,
    /// The model slug the plan asked for.
    pub requested_model_slug: String,
    /// The model the provider reported actually serving the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_model: Option<String>,
    /// Provider generation id of the final call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    /// One record per completion call, with attempt timings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<CallRecord>,
    /// Ordered turns for multi-turn protocols.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<Vec<TranscriptTurn>>,
    /// Terminal error detail for non-success trials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TrialError>,
    /// Aggregated token usage across calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageTotals>,
    /// Final assistant text, verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_assistant_text: Option<String>,
}

/// Terminal classification of a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    /// The trial produced assistant content.
    Success,
    /// Unrecoverable failure.
    Error,
    /// The provider reported the model missing (HTTP 404).
    ModelUnavailable,
    /// Retries and/or the trial deadline were exhausted.
    TimeoutExhausted,
}

/// One completion call within a trial.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CallRecord {
    /// Position within the trial, 0-based.
    pub call_index: u32,
    /// Debate turn label, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn: Option<String>,
    /// Attempt timings, in order.
    pub attempts: Vec<AttemptTiming>,
    /// Model the provider reported for this call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_model: Option<String>,
    /// Provider generation id for this call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

/// Timing of a single attempt at a provider call.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AttemptTiming {
    /// Attempt number, 0-based.
    pub attempt: u32,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// How the attempt ended.
    pub outcome: AttemptOutcome,
}

/// How an attempt at a provider call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The call succeeded.
    Ok,
    /// Failed with a retryable condition.
    RetryableError,
    /// Failed with a non-retryable condition.
    FatalError,
    /// The per-call timeout elapsed.
    Timeout,
}

/// Terminal error detail for a failed trial.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TrialError {
    /// Human-readable message.
    pub message: String,
    /// Provider error code, when one was reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Whether the final condition was retryable.
    pub retryable: bool,
}

/// Aggregated token usage across a trial's calls.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema)]
pub struct UsageTotals {
    /// Prompt tokens.
    pub prompt: u64,
    /// Completion tokens.
    pub completion: u64,
    /// Total tokens.
    pub total: u64,
    /// Estimated cost in USD, when the provider reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl UsageTotals {
    /// Accumulate another usage block into this one.
    pub fn add(&mut self, other: &UsageTotals) {
        self.prompt += other.prompt;
        self.completion += other.completion;
        self.total += other.total;
        if let Some(c) = other.cost {
            *self.cost.get_or_insert(0.0) += c;
        }
    }
}

/// One turn of a multi-turn protocol transcript.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TranscriptTurn {
    /// Turn label (`proposer`, `critic`, `proposer_final`).
    pub turn: String,
    /// Slot id that spoke (`A`, `B`, …).
    pub slot: String,
    /// Model slug serving the turn.
    pub model: String,
    /// Assistant content of the turn.
    pub content: String,
}

// ---------------------------------------------------------------------------
// ParsedRecord
// ---------------------------------------------------------------------------

/// Result of parsing a trial's assistant content.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ParsedRecord {
    /// Trial identifier.
    pub trial_id: u32,
    /// How extraction went.
    pub parse_status: ParseStatus,
    /// Extracted decision, when the contract validated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    /// Extracted rationale, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    /// Whether the rationale was truncated to `rationale_max_chars`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub rationale_truncated: bool,
    /// Text handed to the embedding model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed_text: Option<String>,
    /// Where the embed text came from.
    pub embed_text_source: EmbedTextSource,
    /// Parser identifier.
    pub parser_version: String,
}

/// How extraction went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ParseStatus {
    /// A candidate validated against the contract schema.
    Success,
    /// No candidate validated; raw content stands in.
    Fallback,
    /// Content was empty or whitespace.
    Failed,
}

// ---------------------------------------------------------------------------
// EmbeddingRecord
// ---------------------------------------------------------------------------

/// Debug record of a trial's embedding, written to `debug/embeddings.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EmbeddingRecord {
    /// Trial identifier.
    pub trial_id: u32,
    /// Whether a vector was produced.
    pub embedding_status: EmbeddingStatus,
    /// Base64-packed little-endian float32 vector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_b64: Option<String>,
    /// Element type, always `float32`.
    pub dtype: String,
    /// Packing, always `float32le_base64`.
    pub encoding: String,
    /// Vector length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
    /// SHA-256 of the embedded text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed_text_sha256: Option<String>,
    /// Characters actually embedded after truncation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed_text_chars: Option<u32>,
    /// Whether truncation shortened the text.
    #[serde(default)]
    pub embed_text_truncated: bool,
    /// Characters before truncation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed_text_original_chars: Option<u32>,
    /// Provider generation id for the embedding call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<String>,
    /// Why the embedding was skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    /// Error detail for failed embeddings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EmbeddingRecord {
    /// A skipped-embedding record.
    #[must_use]
    pub fn skipped(trial_id: u32, reason: SkipReason) -> Self {
        Self {
            trial_id,
            embedding_status: EmbeddingStatus::Skipped,
            vector_b64: None,
            dtype: "float32".into(),
            encoding: "float32le_base64".into(),
            dimensions: None,
            embed_text_sha256: None,
            embed_text_chars: None,
            embed_text_truncated: false,
            embed_text_original_chars: None,
            generation_id: None,
            skip_reason: Some(reason),
            error: None,
        }
    }

    /// A failed-embedding record.
    #[must_use]
    pub fn failed(trial_id: u32, error: impl Into<String>) -> Self {
        Self {
            trial_id,
            embedding_status: EmbeddingStatus::Failed,
            vector_b64: None,
            dtype: "float32".into(),
            encoding: "float32le_base64".into(),
            dimensions: None,
            embed_text_sha256: None,
            embed_text_chars: None,
            embed_text_truncated: false,
            embed_text_original_chars: None,
            generation_id: None,
            skip_reason: None,
            error: Some(error.into()),
        }
    }
}

/// Whether a vector was produced for a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStatus {
    /// Vector recorded.
    Success,
    /// Embedding call failed.
    Failed,
    /// No embedding was attempted.
    Skipped,
}

/// Why an embedding was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Embed text was empty after normalization.
    EmptyEmbedText,
    /// The contract failure policy excluded this trial.
    ContractParseExcluded,
    /// Anything else (e.g. the trial itself failed).
    Other,
}

/// Pack a float32 vector as base64 over little-endian bytes.
#[must_use]
pub fn encode_vector_b64(vector: &[f32]) -> String {
    use base64::Engine as _;
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for &v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode a base64-packed little-endian float32 vector.
///
/// Returns `None` when the input is not base64 or not a whole number
/// of 4-byte floats.
#[must_use]
pub fn decode_vector_b64(encoded: &str) -> Option<Vec<f32>> {
    use base64::Engine as _;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()?;
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

/// An in-memory prior embedding with its precomputed L2 norm.
#[derive(Debug, Clone)]
pub struct PriorEmbedding {
    /// Trial that produced the vector.
    pub trial_id: u32,
    /// The raw vector.
    pub vector: Vec<f32>,
    /// Cached L2 norm of `vector`.
    pub norm: f64,
}

impl PriorEmbedding {
    /// Build a prior, caching the norm.
    #[must_use]
    pub fn new(trial_id: u32, vector: Vec<f32>) -> Self {
        let norm = vector.iter().map(|&x| f64::from(x) * f64::from(x)).sum::<f64>().sqrt();
        Self {
            trial_id,
            vector,
            norm,
        }
    }
}
