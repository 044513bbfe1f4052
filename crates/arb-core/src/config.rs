// SPDX-License-Identifier: MIT OR Apache-2.0
//! The resolved configuration: the frozen record a run is driven by.
//!
//! A [`ResolvedConfig`] is what the config resolver produces after
//! schema validation and prompt inlining. It is serialized verbatim to
//! `config.resolved.json` and hashed for the manifest, so field names
//! here are wire-stable.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Frozen, fully-resolved run configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResolvedConfig {
    /// Seed and question.
    pub run: RunBlock,
    /// Weighted sampling sets.
    pub sampling: SamplingBlock,
    /// Optional decode parameter ranges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decode: Option<DecodeRanges>,
    /// Protocol selection and timeouts.
    pub protocol: ProtocolBlock,
    /// Batch sizing, retries, and the stop policy.
    pub execution: ExecutionBlock,
    /// Embedding and clustering measurement settings.
    pub measurement: MeasurementBlock,
    /// Output destination.
    pub output: OutputBlock,
}

/// Run identity: the seed and the question under study.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunBlock {
    /// Integer or string seed keying every RNG stream.
    pub seed: SeedValue,
    /// The question posed to every trial.
    pub question: String,
}

/// A run seed: JSON integer or string.
///
/// Both forms key RNG streams through their string rendering, so seed
/// `42` and seed `"42"` are the same stream family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum SeedValue {
    /// Integer seed.
    Int(i64),
    /// String seed.
    Text(String),
}

impl fmt::Display for SeedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Weighted sampling sets for models, personas, protocols, instruments.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SamplingBlock {
    /// Candidate models (non-empty).
    pub models: Vec<WeightedModel>,
    /// Candidate personas (non-empty).
    pub personas: Vec<PromptEntry>,
    /// Candidate protocol templates (non-empty).
    pub protocols: Vec<PromptEntry>,
    /// Optional measurement instruments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instruments: Vec<PromptEntry>,
}

/// A model slug with a sampling weight and its catalog classification.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WeightedModel {
    /// Model slug, normally `provider/name`.
    pub slug: String,
    /// Sampling weight.
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Whether the catalog knows this slug (set by the resolver).
    #[serde(default)]
    pub catalog_status: CatalogStatus,
}

/// Catalog classification for a model slug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CatalogStatus {
    /// Present in the model catalog.
    #[default]
    Known,
    /// Permitted but absent from the catalog.
    UnknownToCatalog,
}

/// A persona/protocol/instrument reference with inlined content.
///
/// Before resolution only `id` and `weight` are populated; the resolver
/// inlines `text` and `sha256` after verifying the manifest hash.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PromptEntry {
    /// Manifest id of the prompt asset.
    pub id: String,
    /// Sampling weight.
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Inlined prompt text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// SHA-256 of the inlined text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

fn default_weight() -> f64 {
    1.0
}

/// Decode parameter ranges sampled per trial.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct DecodeRanges {
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<NumberOrRange>,
    /// Nucleus sampling mass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<NumberOrRange>,
    /// Completion token cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<IntOrRange>,
}

/// A fixed number or a uniform `{min, max}` range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum NumberOrRange {
    /// Fixed value.
    Fixed(f64),
    /// Uniform range, `min` inclusive, `max` exclusive.
    Range {
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },
}

/// A fixed integer or an inclusive `{min, max}` range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum IntOrRange {
    /// Fixed value.
    Fixed(i64),
    /// Uniform inclusive integer range.
    Range {
        /// Lower bound, inclusive.
        min: i64,
        /// Upper bound, inclusive.
        max: i64,
    },
}

/// Protocol selection, timeouts, and the optional decision contract.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProtocolBlock {
    /// Which trial protocol drives each trial.
    pub kind: ProtocolKind,
    /// Timeout for a single completion call, in milliseconds.
    #[serde(default = "default_per_call_timeout_ms")]
    pub per_call_timeout_ms: u64,
    /// Global deadline for an entire trial, in milliseconds.
    #[serde(default = "default_total_trial_timeout_ms")]
    pub total_trial_timeout_ms: u64,
    /// Structured-output contract applied to the final assistant turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_contract: Option<DecisionContract>,
    /// Debate shape (only for `debate_v1`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debate: Option<DebateSpec>,
}

fn default_per_call_timeout_ms() -> u64 {
    60_000
}

fn default_total_trial_timeout_ms() -> u64 {
    300_000
}

/// Trial protocol family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    /// One persona, one completion call.
    Independent,
    /// Proposer/critic debate with a final decision turn.
    DebateV1,
}

/// Shape of a debate trial.
///
/// `debate_v1` is a fixed two-slot protocol: slot `A` proposes, slot
/// `B` critiques, for `rounds` exchanges, and slot `A` then takes the
/// final decision turn. The schema pins `participants` to exactly 2;
/// the plan compiler rejects any other shape before a run directory
/// exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DebateSpec {
    /// Number of participant slots. Always 2.
    #[schemars(range(min = 2, max = 2))]
    pub participants: u32,
    /// Proposer/critic exchanges before the final turn. At least 1.
    #[schemars(range(min = 1))]
    pub rounds: u32,
}

impl Default for DebateSpec {
    fn default() -> Self {
        Self {
            participants: 2,
            rounds: 1,
        }
    }
}

/// JSON-schema declaration of the structured output expected from a trial.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DecisionContract {
    /// Contract name, e.g. `binary_decision_v1`.
    pub name: String,
    /// JSON Schema the extracted object must validate against.
    pub schema: serde_json::Value,
    /// Which extracted field feeds the embedding text.
    #[serde(default)]
    pub embed_text_source: EmbedTextSource,
    /// Optional truncation cap when embedding the rationale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale_max_chars: Option<usize>,
}

/// Source of the text handed to the embedding model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EmbedTextSource {
    /// The extracted decision field.
    #[default]
    Decision,
    /// The extracted rationale field.
    Rationale,
    /// The trimmed raw assistant content.
    RawContent,
}

/// Batch sizing, retry policy, and the stop rule.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionBlock {
    /// Maximum number of trials to plan.
    pub k_max: u32,
    /// Trials per batch.
    pub batch_size: u32,
    /// Concurrent in-flight trials within a batch.
    pub workers: u32,
    /// Per-call retry policy.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Whether convergence may terminate the run.
    #[serde(default)]
    pub stop_mode: StopMode,
    /// Minimum trials before convergence may stop the run.
    #[serde(default)]
    pub k_min: u32,
    /// Which count `k_min` is compared against.
    #[serde(default)]
    pub k_min_count_rule: KMinCountRule,
    /// Convergence thresholds; absent means resolve-only stopping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_policy: Option<StopPolicy>,
}

/// Per-call retry policy for transient provider failures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
pub struct RetryPolicy {
    /// Retries per completion/embedding call on retryable conditions.
    pub per_call_max_retries: u32,
    /// Base backoff between attempts, in milliseconds.
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            per_call_max_retries: 2,
            backoff_ms: 250,
        }
    }
}

/// Whether the stop rule is advisory or binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StopMode {
    /// Compute `would_stop` but never terminate early.
    #[default]
    Advisor,
    /// Terminate when the stop rule holds.
    Enforcer,
}

/// Which cumulative count gates `k_min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum KMinCountRule {
    /// Trials with a successful embedding.
    #[default]
    KEligible,
    /// All attempted trials.
    KAttempted,
}

/// Convergence thresholds for the stop rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
pub struct StopPolicy {
    /// Batch novelty rate at or below this counts as low-novelty.
    pub novelty_epsilon: f64,
    /// Mean max-similarity at or above this counts as saturated.
    pub similarity_threshold: f64,
    /// Consecutive low-novelty batches required before stopping.
    pub patience: u32,
}

/// Embedding and clustering measurement settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MeasurementBlock {
    /// Embedding model identifier.
    pub embedding_model: String,
    /// Expected vector length from the embedding endpoint.
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,
    /// What text is embedded for each trial.
    #[serde(default)]
    pub embed_text_strategy: EmbedTextStrategy,
    /// Cosine-similarity threshold below which a trial counts as novel.
    pub novelty_threshold: f64,
    /// Truncation cap applied to embed text, in characters.
    #[serde(default = "default_embedding_max_chars")]
    pub embedding_max_chars: usize,
    /// Online leader clustering settings.
    #[serde(default)]
    pub clustering: ClusteringConfig,
}

fn default_embedding_max_chars() -> usize {
    8_192
}

fn default_embedding_dimensions() -> usize {
    64
}

/// What text is embedded for each trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EmbedTextStrategy {
    /// Only contract-extracted outcomes are embedded; parse failures skip.
    OutcomeOnly,
    /// Fall back to the raw assistant text when extraction fails.
    #[default]
    OutcomeOrRawAssistant,
}

/// Online leader clustering settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ClusteringConfig {
    /// Whether clustering runs at all.
    pub enabled: bool,
    /// Similarity threshold for joining an existing group.
    pub tau: f64,
    /// How group centroids evolve.
    #[serde(default)]
    pub centroid_update_rule: CentroidUpdateRule,
    /// Hard cap on the number of groups.
    pub cluster_limit: u32,
    /// Whether group-formation stagnation may stop the run.
    #[serde(default)]
    pub stop_mode: ClusterStopMode,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tau: 0.9,
            centroid_update_rule: CentroidUpdateRule::default(),
            cluster_limit: 64,
            stop_mode: ClusterStopMode::default(),
        }
    }
}

/// How group centroids evolve as members join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CentroidUpdateRule {
    /// The first member stays the centroid forever.
    #[default]
    FixedLeader,
    /// Centroid is the running mean of all members.
    IncrementalMean,
}

/// Whether the clustering secondary stop criterion binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStopMode {
    /// Secondary criterion is not evaluated.
    #[default]
    Off,
    /// Computed and recorded, never terminates.
    Advisory,
    /// May contribute to `should_stop`.
    Enforced,
}

/// Output destination and optional artifact toggles.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OutputBlock {
    /// Directory under which run directories are created.
    pub runs_dir: String,
    /// Write `debug/embeddings.jsonl`.
    #[serde(default = "default_true")]
    pub debug: bool,
    /// Render `receipt.txt` (best-effort).
    #[serde(default = "default_true")]
    pub receipt: bool,
}

fn default_true() -> bool {
    true
}

/// How contract fallbacks/failures affect the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ContractFailurePolicy {
    /// Record and proceed.
    #[default]
    Warn,
    /// Exclude affected trials from embedding and clustering.
    Exclude,
    /// Finalize the run as failed when any fallback/failure occurs.
    Fail,
}

/// Policy snapshot recorded in the manifest.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema)]
pub struct PolicySnapshot {
    /// Strict mode: policy findings become errors.
    pub strict: bool,
    /// Free-tier models permitted under strict mode.
    pub allow_free: bool,
    /// Aliased models permitted under strict mode.
    pub allow_aliased: bool,
    /// How contract fallbacks/failures affect the run.
    pub contract_failure_policy: ContractFailurePolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_value_accepts_both_forms() {
        let i: SeedValue = serde_json::from_str("424242").unwrap();
        assert_eq!(i, SeedValue::Int(424242));
        let s: SeedValue = serde_json::from_str("\"pilot-7\"").unwrap();
        assert_eq!(s, SeedValue::Text("pilot-7".into()));
        assert_eq!(i.to_string(), "424242");
        assert_eq!(s.to_string(), "pilot-7");
    }

    #[test]
    fn number_or_range_untagged() {
        let f: NumberOrRange = serde_json::from_str("0.7").unwrap();
        assert_eq!(f, NumberOrRange::Fixed(0.7));
        let r: NumberOrRange = serde_json::from_str(r#"{"min":0.1,"max":0.9}"#).unwrap();
        assert_eq!(r, NumberOrRange::Range { min: 0.1, max: 0.9 });
    }

    #[test]
    fn weight_defaults_to_one() {
        let m: WeightedModel = serde_json::from_str(r#"{"slug":"openai/gpt-4o"}"#).unwrap();
        assert_eq!(m.weight, 1.0);
        assert_eq!(m.catalog_status, CatalogStatus::Known);
    }

    #[test]
    fn enums_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&KMinCountRule::KEligible).unwrap(),
            "\"k_eligible\""
        );
        assert_eq!(
            serde_json::to_string(&ProtocolKind::DebateV1).unwrap(),
            "\"debate_v1\""
        );
        assert_eq!(
            serde_json::to_string(&CentroidUpdateRule::FixedLeader).unwrap(),
            "\"fixed_leader\""
        );
    }

    #[test]
    fn resolved_config_roundtrip() {
        let cfg = sample_config();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ResolvedConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.run.question, cfg.run.question);
        assert_eq!(back.execution.k_max, cfg.execution.k_max);
    }

    pub(crate) fn sample_config() -> ResolvedConfig {
        ResolvedConfig {
            run: RunBlock {
                seed: SeedValue::Int(424242),
                question: "Is the sky blue?".into(),
            },
            sampling: SamplingBlock {
                models: vec![WeightedModel {
                    slug: "openai/gpt-4o".into(),
                    weight: 1.0,
                    catalog_status: CatalogStatus::Known,
                }],
                personas: vec![PromptEntry {
                    id: "baseline".into(),
                    weight: 1.0,
                    text: Some("You are direct.".into()),
                    sha256: None,
                }],
                protocols: vec![PromptEntry {
                    id: "plain".into(),
                    weight: 1.0,
                    text: Some("Answer: {question}".into()),
                    sha256: None,
                }],
                instruments: vec![],
            },
            decode: None,
            protocol: ProtocolBlock {
                kind: ProtocolKind::Independent,
                per_call_timeout_ms: 60_000,
                total_trial_timeout_ms: 300_000,
                decision_contract: None,
                debate: None,
            },
            execution: ExecutionBlock {
                k_max: 5,
                batch_size: 2,
                workers: 3,
                retry: RetryPolicy::default(),
                stop_mode: StopMode::Advisor,
                k_min: 0,
                k_min_count_rule: KMinCountRule::KEligible,
                stop_policy: None,
            },
            measurement: MeasurementBlock {
                embedding_model: "mock-embed-8".into(),
                embedding_dimensions: 8,
                embed_text_strategy: EmbedTextStrategy::OutcomeOrRawAssistant,
                novelty_threshold: 0.85,
                embedding_max_chars: 8_192,
                clustering: ClusteringConfig::default(),
            },
            output: OutputBlock {
                runs_dir: "runs".into(),
                debug: true,
                receipt: true,
            },
        }
    }
}
