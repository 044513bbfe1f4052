// SPDX-License-Identifier: MIT OR Apache-2.0
//! The run manifest: the index a run directory is judged by.

use crate::config::{KMinCountRule, PolicySnapshot};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunStopReason {
    /// All planned trials executed (no stop policy configured).
    Completed,
    /// The convergence stop rule fired.
    Converged,
    /// `k_attempted` reached `k_max` under a stop policy.
    KMaxReached,
    /// The operator interrupted the run.
    UserInterrupt,
    /// A fatal error ended the run.
    Error,
}

/// Which stopping machinery the run was configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StoppingMode {
    /// No stop policy configured; the plan runs to completion.
    ResolveOnly,
    /// Stop rule computed but never binding.
    Advisor,
    /// Stop rule terminates the run.
    Enforcer,
}

/// Stop-policy snapshot recorded in the manifest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
pub struct ManifestStopPolicy {
    /// Batch novelty rate at or below this counts as low-novelty.
    pub novelty_epsilon: f64,
    /// Mean max-similarity at or above this counts as saturated.
    pub similarity_threshold: f64,
    /// Consecutive low-novelty batches required before stopping.
    pub patience: u32,
    /// Whether `k_min` gates on eligible (true) or attempted (false).
    pub k_min_eligible: bool,
}

/// One artifact the run actually wrote.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactEntry {
    /// Path relative to the run directory.
    pub path: String,
    /// Artifact family (`json`, `jsonl`, `arrow`, `text`).
    pub kind: ArtifactKind,
    /// Record count for line-oriented artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records: Option<u64>,
}

/// Artifact family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// A single JSON document.
    Json,
    /// Append-only JSON Lines.
    Jsonl,
    /// Arrow IPC file.
    Arrow,
    /// Human-readable text.
    Text,
}

/// Index of every artifact the run wrote.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactsIndex {
    /// Entries in write order.
    pub entries: Vec<ArtifactEntry>,
}

/// The run manifest, written atomically as `manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Manifest {
    /// Manifest schema version.
    pub schema_version: String,
    /// Harness version that produced the run.
    pub arbiter_version: String,
    /// Run identifier (`YYYYMMDDThhmmssZ_<6 hex>`).
    pub run_id: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run completed (or was finalized after failure).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Why the run ended.
    pub stop_reason: RunStopReason,
    /// Which stopping machinery was configured.
    pub stopping_mode: StoppingMode,
    /// Whether the run ended before its plan was exhausted.
    pub incomplete: bool,
    /// Planned trial count.
    pub k_planned: u32,
    /// Attempted trial count.
    pub k_attempted: u32,
    /// Trials with a successful embedding.
    pub k_eligible: u32,
    /// Minimum trials before convergence may stop the run.
    pub k_min: u32,
    /// Which count `k_min` gates on.
    pub k_min_count_rule: KMinCountRule,
    /// Stop-policy snapshot, when one was configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_policy: Option<ManifestStopPolicy>,
    /// Hash algorithm for every hash below.
    pub hash_algorithm: String,
    /// Hash of `config.resolved.json`.
    pub config_sha256: String,
    /// Hash of the canonical plan.
    pub plan_sha256: String,
    /// Hash of the model catalog document.
    pub model_catalog_sha256: String,
    /// Hash of the prompt manifest document.
    pub prompt_manifest_sha256: String,
    /// Index of artifacts actually written.
    pub artifacts: ArtifactsIndex,
    /// Policy snapshot the run executed under.
    pub policy: PolicySnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContractFailurePolicy;

    fn sample_manifest() -> Manifest {
        Manifest {
            schema_version: crate::SCHEMA_VERSION.into(),
            arbiter_version: crate::ARBITER_VERSION.into(),
            run_id: "20260801T120000Z_ab12cd".into(),
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            stop_reason: RunStopReason::Completed,
            stopping_mode: StoppingMode::ResolveOnly,
            incomplete: false,
            k_planned: 5,
            k_attempted: 5,
            k_eligible: 5,
            k_min: 0,
            k_min_count_rule: KMinCountRule::KEligible,
            stop_policy: None,
            hash_algorithm: crate::HASH_ALGORITHM.into(),
            config_sha256: "0".repeat(64),
            plan_sha256: "0".repeat(64),
            model_catalog_sha256: "0".repeat(64),
            prompt_manifest_sha256: "0".repeat(64),
            artifacts: ArtifactsIndex::default(),
            policy: PolicySnapshot {
                strict: false,
                allow_free: false,
                allow_aliased: false,
                contract_failure_policy: ContractFailurePolicy::Warn,
            },
        }
    }

    #[test]
    fn stop_reason_wire_names() {
        assert_eq!(
            serde_json::to_string(&RunStopReason::KMaxReached).unwrap(),
            "\"k_max_reached\""
        );
        assert_eq!(
            serde_json::to_string(&StoppingMode::ResolveOnly).unwrap(),
            "\"resolve_only\""
        );
    }

    #[test]
    fn manifest_roundtrip() {
        let m = sample_manifest();
        let json = serde_json::to_string(&m).unwrap();
        let back: Manifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.run_id, m.run_id);
        assert_eq!(back.stop_reason, RunStopReason::Completed);
    }

    #[test]
    fn manifest_schema_derives() {
        // The verify tool validates manifests against this schema.
        let schema = schemars::schema_for!(Manifest);
        let v = serde_json::to_value(&schema).unwrap();
        assert!(v["properties"].get("config_sha256").is_some());
    }
}
