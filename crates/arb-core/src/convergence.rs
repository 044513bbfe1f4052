// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-batch convergence records.

use crate::config::StopMode;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Convergence metrics for one batch, appended to
/// `convergence_trace.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConvergenceRecord {
    /// Batch number, 0-based.
    pub batch_number: u32,
    /// Cumulative trials attempted.
    pub k_attempted: u32,
    /// Cumulative trials with a successful embedding.
    pub k_eligible: u32,
    /// Fraction of the batch below the novelty threshold; null when the
    /// batch had no eligible embeddings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub novelty_rate: Option<f64>,
    /// Mean max-similarity to prior embeddings; null when the batch had
    /// no eligible embeddings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_max_sim_to_prior: Option<f64>,
    /// Whether any trial in the batch produced an embedding.
    pub has_eligible_in_batch: bool,
    /// Grouping metrics, when clustering is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping: Option<GroupingMetrics>,
    /// The stop decision for this batch.
    pub stop: StopDecision,
}

/// Cumulative grouping metrics for one batch.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GroupingMetrics {
    /// Number of groups discovered so far.
    pub group_count: u32,
    /// Member counts by dense group id.
    pub group_distribution: Vec<u32>,
    /// Share of members in the largest group.
    pub largest_group_share: f64,
    /// Shannon entropy (log2) of the member distribution.
    pub entropy: f64,
    /// `2^entropy`.
    pub effective_group_count: f64,
    /// Groups with exactly one member.
    pub singleton_group_count: u32,
    /// Jensen–Shannon divergence (log2) versus the previous batch's
    /// cumulative distribution; null on the first grouped batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub js_divergence: Option<f64>,
    /// Forced assignments in this batch.
    pub forced_assignments_in_batch: u32,
    /// Forced assignments so far.
    pub forced_assignments_total: u32,
    /// Whether the group cap forced an assignment this batch.
    pub group_limit_hit: bool,
    /// Whether no new group has formed for `patience` batches
    /// (secondary stop criterion; advisory unless clustering stop mode
    /// is enforced).
    #[serde(default)]
    pub cluster_would_stop: bool,
}

/// Operational counters for one batch, appended to `monitoring.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MonitoringRecord {
    /// Batch number, 0-based.
    pub batch_number: u32,
    /// Trials launched in this batch.
    pub launched: u32,
    /// Trials that finished with `status=success`.
    pub succeeded: u32,
    /// Trials that finished with any failure status.
    pub failed: u32,
    /// Trials whose embedding was skipped or failed.
    pub skipped_embeddings: u32,
    /// Wall-clock batch duration in milliseconds.
    pub batch_duration_ms: u64,
    /// Cumulative usage across the run so far.
    pub usage_total: crate::record::UsageTotals,
}

/// Stop decision for one batch.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StopDecision {
    /// The configured stop mode.
    pub mode: StopMode,
    /// Whether the stop rule held for this batch.
    pub would_stop: bool,
    /// Whether the run actually stops after this batch.
    pub should_stop: bool,
    /// Why the run stops, when it does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}
