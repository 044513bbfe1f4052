// SPDX-License-Identifier: MIT OR Apache-2.0
//! The frozen trial plan.
//!
//! A plan is immutable once compiled; its hash is computed over the
//! canonical JSON of the entry list, so it depends only on the seed,
//! the sampling sets, the decode ranges, the protocol, and `k_max`.

use crate::config::ProtocolKind;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One planned trial.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TrialPlanEntry {
    /// Dense identifier in `0..k_max`.
    pub trial_id: u32,
    /// Protocol family for this trial.
    pub protocol: ProtocolKind,
    /// The sampled `(model, persona, protocol, decode)` assignment.
    pub assigned_config: AssignedConfig,
    /// Per-slot assignments for debate trials, keyed by slot id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_assignments: Option<BTreeMap<String, RoleAssignment>>,
    /// Debate shape for debate trials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debate: Option<crate::config::DebateSpec>,
}

/// The sampled assignment a trial runs under.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AssignedConfig {
    /// Model slug.
    pub model: String,
    /// Persona id.
    pub persona: String,
    /// Protocol template id.
    pub protocol: String,
    /// Concrete decode parameters, if decode ranges were configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decode: Option<DecodeParams>,
}

/// Per-slot assignment inside a debate trial.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RoleAssignment {
    /// Model slug for this slot.
    pub model: String,
    /// Persona id for this slot.
    pub persona: String,
    /// Concrete decode parameters for this slot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decode: Option<DecodeParams>,
}

/// Concrete decode parameters resolved from the configured ranges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DecodeParams {
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling mass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Completion token cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
}

/// A compiled, immutable trial plan.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TrialPlan {
    /// Entries sorted by dense `trial_id`.
    pub entries: Vec<TrialPlanEntry>,
    /// SHA-256 over the canonical JSON of `entries`.
    pub plan_sha256: String,
}

impl TrialPlan {
    /// Number of planned trials.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the plan is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
