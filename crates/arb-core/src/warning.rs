// SPDX-License-Identifier: MIT OR Apache-2.0
//! Out-of-band warnings.
//!
//! Warnings never contaminate stdout and never affect artifact content;
//! they flow through a sink (console or event bus) chosen by the host.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable machine-readable warning code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WarningCode {
    /// A sampled model is free-tier.
    FreeTierModel,
    /// A sampled model slug is an alias.
    AliasedModel,
    /// A sampled model slug is absent from the catalog.
    UnknownModel,
    /// A model slug lacks a `provider/` prefix.
    UnprefixedModelSlug,
    /// Expected samples per sampling cell is below 2.
    SparseSamplingCell,
    /// `k_min` is smaller than the batch size.
    KMinBelowBatchSize,
    /// A decision contract fallback or failure was recorded.
    ContractFallback,
    /// The Arrow artifact was demoted to JSONL fallback.
    ArrowFallback,
    /// The receipt could not be written.
    ReceiptWriteFailed,
    /// Anything else worth surfacing.
    Other,
}

/// A warning raised during resolution, policy evaluation, or execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RunWarning {
    /// Stable code.
    pub code: WarningCode,
    /// Human-readable detail.
    pub message: String,
}

impl RunWarning {
    /// Build a warning.
    pub fn new(code: WarningCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for RunWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)
    }
}
