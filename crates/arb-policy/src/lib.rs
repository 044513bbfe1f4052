// SPDX-License-Identifier: MIT OR Apache-2.0
//! Run-admission policy evaluation.
//!
//! Every finding is surfaced as a warning; under strict mode findings
//! not covered by an `--allow-*` flag become errors, and any error
//! aborts the run before a single artifact is written.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use arb_config::Resolved;
use arb_core::{
    CatalogStatus, ContractFailurePolicy, PolicySnapshot, RunWarning, WarningCode,
};

/// Flags that shape the policy snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyFlags {
    /// Findings become errors unless explicitly allowed.
    pub strict: bool,
    /// Permit free-tier models under strict mode.
    pub allow_free: bool,
    /// Permit aliased model slugs under strict mode.
    pub allow_aliased: bool,
    /// How contract fallbacks/failures affect the run.
    pub contract_failure_policy: ContractFailurePolicy,
}

/// The outcome of policy evaluation.
#[derive(Debug, Clone)]
pub struct PolicyReport {
    /// Snapshot recorded in the manifest.
    pub snapshot: PolicySnapshot,
    /// Advisory findings (always produced).
    pub warnings: Vec<RunWarning>,
    /// Blocking findings (strict mode only).
    pub errors: Vec<String>,
}

impl PolicyReport {
    /// Whether the run may proceed.
    #[must_use]
    pub fn is_admissible(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Error returned when strict-mode findings block the run.
#[derive(Debug, thiserror::Error)]
#[error("policy rejected the run:\n{}", reasons.join("\n"))]
pub struct PolicyError {
    /// Individual blocking findings.
    pub reasons: Vec<String>,
}

/// Evaluate admission policy for a resolved configuration.
#[must_use]
pub fn evaluate(resolved: &Resolved, flags: &PolicyFlags) -> PolicyReport {
    let mut warnings = Vec::new();
    let mut errors = Vec::new();
    let config = &resolved.config;
    let catalog = &resolved.catalog;

    let mut finding = |code: WarningCode, message: String, blocking: bool| {
        warnings.push(RunWarning::new(code, message.clone()));
        if blocking {
            errors.push(message);
        }
    };

    for model in &config.sampling.models {
        let slug = &model.slug;
        if catalog.is_free(slug) {
            finding(
                WarningCode::FreeTierModel,
                format!("model '{slug}' is free-tier"),
                flags.strict && !flags.allow_free,
            );
        }
        if catalog.is_alias(slug) {
            finding(
                WarningCode::AliasedModel,
                format!("model '{slug}' is an alias"),
                flags.strict && !flags.allow_aliased,
            );
        }
        if model.catalog_status == CatalogStatus::UnknownToCatalog {
            finding(
                WarningCode::UnknownModel,
                format!("model '{slug}' is not in the catalog"),
                flags.strict,
            );
        }
        if !slug.contains('/') {
            finding(
                WarningCode::UnprefixedModelSlug,
                format!("model '{slug}' lacks a provider/ prefix"),
                flags.strict,
            );
        }
    }

    let cells = config.sampling.models.len()
        * config.sampling.personas.len()
        * config.sampling.protocols.len();
    if cells > 0 {
        let expected = f64::from(config.execution.k_max) / cells as f64;
        if expected < 2.0 {
            finding(
                WarningCode::SparseSamplingCell,
                format!(
                    "expected samples per cell is {expected:.2} (k_max={}, cells={cells})",
                    config.execution.k_max
                ),
                flags.strict,
            );
        }
    }

    // k_min only gates stopping, so the check is scoped to runs that
    // can actually stop early.
    if config.execution.stop_policy.is_some()
        && config.execution.k_min < config.execution.batch_size
    {
        finding(
            WarningCode::KMinBelowBatchSize,
            format!(
                "k_min={} is below batch_size={}",
                config.execution.k_min, config.execution.batch_size
            ),
            flags.strict,
        );
    }

    PolicyReport {
        snapshot: PolicySnapshot {
            strict: flags.strict,
            allow_free: flags.allow_free,
            allow_aliased: flags.allow_aliased,
            contract_failure_policy: flags.contract_failure_policy,
        },
        warnings,
        errors,
    }
}
