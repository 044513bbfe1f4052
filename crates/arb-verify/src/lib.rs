// SPDX-License-Identifier: MIT OR Apache-2.0
//! Run-directory verification.
//!
//! Re-reads a finished run directory and checks what the manifest
//! promises: the config hash recomputes, the plan hash recomputes, the
//! manifest validates against its schema, and every listed artifact
//! exists with its declared record count. Each check reports OK/FAIL
//! independently; verification never mutates the directory.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use arb_core::{ArtifactKind, Manifest, TrialPlanEntry};
use std::fs;
use std::path::Path;

/// Errors that prevent verification from running at all.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The manifest could not be read.
    #[error("cannot read manifest at {path}: {source}")]
    ManifestUnreadable {
        /// Manifest path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The manifest is not valid JSON.
    #[error("manifest is not valid JSON: {0}")]
    ManifestMalformed(#[from] serde_json::Error),
}

/// One verification check.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Check {
    /// Stable check name.
    pub name: String,
    /// Whether the check passed.
    pub ok: bool,
    /// Failure detail (empty on success).
    pub detail: String,
}

impl Check {
    fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ok: true,
            detail: String::new(),
        }
    }

    fn fail(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ok: false,
            detail: detail.into(),
        }
    }
}

/// The full verification report.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VerifyReport {
    /// Run id from the manifest.
    pub run_id: String,
    /// Individual checks, in execution order.
    pub checks: Vec<Check>,
}

impl VerifyReport {
    /// Whether every check passed.
    #[must_use]
    pub fn all_ok(&self) -> bool {
        self.checks.iter().all(|c| c.ok)
    }
}

/// Verify one run directory.
///
/// # Errors
///
/// Only when the manifest itself cannot be read or parsed; individual
/// invariant failures are reported as failed checks, not errors.
pub fn verify_run_dir(run_dir: &Path) -> Result<VerifyReport, VerifyError> {
    let manifest_path = run_dir.join("manifest.json");
    let manifest_text =
        fs::read_to_string(&manifest_path).map_err(|source| VerifyError::ManifestUnreadable {
            path: manifest_path.display().to_string(),
            source,
        })?;
    let manifest_value: serde_json::Value = serde_json::from_str(&manifest_text)?;
    let manifest: Manifest = serde_json::from_value(manifest_value.clone())?;

    let mut checks = Vec::new();
    checks.push(check_manifest_schema(&manifest_value));
    checks.push(check_config_hash(run_dir, &manifest));
    checks.push(check_plan_hash(run_dir, &manifest));
    checks.extend(check_artifacts(run_dir, &manifest));
    checks.push(check_counts(run_dir, &manifest));

    Ok(VerifyReport {
        run_id: manifest.run_id,
        checks,
    })
}

fn check_manifest_schema(manifest_value: &serde_json::Value) -> Check {
    let name = "manifest_schema";
    let schema = schemars::schema_for!(Manifest);
    let schema_value = match serde_json::to_value(&schema) {
        Ok(v) => v,
        Err(err) => return Check::fail(name, format!("schema serialization failed: {err}")),
    };
    let validator = match jsonschema::validator_for(&schema_value) {
        Ok(v) => v,
        Err(err) => return Check::fail(name, format!("schema compilation failed: {err}")),
    };
    let violations: Vec<String> = validator
        .iter_errors(manifest_value)
        .map(|e| format!("{}: {e}", e.instance_path))
        .collect();
    if violations.is_empty() {
        Check::pass(name)
    } else {
        Check::fail(name, violations.join("; "))
    }
}

fn check_config_hash(run_dir: &Path, manifest: &Manifest) -> Check {
    let name = "config_sha256";
    let path = run_dir.join("config.resolved.json");
    let value: serde_json::Value = match fs::read_to_string(&path)
        .map_err(|e| e.to_string())
        .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string()))
    {
        Ok(v) => v,
        Err(err) => return Check::fail(name, format!("cannot read {}: {err}", path.display())),
    };
    match arb_hash::canonical_sha256(&value) {
        Ok(actual) if actual == manifest.config_sha256 => Check::pass(name),
        Ok(actual) => Check::fail(
            name,
            format!("manifest says {}, recomputed {actual}", manifest.config_sha256),
        ),
        Err(err) => Check::fail(name, err.to_string()),
    }
}

fn check_plan_hash(run_dir: &Path, manifest: &Manifest) -> Check {
    let name = "plan_sha256";
    let path = run_dir.join("trial_plan.jsonl");
    let text = match fs::read_to_string(&path) {
        Ok(t) => t,
        Err(err) => return Check::fail(name, format!("cannot read {}: {err}", path.display())),
    };
    let entries: Result<Vec<TrialPlanEntry>, _> =
        text.lines().map(serde_json::from_str).collect();
    let entries = match entries {
        Ok(e) => e,
        Err(err) => return Check::fail(name, format!("plan line is not valid JSON: {err}")),
    };
    match arb_hash::canonical_sha256(&entries) {
        Ok(actual) if actual == manifest.plan_sha256 => Check::pass(name),
        Ok(actual) => Check::fail(
            name,
            format!("manifest says {}, recomputed {actual}", manifest.plan_sha256),
        ),
        Err(err) => Check::fail(name, err.to_string()),
    }
}

fn check_artifacts(run_dir: &Path, manifest: &Manifest) -> Vec<Check> {
    manifest
        .artifacts
        .entries
        .iter()
        .map(|entry| {
            let name = format!("artifact:{}", entry.path);
            let path = run_dir.join(&entry.path);
            if !path.is_file() {
                return Check::fail(name, "listed in manifest but missing on disk");
            }
            if entry.kind == ArtifactKind::Jsonl {
                if let Some(expected) = entry.records {
                    let actual = match fs::read_to_string(&path) {
                        Ok(text) => text.lines().count() as u64,
                        Err(err) => return Check::fail(name, format!("unreadable: {err}")),
                    };
                    if actual != expected {
                        return Check::fail(
                            name,
                            format!("manifest says {expected} records, found {actual}"),
                        );
                    }
                }
            }
            Check::pass(name)
        })
        .collect()
}

fn check_counts(run_dir: &Path, manifest: &Manifest) -> Check {
    let name = "trial_counts";
    let path = run_dir.join("trials.jsonl");
    let actual = match fs::read_to_string(&path) {
        Ok(text) => text.lines().count() as u32,
        // trials.jsonl may legitimately be absent on an aborted run.
        Err(_) => {
            return if manifest.k_attempted == 0 {
                Check::pass(name)
            } else {
                Check::fail(name, "trials.jsonl missing but k_attempted > 0")
            };
        }
    };
    if actual == manifest.k_attempted {
        Check::pass(name)
    } else {
        Check::fail(
            name,
            format!("k_attempted={} but trials.jsonl has {actual} lines", manifest.k_attempted),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arb_core::{
        ArtifactEntry, ArtifactsIndex, KMinCountRule, PolicySnapshot, RunStopReason, StoppingMode,
    };
    use chrono::Utc;
    use std::io::Write as _;

    fn write_run_dir(dir: &Path) -> Manifest {
        let config = serde_json::json!({"run": {"seed": 1, "question": "q"}});
        fs::write(
            dir.join("config.resolved.json"),
            serde_json::to_string_pretty(&config).unwrap(),
        )
        .unwrap();

        let entries: Vec<TrialPlanEntry> = vec![];
        fs::write(dir.join("trial_plan.jsonl"), "").unwrap();

        let mut trials = fs::File::create(dir.join("trials.jsonl")).unwrap();
        writeln!(trials, "{}", serde_json::json!({"trial_id": 0})).unwrap();
        writeln!(trials, "{}", serde_json::json!({"trial_id": 1})).unwrap();

        let manifest = Manifest {
            schema_version: arb_core::SCHEMA_VERSION.into(),
            arbiter_version: arb_core::ARBITER_VERSION.into(),
            run_id: "20260801T000000Z_000001".into(),
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            stop_reason: RunStopReason::Completed,
            stopping_mode: StoppingMode::ResolveOnly,
            incomplete: false,
            k_planned: 2,
            k_attempted: 2,
            k_eligible: 2,
            k_min: 0,
            k_min_count_rule: KMinCountRule::KEligible,
            stop_policy: None,
            hash_algorithm: "sha256".into(),
            config_sha256: arb_hash::canonical_sha256(&config).unwrap(),
            plan_sha256: arb_hash::canonical_sha256(&entries).unwrap(),
            model_catalog_sha256: "0".repeat(64),
            prompt_manifest_sha256: "0".repeat(64),
            artifacts: ArtifactsIndex {
                entries: vec![
                    ArtifactEntry {
                        path: "config.resolved.json".into(),
                        kind: ArtifactKind::Json,
                        records: None,
                    },
                    ArtifactEntry {
                        path: "trials.jsonl".into(),
                        kind: ArtifactKind::Jsonl,
                        records: Some(2),
                    },
                ],
            },
            policy: PolicySnapshot::default(),
        };
        fs::write(
            dir.join("manifest.json"),
            serde_json::to_string_pretty(&manifest).unwrap(),
        )
        .unwrap();
        manifest
    }

    #[test]
    fn clean_directory_passes_every_check() {
        let dir = tempfile::tempdir().unwrap();
        write_run_dir(dir.path());
        let report = verify_run_dir(dir.path()).unwrap();
        assert!(report.all_ok(), "{:#?}", report.checks);
    }

    #[test]
    fn tampered_config_fails_hash_check() {
        let dir = tempfile::tempdir().unwrap();
        write_run_dir(dir.path());
        fs::write(
            dir.path().join("config.resolved.json"),
            r#"{"run": {"seed": 2, "question": "q"}}"#,
        )
        .unwrap();
        let report = verify_run_dir(dir.path()).unwrap();
        let check = report.checks.iter().find(|c| c.name == "config_sha256").unwrap();
        assert!(!check.ok);
        assert!(!report.all_ok());
    }

    #[test]
    fn wrong_record_count_fails_artifact_check() {
        let dir = tempfile::tempdir().unwrap();
        write_run_dir(dir.path());
        fs::write(dir.path().join("trials.jsonl"), "{\"trial_id\":0}\n").unwrap();
        let report = verify_run_dir(dir.path()).unwrap();
        let artifact = report
            .checks
            .iter()
            .find(|c| c.name == "artifact:trials.jsonl")
            .unwrap();
        assert!(!artifact.ok, "{}", artifact.detail);
        let counts = report.checks.iter().find(|c| c.name == "trial_counts").unwrap();
        assert!(!counts.ok);
    }

    #[test]
    fn missing_artifact_fails() {
        let dir = tempfile::tempdir().unwrap();
        write_run_dir(dir.path());
        fs::remove_file(dir.path().join("trials.jsonl")).unwrap();
        let report = verify_run_dir(dir.path()).unwrap();
        let artifact = report
            .checks
            .iter()
            .find(|c| c.name == "artifact:trials.jsonl")
            .unwrap();
        assert!(!artifact.ok);
    }

    #[test]
    fn missing_manifest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            verify_run_dir(dir.path()),
            Err(VerifyError::ManifestUnreadable { .. })
        ));
    }
}
