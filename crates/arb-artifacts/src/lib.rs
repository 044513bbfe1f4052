// SPDX-License-Identifier: MIT OR Apache-2.0
//! Run-directory artifact writers.
//!
//! Three write disciplines, by file class:
//! - single JSON documents are written atomically (temp file, fsync,
//!   rename), so a crash never leaves a partial `manifest.json`;
//! - JSON Lines streams are append-only with an explicit `close`, and
//!   any I/O error is fatal to the run;
//! - the Arrow file is a capability: when the columnar build fails the
//!   run demotes to `jsonl_fallback` and carries on.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod arrow_io;
mod jsonl;
mod paths;
mod provenance;
mod receipt;

pub use arrow_io::write_arrow_embeddings;
pub use jsonl::JsonlWriter;
pub use paths::RunPaths;
pub use provenance::{EmbeddingsProvenance, ProvenanceStatus};
pub use receipt::render_receipt;

use serde::Serialize;
use std::fs;
use std::io::Write as _;
use std::path::Path;

/// Errors from artifact writes.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// Filesystem failure.
    #[error("artifact I/O failed at {path}: {source}")]
    Io {
        /// Path involved.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Serialization failure.
    #[error("failed to serialize artifact record: {0}")]
    Json(#[from] serde_json::Error),
}

/// Aggregate snapshot written as `aggregates.json`: the last batch's
/// convergence metrics plus clustering aggregates when enabled.
#[derive(Debug, Clone, Serialize, serde::Deserialize, schemars::JsonSchema)]
pub struct Aggregates {
    /// Batches executed.
    pub batch_count: u32,
    /// Cumulative trials attempted.
    pub k_attempted: u32,
    /// Cumulative eligible trials.
    pub k_eligible: u32,
    /// Last batch's novelty rate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub novelty_rate: Option<f64>,
    /// Last batch's mean max-similarity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_max_sim_to_prior: Option<f64>,
    /// Group count; null when clustering is disabled.
    pub cluster_count: Option<u32>,
    /// Largest group share; null when clustering is disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub largest_group_share: Option<f64>,
    /// Distribution entropy; null when clustering is disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entropy: Option<f64>,
    /// Effective group count; null when clustering is disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_group_count: Option<f64>,
}

/// Write a JSON document atomically: serialize to `<path>.tmp`, fsync,
/// rename over `path`.
///
/// # Errors
///
/// Serialization or filesystem failure; on failure the target file is
/// left untouched (only the `.tmp` sibling may remain).
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ArtifactError> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension(tmp_extension(path));
    let io_err = |source| ArtifactError::Io {
        path: path.display().to_string(),
        source,
    };
    {
        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(json.as_bytes()).map_err(io_err)?;
        file.write_all(b"\n").map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
    }
    fs::rename(&tmp, path).map_err(io_err)
}

fn tmp_extension(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{ext}.tmp"),
        None => "tmp".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_lands_complete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        write_json_atomic(&path, &serde_json::json!({"a": 1})).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["a"], 1);
        // No tmp residue after a successful write.
        assert!(!dir.path().join("manifest.json.tmp").exists());
    }

    #[test]
    fn atomic_write_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_json_atomic(&path, &serde_json::json!({"v": 1})).unwrap();
        write_json_atomic(&path, &serde_json::json!({"v": 2})).unwrap();
        let v: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(v["v"], 2);
    }

    #[test]
    fn atomic_write_fails_on_missing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no_such_dir").join("doc.json");
        let err = write_json_atomic(&path, &serde_json::json!({})).unwrap_err();
        assert!(matches!(err, ArtifactError::Io { .. }));
    }

    #[test]
    fn aggregates_null_cluster_count_serializes() {
        let a = Aggregates {
            batch_count: 3,
            k_attempted: 5,
            k_eligible: 5,
            novelty_rate: Some(0.0),
            mean_max_sim_to_prior: Some(1.0),
            cluster_count: None,
            largest_group_share: None,
            entropy: None,
            effective_group_count: None,
        };
        let v = serde_json::to_value(&a).unwrap();
        // cluster_count is always present, null when disabled.
        assert!(v.get("cluster_count").is_some());
        assert!(v["cluster_count"].is_null());
    }
}
