// SPDX-License-Identifier: MIT OR Apache-2.0
//! The human-readable receipt.
//!
//! Best-effort: a failed receipt write is dropped from the artifact
//! index but never fails the run.

use arb_core::Manifest;
use std::fmt::Write as _;

/// Render `receipt.txt` from a finished manifest.
#[must_use]
pub fn render_receipt(manifest: &Manifest) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "arbiter run {}", manifest.run_id);
    let _ = writeln!(out, "{}", "=".repeat(16 + manifest.run_id.len()));
    let _ = writeln!(out);
    let _ = writeln!(out, "started   : {}", manifest.started_at.to_rfc3339());
    if let Some(completed) = manifest.completed_at {
        let _ = writeln!(out, "completed : {}", completed.to_rfc3339());
    }
    let _ = writeln!(out, "stop      : {:?}", manifest.stop_reason);
    let _ = writeln!(out, "mode      : {:?}", manifest.stopping_mode);
    let _ = writeln!(out, "incomplete: {}", manifest.incomplete);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "trials    : {} planned / {} attempted / {} eligible",
        manifest.k_planned, manifest.k_attempted, manifest.k_eligible
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "config  sha256 {}", manifest.config_sha256);
    let _ = writeln!(out, "plan    sha256 {}", manifest.plan_sha256);
    let _ = writeln!(out, "catalog sha256 {}", manifest.model_catalog_sha256);
    let _ = writeln!(out, "prompts sha256 {}", manifest.prompt_manifest_sha256);
    let _ = writeln!(out);
    let _ = writeln!(out, "artifacts ({}):", manifest.artifacts.entries.len());
    for entry in &manifest.artifacts.entries {
        match entry.records {
            Some(n) => {
                let _ = writeln!(out, "  {} ({n} records)", entry.path);
            }
            None => {
                let _ = writeln!(out, "  {}", entry.path);
            }
        }
    }
    out
}
