// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end mock runs against the full pipeline, checking the run
//! directory an outside reader would consume.

mod common;

use arb_core::{RunStopReason, StoppingMode};
use arb_provider::{DegenerateEmbeddingProvider, MockCompletionProvider, MockEmbeddingProvider};
use arb_runtime::RunOrchestrator;
use arrow::ipc::reader::FileReader;
use common::{eager_stop_policy, options, read_json, read_lines, resolved_fixture};
use std::sync::Arc;

fn mock_providers(seed: &str) -> (Arc<MockCompletionProvider>, Arc<MockEmbeddingProvider>) {
    (
        Arc::new(MockCompletionProvider::new(seed)),
        Arc::new(MockEmbeddingProvider::new(seed, 8)),
    )
}

#[tokio::test]
async fn small_run_writes_a_complete_directory() {
    let dir = tempfile::tempdir().unwrap();
    let resolved = resolved_fixture(424242, 5, 2, 3, dir.path());
    let (completion, embedding) = mock_providers("424242");
    let outcome = RunOrchestrator::new(options(completion, embedding))
        .execute_resolved(resolved)
        .await
        .unwrap();

    let root = &outcome.run_dir;
    assert!(root.join("config.resolved.json").is_file());
    assert!(root.join("manifest.json").is_file());
    assert_eq!(read_lines(&root.join("trial_plan.jsonl")).len(), 5);
    assert_eq!(read_lines(&root.join("trials.jsonl")).len(), 5);
    assert_eq!(read_lines(&root.join("parsed.jsonl")).len(), 5);
    assert_eq!(read_lines(&root.join("debug/embeddings.jsonl")).len(), 5);
    // 5 trials in batches of 2 -> 3 batches.
    assert_eq!(read_lines(&root.join("convergence_trace.jsonl")).len(), 3);
    assert_eq!(read_lines(&root.join("monitoring.jsonl")).len(), 3);
    assert!(root.join("receipt.txt").is_file());

    let manifest = &outcome.manifest;
    assert_eq!(manifest.stop_reason, RunStopReason::Completed);
    assert_eq!(manifest.stopping_mode, StoppingMode::ResolveOnly);
    assert!(!manifest.incomplete);
    assert_eq!(manifest.k_planned, 5);
    assert_eq!(manifest.k_attempted, 5);
    assert_eq!(manifest.k_eligible, 5);

    // The embeddings Arrow file holds exactly the 5 eligible rows, in
    // trial order.
    let file = std::fs::File::open(root.join("embeddings.arrow")).unwrap();
    let reader = FileReader::try_new(file, None).unwrap();
    let rows: usize = reader.map(|b| b.unwrap().num_rows()).sum();
    assert_eq!(rows, 5);

    let provenance = read_json(&root.join("embeddings.provenance.json"));
    assert_eq!(provenance["status"], "arrow_generated");
    assert_eq!(provenance["row_count"], 5);
    assert_eq!(provenance["dimensions"], 8);

    // Aggregates mirror the last convergence record; clustering is off
    // so cluster_count is null.
    let aggregates = read_json(&root.join("aggregates.json"));
    let last_trace: serde_json::Value = serde_json::from_str(
        read_lines(&root.join("convergence_trace.jsonl"))
            .last()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(aggregates["novelty_rate"], last_trace["novelty_rate"]);
    assert!(aggregates["cluster_count"].is_null());
}

#[tokio::test]
async fn enforcer_converges_early_on_degenerate_embeddings() {
    let dir = tempfile::tempdir().unwrap();
    let mut resolved = resolved_fixture(424242, 6, 2, 2, dir.path());
    resolved.config.execution.stop_mode = arb_core::StopMode::Enforcer;
    resolved.config.execution.stop_policy = Some(eager_stop_policy());
    let completion = Arc::new(MockCompletionProvider::new("424242"));
    let embedding = Arc::new(DegenerateEmbeddingProvider::new(8));
    let outcome = RunOrchestrator::new(options(completion, embedding))
        .execute_resolved(resolved)
        .await
        .unwrap();

    assert_eq!(outcome.manifest.stop_reason, RunStopReason::Converged);
    assert!(outcome.manifest.k_attempted < 6, "stopped after {} trials", outcome.manifest.k_attempted);
    assert_eq!(outcome.manifest.stopping_mode, StoppingMode::Enforcer);
    assert!(!outcome.manifest.incomplete);
}

#[tokio::test]
async fn advisor_reports_would_stop_but_runs_to_k_max() {
    let dir = tempfile::tempdir().unwrap();
    let mut resolved = resolved_fixture(424242, 6, 2, 2, dir.path());
    resolved.config.execution.stop_policy = Some(eager_stop_policy());
    let completion = Arc::new(MockCompletionProvider::new("424242"));
    let embedding = Arc::new(DegenerateEmbeddingProvider::new(8));
    let outcome = RunOrchestrator::new(options(completion, embedding))
        .execute_resolved(resolved)
        .await
        .unwrap();

    assert_eq!(outcome.manifest.stop_reason, RunStopReason::KMaxReached);
    assert_eq!(outcome.manifest.k_attempted, 6);

    let trace: Vec<serde_json::Value> = read_lines(&outcome.run_dir.join("convergence_trace.jsonl"))
        .iter()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert!(trace.iter().any(|r| r["stop"]["would_stop"] == true));
    assert!(trace.iter().all(|r| r["stop"]["should_stop"] == false));
}

#[tokio::test]
async fn clustering_produces_group_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let mut resolved = resolved_fixture(424242, 6, 3, 2, dir.path());
    resolved.config.measurement.clustering.enabled = true;
    resolved.config.measurement.clustering.tau = 0.2;
    let (completion, embedding) = mock_providers("424242");
    let outcome = RunOrchestrator::new(options(completion, embedding))
        .execute_resolved(resolved)
        .await
        .unwrap();

    let root = &outcome.run_dir;
    assert_eq!(read_lines(&root.join("groups/assignments.jsonl")).len(), 6);
    let state = read_json(&root.join("groups/state.json"));
    let groups = state["groups"].as_array().unwrap();
    assert!(!groups.is_empty());
    let member_total: u64 = groups
        .iter()
        .map(|g| g["member_count"].as_u64().unwrap())
        .sum();
    assert_eq!(member_total, 6);

    let aggregates = read_json(&root.join("aggregates.json"));
    assert_eq!(
        aggregates["cluster_count"].as_u64().unwrap(),
        groups.len() as u64
    );

    // Every convergence record carries grouping metrics.
    for line in read_lines(&root.join("convergence_trace.jsonl")) {
        let record: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert!(record["grouping"]["group_distribution"].is_array());
    }
}

#[tokio::test]
async fn trials_jsonl_is_sorted_by_trial_id() {
    let dir = tempfile::tempdir().unwrap();
    // Wide batch, several workers: completion order is scrambled, the
    // artifact must not be.
    let resolved = resolved_fixture(7, 12, 12, 6, dir.path());
    let (completion, embedding) = mock_providers("7");
    let outcome = RunOrchestrator::new(options(completion, embedding))
        .execute_resolved(resolved)
        .await
        .unwrap();

    let ids: Vec<u64> = read_lines(&outcome.run_dir.join("trials.jsonl"))
        .iter()
        .map(|l| {
            serde_json::from_str::<serde_json::Value>(l).unwrap()["trial_id"]
                .as_u64()
                .unwrap()
        })
        .collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);
    assert_eq!(ids.len(), 12);
}

#[tokio::test]
async fn manifest_artifact_index_matches_disk() {
    let dir = tempfile::tempdir().unwrap();
    let resolved = resolved_fixture(99, 4, 2, 2, dir.path());
    let (completion, embedding) = mock_providers("99");
    let outcome = RunOrchestrator::new(options(completion, embedding))
        .execute_resolved(resolved)
        .await
        .unwrap();

    for entry in &outcome.manifest.artifacts.entries {
        let path = outcome.run_dir.join(&entry.path);
        assert!(path.is_file(), "{} listed but missing", entry.path);
        if entry.path.ends_with(".jsonl") {
            if let Some(records) = entry.records {
                let lines = read_lines(&path).len() as u64;
                assert_eq!(lines, records, "{} record count", entry.path);
            }
        }
    }
}
