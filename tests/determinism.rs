// SPDX-License-Identifier: MIT OR Apache-2.0
//! Determinism guarantees across the whole pipeline.
//!
//! Two runs with the same seed must agree on the plan hash, the order
//! of every line-oriented artifact, the mock embedding vectors, and the
//! full convergence trace, regardless of worker count.

mod common;

use arb_provider::{MockCompletionProvider, MockEmbeddingProvider};
use arb_runtime::{RunOrchestrator, RunOutcome};
use common::{options, read_lines, resolved_fixture};
use std::path::Path;
use std::sync::Arc;

async fn run_once(seed: i64, workers: u32, runs_dir: &Path) -> RunOutcome {
    let resolved = resolved_fixture(seed, 8, 3, workers, runs_dir);
    let seed_str = seed.to_string();
    RunOrchestrator::new(options(
        Arc::new(MockCompletionProvider::new(seed_str.clone())),
        Arc::new(MockEmbeddingProvider::new(seed_str, 8)),
    ))
    .execute_resolved(resolved)
    .await
    .unwrap()
}

#[tokio::test]
async fn same_seed_same_plan_hash_and_vectors() {
    let dir = tempfile::tempdir().unwrap();
    let a = run_once(424242, 3, dir.path()).await;
    let b = run_once(424242, 3, dir.path()).await;

    assert_eq!(a.manifest.plan_sha256, b.manifest.plan_sha256);
    assert_eq!(a.manifest.config_sha256, b.manifest.config_sha256);

    // The plan is byte-identical.
    assert_eq!(
        read_lines(&a.run_dir.join("trial_plan.jsonl")),
        read_lines(&b.run_dir.join("trial_plan.jsonl"))
    );

    // Mock vectors are bit-identical.
    assert_eq!(
        read_lines(&a.run_dir.join("debug/embeddings.jsonl")),
        read_lines(&b.run_dir.join("debug/embeddings.jsonl"))
    );

    // Convergence metrics are bit-identical.
    assert_eq!(
        read_lines(&a.run_dir.join("convergence_trace.jsonl")),
        read_lines(&b.run_dir.join("convergence_trace.jsonl"))
    );
}

#[tokio::test]
async fn worker_count_does_not_change_artifact_order() {
    let dir = tempfile::tempdir().unwrap();
    let serial = run_once(1337, 1, dir.path()).await;
    let parallel = run_once(1337, 8, dir.path()).await;

    let ids = |outcome: &RunOutcome, file: &str| -> Vec<u64> {
        read_lines(&outcome.run_dir.join(file))
            .iter()
            .map(|l| {
                serde_json::from_str::<serde_json::Value>(l).unwrap()["trial_id"]
                    .as_u64()
                    .unwrap()
            })
            .collect()
    };
    assert_eq!(ids(&serial, "trials.jsonl"), ids(&parallel, "trials.jsonl"));
    assert_eq!(ids(&serial, "parsed.jsonl"), ids(&parallel, "parsed.jsonl"));
    assert_eq!(
        read_lines(&serial.run_dir.join("debug/embeddings.jsonl")),
        read_lines(&parallel.run_dir.join("debug/embeddings.jsonl"))
    );
    assert_eq!(
        read_lines(&serial.run_dir.join("convergence_trace.jsonl")),
        read_lines(&parallel.run_dir.join("convergence_trace.jsonl"))
    );
}

#[tokio::test]
async fn different_seeds_diverge() {
    let dir = tempfile::tempdir().unwrap();
    let a = run_once(1, 2, dir.path()).await;
    let b = run_once(2, 2, dir.path()).await;
    assert_ne!(a.manifest.plan_sha256, b.manifest.plan_sha256);
    assert_ne!(
        read_lines(&a.run_dir.join("debug/embeddings.jsonl")),
        read_lines(&b.run_dir.join("debug/embeddings.jsonl"))
    );
}

#[tokio::test]
async fn run_ids_are_unique_and_well_formed() {
    let dir = tempfile::tempdir().unwrap();
    let a = run_once(5, 2, dir.path()).await;
    let b = run_once(5, 2, dir.path()).await;
    assert_ne!(a.run_id, b.run_id);
    for id in [&a.run_id, &b.run_id] {
        let (stamp, suffix) = id.split_once('_').unwrap();
        assert_eq!(stamp.len(), 16, "{id}");
        assert!(stamp.ends_with('Z'));
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
