// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared fixtures for the cross-crate suites.
#![allow(dead_code)]

use arb_config::{ModelCatalog, Resolved};
use arb_core::{
    ClusteringConfig, EmbedTextStrategy, ExecutionBlock, KMinCountRule, MeasurementBlock,
    OutputBlock, PromptEntry, ProtocolBlock, ProtocolKind, ResolvedConfig, RetryPolicy, RunBlock,
    SamplingBlock, SeedValue, StopMode, StopPolicy, WeightedModel,
};
use arb_events::{ConsoleWarningSink, EventBus};
use arb_policy::PolicyFlags;
use arb_provider::{CompletionProvider, EmbeddingProvider};
use arb_runtime::RunOptions;
use std::path::Path;
use std::sync::Arc;

/// A one-model, one-persona, one-protocol resolved configuration with
/// the mock stack in mind.
pub fn resolved_fixture(seed: i64, k_max: u32, batch_size: u32, workers: u32, runs_dir: &Path) -> Resolved {
    let config = ResolvedConfig {
        run: RunBlock {
            seed: SeedValue::Int(seed),
            question: "Is the sky blue?".into(),
        },
        sampling: SamplingBlock {
            models: vec![WeightedModel {
                slug: "openai/gpt-4o".into(),
                weight: 1.0,
                catalog_status: Default::default(),
            }],
            personas: vec![PromptEntry {
                id: "terse".into(),
                weight: 1.0,
                text: Some("You are terse.".into()),
                sha256: None,
            }],
            protocols: vec![PromptEntry {
                id: "plain".into(),
                weight: 1.0,
                text: Some("Answer: {question}".into()),
                sha256: None,
            }],
            instruments: vec![],
        },
        decode: None,
        protocol: ProtocolBlock {
            kind: ProtocolKind::Independent,
            per_call_timeout_ms: 5_000,
            total_trial_timeout_ms: 30_000,
            decision_contract: None,
            debate: None,
        },
        execution: ExecutionBlock {
            k_max,
            batch_size,
            workers,
            retry: RetryPolicy {
                per_call_max_retries: 1,
                backoff_ms: 1,
            },
            stop_mode: StopMode::Advisor,
            k_min: 0,
            k_min_count_rule: KMinCountRule::KEligible,
            stop_policy: None,
        },
        measurement: MeasurementBlock {
            embedding_model: "mock-embed-8".into(),
            embedding_dimensions: 8,
            embed_text_strategy: EmbedTextStrategy::OutcomeOrRawAssistant,
            novelty_threshold: 0.85,
            embedding_max_chars: 8_192,
            clustering: ClusteringConfig::default(),
        },
        output: OutputBlock {
            runs_dir: runs_dir.display().to_string(),
            debug: true,
            receipt: true,
        },
    };
    Resolved {
        config,
        catalog: ModelCatalog {
            models: vec![arb_config::CatalogModel {
                slug: "openai/gpt-4o".into(),
                free: false,
                aliases: vec![],
                context_length: None,
            }],
        },
        model_catalog_sha256: "0".repeat(64),
        prompt_manifest_sha256: "0".repeat(64),
    }
}

/// Convergence-eager stop policy used by the enforcer/advisor suites.
pub fn eager_stop_policy() -> StopPolicy {
    StopPolicy {
        novelty_epsilon: 1.0,
        similarity_threshold: 0.0,
        patience: 1,
    }
}

/// Run options over the given providers, signals disabled.
pub fn options(
    completion: Arc<dyn CompletionProvider>,
    embedding: Arc<dyn EmbeddingProvider>,
) -> RunOptions {
    RunOptions {
        flags: PolicyFlags::default(),
        bus: Arc::new(EventBus::new()),
        warnings: Arc::new(ConsoleWarningSink),
        completion,
        embedding,
        handle_signals: false,
    }
}

/// Read a JSONL artifact into lines.
pub fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_else(|err| panic!("cannot read {}: {err}", path.display()))
        .lines()
        .map(str::to_string)
        .collect()
}

/// Parse a JSON artifact.
pub fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}
