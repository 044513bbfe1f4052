// SPDX-License-Identifier: MIT OR Apache-2.0
//! Lifecycle owner: resolve → policy → plan → batches → finalize.

use crate::signal::SignalGuard;
use arb_artifacts::{
    Aggregates, ArtifactError, EmbeddingsProvenance, JsonlWriter, RunPaths, render_receipt,
    write_arrow_embeddings, write_json_atomic,
};
use arb_cluster::LeaderClusterer;
use arb_config::{ConfigError, Resolved, ResolverInputs};
use arb_core::{
    ArtifactEntry, ArtifactKind, ArtifactsIndex, ClusterStopMode, ContractFailurePolicy,
    Manifest, ManifestStopPolicy, ParseStatus, PromptEntry, ResolvedConfig, RunStopReason,
    RunWarning, StopMode, StoppingMode, TrialPlan, UsageTotals, WarningCode, new_run_id,
};
use arb_events::{EventBus, EventError, RunEvent, WarningSink};
use arb_exec::{ExecutorConfig, TrialExecutor, TrialOutcome, run_batch};
use arb_monitor::{ClusterBatchInfo, ConvergenceMonitor, MonitorConfig};
use arb_plan::PlanError;
use arb_policy::{PolicyError, PolicyFlags};
use arb_provider::{CancellationToken, CompletionProvider, EmbeddingProvider};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Errors that fail a run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Resolution failed before any artifact was written.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Strict policy rejected the run before any artifact was written.
    #[error(transparent)]
    Policy(#[from] PolicyError),
    /// Plan compilation failed.
    #[error(transparent)]
    Plan(#[from] PlanError),
    /// The decision contract schema does not compile.
    #[error(transparent)]
    Contract(#[from] arb_contract::ContractError),
    /// An artifact write failed (fatal by design).
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    /// Canonicalization for provenance hashing failed.
    #[error(transparent)]
    Canon(#[from] arb_hash::CanonError),
    /// Run-directory creation failed.
    #[error("failed to create run directory {path}: {source}")]
    RunDir {
        /// Directory path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A strict event subscriber failed.
    #[error(transparent)]
    Event(#[from] EventError),
}

/// Collaborators and flags for one run.
pub struct RunOptions {
    /// Policy flags (strict / allow-*).
    pub flags: PolicyFlags,
    /// The run's event bus.
    pub bus: Arc<EventBus>,
    /// Warning destination.
    pub warnings: Arc<dyn WarningSink>,
    /// Completion endpoint.
    pub completion: Arc<dyn CompletionProvider>,
    /// Embedding endpoint.
    pub embedding: Arc<dyn EmbeddingProvider>,
    /// Install SIGINT/SIGTERM handlers for the duration of the run.
    pub handle_signals: bool,
}

/// What a finished run hands back.
#[derive(Debug)]
pub struct RunOutcome {
    /// The run identifier.
    pub run_id: String,
    /// Absolute or caller-relative run directory.
    pub run_dir: PathBuf,
    /// The final manifest as written.
    pub manifest: Manifest,
}

/// The run orchestrator.
pub struct RunOrchestrator {
    options: RunOptions,
}

impl RunOrchestrator {
    /// Build an orchestrator.
    #[must_use]
    pub fn new(options: RunOptions) -> Self {
        Self { options }
    }

    /// Resolve inputs from disk and execute the run.
    ///
    /// # Errors
    ///
    /// Any [`RunError`]; configuration and policy failures abort before
    /// the run directory exists.
    pub async fn execute(self, inputs: &ResolverInputs) -> Result<RunOutcome, RunError> {
        let resolved = arb_config::resolve(inputs)?;
        self.execute_resolved(resolved).await
    }

    /// Execute a run from an already-resolved configuration.
    ///
    /// # Errors
    ///
    /// Any [`RunError`].
    pub async fn execute_resolved(self, resolved: Resolved) -> Result<RunOutcome, RunError> {
        let report = arb_policy::evaluate(&resolved, &self.options.flags);
        for warning in &report.warnings {
            self.options.warnings.raise(warning.clone());
        }
        if !report.is_admissible() {
            return Err(PolicyError {
                reasons: report.errors,
            }
            .into());
        }

        let plan = arb_plan::compile(&resolved.config)?;

        let started_at = Utc::now();
        let run_id = new_run_id(started_at);
        let config = &resolved.config;
        let paths = RunPaths::new(Path::new(&config.output.runs_dir), &run_id);
        paths
            .create(config.output.debug, config.measurement.clustering.enabled)
            .map_err(|source| RunError::RunDir {
                path: paths.root().display().to_string(),
                source,
            })?;

        let stop = CancellationToken::new();
        let _signals = if self.options.handle_signals {
            SignalGuard::install(stop.clone())
        } else {
            SignalGuard::disabled()
        };

        info!(%run_id, k_planned = plan.len(), "run starting");
        self.options.bus.emit(RunEvent::RunStarted {
            run_id: run_id.clone(),
        })?;

        let mut ctx = RunCtx::open(&resolved, &plan, &paths, &run_id, started_at, &report)?;
        self.options.bus.emit(RunEvent::PlanCompiled {
            k_planned: plan.len() as u32,
            plan_sha256: plan.plan_sha256.clone(),
        })?;

        let driven = self.drive_batches(&resolved, &plan, &stop, &mut ctx).await;
        let result = match driven {
            Ok(stop_reason) => ctx.finalize(stop_reason),
            Err(err) => {
                // Best effort: a failed run still leaves a manifest
                // saying so when the directory is writable.
                ctx.try_write_error_manifest();
                Err(err)
            }
        };

        self.options.bus.flush().await?;
        match result {
            Ok(manifest) => {
                self.options.bus.emit(RunEvent::RunCompleted {
                    run_id: run_id.clone(),
                    stop_reason: format!("{:?}", manifest.stop_reason),
                })?;
                self.options.bus.flush().await?;
                Ok(RunOutcome {
                    run_id,
                    run_dir: paths.root().to_path_buf(),
                    manifest,
                })
            }
            Err(err) => Err(err),
        }
    }

    async fn drive_batches(
        &self,
        resolved: &Resolved,
        plan: &TrialPlan,
        stop: &CancellationToken,
        ctx: &mut RunCtx<'_>,
    ) -> Result<RunStopReason, RunError> {
        let config = &resolved.config;
        let executor = Arc::new(TrialExecutor::new(
            executor_config(config, self.options.flags.contract_failure_policy),
            Arc::clone(&self.options.completion),
            Arc::clone(&self.options.embedding),
        )?);
        // Trial-level cancellation is distinct from the stop flag: an
        // interrupt drains in-flight trials instead of aborting them.
        let trial_cancel = CancellationToken::new();
        let has_contract = config.protocol.decision_contract.is_some();
        let policy = self.options.flags.contract_failure_policy;

        for (batch_number, chunk) in plan
            .entries
            .chunks(config.execution.batch_size.max(1) as usize)
            .enumerate()
        {
            let batch_number = batch_number as u32;
            if stop.is_cancelled() {
                return Ok(RunStopReason::UserInterrupt);
            }
            self.options.bus.emit(RunEvent::BatchStarted {
                batch_number,
                size: chunk.len() as u32,
            })?;
            let batch_started = std::time::Instant::now();

            let outcomes: Vec<TrialOutcome> = run_batch(
                config.execution.workers,
                chunk.to_vec(),
                stop,
                |entry| {
                    let executor = Arc::clone(&executor);
                    let cancel = trial_cancel.clone();
                    async move { Ok::<_, RunError>(executor.run_trial(&entry, &cancel).await) }
                },
                |outcome: &TrialOutcome| outcome.trial_id(),
            )
            .await?;

            let record = ctx.absorb_batch(
                batch_number,
                &outcomes,
                batch_started.elapsed().as_millis() as u64,
            )?;
            for outcome in &outcomes {
                self.options.bus.emit(RunEvent::TrialCompleted {
                    trial_id: outcome.trial_id(),
                    status: format!("{:?}", outcome.trial.status),
                })?;
            }
            self.options.bus.emit(RunEvent::BatchCompleted { batch_number })?;
            self.options.bus.emit(RunEvent::ConvergenceEvaluated {
                batch_number,
                would_stop: record.stop.would_stop,
                should_stop: record.stop.should_stop,
            })?;

            // Interrupt outranks the contract-failure policy when both
            // arise in the same batch.
            if stop.is_cancelled() {
                return Ok(RunStopReason::UserInterrupt);
            }
            if has_contract && policy == ContractFailurePolicy::Fail && ctx.contract_failures > 0 {
                self.options.warnings.raise(RunWarning::new(
                    WarningCode::ContractFallback,
                    format!(
                        "{} trial(s) missed the decision contract; failing per policy",
                        ctx.contract_failures
                    ),
                ));
                return Ok(RunStopReason::Error);
            }
            if record.stop.should_stop {
                info!(batch_number, "stop rule fired; finalizing early");
                return Ok(RunStopReason::Converged);
            }
        }

        Ok(if config.execution.stop_policy.is_some() {
            RunStopReason::KMaxReached
        } else {
            RunStopReason::Completed
        })
    }
}

fn executor_config(config: &ResolvedConfig, policy: ContractFailurePolicy) -> ExecutorConfig {
    let mut prompts = BTreeMap::new();
    let mut inline = |entries: &[PromptEntry]| {
        for entry in entries {
            prompts.insert(entry.id.clone(), entry.text.clone().unwrap_or_default());
        }
    };
    inline(&config.sampling.personas);
    inline(&config.sampling.protocols);
    inline(&config.sampling.instruments);
    ExecutorConfig {
        seed: config.run.seed.to_string(),
        question: config.run.question.clone(),
        protocol: config.protocol.clone(),
        retry: config.execution.retry,
        embed_text_strategy: config.measurement.embed_text_strategy,
        embedding_max_chars: config.measurement.embedding_max_chars,
        embedding_model: config.measurement.embedding_model.clone(),
        contract_failure_policy: policy,
        prompts,
    }
}

/// Mutable per-run state: open streams, clustering, the monitor, and
/// everything the final manifest needs.
struct RunCtx<'a> {
    resolved: &'a Resolved,
    paths: &'a RunPaths,
    run_id: &'a str,
    started_at: chrono::DateTime<Utc>,
    policy: arb_core::PolicySnapshot,
    plan_sha256: String,
    config_sha256: String,
    k_planned: u32,

    trials: JsonlWriter,
    parsed: JsonlWriter,
    convergence: JsonlWriter,
    monitoring: JsonlWriter,
    debug_embeddings: Option<JsonlWriter>,
    assignments: Option<JsonlWriter>,
    plan_records: u64,

    clusterer: Option<LeaderClusterer>,
    monitor: ConvergenceMonitor,
    usage_total: UsageTotals,
    contract_failures: u32,
    all_embeddings: Vec<(u32, Vec<f32>)>,
    last_convergence: Option<arb_core::ConvergenceRecord>,
    batch_count: u32,
}

impl<'a> RunCtx<'a> {
    fn open(
        resolved: &'a Resolved,
        plan: &TrialPlan,
        paths: &'a RunPaths,
        run_id: &'a str,
        started_at: chrono::DateTime<Utc>,
        report: &arb_policy::PolicyReport,
    ) -> Result<Self, RunError> {
        let config = &resolved.config;
        let config_sha256 = arb_hash::canonical_sha256(config)?;

        // Plan first, then the frozen config, then the provisional
        // manifest: if the process dies here the directory already
        // tells the whole story.
        let mut plan_writer = JsonlWriter::create(&paths.trial_plan())?;
        for entry in &plan.entries {
            plan_writer.append(entry)?;
        }
        let plan_records = plan_writer.close()?;
        write_json_atomic(&paths.config(), config)?;

        let clustering = &config.measurement.clustering;
        let clusterer = clustering.enabled.then(|| {
            LeaderClusterer::new(
                clustering.tau,
                clustering.centroid_update_rule,
                clustering.cluster_limit,
            )
        });
        let monitor = ConvergenceMonitor::new(MonitorConfig {
            novelty_threshold: config.measurement.novelty_threshold,
            stop_mode: config.execution.stop_mode,
            k_min: config.execution.k_min,
            k_min_count_rule: config.execution.k_min_count_rule,
            stop_policy: config.execution.stop_policy,
            cluster_stop_mode: if clustering.enabled {
                clustering.stop_mode
            } else {
                ClusterStopMode::Off
            },
        });

        let ctx = Self {
            resolved,
            paths,
            run_id,
            started_at,
            policy: report.snapshot,
            plan_sha256: plan.plan_sha256.clone(),
            config_sha256,
            k_planned: plan.len() as u32,
            trials: JsonlWriter::create(&paths.trials())?,
            parsed: JsonlWriter::create(&paths.parsed())?,
            convergence: JsonlWriter::create(&paths.convergence_trace())?,
            monitoring: JsonlWriter::create(&paths.monitoring())?,
            debug_embeddings: config
                .output
                .debug
                .then(|| JsonlWriter::create(&paths.debug_embeddings()))
                .transpose()?,
            assignments: clustering
                .enabled
                .then(|| JsonlWriter::create(&paths.group_assignments()))
                .transpose()?,
            plan_records,
            clusterer,
            monitor,
            usage_total: UsageTotals::default(),
            contract_failures: 0,
            all_embeddings: Vec::new(),
            last_convergence: None,
            batch_count: 0,
        };
        // Provisional manifest: anything that crashes from here on
        // leaves `incomplete=true, stop_reason=error` behind.
        let provisional = ctx.build_manifest(RunStopReason::Error, true, None, Vec::new());
        write_json_atomic(&paths.manifest(), &provisional)?;
        Ok(ctx)
    }

    /// Absorb one completed batch: write records, cluster, converge.
    fn absorb_batch(
        &mut self,
        batch_number: u32,
        outcomes: &[TrialOutcome],
        batch_duration_ms: u64,
    ) -> Result<arb_core::ConvergenceRecord, RunError> {
        let mut succeeded = 0u32;
        let mut failed = 0u32;
        let mut skipped_embeddings = 0u32;
        let mut embedded: Vec<(u32, Vec<f32>)> = Vec::new();

        for outcome in outcomes {
            self.trials.append(&outcome.trial)?;
            if let Some(parsed) = &outcome.parsed {
                self.parsed.append(parsed)?;
                if parsed.parse_status != ParseStatus::Success {
                    self.contract_failures += 1;
                }
            }
            if let Some(writer) = self.debug_embeddings.as_mut() {
                writer.append(&outcome.embedding)?;
            }
            if outcome.trial.status == arb_core::TrialStatus::Success {
                succeeded += 1;
            } else {
                failed += 1;
            }
            if let Some(usage) = &outcome.trial.usage {
                self.usage_total.add(usage);
            }
            match &outcome.vector {
                Some(vector) => embedded.push((outcome.trial_id(), vector.clone())),
                None => skipped_embeddings += 1,
            }
        }

        let cluster_info = match self.clusterer.as_mut() {
            Some(clusterer) => {
                let forced_before = clusterer.forced_assignments_total();
                let mut limit_hit = false;
                for (trial_id, vector) in &embedded {
                    let assignment = clusterer.assign(*trial_id, vector, batch_number);
                    limit_hit |= assignment.forced;
                    if let Some(writer) = self.assignments.as_mut() {
                        writer.append(&assignment)?;
                    }
                }
                Some(ClusterBatchInfo {
                    group_count: clusterer.group_count(),
                    group_distribution: clusterer.group_distribution(),
                    forced_in_batch: clusterer.forced_assignments_total() - forced_before,
                    forced_total: clusterer.forced_assignments_total(),
                    group_limit_hit: limit_hit,
                })
            }
            None => None,
        };

        let record = self.monitor.observe_batch(
            batch_number,
            outcomes.len() as u32,
            &embedded,
            cluster_info.as_ref(),
        );
        self.convergence.append(&record)?;
        self.monitoring.append(&arb_core::MonitoringRecord {
            batch_number,
            launched: outcomes.len() as u32,
            succeeded,
            failed,
            skipped_embeddings,
            batch_duration_ms,
            usage_total: self.usage_total,
        })?;

        self.all_embeddings.extend(embedded);
        self.last_convergence = Some(record.clone());
        self.batch_count += 1;
        Ok(record)
    }

    /// Close streams, build the columnar artifact, and write the final
    /// manifest (last, atomically).
    fn finalize(self, stop_reason: RunStopReason) -> Result<Manifest, RunError> {
        let Self {
            resolved,
            paths,
            run_id,
            started_at,
            policy,
            plan_sha256,
            config_sha256,
            k_planned,
            plan_records,
            trials,
            parsed,
            convergence,
            monitoring,
            debug_embeddings,
            assignments,
            clusterer,
            monitor,
            all_embeddings,
            last_convergence,
            batch_count,
            ..
        } = self;
        let config = &resolved.config;

        let mut entries = vec![
            ArtifactEntry {
                path: "config.resolved.json".into(),
                kind: ArtifactKind::Json,
                records: None,
            },
            ArtifactEntry {
                path: "trial_plan.jsonl".into(),
                kind: ArtifactKind::Jsonl,
                records: Some(plan_records),
            },
        ];
        let mut close_into = |writer: JsonlWriter, path: &str| -> Result<(), RunError> {
            let records = writer.close()?;
            entries.push(ArtifactEntry {
                path: path.into(),
                kind: ArtifactKind::Jsonl,
                records: Some(records),
            });
            Ok(())
        };
        close_into(trials, "trials.jsonl")?;
        close_into(parsed, "parsed.jsonl")?;
        close_into(convergence, "convergence_trace.jsonl")?;
        close_into(monitoring, "monitoring.jsonl")?;
        if let Some(writer) = debug_embeddings {
            close_into(writer, "debug/embeddings.jsonl")?;
        }
        if let Some(writer) = assignments {
            close_into(writer, "groups/assignments.jsonl")?;
        }

        if let Some(clusterer) = &clusterer {
            write_json_atomic(&paths.group_state(), &clusterer.state())?;
            entries.push(ArtifactEntry {
                path: "groups/state.json".into(),
                kind: ArtifactKind::Json,
                records: None,
            });
        }

        // The Arrow artifact is a capability, not a requirement.
        let dimensions = all_embeddings.first().map(|(_, v)| v.len());
        let provenance = if all_embeddings.is_empty() {
            EmbeddingsProvenance::not_generated()
        } else {
            let dims = dimensions.unwrap_or_default();
            match write_arrow_embeddings(&paths.embeddings_arrow(), &all_embeddings, dims) {
                Ok(()) => {
                    entries.push(ArtifactEntry {
                        path: "embeddings.arrow".into(),
                        kind: ArtifactKind::Arrow,
                        records: Some(all_embeddings.len() as u64),
                    });
                    EmbeddingsProvenance::arrow(dims as u32, all_embeddings.len() as u64)
                }
                Err(message) => {
                    warn!(%message, "arrow build failed; demoting to jsonl fallback");
                    EmbeddingsProvenance::fallback(
                        Some(dims as u32),
                        all_embeddings.len() as u64,
                        message,
                    )
                }
            }
        };
        write_json_atomic(&paths.provenance(), &provenance)?;
        entries.push(ArtifactEntry {
            path: "embeddings.provenance.json".into(),
            kind: ArtifactKind::Json,
            records: None,
        });

        let aggregates = build_aggregates(
            batch_count,
            monitor.k_attempted(),
            monitor.k_eligible(),
            last_convergence.as_ref(),
            clusterer.as_ref(),
            config.measurement.clustering.enabled,
        );
        write_json_atomic(&paths.aggregates(), &aggregates)?;
        entries.push(ArtifactEntry {
            path: "aggregates.json".into(),
            kind: ArtifactKind::Json,
            records: None,
        });

        let incomplete = matches!(
            stop_reason,
            RunStopReason::UserInterrupt | RunStopReason::Error
        );
        let mut manifest = Manifest {
            completed_at: Some(Utc::now()),
            ..build_manifest_parts(
                resolved,
                run_id,
                started_at,
                policy,
                &plan_sha256,
                &config_sha256,
                k_planned,
                monitor.k_attempted(),
                monitor.k_eligible(),
                stop_reason,
                incomplete,
                ArtifactsIndex { entries },
            )
        };

        if config.output.receipt {
            let receipt = render_receipt(&manifest);
            match std::fs::write(paths.receipt(), receipt) {
                Ok(()) => manifest.artifacts.entries.push(ArtifactEntry {
                    path: "receipt.txt".into(),
                    kind: ArtifactKind::Text,
                    records: None,
                }),
                // Best-effort by contract: drop it from the index.
                Err(err) => warn!(%err, "receipt write failed; omitting from manifest"),
            }
        }

        write_json_atomic(&paths.manifest(), &manifest)?;
        info!(%run_id, stop_reason = ?manifest.stop_reason, "run finalized");
        Ok(manifest)
    }

    fn build_manifest(
        &self,
        stop_reason: RunStopReason,
        incomplete: bool,
        completed_at: Option<chrono::DateTime<Utc>>,
        entries: Vec<ArtifactEntry>,
    ) -> Manifest {
        let mut manifest = build_manifest_parts(
            self.resolved,
            self.run_id,
            self.started_at,
            self.policy,
            &self.plan_sha256,
            &self.config_sha256,
            self.k_planned,
            self.monitor.k_attempted(),
            self.monitor.k_eligible(),
            stop_reason,
            incomplete,
            ArtifactsIndex { entries },
        );
        manifest.completed_at = completed_at;
        manifest
    }

    fn try_write_error_manifest(&self) {
        let manifest = self.build_manifest(RunStopReason::Error, true, Some(Utc::now()), Vec::new());
        if let Err(err) = write_json_atomic(&self.paths.manifest(), &manifest) {
            warn!(%err, "could not write failure manifest");
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn build_manifest_parts(
    resolved: &Resolved,
    run_id: &str,
    started_at: chrono::DateTime<Utc>,
    policy: arb_core::PolicySnapshot,
    plan_sha256: &str,
    config_sha256: &str,
    k_planned: u32,
    k_attempted: u32,
    k_eligible: u32,
    stop_reason: RunStopReason,
    incomplete: bool,
    artifacts: ArtifactsIndex,
) -> Manifest {
    let execution = &resolved.config.execution;
    let stopping_mode = match execution.stop_policy {
        None => StoppingMode::ResolveOnly,
        Some(_) => match execution.stop_mode {
            StopMode::Advisor => StoppingMode::Advisor,
            StopMode::Enforcer => StoppingMode::Enforcer,
        },
    };
    Manifest {
        schema_version: arb_core::SCHEMA_VERSION.into(),
        arbiter_version: arb_core::ARBITER_VERSION.into(),
        run_id: run_id.into(),
        started_at,
        completed_at: None,
        stop_reason,
        stopping_mode,
        incomplete,
        k_planned,
        k_attempted,
        k_eligible,
        k_min: execution.k_min,
        k_min_count_rule: execution.k_min_count_rule,
        stop_policy: execution.stop_policy.map(|p| ManifestStopPolicy {
            novelty_epsilon: p.novelty_epsilon,
            similarity_threshold: p.similarity_threshold,
            patience: p.patience,
            k_min_eligible: execution.k_min_count_rule == arb_core::KMinCountRule::KEligible,
        }),
        hash_algorithm: arb_core::HASH_ALGORITHM.into(),
        config_sha256: config_sha256.into(),
        plan_sha256: plan_sha256.into(),
        model_catalog_sha256: resolved.model_catalog_sha256.clone(),
        prompt_manifest_sha256: resolved.prompt_manifest_sha256.clone(),
        artifacts,
        policy,
    }
}

fn build_aggregates(
    batch_count: u32,
    k_attempted: u32,
    k_eligible: u32,
    last: Option<&arb_core::ConvergenceRecord>,
    clusterer: Option<&LeaderClusterer>,
    clustering_enabled: bool,
) -> Aggregates {
    let grouping = last.and_then(|r| r.grouping.as_ref());
    Aggregates {
        batch_count,
        k_attempted,
        k_eligible,
        novelty_rate: last.and_then(|r| r.novelty_rate),
        mean_max_sim_to_prior: last.and_then(|r| r.mean_max_sim_to_prior),
        cluster_count: clustering_enabled.then(|| clusterer.map_or(0, LeaderClusterer::group_count)),
        largest_group_share: grouping.map(|g| g.largest_group_share),
        entropy: grouping.map(|g| g.entropy),
        effective_group_count: grouping.map(|g| g.effective_group_count),
    }
}
