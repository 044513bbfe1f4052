// SPDX-License-Identifier: MIT OR Apache-2.0
//! The per-trial protocol driver.
//!
//! One entry goes in; a trial record, a parsed record, and an embedding
//! record come out. Failures are captured into the records rather than
//! propagated: a broken trial never fails the run. The driver is
//! identical for mock and live providers; only where content comes from
//! differs.

use arb_contract::ContractExtractor;
use arb_core::{
    CallRecord, ContractFailurePolicy, DecodeParams, EmbedTextSource, EmbedTextStrategy,
    EmbeddingRecord, EmbeddingStatus, PARSER_VERSION, ParseStatus, ParsedRecord, ProtocolBlock,
    ProtocolKind, RetryPolicy, RoleAssignment, SkipReason, TranscriptTurn, TrialError,
    TrialPlanEntry, TrialRecord, TrialStatus, UsageTotals, encode_vector_b64,
};
use arb_provider::{
    CancellationToken, CompletionProvider, CompletionRequest, CompletionResponse,
    EmbeddingProvider, EmbeddingRequest, Message, ProviderError, execute_with_retry,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Everything the executor needs, lifted from the resolved config.
#[derive(Clone)]
pub struct ExecutorConfig {
    /// Run seed rendering (keys mock streams).
    pub seed: String,
    /// The question under study.
    pub question: String,
    /// Protocol kind, timeouts, and the optional contract.
    pub protocol: ProtocolBlock,
    /// Per-call retry policy.
    pub retry: RetryPolicy,
    /// What text is embedded.
    pub embed_text_strategy: EmbedTextStrategy,
    /// Truncation cap for embed text, in characters.
    pub embedding_max_chars: usize,
    /// Embedding model identifier.
    pub embedding_model: String,
    /// How contract fallbacks/failures affect embedding eligibility.
    pub contract_failure_policy: ContractFailurePolicy,
    /// Prompt id to inlined text, personas and protocols together.
    pub prompts: BTreeMap<String, String>,
}

/// The full outcome of one trial.
pub struct TrialOutcome {
    /// Execution record.
    pub trial: TrialRecord,
    /// Parse record; absent when the trial never produced content.
    pub parsed: Option<ParsedRecord>,
    /// Embedding record (always present, possibly skipped/failed).
    pub embedding: EmbeddingRecord,
    /// The raw vector for clustering and convergence, when embedded.
    pub vector: Option<Vec<f32>>,
}

impl TrialOutcome {
    /// The trial id, for scheduler reordering.
    #[must_use]
    pub fn trial_id(&self) -> u32 {
        self.trial.trial_id
    }
}

/// The per-trial driver.
pub struct TrialExecutor {
    config: ExecutorConfig,
    contract: Option<ContractExtractor>,
    completion: Arc<dyn CompletionProvider>,
    embedding: Arc<dyn EmbeddingProvider>,
}

impl TrialExecutor {
    /// Build an executor. The contract schema, when configured, is
    /// compiled once here.
    ///
    /// # Errors
    ///
    /// [`arb_contract::ContractError`] when the contract schema does
    /// not compile.
    pub fn new(
        config: ExecutorConfig,
        completion: Arc<dyn CompletionProvider>,
        embedding: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, arb_contract::ContractError> {
        let contract = config
            .protocol
            .decision_contract
            .as_ref()
            .map(ContractExtractor::new)
            .transpose()?;
        Ok(Self {
            config,
            contract,
            completion,
            embedding,
        })
    }

    /// Execute one planned trial to completion.
    pub async fn run_trial(&self, entry: &TrialPlanEntry, cancel: &CancellationToken) -> TrialOutcome {
        let deadline =
            Instant::now() + Duration::from_millis(self.config.protocol.total_trial_timeout_ms);
        let trial_id = entry.trial_id;

        let driven = match entry.protocol {
            ProtocolKind::Independent => self.drive_independent(entry, deadline, cancel).await,
            ProtocolKind::DebateV1 => self.drive_debate(entry, deadline, cancel).await,
        };

        match driven {
            Ok(success) => self.measure(trial_id, success, cancel).await,
            Err(failure) => {
                debug!(trial_id, status = ?failure.status, "trial failed");
                TrialOutcome {
                    trial: TrialRecord {
                        trial_id,
                        status: failure.status,
                        requested_model_slug: entry.assigned_config.model.clone(),
                        actual_model: None,
                        response_id: None,
                        calls: failure.calls,
                        transcript: None,
                        error: Some(failure.error),
                        usage: failure.usage,
                        raw_assistant_text: None,
                    },
                    parsed: None,
                    embedding: EmbeddingRecord::skipped(trial_id, SkipReason::Other),
                    vector: None,
                }
            }
        }
    }

    async fn drive_independent(
        &self,
        entry: &TrialPlanEntry,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<DrivenTrial, DrivenFailure> {
        let assigned = &entry.assigned_config;
        let persona = self.prompt_text(&assigned.persona);
        let template = self.prompt_text(&assigned.protocol);
        let mut prompt = render_template(&template, &self.config.question);
        prompt.push_str(&self.contract_clause());
        let messages = vec![Message::system(persona), Message::user(prompt)];

        let mut ledger = CallLedger::default();
        let response = match self
            .call_completion(
                entry.trial_id,
                &assigned.model,
                messages,
                assigned.decode.clone(),
                deadline,
                cancel,
                &mut ledger,
                None,
            )
            .await
        {
            Ok(response) => response,
            Err(error) => return Err(ledger.fail(error, &assigned.model)),
        };

        Ok(DrivenTrial {
            requested_model: assigned.model.clone(),
            actual_model: response.model.clone(),
            response_id: response.id.clone(),
            content: response.content,
            calls: ledger.calls,
            usage: ledger.usage,
            transcript: None,
        })
    }

    /// Drive a two-slot debate: `rounds` proposer/critic exchanges,
    /// then the proposer's final decision turn under the contract.
    async fn drive_debate(
        &self,
        entry: &TrialPlanEntry,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<DrivenTrial, DrivenFailure> {
        let roles = entry.role_assignments.as_ref();
        let (Some(proposer), Some(critic)) = (
            roles.and_then(|r| r.get("A")),
            roles.and_then(|r| r.get("B")),
        ) else {
            // Reachable only on a hand-edited plan; the compiler always
            // emits both slots.
            return Err(DrivenFailure {
                status: TrialStatus::Error,
                error: TrialError {
                    message: "debate entry is missing slot A/B assignments".into(),
                    code: None,
                    retryable: false,
                },
                calls: Vec::new(),
                usage: None,
            });
        };
        let rounds = entry.debate.map_or(1, |d| d.rounds).max(1);
        let template = self.prompt_text(&entry.assigned_config.protocol);
        let prompt = render_template(&template, &self.config.question);

        let mut ledger = CallLedger::default();
        let mut transcript = Vec::new();

        // Round 1: proposer states a position, critic answers it.
        let mut position = self
            .turn_call(
                entry.trial_id,
                proposer,
                prompt.clone(),
                deadline,
                cancel,
                &mut ledger,
                "proposer",
            )
            .await?;
        transcript.push(turn("proposer", "A", &proposer.model, &position.content));

        let mut critique = self
            .turn_call(
                entry.trial_id,
                critic,
                format!(
                    "{prompt}\n\nProposer's position:\n{}\n\nCritique this position.",
                    position.content
                ),
                deadline,
                cancel,
                &mut ledger,
                "critic",
            )
            .await?;
        transcript.push(turn("critic", "B", &critic.model, &critique.content));

        // Later rounds refine the position against the last critique.
        for _ in 1..rounds {
            position = self
                .turn_call(
                    entry.trial_id,
                    proposer,
                    format!(
                        "{prompt}\n\nYour previous position:\n{}\n\nCritic's response:\n{}\n\nRefine your position.",
                        position.content, critique.content
                    ),
                    deadline,
                    cancel,
                    &mut ledger,
                    "proposer",
                )
                .await?;
            transcript.push(turn("proposer", "A", &proposer.model, &position.content));

            critique = self
                .turn_call(
                    entry.trial_id,
                    critic,
                    format!(
                        "{prompt}\n\nProposer's position:\n{}\n\nCritique this position.",
                        position.content
                    ),
                    deadline,
                    cancel,
                    &mut ledger,
                    "critic",
                )
                .await?;
            transcript.push(turn("critic", "B", &critic.model, &critique.content));
        }

        // Final turn: proposer decides, under the contract.
        let decision = self
            .turn_call(
                entry.trial_id,
                proposer,
                format!(
                    "{prompt}\n\nYour position:\n{}\n\nCritic's response:\n{}\n\nGive your final answer.{}",
                    position.content,
                    critique.content,
                    self.contract_clause()
                ),
                deadline,
                cancel,
                &mut ledger,
                "proposer_final",
            )
            .await?;
        transcript.push(turn(
            "proposer_final",
            "A",
            &proposer.model,
            &decision.content,
        ));

        Ok(DrivenTrial {
            requested_model: entry.assigned_config.model.clone(),
            actual_model: decision.model.clone(),
            response_id: decision.id.clone(),
            content: decision.content,
            calls: ledger.calls,
            usage: ledger.usage,
            transcript: Some(transcript),
        })
    }

    /// One debate turn: the slot's persona plus a composed user prompt,
    /// with failures folded into the ledger.
    #[allow(clippy::too_many_arguments)]
    async fn turn_call(
        &self,
        trial_id: u32,
        role: &RoleAssignment,
        user_prompt: String,
        deadline: Instant,
        cancel: &CancellationToken,
        ledger: &mut CallLedger,
        label: &str,
    ) -> Result<CompletionResponse, DrivenFailure> {
        let messages = vec![
            Message::system(self.prompt_text(&role.persona)),
            Message::user(user_prompt),
        ];
        match self
            .call_completion(
                trial_id,
                &role.model,
                messages,
                role.decode.clone(),
                deadline,
                cancel,
                ledger,
                Some(label),
            )
            .await
        {
            Ok(response) => Ok(response),
            Err(error) => Err(std::mem::take(ledger).fail(error, &role.model)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn call_completion(
        &self,
        trial_id: u32,
        model: &str,
        messages: Vec<Message>,
        decode: Option<DecodeParams>,
        deadline: Instant,
        cancel: &CancellationToken,
        ledger: &mut CallLedger,
        turn_label: Option<&str>,
    ) -> Result<CompletionResponse, ProviderError> {
        let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
            return Err(ProviderError::Timeout);
        };
        if remaining.is_zero() {
            return Err(ProviderError::Timeout);
        }
        let per_call = Duration::from_millis(self.config.protocol.per_call_timeout_ms).min(remaining);

        let request = CompletionRequest {
            trial_id,
            model: model.to_string(),
            messages,
            decode,
        };
        let outcome = execute_with_retry(self.config.retry, per_call, cancel, || {
            self.completion.complete(&request, cancel)
        })
        .await;

        let call_index = ledger.calls.len() as u32;
        let mut record = CallRecord {
            call_index,
            turn: turn_label.map(str::to_string),
            attempts: outcome.attempts,
            actual_model: None,
            response_id: None,
        };
        match outcome.result {
            Ok(response) => {
                record.actual_model = Some(response.model.clone());
                record.response_id = Some(response.id.clone());
                ledger.calls.push(record);
                ledger.usage_mut().add(&response.usage);
                Ok(response)
            }
            Err(err) => {
                ledger.calls.push(record);
                Err(err)
            }
        }
    }

    /// Parse the assistant content and embed the prepared text.
    async fn measure(
        &self,
        trial_id: u32,
        driven: DrivenTrial,
        cancel: &CancellationToken,
    ) -> TrialOutcome {
        let parsed = self.parse(trial_id, &driven.content);
        let (embedding, vector) = self.embed(trial_id, &parsed, cancel).await;

        TrialOutcome {
            trial: TrialRecord {
                trial_id,
                status: TrialStatus::Success,
                requested_model_slug: driven.requested_model,
                actual_model: Some(driven.actual_model),
                response_id: Some(driven.response_id),
                calls: driven.calls,
                transcript: driven.transcript,
                error: None,
                usage: driven.usage,
                raw_assistant_text: Some(driven.content),
            },
            parsed: Some(parsed),
            embedding,
            vector,
        }
    }

    fn parse(&self, trial_id: u32, content: &str) -> ParsedRecord {
        match &self.contract {
            Some(extractor) => {
                let x = extractor.extract(content);
                ParsedRecord {
                    trial_id,
                    parse_status: x.parse_status,
                    outcome: x.outcome,
                    rationale: x.rationale,
                    rationale_truncated: x.rationale_truncated,
                    embed_text: Some(x.embed_text),
                    embed_text_source: x.embed_text_source,
                    parser_version: PARSER_VERSION.into(),
                }
            }
            None => {
                let trimmed = content.trim();
                let parse_status = if trimmed.is_empty() {
                    ParseStatus::Failed
                } else {
                    ParseStatus::Success
                };
                ParsedRecord {
                    trial_id,
                    parse_status,
                    outcome: None,
                    rationale: None,
                    rationale_truncated: false,
                    embed_text: Some(trimmed.to_string()),
                    embed_text_source: EmbedTextSource::RawContent,
                    parser_version: PARSER_VERSION.into(),
                }
            }
        }
    }

    async fn embed(
        &self,
        trial_id: u32,
        parsed: &ParsedRecord,
        cancel: &CancellationToken,
    ) -> (EmbeddingRecord, Option<Vec<f32>>) {
        // Contract exclusion outranks the empty-text skip: an excluded
        // trial is out of the population no matter its text.
        let parse_failed = parsed.parse_status != ParseStatus::Success;
        let excluded = parse_failed
            && (self.config.embed_text_strategy == EmbedTextStrategy::OutcomeOnly
                || self.config.contract_failure_policy == ContractFailurePolicy::Exclude);
        if excluded && self.contract.is_some() {
            return (
                EmbeddingRecord::skipped(trial_id, SkipReason::ContractParseExcluded),
                None,
            );
        }

        let raw = parsed.embed_text.as_deref().unwrap_or_default();
        let normalized = raw.replace("\r\n", "\n");
        let trimmed = normalized.trim();
        let original_chars = trimmed.chars().count();
        if trimmed.is_empty() {
            return (
                EmbeddingRecord::skipped(trial_id, SkipReason::EmptyEmbedText),
                None,
            );
        }
        let truncated = original_chars > self.config.embedding_max_chars;
        let text: String = if truncated {
            trimmed.chars().take(self.config.embedding_max_chars).collect()
        } else {
            trimmed.to_string()
        };

        let request = EmbeddingRequest {
            trial_id,
            model: self.config.embedding_model.clone(),
            text: text.clone(),
        };
        let per_call = Duration::from_millis(self.config.protocol.per_call_timeout_ms);
        let outcome = execute_with_retry(self.config.retry, per_call, cancel, || {
            self.embedding.embed(&request, cancel)
        })
        .await;

        match outcome.result {
            Ok(response) => {
                if response.vector.len() != self.embedding.dimensions() {
                    warn!(trial_id, "embedding has unexpected dimension");
                    return (
                        EmbeddingRecord::failed(
                            trial_id,
                            format!(
                                "embedding has {} dimensions, expected {}",
                                response.vector.len(),
                                self.embedding.dimensions()
                            ),
                        ),
                        None,
                    );
                }
                let record = EmbeddingRecord {
                    trial_id,
                    embedding_status: EmbeddingStatus::Success,
                    vector_b64: Some(encode_vector_b64(&response.vector)),
                    dtype: "float32".into(),
                    encoding: "float32le_base64".into(),
                    dimensions: Some(response.vector.len() as u32),
                    embed_text_sha256: Some(arb_hash::sha256_hex(text.as_bytes())),
                    embed_text_chars: Some(text.chars().count() as u32),
                    embed_text_truncated: truncated,
                    embed_text_original_chars: Some(original_chars as u32),
                    generation_id: response.generation_id,
                    skip_reason: None,
                    error: None,
                };
                (record, Some(response.vector))
            }
            Err(err) => (EmbeddingRecord::failed(trial_id, err.to_string()), None),
        }
    }

    fn prompt_text(&self, id: &str) -> String {
        self.config.prompts.get(id).cloned().unwrap_or_default()
    }

    fn contract_clause(&self) -> String {
        match &self.config.protocol.decision_contract {
            Some(contract) => format!(
                "\n\nRespond with a single JSON object matching the {} contract, inside a ```json code fence.",
                contract.name
            ),
            None => String::new(),
        }
    }
}

struct DrivenTrial {
    requested_model: String,
    actual_model: String,
    response_id: String,
    content: String,
    calls: Vec<CallRecord>,
    usage: Option<UsageTotals>,
    transcript: Option<Vec<TranscriptTurn>>,
}

struct DrivenFailure {
    status: TrialStatus,
    error: TrialError,
    calls: Vec<CallRecord>,
    usage: Option<UsageTotals>,
}

#[derive(Default)]
struct CallLedger {
    calls: Vec<CallRecord>,
    usage: Option<UsageTotals>,
}

impl CallLedger {
    fn usage_mut(&mut self) -> &mut UsageTotals {
        self.usage.get_or_insert_with(UsageTotals::default)
    }

    fn fail(self, error: ProviderError, model: &str) -> DrivenFailure {
        // Timeout exhaustion outranks model_unavailable.
        let status = match &error {
            ProviderError::Timeout => TrialStatus::TimeoutExhausted,
            ProviderError::ModelUnavailable { .. } => TrialStatus::ModelUnavailable,
            _ => TrialStatus::Error,
        };
        let retryable = error.is_retryable();
        DrivenFailure {
            status,
            error: TrialError {
                message: format!("{error} (model {model})"),
                code: error.code().map(str::to_string),
                retryable,
            },
            calls: self.calls,
            usage: self.usage,
        }
    }

}

fn turn(label: &str, slot: &str, model: &str, content: &str) -> TranscriptTurn {
    TranscriptTurn {
        turn: label.into(),
        slot: slot.into(),
        model: model.into(),
        content: content.into(),
    }
}

/// Render a protocol template against the question.
///
/// Templates reference the question as `{question}`; templates without
/// the placeholder get it appended.
fn render_template(template: &str, question: &str) -> String {
    if template.contains("{question}") {
        template.replace("{question}", question)
    } else {
        format!("{template}\n\nQuestion: {question}")
    }
}
