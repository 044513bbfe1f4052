// SPDX-License-Identifier: MIT OR Apache-2.0
//! Seeded trial-plan compilation.
//!
//! For each `trial_id` in `0..k_max`, the compiler draws from RNG
//! streams keyed by `(seed, stream, trial_id)` and never from shared
//! state, so any single entry can be recomputed in isolation and the
//! whole plan is a pure function of the resolved configuration. The
//! plan hash is SHA-256 over the canonical JSON of the entry list.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use arb_core::{
    AssignedConfig, DebateSpec, DecodeParams, DecodeRanges, IntOrRange, NumberOrRange,
    ProtocolKind, ResolvedConfig, RoleAssignment, TrialPlan, TrialPlanEntry,
};
use arb_hash::SeededRng;
use std::collections::BTreeMap;

/// Errors from plan compilation.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// A sampling set was empty.
    #[error("cannot sample from empty {set} set")]
    EmptySamplingSet {
        /// Which set was empty.
        set: String,
    },
    /// The debate shape is not the supported two-slot form.
    #[error(
        "debate_v1 requires exactly 2 participants and at least 1 round \
         (got {participants} participants, {rounds} rounds)"
    )]
    InvalidDebateShape {
        /// Configured participant count.
        participants: u32,
        /// Configured round count.
        rounds: u32,
    },
    /// Canonicalization of the finished plan failed.
    #[error(transparent)]
    Canon(#[from] arb_hash::CanonError),
}

/// Compile the frozen trial plan for a resolved configuration.
///
/// # Errors
///
/// Fails when a sampling set is empty or the plan cannot be
/// canonicalized for hashing.
pub fn compile(config: &ResolvedConfig) -> Result<TrialPlan, PlanError> {
    ensure_non_empty("models", config.sampling.models.is_empty())?;
    ensure_non_empty("personas", config.sampling.personas.is_empty())?;
    ensure_non_empty("protocols", config.sampling.protocols.is_empty())?;
    if config.protocol.kind == ProtocolKind::DebateV1 {
        // The schema pins this shape too; re-checking here keeps the
        // compiler total for configs built in memory.
        let debate: DebateSpec = config.protocol.debate.unwrap_or_default();
        if debate.participants != 2 || debate.rounds < 1 {
            return Err(PlanError::InvalidDebateShape {
                participants: debate.participants,
                rounds: debate.rounds,
            });
        }
    }

    let seed = config.run.seed.to_string();
    let models: Vec<(String, f64)> = config
        .sampling
        .models
        .iter()
        .map(|m| (m.slug.clone(), m.weight))
        .collect();
    let personas: Vec<(String, f64)> = config
        .sampling
        .personas
        .iter()
        .map(|p| (p.id.clone(), p.weight))
        .collect();
    let protocols: Vec<(String, f64)> = config
        .sampling
        .protocols
        .iter()
        .map(|p| (p.id.clone(), p.weight))
        .collect();

    let mut entries = Vec::with_capacity(config.execution.k_max as usize);
    for trial_id in 0..config.execution.k_max {
        let mut plan_rng = arb_hash::rng_for(&seed, "plan", trial_id);
        let protocol_id = plan_rng.weighted_pick(&protocols).clone();

        let entry = match config.protocol.kind {
            ProtocolKind::Independent => {
                let model = plan_rng.weighted_pick(&models).clone();
                let persona = plan_rng.weighted_pick(&personas).clone();
                let mut decode_rng = arb_hash::rng_for(&seed, "decode", trial_id);
                let decode = resolve_decode(config.decode.as_ref(), &mut decode_rng);
                TrialPlanEntry {
                    trial_id,
                    protocol: ProtocolKind::Independent,
                    assigned_config: AssignedConfig {
                        model,
                        persona,
                        protocol: protocol_id,
                        decode,
                    },
                    role_assignments: None,
                    debate: None,
                }
            }
            ProtocolKind::DebateV1 => {
                let debate = config.protocol.debate.unwrap_or_default();
                let sample_role = |slot: &str, rng: &mut SeededRng| {
                    let model = rng.weighted_pick(&models).clone();
                    let persona = rng.weighted_pick(&personas).clone();
                    let mut decode_rng =
                        arb_hash::rng_for(&seed, &format!("decode:{slot}"), trial_id);
                    RoleAssignment {
                        model,
                        persona,
                        decode: resolve_decode(config.decode.as_ref(), &mut decode_rng),
                    }
                };
                let proposer = sample_role("A", &mut plan_rng);
                let critic = sample_role("B", &mut plan_rng);
                let roles = BTreeMap::from([
                    ("A".to_string(), proposer.clone()),
                    ("B".to_string(), critic),
                ]);
                // Slot A (the proposer) doubles as the headline assignment.
                TrialPlanEntry {
                    trial_id,
                    protocol: ProtocolKind::DebateV1,
                    assigned_config: AssignedConfig {
                        model: proposer.model,
                        persona: proposer.persona,
                        protocol: protocol_id,
                        decode: proposer.decode,
                    },
                    role_assignments: Some(roles),
                    debate: Some(debate),
                }
            }
        };
        entries.push(entry);
    }

    let plan_sha256 = arb_hash::canonical_sha256(&entries)?;
    Ok(TrialPlan {
        entries,
        plan_sha256,
    })
}

fn resolve_decode(ranges: Option<&DecodeRanges>, rng: &mut SeededRng) -> Option<DecodeParams> {
    let ranges = ranges?;
    let temperature = ranges.temperature.as_ref().map(|r| match *r {
        NumberOrRange::Fixed(v) => v,
        NumberOrRange::Range { min, max } => rng.sample_number(min, max),
    });
    let top_p = ranges.top_p.as_ref().map(|r| match *r {
        NumberOrRange::Fixed(v) => v,
        NumberOrRange::Range { min, max } => rng.sample_number(min, max),
    });
    let max_tokens = ranges.max_tokens.as_ref().map(|r| match *r {
        IntOrRange::Fixed(v) => v,
        IntOrRange::Range { min, max } => rng.sample_integer(min, max),
    });
    Some(DecodeParams {
        temperature,
        top_p,
        max_tokens,
    })
}

fn ensure_non_empty(set: &str, empty: bool) -> Result<(), PlanError> {
    if empty {
        Err(PlanError::EmptySamplingSet {
            set: set.to_string(),
        })
    } else {
        Ok(())
    }
}
