// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-batch novelty metrics and the convergence stop rule.
//!
//! The monitor owns the prior-embedding list. For each batch it scores
//! every newly embedded trial against all priors (cached norms, cosine
//! similarity), derives the batch novelty rate and mean max-similarity,
//! folds in grouping metrics when clustering is enabled, and evaluates
//! the stop rule. Priors are appended only after metrics are computed,
//! in `trial_id` order, so a batch never measures against itself.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use arb_core::{
    ClusterStopMode, ConvergenceRecord, GroupingMetrics, KMinCountRule, PriorEmbedding,
    StopDecision, StopMode, StopPolicy,
};

/// Monitor configuration, lifted from the resolved config.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Cosine similarity below which a trial counts as novel.
    pub novelty_threshold: f64,
    /// Advisor or enforcer.
    pub stop_mode: StopMode,
    /// Minimum count before the stop rule may bind.
    pub k_min: u32,
    /// Which count gates `k_min`.
    pub k_min_count_rule: KMinCountRule,
    /// Convergence thresholds; `None` disables the stop rule entirely.
    pub stop_policy: Option<StopPolicy>,
    /// Whether group-formation stagnation may contribute to stopping.
    pub cluster_stop_mode: ClusterStopMode,
}

/// Grouping inputs for one batch, produced by the clusterer.
#[derive(Debug, Clone)]
pub struct ClusterBatchInfo {
    /// Groups discovered so far.
    pub group_count: u32,
    /// Cumulative member counts by dense group id.
    pub group_distribution: Vec<u32>,
    /// Forced assignments in this batch.
    pub forced_in_batch: u32,
    /// Forced assignments so far.
    pub forced_total: u32,
    /// Whether the cap forced an assignment this batch.
    pub group_limit_hit: bool,
}

/// The convergence monitor.
pub struct ConvergenceMonitor {
    config: MonitorConfig,
    priors: Vec<PriorEmbedding>,
    low_novelty_streak: u32,
    k_attempted: u32,
    k_eligible: u32,
    prev_distribution: Option<Vec<u32>>,
    prev_group_count: u32,
    batches_without_new_group: u32,
}

impl ConvergenceMonitor {
    /// Create a monitor with no priors.
    #[must_use]
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            priors: Vec::new(),
            low_novelty_streak: 0,
            k_attempted: 0,
            k_eligible: 0,
            prev_distribution: None,
            prev_group_count: 0,
            batches_without_new_group: 0,
        }
    }

    /// Cumulative attempted count.
    #[must_use]
    pub fn k_attempted(&self) -> u32 {
        self.k_attempted
    }

    /// Cumulative eligible count.
    #[must_use]
    pub fn k_eligible(&self) -> u32 {
        self.k_eligible
    }

    /// Observe one completed batch and evaluate the stop rule.
    ///
    /// `embedded` must be sorted by ascending `trial_id`; the batch
    /// scheduler's reorder guarantees that.
    pub fn observe_batch(
        &mut self,
        batch_number: u32,
        attempted_in_batch: u32,
        embedded: &[(u32, Vec<f32>)],
        clustering: Option<&ClusterBatchInfo>,
    ) -> ConvergenceRecord {
        self.k_attempted += attempted_in_batch;
        self.k_eligible += embedded.len() as u32;

        let has_eligible = !embedded.is_empty();
        let (novelty_rate, mean_max_sim) = if has_eligible {
            let sims: Vec<f64> = embedded
                .iter()
                .map(|(_, v)| self.max_sim_to_prior(v))
                .collect();
            let novel = sims
                .iter()
                .filter(|&&s| s < self.config.novelty_threshold)
                .count();
            let rate = novel as f64 / sims.len() as f64;
            let mean = sims.iter().sum::<f64>() / sims.len() as f64;
            (Some(rate), Some(mean))
        } else {
            (None, None)
        };

        // Priors grow only after the batch was measured.
        for (trial_id, vector) in embedded {
            self.priors.push(PriorEmbedding::new(*trial_id, vector.clone()));
        }

        let grouping = clustering.map(|info| self.grouping_metrics(info));
        let stop = self.evaluate_stop(novelty_rate, mean_max_sim, grouping.as_ref());

        ConvergenceRecord {
            batch_number,
            k_attempted: self.k_attempted,
            k_eligible: self.k_eligible,
            novelty_rate,
            mean_max_sim_to_prior: mean_max_sim,
            has_eligible_in_batch: has_eligible,
            grouping,
            stop,
        }
    }

    fn max_sim_to_prior(&self, vector: &[f32]) -> f64 {
        if self.priors.is_empty() {
            return 0.0;
        }
        let norm = vector
            .iter()
            .map(|&x| f64::from(x) * f64::from(x))
            .sum::<f64>()
            .sqrt();
        if norm == 0.0 {
            return 0.0;
        }
        let mut max = f64::MIN;
        for prior in &self.priors {
            if prior.norm == 0.0 {
                max = max.max(0.0);
                continue;
            }
            let dot: f64 = vector
                .iter()
                .zip(&prior.vector)
                .map(|(&a, &b)| f64::from(a) * f64::from(b))
                .sum();
            max = max.max(dot / (norm * prior.norm));
        }
        max
    }

    fn grouping_metrics(&mut self, info: &ClusterBatchInfo) -> GroupingMetrics {
        let total: u64 = info.group_distribution.iter().map(|&c| u64::from(c)).sum();
        let (entropy, largest_share) = if total == 0 {
            (0.0, 0.0)
        } else {
            let mut entropy = 0.0;
            let mut largest = 0u32;
            for &count in &info.group_distribution {
                largest = largest.max(count);
                if count > 0 {
                    let p = f64::from(count) / total as f64;
                    entropy -= p * p.log2();
                }
            }
            (entropy, f64::from(largest) / total as f64)
        };
        let singleton_group_count =
            info.group_distribution.iter().filter(|&&c| c == 1).count() as u32;
        let js_divergence = self
            .prev_distribution
            .as_ref()
            .map(|prev| js_divergence_log2(prev, &info.group_distribution));

        if info.group_count > self.prev_group_count {
            self.batches_without_new_group = 0;
        } else {
            self.batches_without_new_group += 1;
        }
        self.prev_group_count = info.group_count;
        self.prev_distribution = Some(info.group_distribution.clone());

        let patience = self.config.stop_policy.map_or(u32::MAX, |p| p.patience);
        let cluster_would_stop = self.config.cluster_stop_mode != ClusterStopMode::Off
            && self.batches_without_new_group >= patience;

        GroupingMetrics {
            group_count: info.group_count,
            group_distribution: info.group_distribution.clone(),
            largest_group_share: largest_share,
            entropy,
            effective_group_count: entropy.exp2(),
            singleton_group_count,
            js_divergence,
            forced_assignments_in_batch: info.forced_in_batch,
            forced_assignments_total: info.forced_total,
            group_limit_hit: info.group_limit_hit,
            cluster_would_stop,
        }
    }

    fn evaluate_stop(
        &mut self,
        novelty_rate: Option<f64>,
        mean_max_sim: Option<f64>,
        grouping: Option<&GroupingMetrics>,
    ) -> StopDecision {
        let Some(policy) = self.config.stop_policy else {
            return StopDecision {
                mode: self.config.stop_mode,
                would_stop: false,
                should_stop: false,
                stop_reason: None,
            };
        };

        let conditions_met = match (novelty_rate, mean_max_sim) {
            (Some(rate), Some(mean)) => {
                rate <= policy.novelty_epsilon && mean >= policy.similarity_threshold
            }
            _ => false,
        };
        if conditions_met {
            self.low_novelty_streak += 1;
        } else {
            self.low_novelty_streak = 0;
        }

        let eligible_count = match self.config.k_min_count_rule {
            KMinCountRule::KEligible => self.k_eligible,
            KMinCountRule::KAttempted => self.k_attempted,
        };

        let novelty_would_stop = eligible_count >= self.config.k_min
            && self.low_novelty_streak >= policy.patience
            && conditions_met;

        // Secondary criterion: group formation stalled. Only binding
        // when the clustering stop mode is enforced.
        let cluster_enforced = self.config.cluster_stop_mode == ClusterStopMode::Enforced
            && grouping.is_some_and(|g| g.cluster_would_stop)
            && eligible_count >= self.config.k_min;

        let would_stop = novelty_would_stop;
        let binding = novelty_would_stop || cluster_enforced;
        let should_stop = binding && self.config.stop_mode == StopMode::Enforcer;

        StopDecision {
            mode: self.config.stop_mode,
            would_stop,
            should_stop,
            stop_reason: should_stop.then(|| "converged".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(stop_mode: StopMode, policy: Option<StopPolicy>) -> MonitorConfig {
        MonitorConfig {
            novelty_threshold: 0.85,
            stop_mode,
            k_min: 0,
            k_min_count_rule: KMinCountRule::KEligible,
            stop_policy: policy,
            cluster_stop_mode: ClusterStopMode::Off,
        }
    }

    fn degenerate_batch(ids: std::ops::Range<u32>) -> Vec<(u32, Vec<f32>)> {
        ids.map(|i| (i, vec![1.0, 0.0, 0.0])).collect()
    }

    #[test]
    fn first_batch_has_zero_similarity() {
        let mut m = ConvergenceMonitor::new(config(StopMode::Advisor, None));
        let rec = m.observe_batch(0, 2, &degenerate_batch(0..2), None);
        assert_eq!(rec.mean_max_sim_to_prior, Some(0.0));
        assert_eq!(rec.novelty_rate, Some(1.0));
        assert!(rec.has_eligible_in_batch);
        assert_eq!(rec.k_attempted, 2);
        assert_eq!(rec.k_eligible, 2);
    }

    #[test]
    fn identical_vectors_saturate_similarity() {
        let mut m = ConvergenceMonitor::new(config(StopMode::Advisor, None));
        m.observe_batch(0, 2, &degenerate_batch(0..2), None);
        let rec = m.observe_batch(1, 2, &degenerate_batch(2..4), None);
        let mean = rec.mean_max_sim_to_prior.unwrap();
        assert!((mean - 1.0).abs() < 1e-9, "mean {mean}");
        assert_eq!(rec.novelty_rate, Some(0.0));
    }

    #[test]
    fn empty_batch_yields_null_metrics() {
        let mut m = ConvergenceMonitor::new(config(StopMode::Advisor, None));
        let rec = m.observe_batch(0, 2, &[], None);
        assert_eq!(rec.novelty_rate, None);
        assert_eq!(rec.mean_max_sim_to_prior, None);
        assert!(!rec.has_eligible_in_batch);
        assert_eq!(rec.k_attempted, 2);
        assert_eq!(rec.k_eligible, 0);
    }

    #[test]
    fn enforcer_stops_on_degenerate_embeddings() {
        let policy = StopPolicy {
            novelty_epsilon: 1.0,
            similarity_threshold: 0.0,
            patience: 1,
        };
        let mut m = ConvergenceMonitor::new(config(StopMode::Enforcer, Some(policy)));
        let rec = m.observe_batch(0, 2, &degenerate_batch(0..2), None);
        assert!(rec.stop.would_stop);
        assert!(rec.stop.should_stop);
        assert_eq!(rec.stop.stop_reason.as_deref(), Some("converged"));
    }

    #[test]
    fn advisor_never_stops() {
        let policy = StopPolicy {
            novelty_epsilon: 1.0,
            similarity_threshold: 0.0,
            patience: 1,
        };
        let mut m = ConvergenceMonitor::new(config(StopMode::Advisor, Some(policy)));
        for batch in 0..3 {
            let rec = m.observe_batch(batch, 2, &degenerate_batch(batch * 2..batch * 2 + 2), None);
            assert!(rec.stop.would_stop);
            assert!(!rec.stop.should_stop);
        }
    }

    #[test]
    fn k_min_gates_stopping() {
        let policy = StopPolicy {
            novelty_epsilon: 1.0,
            similarity_threshold: 0.0,
            patience: 1,
        };
        let mut cfg = config(StopMode::Enforcer, Some(policy));
        cfg.k_min = 5;
        let mut m = ConvergenceMonitor::new(cfg);
        let rec = m.observe_batch(0, 2, &degenerate_batch(0..2), None);
        assert!(!rec.stop.would_stop, "k_eligible=2 < k_min=5");
        let rec = m.observe_batch(1, 2, &degenerate_batch(2..4), None);
        assert!(!rec.stop.would_stop, "k_eligible=4 < k_min=5");
        let rec = m.observe_batch(2, 2, &degenerate_batch(4..6), None);
        assert!(rec.stop.should_stop, "k_eligible=6 >= k_min=5");
    }

    #[test]
    fn k_attempted_rule_counts_failures() {
        let policy = StopPolicy {
            novelty_epsilon: 1.0,
            similarity_threshold: 0.0,
            patience: 1,
        };
        let mut cfg = config(StopMode::Enforcer, Some(policy));
        cfg.k_min = 4;
        cfg.k_min_count_rule = KMinCountRule::KAttempted;
        let mut m = ConvergenceMonitor::new(cfg);
        // 4 attempted, only 2 eligible.
        m.observe_batch(0, 2, &degenerate_batch(0..1), None);
        let rec = m.observe_batch(1, 2, &degenerate_batch(1..2), None);
        assert!(rec.stop.should_stop);
    }

    #[test]
    fn streak_resets_on_novel_batch() {
        let policy = StopPolicy {
            novelty_epsilon: 0.0,
            similarity_threshold: 0.9,
            patience: 2,
        };
        let mut m = ConvergenceMonitor::new(config(StopMode::Enforcer, Some(policy)));
        m.observe_batch(0, 1, &degenerate_batch(0..1), None);
        // Batch 1 repeats the prior: streak 1.
        let rec = m.observe_batch(1, 1, &degenerate_batch(1..2), None);
        assert!(!rec.stop.should_stop);
        // Batch 2 is orthogonal: novelty breaks the streak.
        let rec = m.observe_batch(2, 1, &[(2, vec![0.0, 1.0, 0.0])], None);
        assert!(!rec.stop.would_stop);
        // Two more repeats rebuild the streak.
        m.observe_batch(3, 1, &degenerate_batch(3..4), None);
        let rec = m.observe_batch(4, 1, &degenerate_batch(4..5), None);
        assert!(rec.stop.should_stop);
    }

    #[test]
    fn grouping_metrics_entropy_and_singletons() {
        let mut m = ConvergenceMonitor::new(config(StopMode::Advisor, None));
        let info = ClusterBatchInfo {
            group_count: 2,
            group_distribution: vec![3, 1],
            forced_in_batch: 0,
            forced_total: 0,
            group_limit_hit: false,
        };
        let rec = m.observe_batch(0, 4, &degenerate_batch(0..4), Some(&info));
        let g = rec.grouping.unwrap();
        assert_eq!(g.group_count, 2);
        assert_eq!(g.singleton_group_count, 1);
        assert!((g.largest_group_share - 0.75).abs() < 1e-12);
        // H(0.75, 0.25) = 0.8112781...
        assert!((g.entropy - 0.811_278_124_459_133).abs() < 1e-9);
        assert!((g.effective_group_count - g.entropy.exp2()).abs() < 1e-12);
        assert_eq!(g.js_divergence, None, "first grouped batch");
    }

    #[test]
    fn js_divergence_zero_for_identical_distributions() {
        let mut m = ConvergenceMonitor::new(config(StopMode::Advisor, None));
        let info = ClusterBatchInfo {
            group_count: 2,
            group_distribution: vec![2, 2],
            forced_in_batch: 0,
            forced_total: 0,
            group_limit_hit: false,
        };
        m.observe_batch(0, 4, &degenerate_batch(0..4), Some(&info));
        let rec = m.observe_batch(1, 0, &[], Some(&info));
        let js = rec.grouping.unwrap().js_divergence.unwrap();
        assert!(js.abs() < 1e-12, "js {js}");
    }

    #[test]
    fn cluster_secondary_criterion_binds_only_enforced() {
        let policy = StopPolicy {
            // Impossible novelty conditions: primary rule can never fire.
            novelty_epsilon: -1.0,
            similarity_threshold: 2.0,
            patience: 2,
        };
        let mut cfg = config(StopMode::Enforcer, Some(policy));
        cfg.cluster_stop_mode = ClusterStopMode::Enforced;
        let mut m = ConvergenceMonitor::new(cfg);
        let info = ClusterBatchInfo {
            group_count: 1,
            group_distribution: vec![2],
            forced_in_batch: 0,
            forced_total: 0,
            group_limit_hit: false,
        };
        // Batch 0 discovers group 1 (count goes 0 -> 1): resets.
        m.observe_batch(0, 2, &degenerate_batch(0..2), Some(&info));
        // Two stagnant batches satisfy patience.
        m.observe_batch(1, 2, &degenerate_batch(2..4), Some(&info));
        let rec = m.observe_batch(2, 2, &degenerate_batch(4..6), Some(&info));
        let g = rec.grouping.as_ref().unwrap();
        assert!(g.cluster_would_stop);
        assert!(rec.stop.should_stop);
        assert!(!rec.stop.would_stop, "primary rule did not fire");
    }
}

/// Jensen–Shannon divergence (log2) between two count distributions.
///
/// Distributions are normalized first; a shorter previous distribution
/// is zero-padded (groups only ever grow).
fn js_divergence_log2(prev: &[u32], current: &[u32]) -> f64 {
    let len = prev.len().max(current.len());
    let total_p: f64 = prev.iter().map(|&c| f64::from(c)).sum();
    let total_q: f64 = current.iter().map(|&c| f64::from(c)).sum();
    if total_p == 0.0 || total_q == 0.0 {
        return 0.0;
    }
    let p = |i: usize| prev.get(i).copied().map_or(0.0, f64::from) / total_p;
    let q = |i: usize| current.get(i).copied().map_or(0.0, f64::from) / total_q;
    let mut js = 0.0;
    for i in 0..len {
        let (pi, qi) = (p(i), q(i));
        let mi = 0.5 * (pi + qi);
        if pi > 0.0 {
            js += 0.5 * pi * (pi / mi).log2();
        }
        if qi > 0.0 {
            js += 0.5 * qi * (qi / mi).log2();
        }
    }
    js
}
