// SPDX-License-Identifier: MIT OR Apache-2.0
//! Deterministic online leader clustering.
//!
//! One pass, no reassignment: each vector joins the lowest-id group
//! whose centroid clears `tau`, or opens a new group while the cap
//! allows. Past the cap, vectors are force-assigned to the most similar
//! group. Inputs must arrive in ascending `trial_id` order; the batch
//! scheduler guarantees that, which makes assignments independent of
//! thread scheduling.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use arb_core::CentroidUpdateRule;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One group of the clustering state, as persisted to `groups/state.json`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GroupRecord {
    /// Dense id in creation order.
    pub group_id: u32,
    /// Trial whose vector opened the group.
    pub exemplar_trial_id: u32,
    /// Members assigned so far.
    pub member_count: u32,
    /// Batch in which the group was opened.
    pub discovered_at_batch: u32,
    /// Running-mean centroid; only kept under `incremental_mean`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub centroid: Option<Vec<f32>>,
}

/// One assignment decision, as appended to `groups/assignments.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AssignmentRecord {
    /// Trial that was assigned.
    pub trial_id: u32,
    /// Group it landed in.
    pub group_id: u32,
    /// Cosine similarity to that group's centroid at assignment time.
    pub similarity: f64,
    /// Whether the group cap forced the assignment.
    pub forced: bool,
    /// Whether this assignment opened the group.
    pub new_group: bool,
    /// Batch the assignment happened in.
    pub batch_number: u32,
}

/// Full clustering state snapshot for `groups/state.json`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ClusterState {
    /// Similarity threshold.
    pub tau: f64,
    /// Centroid update rule.
    pub centroid_update_rule: CentroidUpdateRule,
    /// Group cap.
    pub cluster_limit: u32,
    /// Groups in creation order.
    pub groups: Vec<GroupRecord>,
    /// Total forced assignments.
    pub forced_assignments_total: u32,
}

struct GroupInner {
    record: GroupRecord,
    // Unit leader vector under fixed_leader; running mean of unit
    // member vectors under incremental_mean.
    centroid: Vec<f64>,
}

/// The online leader clusterer.
pub struct LeaderClusterer {
    tau: f64,
    rule: CentroidUpdateRule,
    cluster_limit: usize,
    groups: Vec<GroupInner>,
    forced_total: u32,
}

impl LeaderClusterer {
    /// Create a clusterer. `cluster_limit` is clamped to at least 1.
    #[must_use]
    pub fn new(tau: f64, rule: CentroidUpdateRule, cluster_limit: u32) -> Self {
        Self {
            tau,
            rule,
            cluster_limit: cluster_limit.max(1) as usize,
            groups: Vec::new(),
            forced_total: 0,
        }
    }

    /// Assign one vector.
    ///
    /// Callers must feed trials in ascending `trial_id` order within a
    /// batch and batches in order; given that, assignments are a pure
    /// function of the vector sequence.
    pub fn assign(&mut self, trial_id: u32, vector: &[f32], batch_number: u32) -> AssignmentRecord {
        let unit = l2_normalize(vector);

        // One scan in id order: the first group clearing tau wins, and
        // strict `>` on the running best keeps the lowest id on ties.
        let mut qualifier: Option<(usize, f64)> = None;
        let mut best: Option<(usize, f64)> = None;
        for (idx, group) in self.groups.iter().enumerate() {
            let sim = cosine_to_centroid(&unit, &group.centroid);
            if qualifier.is_none() && sim >= self.tau {
                qualifier = Some((idx, sim));
            }
            if best.is_none_or(|(_, s)| sim > s) {
                best = Some((idx, sim));
            }
        }

        if let Some((idx, sim)) = qualifier {
            return self.join(idx, trial_id, &unit, sim, false, batch_number);
        }

        if self.groups.len() < self.cluster_limit {
            let group_id = self.groups.len() as u32;
            self.groups.push(GroupInner {
                record: GroupRecord {
                    group_id,
                    exemplar_trial_id: trial_id,
                    member_count: 1,
                    discovered_at_batch: batch_number,
                    centroid: None,
                },
                centroid: unit,
            });
            return AssignmentRecord {
                trial_id,
                group_id,
                similarity: 1.0,
                forced: false,
                new_group: true,
                batch_number,
            };
        }

        let (idx, sim) = best.expect("cluster_limit >= 1 guarantees a group exists");
        self.forced_total += 1;
        self.join(idx, trial_id, &unit, sim, true, batch_number)
    }

    fn join(
        &mut self,
        idx: usize,
        trial_id: u32,
        unit: &[f64],
        similarity: f64,
        forced: bool,
        batch_number: u32,
    ) -> AssignmentRecord {
        let group = &mut self.groups[idx];
        group.record.member_count += 1;
        if self.rule == CentroidUpdateRule::IncrementalMean {
            // Forced assignments update the mean like any other member.
            let n = f64::from(group.record.member_count);
            for (c, v) in group.centroid.iter_mut().zip(unit) {
                *c += (v - *c) / n;
            }
        }
        AssignmentRecord {
            trial_id,
            group_id: group.record.group_id,
            similarity,
            forced,
            new_group: false,
            batch_number,
        }
    }

    /// Number of groups discovered so far.
    #[must_use]
    pub fn group_count(&self) -> u32 {
        self.groups.len() as u32
    }

    /// Member counts by dense group id.
    #[must_use]
    pub fn group_distribution(&self) -> Vec<u32> {
        self.groups.iter().map(|g| g.record.member_count).collect()
    }

    /// Total forced assignments so far.
    #[must_use]
    pub fn forced_assignments_total(&self) -> u32 {
        self.forced_total
    }

    /// Snapshot for `groups/state.json`.
    #[must_use]
    pub fn state(&self) -> ClusterState {
        ClusterState {
            tau: self.tau,
            centroid_update_rule: self.rule,
            cluster_limit: self.cluster_limit as u32,
            groups: self
                .groups
                .iter()
                .map(|g| {
                    let mut record = g.record.clone();
                    if self.rule == CentroidUpdateRule::IncrementalMean {
                        record.centroid = Some(g.centroid.iter().map(|&x| x as f32).collect());
                    }
                    record
                })
                .collect(),
            forced_assignments_total: self.forced_total,
        }
    }
}

fn l2_normalize(vector: &[f32]) -> Vec<f64> {
    let norm = vector
        .iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt();
    if norm == 0.0 {
        return vec![0.0; vector.len()];
    }
    vector.iter().map(|&x| f64::from(x) / norm).collect()
}

fn cosine_to_centroid(unit: &[f64], centroid: &[f64]) -> f64 {
    let dot: f64 = unit.iter().zip(centroid).map(|(a, b)| a * b).sum();
    let centroid_norm: f64 = centroid.iter().map(|x| x * x).sum::<f64>().sqrt();
    if centroid_norm == 0.0 {
        0.0
    } else {
        dot / centroid_norm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basis(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    #[test]
    fn first_vector_opens_group_zero() {
        let mut c = LeaderClusterer::new(0.9, CentroidUpdateRule::FixedLeader, 8);
        let a = c.assign(0, &basis(4, 0), 0);
        assert_eq!(a.group_id, 0);
        assert!(a.new_group);
        assert!(!a.forced);
        assert_eq!(c.group_count(), 1);
    }

    #[test]
    fn similar_vector_joins_lowest_qualifying_group() {
        let mut c = LeaderClusterer::new(0.9, CentroidUpdateRule::FixedLeader, 8);
        c.assign(0, &basis(4, 0), 0);
        c.assign(1, &basis(4, 1), 0);
        let a = c.assign(2, &[0.99, 0.01, 0.0, 0.0], 0);
        assert_eq!(a.group_id, 0);
        assert!(!a.new_group);
        assert_eq!(c.group_distribution(), vec![2, 1]);
    }

    #[test]
    fn orthogonal_vectors_open_new_groups_until_cap() {
        let mut c = LeaderClusterer::new(0.999, CentroidUpdateRule::FixedLeader, 3);
        for i in 0..5u32 {
            c.assign(i, &basis(8, i as usize), 0);
        }
        assert_eq!(c.group_count(), 3);
        assert_eq!(c.forced_assignments_total(), 2);
    }

    #[test]
    fn forced_assignment_goes_to_most_similar() {
        let mut c = LeaderClusterer::new(0.999, CentroidUpdateRule::FixedLeader, 2);
        c.assign(0, &basis(4, 0), 0);
        c.assign(1, &basis(4, 1), 0);
        // Leans toward axis 1 but clears tau for neither.
        let a = c.assign(2, &[0.3, 0.8, 0.5, 0.0], 0);
        assert!(a.forced);
        assert_eq!(a.group_id, 1);
    }

    #[test]
    fn forced_tie_breaks_to_lower_group_id() {
        let mut c = LeaderClusterer::new(0.999, CentroidUpdateRule::FixedLeader, 2);
        c.assign(0, &basis(4, 0), 0);
        c.assign(1, &basis(4, 1), 0);
        // Equidistant from both leaders.
        let a = c.assign(2, &[0.5, 0.5, 0.0, 0.0], 0);
        assert!(a.forced);
        assert_eq!(a.group_id, 0);
    }

    #[test]
    fn fixed_leader_centroid_never_moves() {
        let mut c = LeaderClusterer::new(0.5, CentroidUpdateRule::FixedLeader, 8);
        c.assign(0, &basis(2, 0), 0);
        for t in 1..10u32 {
            c.assign(t, &[0.8, 0.6], 0);
        }
        // A vector similar to the drifted members but not the leader
        // still measures against the original leader.
        let a = c.assign(10, &[0.0, 1.0], 1);
        assert!(a.new_group, "fixed leader should reject the orthogonal axis");
    }

    #[test]
    fn incremental_mean_centroid_drifts() {
        let mut c = LeaderClusterer::new(0.75, CentroidUpdateRule::IncrementalMean, 8);
        c.assign(0, &[1.0, 0.0], 0);
        c.assign(1, &[0.8, 0.6], 0);
        // The mean has rotated toward [0.9, 0.3]-ish, so this joins
        // where a fixed leader would have rejected it.
        let a = c.assign(2, &[0.6, 0.8], 0);
        assert_eq!(a.group_id, 0, "sim {:.3}", a.similarity);
    }

    #[test]
    fn incremental_mean_state_exports_centroids() {
        let mut c = LeaderClusterer::new(0.9, CentroidUpdateRule::IncrementalMean, 8);
        c.assign(0, &basis(3, 0), 0);
        let state = c.state();
        assert!(state.groups[0].centroid.is_some());

        let mut fixed = LeaderClusterer::new(0.9, CentroidUpdateRule::FixedLeader, 8);
        fixed.assign(0, &basis(3, 0), 0);
        assert!(fixed.state().groups[0].centroid.is_none());
    }

    #[test]
    fn assignments_are_idempotent_given_same_sequence() {
        let vectors: Vec<Vec<f32>> = (0..12)
            .map(|i| {
                let angle = f32::from(i as u8) * 0.37;
                vec![angle.cos(), angle.sin(), 0.1]
            })
            .collect();
        let run = |vectors: &[Vec<f32>]| {
            let mut c = LeaderClusterer::new(0.95, CentroidUpdateRule::IncrementalMean, 4);
            vectors
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    let a = c.assign(i as u32, v, (i / 4) as u32);
                    (a.group_id, a.forced)
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(run(&vectors), run(&vectors));
    }

    #[test]
    fn zero_vector_is_handled() {
        let mut c = LeaderClusterer::new(0.9, CentroidUpdateRule::FixedLeader, 8);
        c.assign(0, &[1.0, 0.0], 0);
        let a = c.assign(1, &[0.0, 0.0], 0);
        // Similarity to everything is 0, so it opens its own group.
        assert!(a.new_group);
    }

    #[test]
    fn group_ids_are_dense_and_creation_ordered() {
        let mut c = LeaderClusterer::new(0.999, CentroidUpdateRule::FixedLeader, 16);
        for i in 0..6u32 {
            c.assign(i, &basis(8, i as usize), i / 2);
        }
        let state = c.state();
        for (i, g) in state.groups.iter().enumerate() {
            assert_eq!(g.group_id, i as u32);
            assert_eq!(g.exemplar_trial_id, i as u32);
            assert_eq!(g.discovered_at_batch, i as u32 / 2);
        }
    }
}
