#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use tally_score::ScoreBreakdown;
use tally_transactions::Transaction;
use tally_transactions::TransactionId;
use thiserror::Error;

pub type AssignResult<T> = Result<T, AssignError>;

/// Sentinel cost for gated-out and padding cells. Any assignment that
/// lands on such a cell is discarded after the solve.
const FORBIDDEN_COST: f64 = 1.0e6;

#[derive(Debug, Error)]
pub enum AssignError {
    #[error("batch of {pairs} candidate pairs exceeds the configured cap of {cap}")]
    OverCapacity { pairs: usize, cap: usize },
    #[error("cardinality violation: {0}")]
    Cardinality(String),
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Auto,
    Manual,
    Ai,
}

/// Tunables for one assignment run. The hard gates mirror the scorer's
/// outer bands; pairs outside them are never candidates.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentConfig {
    pub amount_tolerance_pct: f64,
    pub date_window_days: i64,
    /// Minimum confirmed score on the 0-1 scale (0.8 == 80 points).
    pub match_threshold: f32,
    /// Refuse batches whose candidate matrix exceeds this many cells.
    pub max_pairs: usize,
    /// Points subtracted from the weakest component of a split group.
    pub split_penalty: f32,
    pub max_split_targets: usize,
    /// Finite-cost density at or above which the Hungarian solver runs.
    pub dense_threshold: f64,
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            amount_tolerance_pct: 5.0,
            date_window_days: 7,
            match_threshold: 0.8,
            max_pairs: 1_000_000,
            split_penalty: 5.0,
            max_split_targets: 4,
            dense_threshold: 0.25,
        }
    }
}

/// A confirmed 1:1 pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairMatch {
    pub source_id: TransactionId,
    pub target_id: TransactionId,
    pub breakdown: ScoreBreakdown,
}

impl PairMatch {
    #[must_use]
    pub fn score(&self) -> f32 {
        self.breakdown.total()
    }
}

/// A 1:N split pairing: one source settled by several targets whose
/// amounts sum exactly to the source amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMatch {
    pub source_id: TransactionId,
    pub target_ids: Vec<TransactionId>,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Assignment {
    pub matches: Vec<PairMatch>,
    pub group_matches: Vec<GroupMatch>,
    pub unmatched_sources: Vec<TransactionId>,
    pub unmatched_targets: Vec<TransactionId>,
}

struct Candidate {
    source_index: usize,
    target_index: usize,
    breakdown: ScoreBreakdown,
    total: f32,
}

#[derive(Debug, Clone, Default)]
pub struct AssignmentEngine {
    config: AssignmentConfig,
}

impl AssignmentEngine {
    #[must_use]
    pub fn new(config: AssignmentConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &AssignmentConfig {
        &self.config
    }

    /// Produce an optimal 1:1 assignment plus a split second pass.
    /// `score` is the scoring callable; it must be pure.
    pub fn assign<F>(
        &self,
        sources: &[Transaction],
        targets: &[Transaction],
        score: F,
    ) -> AssignResult<Assignment>
    where
        F: Fn(&Transaction, &Transaction) -> ScoreBreakdown,
    {
        if sources.is_empty() || targets.is_empty() {
            return Ok(Assignment {
                matches: Vec::new(),
                group_matches: Vec::new(),
                unmatched_sources: sources.iter().map(|tx| tx.id.clone()).collect(),
                unmatched_targets: targets.iter().map(|tx| tx.id.clone()).collect(),
            });
        }

        let pairs = sources.len() * targets.len();
        if pairs > self.config.max_pairs {
            return Err(AssignError::OverCapacity {
                pairs,
                cap: self.config.max_pairs,
            });
        }

        // Work in id-sorted index space so ties resolve by
        // (source_id, target_id) on both solver paths.
        let mut source_order: Vec<usize> = (0..sources.len()).collect();
        source_order.sort_by(|&a, &b| sources[a].id.cmp(&sources[b].id));
        let mut target_order: Vec<usize> = (0..targets.len()).collect();
        target_order.sort_by(|&a, &b| targets[a].id.cmp(&targets[b].id));

        let mut candidates = Vec::new();
        for (source_position, &source_index) in source_order.iter().enumerate() {
            let source = &sources[source_index];
            for (target_position, &target_index) in target_order.iter().enumerate() {
                let target = &targets[target_index];
                if !self.pair_eligible(source, target) {
                    continue;
                }
                let breakdown = score(source, target);
                let total = breakdown.total();
                candidates.push(Candidate {
                    source_index: source_position,
                    target_index: target_position,
                    breakdown,
                    total,
                });
            }
        }

        let density = candidates.len() as f64 / pairs as f64;
        let proposals = if density >= self.config.dense_threshold {
            self.solve_hungarian(sources.len(), targets.len(), &candidates)
        } else {
            self.solve_greedy(sources.len(), targets.len(), &candidates)
        };

        let threshold_points = self.config.match_threshold * 100.0;
        let mut matched_sources = BTreeSet::new();
        let mut matched_targets = BTreeSet::new();
        let mut matches = Vec::new();
        for candidate_index in proposals {
            let candidate = &candidates[candidate_index];
            if candidate.total < threshold_points {
                continue;
            }
            matched_sources.insert(source_order[candidate.source_index]);
            matched_targets.insert(target_order[candidate.target_index]);
            matches.push(PairMatch {
                source_id: sources[source_order[candidate.source_index]].id.clone(),
                target_id: targets[target_order[candidate.target_index]].id.clone(),
                breakdown: candidate.breakdown.clone(),
            });
        }
        matches.sort_by(|a, b| {
            a.source_id
                .cmp(&b.source_id)
                .then_with(|| a.target_id.cmp(&b.target_id))
        });

        let group_matches = self.split_pass(
            sources,
            targets,
            &score,
            &mut matched_sources,
            &mut matched_targets,
        );

        let assignment = Assignment {
            matches,
            group_matches,
            unmatched_sources: unmatched_ids(sources, &matched_sources),
            unmatched_targets: unmatched_ids(targets, &matched_targets),
        };
        verify_cardinality(&assignment)?;
        Ok(assignment)
    }

    fn pair_eligible(&self, source: &Transaction, target: &Transaction) -> bool {
        let Some(diff_pct) = source.amount.difference_pct(&target.amount) else {
            // Cross-currency pairs and double-zero amounts are never candidates.
            return false;
        };
        if diff_pct > self.config.amount_tolerance_pct {
            return false;
        }
        source.date_distance_days(target) <= self.config.date_window_days
    }

    /// Highest-score-first greedy assignment. Candidate positions are
    /// already id-sorted, so position order is the id tie-break.
    fn solve_greedy(
        &self,
        source_count: usize,
        target_count: usize,
        candidates: &[Candidate],
    ) -> Vec<usize> {
        let mut order: Vec<usize> = (0..candidates.len()).collect();
        order.sort_by(|&a, &b| {
            candidates[b]
                .total
                .total_cmp(&candidates[a].total)
                .then_with(|| candidates[a].source_index.cmp(&candidates[b].source_index))
                .then_with(|| candidates[a].target_index.cmp(&candidates[b].target_index))
        });

        let mut used_sources = vec![false; source_count];
        let mut used_targets = vec![false; target_count];
        let mut picked = Vec::new();
        for index in order {
            let candidate = &candidates[index];
            if used_sources[candidate.source_index] || used_targets[candidate.target_index] {
                continue;
            }
            used_sources[candidate.source_index] = true;
            used_targets[candidate.target_index] = true;
            picked.push(index);
        }
        picked
    }

    /// Minimum-cost assignment over the full matrix (cost = 1 - score/100,
    /// forbidden pairs at a sentinel). Classic O(n^3) potentials algorithm.
    fn solve_hungarian(
        &self,
        source_count: usize,
        target_count: usize,
        candidates: &[Candidate],
    ) -> Vec<usize> {
        let n = source_count.max(target_count);
        let mut cost = vec![vec![FORBIDDEN_COST; n]; n];
        let mut candidate_at = vec![vec![None; n]; n];
        for (index, candidate) in candidates.iter().enumerate() {
            cost[candidate.source_index][candidate.target_index] =
                1.0 - f64::from(candidate.total) / 100.0;
            candidate_at[candidate.source_index][candidate.target_index] = Some(index);
        }

        let mut u = vec![0.0_f64; n + 1];
        let mut v = vec![0.0_f64; n + 1];
        let mut assigned_row = vec![0_usize; n + 1];
        let mut way = vec![0_usize; n + 1];
        for row in 1..=n {
            assigned_row[0] = row;
            let mut j0 = 0_usize;
            let mut minv = vec![f64::INFINITY; n + 1];
            let mut used = vec![false; n + 1];
            loop {
                used[j0] = true;
                let i0 = assigned_row[j0];
                let mut delta = f64::INFINITY;
                let mut j1 = 0_usize;
                for j in 1..=n {
                    if used[j] {
                        continue;
                    }
                    let current = cost[i0 - 1][j - 1] - u[i0] - v[j];
                    if current < minv[j] {
                        minv[j] = current;
                        way[j] = j0;
                    }
                    if minv[j] < delta {
                        delta = minv[j];
                        j1 = j;
                    }
                }
                for j in 0..=n {
                    if used[j] {
                        u[assigned_row[j]] += delta;
                        v[j] -= delta;
                    } else {
                        minv[j] -= delta;
                    }
                }
                j0 = j1;
                if assigned_row[j0] == 0 {
                    break;
                }
            }
            loop {
                let j1 = way[j0];
                assigned_row[j0] = assigned_row[j1];
                j0 = j1;
                if j0 == 0 {
                    break;
                }
            }
        }

        let mut picked = Vec::new();
        for column in 1..=n {
            let row = assigned_row[column];
            if row == 0 {
                continue;
            }
            if let Some(index) = candidate_at[row - 1][column - 1] {
                picked.push(index);
            }
        }
        picked.sort_unstable();
        picked
    }

    /// Second pass: an unmatched source whose amount equals the sum of two
    /// or more unmatched same-currency targets within the date window
    /// becomes a group match scored at the weakest component less a penalty.
    fn split_pass<F>(
        &self,
        sources: &[Transaction],
        targets: &[Transaction],
        score: &F,
        matched_sources: &mut BTreeSet<usize>,
        matched_targets: &mut BTreeSet<usize>,
    ) -> Vec<GroupMatch>
    where
        F: Fn(&Transaction, &Transaction) -> ScoreBreakdown,
    {
        let mut source_order: Vec<usize> = (0..sources.len())
            .filter(|index| !matched_sources.contains(index))
            .collect();
        source_order.sort_by(|&a, &b| sources[a].id.cmp(&sources[b].id));

        let mut groups = Vec::new();
        for source_index in source_order {
            let source = &sources[source_index];
            let mut eligible: Vec<usize> = (0..targets.len())
                .filter(|index| !matched_targets.contains(index))
                .filter(|&index| {
                    let target = &targets[index];
                    target.amount.currency == source.amount.currency
                        && source.date_distance_days(target) <= self.config.date_window_days
                        && target.amount.amount_minor <= source.amount.amount_minor
                })
                .collect();
            eligible.sort_by(|&a, &b| targets[a].id.cmp(&targets[b].id));

            let Some(combo) = find_exact_sum(
                source.amount.amount_minor,
                &eligible,
                targets,
                self.config.max_split_targets,
            ) else {
                continue;
            };

            let weakest = combo
                .iter()
                .map(|&index| score(source, &targets[index]).total())
                .fold(f32::INFINITY, f32::min);
            let group_score = (weakest - self.config.split_penalty).max(0.0);

            matched_sources.insert(source_index);
            for &index in &combo {
                matched_targets.insert(index);
            }
            groups.push(GroupMatch {
                source_id: source.id.clone(),
                target_ids: combo
                    .into_iter()
                    .map(|index| targets[index].id.clone())
                    .collect(),
                score: group_score,
            });
        }
        groups
    }
}

/// First lexicographic combination of 2..=max targets whose minor
/// amounts sum exactly to `goal`.
fn find_exact_sum(
    goal: i64,
    eligible: &[usize],
    targets: &[Transaction],
    max_targets: usize,
) -> Option<Vec<usize>> {
    fn search(
        goal: i64,
        eligible: &[usize],
        targets: &[Transaction],
        start: usize,
        max_targets: usize,
        picked: &mut Vec<usize>,
    ) -> bool {
        if goal == 0 {
            return picked.len() >= 2;
        }
        if picked.len() == max_targets {
            return false;
        }
        for position in start..eligible.len() {
            let index = eligible[position];
            let amount = targets[index].amount.amount_minor;
            if amount > goal {
                continue;
            }
            picked.push(index);
            if search(goal - amount, eligible, targets, position + 1, max_targets, picked) {
                return true;
            }
            picked.pop();
        }
        false
    }

    let mut picked = Vec::new();
    if search(goal, eligible, targets, 0, max_targets, &mut picked) {
        Some(picked)
    } else {
        None
    }
}

fn unmatched_ids(transactions: &[Transaction], matched: &BTreeSet<usize>) -> Vec<TransactionId> {
    transactions
        .iter()
        .enumerate()
        .filter(|(index, _)| !matched.contains(index))
        .map(|(_, tx)| tx.id.clone())
        .collect()
}

/// A transaction may appear in at most one match per run; anything else
/// is a bug that must fail the batch.
fn verify_cardinality(assignment: &Assignment) -> AssignResult<()> {
    let mut seen_sources = BTreeSet::new();
    let mut seen_targets = BTreeSet::new();
    for pair in &assignment.matches {
        if !seen_sources.insert(&pair.source_id) {
            return Err(AssignError::Cardinality(format!(
                "source {} appears in more than one match",
                pair.source_id
            )));
        }
        if !seen_targets.insert(&pair.target_id) {
            return Err(AssignError::Cardinality(format!(
                "target {} appears in more than one match",
                pair.target_id
            )));
        }
    }
    for group in &assignment.group_matches {
        if !seen_sources.insert(&group.source_id) {
            return Err(AssignError::Cardinality(format!(
                "source {} appears in more than one match",
                group.source_id
            )));
        }
        for target_id in &group.target_ids {
            if !seen_targets.insert(target_id) {
                return Err(AssignError::Cardinality(format!(
                    "target {target_id} appears in more than one match"
                )));
            }
        }
    }
    Ok(())
}
