#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::RwLock;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use tally_transactions::Transaction;
use thiserror::Error;

pub type PatternId = String;
pub type ScoreResult<T> = Result<T, ScoreError>;

/// Matches at or above this total are confirmed automatically.
pub const AUTO_MATCH_THRESHOLD: f32 = 80.0;
/// Matches at or above this total are eligible for draft journal entries.
pub const AUTO_JE_THRESHOLD: f32 = 90.0;
/// Matches between this and the auto-match threshold need human review.
pub const REVIEW_THRESHOLD: f32 = 60.0;

const MAX_PATTERN_BOOST: f32 = 20.0;

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("pattern {0} not found")]
    PatternNotFound(PatternId),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// A learned (source substring, target substring) pair that boosts the
/// score of transaction pairs whose descriptions contain both sides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub pattern_id: PatternId,
    pub source_pattern: String,
    pub target_pattern: String,
    pub confidence: f32,
    pub match_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentScore {
    pub points: f32,
    pub detail: String,
}

impl ComponentScore {
    fn new(points: f32, detail: impl Into<String>) -> Self {
        Self {
            points,
            detail: detail.into(),
        }
    }
}

/// Per-factor breakdown of one scoring evaluation. Components are
/// bounded (amount 0-40, date 0-30, description 0-20, reference 0-10,
/// pattern boost 0-20); the total saturates at 100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub amount: ComponentScore,
    pub date: ComponentScore,
    pub description: ComponentScore,
    pub reference: ComponentScore,
    pub pattern_boost: f32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_pattern_ids: Vec<PatternId>,
}

impl ScoreBreakdown {
    #[must_use]
    pub fn total(&self) -> f32 {
        let sum = self.amount.points
            + self.date.points
            + self.description.points
            + self.reference.points
            + self.pattern_boost;
        sum.min(100.0)
    }

    #[must_use]
    pub fn confidence(&self) -> MatchConfidence {
        MatchConfidence::from_total(self.total())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    High,
    Medium,
    Low,
    NoMatch,
}

impl MatchConfidence {
    #[must_use]
    pub fn from_total(total: f32) -> Self {
        if total >= AUTO_JE_THRESHOLD {
            Self::High
        } else if total >= AUTO_MATCH_THRESHOLD {
            Self::Medium
        } else if total >= REVIEW_THRESHOLD {
            Self::Low
        } else {
            Self::NoMatch
        }
    }
}

/// Deterministic multi-factor scorer. Pure: same inputs and the same
/// pattern snapshot always produce the same breakdown.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchScorer;

impl MatchScorer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[must_use]
    pub fn score(
        self,
        source: &Transaction,
        target: &Transaction,
        patterns: &[Pattern],
    ) -> ScoreBreakdown {
        let amount = score_amount(source, target);
        let date = score_date(source, target);
        let description = score_description(&source.description, &target.description);
        let reference = score_reference(
            source.reference.as_deref().unwrap_or(""),
            target.reference.as_deref().unwrap_or(""),
        );
        let (pattern_boost, matched_pattern_ids) =
            score_patterns(&source.description, &target.description, patterns);

        ScoreBreakdown {
            amount,
            date,
            description,
            reference,
            pattern_boost,
            matched_pattern_ids,
        }
    }
}

fn score_amount(source: &Transaction, target: &Transaction) -> ComponentScore {
    if source.amount.is_zero() || target.amount.is_zero() {
        return ComponentScore::new(0.0, "one amount is zero or missing");
    }
    let Some(diff_minor) = source.amount.difference_minor(&target.amount) else {
        return ComponentScore::new(
            0.0,
            format!(
                "currency mismatch ({} vs {})",
                source.amount.currency, target.amount.currency
            ),
        );
    };
    // Within one minor unit counts as exact: 0.01 of a major unit.
    if diff_minor <= 1 {
        return ComponentScore::new(40.0, "exact match");
    }
    let Some(diff_pct) = source.amount.difference_pct(&target.amount) else {
        return ComponentScore::new(0.0, "amounts not comparable");
    };
    let (points, band) = if diff_pct <= 0.5 {
        (35.0, "within 0.5%")
    } else if diff_pct <= 1.0 {
        (30.0, "within 1%")
    } else if diff_pct <= 2.0 {
        (20.0, "within 2%")
    } else if diff_pct <= 5.0 {
        (10.0, "within 5%")
    } else {
        (0.0, "difference too large")
    };
    ComponentScore::new(points, format!("{band} (diff: {diff_pct:.2}%)"))
}

fn score_date(source: &Transaction, target: &Transaction) -> ComponentScore {
    let diff_days = source.date_distance_days(target);
    let (points, detail) = match diff_days {
        0 => (30.0, "same day".to_string()),
        1 => (25.0, "1 day difference".to_string()),
        2 => (20.0, "2 days difference".to_string()),
        3 => (15.0, "3 days difference".to_string()),
        4..=5 => (10.0, format!("{diff_days} days difference")),
        6..=7 => (5.0, format!("{diff_days} days difference")),
        _ => (0.0, format!("date difference too large ({diff_days} days)")),
    };
    ComponentScore::new(points, detail)
}

/// Lowercase, strip noise tokens in order, drop non-alphanumerics, and
/// collapse whitespace. Stripping "ref" before "reference" leaves the
/// residue "erence" behind; that ordering is part of the contract.
#[must_use]
pub fn normalize_description(description: &str) -> String {
    let mut text = description.to_lowercase();
    for noise in ["payment", "transfer", "from", "to", "ref", "reference"] {
        text = text.replace(noise, "");
    }
    let cleaned: String = text
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch.is_whitespace() {
                ch
            } else {
                ' '
            }
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn keywords(description: &str) -> BTreeSet<String> {
    normalize_description(description)
        .split_whitespace()
        .filter(|word| word.len() >= 3)
        .map(str::to_owned)
        .collect()
}

fn score_description(source: &str, target: &str) -> ComponentScore {
    if source.trim().is_empty() || target.trim().is_empty() {
        return ComponentScore::new(0.0, "missing description");
    }
    let norm_source = normalize_description(source);
    let norm_target = normalize_description(target);
    if norm_source.is_empty() || norm_target.is_empty() {
        return ComponentScore::new(0.0, "empty after normalization");
    }

    let max_len = norm_source.chars().count().max(norm_target.chars().count());
    let distance = levenshtein(&norm_source, &norm_target);
    let distance_pct = distance as f32 / max_len as f32 * 100.0;

    if distance_pct < 10.0 {
        return ComponentScore::new(20.0, format!("very similar (distance: {distance_pct:.1}%)"));
    }
    if distance_pct < 20.0 {
        return ComponentScore::new(15.0, format!("similar (distance: {distance_pct:.1}%)"));
    }
    if distance_pct < 30.0 {
        return ComponentScore::new(
            10.0,
            format!("somewhat similar (distance: {distance_pct:.1}%)"),
        );
    }

    let common: Vec<String> = keywords(source)
        .intersection(&keywords(target))
        .cloned()
        .collect();
    if common.is_empty() {
        ComponentScore::new(0.0, "descriptions too different")
    } else {
        let sample = common
            .iter()
            .take(3)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        ComponentScore::new(5.0, format!("common keywords: {sample}"))
    }
}

fn normalize_reference(reference: &str) -> String {
    reference
        .to_lowercase()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

fn score_reference(source: &str, target: &str) -> ComponentScore {
    if source.trim().is_empty() || target.trim().is_empty() {
        return ComponentScore::new(0.0, "missing reference");
    }
    let norm_source = normalize_reference(source);
    let norm_target = normalize_reference(target);
    if norm_source.is_empty() || norm_target.is_empty() {
        return ComponentScore::new(0.0, "empty after normalization");
    }
    if norm_source == norm_target {
        return ComponentScore::new(10.0, "exact reference match");
    }
    if norm_source.contains(&norm_target) || norm_target.contains(&norm_source) {
        return ComponentScore::new(7.0, "reference contained in other");
    }
    let shorter_len = norm_source.len().min(norm_target.len());
    let common_len = longest_common_substring(&norm_source, &norm_target);
    if common_len * 2 > shorter_len {
        let overlap_pct = common_len as f32 / shorter_len as f32 * 100.0;
        return ComponentScore::new(5.0, format!("partial match ({overlap_pct:.0}% overlap)"));
    }
    ComponentScore::new(0.0, "no reference match")
}

fn score_patterns(
    source_description: &str,
    target_description: &str,
    patterns: &[Pattern],
) -> (f32, Vec<PatternId>) {
    let norm_source = normalize_description(source_description);
    let norm_target = normalize_description(target_description);
    let mut best_confidence = 0.0_f32;
    let mut matched = Vec::new();
    for pattern in patterns {
        let pattern_source = normalize_description(&pattern.source_pattern);
        let pattern_target = normalize_description(&pattern.target_pattern);
        if pattern_source.is_empty() || pattern_target.is_empty() {
            continue;
        }
        if norm_source.contains(&pattern_source) && norm_target.contains(&pattern_target) {
            best_confidence = best_confidence.max(pattern.confidence.clamp(0.0, 1.0));
            matched.push(pattern.pattern_id.clone());
        }
    }
    let boost = (best_confidence * MAX_PATTERN_BOOST).min(MAX_PATTERN_BOOST);
    (boost, matched)
}

fn levenshtein(left: &str, right: &str) -> usize {
    let left_chars: Vec<char> = left.chars().collect();
    let right_chars: Vec<char> = right.chars().collect();
    if left_chars.is_empty() {
        return right_chars.len();
    }
    if right_chars.is_empty() {
        return left_chars.len();
    }
    let mut previous: Vec<usize> = (0..=right_chars.len()).collect();
    let mut current = vec![0usize; right_chars.len() + 1];
    for (i, left_ch) in left_chars.iter().enumerate() {
        current[0] = i + 1;
        for (j, right_ch) in right_chars.iter().enumerate() {
            let insertions = previous[j + 1] + 1;
            let deletions = current[j] + 1;
            let substitutions = previous[j] + usize::from(left_ch != right_ch);
            current[j + 1] = insertions.min(deletions).min(substitutions);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[right_chars.len()]
}

fn longest_common_substring(left: &str, right: &str) -> usize {
    let left_bytes = left.as_bytes();
    let right_bytes = right.as_bytes();
    if left_bytes.is_empty() || right_bytes.is_empty() {
        return 0;
    }
    let mut previous = vec![0usize; right_bytes.len() + 1];
    let mut current = vec![0usize; right_bytes.len() + 1];
    let mut best = 0;
    for &left_byte in left_bytes {
        for (j, &right_byte) in right_bytes.iter().enumerate() {
            if left_byte == right_byte {
                current[j + 1] = previous[j] + 1;
                best = best.max(current[j + 1]);
            } else {
                current[j + 1] = 0;
            }
        }
        std::mem::swap(&mut previous, &mut current);
    }
    best
}

/// Keyed collection of learned patterns. Shared-read, single-writer:
/// a snapshot taken via `list` at batch start stays valid for the
/// whole batch.
pub trait PatternStore: Send + Sync {
    fn upsert(&self, pattern: Pattern) -> ScoreResult<Pattern>;
    fn list(&self) -> ScoreResult<Vec<Pattern>>;
    fn increment_usage(&self, pattern_id: &PatternId) -> ScoreResult<()>;
}

#[derive(Default)]
pub struct InMemoryPatternStore {
    patterns: RwLock<HashMap<PatternId, Pattern>>,
}

impl InMemoryPatternStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PatternStore for InMemoryPatternStore {
    fn upsert(&self, mut pattern: Pattern) -> ScoreResult<Pattern> {
        if pattern.pattern_id.trim().is_empty() {
            return Err(ScoreError::Validation("pattern id must be provided".into()));
        }
        pattern.confidence = pattern.confidence.clamp(0.0, 1.0);
        pattern.last_updated = Some(Utc::now());
        let mut guard = self
            .patterns
            .write()
            .map_err(|_| ScoreError::Storage("pattern store poisoned".into()))?;
        if let Some(existing) = guard.get(&pattern.pattern_id) {
            // match_count is monotone; an upsert may not roll it back.
            pattern.match_count = pattern.match_count.max(existing.match_count);
        }
        guard.insert(pattern.pattern_id.clone(), pattern.clone());
        Ok(pattern)
    }

    fn list(&self) -> ScoreResult<Vec<Pattern>> {
        let guard = self
            .patterns
            .read()
            .map_err(|_| ScoreError::Storage("pattern store poisoned".into()))?;
        let mut patterns: Vec<Pattern> = guard.values().cloned().collect();
        patterns.sort_by(|a, b| a.pattern_id.cmp(&b.pattern_id));
        Ok(patterns)
    }

    fn increment_usage(&self, pattern_id: &PatternId) -> ScoreResult<()> {
        let mut guard = self
            .patterns
            .write()
            .map_err(|_| ScoreError::Storage("pattern store poisoned".into()))?;
        let pattern = guard
            .get_mut(pattern_id)
            .ok_or_else(|| ScoreError::PatternNotFound(pattern_id.clone()))?;
        pattern.match_count += 1;
        pattern.last_used = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use tally_transactions::FlowDirection;
    use tally_transactions::Money;
    use tally_transactions::TransactionSource;
    use tally_transactions::TransactionStatus;

    fn txn(
        id: &str,
        amount_minor: i64,
        date: (i32, u32, u32),
        description: &str,
        reference: Option<&str>,
    ) -> Transaction {
        Transaction {
            id: id.into(),
            organization_id: "org-1".into(),
            amount: Money {
                amount_minor,
                currency: "USD".into(),
            },
            direction: FlowDirection::Inbound,
            value_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).expect("valid date"),
            description: description.into(),
            reference: reference.map(ToOwned::to_owned),
            counterparty: None,
            source: TransactionSource::Gateway,
            source_id: None,
            status: TransactionStatus::Pending,
            matched_with: Vec::new(),
        }
    }

    fn pattern(id: &str, source: &str, target: &str, confidence: f32) -> Pattern {
        Pattern {
            pattern_id: id.into(),
            source_pattern: source.into(),
            target_pattern: target.into(),
            confidence,
            match_count: 0,
            last_used: None,
            last_updated: None,
        }
    }

    #[test]
    fn shared_reference_pair_is_auto_match() {
        let scorer = MatchScorer::new();
        let source = txn("g-1", 150_000, (2026, 1, 9), "pi_123", Some("pi_123"));
        let target = txn("b-1", 150_000, (2026, 1, 9), "STRIPE pi_123", Some("pi_123"));
        let breakdown = scorer.score(&source, &target, &[]);
        assert_eq!(breakdown.amount.points, 40.0);
        assert_eq!(breakdown.date.points, 30.0);
        // The edit distance misses every band; the shared token "123"
        // earns the keyword-overlap fallback.
        assert_eq!(breakdown.description.points, 5.0);
        assert_eq!(breakdown.reference.points, 10.0);
        assert_eq!(breakdown.total(), 85.0);
        assert_eq!(breakdown.confidence(), MatchConfidence::Medium);
    }

    #[test]
    fn identical_pair_scores_high() {
        let scorer = MatchScorer::new();
        let source = txn(
            "g-1",
            150_000,
            (2026, 1, 9),
            "Stripe payout pi_123",
            Some("pi_123"),
        );
        let target = txn(
            "b-1",
            150_000,
            (2026, 1, 9),
            "STRIPE payout pi_123",
            Some("pi_123"),
        );
        let breakdown = scorer.score(&source, &target, &[]);
        assert_eq!(breakdown.description.points, 20.0);
        assert_eq!(breakdown.total(), 100.0);
        assert_eq!(breakdown.confidence(), MatchConfidence::High);
    }

    #[test]
    fn amount_bands_follow_percentage_difference() {
        let scorer = MatchScorer::new();
        let base = txn("g-1", 100_000, (2026, 1, 9), "x", None);
        let cases = [
            (100_000, 40.0),
            (100_001, 40.0), // within one minor unit
            (100_400, 35.0),
            (100_900, 30.0),
            (101_900, 20.0),
            (104_900, 10.0),
            (120_000, 0.0),
        ];
        for (target_minor, expected) in cases {
            let target = txn("b-1", target_minor, (2026, 1, 9), "x", None);
            let breakdown = scorer.score(&base, &target, &[]);
            assert_eq!(breakdown.amount.points, expected, "minor={target_minor}");
        }
    }

    #[test]
    fn zero_amount_scores_zero() {
        let scorer = MatchScorer::new();
        let source = txn("g-1", 0, (2026, 1, 9), "x", None);
        let target = txn("b-1", 0, (2026, 1, 9), "x", None);
        assert_eq!(scorer.score(&source, &target, &[]).amount.points, 0.0);
    }

    #[test]
    fn date_bands_decay_over_the_week() {
        let scorer = MatchScorer::new();
        let base = txn("g-1", 100_000, (2026, 3, 10), "x", None);
        let cases = [
            ((2026, 3, 10), 30.0),
            ((2026, 3, 11), 25.0),
            ((2026, 3, 12), 20.0),
            ((2026, 3, 13), 15.0),
            ((2026, 3, 15), 10.0),
            ((2026, 3, 17), 5.0),
            ((2026, 3, 20), 0.0),
        ];
        for (date, expected) in cases {
            let target = txn("b-1", 100_000, date, "x", None);
            let breakdown = scorer.score(&base, &target, &[]);
            assert_eq!(breakdown.date.points, expected, "date={date:?}");
        }
    }

    #[test]
    fn normalization_strips_noise_and_symbols() {
        assert_eq!(
            normalize_description("Payment REF#42 from ACME, Inc."),
            "42 acme inc"
        );
        // "ref" is stripped before "reference" can match, leaving a residue.
        assert_eq!(normalize_description("Reference 123"), "erence 123");
    }

    #[test]
    fn description_keyword_fallback_scores_five() {
        let score = score_description("Stripe payout batch March", "zz qq stripe vv");
        assert_eq!(score.points, 5.0);
    }

    #[test]
    fn reference_bands() {
        assert_eq!(score_reference("pi_123", "PI 123").points, 10.0);
        assert_eq!(score_reference("pi_123", "STRIPE pi_123 X").points, 7.0);
        // Shared run "inv20" is longer than half of the shorter side.
        assert_eq!(score_reference("inv-2041", "inv-2099").points, 5.0);
        assert_eq!(score_reference("abc", "xyz").points, 0.0);
        assert_eq!(score_reference("", "xyz").points, 0.0);
    }

    #[test]
    fn pattern_boost_uses_best_confidence_and_reports_ids() {
        let scorer = MatchScorer::new();
        let source = txn("g-1", 100_000, (2026, 1, 9), "Stripe payout weekly", None);
        let target = txn("b-1", 100_000, (2026, 1, 9), "STRIPE TRANSFER inbound", None);
        let patterns = vec![
            pattern("p-1", "stripe", "stripe", 0.5),
            pattern("p-2", "stripe payout", "stripe", 0.9),
            pattern("p-3", "wise", "wise", 1.0),
        ];
        let breakdown = scorer.score(&source, &target, &patterns);
        assert_eq!(breakdown.pattern_boost, 18.0);
        assert_eq!(breakdown.matched_pattern_ids, vec!["p-1", "p-2"]);
    }

    #[test]
    fn total_saturates_at_one_hundred() {
        let scorer = MatchScorer::new();
        let source = txn("g-1", 150_000, (2026, 1, 9), "Stripe payout", Some("pi_1"));
        let target = txn("b-1", 150_000, (2026, 1, 9), "Stripe payout", Some("pi_1"));
        let patterns = vec![pattern("p-1", "stripe", "stripe", 1.0)];
        let breakdown = scorer.score(&source, &target, &patterns);
        assert_eq!(breakdown.total(), 100.0);
        let component_sum = breakdown.amount.points
            + breakdown.date.points
            + breakdown.description.points
            + breakdown.reference.points
            + breakdown.pattern_boost;
        assert!(component_sum >= 100.0);
    }

    #[test]
    fn scorer_is_deterministic() {
        let scorer = MatchScorer::new();
        let source = txn("g-1", 99_000, (2026, 2, 3), "invoice INV-7", Some("INV-7"));
        let target = txn("b-1", 97_000, (2026, 2, 4), "Stripe transfer INV-7", None);
        let patterns = vec![pattern("p-1", "invoice", "stripe", 0.6)];
        let first = scorer.score(&source, &target, &patterns);
        let second = scorer.score(&source, &target, &patterns);
        assert_eq!(first, second);
    }

    #[test]
    fn store_clamps_confidence_and_keeps_counts_monotone() {
        let store = InMemoryPatternStore::new();
        let stored = store
            .upsert(pattern("p-1", "a", "b", 1.7))
            .expect("upsert succeeds");
        assert_eq!(stored.confidence, 1.0);

        store.increment_usage(&"p-1".to_string()).expect("bump");
        store.increment_usage(&"p-1".to_string()).expect("bump");

        // Re-upserting with a stale count must not roll the counter back.
        let refreshed = store
            .upsert(pattern("p-1", "a", "b", 0.4))
            .expect("upsert succeeds");
        assert_eq!(refreshed.match_count, 2);
        assert!(refreshed.last_updated.is_some());
    }

    #[test]
    fn increment_unknown_pattern_errors() {
        let store = InMemoryPatternStore::new();
        let err = store.increment_usage(&"missing".to_string()).unwrap_err();
        assert!(matches!(err, ScoreError::PatternNotFound(_)));
    }

    #[test]
    fn list_returns_deterministic_snapshot() {
        let store = InMemoryPatternStore::new();
        store
            .upsert(pattern("p-2", "b", "b", 0.5))
            .expect("upsert succeeds");
        store
            .upsert(pattern("p-1", "a", "a", 0.5))
            .expect("upsert succeeds");
        let ids: Vec<PatternId> = store
            .list()
            .expect("list succeeds")
            .into_iter()
            .map(|p| p.pattern_id)
            .collect();
        assert_eq!(ids, vec!["p-1", "p-2"]);
    }
}
