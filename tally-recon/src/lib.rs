#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use tally_audit::AuditEntityKind;
use tally_audit::AuditError;
use tally_audit::AuditEvent;
use tally_audit::AuditSink;
use tally_exceptions::ExceptionError;
use tally_exceptions::ExceptionQueue;
use tally_exceptions::ExceptionType;
use tally_exceptions::PriorityBands;
use tally_exceptions::ReconException;
use tally_journal::DraftGenerator;
use tally_journal::DraftJournalEntry;
use tally_journal::DraftStore;
use tally_journal::GlAccountMap;
use tally_journal::JournalError;
use tally_journal::MatchGroupAmounts;
use tally_match::AssignError;
use tally_match::AssignmentConfig;
use tally_match::AssignmentEngine;
use tally_match::MatchType;
use tally_score::AUTO_JE_THRESHOLD;
use tally_score::MatchScorer;
use tally_score::Pattern;
use tally_score::PatternStore;
use tally_score::ScoreBreakdown;
use tally_score::ScoreError;
use tally_transactions::Transaction;
use tally_transactions::TransactionId;
use tally_transactions::TransactionStatus;
use thiserror::Error;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

pub type ReconResult<T> = Result<T, ReconError>;

/// Scores at or above this (0-40 band) qualify as near-match hints on
/// an exception.
const NEAR_MATCH_FLOOR: f32 = 40.0;
const NEAR_MATCH_LIMIT: usize = 3;

#[derive(Debug, Error)]
pub enum ReconError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Assign(#[from] AssignError),
    #[error("pattern store failure: {0}")]
    Patterns(#[from] ScoreError),
    #[error("internal invariant violated: {0}")]
    Invariant(String),
    #[error("exception writer failure: {0}")]
    Exceptions(#[from] ExceptionError),
    #[error("draft writer failure: {0}")]
    Drafts(JournalError),
    #[error("audit writer failure: {0}")]
    Audit(#[from] AuditError),
}

/// Per-batch tunables. The defaults line up with the scorer's outer
/// bands: anything farther apart than 5% or 7 days is never a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    pub amount_tolerance_pct: f64,
    pub date_window_days: i64,
    /// Auto-match floor on the 0-1 scale.
    pub match_threshold: f32,
    /// Matches between this and `match_threshold` are kept but flagged
    /// for review; below it pairs fall back to unmatched.
    pub review_threshold: f32,
    pub llm_enabled: bool,
    /// Score a gross-vs-net pair as an exact amount match when the gap
    /// fits inside the tolerance (payout fee absorption).
    pub fee_aware: bool,
    pub max_pairs: usize,
    pub split_penalty: f32,
    pub max_split_targets: usize,
    pub dense_threshold: f64,
    pub llm_timeout_secs: u64,
    /// Payment-processor names stripped from descriptions before
    /// scoring. A settlement narrative like "STRIPE pi_123" names the
    /// processor, not the payout, so the token carries no matching
    /// signal.
    pub gateway_aliases: Vec<String>,
    pub priority_bands: PriorityBands,
    pub gl_accounts: GlAccountMap,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            amount_tolerance_pct: 5.0,
            date_window_days: 7,
            match_threshold: 0.8,
            review_threshold: 0.6,
            llm_enabled: false,
            fee_aware: true,
            max_pairs: 1_000_000,
            split_penalty: 5.0,
            max_split_targets: 4,
            dense_threshold: 0.25,
            llm_timeout_secs: 60,
            gateway_aliases: vec!["stripe".into(), "paystack".into(), "flutterwave".into()],
            priority_bands: PriorityBands::default(),
            gl_accounts: GlAccountMap::default(),
        }
    }
}

impl ReconciliationConfig {
    fn assignment(&self) -> AssignmentConfig {
        AssignmentConfig {
            amount_tolerance_pct: self.amount_tolerance_pct,
            date_window_days: self.date_window_days,
            // The engine keeps everything above the review floor; the
            // orchestrator decides auto vs needs-review afterwards.
            match_threshold: self.review_threshold,
            max_pairs: self.max_pairs,
            split_penalty: self.split_penalty,
            max_split_targets: self.max_split_targets,
            dense_threshold: self.dense_threshold,
        }
    }
}

/// One reconciliation batch: fixed input sets plus config.
#[derive(Debug, Clone)]
pub struct ReconcileBatch {
    pub organization_id: String,
    pub gateway: Vec<Transaction>,
    pub bank: Vec<Transaction>,
    pub internal: Option<Vec<Transaction>>,
    pub config: ReconciliationConfig,
}

/// A confirmed match: one gateway source against one or more bank
/// targets, optionally joined to an internal-ledger counterpart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: String,
    pub organization_id: String,
    pub source_id: TransactionId,
    pub target_ids: Vec<TransactionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_id: Option<TransactionId>,
    pub score: f32,
    pub match_type: MatchType,
    pub needs_review: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<ScoreBreakdown>,
    pub matched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub organization_id: String,
    pub matches: Vec<MatchRecord>,
    /// All batch transactions with their final statuses applied.
    pub transactions: Vec<Transaction>,
    pub unmatched: Vec<TransactionId>,
    pub exceptions: Vec<ReconException>,
    pub draft_journal_entries: Vec<DraftJournalEntry>,
    /// Informational messages, e.g. "no transactions to match".
    pub notes: Vec<String>,
    pub match_rate: f64,
}

/// Optional explanation provider for freshly opened exceptions.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionAdvice {
    pub explanation: String,
    pub suggested_action: String,
}

#[async_trait]
pub trait ExceptionAdvisor: Send + Sync {
    async fn advise(&self, exception: &ReconException) -> Option<ExceptionAdvice>;
}

pub struct ReconciliationOrchestrator {
    scorer: MatchScorer,
    patterns: Arc<dyn PatternStore>,
    exceptions: Arc<dyn ExceptionQueue>,
    drafts: Arc<dyn DraftStore>,
    audit: Arc<dyn AuditSink>,
    advisor: Option<Arc<dyn ExceptionAdvisor>>,
}

impl ReconciliationOrchestrator {
    pub fn new(
        patterns: Arc<dyn PatternStore>,
        exceptions: Arc<dyn ExceptionQueue>,
        drafts: Arc<dyn DraftStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            scorer: MatchScorer::new(),
            patterns,
            exceptions,
            drafts,
            audit,
            advisor: None,
        }
    }

    #[must_use]
    pub fn with_advisor(mut self, advisor: Arc<dyn ExceptionAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    /// Run one batch. All side effects are buffered and committed only
    /// after the full pipeline succeeds; an error leaves the stores and
    /// every transaction status untouched.
    pub async fn reconcile(&self, batch: ReconcileBatch) -> ReconResult<ReconciliationResult> {
        let ReconcileBatch {
            organization_id,
            gateway,
            bank,
            internal,
            config,
        } = batch;

        if organization_id.trim().is_empty() {
            return Err(ReconError::Validation(
                "organization id must be provided".into(),
            ));
        }
        for tx in gateway.iter().chain(bank.iter()).chain(internal.iter().flatten()) {
            tx.validate()
                .map_err(|err| ReconError::Validation(err.to_string()))?;
        }

        let mut result = ReconciliationResult {
            organization_id: organization_id.clone(),
            ..ReconciliationResult::default()
        };

        if gateway.is_empty() && bank.is_empty() {
            result.notes.push("no transactions to match".into());
            return Ok(result);
        }

        // Pattern snapshot: valid for the whole batch.
        let patterns = self.patterns.list()?;

        let source_views: Vec<Transaction> = gateway
            .iter()
            .map(|tx| scoring_view(tx, &config.gateway_aliases))
            .collect();
        let target_views: Vec<Transaction> = bank
            .iter()
            .map(|tx| scoring_view(tx, &config.gateway_aliases))
            .collect();
        let score_pair = pair_scorer(self.scorer, &patterns, &config);

        let engine = AssignmentEngine::new(config.assignment());
        let assignment = engine.assign(&source_views, &target_views, &score_pair)?;
        if gateway.is_empty() || bank.is_empty() {
            result.notes.push("no transactions to match".into());
        }

        // Classification: auto at or above the match threshold, manual
        // review between the review floor and it.
        let auto_floor = config.match_threshold * 100.0;
        let now = Utc::now();
        let mut matches = Vec::new();
        for pair in &assignment.matches {
            let score = pair.score();
            matches.push(MatchRecord {
                match_id: format!("match_{}", Uuid::new_v4().simple()),
                organization_id: organization_id.clone(),
                source_id: pair.source_id.clone(),
                target_ids: vec![pair.target_id.clone()],
                internal_id: None,
                score,
                match_type: if score >= auto_floor {
                    MatchType::Auto
                } else {
                    MatchType::Manual
                },
                needs_review: score < auto_floor,
                breakdown: Some(pair.breakdown.clone()),
                matched_at: now,
            });
        }
        for group in &assignment.group_matches {
            matches.push(MatchRecord {
                match_id: format!("match_{}", Uuid::new_v4().simple()),
                organization_id: organization_id.clone(),
                source_id: group.source_id.clone(),
                target_ids: group.target_ids.clone(),
                internal_id: None,
                score: group.score,
                match_type: if group.score >= auto_floor {
                    MatchType::Auto
                } else {
                    MatchType::Manual
                },
                needs_review: group.score < auto_floor,
                breakdown: None,
                matched_at: now,
            });
        }

        // Optional third pass against the internal ledger.
        let mut unmatched_internals: Vec<&Transaction> = Vec::new();
        if let Some(internal_txns) = internal.as_ref() {
            unmatched_internals = self.three_way_pass(
                &gateway,
                internal_txns,
                &patterns,
                &config,
                &mut matches,
            );
        }

        // Drafts for high-confidence matches, fee detected from the
        // gross/net gap.
        let generator =
            DraftGenerator::with_threshold(config.gl_accounts.clone(), AUTO_JE_THRESHOLD);
        let mut drafts = Vec::new();
        for record in &matches {
            let Some(source) = find_transaction(&gateway, &record.source_id) else {
                return Err(ReconError::Invariant(format!(
                    "match {} references unknown source {}",
                    record.match_id, record.source_id
                )));
            };
            let mut net_minor = 0_i64;
            for target_id in &record.target_ids {
                let Some(target) = find_transaction(&bank, target_id) else {
                    return Err(ReconError::Invariant(format!(
                        "match {} references unknown target {target_id}",
                        record.match_id
                    )));
                };
                net_minor += target.amount.amount_minor;
            }
            let group = MatchGroupAmounts {
                organization_id: organization_id.clone(),
                match_ref: format!("{}|{}", record.source_id, record.target_ids.join("+")),
                entry_date: source.value_date,
                gross: source.amount.clone(),
                net: tally_transactions::Money {
                    amount_minor: net_minor,
                    currency: source.amount.currency.clone(),
                },
                confidence: record.score,
                split: record.target_ids.len() > 1,
            };
            match generator.generate(&group) {
                Ok(Some(draft)) => drafts.push(draft),
                Ok(None) => {}
                Err(err @ JournalError::Unbalanced(_)) => {
                    // Balanced-draft violations are fatal for the batch.
                    return Err(ReconError::Invariant(err.to_string()));
                }
                Err(err) => return Err(ReconError::Drafts(err)),
            }
        }

        // Exceptions for everything left unmatched.
        let mut exceptions = Vec::new();
        for source_id in &assignment.unmatched_sources {
            let Some(tx) = find_transaction(&gateway, source_id) else {
                continue;
            };
            let near = self.near_matches(tx, &target_views, &patterns, &config);
            exceptions.push(self.build_exception(&organization_id, tx, near, &config).await);
        }
        for target_id in &assignment.unmatched_targets {
            let Some(tx) = find_transaction(&bank, target_id) else {
                continue;
            };
            exceptions.push(
                self.build_exception(&organization_id, tx, Vec::new(), &config)
                    .await,
            );
        }
        for tx in &unmatched_internals {
            exceptions.push(
                self.build_exception(&organization_id, tx, Vec::new(), &config)
                    .await,
            );
        }

        // Commit phase: drafts, exceptions, audit, pattern usage. Any
        // failure aborts before the result is published.
        for draft in &drafts {
            self.drafts
                .save(draft.clone())
                .await
                .map_err(ReconError::Drafts)?;
        }
        for exception in &exceptions {
            self.exceptions.open(exception.clone()).await?;
        }

        let mut events = Vec::new();
        for record in &matches {
            events.push(AuditEvent {
                organization_id: organization_id.clone(),
                entity_kind: AuditEntityKind::Match,
                entity_id: record.match_id.clone(),
                actor: "reconciliation".into(),
                action: "match_confirmed".into(),
                metadata: serde_json::json!({
                    "source_id": record.source_id,
                    "target_ids": record.target_ids,
                    "score": record.score,
                    "needs_review": record.needs_review,
                }),
            });
        }
        for draft in &drafts {
            events.push(AuditEvent {
                organization_id: organization_id.clone(),
                entity_kind: AuditEntityKind::DraftEntry,
                entity_id: draft.entry_id.clone(),
                actor: "reconciliation".into(),
                action: "draft_generated".into(),
                metadata: serde_json::json!({ "match_ref": draft.match_ref }),
            });
        }
        for exception in &exceptions {
            events.push(AuditEvent {
                organization_id: organization_id.clone(),
                entity_kind: AuditEntityKind::Exception,
                entity_id: exception.exception_id.clone(),
                actor: "reconciliation".into(),
                action: "exception_opened".into(),
                metadata: serde_json::json!({
                    "type": exception.exception_type,
                    "priority": exception.priority,
                }),
            });
        }
        events.push(AuditEvent {
            organization_id: organization_id.clone(),
            entity_kind: AuditEntityKind::Batch,
            entity_id: format!("batch_{}", Uuid::new_v4().simple()),
            actor: "reconciliation".into(),
            action: "batch_reconciled".into(),
            metadata: serde_json::json!({
                "matches": matches.len(),
                "exceptions": exceptions.len(),
                "drafts": drafts.len(),
            }),
        });
        self.audit.append_all(events).await?;

        // Usage counters for every pattern that contributed to a
        // confirmed match. The store serializes writers.
        let mut bumped = BTreeSet::new();
        for record in &matches {
            let Some(breakdown) = &record.breakdown else {
                continue;
            };
            for pattern_id in &breakdown.matched_pattern_ids {
                if bumped.insert(pattern_id.clone()) {
                    self.patterns.increment_usage(pattern_id)?;
                }
            }
        }

        // Status updates are applied last, onto the owned copies.
        let mut transactions: Vec<Transaction> = gateway;
        transactions.extend(bank);
        if let Some(internal_txns) = internal {
            transactions.extend(internal_txns);
        }
        apply_statuses(&mut transactions, &matches, &exceptions);

        let matchable = transactions
            .iter()
            .filter(|tx| {
                matches!(
                    tx.source,
                    tally_transactions::TransactionSource::Gateway
                        | tally_transactions::TransactionSource::Bank
                )
            })
            .count();
        let matched = transactions
            .iter()
            .filter(|tx| {
                tx.status == TransactionStatus::Matched
                    && matches!(
                        tx.source,
                        tally_transactions::TransactionSource::Gateway
                            | tally_transactions::TransactionSource::Bank
                    )
            })
            .count();
        result.match_rate = if matchable == 0 {
            0.0
        } else {
            matched as f64 / matchable as f64
        };

        result.unmatched = transactions
            .iter()
            .filter(|tx| tx.status == TransactionStatus::Exception)
            .map(|tx| tx.id.clone())
            .collect();

        info!(
            organization_id = %result.organization_id,
            matches = matches.len(),
            exceptions = exceptions.len(),
            drafts = drafts.len(),
            match_rate = result.match_rate,
            "reconciliation batch complete"
        );

        result.matches = matches;
        result.exceptions = exceptions;
        result.draft_journal_entries = drafts;
        result.transactions = transactions;
        Ok(result)
    }

    /// Join confirmed matches to internal-ledger counterparts. Confirmed
    /// 2-way matches are never unwound; internals attach greedily by
    /// score with (source_id, internal_id) tie-breaks. Returns the
    /// internals left unattached.
    fn three_way_pass<'a>(
        &self,
        gateway: &[Transaction],
        internal: &'a [Transaction],
        patterns: &[Pattern],
        config: &ReconciliationConfig,
        matches: &mut [MatchRecord],
    ) -> Vec<&'a Transaction> {
        let internal_views: Vec<Transaction> = internal
            .iter()
            .map(|tx| scoring_view(tx, &config.gateway_aliases))
            .collect();
        let score_pair = pair_scorer(self.scorer, patterns, config);
        let floor = config.review_threshold * 100.0;

        struct InternalCandidate {
            match_index: usize,
            internal_index: usize,
            score: f32,
        }

        let mut candidates = Vec::new();
        for (match_index, record) in matches.iter().enumerate() {
            let Some(source) = find_transaction(gateway, &record.source_id) else {
                continue;
            };
            let source_view = scoring_view(source, &config.gateway_aliases);
            for (internal_index, internal_view) in internal_views.iter().enumerate() {
                let Some(diff_pct) = source.amount.difference_pct(&internal_view.amount) else {
                    continue;
                };
                if diff_pct > config.amount_tolerance_pct {
                    continue;
                }
                if source.date_distance_days(internal_view) > config.date_window_days {
                    continue;
                }
                let score = score_pair(&source_view, internal_view).total();
                if score >= floor {
                    candidates.push(InternalCandidate {
                        match_index,
                        internal_index,
                        score,
                    });
                }
            }
        }

        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| {
                    matches[a.match_index]
                        .source_id
                        .cmp(&matches[b.match_index].source_id)
                })
                .then_with(|| internal[a.internal_index].id.cmp(&internal[b.internal_index].id))
        });

        let mut used_matches = BTreeSet::new();
        let mut used_internals = BTreeSet::new();
        for candidate in candidates {
            if used_matches.contains(&candidate.match_index)
                || used_internals.contains(&candidate.internal_index)
            {
                continue;
            }
            used_matches.insert(candidate.match_index);
            used_internals.insert(candidate.internal_index);
            matches[candidate.match_index].internal_id =
                Some(internal[candidate.internal_index].id.clone());
        }

        internal
            .iter()
            .enumerate()
            .filter(|(index, _)| !used_internals.contains(index))
            .map(|(_, tx)| tx)
            .collect()
    }

    fn near_matches(
        &self,
        source: &Transaction,
        target_views: &[Transaction],
        patterns: &[Pattern],
        config: &ReconciliationConfig,
    ) -> Vec<TransactionId> {
        let source_view = scoring_view(source, &config.gateway_aliases);
        let mut scored: Vec<(f32, &TransactionId)> = target_views
            .iter()
            .map(|target| {
                (
                    self.scorer.score(&source_view, target, patterns).total(),
                    &target.id,
                )
            })
            .filter(|(score, _)| *score >= NEAR_MATCH_FLOOR)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored
            .into_iter()
            .take(NEAR_MATCH_LIMIT)
            .map(|(_, id)| id.clone())
            .collect()
    }

    async fn build_exception(
        &self,
        organization_id: &str,
        tx: &Transaction,
        near_matches: Vec<TransactionId>,
        config: &ReconciliationConfig,
    ) -> ReconException {
        let priority = config.priority_bands.priority_for(tx.amount.amount_minor);
        let mut exception = ReconException::new(
            organization_id,
            ExceptionType::NoMatch,
            priority,
            format!("no counterpart found for {} transaction {}", source_label(tx), tx.id),
        );
        exception.transaction_id = Some(tx.id.clone());
        exception.transaction_source = Some(tx.source);
        exception.amount = Some(tx.amount.clone());
        exception.vendor = tx.counterparty.clone();
        exception.near_matches = near_matches;

        if config.llm_enabled
            && let Some(advisor) = self.advisor.as_ref()
        {
            let advise = advisor.advise(&exception);
            match tokio::time::timeout(Duration::from_secs(config.llm_timeout_secs), advise).await
            {
                Ok(Some(advice)) => {
                    exception.ai_explanation = Some(advice.explanation);
                    exception.suggested_action = Some(advice.suggested_action);
                }
                Ok(None) => {}
                Err(_) => {
                    warn!(transaction_id = %tx.id, "exception advisor timed out; continuing");
                }
            }
        }
        exception
    }
}

fn source_label(tx: &Transaction) -> &'static str {
    match tx.source {
        tally_transactions::TransactionSource::Gateway => "gateway",
        tally_transactions::TransactionSource::Bank => "bank",
        tally_transactions::TransactionSource::Internal => "internal",
        tally_transactions::TransactionSource::Email => "email",
        tally_transactions::TransactionSource::Manual => "manual",
    }
}

/// Scoring view of a transaction: an empty description falls back to
/// the reference, processor aliases are stripped from the narrative,
/// and a missing reference falls back to what is left of the
/// description, so sparse feeds still compare on what they have.
fn scoring_view(tx: &Transaction, gateway_aliases: &[String]) -> Transaction {
    let mut view = tx.clone();
    if view.description.trim().is_empty()
        && let Some(reference) = view.reference.clone()
    {
        view.description = reference;
    }
    if !gateway_aliases.is_empty() && !view.description.is_empty() {
        let mut description = view.description.to_lowercase();
        for alias in gateway_aliases {
            description = description.replace(&alias.to_lowercase(), "");
        }
        view.description = description;
    }
    if view.reference.as_deref().map(str::trim).unwrap_or("").is_empty()
        && !view.description.trim().is_empty()
    {
        view.reference = Some(view.description.clone());
    }
    view
}

/// Build the pure pair-scoring callable for a batch. With `fee_aware`
/// set, a gross-over-net gap inside the tolerance scores as an exact
/// amount match; the gap resurfaces later as the draft's fee line.
fn pair_scorer<'a>(
    scorer: MatchScorer,
    patterns: &'a [Pattern],
    config: &'a ReconciliationConfig,
) -> impl Fn(&Transaction, &Transaction) -> ScoreBreakdown + 'a {
    move |source: &Transaction, target: &Transaction| {
        if config.fee_aware
            && source.amount.currency == target.amount.currency
            && source.amount.amount_minor > target.amount.amount_minor
            && source
                .amount
                .difference_pct(&target.amount)
                .is_some_and(|pct| pct <= config.amount_tolerance_pct)
        {
            let mut adjusted = target.clone();
            adjusted.amount.amount_minor = source.amount.amount_minor;
            return scorer.score(source, &adjusted, patterns);
        }
        scorer.score(source, target, patterns)
    }
}

fn find_transaction<'a>(
    transactions: &'a [Transaction],
    id: &TransactionId,
) -> Option<&'a Transaction> {
    transactions.iter().find(|tx| &tx.id == id)
}

fn apply_statuses(
    transactions: &mut [Transaction],
    matches: &[MatchRecord],
    exceptions: &[ReconException],
) {
    for record in matches {
        for tx in transactions.iter_mut() {
            if tx.id == record.source_id {
                tx.status = TransactionStatus::Matched;
                tx.matched_with = record.target_ids.clone();
            } else if record.target_ids.contains(&tx.id) {
                tx.status = TransactionStatus::Matched;
                tx.matched_with = vec![record.source_id.clone()];
            } else if record.internal_id.as_ref() == Some(&tx.id) {
                tx.status = TransactionStatus::Matched;
                tx.matched_with = vec![record.source_id.clone()];
            }
        }
    }
    for exception in exceptions {
        let Some(transaction_id) = &exception.transaction_id else {
            continue;
        };
        for tx in transactions.iter_mut() {
            if &tx.id == transaction_id {
                tx.status = TransactionStatus::Exception;
            }
        }
    }
}
