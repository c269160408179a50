#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use tally_score::Pattern;
use tally_score::PatternStore;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

pub type LearnResult<T> = Result<T, LearnError>;

const GL_RULE_START_CONFIDENCE: f32 = 0.7;
const GL_RULE_REINFORCEMENT: f32 = 0.1;
const GL_RULE_CONFIDENCE_CAP: f32 = 0.99;
const ALIAS_RULE_CONFIDENCE: f32 = 0.9;
const APPROVAL_ADJ_STEP: f32 = 0.1;
const APPROVAL_ADJ_BOUND: f32 = 0.3;
const EXPECTED_AMOUNT_WINDOW: usize = 10;

#[derive(Debug, Error)]
pub enum LearnError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionType {
    GlCode,
    VendorAlias,
    Amount,
    Classification,
    Approval,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrectionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_minor: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

/// A human correction. Immutable once written; everything derived from
/// it lives in the rule table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub correction_id: String,
    pub organization_id: String,
    pub correction_type: CorrectionType,
    pub original_value: String,
    pub corrected_value: String,
    pub context: CorrectionContext,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewCorrection {
    pub organization_id: String,
    pub correction_type: Option<CorrectionType>,
    pub original_value: String,
    pub corrected_value: String,
    pub context: CorrectionContext,
    pub user_id: String,
    pub invoice_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    GlCode,
    VendorAlias,
    Classification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedRule {
    pub rule_id: String,
    pub rule_type: RuleType,
    /// Condition key: vendor for GL rules, raw name for aliases,
    /// sender for classification rules.
    pub condition: String,
    pub value: String,
    pub confidence: f32,
    pub learned_from: usize,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalBias {
    Permissive,
    Strict,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VendorPreferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_bias: Option<ApprovalBias>,
    #[serde(default)]
    pub auto_approve_threshold_adj: f32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expected_amounts_minor: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningOutcome {
    pub rules_created: usize,
    pub rules_updated: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferences_updated: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordOutcome {
    pub correction_id: String,
    pub learned: LearningOutcome,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub value: String,
    pub confidence: f32,
    pub learned_from: usize,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestionKind {
    GlCode,
    VendorAlias,
    ApprovalThreshold,
}

/// Records corrections and derives the rules that bias future
/// scoring, categorization, and approvals.
#[async_trait]
pub trait LearningService: Send + Sync {
    async fn record_correction(&self, correction: NewCorrection) -> LearnResult<RecordOutcome>;
    async fn suggest(
        &self,
        kind: SuggestionKind,
        context: &CorrectionContext,
    ) -> LearnResult<Option<Suggestion>>;
    async fn corrections(&self, organization_id: &str) -> LearnResult<Vec<Correction>>;
    /// Bounded shift applied to the vendor's auto-approval threshold.
    async fn approval_adjustment(&self, vendor: &str) -> LearnResult<f32>;
    /// An explicit user match correction becomes a scoring pattern.
    /// Writes to the pattern store are serialized through this service.
    async fn record_match_correction(
        &self,
        source_text: &str,
        target_text: &str,
        confidence: f32,
    ) -> LearnResult<()>;
}

pub struct InMemoryLearningService {
    corrections: RwLock<Vec<Correction>>,
    rules: RwLock<HashMap<String, LearnedRule>>,
    preferences: RwLock<HashMap<String, VendorPreferences>>,
    patterns: Option<Arc<dyn PatternStore>>,
    /// Patterns whose store write failed; retried on the next write.
    pending_patterns: RwLock<Vec<Pattern>>,
}

impl InMemoryLearningService {
    #[must_use]
    pub fn new() -> Self {
        Self {
            corrections: RwLock::new(Vec::new()),
            rules: RwLock::new(HashMap::new()),
            preferences: RwLock::new(HashMap::new()),
            patterns: None,
            pending_patterns: RwLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_pattern_store(patterns: Arc<dyn PatternStore>) -> Self {
        Self {
            patterns: Some(patterns),
            ..Self::new()
        }
    }

    fn gl_rule_id(vendor: &str) -> String {
        format!("gl_{}", vendor.to_lowercase().replace(' ', "_"))
    }

    fn alias_rule_id(raw: &str) -> String {
        format!("vendor_alias_{}", raw.to_lowercase().replace(' ', "_"))
    }

    fn classification_rule_id(sender: &str) -> String {
        let prefix: String = sender.chars().take(20).collect();
        format!("classify_{prefix}")
    }

    async fn derive(&self, correction: &Correction) -> LearningOutcome {
        let mut outcome = LearningOutcome::default();
        match correction.correction_type {
            CorrectionType::GlCode => {
                let Some(vendor) = correction.context.vendor.clone() else {
                    return outcome;
                };
                let mut rules = self.rules.write().await;
                let rule_id = Self::gl_rule_id(&vendor);
                match rules.get_mut(&rule_id) {
                    Some(rule) => {
                        rule.learned_from += 1;
                        rule.value = correction.corrected_value.clone();
                        rule.confidence =
                            (rule.confidence + GL_RULE_REINFORCEMENT).min(GL_RULE_CONFIDENCE_CAP);
                        outcome.rules_updated = 1;
                    }
                    None => {
                        rules.insert(
                            rule_id.clone(),
                            LearnedRule {
                                rule_id,
                                rule_type: RuleType::GlCode,
                                condition: vendor,
                                value: correction.corrected_value.clone(),
                                confidence: GL_RULE_START_CONFIDENCE,
                                learned_from: 1,
                                created_at: Utc::now(),
                                last_applied: None,
                            },
                        );
                        outcome.rules_created = 1;
                    }
                }
            }
            CorrectionType::VendorAlias => {
                let mut rules = self.rules.write().await;
                let rule_id = Self::alias_rule_id(&correction.original_value);
                rules.insert(
                    rule_id.clone(),
                    LearnedRule {
                        rule_id,
                        rule_type: RuleType::VendorAlias,
                        condition: correction.original_value.to_lowercase(),
                        value: correction.corrected_value.clone(),
                        confidence: ALIAS_RULE_CONFIDENCE,
                        learned_from: 1,
                        created_at: Utc::now(),
                        last_applied: None,
                    },
                );
                outcome.rules_created = 1;
                outcome.preferences_updated.push("vendor_aliases".into());
            }
            CorrectionType::Amount => {
                let Some(vendor) = correction.context.vendor.clone() else {
                    return outcome;
                };
                let Ok(amount_minor) = correction.corrected_value.parse::<i64>() else {
                    return outcome;
                };
                let mut preferences = self.preferences.write().await;
                let entry = preferences.entry(vendor).or_default();
                entry.expected_amounts_minor.push(amount_minor);
                let overflow = entry
                    .expected_amounts_minor
                    .len()
                    .saturating_sub(EXPECTED_AMOUNT_WINDOW);
                if overflow > 0 {
                    entry.expected_amounts_minor.drain(..overflow);
                }
                outcome.preferences_updated.push("amount_expectations".into());
            }
            CorrectionType::Classification => {
                let Some(sender) = correction.context.sender.clone() else {
                    return outcome;
                };
                let mut rules = self.rules.write().await;
                let rule_id = Self::classification_rule_id(&sender);
                rules.insert(
                    rule_id.clone(),
                    LearnedRule {
                        rule_id,
                        rule_type: RuleType::Classification,
                        condition: sender,
                        value: correction.corrected_value.clone(),
                        confidence: 0.8,
                        learned_from: 1,
                        created_at: Utc::now(),
                        last_applied: None,
                    },
                );
                outcome.rules_created = 1;
            }
            CorrectionType::Approval => {
                let Some(vendor) = correction.context.vendor.clone() else {
                    return outcome;
                };
                let step = match (
                    correction.original_value.as_str(),
                    correction.corrected_value.as_str(),
                ) {
                    // Reviewer approved what the engine flagged: relax.
                    ("flag_for_review", "approved") => -APPROVAL_ADJ_STEP,
                    // Reviewer rejected an auto-approval: tighten.
                    ("auto_approved", "rejected") => APPROVAL_ADJ_STEP,
                    _ => return outcome,
                };
                let mut preferences = self.preferences.write().await;
                let entry = preferences.entry(vendor).or_default();
                entry.auto_approve_threshold_adj = (entry.auto_approve_threshold_adj + step)
                    .clamp(-APPROVAL_ADJ_BOUND, APPROVAL_ADJ_BOUND);
                entry.approval_bias = Some(if step < 0.0 {
                    ApprovalBias::Permissive
                } else {
                    ApprovalBias::Strict
                });
                outcome.preferences_updated.push("approval_threshold".into());
            }
        }
        outcome
    }

    async fn flush_pending_patterns(&self) {
        let Some(store) = self.patterns.as_ref() else {
            return;
        };
        let mut pending = self.pending_patterns.write().await;
        let mut still_pending = Vec::new();
        for pattern in pending.drain(..) {
            if let Err(err) = store.upsert(pattern.clone()) {
                warn!(error = %err, "pattern sync failed; will retry on next write");
                still_pending.push(pattern);
            }
        }
        *pending = still_pending;
    }

    fn build_message(correction: &Correction, learned: &LearningOutcome) -> String {
        let mut parts = Vec::new();
        if learned.rules_created > 0 {
            match correction.correction_type {
                CorrectionType::GlCode => parts.push(format!(
                    "will use GL {} for {} from now on",
                    correction.corrected_value,
                    correction.context.vendor.as_deref().unwrap_or("vendor"),
                )),
                CorrectionType::VendorAlias => parts.push(format!(
                    "learned alias '{}' = '{}'",
                    correction.original_value, correction.corrected_value
                )),
                _ => parts.push(format!("created {} new rule(s)", learned.rules_created)),
            }
        }
        if learned.rules_updated > 0 {
            parts.push("updated existing rule (now more confident)".into());
        }
        if !learned.preferences_updated.is_empty() {
            parts.push(format!(
                "updated preferences: {}",
                learned.preferences_updated.join(", ")
            ));
        }
        if parts.is_empty() {
            "correction recorded".into()
        } else {
            parts.join("; ")
        }
    }
}

impl Default for InMemoryLearningService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LearningService for InMemoryLearningService {
    async fn record_correction(&self, correction: NewCorrection) -> LearnResult<RecordOutcome> {
        if correction.organization_id.trim().is_empty() {
            return Err(LearnError::Validation(
                "organization id must be provided".into(),
            ));
        }
        if correction.user_id.trim().is_empty() {
            return Err(LearnError::Validation("user id must be provided".into()));
        }
        let Some(correction_type) = correction.correction_type else {
            return Err(LearnError::Validation(
                "correction type must be provided".into(),
            ));
        };

        let record = Correction {
            correction_id: format!("corr_{}", Uuid::new_v4().simple()),
            organization_id: correction.organization_id,
            correction_type,
            original_value: correction.original_value,
            corrected_value: correction.corrected_value,
            context: correction.context,
            user_id: correction.user_id,
            invoice_id: correction.invoice_id,
            recorded_at: Utc::now(),
        };

        // Append first; derivation and pattern sync come after and may
        // be retried without losing the correction.
        {
            let mut corrections = self.corrections.write().await;
            corrections.push(record.clone());
        }
        let learned = self.derive(&record).await;
        self.flush_pending_patterns().await;

        info!(
            correction_id = %record.correction_id,
            correction_type = ?record.correction_type,
            "correction recorded"
        );
        let message = Self::build_message(&record, &learned);
        Ok(RecordOutcome {
            correction_id: record.correction_id,
            learned,
            message,
        })
    }

    async fn suggest(
        &self,
        kind: SuggestionKind,
        context: &CorrectionContext,
    ) -> LearnResult<Option<Suggestion>> {
        match kind {
            SuggestionKind::GlCode => {
                let Some(vendor) = context.vendor.as_deref() else {
                    return Ok(None);
                };
                let mut rules = self.rules.write().await;
                let Some(rule) = rules.get_mut(&Self::gl_rule_id(vendor)) else {
                    return Ok(None);
                };
                rule.last_applied = Some(Utc::now());
                Ok(Some(Suggestion {
                    value: rule.value.clone(),
                    confidence: rule.confidence,
                    learned_from: rule.learned_from,
                    message: format!(
                        "learned from {} previous correction(s)",
                        rule.learned_from
                    ),
                }))
            }
            SuggestionKind::VendorAlias => {
                let Some(raw) = context.vendor.as_deref() else {
                    return Ok(None);
                };
                let rules = self.rules.read().await;
                Ok(rules.get(&Self::alias_rule_id(raw)).map(|rule| Suggestion {
                    value: rule.value.clone(),
                    confidence: rule.confidence,
                    learned_from: rule.learned_from,
                    message: format!(
                        "learned from {} previous correction(s)",
                        rule.learned_from
                    ),
                }))
            }
            SuggestionKind::ApprovalThreshold => {
                let Some(vendor) = context.vendor.as_deref() else {
                    return Ok(None);
                };
                let preferences = self.preferences.read().await;
                Ok(preferences.get(vendor).and_then(|prefs| {
                    if prefs.auto_approve_threshold_adj == 0.0 {
                        None
                    } else {
                        Some(Suggestion {
                            value: format!("{:+.1}", prefs.auto_approve_threshold_adj),
                            confidence: 1.0,
                            learned_from: 0,
                            message: "adjusted based on previous corrections".into(),
                        })
                    }
                }))
            }
        }
    }

    async fn corrections(&self, organization_id: &str) -> LearnResult<Vec<Correction>> {
        let corrections = self.corrections.read().await;
        Ok(corrections
            .iter()
            .filter(|correction| correction.organization_id == organization_id)
            .cloned()
            .collect())
    }

    async fn approval_adjustment(&self, vendor: &str) -> LearnResult<f32> {
        let preferences = self.preferences.read().await;
        Ok(preferences
            .get(vendor)
            .map(|prefs| prefs.auto_approve_threshold_adj)
            .unwrap_or(0.0))
    }

    async fn record_match_correction(
        &self,
        source_text: &str,
        target_text: &str,
        confidence: f32,
    ) -> LearnResult<()> {
        if source_text.trim().is_empty() || target_text.trim().is_empty() {
            return Err(LearnError::Validation(
                "match correction needs both descriptions".into(),
            ));
        }
        let pattern = Pattern {
            pattern_id: format!("pattern_{}", Uuid::new_v4().simple()),
            source_pattern: source_text.to_owned(),
            target_pattern: target_text.to_owned(),
            confidence: confidence.clamp(0.0, 1.0),
            match_count: 1,
            last_used: Some(Utc::now()),
            last_updated: None,
        };
        {
            let mut pending = self.pending_patterns.write().await;
            pending.push(pattern);
        }
        self.flush_pending_patterns().await;
        Ok(())
    }
}
