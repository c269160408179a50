#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::DateTime;
use chrono::Days;
use chrono::NaiveDate;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use tally_transactions::Money;
use thiserror::Error;
use uuid::Uuid;

pub type RuleId = String;
pub type RecurringResult<T> = Result<T, RecurringError>;

#[derive(Debug, Error)]
pub enum RecurringError {
    #[error("recurring rule {0} not found")]
    NotFound(RuleId),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurringFrequency {
    Weekly,
    Biweekly,
    Monthly,
    Quarterly,
    Annual,
}

impl RecurringFrequency {
    #[must_use]
    pub fn period_days(self) -> u64 {
        match self {
            Self::Weekly => 7,
            Self::Biweekly => 14,
            Self::Monthly => 30,
            Self::Quarterly => 90,
            Self::Annual => 365,
        }
    }

    /// Band of mean inter-arrival gaps that reads as this frequency.
    fn band(self) -> (f64, f64) {
        match self {
            Self::Weekly => (5.0, 9.0),
            Self::Biweekly => (12.0, 16.0),
            Self::Monthly => (26.0, 35.0),
            Self::Quarterly => (80.0, 100.0),
            Self::Annual => (350.0, 380.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurringAction {
    AutoApprove,
    SendForApproval,
    FlagForReview,
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringRule {
    pub rule_id: RuleId,
    pub organization_id: String,
    pub vendor: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vendor_aliases: Vec<String>,
    pub expected_frequency: RecurringFrequency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_amount: Option<Money>,
    pub amount_tolerance_pct: f64,
    pub action: RecurringAction,
    pub require_amount_match: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_gl_code: Option<String>,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_invoice_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_expected_date: Option<NaiveDate>,
    pub total_invoices: u64,
    pub total_amount_minor: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecurringRule {
    fn matches_vendor(&self, vendor: &str) -> bool {
        let vendor = vendor.to_lowercase();
        let own = self.vendor.to_lowercase();
        vendor == own
            || vendor.contains(&own)
            || own.contains(&vendor)
            || self
                .vendor_aliases
                .iter()
                .any(|alias| alias.to_lowercase() == vendor)
    }

    fn variance_pct(&self, amount_minor: i64) -> Option<f64> {
        let expected = self.expected_amount.as_ref()?;
        if expected.amount_minor == 0 {
            return None;
        }
        Some(
            (amount_minor - expected.amount_minor).abs() as f64
                / expected.amount_minor as f64
                * 100.0,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRecurringRule {
    pub organization_id: String,
    pub vendor: String,
    pub vendor_aliases: Vec<String>,
    pub expected_frequency: RecurringFrequency,
    pub expected_amount: Option<Money>,
    pub amount_tolerance_pct: f64,
    pub action: RecurringAction,
    pub require_amount_match: bool,
    pub default_gl_code: Option<String>,
    pub notes: Option<String>,
}

impl Default for NewRecurringRule {
    fn default() -> Self {
        Self {
            organization_id: String::new(),
            vendor: String::new(),
            vendor_aliases: Vec::new(),
            expected_frequency: RecurringFrequency::Monthly,
            expected_amount: None,
            amount_tolerance_pct: 5.0,
            action: RecurringAction::AutoApprove,
            require_amount_match: true,
            default_gl_code: None,
            notes: None,
        }
    }
}

/// Partial update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecurringRuleUpdate {
    pub vendor: Option<String>,
    pub vendor_aliases: Option<Vec<String>>,
    pub expected_frequency: Option<RecurringFrequency>,
    pub expected_amount: Option<Option<Money>>,
    pub amount_tolerance_pct: Option<f64>,
    pub action: Option<RecurringAction>,
    pub require_amount_match: Option<bool>,
    pub default_gl_code: Option<Option<String>>,
    pub enabled: Option<bool>,
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecurringInvoice {
    pub invoice_id: String,
    pub vendor: String,
    pub amount: Money,
    pub invoice_date: NaiveDate,
}

/// What the engine decided for one invoice against a matched rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringOutcome {
    pub rule_id: RuleId,
    pub action: RecurringAction,
    pub auto_approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_approval_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flagged_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_variance_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_from_expected: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_gl_code: Option<String>,
}

/// A rule proposal detected from a vendor's invoice history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleProposal {
    pub vendor: String,
    pub expected_frequency: RecurringFrequency,
    pub expected_amount_minor: i64,
    pub confidence: f32,
    pub sample_count: usize,
}

#[derive(Default)]
pub struct RecurringRuleEngine {
    rules: RwLock<HashMap<RuleId, RecurringRule>>,
}

impl RecurringRuleEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_rule(&self, new_rule: NewRecurringRule) -> RecurringResult<RecurringRule> {
        if new_rule.organization_id.trim().is_empty() {
            return Err(RecurringError::Validation(
                "organization id must be provided".into(),
            ));
        }
        if new_rule.vendor.trim().is_empty() {
            return Err(RecurringError::Validation("vendor must be provided".into()));
        }
        if let Some(amount) = &new_rule.expected_amount {
            amount
                .validate()
                .map_err(|err| RecurringError::Validation(err.to_string()))?;
        }
        let now = Utc::now();
        let rule = RecurringRule {
            rule_id: format!("rec_{}", Uuid::new_v4().simple()),
            organization_id: new_rule.organization_id,
            vendor: new_rule.vendor,
            vendor_aliases: new_rule.vendor_aliases,
            expected_frequency: new_rule.expected_frequency,
            expected_amount: new_rule.expected_amount,
            amount_tolerance_pct: new_rule.amount_tolerance_pct,
            action: new_rule.action,
            require_amount_match: new_rule.require_amount_match,
            default_gl_code: new_rule.default_gl_code,
            enabled: true,
            last_invoice_date: None,
            next_expected_date: None,
            total_invoices: 0,
            total_amount_minor: 0,
            notes: new_rule.notes,
            created_at: now,
            updated_at: now,
        };
        let mut guard = self.write()?;
        guard.insert(rule.rule_id.clone(), rule.clone());
        Ok(rule)
    }

    pub fn update_rule(
        &self,
        rule_id: &RuleId,
        update: RecurringRuleUpdate,
    ) -> RecurringResult<RecurringRule> {
        let mut guard = self.write()?;
        let rule = guard
            .get_mut(rule_id)
            .ok_or_else(|| RecurringError::NotFound(rule_id.clone()))?;
        if let Some(vendor) = update.vendor {
            rule.vendor = vendor;
        }
        if let Some(aliases) = update.vendor_aliases {
            rule.vendor_aliases = aliases;
        }
        if let Some(frequency) = update.expected_frequency {
            rule.expected_frequency = frequency;
        }
        if let Some(amount) = update.expected_amount {
            rule.expected_amount = amount;
        }
        if let Some(tolerance) = update.amount_tolerance_pct {
            rule.amount_tolerance_pct = tolerance;
        }
        if let Some(action) = update.action {
            rule.action = action;
        }
        if let Some(require) = update.require_amount_match {
            rule.require_amount_match = require;
        }
        if let Some(gl_code) = update.default_gl_code {
            rule.default_gl_code = gl_code;
        }
        if let Some(enabled) = update.enabled {
            rule.enabled = enabled;
        }
        if let Some(notes) = update.notes {
            rule.notes = notes;
        }
        rule.updated_at = Utc::now();
        Ok(rule.clone())
    }

    pub fn delete_rule(&self, rule_id: &RuleId) -> RecurringResult<()> {
        let mut guard = self.write()?;
        guard
            .remove(rule_id)
            .map(|_| ())
            .ok_or_else(|| RecurringError::NotFound(rule_id.clone()))
    }

    pub fn get_rule(&self, rule_id: &RuleId) -> RecurringResult<RecurringRule> {
        let guard = self.read()?;
        guard
            .get(rule_id)
            .cloned()
            .ok_or_else(|| RecurringError::NotFound(rule_id.clone()))
    }

    pub fn list_rules(
        &self,
        organization_id: &str,
        enabled_only: bool,
    ) -> RecurringResult<Vec<RecurringRule>> {
        let guard = self.read()?;
        let mut rules: Vec<RecurringRule> = guard
            .values()
            .filter(|rule| rule.organization_id == organization_id)
            .filter(|rule| !enabled_only || rule.enabled)
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.vendor.to_lowercase().cmp(&b.vendor.to_lowercase()));
        Ok(rules)
    }

    /// First enabled rule matching the vendor or an alias, optionally
    /// filtered by amount-within-tolerance.
    pub fn find_matching_rule(
        &self,
        organization_id: &str,
        vendor: &str,
        amount_minor: Option<i64>,
    ) -> RecurringResult<Option<RecurringRule>> {
        let rules = self.list_rules(organization_id, true)?;
        Ok(rules
            .into_iter()
            .filter(|rule| rule.matches_vendor(vendor))
            .find(|rule| {
                let Some(amount_minor) = amount_minor else {
                    return true;
                };
                if !rule.require_amount_match {
                    return true;
                }
                match rule.variance_pct(amount_minor) {
                    Some(variance) => variance <= rule.amount_tolerance_pct,
                    None => true,
                }
            }))
    }

    /// Match an incoming invoice against the rules, apply the matched
    /// rule's action, and advance its rolling stats. `None` means no
    /// rule applies and the invoice proceeds through the normal flow.
    pub fn process(
        &self,
        organization_id: &str,
        invoice: &RecurringInvoice,
    ) -> RecurringResult<Option<RecurringOutcome>> {
        let mut guard = self.write()?;
        let mut matched: Vec<&mut RecurringRule> = guard
            .values_mut()
            .filter(|rule| rule.organization_id == organization_id)
            .filter(|rule| rule.enabled && rule.matches_vendor(&invoice.vendor))
            .collect();
        matched.sort_by(|a, b| a.vendor.to_lowercase().cmp(&b.vendor.to_lowercase()));
        let Some(rule) = matched.into_iter().next() else {
            return Ok(None);
        };

        let variance = rule.variance_pct(invoice.amount.amount_minor);
        let days_from_expected = rule
            .next_expected_date
            .map(|expected| (invoice.invoice_date - expected).num_days());

        let mut outcome = RecurringOutcome {
            rule_id: rule.rule_id.clone(),
            action: rule.action,
            auto_approved: false,
            auto_approval_reason: None,
            flagged_reason: None,
            amount_variance_pct: variance,
            days_from_expected,
            default_gl_code: rule.default_gl_code.clone(),
        };

        let out_of_tolerance = rule.require_amount_match
            && variance.is_some_and(|pct| pct > rule.amount_tolerance_pct);
        if out_of_tolerance {
            outcome.flagged_reason = Some(format!(
                "amount variance {:.1}% exceeds tolerance {:.1}%",
                variance.unwrap_or_default(),
                rule.amount_tolerance_pct
            ));
        } else {
            match rule.action {
                RecurringAction::AutoApprove => {
                    outcome.auto_approved = true;
                    outcome.auto_approval_reason =
                        Some(format!("matched recurring rule for {}", rule.vendor));
                }
                RecurringAction::SendForApproval => {}
                RecurringAction::FlagForReview => {
                    outcome.flagged_reason = Some(
                        rule.notes
                            .clone()
                            .unwrap_or_else(|| "rule configured for review".into()),
                    );
                }
                RecurringAction::Ignore => {
                    outcome.flagged_reason = Some("ignored by rule".into());
                }
            }
        }

        rule.last_invoice_date = Some(invoice.invoice_date);
        rule.total_invoices += 1;
        rule.total_amount_minor += invoice.amount.amount_minor;
        rule.next_expected_date = invoice
            .invoice_date
            .checked_add_days(Days::new(rule.expected_frequency.period_days()));
        rule.updated_at = Utc::now();

        Ok(Some(outcome))
    }

    /// Propose a rule from a vendor's invoice history: the mean
    /// inter-arrival gap must land in a known frequency band and the
    /// amounts must stay within 20% of their mean.
    #[must_use]
    pub fn detect_pattern(vendor: &str, history: &[(NaiveDate, i64)]) -> Option<RuleProposal> {
        if history.len() < 3 {
            return None;
        }
        let mut sorted = history.to_vec();
        sorted.sort_by_key(|(date, _)| *date);

        let gaps: Vec<f64> = sorted
            .windows(2)
            .map(|pair| (pair[1].0 - pair[0].0).num_days() as f64)
            .collect();
        let mean_gap = gaps.iter().sum::<f64>() / gaps.len() as f64;
        let frequency = [
            RecurringFrequency::Weekly,
            RecurringFrequency::Biweekly,
            RecurringFrequency::Monthly,
            RecurringFrequency::Quarterly,
            RecurringFrequency::Annual,
        ]
        .into_iter()
        .find(|frequency| {
            let (low, high) = frequency.band();
            (low..=high).contains(&mean_gap)
        })?;

        let mean_amount =
            sorted.iter().map(|(_, amount)| *amount as f64).sum::<f64>() / sorted.len() as f64;
        if mean_amount <= 0.0 {
            return None;
        }
        let max_deviation = sorted
            .iter()
            .map(|(_, amount)| (*amount as f64 - mean_amount).abs() / mean_amount)
            .fold(0.0_f64, f64::max);
        if max_deviation > 0.2 {
            return None;
        }

        Some(RuleProposal {
            vendor: vendor.to_owned(),
            expected_frequency: frequency,
            expected_amount_minor: mean_amount.round() as i64,
            confidence: (history.len() as f32 * 0.15).min(0.9),
            sample_count: history.len(),
        })
    }

    fn read(
        &self,
    ) -> RecurringResult<std::sync::RwLockReadGuard<'_, HashMap<RuleId, RecurringRule>>> {
        self.rules
            .read()
            .map_err(|_| RecurringError::Storage("recurring rule store poisoned".into()))
    }

    fn write(
        &self,
    ) -> RecurringResult<std::sync::RwLockWriteGuard<'_, HashMap<RuleId, RecurringRule>>> {
        self.rules
            .write()
            .map_err(|_| RecurringError::Storage("recurring rule store poisoned".into()))
    }
}
