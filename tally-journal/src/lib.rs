#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::NaiveDate;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use tally_transactions::Money;
use thiserror::Error;
use uuid::Uuid;

mod store;

pub use store::DraftStore;
pub use store::InMemoryDraftStore;

pub type DraftEntryId = String;
pub type JournalResult<T> = Result<T, JournalError>;

/// Minimum match score for an automatic draft.
pub const AUTO_JE_THRESHOLD: f32 = 90.0;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("unbalanced journal entry: {0}")]
    Unbalanced(String),
    #[error("invalid draft transition: {0}")]
    InvalidTransition(String),
    #[error("draft {0} not found")]
    NotFound(DraftEntryId),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalSide {
    Debit,
    Credit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalLine {
    pub gl_account: String,
    pub account_name: String,
    pub side: JournalSide,
    pub amount: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    Draft,
    Approved,
    Rejected,
    Posted,
}

/// A balanced set of debit/credit lines awaiting approval and posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftJournalEntry {
    pub entry_id: DraftEntryId,
    pub organization_id: String,
    pub entry_date: NaiveDate,
    pub description: String,
    pub lines: Vec<JournalLine>,
    /// Score of the originating match, on the 0-100 scale.
    pub confidence: f32,
    pub match_ref: String,
    pub status: DraftStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub erp_document_ref: Option<String>,
}

impl DraftJournalEntry {
    /// Sum of debits must equal sum of credits in every currency.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        let mut totals: BTreeMap<&str, i64> = BTreeMap::new();
        for line in &self.lines {
            let entry = totals.entry(line.amount.currency.as_str()).or_default();
            match line.side {
                JournalSide::Debit => *entry += line.amount.amount_minor,
                JournalSide::Credit => *entry -= line.amount.amount_minor,
            }
        }
        totals.values().all(|&delta| delta == 0)
    }

    pub fn validate(&self) -> JournalResult<()> {
        if self.lines.is_empty() {
            return Err(JournalError::Validation(
                "journal entry must have lines".into(),
            ));
        }
        for line in &self.lines {
            line.amount
                .validate()
                .map_err(|err| JournalError::Validation(err.to_string()))?;
        }
        if !self.is_balanced() {
            return Err(JournalError::Unbalanced(format!(
                "entry {} does not balance",
                self.entry_id
            )));
        }
        Ok(())
    }

    pub fn approve(&mut self, actor: impl Into<String>) -> JournalResult<()> {
        if self.status != DraftStatus::Draft {
            return Err(JournalError::InvalidTransition(format!(
                "cannot approve draft in status {:?}",
                self.status
            )));
        }
        self.status = DraftStatus::Approved;
        self.approved_by = Some(actor.into());
        self.approved_at = Some(Utc::now());
        Ok(())
    }

    pub fn reject(&mut self) -> JournalResult<()> {
        if self.status != DraftStatus::Draft {
            return Err(JournalError::InvalidTransition(format!(
                "cannot reject draft in status {:?}",
                self.status
            )));
        }
        self.status = DraftStatus::Rejected;
        Ok(())
    }

    /// Posting requires an external ERP document reference.
    pub fn mark_posted(&mut self, erp_document_ref: impl Into<String>) -> JournalResult<()> {
        if self.status != DraftStatus::Approved {
            return Err(JournalError::InvalidTransition(format!(
                "cannot post draft in status {:?}",
                self.status
            )));
        }
        let reference = erp_document_ref.into();
        if reference.trim().is_empty() {
            return Err(JournalError::Validation(
                "posting requires an ERP document reference".into(),
            ));
        }
        self.status = DraftStatus::Posted;
        self.erp_document_ref = Some(reference);
        self.posted_at = Some(Utc::now());
        Ok(())
    }
}

/// GL account codes used by the payment-reconciliation template,
/// overridable from organization configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlAccountMap {
    pub cash: String,
    pub processing_fees: String,
    pub accounts_receivable: String,
}

impl Default for GlAccountMap {
    fn default() -> Self {
        Self {
            cash: "1010".into(),
            processing_fees: "5250".into(),
            accounts_receivable: "1200".into(),
        }
    }
}

/// Amounts of one confirmed match group, as seen by the generator.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchGroupAmounts {
    pub organization_id: String,
    pub match_ref: String,
    pub entry_date: NaiveDate,
    /// Gateway-side gross amount.
    pub gross: Money,
    /// Bank-side net amount.
    pub net: Money,
    /// Total score of the match, 0-100.
    pub confidence: f32,
    pub split: bool,
}

#[derive(Debug, Clone)]
pub struct DraftGenerator {
    accounts: GlAccountMap,
    auto_je_threshold: f32,
}

impl Default for DraftGenerator {
    fn default() -> Self {
        Self::new(GlAccountMap::default())
    }
}

impl DraftGenerator {
    #[must_use]
    pub fn new(accounts: GlAccountMap) -> Self {
        Self {
            accounts,
            auto_je_threshold: AUTO_JE_THRESHOLD,
        }
    }

    #[must_use]
    pub fn with_threshold(accounts: GlAccountMap, auto_je_threshold: f32) -> Self {
        Self {
            accounts,
            auto_je_threshold,
        }
    }

    /// Build the standard payment-reconciliation entry: debit cash for
    /// the bank net, debit processing fees for any detected fee, credit
    /// accounts receivable for the gross. Returns `None` below the
    /// auto-JE threshold; an entry that cannot balance is a fatal error.
    pub fn generate(
        &self,
        group: &MatchGroupAmounts,
    ) -> JournalResult<Option<DraftJournalEntry>> {
        if group.confidence < self.auto_je_threshold {
            return Ok(None);
        }
        if group.gross.currency != group.net.currency {
            return Err(JournalError::Validation(format!(
                "match group {} mixes currencies {} and {}",
                group.match_ref, group.gross.currency, group.net.currency
            )));
        }

        let fee_minor = group.gross.amount_minor - group.net.amount_minor;
        if fee_minor < 0 {
            return Err(JournalError::Unbalanced(format!(
                "match group {}: bank net exceeds gateway gross",
                group.match_ref
            )));
        }

        let currency = group.gross.currency.clone();
        let mut lines = vec![JournalLine {
            gl_account: self.accounts.cash.clone(),
            account_name: "Cash".into(),
            side: JournalSide::Debit,
            amount: Money {
                amount_minor: group.net.amount_minor,
                currency: currency.clone(),
            },
            description: None,
        }];
        if fee_minor > 0 {
            lines.push(JournalLine {
                gl_account: self.accounts.processing_fees.clone(),
                account_name: "Payment Processing Fees".into(),
                side: JournalSide::Debit,
                amount: Money {
                    amount_minor: fee_minor,
                    currency: currency.clone(),
                },
                description: None,
            });
        }
        lines.push(JournalLine {
            gl_account: self.accounts.accounts_receivable.clone(),
            account_name: "Accounts Receivable".into(),
            side: JournalSide::Credit,
            amount: Money {
                amount_minor: group.gross.amount_minor,
                currency,
            },
            description: None,
        });

        let description = if group.split {
            "Split payment reconciliation - auto-generated".to_string()
        } else if fee_minor > 0 {
            format!("Payment reconciliation with fee of {fee_minor} minor units - auto-generated")
        } else {
            "Payment reconciliation - auto-generated".to_string()
        };

        let entry = DraftJournalEntry {
            entry_id: format!("je_{}", Uuid::new_v4().simple()),
            organization_id: group.organization_id.clone(),
            entry_date: group.entry_date,
            description,
            lines,
            confidence: group.confidence,
            match_ref: group.match_ref.clone(),
            status: DraftStatus::Draft,
            created_at: Utc::now(),
            approved_by: None,
            approved_at: None,
            posted_at: None,
            erp_document_ref: None,
        };
        entry.validate()?;
        Ok(Some(entry))
    }
}
