#![deny(clippy::print_stdout, clippy::print_stderr)]

use chrono::NaiveDate;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

mod statement;

pub use statement::CsvStatementParser;
pub use statement::DedupeMetrics;
pub use statement::DedupeOutcome;
pub use statement::DuplicateMetadata;
pub use statement::StatementLine;
pub use statement::StatementParser;
pub use statement::StatementProfile;
pub use statement::dedupe_lines;

pub type TransactionId = String;
pub type OrganizationId = String;

pub type TransactionResult<T> = Result<T, TransactionError>;

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("missing column {0}")]
    MissingColumn(String),
    #[error("csv error: {0}")]
    Csv(String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// A non-negative amount in minor units plus its ISO-4217 currency code.
/// Direction of the flow is carried separately on the transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount_minor: i64,
    pub currency: String,
}

impl Money {
    pub fn new(amount_minor: i64, currency: impl Into<String>) -> TransactionResult<Self> {
        let money = Self {
            amount_minor,
            currency: currency.into(),
        };
        money.validate()?;
        Ok(money)
    }

    pub fn validate(&self) -> TransactionResult<()> {
        if self.amount_minor < 0 {
            return Err(TransactionError::Validation(format!(
                "amount must be non-negative, got {}",
                self.amount_minor
            )));
        }
        validate_currency_code(&self.currency)?;
        Ok(())
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.amount_minor == 0
    }

    /// Absolute difference in minor units, or `None` across currencies.
    #[must_use]
    pub fn difference_minor(&self, other: &Money) -> Option<i64> {
        if self.currency != other.currency {
            return None;
        }
        Some((self.amount_minor - other.amount_minor).abs())
    }

    /// Difference as a percentage of the larger amount, or `None` across
    /// currencies or when both sides are zero.
    #[must_use]
    pub fn difference_pct(&self, other: &Money) -> Option<f64> {
        let diff = self.difference_minor(other)?;
        let max = self.amount_minor.max(other.amount_minor);
        if max == 0 {
            return None;
        }
        Some(diff as f64 / max as f64 * 100.0)
    }
}

pub fn validate_currency_code(code: &str) -> TransactionResult<()> {
    if code.len() == 3 && code.chars().all(|ch| ch.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(TransactionError::Validation(format!(
            "invalid ISO-4217 currency code {code}"
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionSource {
    Gateway,
    Bank,
    Internal,
    Email,
    Manual,
}

impl TransactionSource {
    pub fn parse(value: &str) -> TransactionResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gateway" => Ok(Self::Gateway),
            "bank" => Ok(Self::Bank),
            "internal" => Ok(Self::Internal),
            "email" => Ok(Self::Email),
            "manual" => Ok(Self::Manual),
            other => Err(TransactionError::Validation(format!(
                "unknown transaction source {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Matched,
    Partial,
    Exception,
    Resolved,
    Ignored,
}

/// A financial event from any source, identified by a stable id unique
/// within (source, organization). Created by ingestion; its status is
/// mutated only by the reconciliation orchestrator, and it is never
/// deleted, only marked ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub organization_id: OrganizationId,
    pub amount: Money,
    pub direction: FlowDirection,
    pub value_date: NaiveDate,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty: Option<String>,
    pub source: TransactionSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    pub status: TransactionStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_with: Vec<TransactionId>,
}

impl Transaction {
    pub fn validate(&self) -> TransactionResult<()> {
        if self.id.trim().is_empty() {
            return Err(TransactionError::Validation(
                "transaction id must be provided".into(),
            ));
        }
        if self.organization_id.trim().is_empty() {
            return Err(TransactionError::Validation(
                "organization id must be provided".into(),
            ));
        }
        self.amount.validate()
    }

    /// Absolute day distance between the two value dates.
    #[must_use]
    pub fn date_distance_days(&self, other: &Transaction) -> i64 {
        (self.value_date - other.value_date).num_days().abs()
    }
}
