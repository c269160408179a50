#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use tally_transactions::Money;
use tally_transactions::TransactionSource;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

pub type ExceptionId = String;
pub type ExceptionResult<T> = Result<T, ExceptionError>;

/// Near-match references kept on one exception.
const MAX_NEAR_MATCHES: usize = 5;

#[derive(Debug, Error)]
pub enum ExceptionError {
    #[error("exception {0} not found")]
    NotFound(ExceptionId),
    #[error("exception {0} is already terminal")]
    AlreadyTerminal(ExceptionId),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionType {
    NoMatch,
    AmountVariance,
    DateMismatch,
    Duplicate,
    MissingData,
}

/// Declaration order doubles as list order: critical sorts first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionPriority {
    Critical,
    High,
    Medium,
    Low,
}

/// Absolute-amount bands, in minor units of the organization's
/// configured currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityBands {
    pub critical_minor: i64,
    pub high_minor: i64,
    pub medium_minor: i64,
}

impl Default for PriorityBands {
    fn default() -> Self {
        Self {
            critical_minor: 1_000_000,
            high_minor: 500_000,
            medium_minor: 100_000,
        }
    }
}

impl PriorityBands {
    #[must_use]
    pub fn priority_for(&self, amount_minor: i64) -> ExceptionPriority {
        let amount = amount_minor.abs();
        if amount >= self.critical_minor {
            ExceptionPriority::Critical
        } else if amount >= self.high_minor {
            ExceptionPriority::High
        } else if amount >= self.medium_minor {
            ExceptionPriority::Medium
        } else {
            ExceptionPriority::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionStatus {
    Open,
    Resolved,
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconException {
    pub exception_id: ExceptionId,
    pub organization_id: String,
    pub exception_type: ExceptionType,
    pub priority: ExceptionPriority,
    pub status: ExceptionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_source: Option<TransactionSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Money>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub near_matches: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ReconException {
    pub fn new(
        organization_id: impl Into<String>,
        exception_type: ExceptionType,
        priority: ExceptionPriority,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            exception_id: format!("exc_{}", Uuid::new_v4().simple()),
            organization_id: organization_id.into(),
            exception_type,
            priority,
            status: ExceptionStatus::Open,
            transaction_id: None,
            transaction_source: None,
            amount: None,
            vendor: None,
            reason: reason.into(),
            near_matches: Vec::new(),
            ai_explanation: None,
            suggested_action: None,
            created_at: Utc::now(),
            resolved_by: None,
            resolution_notes: None,
            resolved_at: None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            ExceptionStatus::Resolved | ExceptionStatus::Ignored
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExceptionFilter {
    pub organization_id: Option<String>,
    pub status: Option<ExceptionStatus>,
    pub priority: Option<ExceptionPriority>,
}

impl ExceptionFilter {
    fn matches(&self, exception: &ReconException) -> bool {
        if let Some(organization_id) = &self.organization_id
            && exception.organization_id != *organization_id
        {
            return false;
        }
        if let Some(status) = self.status
            && exception.status != status
        {
            return false;
        }
        if let Some(priority) = self.priority
            && exception.priority != priority
        {
            return false;
        }
        true
    }
}

/// Persistent exception queue. Records are kept forever; resolution
/// and ignore are terminal.
#[async_trait]
pub trait ExceptionQueue: Send + Sync {
    async fn open(&self, exception: ReconException) -> ExceptionResult<ReconException>;
    async fn get(&self, exception_id: &ExceptionId) -> ExceptionResult<ReconException>;
    /// Sorted by priority (critical first), then creation time descending.
    async fn list(&self, filter: ExceptionFilter) -> ExceptionResult<Vec<ReconException>>;
    async fn resolve(
        &self,
        exception_id: &ExceptionId,
        resolver: &str,
        notes: Option<String>,
    ) -> ExceptionResult<ReconException>;
    async fn ignore(
        &self,
        exception_id: &ExceptionId,
        resolver: &str,
    ) -> ExceptionResult<ReconException>;
}

#[derive(Default)]
pub struct InMemoryExceptionQueue {
    exceptions: RwLock<HashMap<ExceptionId, ReconException>>,
}

impl InMemoryExceptionQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn finalize(
        &self,
        exception_id: &ExceptionId,
        status: ExceptionStatus,
        resolver: &str,
        notes: Option<String>,
    ) -> ExceptionResult<ReconException> {
        if resolver.trim().is_empty() {
            return Err(ExceptionError::Validation(
                "resolver must be provided".into(),
            ));
        }
        let mut guard = self.exceptions.write().await;
        let exception = guard
            .get_mut(exception_id)
            .ok_or_else(|| ExceptionError::NotFound(exception_id.clone()))?;
        if exception.is_terminal() {
            return Err(ExceptionError::AlreadyTerminal(exception_id.clone()));
        }
        exception.status = status;
        exception.resolved_by = Some(resolver.to_owned());
        exception.resolution_notes = notes;
        exception.resolved_at = Some(Utc::now());
        Ok(exception.clone())
    }
}

#[async_trait]
impl ExceptionQueue for InMemoryExceptionQueue {
    async fn open(&self, mut exception: ReconException) -> ExceptionResult<ReconException> {
        if exception.organization_id.trim().is_empty() {
            return Err(ExceptionError::Validation(
                "organization id must be provided".into(),
            ));
        }
        exception.near_matches.truncate(MAX_NEAR_MATCHES);
        let mut guard = self.exceptions.write().await;
        guard.insert(exception.exception_id.clone(), exception.clone());
        Ok(exception)
    }

    async fn get(&self, exception_id: &ExceptionId) -> ExceptionResult<ReconException> {
        let guard = self.exceptions.read().await;
        guard
            .get(exception_id)
            .cloned()
            .ok_or_else(|| ExceptionError::NotFound(exception_id.clone()))
    }

    async fn list(&self, filter: ExceptionFilter) -> ExceptionResult<Vec<ReconException>> {
        let guard = self.exceptions.read().await;
        let mut exceptions: Vec<ReconException> = guard
            .values()
            .filter(|exception| filter.matches(exception))
            .cloned()
            .collect();
        exceptions.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.exception_id.cmp(&b.exception_id))
        });
        Ok(exceptions)
    }

    async fn resolve(
        &self,
        exception_id: &ExceptionId,
        resolver: &str,
        notes: Option<String>,
    ) -> ExceptionResult<ReconException> {
        self.finalize(exception_id, ExceptionStatus::Resolved, resolver, notes)
            .await
    }

    async fn ignore(
        &self,
        exception_id: &ExceptionId,
        resolver: &str,
    ) -> ExceptionResult<ReconException> {
        self.finalize(exception_id, ExceptionStatus::Ignored, resolver, None)
            .await
    }
}
