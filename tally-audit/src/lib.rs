#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

pub type AuditResult<T> = Result<T, AuditError>;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("corrupted chain: {0}")]
    Corrupted(String),
}

/// What kind of entity an audit event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntityKind {
    Transaction,
    Match,
    DraftEntry,
    Exception,
    ApItem,
    Correction,
    RecurringRule,
    Batch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub organization_id: String,
    pub entity_kind: AuditEntityKind,
    pub entity_id: String,
    pub actor: String,
    pub action: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub organization_id: String,
    pub entity_kind: AuditEntityKind,
    pub entity_id: String,
    pub actor: String,
    pub action: String,
    pub occurred_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
    pub previous_hash: String,
    pub hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub organization_id: Option<String>,
    pub entity_kind: Option<AuditEntityKind>,
    pub entity_id: Option<String>,
    pub limit: Option<usize>,
}

/// Append-only audit sink. Multi-writer safe, no deletes; events for
/// one logical operation are appended contiguously via `append_all`.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: AuditEvent) -> AuditResult<AuditRecord>;

    /// Append a group of events under one lock so they read back
    /// contiguously.
    async fn append_all(&self, events: Vec<AuditEvent>) -> AuditResult<Vec<AuditRecord>>;

    async fn records(&self, filter: AuditFilter) -> AuditResult<Vec<AuditRecord>>;
}

#[derive(Default)]
pub struct InMemoryAuditSink {
    records: RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditSink {
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn compute_hash(
        previous: &str,
        entity_id: &str,
        action: &str,
        occurred_at: DateTime<Utc>,
        metadata: &serde_json::Value,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(previous.as_bytes());
        hasher.update(entity_id.as_bytes());
        hasher.update(action.as_bytes());
        let nanos = occurred_at
            .timestamp_nanos_opt()
            .unwrap_or_else(|| occurred_at.timestamp_micros() * 1_000);
        hasher.update(nanos.to_be_bytes());
        hasher.update(metadata.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn validate_event(event: &AuditEvent) -> AuditResult<()> {
        if event.organization_id.trim().is_empty() {
            return Err(AuditError::Validation(
                "organization_id must be provided".into(),
            ));
        }
        if event.entity_id.trim().is_empty() {
            return Err(AuditError::Validation("entity_id must be provided".into()));
        }
        if event.action.trim().is_empty() {
            return Err(AuditError::Validation("action must be provided".into()));
        }
        if event.actor.trim().is_empty() {
            return Err(AuditError::Validation("actor must be provided".into()));
        }
        Ok(())
    }

    fn push_record(records: &mut Vec<AuditRecord>, event: AuditEvent) -> AuditRecord {
        let previous_hash = records
            .last()
            .map(|record| record.hash.clone())
            .unwrap_or_else(|| "genesis".into());
        let occurred_at = Utc::now();
        let hash = Self::compute_hash(
            &previous_hash,
            &event.entity_id,
            &event.action,
            occurred_at,
            &event.metadata,
        );
        let record = AuditRecord {
            id: Uuid::new_v4().to_string(),
            organization_id: event.organization_id,
            entity_kind: event.entity_kind,
            entity_id: event.entity_id,
            actor: event.actor,
            action: event.action,
            occurred_at,
            metadata: event.metadata,
            previous_hash,
            hash,
        };
        records.push(record.clone());
        record
    }

    fn verify_chain(records: &[AuditRecord]) -> AuditResult<()> {
        let mut previous = String::from("genesis");
        for record in records {
            if record.previous_hash != previous {
                return Err(AuditError::Corrupted(format!(
                    "unexpected previous hash for {}",
                    record.id
                )));
            }
            let expected = Self::compute_hash(
                &record.previous_hash,
                &record.entity_id,
                &record.action,
                record.occurred_at,
                &record.metadata,
            );
            if expected != record.hash {
                return Err(AuditError::Corrupted(format!(
                    "hash mismatch for {}",
                    record.id
                )));
            }
            previous = record.hash.clone();
        }
        Ok(())
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append(&self, event: AuditEvent) -> AuditResult<AuditRecord> {
        Self::validate_event(&event)?;
        let mut guard = self.records.write().await;
        Ok(Self::push_record(&mut guard, event))
    }

    async fn append_all(&self, events: Vec<AuditEvent>) -> AuditResult<Vec<AuditRecord>> {
        for event in &events {
            Self::validate_event(event)?;
        }
        let mut guard = self.records.write().await;
        Ok(events
            .into_iter()
            .map(|event| Self::push_record(&mut guard, event))
            .collect())
    }

    async fn records(&self, filter: AuditFilter) -> AuditResult<Vec<AuditRecord>> {
        let guard = self.records.read().await;
        Self::verify_chain(&guard)?;
        let mut filtered = guard.clone();

        if let Some(organization_id) = filter.organization_id {
            filtered.retain(|record| record.organization_id == organization_id);
        }
        if let Some(entity_kind) = filter.entity_kind {
            filtered.retain(|record| record.entity_kind == entity_kind);
        }
        if let Some(entity_id) = filter.entity_id {
            filtered.retain(|record| record.entity_id == entity_id);
        }
        if let Some(limit) = filter.limit
            && filtered.len() > limit
        {
            filtered.truncate(limit);
        }

        Ok(filtered)
    }
}
