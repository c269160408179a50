use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::DraftEntryId;
use crate::DraftJournalEntry;
use crate::DraftStatus;
use crate::JournalError;
use crate::JournalResult;

/// Persistence seam for draft entries. Drafts are update-in-place;
/// every write re-validates the balance invariant.
#[async_trait]
pub trait DraftStore: Send + Sync {
    async fn save(&self, entry: DraftJournalEntry) -> JournalResult<DraftJournalEntry>;
    async fn get(&self, entry_id: &DraftEntryId) -> JournalResult<DraftJournalEntry>;
    async fn list(
        &self,
        organization_id: &str,
        status: Option<DraftStatus>,
    ) -> JournalResult<Vec<DraftJournalEntry>>;
}

#[derive(Default)]
pub struct InMemoryDraftStore {
    entries: RwLock<HashMap<DraftEntryId, DraftJournalEntry>>,
}

impl InMemoryDraftStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DraftStore for InMemoryDraftStore {
    async fn save(&self, entry: DraftJournalEntry) -> JournalResult<DraftJournalEntry> {
        entry.validate()?;
        let mut guard = self.entries.write().await;
        guard.insert(entry.entry_id.clone(), entry.clone());
        Ok(entry)
    }

    async fn get(&self, entry_id: &DraftEntryId) -> JournalResult<DraftJournalEntry> {
        let guard = self.entries.read().await;
        guard
            .get(entry_id)
            .cloned()
            .ok_or_else(|| JournalError::NotFound(entry_id.clone()))
    }

    async fn list(
        &self,
        organization_id: &str,
        status: Option<DraftStatus>,
    ) -> JournalResult<Vec<DraftJournalEntry>> {
        let guard = self.entries.read().await;
        let mut entries: Vec<DraftJournalEntry> = guard
            .values()
            .filter(|entry| entry.organization_id == organization_id)
            .filter(|entry| status.is_none_or(|wanted| entry.status == wanted))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.entry_id.cmp(&b.entry_id));
        Ok(entries)
    }
}
