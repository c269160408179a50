#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::NaiveDate;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use tally_audit::AuditEntityKind;
use tally_audit::AuditEvent;
use tally_audit::AuditSink;
use tally_transactions::Money;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

pub type ApItemId = String;
pub type ApResult<T> = Result<T, ApError>;

#[derive(Debug, Error)]
pub enum ApError {
    #[error("ap item {0} not found")]
    NotFound(ApItemId),
    #[error("invalid transition: {from:?} -> {to:?}")]
    InvalidTransition { from: ApState, to: ApState },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("audit write failed: {0}")]
    Audit(String),
}

/// Lifecycle states of an AP item. `Merged` is a terminal pseudo-state
/// reachable only through the merge operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApState {
    Received,
    Validated,
    NeedsInfo,
    NeedsApproval,
    Approved,
    ReadyToPost,
    PostedToErp,
    Closed,
    Rejected,
    FailedPost,
    Merged,
}

impl ApState {
    /// The allowed transition table. Anything not listed is rejected.
    #[must_use]
    pub fn allowed_targets(self) -> &'static [ApState] {
        match self {
            Self::Received => &[Self::Validated],
            Self::Validated => &[Self::NeedsInfo, Self::NeedsApproval],
            Self::NeedsInfo => &[Self::Validated],
            Self::NeedsApproval => &[Self::Approved, Self::Rejected],
            Self::Approved => &[Self::ReadyToPost, Self::Rejected],
            Self::ReadyToPost => &[Self::PostedToErp, Self::FailedPost],
            Self::FailedPost => &[Self::ReadyToPost],
            Self::PostedToErp => &[Self::Closed],
            Self::Closed | Self::Rejected | Self::Merged => &[],
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self.allowed_targets().is_empty()
    }

    #[must_use]
    pub fn can_transition_to(self, to: ApState) -> bool {
        self.allowed_targets().contains(&to)
    }
}

/// External evidence record kinds that can attach to an AP item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    EmailThread,
    EmailMessage,
    Procurement,
    BankTransaction,
    CardStatement,
    SpreadsheetCell,
    DmsDocument,
    PortalEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceLink {
    pub source_type: SourceType,
    pub source_ref: String,
    pub detected_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

impl SourceLink {
    pub fn new(source_type: SourceType, source_ref: impl Into<String>) -> Self {
        Self {
            source_type,
            source_ref: source_ref.into(),
            detected_at: Utc::now(),
            subject: None,
            sender: None,
        }
    }

    fn same_identity(&self, other: &SourceLink) -> bool {
        self.source_type == other.source_type && self.source_ref == other.source_ref
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceLinkSelector {
    pub source_type: SourceType,
    pub source_ref: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApLineItem {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price_minor: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_minor: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRecord {
    pub source_item_id: ApItemId,
    pub actor_id: String,
    pub reason: String,
    pub merged_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApItem {
    pub id: ApItemId,
    pub organization_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<Money>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_gl_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gl_confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub line_items: Vec<ApLineItem>,
    pub state: ApState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_into: Option<ApItemId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merge_history: Vec<MergeRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_links: Vec<SourceLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub erp_reference: Option<String>,
    /// Escape hatch for adapter-specific fields; domain data is typed.
    #[serde(default)]
    pub extra_metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApItem {
    pub fn validate(&self) -> ApResult<()> {
        if self.organization_id.trim().is_empty() {
            return Err(ApError::Validation(
                "organization id must be provided".into(),
            ));
        }
        if let Some(total) = &self.total {
            total
                .validate()
                .map_err(|err| ApError::Validation(err.to_string()))?;
        }
        Ok(())
    }

    /// At most one link per (source_type, source_ref); duplicates are
    /// absorbed silently.
    fn absorb_link(&mut self, link: SourceLink) -> bool {
        if self.source_links.iter().any(|known| known.same_identity(&link)) {
            return false;
        }
        self.source_links.push(link);
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    Human,
    System,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub ap_item_id: ApItemId,
    pub to_state: ApState,
    pub actor_type: ActorType,
    pub actor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewApItem {
    pub organization_id: String,
    pub vendor: Option<String>,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub total: Option<Money>,
    pub suggested_gl_code: Option<String>,
    pub gl_confidence: Option<f32>,
    pub line_items: Vec<ApLineItem>,
    pub source_links: Vec<SourceLink>,
    pub extra_metadata: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApItemFilter {
    pub organization_id: Option<String>,
    pub state: Option<ApState>,
    pub vendor: Option<String>,
}

/// The AP lifecycle service. It is the only component allowed to
/// mutate item state; every successful transition writes exactly one
/// audit event inside the same atomic unit as the item write.
#[async_trait]
pub trait ApService: Send + Sync {
    async fn create(&self, new_item: NewApItem) -> ApResult<ApItem>;
    async fn get(&self, ap_item_id: &ApItemId) -> ApResult<ApItem>;
    async fn list(&self, filter: ApItemFilter) -> ApResult<Vec<ApItem>>;
    async fn transition(&self, request: TransitionRequest) -> ApResult<ApItem>;
    async fn add_source_link(&self, ap_item_id: &ApItemId, link: SourceLink) -> ApResult<ApItem>;
    /// Target absorbs the source's links; the source becomes `merged`
    /// with a back-pointer. Chains of merges are rejected.
    async fn merge(
        &self,
        target_id: &ApItemId,
        source_id: &ApItemId,
        actor_id: &str,
        reason: &str,
    ) -> ApResult<ApItem>;
    /// For each selected link, a fresh item in `needs_info` takes it
    /// over, inheriting the parent's vendor/amount/invoice defaults.
    async fn split(
        &self,
        parent_id: &ApItemId,
        selectors: Vec<SourceLinkSelector>,
        actor_id: &str,
        reason: &str,
    ) -> ApResult<Vec<ApItem>>;
}

struct ItemSlot {
    item: ApItem,
    /// idempotency_key -> (from_state, to_state) of the transition it
    /// committed.
    idempotency: HashMap<String, (ApState, ApState)>,
}

pub struct InMemoryApService {
    items: RwLock<HashMap<ApItemId, ItemSlot>>,
    audit: Arc<dyn AuditSink>,
}

impl InMemoryApService {
    #[must_use]
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            audit,
        }
    }

    fn audit_event(item: &ApItem, actor: &str, action: &str, metadata: serde_json::Value) -> AuditEvent {
        AuditEvent {
            organization_id: item.organization_id.clone(),
            entity_kind: AuditEntityKind::ApItem,
            entity_id: item.id.clone(),
            actor: actor.into(),
            action: action.into(),
            metadata,
        }
    }
}

#[async_trait]
impl ApService for InMemoryApService {
    async fn create(&self, new_item: NewApItem) -> ApResult<ApItem> {
        let now = Utc::now();
        let mut item = ApItem {
            id: Uuid::new_v4().to_string(),
            organization_id: new_item.organization_id,
            vendor: new_item.vendor,
            invoice_number: new_item.invoice_number,
            invoice_date: new_item.invoice_date,
            due_date: new_item.due_date,
            total: new_item.total,
            suggested_gl_code: new_item.suggested_gl_code,
            gl_confidence: new_item.gl_confidence,
            line_items: new_item.line_items,
            state: ApState::Received,
            merged_into: None,
            merge_history: Vec::new(),
            source_links: Vec::new(),
            erp_reference: None,
            extra_metadata: new_item.extra_metadata,
            created_at: now,
            updated_at: now,
        };
        for link in new_item.source_links {
            item.absorb_link(link);
        }
        item.validate()?;

        let mut guard = self.items.write().await;
        self.audit
            .append(Self::audit_event(
                &item,
                "ap-service",
                "created",
                serde_json::json!({ "state": item.state }),
            ))
            .await
            .map_err(|err| ApError::Audit(err.to_string()))?;
        guard.insert(
            item.id.clone(),
            ItemSlot {
                item: item.clone(),
                idempotency: HashMap::new(),
            },
        );
        Ok(item)
    }

    async fn get(&self, ap_item_id: &ApItemId) -> ApResult<ApItem> {
        let guard = self.items.read().await;
        guard
            .get(ap_item_id)
            .map(|slot| slot.item.clone())
            .ok_or_else(|| ApError::NotFound(ap_item_id.clone()))
    }

    async fn list(&self, filter: ApItemFilter) -> ApResult<Vec<ApItem>> {
        let guard = self.items.read().await;
        let mut items: Vec<ApItem> = guard
            .values()
            .map(|slot| &slot.item)
            .filter(|item| {
                filter
                    .organization_id
                    .as_ref()
                    .is_none_or(|org| &item.organization_id == org)
            })
            .filter(|item| filter.state.is_none_or(|state| item.state == state))
            .filter(|item| {
                filter
                    .vendor
                    .as_ref()
                    .is_none_or(|vendor| item.vendor.as_ref() == Some(vendor))
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }

    async fn transition(&self, request: TransitionRequest) -> ApResult<ApItem> {
        if request.actor_id.trim().is_empty() {
            return Err(ApError::Validation("actor id must be provided".into()));
        }

        let mut guard = self.items.write().await;
        let slot = guard
            .get_mut(&request.ap_item_id)
            .ok_or_else(|| ApError::NotFound(request.ap_item_id.clone()))?;

        // Idempotent replay: the same key re-requesting the transition
        // it already committed succeeds without new side effects.
        if let Some(key) = &request.idempotency_key {
            if let Some((_, committed_to)) = slot.idempotency.get(key) {
                if *committed_to == request.to_state {
                    return Ok(slot.item.clone());
                }
                return Err(ApError::Conflict(format!(
                    "idempotency key {key} was used for a different transition"
                )));
            }
        }

        let from = slot.item.state;
        if !from.can_transition_to(request.to_state) {
            return Err(ApError::InvalidTransition {
                from,
                to: request.to_state,
            });
        }

        // Apply the item write, then the audit write; roll the item
        // back if the audit append fails so the pair stays atomic.
        let previous = slot.item.clone();
        slot.item.state = request.to_state;
        slot.item.updated_at = Utc::now();
        if request.to_state == ApState::PostedToErp
            && let Some(reference) = request
                .metadata
                .get("erp_reference")
                .and_then(serde_json::Value::as_str)
        {
            slot.item.erp_reference = Some(reference.to_owned());
        }

        let event = Self::audit_event(
            &slot.item,
            &request.actor_id,
            "state_changed",
            serde_json::json!({
                "from_state": from,
                "to_state": request.to_state,
                "actor_type": request.actor_type,
                "reason": request.reason,
                "idempotency_key": request.idempotency_key,
            }),
        );
        if let Err(err) = self.audit.append(event).await {
            slot.item = previous;
            return Err(ApError::Audit(err.to_string()));
        }

        if let Some(key) = request.idempotency_key {
            slot.idempotency.insert(key, (from, request.to_state));
        }
        info!(
            ap_item_id = %slot.item.id,
            from = ?from,
            to = ?request.to_state,
            "ap item transitioned"
        );
        Ok(slot.item.clone())
    }

    async fn add_source_link(&self, ap_item_id: &ApItemId, link: SourceLink) -> ApResult<ApItem> {
        let mut guard = self.items.write().await;
        let slot = guard
            .get_mut(ap_item_id)
            .ok_or_else(|| ApError::NotFound(ap_item_id.clone()))?;
        if slot.item.state == ApState::Closed {
            return Err(ApError::Conflict("closed items are immutable".into()));
        }
        if slot.item.absorb_link(link) {
            slot.item.updated_at = Utc::now();
        }
        Ok(slot.item.clone())
    }

    async fn merge(
        &self,
        target_id: &ApItemId,
        source_id: &ApItemId,
        actor_id: &str,
        reason: &str,
    ) -> ApResult<ApItem> {
        if target_id == source_id {
            return Err(ApError::Validation("cannot merge an item into itself".into()));
        }
        let mut guard = self.items.write().await;
        if !guard.contains_key(target_id) {
            return Err(ApError::NotFound(target_id.clone()));
        }
        let source_state = guard
            .get(source_id)
            .map(|slot| (slot.item.state, slot.item.merged_into.clone()))
            .ok_or_else(|| ApError::NotFound(source_id.clone()))?;
        if source_state.0 == ApState::Merged || source_state.1.is_some() {
            return Err(ApError::Conflict(
                "source item is already merged; chains are not allowed".into(),
            ));
        }
        let target_state = guard
            .get(target_id)
            .map(|slot| slot.item.state)
            .unwrap_or(ApState::Merged);
        if target_state == ApState::Merged || target_state == ApState::Closed {
            return Err(ApError::Conflict(
                "target item cannot absorb merges in its current state".into(),
            ));
        }

        // Move the source's links over, then retire the source. Both
        // item writes and the audit writes form one atomic unit: an
        // audit failure rolls the items back.
        let original_target = guard
            .get(target_id)
            .map(|slot| slot.item.clone())
            .ok_or_else(|| ApError::NotFound(target_id.clone()))?;
        let original_source = guard
            .get(source_id)
            .map(|slot| slot.item.clone())
            .ok_or_else(|| ApError::NotFound(source_id.clone()))?;

        let now = Utc::now();
        {
            let target_slot = guard
                .get_mut(target_id)
                .ok_or_else(|| ApError::NotFound(target_id.clone()))?;
            for link in original_source.source_links.clone() {
                target_slot.item.absorb_link(link);
            }
            target_slot.item.merge_history.push(MergeRecord {
                source_item_id: source_id.clone(),
                actor_id: actor_id.to_owned(),
                reason: reason.to_owned(),
                merged_at: now,
            });
            target_slot.item.updated_at = now;
        }
        let target_snapshot = guard
            .get(target_id)
            .map(|slot| slot.item.clone())
            .ok_or_else(|| ApError::NotFound(target_id.clone()))?;
        {
            let source_slot = guard
                .get_mut(source_id)
                .ok_or_else(|| ApError::NotFound(source_id.clone()))?;
            source_slot.item.state = ApState::Merged;
            source_slot.item.merged_into = Some(target_id.clone());
            source_slot.item.source_links.clear();
            source_slot.item.updated_at = now;
        }

        let events = vec![
            Self::audit_event(
                &target_snapshot,
                actor_id,
                "merge_absorbed",
                serde_json::json!({ "source_item_id": source_id, "reason": reason }),
            ),
            AuditEvent {
                organization_id: target_snapshot.organization_id.clone(),
                entity_kind: AuditEntityKind::ApItem,
                entity_id: source_id.clone(),
                actor: actor_id.into(),
                action: "merged_into".into(),
                metadata: serde_json::json!({ "target_item_id": target_id, "reason": reason }),
            },
        ];
        if let Err(err) = self.audit.append_all(events).await {
            if let Some(slot) = guard.get_mut(target_id) {
                slot.item = original_target;
            }
            if let Some(slot) = guard.get_mut(source_id) {
                slot.item = original_source;
            }
            return Err(ApError::Audit(err.to_string()));
        }

        Ok(target_snapshot)
    }

    async fn split(
        &self,
        parent_id: &ApItemId,
        selectors: Vec<SourceLinkSelector>,
        actor_id: &str,
        reason: &str,
    ) -> ApResult<Vec<ApItem>> {
        if selectors.is_empty() {
            return Err(ApError::Validation(
                "split requires at least one source link selector".into(),
            ));
        }
        let mut guard = self.items.write().await;
        let parent_slot = guard
            .get_mut(parent_id)
            .ok_or_else(|| ApError::NotFound(parent_id.clone()))?;
        if parent_slot.item.state == ApState::Merged || parent_slot.item.state == ApState::Closed {
            return Err(ApError::Conflict(
                "parent item cannot be split in its current state".into(),
            ));
        }

        // Every selector must resolve before anything moves.
        let mut selected = Vec::new();
        for selector in &selectors {
            let position = parent_slot.item.source_links.iter().position(|link| {
                link.source_type == selector.source_type && link.source_ref == selector.source_ref
            });
            match position {
                Some(position) => selected.push(position),
                None => {
                    return Err(ApError::NotFound(format!(
                        "source link {:?}/{} on item {parent_id}",
                        selector.source_type, selector.source_ref
                    )));
                }
            }
        }
        selected.sort_unstable();
        selected.dedup();

        let now = Utc::now();
        let parent = parent_slot.item.clone();
        let mut children = Vec::new();
        // Remove from the back so earlier positions stay valid.
        for &position in selected.iter().rev() {
            let link = parent_slot.item.source_links.remove(position);
            let child = ApItem {
                id: Uuid::new_v4().to_string(),
                organization_id: parent.organization_id.clone(),
                vendor: parent.vendor.clone(),
                invoice_number: parent.invoice_number.clone(),
                invoice_date: parent.invoice_date,
                due_date: parent.due_date,
                total: parent.total.clone(),
                suggested_gl_code: parent.suggested_gl_code.clone(),
                gl_confidence: parent.gl_confidence,
                line_items: Vec::new(),
                state: ApState::NeedsInfo,
                merged_into: None,
                merge_history: Vec::new(),
                source_links: vec![link],
                erp_reference: None,
                extra_metadata: serde_json::Value::Null,
                created_at: now,
                updated_at: now,
            };
            children.push(child);
        }
        children.reverse();
        parent_slot.item.updated_at = now;
        let parent_snapshot = parent_slot.item.clone();

        let mut events = vec![Self::audit_event(
            &parent_snapshot,
            actor_id,
            "split",
            serde_json::json!({
                "children": children.iter().map(|child| child.id.clone()).collect::<Vec<_>>(),
                "reason": reason,
            }),
        )];
        for child in &children {
            events.push(Self::audit_event(
                child,
                actor_id,
                "created_from_split",
                serde_json::json!({ "parent_item_id": parent_id }),
            ));
        }
        if let Err(err) = self.audit.append_all(events).await {
            if let Some(slot) = guard.get_mut(parent_id) {
                slot.item = parent;
            }
            return Err(ApError::Audit(err.to_string()));
        }

        for child in &children {
            guard.insert(
                child.id.clone(),
                ItemSlot {
                    item: child.clone(),
                    idempotency: HashMap::new(),
                },
            );
        }
        Ok(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tally_audit::AuditFilter;
    use tally_audit::InMemoryAuditSink;

    fn service() -> (InMemoryApService, Arc<InMemoryAuditSink>) {
        let audit = InMemoryAuditSink::shared();
        (InMemoryApService::new(audit.clone()), audit)
    }

    fn new_item(vendor: &str) -> NewApItem {
        NewApItem {
            organization_id: "org-1".into(),
            vendor: Some(vendor.into()),
            invoice_number: Some("INV-1001".into()),
            total: Some(Money {
                amount_minor: 125_000,
                currency: "USD".into(),
            }),
            source_links: vec![SourceLink::new(SourceType::EmailThread, "thread-1")],
            ..NewApItem::default()
        }
    }

    fn transition_request(item_id: &str, to_state: ApState, key: &str) -> TransitionRequest {
        TransitionRequest {
            ap_item_id: item_id.into(),
            to_state,
            actor_type: ActorType::Human,
            actor_id: "user-1".into(),
            reason: None,
            idempotency_key: Some(key.into()),
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn transition_table_matches_lifecycle() {
        assert!(ApState::Received.can_transition_to(ApState::Validated));
        assert!(ApState::Validated.can_transition_to(ApState::NeedsInfo));
        assert!(ApState::Validated.can_transition_to(ApState::NeedsApproval));
        assert!(ApState::NeedsInfo.can_transition_to(ApState::Validated));
        assert!(ApState::NeedsApproval.can_transition_to(ApState::Approved));
        assert!(ApState::NeedsApproval.can_transition_to(ApState::Rejected));
        assert!(ApState::Approved.can_transition_to(ApState::ReadyToPost));
        assert!(ApState::ReadyToPost.can_transition_to(ApState::PostedToErp));
        assert!(ApState::ReadyToPost.can_transition_to(ApState::FailedPost));
        assert!(ApState::FailedPost.can_transition_to(ApState::ReadyToPost));
        assert!(ApState::PostedToErp.can_transition_to(ApState::Closed));

        assert!(!ApState::Received.can_transition_to(ApState::Approved));
        assert!(ApState::Closed.is_terminal());
        assert!(ApState::Rejected.is_terminal());
        assert!(ApState::Merged.is_terminal());
    }

    #[tokio::test]
    async fn happy_path_emits_one_audit_event_per_transition() {
        let (service, audit) = service();
        let item = service.create(new_item("Stripe")).await.expect("created");
        assert_eq!(item.state, ApState::Received);

        let steps = [
            ApState::Validated,
            ApState::NeedsApproval,
            ApState::Approved,
            ApState::ReadyToPost,
            ApState::PostedToErp,
            ApState::Closed,
        ];
        for (index, to_state) in steps.iter().enumerate() {
            let updated = service
                .transition(transition_request(&item.id, *to_state, &format!("key-{index}")))
                .await
                .expect("transition accepted");
            assert_eq!(updated.state, *to_state);
        }

        let records = audit
            .records(AuditFilter {
                entity_id: Some(item.id.clone()),
                ..AuditFilter::default()
            })
            .await
            .expect("audit read");
        // One "created" plus one per transition.
        assert_eq!(records.len(), 1 + steps.len());

        // Every recorded transition pair is in the allowed table.
        for record in records.iter().filter(|record| record.action == "state_changed") {
            let from: ApState =
                serde_json::from_value(record.metadata["from_state"].clone()).expect("from state");
            let to: ApState =
                serde_json::from_value(record.metadata["to_state"].clone()).expect("to state");
            assert!(from.can_transition_to(to), "{from:?} -> {to:?}");
        }
    }

    #[tokio::test]
    async fn replay_with_same_key_is_noop() {
        let (service, audit) = service();
        let item = service.create(new_item("Stripe")).await.expect("created");

        let first = service
            .transition(transition_request(&item.id, ApState::Validated, "key-1"))
            .await
            .expect("transition accepted");
        assert_eq!(first.state, ApState::Validated);

        let replay = service
            .transition(transition_request(&item.id, ApState::Validated, "key-1"))
            .await
            .expect("replay accepted");
        assert_eq!(replay.state, ApState::Validated);

        let records = audit
            .records(AuditFilter {
                entity_id: Some(item.id.clone()),
                ..AuditFilter::default()
            })
            .await
            .expect("audit read");
        let transitions = records
            .iter()
            .filter(|record| record.action == "state_changed")
            .count();
        assert_eq!(transitions, 1);
    }

    #[tokio::test]
    async fn reused_key_for_different_transition_conflicts() {
        let (service, _) = service();
        let item = service.create(new_item("Stripe")).await.expect("created");
        service
            .transition(transition_request(&item.id, ApState::Validated, "key-1"))
            .await
            .expect("transition accepted");

        let err = service
            .transition(transition_request(&item.id, ApState::NeedsApproval, "key-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApError::Conflict(_)));
    }

    #[tokio::test]
    async fn invalid_transition_is_typed() {
        let (service, _) = service();
        let item = service.create(new_item("Stripe")).await.expect("created");
        let err = service
            .transition(transition_request(&item.id, ApState::Approved, "key-1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApError::InvalidTransition {
                from: ApState::Received,
                to: ApState::Approved
            }
        ));
    }

    #[tokio::test]
    async fn posted_transition_captures_erp_reference() {
        let (service, _) = service();
        let item = service.create(new_item("Stripe")).await.expect("created");
        for (key, state) in [
            ("k1", ApState::Validated),
            ("k2", ApState::NeedsApproval),
            ("k3", ApState::Approved),
            ("k4", ApState::ReadyToPost),
        ] {
            service
                .transition(transition_request(&item.id, state, key))
                .await
                .expect("transition accepted");
        }
        let mut request = transition_request(&item.id, ApState::PostedToErp, "k5");
        request.metadata = serde_json::json!({ "erp_reference": "SAP-4711" });
        let posted = service.transition(request).await.expect("posted");
        assert_eq!(posted.erp_reference.as_deref(), Some("SAP-4711"));
    }

    #[tokio::test]
    async fn source_links_are_unique_per_identity() {
        let (service, _) = service();
        let item = service.create(new_item("Stripe")).await.expect("created");
        let updated = service
            .add_source_link(&item.id, SourceLink::new(SourceType::EmailThread, "thread-1"))
            .await
            .expect("link accepted");
        assert_eq!(updated.source_links.len(), 1);

        let updated = service
            .add_source_link(&item.id, SourceLink::new(SourceType::Procurement, "po-77"))
            .await
            .expect("link accepted");
        assert_eq!(updated.source_links.len(), 2);
    }

    #[tokio::test]
    async fn merge_moves_links_and_blocks_chains() {
        let (service, audit) = service();
        let target = service.create(new_item("Stripe")).await.expect("created");
        let mut other = new_item("Stripe");
        other.source_links = vec![
            SourceLink::new(SourceType::EmailMessage, "msg-9"),
            SourceLink::new(SourceType::EmailThread, "thread-1"),
        ];
        let source = service.create(other).await.expect("created");

        let merged_target = service
            .merge(&target.id, &source.id, "user-1", "duplicate invoice")
            .await
            .expect("merge succeeds");
        // thread-1 deduplicates, msg-9 moves over.
        assert_eq!(merged_target.source_links.len(), 2);
        assert_eq!(merged_target.merge_history.len(), 1);
        assert_eq!(merged_target.merge_history[0].source_item_id, source.id);

        let retired = service.get(&source.id).await.expect("source exists");
        assert_eq!(retired.state, ApState::Merged);
        assert_eq!(retired.merged_into.as_deref(), Some(target.id.as_str()));
        assert!(retired.source_links.is_empty());

        // No chains: the merged source cannot be merged again.
        let third = service.create(new_item("Stripe")).await.expect("created");
        let err = service
            .merge(&third.id, &source.id, "user-1", "again")
            .await
            .unwrap_err();
        assert!(matches!(err, ApError::Conflict(_)));

        // Merge audit events are contiguous.
        let records = audit
            .records(AuditFilter::default())
            .await
            .expect("audit read");
        let position = records
            .iter()
            .position(|record| record.action == "merge_absorbed")
            .expect("merge event present");
        assert_eq!(records[position + 1].action, "merged_into");
    }

    #[tokio::test]
    async fn split_moves_selected_links_to_new_items() {
        let (service, _) = service();
        let mut fresh = new_item("Stripe");
        fresh.source_links = vec![
            SourceLink::new(SourceType::EmailThread, "thread-1"),
            SourceLink::new(SourceType::Procurement, "po-77"),
            SourceLink::new(SourceType::DmsDocument, "dms-3"),
        ];
        let parent = service.create(fresh).await.expect("created");

        let children = service
            .split(
                &parent.id,
                vec![
                    SourceLinkSelector {
                        source_type: SourceType::Procurement,
                        source_ref: "po-77".into(),
                    },
                    SourceLinkSelector {
                        source_type: SourceType::DmsDocument,
                        source_ref: "dms-3".into(),
                    },
                ],
                "user-1",
                "separate vendors",
            )
            .await
            .expect("split succeeds");
        assert_eq!(children.len(), 2);
        for child in &children {
            assert_eq!(child.state, ApState::NeedsInfo);
            assert_eq!(child.vendor.as_deref(), Some("Stripe"));
            assert_eq!(child.source_links.len(), 1);
        }

        let remaining = service.get(&parent.id).await.expect("parent exists");
        assert_eq!(remaining.source_links.len(), 1);
        assert_eq!(
            remaining.source_links[0].source_type,
            SourceType::EmailThread
        );
    }

    #[tokio::test]
    async fn split_with_unknown_selector_moves_nothing() {
        let (service, _) = service();
        let parent = service.create(new_item("Stripe")).await.expect("created");
        let err = service
            .split(
                &parent.id,
                vec![SourceLinkSelector {
                    source_type: SourceType::PortalEvent,
                    source_ref: "missing".into(),
                }],
                "user-1",
                "oops",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApError::NotFound(_)));

        let unchanged = service.get(&parent.id).await.expect("parent exists");
        assert_eq!(unchanged.source_links.len(), 1);
    }

    #[tokio::test]
    async fn list_filters_by_state_and_vendor() {
        let (service, _) = service();
        let first = service.create(new_item("Stripe")).await.expect("created");
        service.create(new_item("AWS")).await.expect("created");
        service
            .transition(transition_request(&first.id, ApState::Validated, "k1"))
            .await
            .expect("transition accepted");

        let validated = service
            .list(ApItemFilter {
                organization_id: Some("org-1".into()),
                state: Some(ApState::Validated),
                vendor: None,
            })
            .await
            .expect("list succeeds");
        assert_eq!(validated.len(), 1);
        assert_eq!(validated[0].id, first.id);

        let aws = service
            .list(ApItemFilter {
                organization_id: Some("org-1".into()),
                state: None,
                vendor: Some("AWS".into()),
            })
            .await
            .expect("list succeeds");
        assert_eq!(aws.len(), 1);
    }
}
