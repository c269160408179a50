use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use tally_exceptions::ExceptionPriority;
use tally_extract::ChartAccount;
use tally_extract::default_chart;
use tally_journal::DraftJournalEntry;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Chart-of-accounts source: an ordered list of accounts per
/// organization.
#[async_trait]
pub trait ChartOfAccountsProvider: Send + Sync {
    async fn accounts(&self, organization_id: &str) -> anyhow::Result<Vec<ChartAccount>>;
}

/// Serves one fixed chart to every organization, with optional
/// per-organization overrides.
#[derive(Default)]
pub struct StaticChartProvider {
    overrides: RwLock<HashMap<String, Vec<ChartAccount>>>,
}

impl StaticChartProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_accounts(&self, organization_id: &str, accounts: Vec<ChartAccount>) {
        let mut guard = self.overrides.write().await;
        guard.insert(organization_id.to_owned(), accounts);
    }
}

#[async_trait]
impl ChartOfAccountsProvider for StaticChartProvider {
    async fn accounts(&self, organization_id: &str) -> anyhow::Result<Vec<ChartAccount>> {
        let guard = self.overrides.read().await;
        Ok(guard
            .get(organization_id)
            .cloned()
            .unwrap_or_else(default_chart))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErpVendor {
    pub vendor_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErpGlAccount {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErpOpenInvoice {
    pub invoice_number: String,
    pub vendor_id: String,
    pub amount_minor: i64,
    pub currency: String,
}

/// A document handed to the ERP for validation or parking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErpDocument {
    pub kind: String,
    pub reference: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParkResult {
    /// True when `dry_run` suppressed the actual write.
    pub simulated: bool,
    pub document_ref: String,
}

/// Outbound ERP seam. `dry_run` governs whether parking is simulated.
#[async_trait]
pub trait ErpAdapter: Send + Sync {
    async fn list_vendors(&self, organization_id: &str) -> anyhow::Result<Vec<ErpVendor>>;
    async fn list_gl_accounts(&self, organization_id: &str) -> anyhow::Result<Vec<ErpGlAccount>>;
    async fn list_open_invoices(
        &self,
        organization_id: &str,
    ) -> anyhow::Result<Vec<ErpOpenInvoice>>;
    async fn validate_document(&self, document: &ErpDocument) -> anyhow::Result<ValidationReport>;
    async fn park_invoice(
        &self,
        organization_id: &str,
        document: ErpDocument,
        dry_run: bool,
    ) -> anyhow::Result<ParkResult>;
    async fn park_journal_entry(
        &self,
        organization_id: &str,
        draft: &DraftJournalEntry,
        dry_run: bool,
    ) -> anyhow::Result<ParkResult>;
}

#[derive(Default)]
pub struct InMemoryErpAdapter {
    vendors: RwLock<Vec<ErpVendor>>,
    gl_accounts: RwLock<Vec<ErpGlAccount>>,
    open_invoices: RwLock<Vec<ErpOpenInvoice>>,
    parked: RwLock<Vec<ErpDocument>>,
}

impl InMemoryErpAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_vendor(&self, vendor: ErpVendor) {
        self.vendors.write().await.push(vendor);
    }

    pub async fn parked_documents(&self) -> Vec<ErpDocument> {
        self.parked.read().await.clone()
    }
}

#[async_trait]
impl ErpAdapter for InMemoryErpAdapter {
    async fn list_vendors(&self, _organization_id: &str) -> anyhow::Result<Vec<ErpVendor>> {
        Ok(self.vendors.read().await.clone())
    }

    async fn list_gl_accounts(&self, _organization_id: &str) -> anyhow::Result<Vec<ErpGlAccount>> {
        Ok(self.gl_accounts.read().await.clone())
    }

    async fn list_open_invoices(
        &self,
        _organization_id: &str,
    ) -> anyhow::Result<Vec<ErpOpenInvoice>> {
        Ok(self.open_invoices.read().await.clone())
    }

    async fn validate_document(&self, document: &ErpDocument) -> anyhow::Result<ValidationReport> {
        let valid = !document.reference.trim().is_empty();
        Ok(ValidationReport {
            valid,
            messages: if valid {
                Vec::new()
            } else {
                vec!["document reference is empty".into()]
            },
        })
    }

    async fn park_invoice(
        &self,
        _organization_id: &str,
        document: ErpDocument,
        dry_run: bool,
    ) -> anyhow::Result<ParkResult> {
        let document_ref = format!("ERP-{}", Uuid::new_v4().simple());
        if !dry_run {
            self.parked.write().await.push(document);
        }
        Ok(ParkResult {
            simulated: dry_run,
            document_ref,
        })
    }

    async fn park_journal_entry(
        &self,
        organization_id: &str,
        draft: &DraftJournalEntry,
        dry_run: bool,
    ) -> anyhow::Result<ParkResult> {
        let document = ErpDocument {
            kind: "journal_entry".into(),
            reference: draft.entry_id.clone(),
            payload: serde_json::to_value(draft)?,
        };
        self.park_invoice(organization_id, document, dry_run).await
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorAlert {
    pub organization_id: String,
    pub priority: ExceptionPriority,
    pub subject: String,
    pub body: String,
}

/// Optional operator notification seam (chat/email).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, alert: OperatorAlert);
}

#[derive(Clone, Default)]
pub struct NoopNotificationSink;

#[async_trait]
impl NotificationSink for NoopNotificationSink {
    async fn notify(&self, _alert: OperatorAlert) {}
}

#[derive(Default)]
pub struct InMemoryNotificationSink {
    alerts: RwLock<Vec<OperatorAlert>>,
}

impl InMemoryNotificationSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn alerts(&self) -> Vec<OperatorAlert> {
        self.alerts.read().await.clone()
    }
}

#[async_trait]
impl NotificationSink for InMemoryNotificationSink {
    async fn notify(&self, alert: OperatorAlert) {
        self.alerts.write().await.push(alert);
    }
}
