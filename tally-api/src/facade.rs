use std::sync::Arc;

use chrono::Utc;
use tally_ap::ActorType;
use tally_ap::ApError;
use tally_ap::ApItem;
use tally_ap::ApItemId;
use tally_ap::ApLineItem;
use tally_ap::ApService;
use tally_ap::ApState;
use tally_ap::InMemoryApService;
use tally_ap::NewApItem;
use tally_ap::TransitionRequest;
use tally_audit::AuditSink;
use tally_audit::InMemoryAuditSink;
use tally_exceptions::ExceptionError;
use tally_exceptions::ExceptionFilter;
use tally_exceptions::ExceptionPriority;
use tally_exceptions::ExceptionQueue;
use tally_exceptions::InMemoryExceptionQueue;
use tally_exceptions::ReconException;
use tally_extract::ExtractError;
use tally_extract::ExtractRequest;
use tally_extract::ExtractorConfig;
use tally_extract::Invoice;
use tally_extract::InvoiceExtractor;
use tally_extract::InvoiceModelProvider;
use tally_extract::InvoiceStatus;
use tally_extract::LearnedGlSuggestion;
use tally_extract::categorize;
use tally_journal::DraftJournalEntry;
use tally_journal::DraftStatus;
use tally_journal::DraftStore;
use tally_journal::InMemoryDraftStore;
use tally_journal::JournalError;
use tally_learn::CorrectionContext;
use tally_learn::InMemoryLearningService;
use tally_learn::LearnError;
use tally_learn::LearningService;
use tally_learn::NewCorrection;
use tally_learn::SuggestionKind;
use tally_recon::ReconError;
use tally_recon::ReconcileBatch;
use tally_recon::ReconciliationOrchestrator;
use tally_recon::ReconciliationResult;
use tally_recurring::NewRecurringRule;
use tally_recurring::RecurringError;
use tally_recurring::RecurringInvoice;
use tally_recurring::RecurringRule;
use tally_recurring::RecurringRuleEngine;
use tally_recurring::RecurringRuleUpdate;
use tally_recurring::RuleId;
use tally_score::InMemoryPatternStore;
use tally_transactions::TransactionSource;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::contracts::CorrectionLearned;
use crate::contracts::CorrectionResponse;
use crate::contracts::ProcessedInvoice;
use crate::contracts::ReconcileRequest;
use crate::contracts::RecordCorrectionRequest;
use crate::providers::ChartOfAccountsProvider;
use crate::providers::ErpAdapter;
use crate::providers::InMemoryErpAdapter;
use crate::providers::NoopNotificationSink;
use crate::providers::NotificationSink;
use crate::providers::OperatorAlert;
use crate::providers::ParkResult;
use crate::providers::StaticChartProvider;
use crate::telemetry::TallyTelemetry;

pub type FacadeResult<T> = Result<T, FacadeError>;

#[derive(Debug, Error)]
pub enum FacadeError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Recon(#[from] ReconError),
    #[error(transparent)]
    Ap(#[from] ApError),
    #[error(transparent)]
    Learn(#[from] LearnError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Recurring(#[from] RecurringError),
    #[error(transparent)]
    Journal(#[from] JournalError),
    #[error(transparent)]
    Exceptions(#[from] ExceptionError),
    #[error("external collaborator failed: {0}")]
    External(#[from] anyhow::Error),
}

/// Root wiring of the engine: every service behind one facade, with
/// telemetry and operator notifications at the edges.
pub struct TallyFacade {
    orchestrator: ReconciliationOrchestrator,
    extractor: InvoiceExtractor,
    ap: Arc<dyn ApService>,
    learning: Arc<dyn LearningService>,
    recurring: Arc<RecurringRuleEngine>,
    exceptions: Arc<dyn ExceptionQueue>,
    drafts: Arc<dyn DraftStore>,
    chart: Arc<dyn ChartOfAccountsProvider>,
    erp: Arc<dyn ErpAdapter>,
    notifications: Arc<dyn NotificationSink>,
    telemetry: TallyTelemetry,
}

impl TallyFacade {
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        orchestrator: ReconciliationOrchestrator,
        extractor: InvoiceExtractor,
        ap: Arc<dyn ApService>,
        learning: Arc<dyn LearningService>,
        recurring: Arc<RecurringRuleEngine>,
        exceptions: Arc<dyn ExceptionQueue>,
        drafts: Arc<dyn DraftStore>,
        chart: Arc<dyn ChartOfAccountsProvider>,
        erp: Arc<dyn ErpAdapter>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            orchestrator,
            extractor,
            ap,
            learning,
            recurring,
            exceptions,
            drafts,
            chart,
            erp,
            notifications,
            telemetry: TallyTelemetry::new(),
        }
    }

    /// Fully in-memory wiring, used by tests and demos.
    #[must_use]
    pub fn in_memory(provider: Option<Arc<dyn InvoiceModelProvider>>) -> Self {
        let patterns = Arc::new(InMemoryPatternStore::new());
        let exceptions = Arc::new(InMemoryExceptionQueue::new());
        let drafts = Arc::new(InMemoryDraftStore::new());
        let audit: Arc<InMemoryAuditSink> = InMemoryAuditSink::shared();
        let orchestrator = ReconciliationOrchestrator::new(
            patterns.clone(),
            exceptions.clone(),
            drafts.clone(),
            audit.clone() as Arc<dyn AuditSink>,
        );
        let learning = Arc::new(InMemoryLearningService::with_pattern_store(patterns));
        Self::new(
            orchestrator,
            InvoiceExtractor::new(provider, ExtractorConfig::default()),
            Arc::new(InMemoryApService::new(audit)),
            learning,
            Arc::new(RecurringRuleEngine::new()),
            exceptions,
            drafts,
            Arc::new(StaticChartProvider::new()),
            Arc::new(InMemoryErpAdapter::new()),
            Arc::new(NoopNotificationSink),
        )
    }

    #[must_use]
    pub fn with_notifications(mut self, notifications: Arc<dyn NotificationSink>) -> Self {
        self.notifications = notifications;
        self
    }

    #[must_use]
    pub fn telemetry(&self) -> &TallyTelemetry {
        &self.telemetry
    }

    /// Run a reconciliation batch from wire-shaped inputs.
    pub async fn reconcile(&self, request: ReconcileRequest) -> FacadeResult<ReconciliationResult> {
        let ReconcileRequest {
            organization_id,
            gateway_txns,
            bank_txns,
            internal_txns,
            config,
        } = request;

        let convert = |inputs: Vec<crate::contracts::TransactionInput>,
                       source: TransactionSource|
         -> FacadeResult<Vec<tally_transactions::Transaction>> {
            inputs
                .into_iter()
                .map(|input| {
                    input
                        .into_transaction(&organization_id, source)
                        .map_err(|err| FacadeError::Validation(err.to_string()))
                })
                .collect()
        };

        let batch = ReconcileBatch {
            gateway: convert(gateway_txns, TransactionSource::Gateway)?,
            bank: convert(bank_txns, TransactionSource::Bank)?,
            internal: internal_txns
                .map(|inputs| convert(inputs, TransactionSource::Internal))
                .transpose()?,
            organization_id,
            config: config.unwrap_or_default(),
        };

        let result = self.orchestrator.reconcile(batch).await?;
        self.telemetry.record_batch(
            result.matches.len(),
            result.draft_journal_entries.len(),
            result.exceptions.len(),
        );

        for exception in &result.exceptions {
            if exception.priority == ExceptionPriority::Critical {
                self.notifications
                    .notify(OperatorAlert {
                        organization_id: result.organization_id.clone(),
                        priority: exception.priority,
                        subject: format!("critical reconciliation exception {}", exception.exception_id),
                        body: exception.reason.clone(),
                    })
                    .await;
            }
        }
        Ok(result)
    }

    /// Extract an inbound invoice, categorize it with learned rules,
    /// consult the recurring rules, and open an AP item for it.
    pub async fn process_invoice(
        &self,
        organization_id: &str,
        request: &ExtractRequest,
    ) -> FacadeResult<ProcessedInvoice> {
        let extraction = self.extractor.extract(request).await?;
        self.telemetry.record_extraction(extraction.degraded);

        let accounts = self.chart.accounts(organization_id).await?;
        let learned = match extraction.vendor.as_deref() {
            Some(vendor) => self
                .learning
                .suggest(
                    SuggestionKind::GlCode,
                    &CorrectionContext {
                        vendor: Some(vendor.to_owned()),
                        ..CorrectionContext::default()
                    },
                )
                .await?
                .map(|suggestion| LearnedGlSuggestion {
                    gl_code: suggestion.value,
                    gl_name: None,
                    confidence: suggestion.confidence,
                    learned_from: suggestion.learned_from,
                }),
            None => None,
        };
        let categorization = categorize(&extraction, &accounts, learned);

        let recurring = match (extraction.vendor.as_deref(), extraction.total.as_ref()) {
            (Some(vendor), Some(total)) => self.recurring.process(
                organization_id,
                &RecurringInvoice {
                    invoice_id: extraction
                        .invoice_number
                        .clone()
                        .unwrap_or_else(|| Uuid::new_v4().to_string()),
                    vendor: vendor.to_owned(),
                    amount: total.clone(),
                    invoice_date: extraction
                        .invoice_date
                        .unwrap_or_else(|| Utc::now().date_naive()),
                },
            )?,
            _ => None,
        };

        let invoice = Invoice {
            invoice_id: Uuid::new_v4().to_string(),
            extraction: extraction.clone(),
            categorization: Some(categorization.clone()),
            status: if extraction.degraded {
                InvoiceStatus::NeedsReview
            } else {
                InvoiceStatus::Extracted
            },
        };

        let ap_item = self
            .ap
            .create(NewApItem {
                organization_id: organization_id.to_owned(),
                vendor: extraction.vendor.clone(),
                invoice_number: extraction.invoice_number.clone(),
                invoice_date: extraction.invoice_date,
                due_date: extraction.due_date,
                total: extraction.total.clone(),
                suggested_gl_code: Some(categorization.gl_code.clone()),
                gl_confidence: Some(categorization.confidence),
                line_items: extraction
                    .line_items
                    .iter()
                    .map(|line| ApLineItem {
                        description: line.description.clone(),
                        quantity: line.quantity,
                        unit_price_minor: None,
                        amount_minor: line.amount_minor,
                    })
                    .collect(),
                source_links: Vec::new(),
                extra_metadata: serde_json::json!({
                    "invoice_id": invoice.invoice_id,
                    "recurring": &recurring,
                    "extraction_degraded": extraction.degraded,
                }),
            })
            .await?;

        // A recurring auto-approval drives the item straight through
        // the approval states.
        let ap_item = if recurring.as_ref().is_some_and(|outcome| outcome.auto_approved) {
            let mut current = ap_item;
            for to_state in [ApState::Validated, ApState::NeedsApproval, ApState::Approved] {
                current = self
                    .ap
                    .transition(TransitionRequest {
                        ap_item_id: current.id.clone(),
                        to_state,
                        actor_type: ActorType::System,
                        actor_id: "recurring-rules".into(),
                        reason: Some("matched recurring rule".into()),
                        idempotency_key: Some(format!(
                            "recurring-{}-{to_state:?}",
                            invoice.invoice_id
                        )),
                        metadata: serde_json::Value::Null,
                    })
                    .await?;
                self.telemetry.record_transition();
            }
            current
        } else {
            ap_item
        };

        info!(
            organization_id,
            invoice_id = %invoice.invoice_id,
            ap_item_id = %ap_item.id,
            "invoice processed"
        );
        Ok(ProcessedInvoice {
            invoice,
            ap_item,
            recurring,
        })
    }

    pub async fn transition(&self, request: TransitionRequest) -> FacadeResult<ApItem> {
        let item = self.ap.transition(request).await?;
        self.telemetry.record_transition();
        Ok(item)
    }

    pub async fn get_ap_item(&self, ap_item_id: &ApItemId) -> FacadeResult<ApItem> {
        Ok(self.ap.get(ap_item_id).await?)
    }

    pub async fn record_correction(
        &self,
        organization_id: &str,
        request: RecordCorrectionRequest,
    ) -> FacadeResult<CorrectionResponse> {
        let outcome = self
            .learning
            .record_correction(NewCorrection {
                organization_id: organization_id.to_owned(),
                correction_type: Some(request.correction_type),
                original_value: request.original_value,
                corrected_value: request.corrected_value,
                context: CorrectionContext {
                    vendor: request.context.vendor,
                    amount_minor: request.context.amount_minor,
                    sender: request.context.sender,
                },
                user_id: request.user_id,
                invoice_id: request.invoice_id,
            })
            .await?;
        self.telemetry.record_correction();
        Ok(CorrectionResponse {
            correction_id: outcome.correction_id,
            learned: CorrectionLearned {
                rules_created: outcome.learned.rules_created,
                rules_updated: outcome.learned.rules_updated,
                preferences_updated: outcome.learned.preferences_updated,
            },
            message: outcome.message,
        })
    }

    /// An explicit user match correction feeds the pattern store.
    pub async fn record_match_correction(
        &self,
        source_text: &str,
        target_text: &str,
        confidence: f32,
    ) -> FacadeResult<()> {
        Ok(self
            .learning
            .record_match_correction(source_text, target_text, confidence)
            .await?)
    }

    pub fn create_recurring_rule(&self, rule: NewRecurringRule) -> FacadeResult<RecurringRule> {
        Ok(self.recurring.create_rule(rule)?)
    }

    pub fn update_recurring_rule(
        &self,
        rule_id: &RuleId,
        update: RecurringRuleUpdate,
    ) -> FacadeResult<RecurringRule> {
        Ok(self.recurring.update_rule(rule_id, update)?)
    }

    pub fn delete_recurring_rule(&self, rule_id: &RuleId) -> FacadeResult<()> {
        Ok(self.recurring.delete_rule(rule_id)?)
    }

    pub fn list_recurring_rules(
        &self,
        organization_id: &str,
        enabled_only: bool,
    ) -> FacadeResult<Vec<RecurringRule>> {
        Ok(self.recurring.list_rules(organization_id, enabled_only)?)
    }

    pub async fn list_exceptions(
        &self,
        filter: ExceptionFilter,
    ) -> FacadeResult<Vec<ReconException>> {
        Ok(self.exceptions.list(filter).await?)
    }

    pub async fn resolve_exception(
        &self,
        exception_id: &str,
        resolver: &str,
        notes: Option<String>,
    ) -> FacadeResult<ReconException> {
        Ok(self
            .exceptions
            .resolve(&exception_id.to_owned(), resolver, notes)
            .await?)
    }

    pub async fn list_drafts(
        &self,
        organization_id: &str,
        status: Option<DraftStatus>,
    ) -> FacadeResult<Vec<DraftJournalEntry>> {
        Ok(self.drafts.list(organization_id, status).await?)
    }

    pub async fn approve_draft(
        &self,
        entry_id: &str,
        actor: &str,
    ) -> FacadeResult<DraftJournalEntry> {
        let mut draft = self.drafts.get(&entry_id.to_owned()).await?;
        draft.approve(actor)?;
        Ok(self.drafts.save(draft).await?)
    }

    pub async fn reject_draft(&self, entry_id: &str) -> FacadeResult<DraftJournalEntry> {
        let mut draft = self.drafts.get(&entry_id.to_owned()).await?;
        draft.reject()?;
        Ok(self.drafts.save(draft).await?)
    }

    /// Park an approved draft in the ERP. With `dry_run` the parking is
    /// simulated and the draft stays approved.
    pub async fn post_draft(
        &self,
        organization_id: &str,
        entry_id: &str,
        dry_run: bool,
    ) -> FacadeResult<(DraftJournalEntry, ParkResult)> {
        let mut draft = self.drafts.get(&entry_id.to_owned()).await?;
        let parked = self
            .erp
            .park_journal_entry(organization_id, &draft, dry_run)
            .await?;
        if !dry_run {
            draft.mark_posted(parked.document_ref.clone())?;
            draft = self.drafts.save(draft).await?;
        }
        Ok((draft, parked))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use tally_learn::CorrectionType;

    use crate::contracts::TransactionInput;
    use crate::providers::InMemoryNotificationSink;

    fn txn_input(id: &str, amount_minor: i64, date: (i32, u32, u32)) -> TransactionInput {
        TransactionInput {
            transaction_id: id.into(),
            amount_minor,
            currency: "USD".into(),
            value_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).expect("valid date"),
            description: String::new(),
            reference: None,
            counterparty: None,
        }
    }

    fn stripe_invoice_email() -> ExtractRequest {
        ExtractRequest {
            email_subject: Some("Invoice INV-900 from Stripe".into()),
            email_body: Some(
                "Invoice date: 2026-07-01\nDue: 2026-08-01\nTotal: USD 450.00".into(),
            ),
            email_sender: Some("Stripe <billing@stripe.com>".into()),
            attachments: Vec::new(),
        }
    }

    #[tokio::test]
    async fn reconcile_counts_telemetry_and_notifies_critical() {
        let notifications = Arc::new(InMemoryNotificationSink::new());
        let facade = TallyFacade::in_memory(None).with_notifications(notifications.clone());

        let mut gateway = txn_input("g-1", 2_500_000, (2026, 3, 1));
        gateway.description = "Large payment".into();
        let result = facade
            .reconcile(ReconcileRequest {
                organization_id: "org-1".into(),
                gateway_txns: vec![gateway],
                bank_txns: Vec::new(),
                internal_txns: None,
                config: None,
            })
            .await
            .expect("batch succeeds");
        assert!(result.matches.is_empty());
        assert_eq!(result.exceptions.len(), 1);

        let snapshot = facade.telemetry().snapshot();
        assert_eq!(snapshot.batches_run, 1);
        assert_eq!(snapshot.exceptions_opened, 1);

        let alerts = notifications.alerts().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].priority, ExceptionPriority::Critical);
    }

    #[tokio::test]
    async fn correction_then_categorization_uses_learned_rule() {
        let facade = TallyFacade::in_memory(None);

        let response = facade
            .record_correction(
                "org-1",
                RecordCorrectionRequest {
                    correction_type: CorrectionType::GlCode,
                    original_value: "6100".into(),
                    corrected_value: "6150".into(),
                    context: crate::contracts::CorrectionContextInput {
                        vendor: Some("Stripe".into()),
                        ..crate::contracts::CorrectionContextInput::default()
                    },
                    user_id: "user@acme.test".into(),
                    invoice_id: None,
                },
            )
            .await
            .expect("correction recorded");
        assert_eq!(response.learned.rules_created, 1);

        let processed = facade
            .process_invoice("org-1", &stripe_invoice_email())
            .await
            .expect("invoice processed");
        let categorization = processed
            .invoice
            .categorization
            .expect("categorization present");
        assert_eq!(categorization.gl_code, "6150");
        assert!(categorization.confidence >= 0.7);
        assert_eq!(
            categorization.message.as_deref(),
            Some("learned from 1 previous correction(s)")
        );
        assert_eq!(processed.ap_item.state, ApState::Received);
        assert_eq!(
            processed.ap_item.suggested_gl_code.as_deref(),
            Some("6150")
        );
    }

    #[tokio::test]
    async fn recurring_rule_auto_approves_matching_invoice() {
        let facade = TallyFacade::in_memory(None);
        facade
            .create_recurring_rule(NewRecurringRule {
                organization_id: "org-1".into(),
                vendor: "Stripe".into(),
                expected_amount: Some(tally_transactions::Money {
                    amount_minor: 45_000,
                    currency: "USD".into(),
                }),
                ..NewRecurringRule::default()
            })
            .expect("rule created");

        let processed = facade
            .process_invoice("org-1", &stripe_invoice_email())
            .await
            .expect("invoice processed");
        let recurring = processed.recurring.expect("rule matched");
        assert!(recurring.auto_approved);
        assert_eq!(processed.ap_item.state, ApState::Approved);
    }

    #[tokio::test]
    async fn recurring_variance_flags_instead_of_approving() {
        let facade = TallyFacade::in_memory(None);
        facade
            .create_recurring_rule(NewRecurringRule {
                organization_id: "org-1".into(),
                vendor: "Stripe".into(),
                expected_amount: Some(tally_transactions::Money {
                    amount_minor: 10_000,
                    currency: "USD".into(),
                }),
                ..NewRecurringRule::default()
            })
            .expect("rule created");

        let processed = facade
            .process_invoice("org-1", &stripe_invoice_email())
            .await
            .expect("invoice processed");
        let recurring = processed.recurring.expect("rule matched");
        assert!(!recurring.auto_approved);
        assert!(recurring.flagged_reason.is_some());
        assert_eq!(processed.ap_item.state, ApState::Received);
    }

    #[tokio::test]
    async fn match_then_draft_approval_and_posting() {
        let facade = TallyFacade::in_memory(None);
        let mut gateway = txn_input("g-1", 150_000, (2026, 1, 9));
        gateway.reference = Some("pi_123".into());
        let mut bank = txn_input("b-1", 150_000, (2026, 1, 9));
        bank.description = "STRIPE pi_123".into();

        let result = facade
            .reconcile(ReconcileRequest {
                organization_id: "org-1".into(),
                gateway_txns: vec![gateway],
                bank_txns: vec![bank],
                internal_txns: None,
                config: None,
            })
            .await
            .expect("batch succeeds");
        assert_eq!(result.draft_journal_entries.len(), 1);
        let entry_id = result.draft_journal_entries[0].entry_id.clone();

        // Dry run leaves the draft approved, a real run posts it.
        facade
            .approve_draft(&entry_id, "controller@acme.test")
            .await
            .expect("approve succeeds");
        let (draft, parked) = facade
            .post_draft("org-1", &entry_id, true)
            .await
            .expect("dry-run park succeeds");
        assert!(parked.simulated);
        assert_eq!(draft.status, DraftStatus::Approved);

        let (posted, parked) = facade
            .post_draft("org-1", &entry_id, false)
            .await
            .expect("park succeeds");
        assert!(!parked.simulated);
        assert_eq!(posted.status, DraftStatus::Posted);
        assert_eq!(posted.erp_document_ref, Some(parked.document_ref));
    }

    #[tokio::test]
    async fn exceptions_can_be_resolved_through_the_facade() {
        let facade = TallyFacade::in_memory(None);
        let result = facade
            .reconcile(ReconcileRequest {
                organization_id: "org-1".into(),
                gateway_txns: vec![txn_input("g-1", 50_000, (2026, 3, 1))],
                bank_txns: Vec::new(),
                internal_txns: None,
                config: None,
            })
            .await
            .expect("batch succeeds");
        let exception_id = result.exceptions[0].exception_id.clone();

        let resolved = facade
            .resolve_exception(&exception_id, "ops@acme.test", Some("matched by hand".into()))
            .await
            .expect("resolution succeeds");
        assert_eq!(
            resolved.status,
            tally_exceptions::ExceptionStatus::Resolved
        );
    }

    #[tokio::test]
    async fn match_correction_boosts_future_scoring() {
        let facade = TallyFacade::in_memory(None);
        facade
            .record_match_correction("acme payroll", "acme settlement", 0.9)
            .await
            .expect("pattern recorded");

        // The learned pattern lifts an otherwise sub-threshold pair
        // into the confirmed set.
        let mut gateway = txn_input("g-1", 102_000, (2026, 5, 1));
        gateway.description = "ACME payroll run".into();
        let mut bank = txn_input("b-1", 100_000, (2026, 5, 4));
        bank.description = "ACME settlement wire".into();
        let result = facade
            .reconcile(ReconcileRequest {
                organization_id: "org-1".into(),
                gateway_txns: vec![gateway],
                bank_txns: vec![bank],
                internal_txns: None,
                config: None,
            })
            .await
            .expect("batch succeeds");
        assert_eq!(result.matches.len(), 1);
    }

    #[tokio::test]
    async fn recurring_rule_crud_round_trip() {
        let facade = TallyFacade::in_memory(None);
        let rule = facade
            .create_recurring_rule(NewRecurringRule {
                organization_id: "org-1".into(),
                vendor: "AWS".into(),
                ..NewRecurringRule::default()
            })
            .expect("rule created");

        let updated = facade
            .update_recurring_rule(
                &rule.rule_id,
                RecurringRuleUpdate {
                    enabled: Some(false),
                    ..RecurringRuleUpdate::default()
                },
            )
            .expect("rule updated");
        assert!(!updated.enabled);

        assert_eq!(
            facade
                .list_recurring_rules("org-1", true)
                .expect("list succeeds")
                .len(),
            0
        );
        facade
            .delete_recurring_rule(&rule.rule_id)
            .expect("rule deleted");
    }
}
