use chrono::NaiveDate;
use serde::Deserialize;
use serde::Serialize;
use tally_ap::ApItem;
use tally_extract::Invoice;
use tally_learn::CorrectionType;
use tally_recon::ReconciliationConfig;
use tally_recurring::RecurringOutcome;
use tally_transactions::FlowDirection;
use tally_transactions::Money;
use tally_transactions::Transaction;
use tally_transactions::TransactionResult;
use tally_transactions::TransactionSource;
use tally_transactions::TransactionStatus;

/// One transaction as callers submit it; minor units plus ISO-4217.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub transaction_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub value_date: NaiveDate,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty: Option<String>,
}

impl TransactionInput {
    pub fn into_transaction(
        self,
        organization_id: &str,
        source: TransactionSource,
    ) -> TransactionResult<Transaction> {
        let transaction = Transaction {
            id: self.transaction_id,
            organization_id: organization_id.to_owned(),
            amount: Money::new(self.amount_minor, self.currency)?,
            direction: FlowDirection::Inbound,
            value_date: self.value_date,
            description: self.description,
            reference: self.reference,
            counterparty: self.counterparty,
            source,
            source_id: None,
            status: TransactionStatus::Pending,
            matched_with: Vec::new(),
        };
        transaction.validate()?;
        Ok(transaction)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileRequest {
    pub organization_id: String,
    pub gateway_txns: Vec<TransactionInput>,
    pub bank_txns: Vec<TransactionInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_txns: Option<Vec<TransactionInput>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ReconciliationConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrectionContextInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_minor: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordCorrectionRequest {
    #[serde(rename = "type")]
    pub correction_type: CorrectionType,
    pub original_value: String,
    pub corrected_value: String,
    #[serde(default)]
    pub context: CorrectionContextInput,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionLearned {
    pub rules_created: usize,
    pub rules_updated: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferences_updated: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionResponse {
    pub correction_id: String,
    pub learned: CorrectionLearned,
    pub message: String,
}

/// The result of running an inbound invoice through extraction,
/// categorization, the recurring rules, and AP intake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedInvoice {
    pub invoice: Invoice,
    pub ap_item: ApItem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurring: Option<RecurringOutcome>,
}
