use std::collections::HashMap;

use chrono::NaiveDate;
use csv::StringRecord;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::FlowDirection;
use crate::Money;
use crate::OrganizationId;
use crate::Transaction;
use crate::TransactionError;
use crate::TransactionResult;
use crate::TransactionSource;
use crate::TransactionStatus;
use crate::validate_currency_code;

fn default_date_format() -> String {
    "%Y-%m-%d".into()
}

fn default_amount_factor() -> i64 {
    100
}

/// Column mapping for one bank's CSV export.
#[derive(Debug, Clone, Deserialize)]
pub struct StatementProfile {
    pub line_id: String,
    pub value_date: String,
    pub amount: String,
    pub currency: String,
    pub description: String,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub counterparty: Option<String>,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    #[serde(default = "default_amount_factor")]
    pub amount_minor_factor: i64,
}

impl Default for StatementProfile {
    fn default() -> Self {
        Self {
            line_id: "transaction_id".into(),
            value_date: "value_date".into(),
            amount: "amount".into(),
            currency: "currency".into(),
            description: "description".into(),
            reference: Some("reference".into()),
            counterparty: Some("counterparty".into()),
            date_format: default_date_format(),
            amount_minor_factor: default_amount_factor(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_key: Option<String>,
    #[serde(default)]
    pub total_occurrences: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discarded_ids: Vec<String>,
}

impl Default for DuplicateMetadata {
    fn default() -> Self {
        Self {
            group_key: None,
            total_occurrences: 1,
            discarded_ids: Vec::new(),
        }
    }
}

/// One normalized statement line, before it becomes a `Transaction`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementLine {
    pub line_id: String,
    pub value_date: NaiveDate,
    pub amount_minor: i64,
    pub direction: FlowDirection,
    pub currency: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default)]
    pub duplicate_metadata: DuplicateMetadata,
}

impl StatementLine {
    pub fn dedupe_key(&self) -> String {
        if let Some(reference) = &self.reference {
            return reference.clone();
        }
        format!("{}|{}|{}", self.line_id, self.amount_minor, self.value_date)
    }

    fn ensure_checksum(&mut self) {
        if self.checksum.is_some() {
            return;
        }
        let mut hasher = Sha256::new();
        for field in [
            self.line_id.as_str(),
            &self.value_date.to_string(),
            &self.amount_minor.to_string(),
            &self.currency,
        ] {
            hasher.update(field.as_bytes());
            hasher.update(b"|");
        }
        self.checksum = Some(format!("{:x}", hasher.finalize()));
    }

    /// Promote the line into a pending bank transaction for reconciliation.
    pub fn into_transaction(
        self,
        organization_id: impl Into<OrganizationId>,
    ) -> TransactionResult<Transaction> {
        let transaction = Transaction {
            id: self.line_id,
            organization_id: organization_id.into(),
            amount: Money::new(self.amount_minor, self.currency)?,
            direction: self.direction,
            value_date: self.value_date,
            description: self.description,
            reference: self.reference,
            counterparty: self.counterparty,
            source: TransactionSource::Bank,
            source_id: self.checksum,
            status: TransactionStatus::Pending,
            matched_with: Vec::new(),
        };
        transaction.validate()?;
        Ok(transaction)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DedupeMetrics {
    pub kept: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupeOutcome {
    pub lines: Vec<StatementLine>,
    pub metrics: DedupeMetrics,
}

/// Collapse duplicate statement lines, keeping the first occurrence per
/// dedupe key and recording what was discarded on the survivor.
#[must_use]
pub fn dedupe_lines(lines: Vec<StatementLine>) -> DedupeOutcome {
    let mut grouped: HashMap<String, Vec<(usize, StatementLine)>> = HashMap::new();
    for (index, mut line) in lines.into_iter().enumerate() {
        let key = line.dedupe_key();
        line.duplicate_metadata.group_key = Some(key.clone());
        grouped.entry(key).or_default().push((index, line));
    }

    let mut metrics = DedupeMetrics::default();
    let mut ordered: Vec<(usize, StatementLine)> = Vec::new();
    for (_, mut entries) in grouped {
        entries.sort_by_key(|(idx, _)| *idx);
        let mut iter = entries.into_iter();
        if let Some((first_index, mut primary)) = iter.next() {
            let discarded = iter.map(|(_, line)| line.line_id).collect::<Vec<_>>();
            metrics.kept += 1;
            metrics.dropped += discarded.len();
            primary.duplicate_metadata.total_occurrences = discarded.len() + 1;
            primary.duplicate_metadata.discarded_ids = discarded;
            primary.ensure_checksum();
            ordered.push((first_index, primary));
        }
    }

    ordered.sort_by_key(|(idx, _)| *idx);
    DedupeOutcome {
        lines: ordered.into_iter().map(|(_, line)| line).collect(),
        metrics,
    }
}

pub trait StatementParser: Send + Sync {
    fn parse(&self, input: &str) -> TransactionResult<Vec<StatementLine>>;
}

struct ColumnIndexes {
    line_id: usize,
    value_date: usize,
    amount: usize,
    currency: usize,
    description: usize,
    reference: Option<usize>,
    counterparty: Option<usize>,
}

impl StatementProfile {
    fn indexes(&self, headers: &StringRecord) -> TransactionResult<ColumnIndexes> {
        Ok(ColumnIndexes {
            line_id: find_index(headers, &self.line_id)?,
            value_date: find_index(headers, &self.value_date)?,
            amount: find_index(headers, &self.amount)?,
            currency: find_index(headers, &self.currency)?,
            description: find_index(headers, &self.description)?,
            reference: optional_index(headers, self.reference.as_deref())?,
            counterparty: optional_index(headers, self.counterparty.as_deref())?,
        })
    }
}

fn find_index(headers: &StringRecord, column: &str) -> TransactionResult<usize> {
    headers
        .iter()
        .position(|candidate| candidate.eq_ignore_ascii_case(column))
        .ok_or_else(|| TransactionError::MissingColumn(column.into()))
}

fn optional_index(
    headers: &StringRecord,
    column: Option<&str>,
) -> TransactionResult<Option<usize>> {
    column.map(|name| find_index(headers, name)).transpose()
}

#[derive(Clone)]
pub struct CsvStatementParser {
    profile: StatementProfile,
}

impl CsvStatementParser {
    pub fn new(profile: StatementProfile) -> Self {
        Self { profile }
    }

    fn build_line(
        &self,
        record: &StringRecord,
        indexes: &ColumnIndexes,
    ) -> TransactionResult<StatementLine> {
        let line_id = required_field(record, indexes.line_id, "line id")?;
        let date_raw = required_field(record, indexes.value_date, "value date")?;
        let value_date = NaiveDate::parse_from_str(&date_raw, &self.profile.date_format)
            .map_err(|err| TransactionError::Parse(format!("invalid date {date_raw}: {err}")))?;

        let amount_raw = required_field(record, indexes.amount, "amount")?;
        let signed_minor = parse_amount(&amount_raw, self.profile.amount_minor_factor)?;
        let direction = if signed_minor < 0 {
            FlowDirection::Outbound
        } else {
            FlowDirection::Inbound
        };

        let currency = required_field(record, indexes.currency, "currency")?.to_uppercase();
        validate_currency_code(&currency)?;

        let description = required_field(record, indexes.description, "description")?;
        let reference = optional_field(record, indexes.reference);
        let counterparty = optional_field(record, indexes.counterparty);

        let mut line = StatementLine {
            line_id,
            value_date,
            amount_minor: signed_minor.abs(),
            direction,
            currency,
            description,
            reference,
            counterparty,
            checksum: None,
            duplicate_metadata: DuplicateMetadata::default(),
        };
        line.ensure_checksum();
        Ok(line)
    }
}

impl Default for CsvStatementParser {
    fn default() -> Self {
        Self::new(StatementProfile::default())
    }
}

impl StatementParser for CsvStatementParser {
    fn parse(&self, input: &str) -> TransactionResult<Vec<StatementLine>> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(input.as_bytes());
        let headers = reader
            .headers()
            .map_err(|err| TransactionError::Csv(err.to_string()))?
            .clone();
        let indexes = self.profile.indexes(&headers)?;
        let mut lines = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| TransactionError::Csv(err.to_string()))?;
            if record.iter().all(|field| field.trim().is_empty()) {
                continue;
            }
            lines.push(self.build_line(&record, &indexes)?);
        }
        Ok(lines)
    }
}

fn required_field(
    record: &StringRecord,
    index: usize,
    label: &str,
) -> TransactionResult<String> {
    record
        .get(index)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| TransactionError::Validation(format!("{label} missing")))
}

fn optional_field(record: &StringRecord, index: Option<usize>) -> Option<String> {
    index
        .and_then(|idx| record.get(idx))
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_amount(value: &str, factor: i64) -> TransactionResult<i64> {
    if factor <= 0 {
        return Err(TransactionError::Validation(
            "amount_minor_factor must be positive".into(),
        ));
    }
    let mut cleaned = value.trim().replace(',', "");
    if cleaned.is_empty() {
        return Err(TransactionError::Validation("amount cannot be empty".into()));
    }
    let negative = cleaned.starts_with('-');
    if negative {
        cleaned.remove(0);
    }
    let parts: Vec<&str> = cleaned.split('.').collect();
    let integer = parts
        .first()
        .unwrap_or(&"0")
        .chars()
        .filter(char::is_ascii_digit)
        .collect::<String>();
    let fraction = if parts.len() > 1 {
        parts[1]
            .chars()
            .take(6)
            .filter(char::is_ascii_digit)
            .collect::<String>()
    } else {
        String::new()
    };
    let mut amount = integer
        .parse::<i64>()
        .map_err(|err| TransactionError::Parse(format!("bad integer component {integer}: {err}")))?;
    amount = amount
        .checked_mul(factor)
        .ok_or_else(|| TransactionError::Parse("amount overflow".into()))?;
    if !fraction.is_empty() {
        let fraction_scale = 10_i64.pow(fraction.len() as u32);
        let fraction_value = fraction.parse::<i64>().map_err(|err| {
            TransactionError::Parse(format!("bad fraction component {fraction}: {err}"))
        })?;
        amount += fraction_value * factor / fraction_scale;
    }
    Ok(if negative { -amount } else { amount })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const STATEMENT: &str = "\
transaction_id,value_date,amount,currency,description,reference,counterparty
bank-1,2026-01-09,1500.00,USD,STRIPE pi_123,pi_123,Stripe
bank-2,2026-01-10,-42.50,USD,Office chairs,,Staples
bank-1,2026-01-09,1500.00,USD,STRIPE pi_123,pi_123,Stripe
";

    #[test]
    fn parses_lines_with_sign_split_into_direction() {
        let parser = CsvStatementParser::default();
        let lines = parser.parse(STATEMENT).expect("statement parses");
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].amount_minor, 150_000);
        assert_eq!(lines[0].direction, FlowDirection::Inbound);
        assert_eq!(lines[1].amount_minor, 4_250);
        assert_eq!(lines[1].direction, FlowDirection::Outbound);
        assert!(lines[0].checksum.is_some());
    }

    #[test]
    fn dedupe_collapses_repeated_references() {
        let parser = CsvStatementParser::default();
        let lines = parser.parse(STATEMENT).expect("statement parses");
        let outcome = dedupe_lines(lines);
        assert_eq!(outcome.metrics.kept, 2);
        assert_eq!(outcome.metrics.dropped, 1);
        let survivor = outcome
            .lines
            .iter()
            .find(|line| line.line_id == "bank-1")
            .expect("survivor kept");
        assert_eq!(survivor.duplicate_metadata.total_occurrences, 2);
        assert_eq!(survivor.duplicate_metadata.discarded_ids, vec!["bank-1"]);
    }

    #[test]
    fn missing_column_is_reported_by_name() {
        let parser = CsvStatementParser::default();
        let err = parser
            .parse("transaction_id,amount\nx,1.00\n")
            .unwrap_err();
        assert!(matches!(err, TransactionError::MissingColumn(column) if column == "value_date"));
    }

    #[test]
    fn rejects_unknown_currency() {
        let parser = CsvStatementParser::default();
        let input = "\
transaction_id,value_date,amount,currency,description
bank-9,2026-01-09,10.00,usd,Test
";
        assert!(parser.parse(input).is_err());
    }

    #[test]
    fn line_promotes_to_pending_bank_transaction() {
        let parser = CsvStatementParser::default();
        let lines = parser.parse(STATEMENT).expect("statement parses");
        let tx = lines[0]
            .clone()
            .into_transaction("org-1")
            .expect("promotes");
        assert_eq!(tx.source, TransactionSource::Bank);
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.amount.amount_minor, 150_000);
        assert_eq!(tx.reference.as_deref(), Some("pi_123"));
    }

    #[test]
    fn amount_parser_handles_thousand_separators() {
        assert_eq!(parse_amount("1,234.56", 100).expect("parses"), 123_456);
        assert_eq!(parse_amount("-7", 100).expect("parses"), -700);
    }
}
