use std::sync::LazyLock;

use chrono::NaiveDate;
use regex_lite::Regex;
use tally_transactions::Money;

use crate::ExtractRequest;
use crate::InvoiceExtraction;

static INVOICE_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?i)invoice\s*(?:number|no\.?|#)?\s*[:#]?\s*([A-Za-z][A-Za-z0-9]*-?[0-9][A-Za-z0-9-]*)")
});
static TOTAL: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"(?i)(?:total|amount\s+due|balance\s+due)\s*[:]?\s*(?:(USD|EUR|GBP|[$€£])\s*)?([0-9][0-9,]*(?:\.[0-9]{1,2})?)",
    )
});
static ISO_DATE: LazyLock<Regex> = LazyLock::new(|| compile(r"([0-9]{4}-[0-9]{2}-[0-9]{2})"));
static DUE_DATE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)due\s*(?:date|by|on)?\s*[:]?\s*([0-9]{4}-[0-9]{2}-[0-9]{2})"));
static INVOICE_DATE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)invoice\s*date\s*[:]?\s*([0-9]{4}-[0-9]{2}-[0-9]{2})"));
static SENDER_DISPLAY: LazyLock<Regex> =
    LazyLock::new(|| compile(r"^\s*([^<]+?)\s*<[^>]+>\s*$"));

// Static literals compiled once at first use; a malformed pattern is a
// programmer error surfaced by this module's tests.
#[expect(clippy::expect_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static pattern compiles")
}

/// Deterministic text parser: regex-driven recognition of invoice
/// number, totals, and dates in the subject and body. Always produces
/// a baseline, however thin.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextInvoiceParser;

impl TextInvoiceParser {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[must_use]
    pub fn parse(self, request: &ExtractRequest) -> InvoiceExtraction {
        let subject = request.email_subject.as_deref().unwrap_or("");
        let body = request.email_body.as_deref().unwrap_or("");
        let attachment_text: String = request
            .attachments
            .iter()
            .filter_map(|attachment| attachment.content_text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");
        let text = format!("{subject}\n{body}\n{attachment_text}");

        let vendor = request
            .email_sender
            .as_deref()
            .and_then(|sender| self.parse_vendor(sender));
        let invoice_number = INVOICE_NUMBER
            .captures(&text)
            .and_then(|captures| captures.get(1))
            .map(|capture| capture.as_str().to_owned());
        let total = self.parse_total(&text);
        let invoice_date = INVOICE_DATE
            .captures(&text)
            .and_then(|captures| captures.get(1))
            .and_then(|capture| parse_iso_date(capture.as_str()))
            .or_else(|| self.first_date(&text));
        let due_date = DUE_DATE
            .captures(&text)
            .and_then(|captures| captures.get(1))
            .and_then(|capture| parse_iso_date(capture.as_str()));

        let found = [
            vendor.is_some(),
            invoice_number.is_some(),
            total.is_some(),
            invoice_date.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count();
        let confidence = if found == 0 {
            0.0
        } else {
            (0.1 + 0.2 * found as f32).min(0.95)
        };

        InvoiceExtraction {
            vendor,
            invoice_number,
            invoice_date,
            due_date,
            total,
            confidence,
            line_items: Vec::new(),
            provider: None,
            degraded: false,
            provider_error: None,
        }
    }

    fn parse_vendor(self, sender: &str) -> Option<String> {
        if let Some(captures) = SENDER_DISPLAY.captures(sender) {
            let display = captures.get(1)?.as_str().trim();
            if !display.is_empty() {
                return Some(display.to_owned());
            }
        }
        // Bare address: derive a name from the second-level domain.
        let domain = sender.split('@').nth(1)?;
        let label = domain.split('.').next()?.trim();
        if label.is_empty() {
            return None;
        }
        let mut chars = label.chars();
        let first = chars.next()?;
        Some(first.to_uppercase().collect::<String>() + chars.as_str())
    }

    fn parse_total(self, text: &str) -> Option<Money> {
        let captures = TOTAL.captures(text)?;
        let currency = match captures.get(1).map(|capture| capture.as_str()) {
            Some("$") => "USD".to_owned(),
            Some("€") => "EUR".to_owned(),
            Some("£") => "GBP".to_owned(),
            Some(code) => code.to_uppercase(),
            None => "USD".to_owned(),
        };
        let raw = captures.get(2)?.as_str().replace(',', "");
        let amount_minor = parse_decimal_minor(&raw)?;
        Money::new(amount_minor, currency).ok()
    }

    fn first_date(self, text: &str) -> Option<NaiveDate> {
        ISO_DATE
            .captures(text)
            .and_then(|captures| captures.get(1))
            .and_then(|capture| parse_iso_date(capture.as_str()))
    }
}

fn parse_iso_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

fn parse_decimal_minor(raw: &str) -> Option<i64> {
    let mut parts = raw.splitn(2, '.');
    let integer: i64 = parts.next()?.parse().ok()?;
    let minor = match parts.next() {
        Some(fraction) => {
            let padded = format!("{fraction:0<2}");
            let cents: i64 = padded.get(0..2)?.parse().ok()?;
            integer.checked_mul(100)?.checked_add(cents)?
        }
        None => integer.checked_mul(100)?,
    };
    Some(minor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(subject: &str, body: &str, sender: Option<&str>) -> InvoiceExtraction {
        TextInvoiceParser::new().parse(&ExtractRequest {
            email_subject: Some(subject.into()),
            email_body: Some(body.into()),
            email_sender: sender.map(ToOwned::to_owned),
            attachments: Vec::new(),
        })
    }

    #[test]
    fn extracts_number_total_and_dates() {
        let extraction = parse(
            "Invoice INV-77 from AWS",
            "Invoice date: 2026-05-01\nDue: 2026-06-01\nTotal: $431.90",
            Some("Amazon Web Services <billing@aws.example>"),
        );
        assert_eq!(extraction.invoice_number.as_deref(), Some("INV-77"));
        assert_eq!(
            extraction.total,
            Some(Money {
                amount_minor: 43_190,
                currency: "USD".into()
            })
        );
        assert_eq!(extraction.invoice_date, NaiveDate::from_ymd_opt(2026, 5, 1));
        assert_eq!(extraction.due_date, NaiveDate::from_ymd_opt(2026, 6, 1));
        assert_eq!(
            extraction.vendor.as_deref(),
            Some("Amazon Web Services")
        );
        assert_eq!(extraction.confidence, 0.9);
    }

    #[test]
    fn currency_symbols_map_to_codes() {
        let euro = parse("invoice 9", "Total: €10.50", None);
        assert_eq!(
            euro.total,
            Some(Money {
                amount_minor: 1_050,
                currency: "EUR".into()
            })
        );
        let explicit = parse("invoice 9", "Amount due: EUR 99", None);
        assert_eq!(
            explicit.total,
            Some(Money {
                amount_minor: 9_900,
                currency: "EUR".into()
            })
        );
    }

    #[test]
    fn vendor_falls_back_to_domain() {
        let extraction = parse("hello", "nothing here", Some("billing@stripe.com"));
        assert_eq!(extraction.vendor.as_deref(), Some("Stripe"));
    }

    #[test]
    fn empty_text_scores_zero_confidence() {
        let extraction = parse("hello", "nothing to see", None);
        assert_eq!(extraction.confidence, 0.0);
        assert_eq!(extraction.invoice_number, None);
    }

    #[test]
    fn attachment_text_is_searched() {
        let extraction = TextInvoiceParser::new().parse(&ExtractRequest {
            email_subject: Some("fwd".into()),
            email_body: None,
            email_sender: None,
            attachments: vec![crate::Attachment {
                filename: "invoice.txt".into(),
                content_type: "text/plain".into(),
                content_base64: None,
                content_text: Some("Invoice #A-100\nTotal: 55.00".into()),
            }],
        });
        assert_eq!(extraction.invoice_number.as_deref(), Some("A-100"));
        assert_eq!(
            extraction.total.map(|total| total.amount_minor),
            Some(5_500)
        );
    }
}
