#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde::Serialize;
use tally_transactions::Money;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

mod categorize;
mod parser;

pub use categorize::ChartAccount;
pub use categorize::GlSuggestion;
pub use categorize::LearnedGlSuggestion;
pub use categorize::categorize;
pub use categorize::default_chart;
pub use parser::TextInvoiceParser;

pub type ExtractResult<T> = Result<T, ExtractError>;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_text: Option<String>,
}

impl Attachment {
    /// PDF and image payloads need the multimodal provider; text
    /// attachments feed the deterministic parser directly.
    #[must_use]
    pub fn is_document(&self) -> bool {
        self.content_type == "application/pdf" || self.content_type.starts_with("image/")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_sender: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl ExtractRequest {
    fn validate(&self) -> ExtractResult<()> {
        let has_text = self
            .email_subject
            .as_deref()
            .is_some_and(|subject| !subject.trim().is_empty())
            || self
                .email_body
                .as_deref()
                .is_some_and(|body| !body.trim().is_empty())
            || !self.attachments.is_empty();
        if has_text {
            Ok(())
        } else {
            Err(ExtractError::Validation(
                "extraction needs a subject, body, or attachment".into(),
            ))
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedLineItem {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_minor: Option<i64>,
}

/// The structured result of one extraction. `degraded` marks a run
/// where the model provider was wanted but unavailable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceExtraction {
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
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub line_items: Vec<ExtractedLineItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default)]
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_error: Option<String>,
}

/// What a model provider returns. Null fields defer to the baseline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderExtraction {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_minor: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub line_items: Vec<ExtractedLineItem>,
}

/// External language-model service with text and multimodal
/// capabilities. Failures are non-fatal for extraction.
#[async_trait]
pub trait InvoiceModelProvider: Send + Sync {
    async fn extract_text(&self, request: &ExtractRequest) -> anyhow::Result<ProviderExtraction>;
    async fn extract_document(
        &self,
        request: &ExtractRequest,
    ) -> anyhow::Result<ProviderExtraction>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractorConfig {
    /// Below this baseline confidence the model provider is consulted.
    pub provider_floor: f32,
    pub provider_timeout: Duration,
    pub provider_enabled: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            provider_floor: 0.7,
            provider_timeout: Duration::from_secs(60),
            provider_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Extracted,
    NeedsReview,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_id: String,
    pub extraction: InvoiceExtraction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categorization: Option<GlSuggestion>,
    pub status: InvoiceStatus,
}

pub struct InvoiceExtractor {
    parser: TextInvoiceParser,
    provider: Option<Arc<dyn InvoiceModelProvider>>,
    config: ExtractorConfig,
}

impl Default for InvoiceExtractor {
    fn default() -> Self {
        Self::new(None, ExtractorConfig::default())
    }
}

impl InvoiceExtractor {
    #[must_use]
    pub fn new(provider: Option<Arc<dyn InvoiceModelProvider>>, config: ExtractorConfig) -> Self {
        Self {
            parser: TextInvoiceParser::new(),
            provider,
            config,
        }
    }

    /// Deterministic baseline first; the provider only upgrades it.
    /// Provider errors and timeouts leave the baseline standing, with
    /// the degradation recorded on the extraction.
    pub async fn extract(&self, request: &ExtractRequest) -> ExtractResult<InvoiceExtraction> {
        request.validate()?;
        let mut extraction = self.parser.parse(request);

        let has_documents = request.attachments.iter().any(Attachment::is_document);
        let wants_provider = self.config.provider_enabled
            && (has_documents || extraction.confidence < self.config.provider_floor);
        let Some(provider) = self.provider.as_ref().filter(|_| wants_provider) else {
            return Ok(extraction);
        };

        let call = async {
            if has_documents {
                provider.extract_document(request).await
            } else {
                provider.extract_text(request).await
            }
        };
        match tokio::time::timeout(self.config.provider_timeout, call).await {
            Ok(Ok(upgrade)) => {
                extraction = merge_extractions(extraction, upgrade);
            }
            Ok(Err(err)) => {
                warn!(error = %err, "invoice model provider failed; baseline stands");
                extraction.degraded = true;
                extraction.provider_error = Some(err.to_string());
            }
            Err(_) => {
                warn!("invoice model provider timed out; baseline stands");
                extraction.degraded = true;
                extraction.provider_error = Some("provider timed out".into());
            }
        }
        Ok(extraction)
    }

    /// Extraction plus categorization, wrapped as an `Invoice`.
    pub async fn extract_invoice(
        &self,
        request: &ExtractRequest,
        accounts: &[ChartAccount],
        learned: Option<LearnedGlSuggestion>,
    ) -> ExtractResult<Invoice> {
        let extraction = self.extract(request).await?;
        let categorization = categorize(&extraction, accounts, learned);
        let status = if extraction.confidence >= self.config.provider_floor {
            InvoiceStatus::Extracted
        } else {
            InvoiceStatus::NeedsReview
        };
        Ok(Invoice {
            invoice_id: Uuid::new_v4().to_string(),
            extraction,
            categorization: Some(categorization),
            status,
        })
    }
}

/// Field-wise merge: the provider wins where it answered, the baseline
/// fills the rest. Confidence is the minimum of the contributors.
fn merge_extractions(
    baseline: InvoiceExtraction,
    upgrade: ProviderExtraction,
) -> InvoiceExtraction {
    let total = match (upgrade.total_minor, &upgrade.currency) {
        (Some(total_minor), Some(currency)) => Money::new(total_minor, currency.clone())
            .ok()
            .or(baseline.total),
        _ => baseline.total,
    };
    let confidence = match upgrade.confidence {
        Some(provider_confidence) => baseline.confidence.min(provider_confidence),
        None => baseline.confidence,
    };
    InvoiceExtraction {
        vendor: upgrade.vendor.or(baseline.vendor),
        invoice_number: upgrade.invoice_number.or(baseline.invoice_number),
        invoice_date: upgrade.invoice_date.or(baseline.invoice_date),
        due_date: upgrade.due_date.or(baseline.due_date),
        total,
        confidence,
        line_items: if upgrade.line_items.is_empty() {
            baseline.line_items
        } else {
            upgrade.line_items
        },
        provider: Some(upgrade.provider),
        degraded: false,
        provider_error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct StubProvider {
        result: ProviderExtraction,
    }

    #[async_trait]
    impl InvoiceModelProvider for StubProvider {
        async fn extract_text(
            &self,
            _request: &ExtractRequest,
        ) -> anyhow::Result<ProviderExtraction> {
            Ok(self.result.clone())
        }

        async fn extract_document(
            &self,
            _request: &ExtractRequest,
        ) -> anyhow::Result<ProviderExtraction> {
            Ok(self.result.clone())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl InvoiceModelProvider for FailingProvider {
        async fn extract_text(
            &self,
            _request: &ExtractRequest,
        ) -> anyhow::Result<ProviderExtraction> {
            anyhow::bail!("provider unavailable")
        }

        async fn extract_document(
            &self,
            _request: &ExtractRequest,
        ) -> anyhow::Result<ProviderExtraction> {
            anyhow::bail!("provider unavailable")
        }
    }

    fn invoice_email() -> ExtractRequest {
        ExtractRequest {
            email_subject: Some("Invoice INV-2041 from Stripe".into()),
            email_body: Some(
                "Hello,\n\nPlease find invoice INV-2041 attached.\n\
                 Invoice date: 2026-02-01\nDue date: 2026-03-01\n\
                 Total: USD 1,250.00\n\nThanks,\nStripe Billing"
                    .into(),
            ),
            email_sender: Some("Stripe Billing <billing@stripe.com>".into()),
            attachments: Vec::new(),
        }
    }

    #[tokio::test]
    async fn baseline_parse_without_provider() {
        let extractor = InvoiceExtractor::default();
        let extraction = extractor
            .extract(&invoice_email())
            .await
            .expect("extraction succeeds");
        assert_eq!(extraction.invoice_number.as_deref(), Some("INV-2041"));
        assert_eq!(
            extraction.total,
            Some(Money {
                amount_minor: 125_000,
                currency: "USD".into()
            })
        );
        assert_eq!(
            extraction.invoice_date,
            NaiveDate::from_ymd_opt(2026, 2, 1)
        );
        assert_eq!(extraction.due_date, NaiveDate::from_ymd_opt(2026, 3, 1));
        assert_eq!(extraction.vendor.as_deref(), Some("Stripe Billing"));
        assert!(extraction.confidence >= 0.7);
        assert!(!extraction.degraded);
        assert_eq!(extraction.provider, None);
    }

    #[tokio::test]
    async fn provider_upgrades_low_confidence_baseline() {
        let provider = StubProvider {
            result: ProviderExtraction {
                provider: "vision-model".into(),
                vendor: Some("Stripe, Inc.".into()),
                invoice_number: Some("INV-2041".into()),
                total_minor: Some(125_000),
                currency: Some("USD".into()),
                confidence: Some(0.9),
                ..ProviderExtraction::default()
            },
        };
        let extractor = InvoiceExtractor::new(
            Some(Arc::new(provider)),
            ExtractorConfig::default(),
        );
        let request = ExtractRequest {
            email_subject: Some("payment".into()),
            email_body: Some("see attached".into()),
            email_sender: None,
            attachments: Vec::new(),
        };
        let extraction = extractor
            .extract(&request)
            .await
            .expect("extraction succeeds");
        assert_eq!(extraction.vendor.as_deref(), Some("Stripe, Inc."));
        assert_eq!(extraction.provider.as_deref(), Some("vision-model"));
        // min(baseline, provider): the thin baseline dominates.
        assert!(extraction.confidence < 0.9);
    }

    #[tokio::test]
    async fn provider_failure_degrades_to_baseline() {
        let extractor = InvoiceExtractor::new(
            Some(Arc::new(FailingProvider)),
            ExtractorConfig::default(),
        );
        let request = ExtractRequest {
            email_subject: Some("payment".into()),
            email_body: Some("see attached".into()),
            email_sender: None,
            attachments: Vec::new(),
        };
        let extraction = extractor
            .extract(&request)
            .await
            .expect("extraction still succeeds");
        assert!(extraction.degraded);
        assert!(
            extraction
                .provider_error
                .as_deref()
                .is_some_and(|err| err.contains("unavailable"))
        );
    }

    #[tokio::test]
    async fn confident_baseline_skips_provider() {
        // A failing provider proves it was never consulted.
        let extractor = InvoiceExtractor::new(
            Some(Arc::new(FailingProvider)),
            ExtractorConfig::default(),
        );
        let extraction = extractor
            .extract(&invoice_email())
            .await
            .expect("extraction succeeds");
        assert!(!extraction.degraded);
        assert_eq!(extraction.provider, None);
    }

    #[tokio::test]
    async fn document_attachments_route_to_multimodal() {
        let provider = StubProvider {
            result: ProviderExtraction {
                provider: "vision-model".into(),
                confidence: Some(0.95),
                ..ProviderExtraction::default()
            },
        };
        let extractor = InvoiceExtractor::new(
            Some(Arc::new(provider)),
            ExtractorConfig::default(),
        );
        let mut request = invoice_email();
        request.attachments.push(Attachment {
            filename: "invoice.pdf".into(),
            content_type: "application/pdf".into(),
            content_base64: Some("JVBERi0=".into()),
            content_text: None,
        });
        let extraction = extractor
            .extract(&request)
            .await
            .expect("extraction succeeds");
        assert_eq!(extraction.provider.as_deref(), Some("vision-model"));
    }

    #[tokio::test]
    async fn empty_request_is_rejected() {
        let extractor = InvoiceExtractor::default();
        let err = extractor
            .extract(&ExtractRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Validation(_)));
    }
}
