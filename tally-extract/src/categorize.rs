use serde::Deserialize;
use serde::Serialize;

use crate::InvoiceExtraction;

/// One account of the organization's chart, with the keywords that
/// vote for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartAccount {
    pub code: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

/// A vendor-to-GL rule learned from corrections, passed in by the
/// caller when one applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedGlSuggestion {
    pub gl_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gl_name: Option<String>,
    pub confidence: f32,
    pub learned_from: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlSuggestion {
    pub gl_code: String,
    pub gl_name: String,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[must_use]
pub fn default_chart() -> Vec<ChartAccount> {
    let accounts = [
        ("6000", "Software & SaaS", &["software", "subscription", "saas", "cloud"][..]),
        ("6100", "Professional Services", &["consulting", "legal", "accounting"]),
        ("6200", "Marketing & Advertising", &["marketing", "advertising", "ads"]),
        ("6300", "Office Supplies", &["office", "supplies", "equipment"]),
        ("6400", "Travel & Entertainment", &["travel", "flight", "hotel"]),
        ("6500", "Utilities", &["utility", "electric", "water", "internet"]),
    ];
    accounts
        .into_iter()
        .map(|(code, name, keywords)| ChartAccount {
            code: code.into(),
            name: name.into(),
            keywords: keywords.iter().map(|keyword| (*keyword).to_owned()).collect(),
        })
        .collect()
}

const FALLBACK_CODE: &str = "6900";
const FALLBACK_NAME: &str = "Other Expenses";

/// Suggest a GL account. A learned vendor rule with confidence >= 0.5
/// wins outright; otherwise keyword votes over the chart decide, with
/// a fixed fallback account at 0.5.
#[must_use]
pub fn categorize(
    extraction: &InvoiceExtraction,
    accounts: &[ChartAccount],
    learned: Option<LearnedGlSuggestion>,
) -> GlSuggestion {
    if let Some(rule) = learned.filter(|rule| rule.confidence >= 0.5) {
        let name = rule
            .gl_name
            .clone()
            .or_else(|| {
                accounts
                    .iter()
                    .find(|account| account.code == rule.gl_code)
                    .map(|account| account.name.clone())
            })
            .unwrap_or_else(|| FALLBACK_NAME.to_owned());
        return GlSuggestion {
            gl_code: rule.gl_code,
            gl_name: name,
            confidence: rule.confidence,
            message: Some(format!(
                "learned from {} previous correction(s)",
                rule.learned_from
            )),
        };
    }

    let tokens = format!(
        "{} {}",
        extraction.vendor.as_deref().unwrap_or(""),
        extraction.invoice_number.as_deref().unwrap_or(""),
    )
    .to_lowercase();

    let mut best: Option<(&ChartAccount, usize)> = None;
    for account in accounts {
        let score = account
            .keywords
            .iter()
            .filter(|keyword| tokens.contains(&keyword.to_lowercase()))
            .count();
        if score == 0 {
            continue;
        }
        match best {
            Some((_, best_score)) if best_score >= score => {}
            _ => best = Some((account, score)),
        }
    }

    match best {
        Some((account, score)) => GlSuggestion {
            gl_code: account.code.clone(),
            gl_name: account.name.clone(),
            confidence: (0.5 + 0.1 * score as f32).clamp(0.0, 0.95),
            message: None,
        },
        None => GlSuggestion {
            gl_code: FALLBACK_CODE.into(),
            gl_name: FALLBACK_NAME.into(),
            confidence: 0.5,
            message: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn extraction(vendor: &str) -> InvoiceExtraction {
        InvoiceExtraction {
            vendor: Some(vendor.into()),
            ..InvoiceExtraction::default()
        }
    }

    #[test]
    fn learned_rule_takes_precedence() {
        let suggestion = categorize(
            &extraction("Stripe"),
            &default_chart(),
            Some(LearnedGlSuggestion {
                gl_code: "6150".into(),
                gl_name: None,
                confidence: 0.7,
                learned_from: 1,
            }),
        );
        assert_eq!(suggestion.gl_code, "6150");
        assert_eq!(suggestion.confidence, 0.7);
        assert_eq!(
            suggestion.message.as_deref(),
            Some("learned from 1 previous correction(s)")
        );
    }

    #[test]
    fn weak_learned_rule_is_ignored() {
        let suggestion = categorize(
            &extraction("Acme Cloud Software"),
            &default_chart(),
            Some(LearnedGlSuggestion {
                gl_code: "6150".into(),
                gl_name: None,
                confidence: 0.4,
                learned_from: 1,
            }),
        );
        assert_eq!(suggestion.gl_code, "6000");
    }

    #[test]
    fn keyword_votes_pick_the_account() {
        let suggestion = categorize(&extraction("Acme Cloud Software"), &default_chart(), None);
        assert_eq!(suggestion.gl_code, "6000");
        assert_eq!(suggestion.gl_name, "Software & SaaS");
        // Two keyword hits: cloud + software.
        assert!((suggestion.confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn unknown_vendor_falls_back() {
        let suggestion = categorize(&extraction("Mystery Vendor"), &default_chart(), None);
        assert_eq!(suggestion.gl_code, "6900");
        assert_eq!(suggestion.gl_name, "Other Expenses");
        assert_eq!(suggestion.confidence, 0.5);
    }
}
