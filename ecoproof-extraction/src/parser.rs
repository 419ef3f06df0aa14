//! Utility-bill text parser.
//!
//! Pulls structured energy data out of raw OCR text. Confidence is additive
//! per recognized field: kWh +0.3, billed amount +0.2, service period +0.2,
//! provider +0.1, capped at 1.0.

use ecoproof_common::ExtractedFields;
use regex::Regex;

/// Utility companies recognized in bill headers.
const KNOWN_PROVIDERS: &[&str] = &[
    "PG&E",
    "ConEd",
    "Duke Energy",
    "Southern Company",
    "Electric Company",
];

/// Compiled bill-parsing patterns. Construct once and reuse; compilation of
/// the literal patterns cannot fail.
#[derive(Debug, Clone)]
pub struct BillParser {
    kwh_patterns: Vec<Regex>,
    amount_patterns: Vec<Regex>,
    date_pattern: Regex,
}

impl Default for BillParser {
    fn default() -> Self {
        Self::new()
    }
}

impl BillParser {
    pub fn new() -> Self {
        let kwh_patterns = [
            r"(?i)(\d+(?:\.\d+)?)\s*kWh",
            r"(?i)Total\s*Usage:?\s*(\d+(?:\.\d+)?)",
            r"(?i)Energy\s*Used:?\s*(\d+(?:\.\d+)?)",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("bill kwh pattern"))
        .collect();

        let amount_patterns = [
            r"\$(\d+(?:\.\d+)?)",
            r"(?i)Total\s*Amount:?\s*\$?(\d+(?:\.\d+)?)",
            r"(?i)Amount\s*Due:?\s*\$?(\d+(?:\.\d+)?)",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("bill amount pattern"))
        .collect();

        let date_pattern =
            Regex::new(r"(\w+\s+\d{1,2},?\s+\d{4})").expect("bill date pattern");

        Self {
            kwh_patterns,
            amount_patterns,
            date_pattern,
        }
    }

    /// Parse OCR text into structured fields plus a parse confidence.
    pub fn parse(&self, text: &str) -> (ExtractedFields, f64) {
        let mut fields = ExtractedFields::default();
        let mut confidence: f64 = 0.0;

        for pattern in &self.kwh_patterns {
            if let Some(value) = first_number(pattern, text) {
                fields.kwh = Some(value);
                confidence += 0.3;
                break;
            }
        }

        for pattern in &self.amount_patterns {
            if let Some(value) = first_number(pattern, text) {
                fields.amount = Some(value);
                confidence += 0.2;
                break;
            }
        }

        let dates: Vec<&str> = self
            .date_pattern
            .captures_iter(text)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        if dates.len() >= 2 {
            fields.service_period = Some(format!("{} - {}", dates[0], dates[1]));
            confidence += 0.2;
        }

        let lower = text.to_lowercase();
        for provider in KNOWN_PROVIDERS {
            if lower.contains(&provider.to_lowercase()) {
                fields.provider = Some(provider.to_string());
                confidence += 0.1;
                break;
            }
        }

        (fields, confidence.min(1.0))
    }
}

fn first_number(pattern: &Regex, text: &str) -> Option<f64> {
    pattern
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}
