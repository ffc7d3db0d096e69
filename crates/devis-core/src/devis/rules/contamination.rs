//! Detection of the issuer's own identity in extracted values.
//!
//! Quotes carry the issuer letterhead right next to the anchors used to find
//! the client, so every counterparty value must pass through this filter.

use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};
use tracing::warn;

use super::patterns::{phone_digits, PHONE};

/// Issuer phone numbers, national digits only.
const ISSUER_PHONES: &[&str] = &["0299974540", "0299980450"];

lazy_static! {
    static ref ISSUER_MARKERS: Vec<Regex> = [
        r"\bRIAUX\b",
        r"\bVAUGARNY\b",
        r"\bBAZOUGES\b",
        r"\bLA[\s-]+P[EÉ]ROUSE\b",
        r"\b35560\b",
        r"\bR\.?\s?C\.?\s?S\.?\b.*\bRENNES\b",
        r"\bSAS\s+au\s+capital\b",
        r"\bcapital\s+social\b",
        r"\bNAF\s*:?\s*1623\s*Z\b",
        r"\bSIRET\s*:?\s*\d",
        r"\bTVA\b.*\bFR\s*\d",
    ]
    .iter()
    .filter_map(|p| build_marker(p))
    .collect();
}

fn build_marker(pattern: &str) -> Option<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| warn!("Ignoring invalid contamination marker {:?}: {}", pattern, e))
        .ok()
}

/// Issuer-identity filter.
#[derive(Debug, Clone, Default)]
pub struct ContaminationFilter {
    extra: Vec<Regex>,
}

impl ContaminationFilter {
    /// Filter with the built-in issuer markers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add extra markers (case-insensitive regexes); invalid ones are skipped.
    pub fn with_extra_markers<S: AsRef<str>>(mut self, markers: &[S]) -> Self {
        self.extra
            .extend(markers.iter().filter_map(|m| build_marker(m.as_ref())));
        self
    }

    /// Whether `text` carries any issuer marker.
    pub fn is_contaminated(&self, text: &str) -> bool {
        ISSUER_MARKERS
            .iter()
            .chain(self.extra.iter())
            .any(|re| re.is_match(text))
            || has_issuer_phone(text)
    }

    /// Drop every contaminated line.
    pub fn filter_lines<'a, I>(&self, lines: I) -> Vec<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        lines
            .into_iter()
            .filter(|l| !self.is_contaminated(l))
            .collect()
    }
}

/// Phone numbers are compared on their digits, whatever the separators.
fn has_issuer_phone(text: &str) -> bool {
    PHONE
        .find_iter(text)
        .any(|m| ISSUER_PHONES.contains(&phone_digits(m.as_str()).as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_issuer_markers() {
        let filter = ContaminationFilter::new();
        for text in [
            "RIAUX ESCALIERS",
            "groupe-riaux.fr",
            "ZA de Vaugarny",
            "35560 BAZOUGES LA PEROUSE",
            "Bazouges-la-Pérouse",
            "RCS RENNES 123 456 789",
            "SAS au capital de 100 000 €",
            "NAF 1623Z",
            "SIRET : 12345678900012",
            "N° TVA intracom FR 12 345678900",
            "Tél 02 99 97 45 40",
            "02.99.98.04.50",
            "Tél 02-99-97-45-40",
            "Tél +33 2 99 97 45 40",
            "0299980450",
        ] {
            assert!(filter.is_contaminated(text), "{text} should be flagged");
        }
    }

    #[test]
    fn test_clean_values() {
        let filter = ContaminationFilter::new();
        for text in [
            "BERVAL MAISONS",
            "7 ALLEE DES ACACIAS",
            "77100 MAREUIL LES MEAUX",
            "06 12 34 56 78",
            "Client Final",
        ] {
            assert!(!filter.is_contaminated(text), "{text} should be clean");
        }
    }

    #[test]
    fn test_filter_lines() {
        let filter = ContaminationFilter::new();
        let lines = ["RIAUX", "Client Final", "ZA VAUGARNY", "Tél 02-99-97-45-40", "123 Rue test"];
        assert_eq!(
            filter.filter_lines(lines.iter().copied()),
            vec!["Client Final", "123 Rue test"]
        );
    }

    #[test]
    fn test_extra_markers() {
        let filter = ContaminationFilter::new().with_extra_markers(&["acme", "("]);
        assert!(filter.is_contaminated("ACME Corp"));
        assert!(!filter.is_contaminated("Dupont"));
    }
}
