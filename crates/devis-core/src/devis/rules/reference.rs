//! Quote reference decoding (`SRX` + YYMM + type + sequence).

use regex::{Regex, RegexBuilder};
use tracing::debug;

use super::{ExtractionMatch, FieldExtractor};
use crate::devis::lines::LineSequence;
use crate::models::devis::DevisReference;

/// Where the reference was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceSource {
    Filename,
    DevisLine,
    Document,
}

/// Reference decoder for a given three-letter prefix.
#[derive(Debug, Clone)]
pub struct ReferenceDecoder {
    prefix: String,
    pattern: Regex,
}

impl ReferenceDecoder {
    /// Decoder for `SRX` references.
    pub fn new() -> Self {
        Self::with_prefix("SRX")
    }

    /// Decoder for another prefix. Non-alphanumeric characters are escaped.
    pub fn with_prefix(prefix: &str) -> Self {
        let prefix = prefix.trim().to_uppercase();
        let pattern = format!(
            r"{}\s?(\d{{4}})\s?([A-Z]{{3}})\s?(\d{{6}})(?:\D|$)",
            regex::escape(&prefix)
        );
        let pattern = RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .build()
            .unwrap_or_else(|_| Self::default_pattern());
        Self { prefix, pattern }
    }

    fn default_pattern() -> Regex {
        Regex::new(r"(?i)SRX\s?(\d{4})\s?([A-Z]{3})\s?(\d{6})(?:\D|$)").unwrap()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Decode the first reference found in `text`.
    pub fn decode_str(&self, text: &str) -> Option<DevisReference> {
        self.extract(text).map(|m| m.value)
    }

    /// Search the filename, then lines mentioning "devis", then the whole document.
    pub fn decode(
        &self,
        filename: Option<&str>,
        lines: &LineSequence,
    ) -> Option<(DevisReference, ReferenceSource)> {
        if let Some(reference) = filename.and_then(|f| self.decode_str(f)) {
            debug!("Reference {} found in filename", reference);
            return Some((reference, ReferenceSource::Filename));
        }

        let from_devis_line = lines
            .iter()
            .filter(|l| l.to_lowercase().contains("devis"))
            .find_map(|l| self.decode_str(l));
        if let Some(reference) = from_devis_line {
            debug!("Reference {} found on a devis line", reference);
            return Some((reference, ReferenceSource::DevisLine));
        }

        self.decode_str(&lines.joined()).map(|reference| {
            debug!("Reference {} found in document body", reference);
            (reference, ReferenceSource::Document)
        })
    }
}

impl Default for ReferenceDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldExtractor for ReferenceDecoder {
    type Output = ExtractionMatch<DevisReference>;

    fn extract(&self, text: &str) -> Option<Self::Output> {
        self.extract_all(text).into_iter().next()
    }

    fn extract_all(&self, text: &str) -> Vec<Self::Output> {
        self.pattern
            .captures_iter(text)
            .filter_map(|caps| {
                // The trailing non-digit guard is not part of the reference.
                let start = caps.get(0)?.start();
                let end = caps.get(3)?.end();
                let reference = DevisReference {
                    prefix: self.prefix.clone(),
                    year_month: caps[1].to_string(),
                    type_code: caps[2].to_uppercase(),
                    sequence: caps[3].to_string(),
                };
                Some(
                    ExtractionMatch::new(reference, 0.95, &text[start..end])
                        .with_position(start, end),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_compact_and_spaced() {
        let decoder = ReferenceDecoder::new();
        let r = decoder.decode_str("SRX2511AFF037501").unwrap();
        assert_eq!(r.year_month, "2511");
        assert_eq!(r.type_code, "AFF");
        assert_eq!(r.sequence, "037501");

        let r = decoder.decode_str("Devis n° srx 2511 aff 037501").unwrap();
        assert_eq!(r.full(), "SRX2511AFF037501");
    }

    #[test]
    fn test_filename_wins() {
        let decoder = ReferenceDecoder::new();
        let lines = LineSequence::normalize("Devis SRX2401ABC000001\nSRX2402DEF000002");
        let (r, source) = decoder
            .decode(Some("SRX2511AFF037501 BERVAL.pdf"), &lines)
            .unwrap();
        assert_eq!(r.full(), "SRX2511AFF037501");
        assert_eq!(source, ReferenceSource::Filename);
    }

    #[test]
    fn test_devis_line_before_document() {
        let decoder = ReferenceDecoder::new();
        let lines = LineSequence::normalize("Ref SRX2402DEF000002\nDevis : SRX2401ABC000001");
        let (r, source) = decoder.decode(Some("scan.pdf"), &lines).unwrap();
        assert_eq!(r.sequence, "000001");
        assert_eq!(source, ReferenceSource::DevisLine);

        let lines = LineSequence::normalize("Ref SRX2402DEF000002");
        let (r, source) = decoder.decode(None, &lines).unwrap();
        assert_eq!(r.sequence, "000002");
        assert_eq!(source, ReferenceSource::Document);
    }

    #[test]
    fn test_no_reference() {
        let decoder = ReferenceDecoder::new();
        let lines = LineSequence::normalize("SRX25AFF0375\nDevis");
        assert_eq!(decoder.decode(None, &lines), None);
    }

    #[test]
    fn test_longer_sequence_is_rejected() {
        let decoder = ReferenceDecoder::new();
        assert_eq!(decoder.decode_str("SRX2511AFF0375012"), None);

        let found = decoder.extract("Devis SRX2511AFF037501, le 03/11").unwrap();
        assert_eq!(found.source, "SRX2511AFF037501");
        assert_eq!(
            decoder.decode_str("SRX2511AFF037501_BERVAL.pdf").unwrap().sequence,
            "037501"
        );
    }

    #[test]
    fn test_custom_prefix() {
        let decoder = ReferenceDecoder::with_prefix("sry");
        assert_eq!(decoder.prefix(), "SRY");
        assert!(decoder.decode_str("SRX2511AFF037501").is_none());
        assert_eq!(
            decoder.decode_str("SRY2511AFF037501").unwrap().full(),
            "SRY2511AFF037501"
        );
    }
}
