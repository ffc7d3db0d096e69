//! Amount normalization for French quotes.

use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

use super::patterns::{after_colon, AMOUNT, FOURNITURE_HT, PRESTATIONS_HT, TOTAL_HT};
use super::{ExtractionMatch, FieldExtractor};
use crate::devis::lines::LineSequence;

/// Amount field extractor.
pub struct AmountExtractor;

impl AmountExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AmountExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldExtractor for AmountExtractor {
    type Output = ExtractionMatch<Decimal>;

    fn extract(&self, text: &str) -> Option<Self::Output> {
        self.extract_all(text).into_iter().next()
    }

    fn extract_all(&self, text: &str) -> Vec<Self::Output> {
        let mut results = Vec::new();

        for caps in AMOUNT.captures_iter(text) {
            let integer_part = caps[1].replace([' ', '.'], "");
            let amount_str = format!("{}.{}", integer_part, &caps[2]);
            if let (Ok(amount), Some(full_match)) = (Decimal::from_str(&amount_str), caps.get(0)) {
                results.push(
                    ExtractionMatch::new(amount, 0.8, full_match.as_str())
                        .with_position(full_match.start(), full_match.end()),
                );
            }
        }

        results
    }
}

/// Labeled prices of a quote, already normalized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DevisAmounts {
    /// `PRIX DE LA FOURNITURE HT`.
    pub fourniture_ht: String,
    /// `PRIX PRESTATIONS ET SERVICES HT`.
    pub prestations_ht: String,
    /// `TOTAL HORS TAXE` / `TOTAL HT`.
    pub total_ht: String,
}

/// Extract the labeled prices.
///
/// The amount is taken after the colon of the label line, or from the next
/// line when the label stands alone.
pub fn extract_amounts(lines: &LineSequence) -> DevisAmounts {
    DevisAmounts {
        fourniture_ht: labeled_amount(lines, |l| FOURNITURE_HT.is_match(l)),
        prestations_ht: labeled_amount(lines, |l| PRESTATIONS_HT.is_match(l)),
        total_ht: labeled_amount(lines, |l| TOTAL_HT.is_match(l)),
    }
}

fn labeled_amount<F>(lines: &LineSequence, is_label: F) -> String
where
    F: Fn(&str) -> bool,
{
    let extractor = AmountExtractor::new();

    for (idx, line) in lines.iter().enumerate() {
        if !is_label(line) {
            continue;
        }

        let inline = after_colon(line).and_then(|rest| extractor.extract(rest));
        let found = inline.or_else(|| {
            lines
                .get(idx + 1)
                .and_then(|next| extractor.extract(next))
        });

        if let Some(m) = found {
            return format_french_amount(m.value);
        }
    }

    String::new()
}

/// Last amount of a line, if any.
pub fn last_amount(line: &str) -> Option<Decimal> {
    AmountExtractor::new()
        .extract_all(line)
        .pop()
        .map(|m| m.value)
}

/// Parse a French-formatted amount (e.g. "1 234,56", "1.234,56" or "1234.56").
///
/// With both separators the dots are thousands separators. A lone dot is a
/// decimal point unless there are several of them.
pub fn parse_french_amount(s: &str) -> Option<Decimal> {
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.' || *c == '-')
        .collect();

    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let normalized = if cleaned.contains(',') {
        cleaned.replace('.', "").replace(',', ".")
    } else if cleaned.matches('.').count() > 1 {
        cleaned.replace('.', "")
    } else {
        cleaned
    };

    Decimal::from_str(&normalized).ok()
}

/// Format an amount in French style ("1 234,56").
///
/// Rounds half away from zero to two decimals.
pub fn format_french_amount(amount: Decimal) -> String {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let s = format!("{:.2}", rounded);

    let (sign, unsigned) = match s.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", s.as_str()),
    };

    let Some((integer_part, decimal_part)) = unsigned.split_once('.') else {
        return s;
    };

    // Add thousand separators
    let chars: Vec<char> = integer_part.chars().collect();
    let mut formatted = String::new();

    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            formatted.push(' ');
        }
        formatted.push(*c);
    }

    format!("{}{},{}", sign, formatted, decimal_part)
}

/// Canonical French amount string, or `""` when the input is not an amount.
pub fn normalize_amount(raw: &str) -> String {
    parse_french_amount(raw)
        .map(format_french_amount)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_parse_french_amount() {
        assert_eq!(parse_french_amount("1 234,56"), Some(dec("1234.56")));
        assert_eq!(parse_french_amount("1.234,56"), Some(dec("1234.56")));
        assert_eq!(parse_french_amount("1234.56"), Some(dec("1234.56")));
        assert_eq!(parse_french_amount("1.234.567"), Some(dec("1234567")));
        assert_eq!(parse_french_amount("4 894,08 €"), Some(dec("4894.08")));
        assert_eq!(parse_french_amount(""), None);
        assert_eq!(parse_french_amount("n/a"), None);
    }

    #[test]
    fn test_format_french_amount() {
        assert_eq!(format_french_amount(dec("1234.56")), "1 234,56");
        assert_eq!(format_french_amount(dec("12345678.9")), "12 345 678,90");
        assert_eq!(format_french_amount(dec("0.005")), "0,01");
        assert_eq!(format_french_amount(dec("-1234.5")), "-1 234,50");
        assert_eq!(format_french_amount(dec("999")), "999,00");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for raw in ["1234,5", "1 234,56", "1.234,56", "12345678.901", "0", "  7 ,10 "] {
            let once = normalize_amount(raw);
            assert_eq!(normalize_amount(&once), once, "input {raw:?}");
        }
        assert_eq!(normalize_amount("abc"), "");
        assert_eq!(normalize_amount("\u{00a0}4\u{202f}894,08\u{00a0}€"), "4 894,08");
    }

    #[test]
    fn test_extract_labeled_amounts() {
        let lines = LineSequence::normalize(
            "PRIX DE LA FOURNITURE HT : 4 894,08\n\
             PRIX PRESTATIONS ET SERVICES HT\n\
             1 250,00 €\n\
             TOTAL HT : 6 144,08",
        );
        let amounts = extract_amounts(&lines);
        assert_eq!(
            amounts,
            DevisAmounts {
                fourniture_ht: "4 894,08".to_string(),
                prestations_ht: "1 250,00".to_string(),
                total_ht: "6 144,08".to_string(),
            }
        );
    }

    #[test]
    fn test_missing_label_gives_empty() {
        let lines = LineSequence::normalize("Désignation\nEscalier 1/4 tournant");
        assert_eq!(extract_amounts(&lines), DevisAmounts::default());
    }

    #[test]
    fn test_last_amount() {
        assert_eq!(last_amount("Pose 1,00 U 450,00 450,00"), Some(dec("450.00")));
        assert_eq!(last_amount("Pose"), None);
    }
}
