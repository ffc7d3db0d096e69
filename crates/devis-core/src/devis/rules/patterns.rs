//! Common regex patterns for SRX quote extraction.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // Anchors
    pub static ref CODE_CLIENT: Regex = Regex::new(r"(?i)\bcode\s+client\b").unwrap();

    pub static ref CONTACT_COMMERCIAL: Regex =
        Regex::new(r"(?i)\bcontact\s+commercial\b").unwrap();

    pub static ref REF_AFFAIRE: Regex =
        Regex::new(r"(?i)\br[ée]?f(?:[ée]rence)?\.?\s*affaire\b").unwrap();

    pub static ref DATE_DEVIS: Regex = Regex::new(r"(?i)\bdate\s+(?:du\s+)?devis\b").unwrap();

    // Noise lines never taken as a name
    pub static ref DEVIS_HEADER: Regex = Regex::new(r"(?i)\bdevis\b").unwrap();

    pub static ref REALISE_PAR: Regex = Regex::new(r"(?i)\br[ée]?alis[ée]?\s+par\b").unwrap();

    pub static ref CLIENT_LABEL: Regex = Regex::new(r"(?i)^client\s*:?$").unwrap();

    pub static ref SECTION_TITLE: Regex = Regex::new(
        r"(?i)^(?:prestations?|services|finitions?|[ée]co[\s-]*contribution|descriptif)\s*:?$"
    ).unwrap();

    // Contact data
    pub static ref PHONE: Regex =
        Regex::new(r"(?:\+33\s?|\b0)[1-9](?:[\s.-]?\d{2}){4}\b").unwrap();

    pub static ref EMAIL: Regex =
        Regex::new(r"(?i)[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}").unwrap();

    pub static ref CONTACT_PERSON: Regex =
        Regex::new(r"(?i)^(?:contact|interlocuteur)\s*:?\s*(.+)$").unwrap();

    pub static ref CONTACT_LABEL: Regex =
        Regex::new(r"(?i)^(?:t[ée]l[ée]?(?:phone)?|tel|fax|portable|mobile|e-?mail|mail|courriel)\b").unwrap();

    // Address
    pub static ref POSTAL_CITY: Regex =
        Regex::new(r"\b(\d{5})\s+([A-Za-zÀ-ÿ][A-Za-zÀ-ÿ0-9'’\-\s]*)").unwrap();

    pub static ref POSTAL_ONLY: Regex = Regex::new(r"^(\d{5})$").unwrap();

    pub static ref ADDRESS_STOP: Regex = Regex::new(
        r"(?i)\b(?:validit[ée]|d[ée]signation|prestations|prix\s+de\s+la\s+fourniture|total\s+h(?:ors\s+taxe|t)\b)"
    ).unwrap();

    // Amounts (French format: 1 234,56 or 1234.56)
    pub static ref AMOUNT: Regex =
        Regex::new(r"\b(\d{1,3}(?:[ .]\d{3})+|\d+)[,.](\d{2})\b").unwrap();

    pub static ref FOURNITURE_HT: Regex =
        Regex::new(r"(?i)prix\s+de\s+la\s+fourniture\s+h\.?t\.?").unwrap();

    pub static ref PRESTATIONS_HT: Regex =
        Regex::new(r"(?i)prix\s+(?:des\s+)?prestations\s+et\s+services\s+h\.?t\.?").unwrap();

    pub static ref TOTAL_HT: Regex =
        Regex::new(r"(?i)\btotal\s+(?:hors\s+taxes?|h\.?t\.?)(?:\s|:|$)").unwrap();

    // Dates
    pub static ref DATE_DMY: Regex =
        Regex::new(r"\b(\d{1,2})[./\-](\d{1,2})[./\-](\d{4}|\d{2})\b").unwrap();

    // Pose
    pub static ref SERVICES_START: Regex = Regex::new(r"(?i)prestations").unwrap();

    pub static ref POSE_WORD: Regex = Regex::new(r"(?i)\bpose\b").unwrap();

    pub static ref SECTION_END: Regex = Regex::new(
        r"(?i)^(?:finitions?\b|[ée]co[\s-]*contribution|total\b|prix\s+de\s+la\s+fourniture|conditions\b|validit[ée]|options?\b)"
    ).unwrap();
}

/// Text after the first colon, trimmed.
pub fn after_colon(line: &str) -> Option<&str> {
    line.split_once(':')
        .map(|(_, rest)| rest.trim())
        .filter(|rest| !rest.is_empty())
}

/// Whether a line holds a phone number.
pub fn is_phone_line(line: &str) -> bool {
    PHONE.is_match(line)
}

/// Whether a line holds an email address.
pub fn is_email_line(line: &str) -> bool {
    EMAIL.is_match(line)
}

/// Whether a line holds a postal code (with or without a city).
pub fn is_postal_line(line: &str) -> bool {
    POSTAL_CITY.is_match(line) || POSTAL_ONLY.is_match(line)
}

/// Compact a phone number to its national digits (`+33` becomes `0`).
pub fn phone_digits(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    match digits.strip_prefix("33") {
        Some(national) if phone.trim_start().starts_with('+') => format!("0{}", national),
        _ => digits,
    }
}
