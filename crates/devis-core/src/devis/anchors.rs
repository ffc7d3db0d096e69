//! Anchor-based extraction of the counterparty and sales-contact blocks.

use chrono::NaiveDate;
use regex::Regex;
use tracing::debug;

use super::lines::LineSequence;
use super::rules::contamination::ContaminationFilter;
use super::rules::patterns::*;
use super::rules::specs::{extract_specs, TechnicalSpecs};
use crate::models::config::ExtractionConfig;
use crate::models::devis::Field;

/// Warning added when a postal code has no city next to it.
pub const POSTAL_CODE_WITHOUT_CITY: &str = "code postal sans ville";

/// Customer identity found around `Code client`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counterparty {
    pub code: String,
    pub nom: String,
    pub contact: String,
    pub adresse1: String,
    pub adresse2: String,
    pub cp: String,
    pub ville: String,
    pub tel: String,
    pub email: String,
}

/// Internal sales contact found around `Contact commercial`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SalesContact {
    pub nom: String,
    pub tel: String,
    pub tel2: String,
    pub email: String,
}

/// Everything the anchor scan produces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnchorFields {
    /// `Code client` appeared in the document.
    pub client_anchor_found: bool,
    /// `Contact commercial` appeared in the document.
    pub commercial_anchor_found: bool,
    pub client: Counterparty,
    pub commercial: SalesContact,
    pub ref_affaire: String,
    pub date_devis: String,
    pub specs: TechnicalSpecs,
}

impl AnchorFields {
    /// Text values paired with their record field.
    pub fn fields(&self) -> Vec<(Field, &str)> {
        let mut fields = vec![
            (Field::RefAffaire, self.ref_affaire.as_str()),
            (Field::DateDevis, self.date_devis.as_str()),
            (Field::ClientCode, self.client.code.as_str()),
            (Field::ClientNom, self.client.nom.as_str()),
            (Field::ClientContact, self.client.contact.as_str()),
            (Field::ClientAdresse1, self.client.adresse1.as_str()),
            (Field::ClientAdresse2, self.client.adresse2.as_str()),
            (Field::ClientCp, self.client.cp.as_str()),
            (Field::ClientVille, self.client.ville.as_str()),
            (Field::ClientTel, self.client.tel.as_str()),
            (Field::ClientEmail, self.client.email.as_str()),
            (Field::CommercialNom, self.commercial.nom.as_str()),
            (Field::CommercialTel, self.commercial.tel.as_str()),
            (Field::CommercialTel2, self.commercial.tel2.as_str()),
            (Field::CommercialEmail, self.commercial.email.as_str()),
        ];
        fields.extend(self.specs.fields());
        fields
    }
}

/// Line scanner locating fields relative to anchor phrases.
#[derive(Debug, Clone)]
pub struct AnchorExtractor {
    filter: ContaminationFilter,
    address_block_lines: usize,
    client_contact_window: usize,
    commercial_window: usize,
}

impl AnchorExtractor {
    pub fn new(filter: ContaminationFilter) -> Self {
        let defaults = ExtractionConfig::default();
        Self {
            filter,
            address_block_lines: defaults.address_block_lines,
            client_contact_window: defaults.client_contact_window,
            commercial_window: defaults.commercial_window,
        }
    }

    /// Extractor with the window sizes of `config`.
    pub fn from_config(config: &ExtractionConfig, filter: ContaminationFilter) -> Self {
        Self {
            filter,
            address_block_lines: config.address_block_lines.max(1),
            client_contact_window: config.client_contact_window.max(1),
            commercial_window: config.commercial_window.max(1),
        }
    }

    /// Run every anchor rule. Missing anchors only produce warnings.
    pub fn extract(&self, lines: &LineSequence) -> (AnchorFields, Vec<String>) {
        let mut fields = AnchorFields::default();
        let mut warnings = Vec::new();

        match lines.find_first(|l| CODE_CLIENT.is_match(l)) {
            Some(anchor) => {
                fields.client_anchor_found = true;
                fields.client = self.counterparty(lines, anchor, &mut warnings);
            }
            None => warnings.push("ancre 'Code client' introuvable".to_string()),
        }

        match lines.find_first(|l| CONTACT_COMMERCIAL.is_match(l)) {
            Some(anchor) => {
                fields.commercial_anchor_found = true;
                fields.commercial = self.sales_contact(lines, anchor);
                if fields.commercial.nom.is_empty() {
                    warnings.push("nom du commercial introuvable".to_string());
                }
            }
            None => warnings.push("ancre 'Contact commercial' introuvable".to_string()),
        }

        fields.ref_affaire = labeled_value(lines, &REF_AFFAIRE).unwrap_or_default();

        if let Some(raw) = labeled_value(lines, &DATE_DEVIS) {
            match parse_devis_date(&raw) {
                Some(date) => fields.date_devis = date.format("%d/%m/%Y").to_string(),
                None => warnings.push(format!("date du devis illisible: {}", raw)),
            }
        }

        fields.specs = extract_specs(lines);
        warnings.extend(fields.specs.warnings.iter().cloned());

        (fields, warnings)
    }

    fn counterparty(
        &self,
        lines: &LineSequence,
        anchor: usize,
        warnings: &mut Vec<String>,
    ) -> Counterparty {
        let mut client = Counterparty::default();
        let anchor_line = lines.get(anchor).unwrap_or_default();

        client.code = text_after_label(anchor_line, &CODE_CLIENT)
            .filter(|c| !self.filter.is_contaminated(c))
            .unwrap_or_default();

        let name_idx = (0..anchor)
            .rev()
            .find(|&i| lines.get(i).is_some_and(|l| self.is_valid_name(l)))
            .or_else(|| {
                (anchor + 1..lines.len())
                    .find(|&i| lines.get(i).is_some_and(|l| self.is_valid_name(l)))
            });

        let Some(name_idx) = name_idx else {
            warnings.push("nom du client introuvable".to_string());
            return client;
        };
        client.nom = lines.get(name_idx).unwrap_or_default().to_string();
        debug!("Client name {:?} at line {}", client.nom, name_idx);

        let mut address: Vec<String> = Vec::new();
        let mut scanned = 0;

        for line in lines.lines().iter().skip(name_idx + 1) {
            if scanned >= self.address_block_lines || is_address_stop(line) {
                break;
            }
            scanned += 1;

            if self.filter.is_contaminated(line) || is_noise(line) {
                continue;
            }

            if let Some(caps) = CONTACT_PERSON.captures(line) {
                if client.contact.is_empty() {
                    client.contact = caps[1].trim().to_string();
                }
                continue;
            }

            if let Some(caps) = POSTAL_CITY.captures(line) {
                let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
                let prefix = line[..start].trim().trim_end_matches([',', '-']).trim();
                if !prefix.is_empty() {
                    address.push(prefix.to_string());
                }
                client.cp = caps[1].to_string();
                client.ville = caps[2].trim().trim_end_matches([',', '.']).trim().to_string();
                break;
            }

            if let Some(caps) = POSTAL_ONLY.captures(line) {
                client.cp = caps[1].to_string();
                warnings.push(POSTAL_CODE_WITHOUT_CITY.to_string());
                break;
            }

            address.push(line.clone());
        }

        let mut rest = address.into_iter();
        client.adresse1 = rest.next().unwrap_or_default();
        client.adresse2 = rest.collect::<Vec<_>>().join(", ");

        let window = lines
            .lines()
            .iter()
            .skip(anchor)
            .take(self.client_contact_window)
            .enumerate()
            .take_while(|(i, l)| *i == 0 || !CONTACT_COMMERCIAL.is_match(l))
            .map(|(_, l)| l.as_str());

        for line in window {
            if client.tel.is_empty() {
                if let Some(phone) = PHONE
                    .find_iter(line)
                    .map(|m| m.as_str())
                    .find(|p| !self.filter.is_contaminated(p))
                {
                    client.tel = phone.to_string();
                }
            }
            if client.email.is_empty() {
                if let Some(email) = EMAIL
                    .find_iter(line)
                    .map(|m| m.as_str())
                    .find(|e| !self.filter.is_contaminated(e))
                {
                    client.email = email.to_string();
                }
            }
        }

        client
    }

    fn sales_contact(&self, lines: &LineSequence, anchor: usize) -> SalesContact {
        let mut contact = SalesContact::default();
        let anchor_line = lines.get(anchor).unwrap_or_default();

        let inline = text_after_label(anchor_line, &CONTACT_COMMERCIAL)
            .map(|v| strip_contact_data(&v))
            .filter(|v| self.is_valid_person(v));

        contact.nom = inline
            .or_else(|| {
                lines
                    .iter()
                    .skip(anchor + 1)
                    .take(self.commercial_window)
                    .find(|l| self.is_valid_person(l))
                    .map(str::to_string)
            })
            .unwrap_or_default();

        let mut phones: Vec<String> = Vec::new();
        let window = lines
            .iter()
            .skip(anchor)
            .take(self.commercial_window + 1)
            .enumerate()
            .take_while(|(i, l)| *i == 0 || !CODE_CLIENT.is_match(l))
            .map(|(_, l)| l);

        for line in window {
            for phone in PHONE.find_iter(line).map(|m| m.as_str()) {
                let digits = phone_digits(phone);
                if !phones.iter().any(|p| phone_digits(p) == digits) {
                    phones.push(phone.to_string());
                }
            }
            if contact.email.is_empty() {
                if let Some(email) = EMAIL.find(line) {
                    contact.email = email.as_str().to_string();
                }
            }
        }

        let mut phones = phones.into_iter();
        contact.tel = phones.next().unwrap_or_default();
        contact.tel2 = phones.next().unwrap_or_default();

        debug!(
            "Sales contact {:?} ({} / {})",
            contact.nom, contact.tel, contact.tel2
        );
        contact
    }

    /// Candidate for the client name.
    fn is_valid_name(&self, line: &str) -> bool {
        !line.trim().is_empty()
            && line.chars().any(char::is_alphabetic)
            && !self.filter.is_contaminated(line)
            && !is_noise(line)
            && !is_phone_line(line)
            && !is_email_line(line)
            && !is_postal_line(line)
    }

    /// Candidate for the sales-contact name.
    fn is_valid_person(&self, line: &str) -> bool {
        self.is_valid_name(line)
            && !line.contains(':')
            && !CONTACT_LABEL.is_match(line)
            && !ADDRESS_STOP.is_match(line)
            && !SECTION_TITLE.is_match(line)
    }
}

/// Header labels and boilerplate never taken as a value.
fn is_noise(line: &str) -> bool {
    DEVIS_HEADER.is_match(line)
        || REALISE_PAR.is_match(line)
        || DATE_DEVIS.is_match(line)
        || REF_AFFAIRE.is_match(line)
        || CODE_CLIENT.is_match(line)
        || CONTACT_COMMERCIAL.is_match(line)
        || CLIENT_LABEL.is_match(line)
}

/// End of the client address block.
fn is_address_stop(line: &str) -> bool {
    CONTACT_LABEL.is_match(line)
        || CONTACT_COMMERCIAL.is_match(line)
        || ADDRESS_STOP.is_match(line)
        || is_phone_line(line)
        || is_email_line(line)
}

/// Text following `label` on the same line, without the separator.
fn text_after_label(line: &str, label: &Regex) -> Option<String> {
    let m = label.find(line)?;
    let rest = line[m.end()..]
        .trim_start_matches(|c: char| c == ':' || c == '.' || c.is_whitespace())
        .trim();
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}

/// Value of a labeled line: after the label, else the next line.
fn labeled_value(lines: &LineSequence, label: &Regex) -> Option<String> {
    let idx = lines.find_first(|l| label.is_match(l))?;
    let line = lines.get(idx)?;
    text_after_label(line, label).or_else(|| {
        lines
            .get(idx + 1)
            .filter(|next| !is_noise(next))
            .map(str::to_string)
    })
}

/// Remove phone numbers and emails from an inline contact value.
fn strip_contact_data(value: &str) -> String {
    let without_phone = PHONE.replace_all(value, "");
    let without_email = EMAIL.replace_all(&without_phone, "");
    without_email
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c == '-' || c == ',' || c == '/' || c.is_whitespace())
        .to_string()
}

/// Parse `dd/mm/yyyy`, `dd.mm.yyyy` or `dd-mm-yyyy` (two-digit years are 20xx).
pub fn parse_devis_date(raw: &str) -> Option<NaiveDate> {
    let caps = DATE_DMY.captures(raw)?;
    let day: u32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let mut year: i32 = caps[3].parse().ok()?;
    if caps[3].len() == 2 {
        year += 2000;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn extract(raw: &[&str]) -> (AnchorFields, Vec<String>) {
        AnchorExtractor::new(ContaminationFilter::new()).extract(&LineSequence::from_lines(raw))
    }

    #[test]
    fn test_name_skips_contaminated_line() {
        let (fields, _) = extract(&[
            "Code client",
            "RIAUX",
            "Client Final",
            "123 Rue test",
            "Contact commercial",
        ]);
        assert_eq!(fields.client.nom, "Client Final");
        assert_eq!(fields.client.adresse1, "123 Rue test");
        assert_eq!(fields.client.adresse2, "");
    }

    #[test]
    fn test_counterparty_block() {
        let (fields, warnings) = extract(&[
            "RIAUX ESCALIERS",
            "ZA de Vaugarny",
            "35560 BAZOUGES LA PEROUSE",
            "Devis n° SRX2511AFF037501",
            "Date du devis : 03/11/2025",
            "Code client : C0042",
            "BERVAL MAISONS",
            "Contact : M. Martin",
            "7 ALLEE DES ACACIAS",
            "ZI du Moulin",
            "77100 MAREUIL LES MEAUX",
            "Tél : 01 60 00 00 00",
            "contact@berval.fr",
        ]);
        let client = &fields.client;
        assert_eq!(client.code, "C0042");
        assert_eq!(client.nom, "BERVAL MAISONS");
        assert_eq!(client.contact, "M. Martin");
        assert_eq!(client.adresse1, "7 ALLEE DES ACACIAS");
        assert_eq!(client.adresse2, "ZI du Moulin");
        assert_eq!(client.cp, "77100");
        assert_eq!(client.ville, "MAREUIL LES MEAUX");
        assert_eq!(client.tel, "01 60 00 00 00");
        assert_eq!(client.email, "contact@berval.fr");
        assert_eq!(fields.date_devis, "03/11/2025");
        assert!(warnings.iter().any(|w| w.contains("Contact commercial")));
    }

    #[test]
    fn test_name_before_anchor() {
        let (fields, _) = extract(&["SARL DUPONT", "Code client", "12 rue des Lilas", "44000 NANTES"]);
        assert_eq!(fields.client.nom, "SARL DUPONT");
        // the anchor line inside the block is skipped
        assert_eq!(fields.client.adresse1, "12 rue des Lilas");
        assert_eq!(fields.client.cp, "44000");
    }

    #[test]
    fn test_prefix_before_postal_code() {
        let (fields, _) = extract(&["Code client", "DUPONT", "Lieu-dit Le Bourg 22100 DINAN"]);
        assert_eq!(fields.client.adresse1, "Lieu-dit Le Bourg");
        assert_eq!(fields.client.cp, "22100");
        assert_eq!(fields.client.ville, "DINAN");
    }

    #[test]
    fn test_postal_code_without_city() {
        let (fields, warnings) = extract(&["Code client", "DUPONT", "3 rue Haute", "22100"]);
        assert_eq!(fields.client.cp, "22100");
        assert_eq!(fields.client.ville, "");
        assert!(warnings.contains(&POSTAL_CODE_WITHOUT_CITY.to_string()));
    }

    #[test]
    fn test_issuer_phone_not_taken_for_client() {
        let (fields, _) = extract(&["Code client", "DUPONT", "Tél 02 99 97 45 40", "06 11 22 33 44"]);
        assert_eq!(fields.client.tel, "06 11 22 33 44");
    }

    #[test]
    fn test_sales_contact_inline_and_phones() {
        let (fields, _) = extract(&[
            "Contact commercial : Julien LEROY 06 12 34 56 78",
            "02 99 00 11 22",
            "06.12.34.56.78",
            "j.leroy@example.fr",
        ]);
        let commercial = &fields.commercial;
        assert_eq!(commercial.nom, "Julien LEROY");
        assert_eq!(commercial.tel, "06 12 34 56 78");
        assert_eq!(commercial.tel2, "02 99 00 11 22");
        assert_eq!(commercial.email, "j.leroy@example.fr");
    }

    #[test]
    fn test_sales_contact_next_line() {
        let (fields, _) = extract(&[
            "Contact commercial",
            "Tél : 06 12 34 56 78",
            "35000 RENNES",
            "Sophie MARTIN",
        ]);
        assert_eq!(fields.commercial.nom, "Sophie MARTIN");
        assert_eq!(fields.commercial.tel, "06 12 34 56 78");
        assert_eq!(fields.commercial.tel2, "");
    }

    #[test]
    fn test_ref_affaire_inline_or_next_line() {
        let (fields, _) = extract(&["Réf affaire : MAISON DUPONT"]);
        assert_eq!(fields.ref_affaire, "MAISON DUPONT");

        let (fields, _) = extract(&["Réf. affaire", "CHANTIER LILAS"]);
        assert_eq!(fields.ref_affaire, "CHANTIER LILAS");
    }

    #[test]
    fn test_missing_anchors_are_warnings() {
        let (fields, warnings) = extract(&["Escalier droit"]);
        assert!(!fields.client_anchor_found);
        assert!(!fields.commercial_anchor_found);
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn test_parse_devis_date() {
        assert_eq!(
            parse_devis_date("le 3.11.25"),
            NaiveDate::from_ymd_opt(2025, 11, 3)
        );
        assert_eq!(parse_devis_date("31/02/2025"), None);
    }
}
