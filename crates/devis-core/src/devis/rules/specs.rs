//! Technical specification lines of the staircase.

use lazy_static::lazy_static;
use regex::Regex;

use super::patterns::after_colon;
use crate::devis::lines::LineSequence;
use crate::models::devis::{Contremarches, Field, StructureKind};

/// Warning added when an infill line names no zone.
pub const REMPLISSAGE_WITHOUT_ZONE: &str = "remplissage sans précision de zone";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpecLabel {
    NezDeMarche,
    Contremarche,
    MainCourante,
    Marche,
    Structure,
    Rampe,
    TeteDePoteau,
    PoteauDepart,
    Gamme,
    Remplissage,
}

lazy_static! {
    // Priority order: the first label matching a line owns it.
    static ref LABELS: Vec<(SpecLabel, Regex)> = vec![
        (SpecLabel::NezDeMarche, Regex::new(r"(?i)\bnez\s+de\s+marches?\b").unwrap()),
        (SpecLabel::Contremarche, Regex::new(r"(?i)\bcontre[\s-]?marches?\b").unwrap()),
        (SpecLabel::MainCourante, Regex::new(r"(?i)\bmains?[\s-]+courantes?\b").unwrap()),
        // Label only: "marches" also shows up in item descriptions.
        (SpecLabel::Marche, Regex::new(r"(?i)^[\s\-•*]*(?:finition\s+(?:des\s+)?)?marches?\s*(?::|$)").unwrap()),
        (SpecLabel::Structure, Regex::new(r"(?i)\bstructure\b").unwrap()),
        (SpecLabel::Rampe, Regex::new(r"(?i)\brampe\b").unwrap()),
        (SpecLabel::TeteDePoteau, Regex::new(r"(?i)\bt[êe]tes?\s+de\s+poteaux?\b").unwrap()),
        (SpecLabel::PoteauDepart, Regex::new(r"(?i)\bpoteaux?\b.*\bd[ée]part\b").unwrap()),
        (SpecLabel::Gamme, Regex::new(r"(?i)\b(?:mod[èe]le|gamme)\b").unwrap()),
        (SpecLabel::Remplissage, Regex::new(r"(?i)\bremplissage\b").unwrap()),
    ];

    static ref WOOD: Regex = Regex::new(
        r"(?i)\b(ch[êe]ne|h[êe]tre|fr[êe]ne|sapin|pin|[ée]rable|sipo|hemlock)\b"
    ).unwrap();

    static ref NEGATIVE: Regex = Regex::new(r"(?i)\b(?:sans|non|aucune?s?)\b").unwrap();

    static ref CREMAILLERE: Regex = Regex::new(r"(?i)\bcr[ée]maill[èe]res?\b").unwrap();
    static ref LIMON_DECOUPE: Regex = Regex::new(r"(?i)\blimons?\s+d[ée]coup[ée]s?\b").unwrap();
    static ref LIMON_CENTRAL: Regex = Regex::new(r"(?i)\blimons?\s+centra(?:l|ux)\b").unwrap();
    static ref LIMON: Regex = Regex::new(r"(?i)\blimons?\b").unwrap();

    static ref ZONE_ETAGE: Regex = Regex::new(r"(?i)\b[ée]tage\b").unwrap();
    static ref ZONE_SOUBASSEMENT: Regex = Regex::new(r"(?i)\bsoubassement\b").unwrap();
    static ref ZONE_RAMPANT: Regex = Regex::new(r"(?i)\brampant\b").unwrap();
}

/// Technical specification values found in the quote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TechnicalSpecs {
    pub gamme: String,
    pub essence: String,
    pub finition_marches: String,
    pub finition_structure: String,
    pub finition_mains_courante: String,
    pub finition_contremarche: String,
    pub finition_rampe: String,
    pub nez_de_marches: String,
    pub tete_de_poteau: String,
    pub poteaux_depart: String,
    pub remplissage_rampant: String,
    pub remplissage_etage: String,
    pub remplissage_soubassement: String,
    pub contremarches: Option<Contremarches>,
    pub structure: Option<StructureKind>,
    pub warnings: Vec<String>,
}

impl TechnicalSpecs {
    /// Text values paired with their record field.
    pub fn fields(&self) -> [(Field, &str); 13] {
        [
            (Field::EscGamme, self.gamme.as_str()),
            (Field::EscEssence, self.essence.as_str()),
            (Field::EscFinitionMarches, self.finition_marches.as_str()),
            (Field::EscFinitionStructure, self.finition_structure.as_str()),
            (Field::EscFinitionMainsCourante, self.finition_mains_courante.as_str()),
            (Field::EscFinitionContremarche, self.finition_contremarche.as_str()),
            (Field::EscFinitionRampe, self.finition_rampe.as_str()),
            (Field::EscNezDeMarches, self.nez_de_marches.as_str()),
            (Field::EscTeteDePoteau, self.tete_de_poteau.as_str()),
            (Field::EscPoteauxDepart, self.poteaux_depart.as_str()),
            (Field::EscRemplissageRampant, self.remplissage_rampant.as_str()),
            (Field::EscRemplissageEtage, self.remplissage_etage.as_str()),
            (Field::EscRemplissageSoubassement, self.remplissage_soubassement.as_str()),
        ]
    }

    fn slot(&mut self, label: SpecLabel, line: &str) -> Option<&mut String> {
        let slot = match label {
            SpecLabel::NezDeMarche => &mut self.nez_de_marches,
            SpecLabel::Contremarche => &mut self.finition_contremarche,
            SpecLabel::MainCourante => &mut self.finition_mains_courante,
            SpecLabel::Marche => &mut self.finition_marches,
            SpecLabel::Structure => &mut self.finition_structure,
            SpecLabel::Rampe => &mut self.finition_rampe,
            SpecLabel::TeteDePoteau => &mut self.tete_de_poteau,
            SpecLabel::PoteauDepart => &mut self.poteaux_depart,
            SpecLabel::Gamme => &mut self.gamme,
            SpecLabel::Remplissage => {
                if ZONE_ETAGE.is_match(line) {
                    &mut self.remplissage_etage
                } else if ZONE_SOUBASSEMENT.is_match(line) {
                    &mut self.remplissage_soubassement
                } else {
                    if !ZONE_RAMPANT.is_match(line)
                        && !self.warnings.iter().any(|w| w == REMPLISSAGE_WITHOUT_ZONE)
                    {
                        self.warnings.push(REMPLISSAGE_WITHOUT_ZONE.to_string());
                    }
                    &mut self.remplissage_rampant
                }
            }
        };
        Some(slot).filter(|s| s.is_empty())
    }
}

/// Scan the lines for specification labels.
///
/// One line feeds at most one label; the first value of each field wins.
pub fn extract_specs(lines: &LineSequence) -> TechnicalSpecs {
    let mut specs = TechnicalSpecs::default();
    let mut spec_values: Vec<String> = Vec::new();

    for line in lines.iter() {
        let Some((label, label_match)) = LABELS
            .iter()
            .find_map(|(label, re)| re.find(line).map(|m| (*label, m)))
        else {
            continue;
        };

        let value = after_colon(line).unwrap_or(line);
        if is_bare_label(line, label_match.start(), label_match.end()) {
            continue;
        }

        if label == SpecLabel::Contremarche && specs.contremarches.is_none() {
            specs.contremarches = Some(if NEGATIVE.is_match(value) {
                Contremarches::Sans
            } else {
                Contremarches::Avec
            });
        }
        if label == SpecLabel::Structure && specs.structure.is_none() {
            specs.structure = structure_kind(value);
        }

        if let Some(slot) = specs.slot(label, line) {
            *slot = value.to_string();
            spec_values.push(value.to_string());
        }
    }

    if specs.structure.is_none() {
        specs.structure = lines.iter().find_map(structure_kind);
    }

    specs.essence = spec_values
        .iter()
        .find_map(|v| wood_species(v))
        .unwrap_or_default()
        .to_string();

    specs
}

/// The line carries nothing but its label (a section title).
fn is_bare_label(line: &str, start: usize, end: usize) -> bool {
    let rest = format!("{}{}", &line[..start], &line[end..]);
    !rest.chars().any(char::is_alphanumeric)
}

fn structure_kind(text: &str) -> Option<StructureKind> {
    if CREMAILLERE.is_match(text) {
        Some(StructureKind::Cremaillere)
    } else if LIMON_DECOUPE.is_match(text) {
        Some(StructureKind::LimonDecoupe)
    } else if LIMON_CENTRAL.is_match(text) {
        Some(StructureKind::LimonCentral)
    } else if LIMON.is_match(text) {
        Some(StructureKind::Limon)
    } else {
        None
    }
}

/// Canonical label of the first wood species named in `text`.
pub fn wood_species(text: &str) -> Option<&'static str> {
    let found = WOOD.find(text)?.as_str().to_lowercase();
    let label = match found.replace(['ê', 'é'], "e").as_str() {
        "chene" => "Chêne",
        "hetre" => "Hêtre",
        "frene" => "Frêne",
        "sapin" => "Sapin",
        "pin" => "Pin",
        "erable" => "Érable",
        "sipo" => "Sipo",
        "hemlock" => "Hemlock",
        _ => return None,
    };
    Some(label)
}
