//! Flat order record extracted from an SRX quote.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Every text field of [`DevisRecord`], keyed by its snapshot name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    DevisAnneeMois,
    DevisType,
    DevisNum,
    RefAffaire,
    DateDevis,
    ClientCode,
    ClientNom,
    ClientContact,
    ClientAdresse1,
    ClientAdresse2,
    ClientCp,
    ClientVille,
    ClientTel,
    ClientEmail,
    CommercialNom,
    CommercialTel,
    CommercialTel2,
    CommercialEmail,
    FournitureHt,
    PrestationsHt,
    TotalHt,
    EscGamme,
    EscEssence,
    EscFinitionMarches,
    EscFinitionStructure,
    EscFinitionMainsCourante,
    EscFinitionContremarche,
    EscFinitionRampe,
    EscNezDeMarches,
    EscTeteDePoteau,
    EscPoteauxDepart,
    EscRemplissageRampant,
    EscRemplissageEtage,
    EscRemplissageSoubassement,
    PoseAmount,
}

impl Field {
    /// All text fields in snapshot order.
    pub const ALL: [Field; 35] = [
        Field::DevisAnneeMois,
        Field::DevisType,
        Field::DevisNum,
        Field::RefAffaire,
        Field::DateDevis,
        Field::ClientCode,
        Field::ClientNom,
        Field::ClientContact,
        Field::ClientAdresse1,
        Field::ClientAdresse2,
        Field::ClientCp,
        Field::ClientVille,
        Field::ClientTel,
        Field::ClientEmail,
        Field::CommercialNom,
        Field::CommercialTel,
        Field::CommercialTel2,
        Field::CommercialEmail,
        Field::FournitureHt,
        Field::PrestationsHt,
        Field::TotalHt,
        Field::EscGamme,
        Field::EscEssence,
        Field::EscFinitionMarches,
        Field::EscFinitionStructure,
        Field::EscFinitionMainsCourante,
        Field::EscFinitionContremarche,
        Field::EscFinitionRampe,
        Field::EscNezDeMarches,
        Field::EscTeteDePoteau,
        Field::EscPoteauxDepart,
        Field::EscRemplissageRampant,
        Field::EscRemplissageEtage,
        Field::EscRemplissageSoubassement,
        Field::PoseAmount,
    ];

    /// Fields describing the counterparty; they must never carry issuer data.
    pub const COUNTERPARTY: [Field; 8] = [
        Field::ClientNom,
        Field::ClientContact,
        Field::ClientAdresse1,
        Field::ClientAdresse2,
        Field::ClientCp,
        Field::ClientVille,
        Field::ClientTel,
        Field::ClientEmail,
    ];

    /// Snapshot / JSON key of the field.
    pub fn as_str(self) -> &'static str {
        match self {
            Field::DevisAnneeMois => "devis_annee_mois",
            Field::DevisType => "devis_type",
            Field::DevisNum => "devis_num",
            Field::RefAffaire => "ref_affaire",
            Field::DateDevis => "date_devis",
            Field::ClientCode => "client_code",
            Field::ClientNom => "client_nom",
            Field::ClientContact => "client_contact",
            Field::ClientAdresse1 => "client_adresse1",
            Field::ClientAdresse2 => "client_adresse2",
            Field::ClientCp => "client_cp",
            Field::ClientVille => "client_ville",
            Field::ClientTel => "client_tel",
            Field::ClientEmail => "client_email",
            Field::CommercialNom => "commercial_nom",
            Field::CommercialTel => "commercial_tel",
            Field::CommercialTel2 => "commercial_tel2",
            Field::CommercialEmail => "commercial_email",
            Field::FournitureHt => "fourniture_ht",
            Field::PrestationsHt => "prestations_ht",
            Field::TotalHt => "total_ht",
            Field::EscGamme => "esc_gamme",
            Field::EscEssence => "esc_essence",
            Field::EscFinitionMarches => "esc_finition_marches",
            Field::EscFinitionStructure => "esc_finition_structure",
            Field::EscFinitionMainsCourante => "esc_finition_mains_courante",
            Field::EscFinitionContremarche => "esc_finition_contremarche",
            Field::EscFinitionRampe => "esc_finition_rampe",
            Field::EscNezDeMarches => "esc_nez_de_marches",
            Field::EscTeteDePoteau => "esc_tete_de_poteau",
            Field::EscPoteauxDepart => "esc_poteaux_depart",
            Field::EscRemplissageRampant => "esc_remplissage_rampant",
            Field::EscRemplissageEtage => "esc_remplissage_etage",
            Field::EscRemplissageSoubassement => "esc_remplissage_soubassement",
            Field::PoseAmount => "pose_amount",
        }
    }

    /// Look a field up by its snapshot key.
    pub fn from_key(key: &str) -> Option<Field> {
        Field::ALL.iter().copied().find(|f| f.as_str() == key)
    }

    pub fn is_counterparty(self) -> bool {
        Field::COUNTERPARTY.contains(&self)
    }

    pub fn is_amount(self) -> bool {
        matches!(
            self,
            Field::FournitureHt | Field::PrestationsHt | Field::TotalHt | Field::PoseAmount
        )
    }

    /// Reference sub-fields, only ever written together.
    pub fn is_reference(self) -> bool {
        matches!(self, Field::DevisAnneeMois | Field::DevisType | Field::DevisNum)
    }

    /// Fields whose absence makes the document unprocessable.
    pub fn is_required(self) -> bool {
        matches!(self, Field::ClientNom | Field::FournitureHt)
    }

    /// Fields whose absence triggers the fallback producers.
    pub fn is_critical(self) -> bool {
        matches!(
            self,
            Field::ClientNom
                | Field::CommercialNom
                | Field::DevisNum
                | Field::FournitureHt
                | Field::PrestationsHt
        )
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a field value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Anchor-based heuristics.
    Auto,
    /// Set explicitly by the operator.
    Forced,
    /// The document had no legible text for this field.
    Unreadable,
    /// Filled by the LLM fallback.
    Llm,
    /// Filled by OCR re-extraction.
    Ocr,
}

/// Decoded quote identifier, e.g. `SRX2511AFF037501`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevisReference {
    /// Three-letter prefix (`SRX`).
    pub prefix: String,
    /// Year and month, `YYMM`.
    pub year_month: String,
    /// Three-letter type code (`AFF`).
    pub type_code: String,
    /// Six-digit sequence number.
    pub sequence: String,
}

impl DevisReference {
    /// Rebuild the compact identifier.
    pub fn full(&self) -> String {
        format!(
            "{}{}{}{}",
            self.prefix, self.year_month, self.type_code, self.sequence
        )
    }
}

impl fmt::Display for DevisReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full())
    }
}

/// Riser option of the staircase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Contremarches {
    Avec,
    Sans,
}

/// Stringer / structure kind of the staircase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureKind {
    Cremaillere,
    Limon,
    LimonDecoupe,
    LimonCentral,
}

/// Complete flat result of a quote parse.
///
/// Reference sub-fields are private so they can only be written as a whole
/// through [`DevisRecord::set_reference`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DevisRecord {
    devis_annee_mois: String,
    devis_type: String,
    devis_num: String,

    pub ref_affaire: String,
    pub date_devis: String,

    pub client_code: String,
    pub client_nom: String,
    pub client_contact: String,
    pub client_adresse1: String,
    pub client_adresse2: String,
    pub client_cp: String,
    pub client_ville: String,
    pub client_tel: String,
    pub client_email: String,

    pub commercial_nom: String,
    pub commercial_tel: String,
    pub commercial_tel2: String,
    pub commercial_email: String,

    pub fourniture_ht: String,
    pub prestations_ht: String,
    pub total_ht: String,

    pub esc_gamme: String,
    pub esc_essence: String,
    pub esc_finition_marches: String,
    pub esc_finition_structure: String,
    pub esc_finition_mains_courante: String,
    pub esc_finition_contremarche: String,
    pub esc_finition_rampe: String,
    pub esc_nez_de_marches: String,
    pub esc_tete_de_poteau: String,
    pub esc_poteaux_depart: String,
    pub esc_remplissage_rampant: String,
    pub esc_remplissage_etage: String,
    pub esc_remplissage_soubassement: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub esc_contremarches: Option<Contremarches>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub esc_structure: Option<StructureKind>,

    pub pose_sold: bool,
    pub pose_amount: String,

    pub parse_warning: String,
}

impl DevisRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn devis_annee_mois(&self) -> &str {
        &self.devis_annee_mois
    }

    pub fn devis_type(&self) -> &str {
        &self.devis_type
    }

    pub fn devis_num(&self) -> &str {
        &self.devis_num
    }

    /// Decoded reference, if all three parts are present.
    pub fn reference(&self, prefix: &str) -> Option<DevisReference> {
        if !self.has_reference() {
            return None;
        }
        Some(DevisReference {
            prefix: prefix.to_string(),
            year_month: self.devis_annee_mois.clone(),
            type_code: self.devis_type.clone(),
            sequence: self.devis_num.clone(),
        })
    }

    pub fn has_reference(&self) -> bool {
        !self.devis_annee_mois.is_empty()
            && !self.devis_type.is_empty()
            && !self.devis_num.is_empty()
    }

    /// Write or clear all reference sub-fields at once.
    pub fn set_reference(&mut self, reference: Option<&DevisReference>) {
        match reference {
            Some(r) => {
                self.devis_annee_mois = r.year_month.clone();
                self.devis_type = r.type_code.clone();
                self.devis_num = r.sequence.clone();
            }
            None => {
                self.devis_annee_mois.clear();
                self.devis_type.clear();
                self.devis_num.clear();
            }
        }
    }

    /// Value of a text field.
    pub fn get(&self, field: Field) -> &str {
        match field {
            Field::DevisAnneeMois => &self.devis_annee_mois,
            Field::DevisType => &self.devis_type,
            Field::DevisNum => &self.devis_num,
            other => self.slot(other).map(|s| s.as_str()).unwrap_or_default(),
        }
    }

    /// Set a text field. Reference sub-fields are refused (returns `false`);
    /// use [`DevisRecord::set_reference`] for those.
    pub fn set(&mut self, field: Field, value: impl Into<String>) -> bool {
        match self.slot_mut(field) {
            Some(slot) => {
                *slot = value.into();
                true
            }
            None => false,
        }
    }

    /// Iterate over every text field and its value.
    pub fn iter(&self) -> impl Iterator<Item = (Field, &str)> + '_ {
        Field::ALL.iter().map(move |f| (*f, self.get(*f)))
    }

    /// Critical fields that are still empty.
    pub fn missing_critical(&self) -> Vec<Field> {
        Field::ALL
            .iter()
            .copied()
            .filter(|f| f.is_critical() && self.get(*f).is_empty())
            .collect()
    }

    /// Flat key → string/boolean map used for snapshots.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    fn slot(&self, field: Field) -> Option<&String> {
        let slot = match field {
            Field::DevisAnneeMois | Field::DevisType | Field::DevisNum => return None,
            Field::RefAffaire => &self.ref_affaire,
            Field::DateDevis => &self.date_devis,
            Field::ClientCode => &self.client_code,
            Field::ClientNom => &self.client_nom,
            Field::ClientContact => &self.client_contact,
            Field::ClientAdresse1 => &self.client_adresse1,
            Field::ClientAdresse2 => &self.client_adresse2,
            Field::ClientCp => &self.client_cp,
            Field::ClientVille => &self.client_ville,
            Field::ClientTel => &self.client_tel,
            Field::ClientEmail => &self.client_email,
            Field::CommercialNom => &self.commercial_nom,
            Field::CommercialTel => &self.commercial_tel,
            Field::CommercialTel2 => &self.commercial_tel2,
            Field::CommercialEmail => &self.commercial_email,
            Field::FournitureHt => &self.fourniture_ht,
            Field::PrestationsHt => &self.prestations_ht,
            Field::TotalHt => &self.total_ht,
            Field::EscGamme => &self.esc_gamme,
            Field::EscEssence => &self.esc_essence,
            Field::EscFinitionMarches => &self.esc_finition_marches,
            Field::EscFinitionStructure => &self.esc_finition_structure,
            Field::EscFinitionMainsCourante => &self.esc_finition_mains_courante,
            Field::EscFinitionContremarche => &self.esc_finition_contremarche,
            Field::EscFinitionRampe => &self.esc_finition_rampe,
            Field::EscNezDeMarches => &self.esc_nez_de_marches,
            Field::EscTeteDePoteau => &self.esc_tete_de_poteau,
            Field::EscPoteauxDepart => &self.esc_poteaux_depart,
            Field::EscRemplissageRampant => &self.esc_remplissage_rampant,
            Field::EscRemplissageEtage => &self.esc_remplissage_etage,
            Field::EscRemplissageSoubassement => &self.esc_remplissage_soubassement,
            Field::PoseAmount => &self.pose_amount,
        };
        Some(slot)
    }

    fn slot_mut(&mut self, field: Field) -> Option<&mut String> {
        let slot = match field {
            Field::DevisAnneeMois | Field::DevisType | Field::DevisNum => return None,
            Field::RefAffaire => &mut self.ref_affaire,
            Field::DateDevis => &mut self.date_devis,
            Field::ClientCode => &mut self.client_code,
            Field::ClientNom => &mut self.client_nom,
            Field::ClientContact => &mut self.client_contact,
            Field::ClientAdresse1 => &mut self.client_adresse1,
            Field::ClientAdresse2 => &mut self.client_adresse2,
            Field::ClientCp => &mut self.client_cp,
            Field::ClientVille => &mut self.client_ville,
            Field::ClientTel => &mut self.client_tel,
            Field::ClientEmail => &mut self.client_email,
            Field::CommercialNom => &mut self.commercial_nom,
            Field::CommercialTel => &mut self.commercial_tel,
            Field::CommercialTel2 => &mut self.commercial_tel2,
            Field::CommercialEmail => &mut self.commercial_email,
            Field::FournitureHt => &mut self.fourniture_ht,
            Field::PrestationsHt => &mut self.prestations_ht,
            Field::TotalHt => &mut self.total_ht,
            Field::EscGamme => &mut self.esc_gamme,
            Field::EscEssence => &mut self.esc_essence,
            Field::EscFinitionMarches => &mut self.esc_finition_marches,
            Field::EscFinitionStructure => &mut self.esc_finition_structure,
            Field::EscFinitionMainsCourante => &mut self.esc_finition_mains_courante,
            Field::EscFinitionContremarche => &mut self.esc_finition_contremarche,
            Field::EscFinitionRampe => &mut self.esc_finition_rampe,
            Field::EscNezDeMarches => &mut self.esc_nez_de_marches,
            Field::EscTeteDePoteau => &mut self.esc_tete_de_poteau,
            Field::EscPoteauxDepart => &mut self.esc_poteaux_depart,
            Field::EscRemplissageRampant => &mut self.esc_remplissage_rampant,
            Field::EscRemplissageEtage => &mut self.esc_remplissage_etage,
            Field::EscRemplissageSoubassement => &mut self.esc_remplissage_soubassement,
            Field::PoseAmount => &mut self.pose_amount,
        };
        Some(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_reference() -> DevisReference {
        DevisReference {
            prefix: "SRX".to_string(),
            year_month: "2511".to_string(),
            type_code: "AFF".to_string(),
            sequence: "037501".to_string(),
        }
    }

    #[test]
    fn test_field_keys_roundtrip() {
        for field in Field::ALL {
            assert_eq!(Field::from_key(field.as_str()), Some(field));
        }
        assert_eq!(Field::from_key("unknown"), None);
    }

    #[test]
    fn test_reference_is_all_or_nothing() {
        let mut record = DevisRecord::new();
        assert!(!record.set(Field::DevisNum, "037501"));
        assert_eq!(record.devis_num(), "");

        record.set_reference(Some(&sample_reference()));
        assert!(record.has_reference());
        assert_eq!(record.get(Field::DevisAnneeMois), "2511");
        assert_eq!(record.reference("SRX").unwrap().full(), "SRX2511AFF037501");

        record.set_reference(None);
        assert_eq!(record.devis_annee_mois(), "");
        assert_eq!(record.devis_type(), "");
        assert_eq!(record.devis_num(), "");
    }

    #[test]
    fn test_missing_critical() {
        let mut record = DevisRecord::new();
        record.set(Field::ClientNom, "BERVAL MAISONS");
        record.set(Field::FournitureHt, "4 894,08");
        assert_eq!(
            record.missing_critical(),
            vec![Field::DevisNum, Field::CommercialNom, Field::PrestationsHt]
        );
    }

    #[test]
    fn test_snapshot_is_flat() {
        let mut record = DevisRecord::new();
        record.set_reference(Some(&sample_reference()));
        record.pose_sold = true;
        record.esc_structure = Some(StructureKind::LimonDecoupe);

        let json = record.to_json();
        assert_eq!(json["devis_num"], "037501");
        assert_eq!(json["pose_sold"], true);
        assert_eq!(json["esc_structure"], "limon_decoupe");
        assert!(json.get("esc_contremarches").is_none());
    }
}
