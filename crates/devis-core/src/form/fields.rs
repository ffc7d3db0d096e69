//! Mapping of a [`DevisRecord`] onto the BDC form vocabulary.

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;

use crate::models::devis::{Contremarches, DevisRecord, StructureKind};

/// Value written into a checked checkbox.
pub const CHECKBOX_ON: &str = "/Yes";

/// Fields that must hold a value in the generated PDF when one was expected.
pub const MANDATORY_FIELDS: [&str; 3] = ["bdc_client_nom", "bdc_ref_affaire", "bdc_devis_annee_mois"];

const MAX_FILE_NAME_CHARS: usize = 150;

/// Form field name to value. Checkboxes hold [`CHECKBOX_ON`].
pub type FieldValues = BTreeMap<String, String>;

lazy_static! {
    static ref REF_AFFAIRE_LABEL: Regex = Regex::new(r"(?i)^r[ée]f\.?\s+affaire\s*:?\s*").unwrap();
    static ref INVALID_FILE_CHARS: Regex = Regex::new(r#"[\\/:*?"<>|]"#).unwrap();
    static ref SPACES: Regex = Regex::new(r"\s+").unwrap();
}

/// Build the purchase-order field values. Empty values are left out.
pub fn build_field_values(record: &DevisRecord, prefix: &str) -> FieldValues {
    let mut values = FieldValues::new();

    let mut text = |field: &str, value: &str| {
        let value = value.trim();
        if !value.is_empty() {
            values.insert(field.to_string(), value.to_string());
        }
    };

    let reference = record
        .reference(prefix)
        .map(|r| r.full())
        .unwrap_or_default();
    text("bdc_devis_annee_mois", &reference);
    text("bdc_ref_affaire", &record.ref_affaire);
    text("bdc_client_nom", &record.client_nom);
    text("bdc_client_adresse", &client_address(record));
    text("bdc_client_cp", &record.client_cp);
    text("bdc_client_ville", &record.client_ville);
    text("bdc_commercial_nom", &record.commercial_nom);

    text("bdc_esc_gamme", &record.esc_gamme);
    text("bdc_esc_essence", &record.esc_essence);
    text("bdc_esc_tete_de_poteau", &record.esc_tete_de_poteau);
    text("bdc_esc_finition_marches", &record.esc_finition_marches);
    text("bdc_esc_finition_contremarche", &record.esc_finition_contremarche);
    text("bdc_esc_finition_structure", &record.esc_finition_structure);
    text("bdc_esc_finition_mains_courante", &record.esc_finition_mains_courante);
    text("bdc_esc_finition_rampe", &record.esc_finition_rampe);
    text(
        "bdc_esc_section_remplissage_garde_corps_rampant",
        &record.esc_remplissage_rampant,
    );
    text(
        "bdc_esc_section_remplissage_garde_corps_etage",
        &record.esc_remplissage_etage,
    );
    text(
        "bdc_esc_remplissage_garde_corps_soubassement",
        &record.esc_remplissage_soubassement,
    );

    text("bdc_montant_fourniture_ht", &record.fourniture_ht);
    text("bdc_montant_pose_ht", &record.prestations_ht);

    if record.pose_sold {
        let mut bloc = client_address(record);
        if !record.client_cp.is_empty() && !record.client_ville.is_empty() {
            bloc.push('\n');
            bloc.push_str(&format!("{} {}", record.client_cp, record.client_ville));
        }
        text("bdc_livraison_bloc", &bloc);
    }

    let mut check = |field: &str, checked: bool| {
        if checked {
            values.insert(field.to_string(), CHECKBOX_ON.to_string());
        }
    };

    match record.esc_contremarches {
        Some(Contremarches::Avec) => check("bdc_chk_avec-contre-marches", true),
        Some(Contremarches::Sans) => check("bdc_chk_avec-sans-marches", true),
        None => {}
    }

    if let Some(structure) = record.esc_structure {
        let field = match structure {
            StructureKind::Cremaillere => "bdc_chk_cremaillere",
            StructureKind::Limon => "bdc_chk_limon",
            StructureKind::LimonDecoupe => "bdc_chk_limon_decoupe",
            StructureKind::LimonCentral => "bdc_chk_limon_centrale",
        };
        check(field, true);
    }

    check("bdc_chk_livraison_poseur", record.pose_sold);
    check("bdc_chk_autoliquidation", record.pose_sold);
    check("bdc_chk_livraison_client", !record.pose_sold);

    values
}

fn client_address(record: &DevisRecord) -> String {
    [record.client_adresse1.trim(), record.client_adresse2.trim()]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(", ")
}

/// `CDE <client> Ref <affaire>.pdf`, safe for any filesystem.
pub fn output_file_name(record: &DevisRecord) -> String {
    let client = match record.client_nom.trim() {
        "" => "CLIENT",
        name => name,
    };
    let affaire = REF_AFFAIRE_LABEL.replace(record.ref_affaire.trim(), "");
    let affaire = match affaire.trim() {
        "" => "REF",
        value => value,
    };

    let base = format!("CDE {} Ref {}", client, affaire);
    let base = INVALID_FILE_CHARS.replace_all(&base, " ");
    let base = SPACES.replace_all(&base, " ");

    let max_chars = MAX_FILE_NAME_CHARS - ".pdf".len();
    let base: String = base.trim().chars().take(max_chars).collect();
    format!("{}.pdf", base.trim_end())
}
