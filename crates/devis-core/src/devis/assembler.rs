//! Merging of extraction fragments into a [`DevisRecord`].

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::anchors::AnchorFields;
use super::rules::amounts::{normalize_amount, DevisAmounts};
use super::rules::contamination::ContaminationFilter;
use super::rules::pose::PoseOutcome;
use crate::error::ExtractionError;
use crate::models::devis::{DevisRecord, DevisReference, Field, Provenance};

/// Warning for a document without legible text.
pub const UNREADABLE_DOCUMENT: &str = "document illisible";

/// Separator of `parse_warning`.
pub const WARNING_SEPARATOR: &str = " | ";

/// Results of the individual anchor-based extractors.
#[derive(Debug, Clone)]
pub struct Fragments {
    pub reference: Option<DevisReference>,
    pub anchors: AnchorFields,
    pub amounts: DevisAmounts,
    pub pose: PoseOutcome,
    pub warnings: Vec<String>,
}

/// Record under construction, with per-field provenance.
#[derive(Debug, Clone, Default)]
pub struct AssembledRecord {
    pub record: DevisRecord,
    pub provenance: BTreeMap<Field, Provenance>,
    pub warnings: Vec<String>,
    /// `Code client` appeared in the text.
    pub client_anchor_found: bool,
}

impl AssembledRecord {
    /// Append a warning once.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.warnings.contains(&message) {
            self.warnings.push(message);
        }
    }

    /// Critical fields still empty.
    pub fn missing_critical(&self) -> Vec<Field> {
        self.record.missing_critical()
    }
}

/// Combines fragments, fills gaps from fallbacks and enforces the
/// no-issuer-data invariant on counterparty fields.
#[derive(Debug, Clone)]
pub struct Assembler {
    filter: ContaminationFilter,
    prefix: String,
}

impl Assembler {
    pub fn new(filter: ContaminationFilter) -> Self {
        Self {
            filter,
            prefix: "SRX".to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Build the first record from the anchor-based fragments.
    pub fn assemble(&self, fragments: Fragments) -> AssembledRecord {
        let mut result = AssembledRecord {
            client_anchor_found: fragments.anchors.client_anchor_found,
            ..AssembledRecord::default()
        };

        if let Some(reference) = &fragments.reference {
            result.record.set_reference(Some(reference));
            for field in [Field::DevisAnneeMois, Field::DevisType, Field::DevisNum] {
                result.provenance.insert(field, Provenance::Auto);
            }
        }

        for (field, value) in fragments.anchors.fields() {
            self.accept(&mut result, field, value, Provenance::Auto);
        }
        result.record.esc_contremarches = fragments.anchors.specs.contremarches;
        result.record.esc_structure = fragments.anchors.specs.structure;

        for (field, value) in [
            (Field::FournitureHt, fragments.amounts.fourniture_ht.as_str()),
            (Field::PrestationsHt, fragments.amounts.prestations_ht.as_str()),
            (Field::TotalHt, fragments.amounts.total_ht.as_str()),
        ] {
            self.accept(&mut result, field, value, Provenance::Auto);
        }

        result.record.pose_sold = fragments.pose.sold;
        result.record.pose_amount = fragments.pose.amount.clone();
        result
            .provenance
            .insert(Field::PoseAmount, fragments.pose.provenance);
        if fragments.pose.provenance == Provenance::Unreadable {
            result.warn(UNREADABLE_DOCUMENT);
        }

        for warning in fragments.warnings {
            result.warn(warning);
        }

        result
    }

    /// Fill the empty fields of `base` from `candidate`.
    ///
    /// Never overwrites a value. The reference is taken as a whole, amounts are
    /// normalized and counterparty values are checked for issuer data.
    /// Returns the fields that were filled.
    pub fn merge_gaps(
        &self,
        base: &mut AssembledRecord,
        candidate: &DevisRecord,
        provenance: Provenance,
    ) -> Vec<Field> {
        let mut filled = Vec::new();

        if !base.record.has_reference() {
            if let Some(reference) = candidate.reference(&self.prefix) {
                base.record.set_reference(Some(&reference));
                for field in [Field::DevisAnneeMois, Field::DevisType, Field::DevisNum] {
                    base.provenance.insert(field, provenance);
                    filled.push(field);
                }
            }
        }

        for field in Field::ALL.iter().copied().filter(|f| !f.is_reference()) {
            if !base.record.get(field).is_empty() {
                continue;
            }
            if field == Field::PoseAmount
                && base.provenance.get(&Field::PoseAmount) != Some(&Provenance::Unreadable)
            {
                continue;
            }
            if self.accept(base, field, candidate.get(field), provenance) {
                filled.push(field);
            }
        }

        if base.provenance.get(&Field::PoseAmount) == Some(&Provenance::Unreadable)
            && candidate.pose_sold
        {
            base.record.pose_sold = true;
            base.provenance.insert(Field::PoseAmount, provenance);
        }
        if base.record.esc_contremarches.is_none() {
            base.record.esc_contremarches = candidate.esc_contremarches;
        }
        if base.record.esc_structure.is_none() {
            base.record.esc_structure = candidate.esc_structure;
        }

        debug!("Merged {} field(s) from {:?}", filled.len(), provenance);
        filled
    }

    /// Final contamination pass over the counterparty fields.
    pub fn sanitize_record(&self, result: &mut AssembledRecord) {
        for field in Field::COUNTERPARTY {
            let value = result.record.get(field);
            if value.is_empty() || !self.filter.is_contaminated(value) {
                continue;
            }
            warn!("Clearing {} holding issuer data: {:?}", field, value);
            result.record.set(field, String::new());
            result.provenance.remove(&field);
            result.warn(format!("{} vidé (coordonnées de l'émetteur)", field));
        }
    }

    /// Sanitize, write `parse_warning` and apply the fatality policy.
    pub fn finish(&self, mut result: AssembledRecord) -> Result<AssembledRecord, ExtractionError> {
        self.sanitize_record(&mut result);
        result.record.parse_warning = result.warnings.join(WARNING_SEPARATOR);
        self.check_fatal(&result)?;
        Ok(result)
    }

    /// Fail when a required field is still empty.
    pub fn check_fatal(&self, result: &AssembledRecord) -> Result<(), ExtractionError> {
        let warnings = result.warnings.join(WARNING_SEPARATOR);

        if result.record.client_nom.is_empty() {
            if !result.client_anchor_found {
                return Err(ExtractionError::MissingAnchor {
                    anchor: "Code client",
                    field: Field::ClientNom,
                    warnings,
                });
            }
            return Err(ExtractionError::MissingField {
                field: Field::ClientNom,
                warnings,
            });
        }

        if result.record.fourniture_ht.is_empty() {
            return Err(ExtractionError::MissingField {
                field: Field::FournitureHt,
                warnings,
            });
        }

        Ok(())
    }

    /// Normalized operator value for `field`, or the reason it is refused.
    ///
    /// Required and critical fields cannot be cleared. Reference sub-fields
    /// are only forced through the whole reference.
    pub fn vet_override(&self, field: Field, value: &str) -> Result<String, String> {
        let value = value.trim();
        if field.is_reference() {
            return Err(format!("{} se modifie via la référence complète", field));
        }
        if value.is_empty() {
            if field.is_required() || field.is_critical() {
                return Err(format!("{} obligatoire, valeur vide refusée", field));
            }
            return Ok(String::new());
        }

        let value = if field.is_amount() {
            let normalized = normalize_amount(value);
            if normalized.is_empty() {
                return Err(format!("{} non numérique: {}", field, value));
            }
            normalized
        } else {
            value.to_string()
        };

        if field.is_counterparty() && self.filter.is_contaminated(&value) {
            return Err(format!("{} refusé (coordonnées de l'émetteur)", field));
        }
        Ok(value)
    }

    /// Store `value` in an empty field after normalization and contamination checks.
    fn accept(
        &self,
        result: &mut AssembledRecord,
        field: Field,
        value: &str,
        provenance: Provenance,
    ) -> bool {
        let value = value.trim();
        if value.is_empty() {
            return false;
        }

        let value = if field.is_amount() {
            let normalized = normalize_amount(value);
            if normalized.is_empty() {
                result.warn(format!("{} non numérique: {}", field, value));
                return false;
            }
            normalized
        } else {
            value.to_string()
        };

        if field.is_counterparty() && self.filter.is_contaminated(&value) {
            warn!("Rejected {} candidate holding issuer data: {:?}", field, value);
            result.warn(format!("{} rejeté (coordonnées de l'émetteur)", field));
            return false;
        }

        if result.record.set(field, value) {
            result.provenance.insert(field, provenance);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devis::anchors::Counterparty;
    use pretty_assertions::assert_eq;

    fn fragments() -> Fragments {
        Fragments {
            reference: Some(DevisReference {
                prefix: "SRX".to_string(),
                year_month: "2511".to_string(),
                type_code: "AFF".to_string(),
                sequence: "037501".to_string(),
            }),
            anchors: AnchorFields {
                client_anchor_found: true,
                client: Counterparty {
                    nom: "BERVAL MAISONS".to_string(),
                    ..Counterparty::default()
                },
                ..AnchorFields::default()
            },
            amounts: DevisAmounts {
                fourniture_ht: "4894.08".to_string(),
                ..DevisAmounts::default()
            },
            pose: PoseOutcome {
                sold: false,
                amount: String::new(),
                provenance: Provenance::Auto,
            },
            warnings: vec!["ancre 'Contact commercial' introuvable".to_string()],
        }
    }

    fn assembler() -> Assembler {
        Assembler::new(ContaminationFilter::new())
    }

    #[test]
    fn test_assemble_and_finish() {
        let assembler = assembler();
        let result = assembler.finish(assembler.assemble(fragments())).unwrap();
        assert_eq!(result.record.client_nom, "BERVAL MAISONS");
        assert_eq!(result.record.fourniture_ht, "4 894,08");
        assert_eq!(result.record.devis_num(), "037501");
        assert_eq!(
            result.record.parse_warning,
            "ancre 'Contact commercial' introuvable"
        );
        assert_eq!(result.provenance.get(&Field::ClientNom), Some(&Provenance::Auto));
    }

    #[test]
    fn test_contaminated_candidate_is_rejected() {
        let assembler = assembler();
        let mut fragments = fragments();
        fragments.anchors.client.adresse1 = "ZA de Vaugarny".to_string();
        let result = assembler.assemble(fragments);
        assert_eq!(result.record.client_adresse1, "");
        assert!(result.warnings.iter().any(|w| w.contains("client_adresse1")));
    }

    #[test]
    fn test_sanitize_clears_contaminated_field() {
        let assembler = assembler();
        let mut result = assembler.assemble(fragments());
        result.record.client_ville = "BAZOUGES LA PEROUSE".to_string();
        assembler.sanitize_record(&mut result);
        assert_eq!(result.record.client_ville, "");
        for field in Field::COUNTERPARTY {
            assert!(!ContaminationFilter::new().is_contaminated(result.record.get(field)));
        }
    }

    #[test]
    fn test_merge_gaps_never_overwrites() {
        let assembler = assembler();
        let mut base = assembler.assemble(fragments());

        let mut candidate = DevisRecord::new();
        candidate.set(Field::ClientNom, "AUTRE CLIENT");
        candidate.set(Field::CommercialNom, "Julien LEROY");
        candidate.set(Field::PrestationsHt, "1250");
        candidate.set(Field::ClientTel, "02 99 97 45 40");

        let filled = assembler.merge_gaps(&mut base, &candidate, Provenance::Llm);
        assert_eq!(filled, vec![Field::CommercialNom, Field::PrestationsHt]);
        assert_eq!(base.record.client_nom, "BERVAL MAISONS");
        assert_eq!(base.record.prestations_ht, "1 250,00");
        assert_eq!(base.record.client_tel, "");
        assert_eq!(base.provenance.get(&Field::CommercialNom), Some(&Provenance::Llm));
    }

    #[test]
    fn test_merge_reference_as_unit() {
        let assembler = assembler();
        let mut fragments = fragments();
        fragments.reference = None;
        let mut base = assembler.assemble(fragments);

        let mut candidate = DevisRecord::new();
        candidate.set_reference(Some(&DevisReference {
            prefix: "SRX".to_string(),
            year_month: "2512".to_string(),
            type_code: "AFF".to_string(),
            sequence: "000123".to_string(),
        }));
        assembler.merge_gaps(&mut base, &candidate, Provenance::Ocr);
        assert_eq!(base.record.devis_annee_mois(), "2512");
        assert_eq!(base.record.devis_num(), "000123");
        assert_eq!(base.provenance.get(&Field::DevisType), Some(&Provenance::Ocr));
    }

    #[test]
    fn test_missing_anchor_is_fatal() {
        let assembler = assembler();
        let mut fragments = fragments();
        fragments.anchors = AnchorFields::default();
        let err = assembler.finish(assembler.assemble(fragments)).unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::MissingAnchor { anchor: "Code client", .. }
        ));
        assert_eq!(err.field(), Field::ClientNom);
    }

    #[test]
    fn test_missing_fourniture_is_fatal() {
        let assembler = assembler();
        let mut fragments = fragments();
        fragments.amounts = DevisAmounts::default();
        let err = assembler.finish(assembler.assemble(fragments)).unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::MissingField { field: Field::FournitureHt, .. }
        ));
        assert!(err.warnings().contains("Contact commercial"));
    }

    #[test]
    fn test_vet_override() {
        let assembler = Assembler::new(ContaminationFilter::new().with_extra_markers(&["ACME"]));
        assert_eq!(
            assembler.vet_override(Field::FournitureHt, "4894.08"),
            Ok("4 894,08".to_string())
        );
        assert_eq!(
            assembler.vet_override(Field::RefAffaire, "  CHANTIER B "),
            Ok("CHANTIER B".to_string())
        );
        assert_eq!(assembler.vet_override(Field::ClientEmail, ""), Ok(String::new()));
        assert!(assembler.vet_override(Field::ClientNom, " ").is_err());
        assert!(assembler.vet_override(Field::CommercialNom, "").is_err());
        assert!(assembler.vet_override(Field::PrestationsHt, "beaucoup").is_err());
        assert!(assembler.vet_override(Field::ClientNom, "ACME Corp").is_err());
        assert!(assembler.vet_override(Field::ClientTel, "+33 2 99 97 45 40").is_err());
        assert!(assembler.vet_override(Field::DevisNum, "000123").is_err());
    }

    #[test]
    fn test_issuer_phone_variants_never_reach_client() {
        use crate::devis::anchors::AnchorExtractor;
        use crate::devis::lines::LineSequence;

        let filter = ContaminationFilter::new();
        let assembler = Assembler::new(filter.clone());
        let extractor = AnchorExtractor::new(filter);
        for phone in ["Tél 02-99-97-45-40", "Tél +33 2 99 97 45 40"] {
            let lines = LineSequence::from_lines(&["Code client", "DUPONT", "3 rue Haute", phone]);
            let (anchors, warnings) = extractor.extract(&lines);
            let mut fragments = fragments();
            fragments.anchors = anchors;
            fragments.warnings = warnings;
            let result = assembler.finish(assembler.assemble(fragments)).unwrap();
            assert_eq!(result.record.client_nom, "DUPONT");
            assert_eq!(result.record.client_tel, "", "{phone} leaked");
        }
    }

    #[test]
    fn test_unreadable_pose_is_reported() {
        let assembler = assembler();
        let mut fragments = fragments();
        fragments.pose.provenance = Provenance::Unreadable;
        let result = assembler.assemble(fragments);
        assert!(result.warnings.contains(&UNREADABLE_DOCUMENT.to_string()));
    }
}
