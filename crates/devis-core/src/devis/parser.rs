//! Quote parser chaining the anchor rules with fallback strategies.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::assembler::{AssembledRecord, WARNING_SEPARATOR};
use super::strategy::{
    AnchorPipeline, AnchorRegexStrategy, BlockGeometryStrategy, ExtractionStrategy,
    SourceDocument, StrategyKind,
};
use crate::error::{DevisError, ExtractionError, ProducerError};
use crate::models::config::{DevisConfig, PdfConfig};
use crate::models::devis::{DevisRecord, DevisReference, Field, Provenance};
use crate::pdf::{PdfExtractor, PdfProcessor};
use crate::producers::llm::LlmStrategy;
#[cfg(feature = "ocr")]
use crate::producers::ocr::OcrStrategy;

/// Result of quote extraction.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    /// Extracted record.
    pub record: DevisRecord,
    /// Origin of each filled field.
    pub provenance: BTreeMap<Field, Provenance>,
    /// Non-fatal warnings, also joined into `record.parse_warning`.
    pub warnings: Vec<String>,
    /// Strategies that contributed at least one field.
    pub strategies_used: Vec<StrategyKind>,
    /// Processing time in milliseconds.
    pub processing_time_ms: u64,
}

impl ExtractionResult {
    /// Overwrite the whole reference.
    pub fn force_reference(&mut self, reference: &DevisReference) {
        self.record.set_reference(Some(reference));
        for field in [Field::DevisAnneeMois, Field::DevisType, Field::DevisNum] {
            self.provenance.insert(field, Provenance::Forced);
        }
    }
}

/// Trait for quote parsing.
pub trait QuoteParser {
    /// Parse a quote from plain text.
    fn parse(&self, text: &str) -> Result<ExtractionResult, ExtractionError>;
}

/// Anchor rules first, then fallbacks while critical fields are missing.
pub struct DevisParser {
    pipeline: AnchorPipeline,
    fallbacks: Vec<Box<dyn ExtractionStrategy>>,
    enable_fallbacks: bool,
    pdf: PdfConfig,
}

impl DevisParser {
    /// Parser with default settings and the geometry fallback only.
    pub fn new() -> Self {
        Self::from_config(&DevisConfig::default())
    }

    /// Parser with the fallbacks enabled in `config`, in chain order.
    pub fn from_config(config: &DevisConfig) -> Self {
        let pipeline = AnchorPipeline::from_config(&config.extraction);

        let mut fallbacks: Vec<Box<dyn ExtractionStrategy>> =
            vec![Box::new(BlockGeometryStrategy::new(pipeline.clone()))];
        #[cfg(feature = "ocr")]
        if config.ocr.enabled {
            fallbacks.push(Box::new(OcrStrategy::from_config(
                &config.ocr,
                pipeline.clone(),
            )));
        }
        if config.llm.enabled {
            fallbacks.push(Box::new(LlmStrategy::from_config(
                &config.llm,
                &config.extraction,
            )));
        }

        Self {
            pipeline,
            fallbacks,
            enable_fallbacks: config.extraction.enable_fallbacks,
            pdf: config.pdf.clone(),
        }
    }

    /// Append a fallback strategy to the chain.
    pub fn with_fallback(mut self, strategy: Box<dyn ExtractionStrategy>) -> Self {
        self.fallbacks.push(strategy);
        self
    }

    /// Enable or disable the fallback chain.
    pub fn with_fallbacks_enabled(mut self, enabled: bool) -> Self {
        self.enable_fallbacks = enabled;
        self
    }

    /// Overwrite a field of `result` with an operator-supplied value.
    ///
    /// The value goes through the configured normalization and issuer filter.
    /// A refusal is recorded as a warning and leaves the field untouched.
    pub fn force(&self, result: &mut ExtractionResult, field: Field, value: &str) -> bool {
        let accepted = match self.pipeline.assembler().vet_override(field, value) {
            Ok(value) => {
                result.record.set(field, value);
                result.provenance.insert(field, Provenance::Forced);
                true
            }
            Err(reason) => {
                warn!("Refusing forced {}: {}", field, reason);
                if !result.warnings.contains(&reason) {
                    result.warnings.push(reason);
                }
                false
            }
        };
        result.record.parse_warning = result.warnings.join(WARNING_SEPARATOR);
        accepted
    }

    /// Fallback kinds, in chain order.
    pub fn fallback_kinds(&self) -> Vec<StrategyKind> {
        self.fallbacks.iter().map(|s| s.kind()).collect()
    }

    /// Parse text whose pages are already extracted.
    pub fn parse_pages(
        &self,
        filename: Option<&str>,
        pages: &[String],
    ) -> Result<ExtractionResult, ExtractionError> {
        self.parse_document(&SourceDocument {
            filename: filename.map(str::to_string),
            pages: pages.to_vec(),
            ..SourceDocument::default()
        })
    }

    /// Parse plain text, using `filename` for the reference when given.
    pub fn parse_text(
        &self,
        filename: Option<&str>,
        text: &str,
    ) -> Result<ExtractionResult, ExtractionError> {
        self.parse_document(&SourceDocument::from_text(filename, text))
    }

    /// Read a PDF file and parse it.
    pub fn parse_pdf(&self, path: &Path) -> Result<ExtractionResult, DevisError> {
        let bytes = std::fs::read(path)?;

        let mut extractor = PdfExtractor::new().with_config(self.pdf.clone());
        extractor.load(&bytes)?;
        let content = extractor.extract_all()?;
        let pdf_bytes = extractor.into_raw_data();
        debug!(
            "{}: {} pages, {:?}, {} text runs",
            path.display(),
            content.pages.len(),
            content.pdf_type,
            content.boxes.len()
        );

        let source = SourceDocument {
            filename: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            path: Some(path.to_path_buf()),
            pages: content.page_texts(),
            boxes: content.boxes,
            pdf_bytes: Some(pdf_bytes),
        };
        Ok(self.parse_document(&source)?)
    }

    /// Run the strategy chain over `source`.
    pub fn parse_document(
        &self,
        source: &SourceDocument,
    ) -> Result<ExtractionResult, ExtractionError> {
        let start = Instant::now();
        let assembler = self.pipeline.assembler();

        let primary = AnchorRegexStrategy::new(self.pipeline.clone());
        let mut result = primary
            .extract(source, &DevisRecord::new())
            .unwrap_or_else(|e| {
                let mut empty = AssembledRecord::default();
                empty.warn(e.to_string());
                empty
            });
        let mut strategies_used = vec![StrategyKind::AnchorRegex];

        if self.enable_fallbacks {
            for strategy in &self.fallbacks {
                let missing = result.missing_critical();
                if missing.is_empty() {
                    break;
                }
                let kind = strategy.kind();
                debug!("Trying {} for {:?}", kind, missing);

                match strategy.extract(source, &result.record) {
                    Ok(candidate) => {
                        result.client_anchor_found |= candidate.client_anchor_found;
                        let filled =
                            assembler.merge_gaps(&mut result, &candidate.record, strategy.provenance());
                        if !filled.is_empty() {
                            let names: Vec<&str> = filled.iter().map(|f| f.as_str()).collect();
                            result.warn(format!("complété par {}: {}", kind, names.join(", ")));
                            strategies_used.push(kind);
                        }
                    }
                    Err(ProducerError::NotApplicable(reason)) => {
                        debug!("{} not applicable: {}", kind, reason);
                    }
                    Err(e) => {
                        warn!("{} failed: {}", kind, e);
                        result.warn(format!("{} en échec: {}", kind, e));
                    }
                }
            }
        }

        let result = assembler.finish(result)?;
        let processing_time_ms = start.elapsed().as_millis() as u64;

        info!(
            "Parsed {} in {}ms ({} warnings, strategies {:?})",
            source.filename.as_deref().unwrap_or("<text>"),
            processing_time_ms,
            result.warnings.len(),
            strategies_used
        );

        Ok(ExtractionResult {
            record: result.record,
            provenance: result.provenance,
            warnings: result.warnings,
            strategies_used,
            processing_time_ms,
        })
    }
}

impl Default for DevisParser {
    fn default() -> Self {
        Self::new()
    }
}

impl QuoteParser for DevisParser {
    fn parse(&self, text: &str) -> Result<ExtractionResult, ExtractionError> {
        self.parse_text(None, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::devis::StructureKind;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const QUOTE: &str = "\
RIAUX ESCALIERS
ZA de Vaugarny
35560 BAZOUGES LA PEROUSE
Tél 02 99 97 45 40
Devis n° SRX2511AFF037501
Date du devis : 03/11/2025
Réf affaire : MAISON LEFEBVRE
Code client : C0042
BERVAL MAISONS
7 ALLEE DES ACACIAS
77100 MAREUIL LES MEAUX
Contact commercial : Julien LEROY
06 12 34 56 78
Gamme : EXCELLENCE
Essence : Chêne
Structure : limon découpé
PRIX DE LA FOURNITURE HT : 4 894,08
PRESTATIONS
Pose de l'escalier 1 250,00
PRIX DES PRESTATIONS ET SERVICES HT : 1 250,00
TOTAL HT : 6 144,08";

    struct StubStrategy {
        record: DevisRecord,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl ExtractionStrategy for StubStrategy {
        fn kind(&self) -> StrategyKind {
            StrategyKind::LlmFallback
        }

        fn provenance(&self) -> Provenance {
            Provenance::Llm
        }

        fn extract(
            &self,
            _source: &SourceDocument,
            _hint: &DevisRecord,
        ) -> Result<AssembledRecord, ProducerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProducerError::Timeout(60));
            }
            Ok(AssembledRecord {
                record: self.record.clone(),
                ..AssembledRecord::default()
            })
        }
    }

    fn stub(record: DevisRecord, fail: bool) -> (Box<StubStrategy>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let strategy = Box::new(StubStrategy {
            record,
            calls: calls.clone(),
            fail,
        });
        (strategy, calls)
    }

    #[test]
    fn test_parse_complete_quote() {
        let (strategy, calls) = stub(DevisRecord::new(), false);
        let parser = DevisParser::new().with_fallback(strategy);
        let result = parser.parse(QUOTE).unwrap();

        let record = &result.record;
        assert_eq!(record.devis_annee_mois(), "2511");
        assert_eq!(record.devis_num(), "037501");
        assert_eq!(record.client_nom, "BERVAL MAISONS");
        assert_eq!(record.client_cp, "77100");
        assert_eq!(record.commercial_nom, "Julien LEROY");
        assert_eq!(record.fourniture_ht, "4 894,08");
        assert_eq!(record.prestations_ht, "1 250,00");
        assert_eq!(record.total_ht, "6 144,08");
        assert_eq!(record.esc_structure, Some(StructureKind::LimonDecoupe));
        assert!(record.pose_sold);
        assert_eq!(result.strategies_used, vec![StrategyKind::AnchorRegex]);
        // nothing critical missing, so no fallback ran
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_fallback_fills_gaps_only() {
        let text = QUOTE.replace("Contact commercial : Julien LEROY", "Contact commercial :");
        let mut candidate = DevisRecord::new();
        candidate.set(Field::CommercialNom, "Sophie MARTIN");
        candidate.set(Field::ClientNom, "AUTRE");
        let (strategy, calls) = stub(candidate, false);

        let parser = DevisParser::new().with_fallback(strategy);
        let result = parser.parse_text(None, &text).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.record.commercial_nom, "Sophie MARTIN");
        assert_eq!(result.record.client_nom, "BERVAL MAISONS");
        assert_eq!(
            result.provenance.get(&Field::CommercialNom),
            Some(&Provenance::Llm)
        );
        assert_eq!(
            result.strategies_used,
            vec![StrategyKind::AnchorRegex, StrategyKind::LlmFallback]
        );
        assert!(result
            .record
            .parse_warning
            .contains("complété par llm_fallback: commercial_nom"));
    }

    #[test]
    fn test_fallback_failure_becomes_warning() {
        let text = QUOTE.replace("Contact commercial : Julien LEROY", "Contact commercial :");
        let (strategy, _) = stub(DevisRecord::new(), true);
        let parser = DevisParser::new().with_fallback(strategy);
        let result = parser.parse_text(None, &text).unwrap();
        assert_eq!(result.record.commercial_nom, "");
        assert!(result.warnings.iter().any(|w| w.contains("llm_fallback en échec")));
    }

    #[test]
    fn test_fallbacks_disabled() {
        let text = QUOTE.replace("Contact commercial : Julien LEROY", "Contact commercial :");
        let (strategy, calls) = stub(DevisRecord::new(), false);
        let parser = DevisParser::new()
            .with_fallback(strategy)
            .with_fallbacks_enabled(false);
        parser.parse_text(None, &text).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_client_anchor_is_fatal() {
        let err = DevisParser::new()
            .parse("PRIX DE LA FOURNITURE HT : 100,00")
            .unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::MissingAnchor { anchor: "Code client", .. }
        ));
    }

    #[test]
    fn test_fallback_can_rescue_missing_anchor() {
        let mut candidate = DevisRecord::new();
        candidate.set(Field::ClientNom, "DUPONT");
        let (strategy, _) = stub(candidate, false);
        let result = DevisParser::new()
            .with_fallback(strategy)
            .parse("PRIX DE LA FOURNITURE HT : 100,00")
            .unwrap();
        assert_eq!(result.record.client_nom, "DUPONT");
        assert_eq!(result.record.fourniture_ht, "100,00");
    }

    #[test]
    fn test_force_refuses_issuer_data() {
        let parser = DevisParser::new();
        let mut result = parser.parse(QUOTE).unwrap();
        assert!(!parser.force(&mut result, Field::ClientVille, "BAZOUGES LA PEROUSE"));
        assert_eq!(result.record.client_ville, "MAREUIL LES MEAUX");
        assert!(result.record.parse_warning.contains("client_ville refusé"));

        assert!(parser.force(&mut result, Field::RefAffaire, "CHANTIER B"));
        assert_eq!(result.record.ref_affaire, "CHANTIER B");
        assert_eq!(result.provenance.get(&Field::RefAffaire), Some(&Provenance::Forced));
    }

    #[test]
    fn test_force_normalizes_amounts() {
        let parser = DevisParser::new();
        let mut result = parser.parse(QUOTE).unwrap();
        assert!(parser.force(&mut result, Field::FournitureHt, "4894.08"));
        assert_eq!(result.record.fourniture_ht, "4 894,08");
        assert!(!parser.force(&mut result, Field::TotalHt, "n/a"));
    }

    #[test]
    fn test_force_keeps_required_fields() {
        let parser = DevisParser::new();
        let mut result = parser.parse(QUOTE).unwrap();
        assert!(!parser.force(&mut result, Field::ClientNom, ""));
        assert_eq!(result.record.client_nom, "BERVAL MAISONS");
        assert!(!parser.force(&mut result, Field::FournitureHt, "  "));
        assert!(!result.record.fourniture_ht.is_empty());
        assert!(parser.force(&mut result, Field::ClientEmail, ""));
        assert_eq!(result.record.client_email, "");
    }

    #[test]
    fn test_force_uses_configured_markers() {
        let mut config = DevisConfig::default();
        config.extraction.extra_contamination_markers = vec!["ACME".to_string()];
        let parser = DevisParser::from_config(&config);
        let mut result = parser.parse(QUOTE).unwrap();
        assert!(!parser.force(&mut result, Field::ClientNom, "ACME ESCALIERS"));
        assert_eq!(result.record.client_nom, "BERVAL MAISONS");
        assert!(DevisParser::new().force(&mut result, Field::ClientNom, "ACME ESCALIERS"));
    }

    #[test]
    fn test_force_rewrites_parse_warning() {
        let parser = DevisParser::new();
        let mut result = parser.parse(QUOTE).unwrap();
        let before = result.warnings.len();
        assert!(!parser.force(&mut result, Field::ClientTel, "02-99-97-45-40"));
        assert_eq!(result.warnings.len(), before + 1);
        assert_eq!(result.record.parse_warning, result.warnings.join(" | "));
    }

    #[cfg(feature = "ocr")]
    #[test]
    fn test_default_fallback_chain() {
        let mut config = DevisConfig::default();
        assert_eq!(
            DevisParser::from_config(&config).fallback_kinds(),
            vec![StrategyKind::BlockGeometry]
        );
        config.ocr.enabled = true;
        config.llm.enabled = true;
        assert_eq!(
            DevisParser::from_config(&config).fallback_kinds(),
            vec![
                StrategyKind::BlockGeometry,
                StrategyKind::OcrFallback,
                StrategyKind::LlmFallback
            ]
        );
    }
}
