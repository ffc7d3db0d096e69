//! Extraction strategies producing the same record shape.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use tracing::debug;

use super::anchors::AnchorExtractor;
use super::assembler::{AssembledRecord, Assembler, Fragments};
use super::lines::LineSequence;
use super::rules::amounts::extract_amounts;
use super::rules::contamination::ContaminationFilter;
use super::rules::pose::PoseDetector;
use super::rules::reference::ReferenceDecoder;
use crate::error::ProducerError;
use crate::models::config::ExtractionConfig;
use crate::models::devis::{DevisRecord, Provenance};
use crate::producers::geometry::{group_lines, TextBox, LINE_TOLERANCE};

/// Output of a strategy: a record with provenance and warnings.
pub type StrategyOutput = AssembledRecord;

/// Strategy variants, in the order the parser chains them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    AnchorRegex,
    BlockGeometry,
    OcrFallback,
    LlmFallback,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::AnchorRegex => "anchor_regex",
            StrategyKind::BlockGeometry => "block_geometry",
            StrategyKind::OcrFallback => "ocr_fallback",
            StrategyKind::LlmFallback => "llm_fallback",
        };
        f.write_str(name)
    }
}

/// Everything known about the source document.
#[derive(Debug, Clone, Default)]
pub struct SourceDocument {
    /// File name, searched first for the reference.
    pub filename: Option<String>,
    /// File on disk, for producers that need one.
    pub path: Option<PathBuf>,
    /// Embedded text per page.
    pub pages: Vec<String>,
    /// Positioned text runs, when available.
    pub boxes: Vec<TextBox>,
    /// Raw PDF bytes.
    pub pdf_bytes: Option<Vec<u8>>,
}

impl SourceDocument {
    /// Document made of plain text only.
    pub fn from_text(filename: Option<&str>, text: &str) -> Self {
        Self {
            filename: filename.map(str::to_string),
            pages: vec![text.to_string()],
            ..Self::default()
        }
    }

    pub fn lines(&self) -> LineSequence {
        LineSequence::from_pages(&self.pages)
    }

    pub fn text(&self) -> String {
        self.pages.join("\n")
    }
}

/// One way of producing a record from a source document.
pub trait ExtractionStrategy {
    fn kind(&self) -> StrategyKind;

    /// Provenance stamped on the fields this strategy fills.
    fn provenance(&self) -> Provenance;

    /// Produce a candidate record. `hint` is the record built so far.
    fn extract(
        &self,
        source: &SourceDocument,
        hint: &DevisRecord,
    ) -> Result<StrategyOutput, ProducerError>;
}

/// The anchor extractors chained over one line sequence.
#[derive(Debug, Clone)]
pub struct AnchorPipeline {
    reference: ReferenceDecoder,
    anchors: AnchorExtractor,
    pose: PoseDetector,
    assembler: Assembler,
}

impl AnchorPipeline {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        let filter =
            ContaminationFilter::new().with_extra_markers(&config.extra_contamination_markers);
        let reference = ReferenceDecoder::with_prefix(&config.reference_prefix);
        Self {
            anchors: AnchorExtractor::from_config(config, filter.clone()),
            pose: PoseDetector::with_placeholders(&config.pose_placeholder_amounts),
            assembler: Assembler::new(filter).with_prefix(reference.prefix()),
            reference,
        }
    }

    pub fn assembler(&self) -> &Assembler {
        &self.assembler
    }

    /// Run every extractor over `lines`.
    pub fn fragments(&self, filename: Option<&str>, lines: &LineSequence) -> Fragments {
        let mut warnings = Vec::new();

        let reference = match self.reference.decode(filename, lines) {
            Some((reference, source)) => {
                debug!("Reference {} from {:?}", reference, source);
                Some(reference)
            }
            None => {
                warnings.push("référence devis introuvable".to_string());
                None
            }
        };

        let (anchors, anchor_warnings) = self.anchors.extract(lines);
        warnings.extend(anchor_warnings);

        let amounts = extract_amounts(lines);
        if amounts.fourniture_ht.is_empty() {
            warnings.push("prix de la fourniture HT introuvable".to_string());
        }

        Fragments {
            reference,
            anchors,
            amounts,
            pose: self.pose.detect(lines),
            warnings,
        }
    }

    /// Fragments assembled into a record (not yet sanitized or checked).
    pub fn run(&self, filename: Option<&str>, lines: &LineSequence) -> AssembledRecord {
        self.assembler.assemble(self.fragments(filename, lines))
    }
}

impl Default for AnchorPipeline {
    fn default() -> Self {
        Self::from_config(&ExtractionConfig::default())
    }
}

/// Anchor and regex rules over the embedded text lines.
#[derive(Debug, Clone, Default)]
pub struct AnchorRegexStrategy {
    pipeline: AnchorPipeline,
}

impl AnchorRegexStrategy {
    pub fn new(pipeline: AnchorPipeline) -> Self {
        Self { pipeline }
    }
}

impl ExtractionStrategy for AnchorRegexStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::AnchorRegex
    }

    fn provenance(&self) -> Provenance {
        Provenance::Auto
    }

    fn extract(
        &self,
        source: &SourceDocument,
        _hint: &DevisRecord,
    ) -> Result<StrategyOutput, ProducerError> {
        Ok(self.pipeline.run(source.filename.as_deref(), &source.lines()))
    }
}

/// Same rules over lines rebuilt from text positions.
///
/// Helps when the text layer interleaves columns.
#[derive(Debug, Clone, Default)]
pub struct BlockGeometryStrategy {
    pipeline: AnchorPipeline,
}

impl BlockGeometryStrategy {
    pub fn new(pipeline: AnchorPipeline) -> Self {
        Self { pipeline }
    }
}

impl ExtractionStrategy for BlockGeometryStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BlockGeometry
    }

    fn provenance(&self) -> Provenance {
        Provenance::Auto
    }

    fn extract(
        &self,
        source: &SourceDocument,
        _hint: &DevisRecord,
    ) -> Result<StrategyOutput, ProducerError> {
        if source.boxes.is_empty() {
            return Err(ProducerError::NotApplicable(
                "no positioned text".to_string(),
            ));
        }
        let lines = LineSequence::from_lines(group_lines(&source.boxes, LINE_TOLERANCE));
        Ok(self.pipeline.run(source.filename.as_deref(), &lines))
    }
}
