//! Rule-based field extractors for SRX quotes.

pub mod amounts;
pub mod contamination;
pub mod patterns;
pub mod pose;
pub mod reference;
pub mod specs;

pub use amounts::{
    extract_amounts, format_french_amount, normalize_amount, parse_french_amount, AmountExtractor,
    DevisAmounts,
};
pub use contamination::ContaminationFilter;
pub use pose::{PoseDetector, PoseOutcome, PoseState};
pub use reference::{ReferenceDecoder, ReferenceSource};
pub use specs::{extract_specs, wood_species, TechnicalSpecs};

/// Trait for field extractors.
pub trait FieldExtractor {
    /// The type of value this extractor produces.
    type Output;

    /// Extract the field from text.
    fn extract(&self, text: &str) -> Option<Self::Output>;

    /// Extract all occurrences of the field.
    fn extract_all(&self, text: &str) -> Vec<Self::Output>;
}

/// A matched value with the text it came from.
#[derive(Debug, Clone)]
pub struct ExtractionMatch<T> {
    /// Extracted value.
    pub value: T,
    /// Confidence score (0.0 - 1.0).
    pub confidence: f32,
    /// Byte span in the source text.
    pub position: Option<(usize, usize)>,
    /// Source text that was matched.
    pub source: String,
}

impl<T> ExtractionMatch<T> {
    pub fn new(value: T, confidence: f32, source: impl Into<String>) -> Self {
        Self {
            value,
            confidence,
            position: None,
            source: source.into(),
        }
    }

    pub fn with_position(mut self, start: usize, end: usize) -> Self {
        self.position = Some((start, end));
        self
    }
}
