//! Error types for the devis-core library.

use thiserror::Error;

use crate::models::devis::Field;

/// Main error type for the devis library.
#[derive(Error, Debug)]
pub enum DevisError {
    /// PDF processing error.
    #[error("PDF error: {0}")]
    Pdf(#[from] PdfError),

    /// Quote extraction error (fatal for the document).
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// Form filling error.
    #[error("form error: {0}")]
    Form(#[from] FormError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Errors related to PDF processing.
#[derive(Error, Debug)]
pub enum PdfError {
    /// Failed to open/parse the PDF file.
    #[error("failed to parse PDF: {0}")]
    Parse(String),

    /// Failed to extract text from PDF.
    #[error("failed to extract text: {0}")]
    TextExtraction(String),

    /// The PDF is encrypted and cannot be processed.
    #[error("PDF is encrypted")]
    Encrypted,

    /// The PDF is empty or has no pages.
    #[error("PDF has no pages")]
    NoPages,

    /// Invalid page number requested.
    #[error("invalid page number: {0}")]
    InvalidPage(u32),
}

/// Blocking extraction failures.
///
/// Only the assembler raises these; every other gap is a warning carried in
/// `parse_warning`.
#[derive(Error, Debug)]
pub enum ExtractionError {
    /// An anchor phrase never appeared and no fallback filled its field.
    #[error("anchor '{anchor}' not found, {field} could not be resolved")]
    MissingAnchor {
        anchor: &'static str,
        field: Field,
        warnings: String,
    },

    /// The anchor exists but the required field stayed empty.
    #[error("missing required field: {field}")]
    MissingField { field: Field, warnings: String },
}

impl ExtractionError {
    /// Field that could not be resolved.
    pub fn field(&self) -> Field {
        match self {
            Self::MissingAnchor { field, .. } | Self::MissingField { field, .. } => *field,
        }
    }

    /// Non-fatal warnings gathered before the failure.
    pub fn warnings(&self) -> &str {
        match self {
            Self::MissingAnchor { warnings, .. } | Self::MissingField { warnings, .. } => warnings,
        }
    }
}

/// Errors raised by alternative producers (OCR, LLM, geometry).
///
/// These never abort a parse: the parser records them as warnings and keeps
/// the anchor-based result.
#[derive(Error, Debug)]
pub enum ProducerError {
    /// The producer has nothing to work with for this document.
    #[error("producer not applicable: {0}")]
    NotApplicable(String),

    /// The producer is disabled or misconfigured.
    #[error("producer unavailable: {0}")]
    Unavailable(String),

    /// The external call did not complete in time.
    #[error("producer timed out after {0}s")]
    Timeout(u64),

    /// Transport-level failure (network, process spawn).
    #[error("producer call failed: {0}")]
    Call(String),

    /// The producer answered with something that is not usable.
    #[error("invalid producer response: {0}")]
    InvalidResponse(String),
}

/// Errors related to filling the purchase-order template.
#[derive(Error, Debug)]
pub enum FormError {
    /// Template could not be located.
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// Template or output PDF could not be read/written.
    #[error("PDF form error: {0}")]
    Pdf(String),

    /// Template has no AcroForm dictionary.
    #[error("template has no AcroForm fields")]
    NoAcroForm,

    /// A mandatory field is missing from the written output.
    #[error("field '{0}' missing from generated PDF")]
    MissingOutputField(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<lopdf::Error> for FormError {
    fn from(err: lopdf::Error) -> Self {
        Self::Pdf(err.to_string())
    }
}

/// Result type for the devis library.
pub type Result<T> = std::result::Result<T, DevisError>;
