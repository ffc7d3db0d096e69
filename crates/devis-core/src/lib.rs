//! Core library for SRX quote processing.
//!
//! This crate provides:
//! - PDF text extraction (per-page text and positioned text runs)
//! - Anchor-based extraction of the counterparty, sales contact, pricing
//!   and staircase specifications of a RIAUX "devis"
//! - Issuer contamination filtering and amount/reference normalization
//! - Fallback strategies (block geometry, OCR command, LLM endpoint)
//! - Purchase-order (BDC) AcroForm filling

pub mod devis;
pub mod error;
pub mod form;
pub mod models;
pub mod pdf;
pub mod producers;

pub use devis::{DevisParser, ExtractionResult, ExtractionStrategy, QuoteParser, StrategyKind};
pub use error::{DevisError, ExtractionError, FormError, PdfError, ProducerError, Result};
pub use form::{build_field_values, output_file_name, AcroFormWriter, FieldValues, FormWriter};
pub use models::{DevisConfig, DevisRecord, DevisReference, Field, Provenance};
pub use pdf::{PdfContent, PdfExtractor, PdfProcessor, PdfType};
