//! SRX quote extraction module.

pub mod anchors;
pub mod assembler;
pub mod lines;
mod parser;
pub mod rules;
pub mod strategy;

pub use anchors::{AnchorExtractor, AnchorFields, Counterparty, SalesContact};
pub use assembler::{AssembledRecord, Assembler, Fragments};
pub use lines::LineSequence;
pub use parser::{DevisParser, ExtractionResult, QuoteParser};
pub use strategy::{
    AnchorPipeline, AnchorRegexStrategy, BlockGeometryStrategy, ExtractionStrategy,
    SourceDocument, StrategyKind, StrategyOutput,
};
