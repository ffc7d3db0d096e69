//! Data models for quote records and configuration.

pub mod config;
pub mod devis;

pub use config::DevisConfig;
pub use devis::{Contremarches, DevisRecord, DevisReference, Field, Provenance, StructureKind};
