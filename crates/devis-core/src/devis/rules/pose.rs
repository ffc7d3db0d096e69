//! Detection of a sold installation ("pose") in the services section.

use rust_decimal::Decimal;
use tracing::debug;

use super::amounts::{format_french_amount, last_amount, normalize_amount};
use super::patterns::{POSE_WORD, SECTION_END, SERVICES_START};
use crate::devis::lines::LineSequence;
use crate::models::devis::Provenance;

/// Scanner state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoseState {
    BeforeServices,
    InServices,
}

/// Outcome of the pose scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoseOutcome {
    pub sold: bool,
    /// Normalized amount of the pose line, empty when not sold.
    pub amount: String,
    pub provenance: Provenance,
}

impl PoseOutcome {
    fn not_sold(provenance: Provenance) -> Self {
        Self {
            sold: false,
            amount: String::new(),
            provenance,
        }
    }
}

/// Two-state scanner over the quote lines.
#[derive(Debug, Clone)]
pub struct PoseDetector {
    placeholders: Vec<String>,
}

impl PoseDetector {
    pub fn new() -> Self {
        Self::with_placeholders(&["1,00"])
    }

    /// Amounts that only mark an unpriced line.
    pub fn with_placeholders<S: AsRef<str>>(placeholders: &[S]) -> Self {
        Self {
            placeholders: placeholders
                .iter()
                .map(|p| normalize_amount(p.as_ref()))
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn detect(&self, lines: &LineSequence) -> PoseOutcome {
        if lines.is_empty() || !lines.has_letters() {
            return PoseOutcome::not_sold(Provenance::Unreadable);
        }

        let mut state = PoseState::BeforeServices;

        for line in lines.iter() {
            match state {
                PoseState::BeforeServices => {
                    if SERVICES_START.is_match(line) {
                        state = PoseState::InServices;
                    }
                }
                PoseState::InServices => {
                    if SECTION_END.is_match(line) {
                        debug!("Services section closed by {:?}", line);
                        state = PoseState::BeforeServices;
                        continue;
                    }
                    if !POSE_WORD.is_match(line) {
                        continue;
                    }
                    if let Some(amount) = self.priced(line) {
                        debug!("Pose sold: {:?}", line);
                        return PoseOutcome {
                            sold: true,
                            amount,
                            provenance: Provenance::Auto,
                        };
                    }
                }
            }
        }

        PoseOutcome::not_sold(Provenance::Auto)
    }

    /// Normalized last amount of a pose line when it is a real price.
    fn priced(&self, line: &str) -> Option<String> {
        let amount = last_amount(line).filter(|a| *a > Decimal::ZERO)?;
        let formatted = format_french_amount(amount);
        if self.placeholders.contains(&formatted) {
            return None;
        }
        Some(formatted)
    }
}

impl Default for PoseDetector {
    fn default() -> Self {
        Self::new()
    }
}
