//! StateValidator - pure invariant checks over a state snapshot
//!
//! No I/O and no side effects. Recovery and backup-acceptance decisions both
//! go through `validate`, so there is exactly one definition of "valid".

use crate::domain::{ApplicationState, MIN_TRANSITION_INTERVAL_SECS};

/// Outcome of validating one snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    /// Violated invariants, in check order. Empty means valid.
    pub violations: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "valid")
        } else {
            write!(f, "invalid: {}", self.violations.join("; "))
        }
    }
}

/// Check every invariant, collecting all violations rather than stopping at
/// the first
pub fn validate(state: &ApplicationState) -> ValidationReport {
    let mut violations = Vec::new();

    if state.transition_interval_secs < MIN_TRANSITION_INTERVAL_SECS {
        violations.push(format!(
            "transition interval {}s below minimum {}s",
            state.transition_interval_secs, MIN_TRANSITION_INTERVAL_SECS
        ));
    }

    if state.preview_mode && state.last_preview_at_ms == 0 {
        violations.push("preview mode active without a last-preview timestamp".to_string());
    }

    if state.screensaver_ready() && state.photo_sources.is_empty() {
        violations.push("screensaver ready with no photo sources".to_string());
    }

    if state.last_modified_ms < state.last_synced_ms {
        violations.push(format!(
            "last modified ({}) precedes last sync ({})",
            state.last_modified_ms, state.last_synced_ms
        ));
    }

    ValidationReport { violations }
}
