//! Degradation tracking: which optional subsystems failed this turn, and
//! what that means for the pipeline.
//!
//! [`DegradationTracker::compute_mode`] is a pure function of the recorded
//! state, so the abort/degrade decision can be tested without any I/O.

use nexus_core::{DegradationMode, Subsystem};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DegradationTracker {
    failed: BTreeSet<Subsystem>,
    llm_unreachable: bool,
    aborted: bool,
}

impl DegradationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a subsystem as failed. Idempotent.
    pub fn record_failure(&mut self, subsystem: Subsystem) {
        self.failed.insert(subsystem);
    }

    /// Mark the model as unreachable. Terminal: the mode stays `Aborted`
    /// whatever else is recorded afterwards.
    pub fn record_llm_unreachable(&mut self) {
        self.llm_unreachable = true;
    }

    /// Mark the turn as ended without a model response for any other
    /// reason (a rejected request, an empty request). Terminal.
    pub fn record_abort(&mut self) {
        self.aborted = true;
    }

    pub fn has_failed(&self, subsystem: Subsystem) -> bool {
        self.failed.contains(&subsystem)
    }

    /// Failed subsystems in a stable order.
    pub fn failed(&self) -> impl Iterator<Item = Subsystem> + '_ {
        self.failed.iter().copied()
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    pub fn is_llm_unreachable(&self) -> bool {
        self.llm_unreachable
    }

    /// Combine the recorded failures with whether the required sections
    /// fit into the four-state mode.
    pub fn compute_mode(&self, budget_fit_ok: bool) -> DegradationMode {
        if self.llm_unreachable || self.aborted || !budget_fit_ok {
            return DegradationMode::Aborted;
        }
        match self.failed.len() {
            0 => DegradationMode::Full,
            1 => DegradationMode::Degraded,
            _ => DegradationMode::MinimalViable,
        }
    }
}
