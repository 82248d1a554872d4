//! Thread-safe telemetry engine: aggregates turn metrics and keeps a bounded
//! ring of the most recent turns.

use crate::model::*;
use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};

/// Default number of recent turns retained.
pub const DEFAULT_RECENT_TURNS: usize = 256;

/// The core telemetry engine.
///
/// Thread-safe via `RwLock`. Shared by every concurrent turn; recording is a
/// short critical section and never blocks on I/O.
pub struct TelemetryEngine {
    /// Maximum length of the recent-turn ring.
    capacity: usize,
    /// Most recent turns (oldest first).
    recent: RwLock<VecDeque<TurnMetrics>>,
    /// Running totals.
    totals: RwLock<RunningTotals>,
}

/// Internal running totals.
#[derive(Debug, Default)]
struct RunningTotals {
    snapshot: TelemetrySnapshot,
    latency_sum_ms: u64,
}

impl TelemetryEngine {
    /// Create an engine with the default ring capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RECENT_TURNS)
    }

    /// Create an engine that keeps at most `capacity` recent turns.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            recent: RwLock::new(VecDeque::new()),
            totals: RwLock::new(RunningTotals::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fold a finished turn into the aggregates and the recent ring.
    pub fn record_turn(&self, metrics: TurnMetrics) {
        {
            let mut totals = self.totals.write().unwrap_or_else(PoisonError::into_inner);
            totals.latency_sum_ms += metrics.total_latency_ms;

            let snap = &mut totals.snapshot;
            snap.turns_total += 1;
            *snap.by_status.entry(metrics.status).or_default() += 1;
            *snap.by_mode.entry(metrics.mode).or_default() += 1;
            snap.tokens_total += metrics.tokens_used as u64;
            snap.degradation_events_total += metrics.degradation_events.len() as u64;
            for event in &metrics.degradation_events {
                *snap
                    .events_by_subsystem
                    .entry(event.subsystem.clone())
                    .or_default() += 1;
            }
        }

        let mut recent = self.recent.write().unwrap_or_else(PoisonError::into_inner);
        while recent.len() >= self.capacity {
            recent.pop_front();
        }
        recent.push_back(metrics);
    }

    // ── Queries ───────────────────────────────────────────────────────

    /// Aggregate counters since engine creation.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let totals = self.totals.read().unwrap_or_else(PoisonError::into_inner);
        let mut snap = totals.snapshot.clone();
        if snap.turns_total > 0 {
            snap.avg_latency_ms = totals.latency_sum_ms as f64 / snap.turns_total as f64;
        }
        snap
    }

    /// List recent turns (most recent first).
    pub fn recent_turns(&self, limit: usize) -> Vec<TurnMetrics> {
        let recent = self.recent.read().unwrap_or_else(PoisonError::into_inner);
        recent.iter().rev().take(limit).cloned().collect()
    }

    /// Recent turns for one session, oldest first.
    pub fn turns_for_session(&self, session_id: &str) -> Vec<TurnMetrics> {
        let recent = self.recent.read().unwrap_or_else(PoisonError::into_inner);
        recent
            .iter()
            .filter(|t| t.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Number of turns currently held in the ring.
    pub fn retained(&self) -> usize {
        self.recent.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for TelemetryEngine {
    fn default() -> Self {
        Self::new()
    }
}
