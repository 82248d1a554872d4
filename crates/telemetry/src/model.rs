//! Data model for turn metrics, degradation events, and aggregate snapshots.

use chrono::{DateTime, Utc};
use nexus_core::{DegradationMode, Subsystem};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ── Degradation events ────────────────────────────────────────────────────

/// What happened to a subsystem during a turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DegradationKind {
    /// The collaborator did not answer within its timeout.
    Timeout,
    /// The collaborator answered with an error (or panicked).
    Error,
    /// The collaborator could not be reached.
    Unreachable,
    /// A fallback value was substituted.
    Fallback,
    /// The section was left out of the prompt.
    Omitted,
}

impl std::fmt::Display for DegradationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Error => write!(f, "error"),
            Self::Unreachable => write!(f, "unreachable"),
            Self::Fallback => write!(f, "fallback"),
            Self::Omitted => write!(f, "omitted"),
        }
    }
}

/// A subsystem failure and the fallback applied for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradationEvent {
    /// Which subsystem degraded. `llm` is reported as a plain label.
    pub subsystem: String,
    pub kind: DegradationKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl DegradationEvent {
    pub fn new(subsystem: impl Into<String>, kind: DegradationKind, message: impl Into<String>) -> Self {
        Self {
            subsystem: subsystem.into(),
            kind,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn for_subsystem(subsystem: Subsystem, kind: DegradationKind, message: impl Into<String>) -> Self {
        Self::new(subsystem.as_str(), kind, message)
    }
}

// ── Turn metrics ──────────────────────────────────────────────────────────

/// Coarse outcome of a turn, for dashboards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Success,
    Degraded,
    Failed,
}

impl TurnStatus {
    pub fn from_mode(mode: DegradationMode) -> Self {
        match mode {
            DegradationMode::Full => Self::Success,
            DegradationMode::Degraded | DegradationMode::MinimalViable => Self::Degraded,
            DegradationMode::Aborted => Self::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        }
    }
}

/// Complete telemetry for a single conversation turn.
///
/// Carries wall-clock data (latency, timestamps) that deliberately stays out
/// of the turn result itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnMetrics {
    pub turn_id: String,
    pub user_id: String,
    pub session_id: String,
    pub total_latency_ms: u64,
    pub tokens_used: usize,
    pub budget_utilization_pct: f64,
    pub degradation_events: Vec<DegradationEvent>,
    pub status: TurnStatus,
    pub mode: DegradationMode,
    pub timestamp: DateTime<Utc>,
}

impl TurnMetrics {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>, mode: DegradationMode) -> Self {
        Self {
            turn_id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            total_latency_ms: 0,
            tokens_used: 0,
            budget_utilization_pct: 0.0,
            degradation_events: Vec::new(),
            status: TurnStatus::from_mode(mode),
            mode,
            timestamp: Utc::now(),
        }
    }

    pub fn with_latency_ms(mut self, ms: u64) -> Self {
        self.total_latency_ms = ms;
        self
    }

    pub fn with_tokens(mut self, tokens_used: usize, utilization_pct: f64) -> Self {
        self.tokens_used = tokens_used;
        self.budget_utilization_pct = utilization_pct;
        self
    }

    pub fn with_events(mut self, events: Vec<DegradationEvent>) -> Self {
        self.degradation_events = events;
        self
    }
}

// ── Aggregates ────────────────────────────────────────────────────────────

/// Point-in-time view of the aggregate counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub turns_total: u64,
    pub by_status: BTreeMap<TurnStatus, u64>,
    pub by_mode: BTreeMap<DegradationMode, u64>,
    pub tokens_total: u64,
    pub degradation_events_total: u64,
    /// Event counts keyed by subsystem label.
    pub events_by_subsystem: BTreeMap<String, u64>,
    pub avg_latency_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_mode() {
        assert_eq!(TurnStatus::from_mode(DegradationMode::Full), TurnStatus::Success);
        assert_eq!(TurnStatus::from_mode(DegradationMode::MinimalViable), TurnStatus::Degraded);
        assert_eq!(TurnStatus::from_mode(DegradationMode::Aborted), TurnStatus::Failed);
    }

    #[test]
    fn event_serializes_kind_snake_case() {
        let event = DegradationEvent::for_subsystem(Subsystem::Memory, DegradationKind::Timeout, "500ms");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["subsystem"], "memory");
        assert_eq!(json["kind"], "timeout");
    }

    #[test]
    fn metrics_builder() {
        let m = TurnMetrics::new("u1", "s1", DegradationMode::Degraded)
            .with_latency_ms(42)
            .with_tokens(900, 45.0)
            .with_events(vec![DegradationEvent::new("mood", DegradationKind::Fallback, "baseline")]);
        assert_eq!(m.status, TurnStatus::Degraded);
        assert_eq!(m.total_latency_ms, 42);
        assert_eq!(m.tokens_used, 900);
        assert_eq!(m.degradation_events.len(), 1);
        assert!(!m.turn_id.is_empty());
    }
}
