//! Structured log emission for turns and degradation events.
//!
//! Turn metrics go out as one JSON object per turn on the
//! `nexus.observability` target, ready for any log pipeline that can parse
//! JSON lines.

use crate::TelemetryError;
use crate::model::{DegradationEvent, DegradationKind, TurnMetrics};
use tracing::{error, info, warn};

/// Target used for every observability record.
pub const LOG_TARGET: &str = "nexus.observability";

/// Stateless emitter for turn telemetry.
pub struct Observability;

impl Observability {
    /// Serialize turn metrics to a JSON line.
    pub fn to_json(metrics: &TurnMetrics) -> Result<String, TelemetryError> {
        Ok(serde_json::to_string(metrics)?)
    }

    /// Log a finished turn.
    pub fn log_turn(metrics: &TurnMetrics) {
        match Self::to_json(metrics) {
            Ok(line) => info!(
                target: LOG_TARGET,
                turn_id = %metrics.turn_id,
                status = metrics.status.as_str(),
                mode = %metrics.mode,
                "{line}"
            ),
            Err(e) => error!(target: LOG_TARGET, error = %e, "Failed to serialize turn metrics"),
        }
    }

    /// Log a degradation and return the event for the turn's metrics.
    pub fn record_degradation(
        subsystem: impl Into<String>,
        kind: DegradationKind,
        message: impl Into<String>,
    ) -> DegradationEvent {
        let event = DegradationEvent::new(subsystem, kind, message);
        warn!(
            target: LOG_TARGET,
            subsystem = %event.subsystem,
            kind = %event.kind,
            "DEGRADATION: {} | {} | {}",
            event.subsystem,
            event.kind,
            event.message
        );
        event
    }
}
