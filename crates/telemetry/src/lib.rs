//! Turn telemetry for nexus.
//!
//! Records one [`TurnMetrics`] per processed turn, with the degradation
//! events that shaped it, emits them as structured JSON logs, and keeps
//! in-process aggregates for status reporting.

pub mod engine;
pub mod model;
pub mod observe;

pub use engine::TelemetryEngine;
pub use model::{DegradationEvent, DegradationKind, TelemetrySnapshot, TurnMetrics, TurnStatus};
pub use observe::Observability;

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
