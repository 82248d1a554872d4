//! Shared turn vocabulary: which optional subsystems exist and how badly a
//! turn was degraded.

use serde::{Deserialize, Serialize};

/// The optional context subsystems consulted on every turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subsystem {
    Identity,
    Mood,
    Memory,
}

impl Subsystem {
    pub const ALL: [Subsystem; 3] = [Self::Identity, Self::Mood, Self::Memory];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Mood => "mood",
            Self::Memory => "memory",
        }
    }
}

impl std::fmt::Display for Subsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity level of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationMode {
    /// Every subsystem answered.
    Full,
    /// Exactly one subsystem failed.
    Degraded,
    /// Two or more subsystems failed.
    MinimalViable,
    /// The turn could not produce a model response.
    Aborted,
}

impl DegradationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Degraded => "degraded",
            Self::MinimalViable => "minimal_viable",
            Self::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for DegradationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
