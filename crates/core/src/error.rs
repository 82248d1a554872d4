//! Error types for the nexus domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error for wiring a governor together outside a turn.
///
/// The turn pipeline itself never returns this: every failure inside a turn
/// is folded into a `TurnResult`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Budget error: {0}")]
    Budget(#[from] BudgetError),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether the backend could not be reached at all (as opposed to
    /// answering with a rejection). Only these are worth a retry.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::RateLimited { .. }
        )
    }
}

#[derive(Debug, Clone, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Failure reported by an identity, mood, or memory collaborator.
#[derive(Debug, Clone, Error)]
pub enum SubsystemError {
    /// The collaborator answered but could not produce a result.
    #[error("subsystem failed: {0}")]
    Failed(String),

    /// The collaborator could not be reached.
    #[error("subsystem unreachable: {0}")]
    Unreachable(String),
}

impl From<MemoryError> for SubsystemError {
    fn from(err: MemoryError) -> Self {
        Self::Failed(err.to_string())
    }
}

/// Token accounting errors. Both variants signal programmer error, never
/// a user-facing condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BudgetError {
    #[error("output reservation ({reserved_output}) must be smaller than the total budget ({total})")]
    Config { total: usize, reserved_output: usize },

    #[error("invalid section priorities: {0}")]
    Priorities(String),

    #[error("section '{section}' used {actual} tokens but was allocated {allocated}")]
    Overrun {
        section: String,
        actual: usize,
        allocated: usize,
    },
}
