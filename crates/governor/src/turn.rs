//! Turn pipeline states and the result handed back to callers.

use crate::context::budget::{SectionUsage, TokenBudget};
use crate::context::prompt::AssemblyStats;
use crate::validation::Violation;
use nexus_core::{DegradationMode, Subsystem};
use serde::Serialize;

/// Pipeline state of one turn.
///
/// ```text
/// Init → BudgetReady → ContextGathered → PromptReady → ModelCalled → Validated → Persisted → Done
///   └──────┴──────────────┴─────────────────┴─────────────┘
///                               ↓
///                            Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Init,
    BudgetReady,
    ContextGathered,
    PromptReady,
    ModelCalled,
    Validated,
    Persisted,
    Done,
    Aborted,
}

impl TurnState {
    pub fn can_transition_to(self, next: TurnState) -> bool {
        use TurnState::*;
        matches!(
            (self, next),
            (Init, BudgetReady)
                | (BudgetReady, ContextGathered)
                | (ContextGathered, PromptReady)
                | (PromptReady, ModelCalled)
                | (ModelCalled, Validated)
                | (Validated, Persisted)
                | (Persisted, Done)
                | (Init | BudgetReady | ContextGathered | PromptReady | ModelCalled, Aborted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

/// Why a turn was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// System, identity, or request could not be given their full cost.
    BudgetInsufficient,
    /// The model stayed unreachable after the bounded retry.
    LlmUnreachable,
    /// The model answered with a non-retryable error.
    LlmRejected,
    /// The request was empty.
    EmptyRequest,
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BudgetInsufficient => "budget_insufficient",
            Self::LlmUnreachable => "llm_unreachable",
            Self::LlmRejected => "llm_rejected",
            Self::EmptyRequest => "empty_request",
        }
    }

    /// The fixed text returned in place of a model response.
    pub fn response_text(&self) -> &'static str {
        match self {
            Self::BudgetInsufficient => {
                "This request is too large to process within the configured token budget."
            }
            Self::LlmUnreachable => {
                "The language model is currently unreachable. Please try again later."
            }
            Self::LlmRejected => "The language model could not process this request.",
            Self::EmptyRequest => "The request was empty.",
        }
    }
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the tokens of a turn went.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenUsageReport {
    pub total: usize,
    pub reserved_output: usize,
    /// Tokens consumed by the prompt, history included.
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    /// Prompt capacity left unused.
    pub remaining: usize,
    /// Prompt tokens as a share of prompt capacity.
    pub utilization_pct: f64,
    pub sections: Vec<SectionUsage>,
    pub memory_items_included: usize,
    pub memory_items_dropped: usize,
    pub history_included: bool,
}

impl TokenUsageReport {
    pub fn from_budget(budget: &TokenBudget) -> Self {
        let capacity = budget.total() - budget.reserved_output();
        let prompt_tokens = budget.total_consumed();
        Self {
            total: budget.total(),
            reserved_output: budget.reserved_output(),
            prompt_tokens,
            completion_tokens: 0,
            remaining: budget.remaining(),
            utilization_pct: percent(prompt_tokens, capacity),
            sections: budget.sections().to_vec(),
            memory_items_included: 0,
            memory_items_dropped: 0,
            history_included: false,
        }
    }

    /// Report for a turn whose budget never came into existence.
    pub fn unbudgeted(total: usize, reserved_output: usize) -> Self {
        Self {
            total,
            reserved_output,
            prompt_tokens: 0,
            completion_tokens: 0,
            remaining: total.saturating_sub(reserved_output),
            utilization_pct: 0.0,
            sections: Vec::new(),
            memory_items_included: 0,
            memory_items_dropped: 0,
            history_included: false,
        }
    }

    pub fn with_assembly(mut self, stats: &AssemblyStats) -> Self {
        self.memory_items_included = stats.memory_items_included;
        self.memory_items_dropped = stats.memory_items_dropped;
        self.history_included = stats.history_included;
        self
    }

    pub fn with_completion(mut self, tokens: usize) -> Self {
        self.completion_tokens = tokens;
        self
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 10_000.0).round() / 100.0
}

/// Outcome of `process_turn`. Contains no timestamps or random ids, so
/// identical inputs give identical results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnResult {
    pub response_text: String,
    pub degradation_mode: DegradationMode,
    pub token_usage: TokenUsageReport,
    pub aborted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<AbortReason>,
    /// Subsystems that failed and were replaced or omitted.
    pub failed_subsystems: Vec<Subsystem>,
    /// Present when the response still breaks an identity rule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety_annotation: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub invariant_violations: Vec<Violation>,
    pub regenerations: u32,
    /// Whether the response was cut to the output reservation.
    pub truncated: bool,
}

impl TurnResult {
    /// An aborted turn. `degradation_mode` is whatever the turn's tracker
    /// computed, which is `Aborted` for every abort path.
    pub fn aborted(
        reason: AbortReason,
        degradation_mode: DegradationMode,
        token_usage: TokenUsageReport,
        failed_subsystems: Vec<Subsystem>,
    ) -> Self {
        Self {
            response_text: reason.response_text().to_string(),
            degradation_mode,
            token_usage,
            aborted: true,
            abort_reason: Some(reason),
            failed_subsystems,
            safety_annotation: None,
            invariant_violations: Vec::new(),
            regenerations: 0,
            truncated: false,
        }
    }

    /// Whether this is a successful turn that lost some context.
    pub fn is_degraded(&self) -> bool {
        matches!(
            self.degradation_mode,
            DegradationMode::Degraded | DegradationMode::MinimalViable
        )
    }
}
