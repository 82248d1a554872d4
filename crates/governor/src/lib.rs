//! The per-turn orchestration core.
//!
//! Every turn follows a fixed **Budget → Gather → Assemble → Generate →
//! Validate → Persist** sequence:
//!
//! 1. **Budget**: a fresh [`TokenBudget`] with the output reservation carved out
//! 2. **Gather**: identity, mood, and memory fetched concurrently, each behind
//!    a timeout-bounded gateway that turns every fault into an [`Outcome`]
//! 3. **Assemble**: the [`PromptAssembler`] packs sections by priority
//! 4. **Generate**: the model is called with a bounded retry
//! 5. **Validate**: the response is checked against identity invariants
//! 6. **Persist**: an episodic record is written, failures swallowed
//!
//! [`Orchestrator::process_turn`] is the single entry point and always
//! returns a [`TurnResult`].

pub mod context;
pub mod degradation;
pub mod gateway;
pub mod orchestrator;
pub mod turn;
pub mod validation;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use context::{
    AbortSignal, AssemblyStats, OmissionReason, PromptAssembler, PromptSection, Section,
    SectionUsage, StructuredPrompt, TokenBudget, TurnContext, SECTION_OVERHEAD,
};
pub use degradation::DegradationTracker;
pub use gateway::{FailureReason, Generation, LlmGateway, Outcome, RetryPolicy};
pub use orchestrator::Orchestrator;
pub use turn::{AbortReason, TokenUsageReport, TurnResult, TurnState};
pub use validation::{Violation, check_response};
