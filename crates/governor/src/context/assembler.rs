//! Prompt assembly — turns a gathered [`TurnContext`] into a
//! [`StructuredPrompt`] that fits the turn's [`TokenBudget`].
//!
//! # Algorithm
//!
//! Sections are visited in the budget's packing order:
//!
//! 1. **System, identity, request** must be granted their full cost. A short
//!    grant returns [`AbortSignal`]; nothing is truncated.
//! 2. **Mood** is included whole or not at all. When the mood subsystem
//!    failed and the turn is `MinimalViable`, the slot is removed.
//! 3. **History** is included whole or not at all. A partial history would
//!    misrepresent the conversation.
//! 4. **Memory** keeps the longest best-first prefix of the ranked items
//!    that fits, dropping the lowest-ranked item one at a time. If the
//!    memory subsystem failed, or no item fits, the slot is removed.
//!
//! # Determinism
//!
//! Identical inputs always produce identical sections and token counts.
//! Nothing in this module reads the clock or a random source.

use crate::context::budget::{Section, TokenBudget};
use crate::context::prompt::{AssemblyStats, OmissionReason, PromptSection, StructuredPrompt};
use crate::context::TurnContext;
use crate::degradation::DegradationTracker;
use crate::validation::Violation;
use nexus_core::{BudgetError, DegradationMode, HeuristicCounter, Message, Subsystem, TokenCounter};
use std::sync::Arc;
use tracing::debug;

/// Fixed per-section cost covering the header and separators.
pub const SECTION_OVERHEAD: usize = 4;

/// Default number of most recent history messages considered.
pub const DEFAULT_HISTORY_WINDOW: usize = 8;

const SYSTEM_DIRECTIVE: &str = "You are the assistant described in the identity snapshot. \
Stay consistent with its name, role, values, and invariants. \
The mood state is metadata about tone, not a character to play. \
Use relevant memory only when it helps answer the current request.";

/// Why the assembler refused to build a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortSignal {
    /// The request was empty or whitespace.
    EmptyRequest,
    /// A required section could not be granted its full cost.
    Insufficient {
        section: Section,
        requested: usize,
        granted: usize,
    },
    /// Accounting rejected a commit. Indicates a bug, never user input.
    Accounting(BudgetError),
}

impl std::fmt::Display for AbortSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "current request is empty"),
            Self::Insufficient {
                section,
                requested,
                granted,
            } => write!(
                f,
                "required section '{section}' needs {requested} tokens but only {granted} are available"
            ),
            Self::Accounting(e) => write!(f, "budget accounting failed: {e}"),
        }
    }
}

impl std::error::Error for AbortSignal {}

/// The prompt assembler. Stateless; create one and share it.
#[derive(Clone)]
pub struct PromptAssembler {
    counter: Arc<dyn TokenCounter>,
    directive: String,
    history_window: usize,
}

impl Default for PromptAssembler {
    fn default() -> Self {
        Self::new(Arc::new(HeuristicCounter))
    }
}

impl PromptAssembler {
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            counter,
            directive: SYSTEM_DIRECTIVE.to_string(),
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }

    pub fn with_history_window(mut self, messages: usize) -> Self {
        self.history_window = messages;
        self
    }

    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directive = directive.into();
        self
    }

    pub fn counter(&self) -> &dyn TokenCounter {
        self.counter.as_ref()
    }

    pub fn shared_counter(&self) -> Arc<dyn TokenCounter> {
        Arc::clone(&self.counter)
    }

    /// Cost of a section holding `content`.
    pub fn section_cost(&self, content: &str) -> usize {
        SECTION_OVERHEAD + self.counter.count(content)
    }

    /// Most recent history messages inside the window.
    pub fn history_window<'a>(&self, history: &'a [Message]) -> &'a [Message] {
        let start = history.len().saturating_sub(self.history_window);
        &history[start..]
    }

    /// Cost of the history window, or 0 if empty.
    pub fn history_cost(&self, history: &[Message]) -> usize {
        self.history_window(history)
            .iter()
            .map(|m| self.section_cost(&m.content))
            .sum()
    }

    /// Upper estimate of what memory may use this turn, before identity and
    /// mood are known. Passed to the memory collaborator as its budget hint.
    pub fn memory_budget_hint(&self, budget: &TokenBudget, request: &str, history: &[Message]) -> usize {
        budget
            .unallocated()
            .saturating_sub(self.section_cost(&self.directive))
            .saturating_sub(self.section_cost(request))
            .saturating_sub(self.history_cost(history))
            .saturating_sub(SECTION_OVERHEAD)
    }

    /// Assemble the prompt for a turn.
    pub fn assemble(
        &self,
        budget: &mut TokenBudget,
        context: &TurnContext,
        tracker: &DegradationTracker,
    ) -> Result<StructuredPrompt, AbortSignal> {
        self.assemble_with(&self.directive, budget, context, tracker)
    }

    /// Assemble again after invariant violations, with a stricter system
    /// section naming the rules that were broken.
    pub fn assemble_strict(
        &self,
        budget: &mut TokenBudget,
        context: &TurnContext,
        tracker: &DegradationTracker,
        violations: &[Violation],
    ) -> Result<StructuredPrompt, AbortSignal> {
        let mut directive = format!(
            "{}\n\nSTRICT MODE: a previous draft broke these identity rules:",
            self.directive
        );
        for v in violations {
            directive.push_str(&format!("\n- [{}] {}", v.invariant_id, v.description));
        }
        directive.push_str("\nAnswer again and follow every identity rule exactly.");
        self.assemble_with(&directive, budget, context, tracker)
    }

    fn assemble_with(
        &self,
        directive: &str,
        budget: &mut TokenBudget,
        context: &TurnContext,
        tracker: &DegradationTracker,
    ) -> Result<StructuredPrompt, AbortSignal> {
        if context.current_request.trim().is_empty() {
            return Err(AbortSignal::EmptyRequest);
        }

        let mode = tracker.compute_mode(true);
        let mut sections: Vec<PromptSection> = Vec::with_capacity(5);
        let mut stats = AssemblyStats::default();
        let mut history: Vec<Message> = Vec::new();
        let mut history_tokens = 0;

        for section in budget.priorities().to_vec() {
            match section {
                Section::System => {
                    sections.push(self.required(budget, section, directive.to_string())?);
                }
                Section::Identity => {
                    let content = context.identity_snapshot.render();
                    sections.push(self.required(budget, section, content)?);
                }
                Section::Request => {
                    let content = context.current_request.clone();
                    sections.push(self.required(budget, section, content)?);
                }
                Section::Mood => {
                    if tracker.has_failed(Subsystem::Mood) && mode == DegradationMode::MinimalViable {
                        stats.omitted.push((section, OmissionReason::SubsystemFailed));
                        continue;
                    }
                    let content = context.mood_state.render_metadata();
                    match self.optional(budget, section, content)? {
                        Some(s) => sections.push(s),
                        None => stats.omitted.push((section, OmissionReason::Budget)),
                    }
                }
                Section::History => {
                    let window = self.history_window(&context.conversation_history);
                    if window.is_empty() {
                        continue;
                    }
                    let cost = self.history_cost(&context.conversation_history);
                    stats.history_messages = window.len();
                    if self.take(budget, section, cost)? {
                        history = window.to_vec();
                        history_tokens = cost;
                        stats.history_included = true;
                    } else {
                        debug!(cost, available = budget.unallocated(), "History omitted");
                        stats.omitted.push((section, OmissionReason::Budget));
                    }
                }
                Section::Memory => {
                    if tracker.has_failed(Subsystem::Memory) {
                        stats.memory_items_dropped = context.memory_items.len();
                        stats.omitted.push((section, OmissionReason::SubsystemFailed));
                        continue;
                    }
                    match self.pack_memory(budget, context, &mut stats)? {
                        Some(s) => sections.push(s),
                        None => stats.omitted.push((section, OmissionReason::Budget)),
                    }
                }
            }
        }

        Ok(StructuredPrompt::new(sections, history, history_tokens, stats))
    }

    /// Allocate the full cost of a required section or abort.
    fn required(
        &self,
        budget: &mut TokenBudget,
        section: Section,
        content: String,
    ) -> Result<PromptSection, AbortSignal> {
        let cost = self.section_cost(&content);
        let granted = budget.allocate(section, cost);
        if granted < cost {
            return Err(AbortSignal::Insufficient {
                section,
                requested: cost,
                granted,
            });
        }
        budget.commit(section, cost).map_err(AbortSignal::Accounting)?;
        Ok(PromptSection {
            name: section,
            content,
            token_count: cost,
        })
    }

    /// Include a section only if all of it fits.
    fn optional(
        &self,
        budget: &mut TokenBudget,
        section: Section,
        content: String,
    ) -> Result<Option<PromptSection>, AbortSignal> {
        let cost = self.section_cost(&content);
        if !self.take(budget, section, cost)? {
            return Ok(None);
        }
        Ok(Some(PromptSection {
            name: section,
            content,
            token_count: cost,
        }))
    }

    /// Allocate and commit `cost` if the whole amount is available.
    fn take(&self, budget: &mut TokenBudget, section: Section, cost: usize) -> Result<bool, AbortSignal> {
        if cost > budget.unallocated() {
            return Ok(false);
        }
        budget.allocate(section, cost);
        budget.commit(section, cost).map_err(AbortSignal::Accounting)?;
        Ok(true)
    }

    fn pack_memory(
        &self,
        budget: &mut TokenBudget,
        context: &TurnContext,
        stats: &mut AssemblyStats,
    ) -> Result<Option<PromptSection>, AbortSignal> {
        let lines: Vec<String> = context
            .memory_items
            .iter()
            .map(|m| format!("- {}\n", m.content))
            .collect();
        let available = budget.unallocated();

        let mut keep = lines.len();
        let mut content = lines.concat();
        while keep > 0 && self.section_cost(&content) > available {
            keep -= 1;
            content = lines[..keep].concat();
        }

        stats.memory_items_dropped = lines.len() - keep;
        if keep == 0 && !lines.is_empty() {
            debug!(items = lines.len(), available, "No memory item fits");
            return Ok(None);
        }

        // Retrieval that found nothing still yields an (empty) slot.
        let section = self.optional(budget, Section::Memory, content)?;
        if section.is_some() {
            stats.memory_items_included = keep;
        }
        Ok(section)
    }
}
