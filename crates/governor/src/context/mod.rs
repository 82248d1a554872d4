//! Turn context, token budget, and prompt assembly.
//!
//! # Sections (packing priority)
//!
//! | Section | Source | When it does not fit |
//! |---------|--------|----------------------|
//! | 1. System | Fixed directive | Turn aborts |
//! | 2. Identity | Identity snapshot or skeleton | Turn aborts |
//! | 3. Request | Current user text, verbatim | Turn aborts |
//! | 4. Mood | PAD metadata or baseline | Omitted |
//! | 5. History | Recent messages | Omitted entirely, never cut |
//! | 6. Memory | Ranked items | Lowest-ranked dropped one at a time |

pub mod assembler;
pub mod budget;
pub mod prompt;

pub use assembler::{AbortSignal, PromptAssembler, SECTION_OVERHEAD};
pub use budget::{Section, SectionUsage, TokenBudget};
pub use prompt::{AssemblyStats, OmissionReason, PromptSection, StructuredPrompt};

use nexus_core::{IdentitySnapshot, MemoryItem, Message, MoodState};

/// Everything gathered for one turn.
///
/// Owned by a single turn and never shared. Collaborator results are copied
/// in; identity and mood always hold a value because failures are replaced
/// by the skeleton identity and the baseline mood before assembly.
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub user_id: String,
    pub session_id: String,
    pub conversation_history: Vec<Message>,
    pub current_request: String,
    pub identity_snapshot: IdentitySnapshot,
    pub mood_state: MoodState,
    pub memory_items: Vec<MemoryItem>,
}

impl TurnContext {
    /// A context with fallback identity and mood and no memory.
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        current_request: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            conversation_history: Vec::new(),
            current_request: current_request.into(),
            identity_snapshot: IdentitySnapshot::minimal_skeleton(),
            mood_state: MoodState::baseline(),
            memory_items: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.conversation_history = history;
        self
    }

    pub fn with_identity(mut self, snapshot: IdentitySnapshot) -> Self {
        self.identity_snapshot = snapshot;
        self
    }

    pub fn with_mood(mut self, mood: MoodState) -> Self {
        self.mood_state = mood;
        self
    }

    pub fn with_memory(mut self, items: Vec<MemoryItem>) -> Self {
        self.memory_items = items;
        self
    }
}
