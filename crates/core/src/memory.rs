//! Memory trait — ranked episodic recall and per-turn persistence.
//!
//! Retrieval is budget-aware: the caller passes the number of tokens it can
//! still afford, and the collaborator limits its own work to that hint
//! instead of returning everything and letting the caller truncate.

use crate::error::SubsystemError;
use crate::turn::DegradationMode;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single recalled memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Unique ID for this memory
    pub id: String,

    /// The content of the memory
    pub content: String,

    /// Relevance score (set by retrieval; higher ranks first)
    #[serde(default)]
    pub score: f32,

    /// When this memory was created
    pub created_at: DateTime<Utc>,

    /// Tags for categorization
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl MemoryItem {
    pub fn new(id: impl Into<String>, content: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            score,
            created_at: Utc::now(),
            tags: Vec::new(),
        }
    }
}

/// A budget-aware retrieval call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalRequest {
    pub user_id: String,
    pub session_id: String,

    /// The text the memories should be relevant to (the current request)
    pub query: String,

    /// Estimated token capacity left for memory in this turn
    pub budget_hint: usize,
}

/// The episodic record written after every successful turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub user_id: String,
    pub session_id: String,
    pub request: String,
    pub response: String,
    pub mode: DegradationMode,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,

    /// Whether the response carried a safety annotation
    #[serde(default)]
    pub annotated: bool,

    pub created_at: DateTime<Utc>,
}

impl TurnRecord {
    /// The text stored as recallable memory content.
    pub fn summary(&self) -> String {
        format!(
            "User asked: {}\nAssistant answered: {}",
            self.request, self.response
        )
    }
}

/// The core memory collaborator trait.
///
/// Implementations: in-memory, JSONL file, none (no-op).
#[async_trait]
pub trait MemoryService: Send + Sync {
    /// The backend name (e.g., "in_memory", "file", "none").
    fn name(&self) -> &str;

    /// Return items ranked best-first, limited to roughly `budget_hint` tokens.
    async fn retrieve(
        &self,
        request: RetrievalRequest,
    ) -> std::result::Result<Vec<MemoryItem>, SubsystemError>;

    /// Persist the record of a finished turn.
    async fn persist(&self, record: TurnRecord) -> std::result::Result<(), SubsystemError>;
}
