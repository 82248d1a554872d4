//! Shared storage record and ranking used by the built-in memory stores.

use chrono::{DateTime, Utc};
use nexus_core::{MemoryItem, RetrievalRequest, TurnRecord, estimate_tokens};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Query words shorter than this are ignored for relevance.
const MIN_TERM_LEN: usize = 3;

/// A memory item together with its owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMemory {
    pub user_id: String,
    pub session_id: String,
    #[serde(flatten)]
    pub item: MemoryItem,
}

impl StoredMemory {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            item: MemoryItem::new(Uuid::new_v4().to_string(), content, 0.0),
        }
    }

    /// Override the creation time (recency is part of the ranking).
    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.item.created_at = created_at;
        self
    }

    /// The episodic memory kept for a finished turn.
    pub fn from_turn(record: &TurnRecord) -> Self {
        let mut stored = Self::new(&record.user_id, &record.session_id, record.summary())
            .at(record.created_at);
        stored.item.tags = vec!["turn".into(), record.mode.as_str().into()];
        stored
    }
}

/// Lowercased distinct words of `text` long enough to count.
fn terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_TERM_LEN)
        .map(str::to_lowercase)
        .collect()
}

/// Fraction of query terms that appear in `content`.
pub fn relevance(query: &str, content: &str) -> f32 {
    let wanted = terms(query);
    if wanted.is_empty() {
        return 0.0;
    }
    let have = terms(content);
    let hits = wanted.iter().filter(|t| have.contains(*t)).count();
    hits as f32 / wanted.len() as f32
}

/// Estimated cost of one item once rendered as a memory line.
pub fn item_cost(item: &MemoryItem) -> usize {
    estimate_tokens(&format!("- {}\n", item.content))
}

/// Rank a user's memories by relevance, then recency, and keep the best-first
/// prefix whose estimated cost fits `budget_hint`.
///
/// Ties on both keys fall back to the id, so the same store and request
/// always produce the same list.
pub fn rank<'a>(
    entries: impl IntoIterator<Item = &'a StoredMemory>,
    request: &RetrievalRequest,
) -> Vec<MemoryItem> {
    let mut scored: Vec<MemoryItem> = entries
        .into_iter()
        .filter(|e| e.user_id == request.user_id)
        .map(|e| {
            let mut item = e.item.clone();
            item.score = relevance(&request.query, &item.content);
            item
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut spent = 0usize;
    let mut out = Vec::new();
    for item in scored {
        let cost = item_cost(&item);
        if spent + cost > request.budget_hint {
            break;
        }
        spent += cost;
        out.push(item);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn request(query: &str, budget_hint: usize) -> RetrievalRequest {
        RetrievalRequest {
            user_id: "alice".into(),
            session_id: "s1".into(),
            query: query.into(),
            budget_hint,
        }
    }

    #[test]
    fn relevance_counts_shared_terms() {
        assert_eq!(relevance("rust borrow checker", "The borrow checker in Rust"), 1.0);
        assert!((relevance("rust python", "I like rust") - 0.5).abs() < 1e-6);
        assert_eq!(relevance("a an", "anything"), 0.0);
    }

    #[test]
    fn ranks_relevance_then_recency() {
        let now = Utc::now();
        let entries = vec![
            StoredMemory::new("alice", "s", "likes tea").at(now - Duration::hours(2)),
            StoredMemory::new("alice", "s", "rust projects").at(now - Duration::hours(3)),
            StoredMemory::new("alice", "s", "likes coffee").at(now - Duration::hours(1)),
        ];
        let ranked = rank(&entries, &request("tell me about rust", 1000));
        let contents: Vec<_> = ranked.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["rust projects", "likes coffee", "likes tea"]);
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn other_users_are_invisible() {
        let entries = vec![StoredMemory::new("bob", "s", "rust secrets")];
        assert!(rank(&entries, &request("rust", 1000)).is_empty());
    }

    #[test]
    fn stops_when_hint_exhausted() {
        let entries: Vec<_> = (0..5)
            .map(|i| StoredMemory::new("alice", "s", format!("rust note {i} {}", "x".repeat(30))))
            .collect();
        let one = item_cost(&entries[0].item);
        let ranked = rank(&entries, &request("rust", one * 2 + 1));
        assert_eq!(ranked.len(), 2);
        assert!(rank(&entries, &request("rust", 0)).is_empty());
    }

    #[test]
    fn turn_memory_is_tagged() {
        let record = TurnRecord {
            user_id: "alice".into(),
            session_id: "s1".into(),
            request: "hi".into(),
            response: "hello".into(),
            mode: nexus_core::DegradationMode::Degraded,
            prompt_tokens: 1,
            completion_tokens: 1,
            annotated: false,
            created_at: Utc::now(),
        };
        let stored = StoredMemory::from_turn(&record);
        assert_eq!(stored.item.tags, vec!["turn", "degraded"]);
        assert!(stored.item.content.contains("hello"));
    }
}
