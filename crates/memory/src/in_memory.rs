//! In-memory memory service — useful for testing and ephemeral sessions.

use crate::ranking::{StoredMemory, rank};
use async_trait::async_trait;
use nexus_core::error::SubsystemError;
use nexus_core::memory::{MemoryItem, MemoryService, RetrievalRequest, TurnRecord};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A memory service that keeps every memory in a Vec.
/// Nothing survives a restart.
#[derive(Clone)]
pub struct InMemoryMemoryService {
    entries: Arc<RwLock<Vec<StoredMemory>>>,
}

impl InMemoryMemoryService {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Add a memory directly (seeding, imports, tests).
    pub async fn remember(&self, memory: StoredMemory) -> String {
        let id = memory.item.id.clone();
        self.entries.write().await.push(memory);
        id
    }

    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// All memories for one user, in insertion order.
    pub async fn for_user(&self, user_id: &str) -> Vec<MemoryItem> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.user_id == user_id)
            .map(|e| e.item.clone())
            .collect()
    }
}

impl Default for InMemoryMemoryService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryService for InMemoryMemoryService {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn retrieve(&self, request: RetrievalRequest) -> Result<Vec<MemoryItem>, SubsystemError> {
        let entries = self.entries.read().await;
        Ok(rank(entries.iter(), &request))
    }

    async fn persist(&self, record: TurnRecord) -> Result<(), SubsystemError> {
        self.remember(StoredMemory::from_turn(&record)).await;
        Ok(())
    }
}
