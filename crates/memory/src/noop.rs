//! No-op memory service — disables memory entirely.

use async_trait::async_trait;
use nexus_core::error::SubsystemError;
use nexus_core::memory::{MemoryItem, MemoryService, RetrievalRequest, TurnRecord};

/// A memory service that remembers nothing and recalls nothing.
///
/// Retrieval succeeds with no items, so the memory section is present but
/// empty rather than counted as a failure.
pub struct NoopMemory;

#[async_trait]
impl MemoryService for NoopMemory {
    fn name(&self) -> &str {
        "none"
    }

    async fn retrieve(&self, _request: RetrievalRequest) -> Result<Vec<MemoryItem>, SubsystemError> {
        Ok(Vec::new())
    }

    async fn persist(&self, _record: TurnRecord) -> Result<(), SubsystemError> {
        Ok(())
    }
}
