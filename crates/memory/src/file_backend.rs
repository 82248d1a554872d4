//! File-based memory service — persistent JSON-lines storage.
//!
//! Each line is a JSON-encoded [`StoredMemory`]. Entries are loaded into
//! memory on creation; every persisted turn is appended as one new line, so
//! a crash mid-write can cost at most the last line.
//!
//! Storage location: `~/.nexus/memory/memories.jsonl` unless configured.

use crate::ranking::{StoredMemory, rank};
use async_trait::async_trait;
use nexus_core::error::{MemoryError, SubsystemError};
use nexus_core::memory::{MemoryItem, MemoryService, RetrievalRequest, TurnRecord};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// A file-backed memory store using JSONL (one JSON object per line).
pub struct FileMemoryService {
    path: PathBuf,
    entries: Arc<RwLock<Vec<StoredMemory>>>,
}

impl FileMemoryService {
    /// Open the store at `path`.
    ///
    /// If the file exists, entries are loaded from it.
    /// If the file does not exist, starts empty (file created on first write).
    pub fn new(path: PathBuf) -> Self {
        let entries = Self::load_from_disk(&path);
        debug!(path = %path.display(), count = entries.len(), "File memory loaded");
        Self {
            path,
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    /// Default path: `~/.nexus/memory/memories.jsonl`
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home)
            .join(".nexus")
            .join("memory")
            .join("memories.jsonl")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    fn load_from_disk(path: &Path) -> Vec<StoredMemory> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<StoredMemory>(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted memory entry");
                    None
                }
            })
            .collect()
    }

    async fn append(&self, entry: &StoredMemory) -> Result<(), MemoryError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                MemoryError::Storage(format!("Failed to create memory directory: {e}"))
            })?;
        }

        let mut line = serde_json::to_string(entry)
            .map_err(|e| MemoryError::Storage(format!("Failed to serialize memory entry: {e}")))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to open memory file: {e}")))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to write memory file: {e}")))?;
        file.flush()
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to flush memory file: {e}")))?;
        Ok(())
    }

    /// Add a memory and append it to disk.
    pub async fn remember(&self, entry: StoredMemory) -> Result<String, MemoryError> {
        // Hold the write lock across the append so lines never interleave.
        let mut entries = self.entries.write().await;
        self.append(&entry).await?;
        let id = entry.item.id.clone();
        entries.push(entry);
        Ok(id)
    }
}

#[async_trait]
impl MemoryService for FileMemoryService {
    fn name(&self) -> &str {
        "file"
    }

    async fn retrieve(&self, request: RetrievalRequest) -> Result<Vec<MemoryItem>, SubsystemError> {
        let entries = self.entries.read().await;
        Ok(rank(entries.iter(), &request))
    }

    async fn persist(&self, record: TurnRecord) -> Result<(), SubsystemError> {
        self.remember(StoredMemory::from_turn(&record)).await?;
        Ok(())
    }
}
