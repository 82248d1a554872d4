//! Memory collaborators for nexus.
//!
//! Every store ranks by keyword relevance, then recency, and respects the
//! caller's token hint instead of returning everything.

pub mod file_backend;
pub mod in_memory;
pub mod noop;
pub mod ranking;

pub use file_backend::FileMemoryService;
pub use in_memory::InMemoryMemoryService;
pub use noop::NoopMemory;
pub use ranking::{StoredMemory, item_cost, rank, relevance};
