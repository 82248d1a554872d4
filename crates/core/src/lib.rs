//! # Nexus Core
//!
//! Domain types, collaborator traits, and error definitions for the nexus
//! turn governor. This crate holds **no orchestration logic**. It defines
//! the model that the governor and every collaborator implementation share.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (identity, mood, memory, language model) is a
//! trait here. Implementations live in their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Scripted stubs in tests, with the exact failure modes of real backends
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod identity;
pub mod memory;
pub mod message;
pub mod mood;
pub mod provider;
pub mod token;
pub mod turn;

// Re-export key types at crate root for ergonomics
pub use error::{BudgetError, Error, MemoryError, ProviderError, Result, SubsystemError};
pub use identity::{IdentityInvariant, IdentityKernel, IdentitySnapshot, IdentitySource};
pub use memory::{MemoryItem, MemoryService, RetrievalRequest, TurnRecord};
pub use message::{Message, Role};
pub use mood::{MoodSource, MoodState};
pub use provider::{Provider, ProviderRequest, ProviderResponse, Usage};
pub use token::{HeuristicCounter, TokenCounter, estimate_tokens};
pub use turn::{DegradationMode, Subsystem};
