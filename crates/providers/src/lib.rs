//! LLM provider implementations for nexus.
//!
//! All providers implement the `nexus_core::Provider` trait.
//! [`build_from_config`] selects one from the `[model]` config section.

pub mod echo;
pub mod openai_compat;
pub mod router;

pub use echo::EchoProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use router::{build_from_config, is_local};
