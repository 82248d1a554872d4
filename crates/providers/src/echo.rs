//! Deterministic offline provider.
//!
//! Answers with the last user message, so the full pipeline can run without
//! network access or an API key. Same input, same output.

use async_trait::async_trait;
use nexus_core::error::ProviderError;
use nexus_core::message::{Message, Role};
use nexus_core::provider::*;
use nexus_core::token::estimate_tokens;

pub struct EchoProvider;

impl EchoProvider {
    fn reply_for(messages: &[Message]) -> String {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        // Assembled prompts end with the request section; echo only that.
        let request = last_user
            .rsplit_once("## CURRENT REQUEST\n")
            .map(|(_, tail)| tail)
            .unwrap_or(last_user)
            .trim();

        format!("You said: {request}")
    }
}

#[async_trait]
impl Provider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let text = Self::reply_for(&request.messages);
        let prompt_tokens: usize = request.messages.iter().map(|m| estimate_tokens(&m.content)).sum();
        let completion_tokens = estimate_tokens(&text);

        Ok(ProviderResponse {
            message: Message::assistant(text),
            usage: Some(Usage {
                prompt_tokens: prompt_tokens as u32,
                completion_tokens: completion_tokens as u32,
                total_tokens: (prompt_tokens + completion_tokens) as u32,
            }),
            model: request.model,
        })
    }
}
