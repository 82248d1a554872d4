//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, llama.cpp, and any endpoint
//! exposing `/v1/chat/completions`.
//!
//! Only non-streaming completions are used: the governor validates the whole
//! response before returning it, so there is nothing to gain from deltas.

use async_trait::async_trait;
use nexus_core::error::ProviderError;
use nexus_core::message::Message;
use nexus_core::provider::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// Endpoint used when `[model].api_url` is unset.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    ///
    /// No overall request timeout is set here: the LLM gateway owns the
    /// deadline for every call.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.api_key)
        }
    }
}

impl<'a> ChatBody<'a> {
    fn from_request(request: &'a ProviderRequest) -> Self {
        Self {
            model: &request.model,
            messages: request
                .messages
                .iter()
                .map(|m| OutgoingMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
        }
    }
}

/// Map a transport failure to the provider error taxonomy.
fn classify_transport(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Map a non-success HTTP status to the provider error taxonomy.
///
/// Gateway-style 5xx answers mean the model server is not reachable behind
/// its proxy, so they count as network errors.
fn classify_status(status: u16, retry_after: Option<u64>, body: String) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        401 | 403 => {
            ProviderError::AuthenticationFailed("Invalid API key or insufficient permissions".into())
        }
        404 => ProviderError::ModelNotFound(body),
        502..=504 => ProviderError::Network(format!("upstream unavailable (status {status})")),
        _ => ProviderError::ApiError {
            status_code: status,
            message: body,
        },
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn malformed(message: impl Into<String>) -> ProviderError {
    ProviderError::ApiError {
        status_code: 200,
        message: message.into(),
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            "Sending completion request"
        );

        let response = self
            .authorized(self.client.post(self.chat_url()))
            .json(&ChatBody::from_request(&request))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let wait = retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "Provider returned error");
            return Err(classify_status(status.as_u16(), wait, body));
        }

        let reply: ChatReply = response
            .json()
            .await
            .map_err(|e| malformed(format!("Failed to parse response: {e}")))?;
        let text = reply
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| malformed("No choices in response"))?
            .message
            .content
            .unwrap_or_default();

        Ok(ProviderResponse {
            message: Message::assistant(text),
            usage: reply.usage,
            model: reply.model,
        })
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(classify_transport)?;
        Ok(response.status().is_success())
    }
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<OutgoingMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OutgoingMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    model: String,
    choices: Vec<ReplyChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ReplyChoice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let provider = OpenAiCompatProvider::new("openai_compat", "http://box:11434/v1/", "");
        assert_eq!(provider.base_url(), "http://box:11434/v1");
    }

    fn request(max_tokens: Option<u32>) -> ProviderRequest {
        ProviderRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![Message::system("You are helpful"), Message::user("hi")],
            temperature: 0.2,
            max_tokens,
        }
    }

    #[test]
    fn body_maps_roles_and_output_cap() {
        let req = request(Some(512));
        let body = serde_json::to_value(ChatBody::from_request(&req)).unwrap();
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn body_omits_unset_cap() {
        let req = request(None);
        let body = serde_json::to_value(ChatBody::from_request(&req)).unwrap();
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn status_classification() {
        assert!(classify_status(429, None, String::new()).is_unreachable());
        assert!(classify_status(503, None, String::new()).is_unreachable());
        assert!(!classify_status(400, None, "bad request".into()).is_unreachable());
        assert!(matches!(
            classify_status(401, None, String::new()),
            ProviderError::AuthenticationFailed(_)
        ));
    }

    #[test]
    fn rate_limit_honours_retry_after() {
        let err = classify_status(429, Some(12), String::new());
        assert!(matches!(err, ProviderError::RateLimited { retry_after_secs: 12 }));

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "30".parse().unwrap());
        assert_eq!(retry_after(&headers), Some(30));
    }

    #[test]
    fn parse_completion_reply() {
        let data = r#"{
            "model": "gpt-4o-mini",
            "choices": [{"message": {"role": "assistant", "content": "Hi there"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 3, "total_tokens": 13}
        }"#;
        let parsed: ChatReply = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("Hi there"));
        assert_eq!(parsed.usage.unwrap().total_tokens, 13);
    }

    #[test]
    fn reply_without_usage_parses() {
        let data = r#"{"model": "llama3", "choices": [{"message": {"content": null}}]}"#;
        let parsed: ChatReply = serde_json::from_str(data).unwrap();
        assert!(parsed.usage.is_none());
        assert!(parsed.choices[0].message.content.is_none());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_error() {
        // Nothing listens on the discard port.
        let provider = OpenAiCompatProvider::new("test", "http://127.0.0.1:9/v1", "k");
        let err = provider
            .complete(ProviderRequest {
                model: "m".into(),
                messages: vec![Message::user("hi")],
                temperature: 0.0,
                max_tokens: None,
            })
            .await
            .unwrap_err();
        assert!(err.is_unreachable());
    }
}
