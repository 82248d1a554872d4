//! Subsystem gateways — thin call + timeout wrappers around collaborators.
//!
//! Every collaborator call goes through [`bounded`], which enforces the
//! timeout and catches panics, then the result is folded into an
//! [`Outcome`]. Nothing a collaborator does (error, hang, panic) can reach
//! the orchestrator as anything other than a tagged value.

use crate::context::prompt::StructuredPrompt;
use futures::FutureExt;
use nexus_core::{
    HeuristicCounter, IdentitySnapshot, IdentitySource, MemoryItem, MemoryService, MoodSource,
    MoodState, Provider, ProviderError, ProviderRequest, RetrievalRequest, SubsystemError,
    TokenCounter, TurnRecord,
};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Uniform result of one gateway call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    Failure(FailureReason),
    Unreachable(String),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Self::Success(v) => Some(v),
            _ => None,
        }
    }
}

/// Why a call produced no payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Timeout(Duration),
    Error(String),
    Panic(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout(d) => write!(f, "timed out after {}ms", d.as_millis()),
            Self::Error(e) => write!(f, "{e}"),
            Self::Panic(msg) => write!(f, "panicked: {msg}"),
        }
    }
}

/// Run `fut` with a deadline, converting a panic into a [`FailureReason`].
pub async fn bounded<F, T>(limit: Duration, fut: F) -> Result<T, FailureReason>
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(limit, AssertUnwindSafe(fut).catch_unwind()).await {
        Err(_) => Err(FailureReason::Timeout(limit)),
        Ok(Err(payload)) => Err(FailureReason::Panic(panic_message(payload.as_ref()))),
        Ok(Ok(value)) => Ok(value),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

fn fold<T>(result: Result<Result<T, SubsystemError>, FailureReason>) -> Outcome<T> {
    match result {
        Ok(Ok(v)) => Outcome::Success(v),
        Ok(Err(SubsystemError::Failed(msg))) => Outcome::Failure(FailureReason::Error(msg)),
        Ok(Err(SubsystemError::Unreachable(msg))) => Outcome::Unreachable(msg),
        Err(reason) => Outcome::Failure(reason),
    }
}

// ── Identity / mood / memory ──────────────────────────────────────────────

#[derive(Clone)]
pub struct IdentityGateway {
    source: Arc<dyn IdentitySource>,
}

impl IdentityGateway {
    pub fn new(source: Arc<dyn IdentitySource>) -> Self {
        Self { source }
    }

    pub async fn call(&self, user_id: &str, timeout: Duration) -> Outcome<IdentitySnapshot> {
        let outcome = fold(bounded(timeout, self.source.get_snapshot(user_id)).await);
        debug!(source = self.source.name(), success = outcome.is_success(), "Identity call finished");
        outcome
    }
}

#[derive(Clone)]
pub struct MoodGateway {
    source: Arc<dyn MoodSource>,
}

impl MoodGateway {
    pub fn new(source: Arc<dyn MoodSource>) -> Self {
        Self { source }
    }

    pub async fn call(&self, user_id: &str, timeout: Duration) -> Outcome<MoodState> {
        let outcome = fold(bounded(timeout, self.source.get_state(user_id)).await);
        debug!(source = self.source.name(), success = outcome.is_success(), "Mood call finished");
        outcome
    }
}

#[derive(Clone)]
pub struct MemoryGateway {
    service: Arc<dyn MemoryService>,
}

impl MemoryGateway {
    pub fn new(service: Arc<dyn MemoryService>) -> Self {
        Self { service }
    }

    pub async fn retrieve(&self, request: RetrievalRequest, timeout: Duration) -> Outcome<Vec<MemoryItem>> {
        let hint = request.budget_hint;
        let outcome = fold(bounded(timeout, self.service.retrieve(request)).await);
        if let Outcome::Success(items) = &outcome {
            debug!(backend = self.service.name(), items = items.len(), budget_hint = hint, "Memory retrieved");
        }
        outcome
    }

    pub async fn persist(&self, record: TurnRecord, timeout: Duration) -> Outcome<()> {
        fold(bounded(timeout, self.service.persist(record)).await)
    }
}

// ── Language model ────────────────────────────────────────────────────────

/// Bounded retry for unreachable model calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for every further one.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(retry))
    }
}

/// A model response after the output cap was applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub completion_tokens: usize,
    /// Whether the output was cut to the reserved cap.
    pub truncated: bool,
    pub model: String,
    /// Calls made, including retries.
    pub attempts: u32,
}

#[derive(Clone)]
pub struct LlmGateway {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    retry: RetryPolicy,
    counter: Arc<dyn TokenCounter>,
}

impl LlmGateway {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            retry: RetryPolicy::default(),
            counter: Arc::new(HeuristicCounter),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generate a response for `prompt`, never returning more than
    /// `max_output_tokens`.
    ///
    /// Network errors, rate limits, gateway 5xx answers, and call timeouts
    /// are `Unreachable` and retried per the [`RetryPolicy`]. Any other
    /// provider error is a `Failure` and is returned at once.
    pub async fn generate(
        &self,
        prompt: &StructuredPrompt,
        max_output_tokens: usize,
        timeout: Duration,
    ) -> Outcome<Generation> {
        let request = ProviderRequest {
            model: self.model.clone(),
            messages: prompt.to_messages(),
            temperature: self.temperature,
            max_tokens: Some(u32::try_from(max_output_tokens).unwrap_or(u32::MAX)),
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = bounded(timeout, self.provider.complete(request.clone())).await;
            let unreachable = match result {
                Ok(Ok(response)) => {
                    let reported = response.usage.map(|u| u.completion_tokens as usize);
                    return Outcome::Success(self.cap(
                        response.message.content,
                        reported,
                        max_output_tokens,
                        response.model,
                        attempt,
                    ));
                }
                Ok(Err(e)) if e.is_unreachable() => e.to_string(),
                Ok(Err(e)) => return Outcome::Failure(FailureReason::Error(rejection(&e))),
                Err(FailureReason::Timeout(d)) => format!("no response within {}ms", d.as_millis()),
                Err(reason) => return Outcome::Failure(reason),
            };

            let retry = attempt - 1;
            if retry >= self.retry.max_retries {
                warn!(provider = self.provider.name(), attempts = attempt, "LLM unreachable: {unreachable}");
                return Outcome::Unreachable(unreachable);
            }
            let delay = self.retry.delay_for(retry);
            warn!(
                provider = self.provider.name(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "LLM unreachable, retrying: {unreachable}"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn cap(
        &self,
        mut text: String,
        reported: Option<usize>,
        max_output_tokens: usize,
        model: String,
        attempts: u32,
    ) -> Generation {
        let mut completion_tokens = reported.unwrap_or_else(|| self.counter.count(&text));
        let truncated = completion_tokens > max_output_tokens;
        if truncated {
            let limit = floor_char_boundary(&text, max_output_tokens.saturating_mul(4));
            text.truncate(limit);
            completion_tokens = max_output_tokens;
            debug!(cap = max_output_tokens, "Model output truncated to reserved cap");
        }
        Generation {
            text,
            completion_tokens,
            truncated,
            model,
            attempts,
        }
    }
}

fn rejection(e: &ProviderError) -> String {
    format!("model rejected the request: {e}")
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
