//! The turn pipeline.
//!
//! [`Orchestrator::process_turn`] is the only entry point. It walks the
//! [`TurnState`] machine once per call and always returns a [`TurnResult`];
//! collaborator failures become degradation, never errors.
//!
//! # Pipeline
//!
//! 1. Build the turn's [`TokenBudget`].
//! 2. Ask identity, mood, and memory concurrently, each under its own
//!    timeout. Failures are replaced by the skeleton identity, the baseline
//!    mood, or an omitted memory slot.
//! 3. Assemble the prompt. A required section that does not fit aborts.
//! 4. Call the model with bounded retry. Unreachable aborts.
//! 5. Check the response against the identity rules, regenerating with a
//!    stricter system section at most `max_regenerations` times.
//! 6. Persist the episodic record. Failures are logged and swallowed.

use crate::context::{
    AbortSignal, PromptAssembler, Section, StructuredPrompt, TokenBudget, TurnContext,
};
use crate::degradation::DegradationTracker;
use crate::gateway::{
    FailureReason, Generation, IdentityGateway, LlmGateway, MemoryGateway, MoodGateway, Outcome,
    RetryPolicy,
};
use crate::turn::{AbortReason, TokenUsageReport, TurnResult, TurnState};
use crate::validation::{Violation, check_response};
use chrono::Utc;
use nexus_config::{GovernorConfig, TimeoutConfig};
use nexus_core::{
    BudgetError, DegradationMode, IdentitySnapshot, IdentitySource, MemoryService, Message,
    MoodSource, MoodState, Provider, RetrievalRequest, Subsystem, TurnRecord,
};
use nexus_telemetry::{DegradationEvent, DegradationKind, Observability, TelemetryEngine, TurnMetrics};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Validated budget shape, turned into a fresh [`TokenBudget`] per turn.
#[derive(Debug, Clone)]
struct BudgetPlan {
    total: usize,
    reserved_output: usize,
    priorities: Vec<Section>,
}

impl BudgetPlan {
    fn new(total: usize, reserved_output: usize, priorities: Vec<Section>) -> Result<Self, BudgetError> {
        TokenBudget::initialize(total, reserved_output, &priorities)?;
        Ok(Self {
            total,
            reserved_output,
            priorities,
        })
    }

    fn start(&self) -> Result<TokenBudget, BudgetError> {
        TokenBudget::initialize(self.total, self.reserved_output, &self.priorities)
    }
}

/// Per-turn bookkeeping: pipeline state, failures, and telemetry events.
struct TurnTrace {
    state: TurnState,
    tracker: DegradationTracker,
    events: Vec<DegradationEvent>,
}

impl TurnTrace {
    fn new() -> Self {
        Self {
            state: TurnState::Init,
            tracker: DegradationTracker::new(),
            events: Vec::new(),
        }
    }

    fn advance(&mut self, next: TurnState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal turn transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(from = ?self.state, to = ?next, "Turn state");
        self.state = next;
    }

    fn degrade(&mut self, subsystem: Subsystem, kind: DegradationKind, message: String) {
        self.tracker.record_failure(subsystem);
        self.events
            .push(Observability::record_degradation(subsystem.as_str(), kind, message));
    }

    fn note(&mut self, subsystem: &str, kind: DegradationKind, message: impl Into<String>) {
        self.events
            .push(Observability::record_degradation(subsystem, kind, message));
    }

    fn failed(&self) -> Vec<Subsystem> {
        self.tracker.failed().collect()
    }

    /// End the turn without a response. The mode comes from the tracker:
    /// a budget misfit is `compute_mode(false)`, an unreachable model is
    /// already recorded, and every other reason is recorded here.
    fn abort(&mut self, reason: AbortReason, usage: TokenUsageReport) -> TurnResult {
        let budget_fit_ok = reason != AbortReason::BudgetInsufficient;
        if matches!(reason, AbortReason::LlmRejected | AbortReason::EmptyRequest) {
            self.tracker.record_abort();
        }
        self.advance(TurnState::Aborted);
        let mode = self.tracker.compute_mode(budget_fit_ok);
        debug_assert_eq!(mode, DegradationMode::Aborted);
        TurnResult::aborted(reason, mode, usage, self.failed())
    }
}

fn failure_kind(reason: &FailureReason) -> DegradationKind {
    match reason {
        FailureReason::Timeout(_) => DegradationKind::Timeout,
        FailureReason::Error(_) | FailureReason::Panic(_) => DegradationKind::Error,
    }
}

/// Drives turns end to end.
///
/// Holds only read-only configuration and collaborator handles, so one
/// instance can serve any number of concurrent turns.
#[derive(Clone)]
pub struct Orchestrator {
    identity: IdentityGateway,
    mood: MoodGateway,
    memory: MemoryGateway,
    llm: LlmGateway,
    assembler: PromptAssembler,
    plan: BudgetPlan,
    timeouts: TimeoutConfig,
    max_regenerations: u32,
    annotation: String,
    telemetry: Option<Arc<TelemetryEngine>>,
}

impl Orchestrator {
    /// Create an orchestrator with default budget, timeouts, and retry.
    pub fn new(
        identity: Arc<dyn IdentitySource>,
        mood: Arc<dyn MoodSource>,
        memory: Arc<dyn MemoryService>,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
    ) -> Self {
        let defaults = GovernorConfig::default();
        Self {
            identity: IdentityGateway::new(identity),
            mood: MoodGateway::new(mood),
            memory: MemoryGateway::new(memory),
            llm: LlmGateway::new(provider, model),
            assembler: PromptAssembler::default(),
            plan: BudgetPlan {
                total: defaults.budget.total_tokens,
                reserved_output: defaults.budget.reserved_output,
                priorities: Section::PACKING_ORDER.to_vec(),
            },
            timeouts: defaults.timeouts,
            max_regenerations: defaults.validation.max_regenerations,
            annotation: defaults.validation.annotation,
            telemetry: None,
        }
    }

    /// Create an orchestrator from loaded configuration. Fails only if the
    /// budget could never be initialized.
    pub fn from_config(
        config: &GovernorConfig,
        identity: Arc<dyn IdentitySource>,
        mood: Arc<dyn MoodSource>,
        memory: Arc<dyn MemoryService>,
        provider: Arc<dyn Provider>,
    ) -> Result<Self, BudgetError> {
        let orchestrator = Self::new(identity, mood, memory, provider, config.model.model.clone())
            .with_budget(config.budget.total_tokens, config.budget.reserved_output)?
            .with_timeouts(config.timeouts.clone())
            .with_retry(RetryPolicy {
                max_retries: config.retry.llm_max_retries,
                backoff: Duration::from_millis(config.retry.llm_backoff_ms),
            })
            .with_temperature(config.model.temperature)
            .with_max_regenerations(config.validation.max_regenerations)
            .with_annotation(config.validation.annotation.clone())
            .with_assembler(
                PromptAssembler::default().with_history_window(config.budget.history_messages()),
            );
        Ok(orchestrator)
    }

    /// Set the per-turn token ceiling and output reservation.
    pub fn with_budget(mut self, total: usize, reserved_output: usize) -> Result<Self, BudgetError> {
        self.plan = BudgetPlan::new(total, reserved_output, self.plan.priorities.clone())?;
        Ok(self)
    }

    /// Set a custom packing order.
    pub fn with_priorities(mut self, priorities: Vec<Section>) -> Result<Self, BudgetError> {
        self.plan = BudgetPlan::new(self.plan.total, self.plan.reserved_output, priorities)?;
        Ok(self)
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.llm = self.llm.with_retry(retry);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.llm = self.llm.with_temperature(temperature);
        self
    }

    pub fn with_max_regenerations(mut self, max: u32) -> Self {
        self.max_regenerations = max;
        self
    }

    pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = annotation.into();
        self
    }

    pub fn with_assembler(mut self, assembler: PromptAssembler) -> Self {
        self.llm = self.llm.with_counter(assembler.shared_counter());
        self.assembler = assembler;
        self
    }

    /// Report every finished turn into an aggregate engine.
    pub fn with_telemetry(mut self, engine: Arc<TelemetryEngine>) -> Self {
        self.telemetry = Some(engine);
        self
    }

    pub fn telemetry(&self) -> Option<&Arc<TelemetryEngine>> {
        self.telemetry.as_ref()
    }

    /// Process one turn.
    ///
    /// Dropping the returned future cancels every in-flight collaborator
    /// call. Persistence only starts after validation, so a cancelled turn
    /// never writes a partial record.
    pub async fn process_turn(
        &self,
        user_id: &str,
        session_id: &str,
        request_text: &str,
        history: &[Message],
    ) -> TurnResult {
        let started = Instant::now();
        let mut trace = TurnTrace::new();
        info!(user_id, session_id, history = history.len(), "Processing turn");

        let result = self
            .run(&mut trace, user_id, session_id, request_text, history)
            .await;

        self.report(&trace, &result, user_id, session_id, started.elapsed());
        result
    }

    async fn run(
        &self,
        trace: &mut TurnTrace,
        user_id: &str,
        session_id: &str,
        request_text: &str,
        history: &[Message],
    ) -> TurnResult {
        // ── Init → BudgetReady ──
        let mut budget = match self.plan.start() {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "Turn budget could not be initialized");
                let report = TokenUsageReport::unbudgeted(self.plan.total, self.plan.reserved_output);
                return trace.abort(AbortReason::BudgetInsufficient, report);
            }
        };
        trace.advance(TurnState::BudgetReady);

        if request_text.trim().is_empty() {
            return trace.abort(AbortReason::EmptyRequest, TokenUsageReport::from_budget(&budget));
        }

        // ── BudgetReady → ContextGathered ──
        let context = self
            .gather(trace, &budget, user_id, session_id, request_text, history)
            .await;
        trace.advance(TurnState::ContextGathered);

        // ── ContextGathered → PromptReady ──
        let mut prompt = match self.assembler.assemble(&mut budget, &context, &trace.tracker) {
            Ok(p) => p,
            Err(signal) => return self.abort_assembly(trace, signal, &budget),
        };
        trace.advance(TurnState::PromptReady);
        debug!(
            sections = prompt.sections().len(),
            prompt_tokens = prompt.total_tokens(),
            "Prompt assembled"
        );

        // ── PromptReady → ModelCalled ──
        let mut generation = match self.call_model(trace, &prompt).await {
            Ok(g) => g,
            Err(reason) => {
                let report = TokenUsageReport::from_budget(&budget).with_assembly(prompt.stats());
                return trace.abort(reason, report);
            }
        };
        trace.advance(TurnState::ModelCalled);

        // ── ModelCalled → Validated ──
        let mut violations = check_response(&context.identity_snapshot, &generation.text);
        let mut regenerations = 0;
        while !violations.is_empty() && regenerations < self.max_regenerations {
            regenerations += 1;
            warn!(
                violations = violations.len(),
                attempt = regenerations,
                "Response violates identity rules, regenerating"
            );
            match self.regenerate(trace, &context, &violations).await {
                Some((strict_budget, strict_prompt, regenerated)) => {
                    violations = check_response(&context.identity_snapshot, &regenerated.text);
                    budget = strict_budget;
                    prompt = strict_prompt;
                    generation = regenerated;
                }
                None => break,
            }
        }
        let safety_annotation = if violations.is_empty() {
            None
        } else {
            warn!(
                ids = ?violations.iter().map(|v| v.invariant_id.as_str()).collect::<Vec<_>>(),
                "Returning annotated response"
            );
            Some(self.annotation.clone())
        };
        trace.advance(TurnState::Validated);

        let mode = trace.tracker.compute_mode(true);
        let report = TokenUsageReport::from_budget(&budget)
            .with_assembly(prompt.stats())
            .with_completion(generation.completion_tokens);

        // ── Validated → Persisted ──
        let record = TurnRecord {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            request: request_text.to_string(),
            response: generation.text.clone(),
            mode,
            prompt_tokens: report.prompt_tokens,
            completion_tokens: report.completion_tokens,
            annotated: safety_annotation.is_some(),
            created_at: Utc::now(),
        };
        match self.memory.persist(record, self.timeouts.persist()).await {
            Outcome::Success(()) => debug!("Turn record persisted"),
            Outcome::Failure(reason) => {
                warn!(error = %reason, "Persisting turn record failed; response unaffected")
            }
            Outcome::Unreachable(msg) => {
                warn!(error = %msg, "Memory unreachable for persistence; response unaffected")
            }
        }
        trace.advance(TurnState::Persisted);

        // ── Persisted → Done ──
        trace.advance(TurnState::Done);
        TurnResult {
            response_text: generation.text,
            degradation_mode: mode,
            token_usage: report,
            aborted: false,
            abort_reason: None,
            failed_subsystems: trace.failed(),
            safety_annotation,
            invariant_violations: violations,
            regenerations,
            truncated: generation.truncated,
        }
    }

    /// Query identity, mood, and memory concurrently and substitute
    /// fallbacks for whatever failed.
    async fn gather(
        &self,
        trace: &mut TurnTrace,
        budget: &TokenBudget,
        user_id: &str,
        session_id: &str,
        request_text: &str,
        history: &[Message],
    ) -> TurnContext {
        let retrieval = RetrievalRequest {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            query: request_text.to_string(),
            budget_hint: self.assembler.memory_budget_hint(budget, request_text, history),
        };

        let (identity, mood, memory) = tokio::join!(
            self.identity.call(user_id, self.timeouts.identity()),
            self.mood.call(user_id, self.timeouts.mood()),
            self.memory.retrieve(retrieval, self.timeouts.memory()),
        );

        let identity = match identity {
            Outcome::Success(snapshot) => snapshot,
            failed => {
                record_fallback(trace, Subsystem::Identity, failed, "using minimal skeleton identity");
                IdentitySnapshot::minimal_skeleton()
            }
        };
        let mood = match mood {
            Outcome::Success(state) => state,
            failed => {
                record_fallback(trace, Subsystem::Mood, failed, "using baseline mood");
                MoodState::baseline()
            }
        };
        let memory = match memory {
            Outcome::Success(items) => items,
            failed => {
                record_fallback(trace, Subsystem::Memory, failed, "memory section omitted");
                Vec::new()
            }
        };

        TurnContext::new(user_id, session_id, request_text)
            .with_history(history.to_vec())
            .with_identity(identity)
            .with_mood(mood)
            .with_memory(memory)
    }

    fn abort_assembly(&self, trace: &mut TurnTrace, signal: AbortSignal, budget: &TokenBudget) -> TurnResult {
        let reason = match &signal {
            AbortSignal::EmptyRequest => AbortReason::EmptyRequest,
            AbortSignal::Insufficient { .. } | AbortSignal::Accounting(_) => AbortReason::BudgetInsufficient,
        };
        warn!(%signal, "Prompt assembly aborted the turn");
        trace.abort(reason, TokenUsageReport::from_budget(budget))
    }

    async fn call_model(&self, trace: &mut TurnTrace, prompt: &StructuredPrompt) -> Result<Generation, AbortReason> {
        match self
            .llm
            .generate(prompt, self.plan.reserved_output, self.timeouts.llm())
            .await
        {
            Outcome::Success(g) => {
                if g.truncated {
                    trace.note("llm", DegradationKind::Fallback, "output truncated to reserved cap");
                }
                Ok(g)
            }
            Outcome::Unreachable(msg) => {
                trace.tracker.record_llm_unreachable();
                trace.note("llm", DegradationKind::Unreachable, msg);
                Err(AbortReason::LlmUnreachable)
            }
            Outcome::Failure(reason) => {
                trace.note("llm", failure_kind(&reason), reason.to_string());
                Err(AbortReason::LlmRejected)
            }
        }
    }

    /// One stricter attempt on a fresh budget. `None` keeps the previous
    /// response.
    async fn regenerate(
        &self,
        trace: &mut TurnTrace,
        context: &TurnContext,
        violations: &[Violation],
    ) -> Option<(TokenBudget, StructuredPrompt, Generation)> {
        let mut budget = self.plan.start().ok()?;
        let prompt = match self
            .assembler
            .assemble_strict(&mut budget, context, &trace.tracker, violations)
        {
            Ok(p) => p,
            Err(signal) => {
                warn!(%signal, "Strict prompt does not fit; keeping previous response");
                return None;
            }
        };
        match self
            .llm
            .generate(&prompt, self.plan.reserved_output, self.timeouts.llm())
            .await
        {
            Outcome::Success(g) => Some((budget, prompt, g)),
            Outcome::Failure(reason) => {
                trace.note("llm", failure_kind(&reason), format!("regeneration failed: {reason}"));
                None
            }
            Outcome::Unreachable(msg) => {
                trace.note("llm", DegradationKind::Unreachable, format!("regeneration failed: {msg}"));
                None
            }
        }
    }

    fn report(&self, trace: &TurnTrace, result: &TurnResult, user_id: &str, session_id: &str, elapsed: Duration) {
        let usage = &result.token_usage;
        let metrics = TurnMetrics::new(user_id, session_id, result.degradation_mode)
            .with_latency_ms(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .with_tokens(usage.prompt_tokens + usage.completion_tokens, usage.utilization_pct)
            .with_events(trace.events.clone());
        Observability::log_turn(&metrics);
        if let Some(engine) = &self.telemetry {
            engine.record_turn(metrics);
        }
        info!(
            user_id,
            session_id,
            mode = %result.degradation_mode,
            aborted = result.aborted,
            "Turn finished"
        );
    }
}

fn record_fallback<T>(trace: &mut TurnTrace, subsystem: Subsystem, outcome: Outcome<T>, fallback: &str) {
    match outcome {
        Outcome::Success(_) => {}
        Outcome::Failure(reason) => trace.degrade(subsystem, failure_kind(&reason), reason.to_string()),
        Outcome::Unreachable(msg) => trace.degrade(subsystem, DegradationKind::Unreachable, msg),
    }
    let kind = if subsystem == Subsystem::Memory {
        DegradationKind::Omitted
    } else {
        DegradationKind::Fallback
    };
    trace.note(subsystem.as_str(), kind, fallback);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        Behavior, ScriptedIdentity, ScriptedMemory, ScriptedMood, ScriptedProvider, Step,
    };
    use nexus_core::{IdentityInvariant, MemoryItem, ProviderError};

    struct Rig {
        identity: Arc<ScriptedIdentity>,
        mood: Arc<ScriptedMood>,
        memory: Arc<ScriptedMemory>,
        provider: Arc<ScriptedProvider>,
    }

    impl Rig {
        fn healthy(reply: &str) -> Self {
            Self {
                identity: Arc::new(ScriptedIdentity::ok(IdentitySnapshot::minimal_skeleton())),
                mood: Arc::new(ScriptedMood::ok(MoodState::new(0.3, 0.1, 0.2))),
                memory: Arc::new(ScriptedMemory::with_items(vec![MemoryItem::new(
                    "m1",
                    "The user prefers short answers",
                    0.9,
                )])),
                provider: Arc::new(ScriptedProvider::replying(reply)),
            }
        }

        fn orchestrator(&self) -> Orchestrator {
            Orchestrator::new(
                self.identity.clone(),
                self.mood.clone(),
                self.memory.clone(),
                self.provider.clone(),
                "test-model",
            )
            .with_retry(RetryPolicy {
                max_retries: 1,
                backoff: Duration::from_millis(10),
            })
        }
    }

    #[tokio::test]
    async fn healthy_turn_is_full() {
        let rig = Rig::healthy("Short answer.");
        let result = rig.orchestrator().process_turn("alice", "s1", "Explain Pin", &[]).await;

        assert!(!result.aborted);
        assert_eq!(result.degradation_mode, nexus_core::DegradationMode::Full);
        assert_eq!(result.response_text, "Short answer.");
        assert_eq!(result.token_usage.memory_items_included, 1);
        assert_eq!(rig.memory.persisted().len(), 1);

        let request = rig.provider.last_request().unwrap();
        let system = &request.messages[0].content;
        assert!(system.contains("## MOOD STATE\npleasure=+0.30"));
        assert!(system.contains("prefers short answers"));
        assert_eq!(request.max_tokens, Some(8_000));
    }

    #[tokio::test]
    async fn empty_request_makes_no_calls() {
        let rig = Rig::healthy("unused");
        let result = rig.orchestrator().process_turn("alice", "s1", "  \n", &[]).await;
        assert!(result.aborted);
        assert_eq!(result.abort_reason, Some(AbortReason::EmptyRequest));
        assert_eq!(result.degradation_mode, DegradationMode::Aborted);
        assert_eq!(rig.identity.calls(), 0);
        assert_eq!(rig.provider.calls(), 0);
    }

    #[tokio::test]
    async fn mood_failure_uses_baseline() {
        let mut rig = Rig::healthy("ok");
        rig.mood = Arc::new(ScriptedMood::failing("decay table missing"));
        let result = rig.orchestrator().process_turn("alice", "s1", "hi", &[]).await;
        assert_eq!(result.degradation_mode, nexus_core::DegradationMode::Degraded);
        assert_eq!(result.failed_subsystems, vec![Subsystem::Mood]);
        let system = rig.provider.last_request().unwrap().messages[0].content.clone();
        assert!(system.contains("label=neutral"));
    }

    #[tokio::test]
    async fn panicking_collaborator_is_contained() {
        let mut rig = Rig::healthy("still here");
        rig.identity = Arc::new(ScriptedIdentity::panicking());
        let result = rig.orchestrator().process_turn("alice", "s1", "hi", &[]).await;
        assert!(!result.aborted);
        assert_eq!(result.failed_subsystems, vec![Subsystem::Identity]);
        assert_eq!(result.response_text, "still here");
    }

    #[tokio::test(start_paused = true)]
    async fn memory_timeout_omits_slot_and_finishes() {
        let mut rig = Rig::healthy("answered without memory");
        rig.memory = Arc::new(ScriptedMemory::hanging());
        let result = rig.orchestrator().process_turn("alice", "s1", "hi", &[]).await;

        assert!(!result.aborted);
        assert_eq!(result.degradation_mode, DegradationMode::Degraded);
        assert_eq!(result.failed_subsystems, vec![Subsystem::Memory]);
        assert_eq!(result.response_text, "answered without memory");
        assert_eq!(result.token_usage.memory_items_included, 0);
        assert_eq!(rig.memory.retrieve_calls(), 1);

        let system = rig.provider.last_request().unwrap().messages[0].content.clone();
        assert!(!system.contains("## RELEVANT MEMORY"));
        assert!(system.contains("## MOOD STATE"));
    }

    #[tokio::test]
    async fn rejection_aborts_without_retry() {
        let mut rig = Rig::healthy("unused");
        rig.provider = Arc::new(ScriptedProvider::new(vec![Step::Fail(
            ProviderError::AuthenticationFailed("bad key".into()),
        )]));
        let result = rig.orchestrator().process_turn("alice", "s1", "hi", &[]).await;
        assert_eq!(result.abort_reason, Some(AbortReason::LlmRejected));
        assert_eq!(result.degradation_mode, DegradationMode::Aborted);
        assert_eq!(rig.provider.calls(), 1);
        assert_eq!(rig.memory.persist_calls(), 0);
    }

    #[tokio::test]
    async fn violation_triggers_one_strict_regeneration() {
        let mut rig = Rig::healthy("unused");
        rig.provider = Arc::new(ScriptedProvider::new(vec![
            Step::Reply("My name is Jarvis.".into()),
            Step::Reply("I am Nexus.".into()),
        ]));
        let result = rig.orchestrator().process_turn("alice", "s1", "Who are you?", &[]).await;

        assert_eq!(result.response_text, "I am Nexus.");
        assert_eq!(result.regenerations, 1);
        assert!(result.safety_annotation.is_none());
        let strict = rig.provider.requests()[1].messages[0].content.clone();
        assert!(strict.contains("STRICT MODE"));
        assert!(strict.contains("[identity-name]"));
    }

    #[tokio::test]
    async fn multi_word_name_introduction_is_not_regenerated() {
        let mut rig = Rig::healthy("Hello! My name is Nexus Prime.");
        let mut snapshot = IdentitySnapshot::minimal_skeleton();
        snapshot.kernel.name = "Nexus Prime".into();
        rig.identity = Arc::new(ScriptedIdentity::ok(snapshot));

        let result = rig.orchestrator().process_turn("alice", "s1", "Who are you?", &[]).await;
        assert_eq!(result.regenerations, 0);
        assert!(result.safety_annotation.is_none());
        assert!(result.invariant_violations.is_empty());
        assert_eq!(rig.provider.calls(), 1);
    }

    #[tokio::test]
    async fn persistent_violation_is_annotated_not_suppressed() {
        let mut rig = Rig::healthy("unused");
        let mut snapshot = IdentitySnapshot::minimal_skeleton();
        snapshot
            .kernel
            .invariants
            .push(IdentityInvariant::new("no-guarantees", "Never guarantee outcomes").forbidding(["i guarantee"]));
        rig.identity = Arc::new(ScriptedIdentity::ok(snapshot));
        rig.provider = Arc::new(ScriptedProvider::replying("I guarantee it works."));

        let result = rig.orchestrator().process_turn("alice", "s1", "Will it work?", &[]).await;
        assert!(!result.aborted);
        assert_eq!(result.response_text, "I guarantee it works.");
        assert_eq!(result.regenerations, 1);
        assert_eq!(rig.provider.calls(), 2);
        assert!(result.safety_annotation.is_some());
        assert_eq!(result.invariant_violations[0].invariant_id, "no-guarantees");
        assert!(rig.memory.persisted()[0].annotated);
    }

    #[tokio::test]
    async fn zero_regenerations_annotates_immediately() {
        let mut rig = Rig::healthy("I'm human, trust me.");
        rig.provider = Arc::new(ScriptedProvider::replying("I'm human, trust me."));
        let result = rig
            .orchestrator()
            .with_max_regenerations(0)
            .process_turn("alice", "s1", "Are you human?", &[])
            .await;
        assert_eq!(rig.provider.calls(), 1);
        assert_eq!(result.regenerations, 0);
        assert!(result.safety_annotation.is_some());
    }

    #[tokio::test]
    async fn persistence_failure_is_swallowed() {
        let mut rig = Rig::healthy("fine");
        rig.memory = Arc::new(
            ScriptedMemory::with_items(vec![]).with_persistence(Behavior::Fail("disk full".into())),
        );
        let result = rig.orchestrator().process_turn("alice", "s1", "hi", &[]).await;
        assert!(!result.aborted);
        assert_eq!(result.degradation_mode, nexus_core::DegradationMode::Full);
        assert_eq!(rig.memory.persist_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn persistence_hang_is_bounded() {
        let mut rig = Rig::healthy("fine");
        rig.memory = Arc::new(ScriptedMemory::with_items(vec![]).with_persistence(Behavior::Hang));
        let result = rig.orchestrator().process_turn("alice", "s1", "hi", &[]).await;
        assert_eq!(result.response_text, "fine");
    }

    #[tokio::test]
    async fn history_travels_between_context_and_request() {
        let rig = Rig::healthy("ok");
        let history = vec![Message::user("earlier question"), Message::assistant("earlier answer")];
        let result = rig.orchestrator().process_turn("alice", "s1", "follow-up", &history).await;
        assert!(result.token_usage.history_included);

        let messages = rig.provider.last_request().unwrap().messages;
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].content, "earlier question");
        assert_eq!(messages[3].content, "## CURRENT REQUEST\nfollow-up");
    }

    #[tokio::test]
    async fn configured_history_window_counts_turns() {
        let rig = Rig::healthy("ok");
        let mut config = GovernorConfig::default();
        config.budget.max_history_turns = 1;
        let orchestrator = Orchestrator::from_config(
            &config,
            rig.identity.clone(),
            rig.mood.clone(),
            rig.memory.clone(),
            rig.provider.clone(),
        )
        .unwrap();

        let history = vec![
            Message::user("first question"),
            Message::assistant("first answer"),
            Message::user("second question"),
            Message::assistant("second answer"),
        ];
        orchestrator.process_turn("alice", "s1", "third", &history).await;

        let messages = rig.provider.last_request().unwrap().messages;
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].content, "second question");
        assert_eq!(messages[2].content, "second answer");
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_abort_keeps_failed_subsystems() {
        let mut rig = Rig::healthy("unused");
        rig.mood = Arc::new(ScriptedMood::failing("down"));
        rig.provider = Arc::new(ScriptedProvider::unreachable());
        let result = rig.orchestrator().process_turn("alice", "s1", "hi", &[]).await;
        assert_eq!(result.abort_reason, Some(AbortReason::LlmUnreachable));
        assert_eq!(result.degradation_mode, DegradationMode::Aborted);
        assert_eq!(result.failed_subsystems, vec![Subsystem::Mood]);
    }

    #[test]
    fn invalid_budget_rejected_at_construction() {
        let rig = Rig::healthy("x");
        let err = rig.orchestrator().with_budget(100, 100).err().unwrap();
        assert!(matches!(err, BudgetError::Config { .. }));
    }

    #[tokio::test]
    async fn telemetry_receives_turns() {
        let rig = Rig::healthy("ok");
        let engine = Arc::new(TelemetryEngine::new());
        let orchestrator = rig.orchestrator().with_telemetry(engine.clone());
        orchestrator.process_turn("alice", "s1", "hi", &[]).await;
        orchestrator.process_turn("alice", "s1", "  ", &[]).await;
        let snap = engine.snapshot();
        assert_eq!(snap.turns_total, 2);
        assert_eq!(engine.turns_for_session("s1").len(), 2);
    }
}
