//! End-to-end tests for the turn pipeline.
//!
//! These drive `Orchestrator::process_turn` with scripted and real
//! collaborators and check the externally visible guarantees: degradation
//! modes, abort reasons, budget bounds, persistence, and determinism.

use std::sync::Arc;
use std::time::Duration;

use nexus_core::{DegradationMode, IdentitySnapshot, MemoryItem, Message, MoodState, ProviderError};
use nexus_governor::test_support::{ScriptedIdentity, ScriptedMemory, ScriptedMood, ScriptedProvider, Step};
use nexus_governor::{AbortReason, Orchestrator, RetryPolicy, SECTION_OVERHEAD, Section, TurnResult};
use nexus_memory::{FileMemoryService, InMemoryMemoryService};
use nexus_providers::EchoProvider;

// ── Harness ──────────────────────────────────────────────────────────────

struct Harness {
    identity: Arc<ScriptedIdentity>,
    mood: Arc<ScriptedMood>,
    memory: Arc<ScriptedMemory>,
    provider: Arc<ScriptedProvider>,
}

impl Harness {
    fn healthy() -> Self {
        Self {
            identity: Arc::new(ScriptedIdentity::ok(IdentitySnapshot::minimal_skeleton())),
            mood: Arc::new(ScriptedMood::ok(MoodState::new(0.2, -0.1, 0.3))),
            memory: Arc::new(ScriptedMemory::with_items(vec![])),
            provider: Arc::new(ScriptedProvider::replying("Here is the answer.")),
        }
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            self.identity.clone(),
            self.mood.clone(),
            self.memory.clone(),
            self.provider.clone(),
            "e2e-model",
        )
        .with_retry(RetryPolicy {
            max_retries: 1,
            backoff: Duration::from_millis(20),
        })
    }

    fn system_message(&self) -> String {
        self.provider
            .last_request()
            .map(|r| r.messages[0].content.clone())
            .unwrap_or_default()
    }
}

/// A memory item whose rendered line costs exactly `tokens`.
fn memory_item(label: &str, tokens: usize) -> MemoryItem {
    let content = format!("{label}{}", ".".repeat(tokens * 4 - 3 - label.len()));
    MemoryItem::new(label, content, 1.0)
}

fn assert_within_budget(result: &TurnResult) {
    let usage = &result.token_usage;
    let allocated: usize = usage.sections.iter().map(|s| s.allocated).sum();
    let consumed: usize = usage.sections.iter().map(|s| s.consumed).sum();
    assert!(allocated + usage.reserved_output <= usage.total);
    assert!(consumed + usage.reserved_output <= usage.total);
}

// ── Budget packing ───────────────────────────────────────────────────────

#[tokio::test]
async fn memory_keeps_top_two_of_three_when_250_tokens_remain() {
    // Calibrate: cost of every fixed section for this request.
    let probe = Harness::healthy();
    let base = probe
        .orchestrator()
        .with_budget(1000, 200)
        .unwrap()
        .process_turn("alice", "s1", "What did we decide?", &[])
        .await
        .token_usage
        .prompt_tokens
        - SECTION_OVERHEAD;

    // Pad history so exactly 250 tokens remain after system, identity,
    // request, mood, and history.
    let history_cost = 800 - 250 - base;
    let history = vec![Message::user("h".repeat((history_cost - SECTION_OVERHEAD) * 4))];

    let mut h = Harness::healthy();
    h.memory = Arc::new(ScriptedMemory::with_items(vec![
        memory_item("ALPHA", 100),
        memory_item("BRAVO", 100),
        memory_item("CHARLIE", 100),
    ]));
    let result = h
        .orchestrator()
        .with_budget(1000, 200)
        .unwrap()
        .process_turn("alice", "s1", "What did we decide?", &history)
        .await;

    assert!(!result.aborted);
    assert_eq!(result.degradation_mode, DegradationMode::Full);
    assert!(result.token_usage.history_included);
    assert_eq!(result.token_usage.memory_items_included, 2);
    assert_eq!(result.token_usage.memory_items_dropped, 1);

    let system = h.system_message();
    assert!(system.contains("ALPHA"));
    assert!(system.contains("BRAVO"));
    assert!(!system.contains("CHARLIE"));
    assert_within_budget(&result);
}

#[tokio::test]
async fn required_sections_that_do_not_fit_abort_before_the_model() {
    let h = Harness::healthy();
    let result = h
        .orchestrator()
        .with_budget(300, 200)
        .unwrap()
        .process_turn("alice", "s1", "Summarize the design document", &[])
        .await;

    assert!(result.aborted);
    assert_eq!(result.abort_reason, Some(AbortReason::BudgetInsufficient));
    assert_eq!(result.degradation_mode, DegradationMode::Aborted);
    assert_eq!(h.provider.calls(), 0);
    assert_eq!(h.memory.persist_calls(), 0);
    assert_within_budget(&result);
}

// ── Degradation ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn identity_timeout_degrades_to_skeleton() {
    let mut h = Harness::healthy();
    h.identity = Arc::new(ScriptedIdentity::hanging());
    let result = h.orchestrator().process_turn("alice", "s1", "Hello", &[]).await;

    assert!(!result.aborted);
    assert_eq!(result.degradation_mode, DegradationMode::Degraded);
    assert_eq!(result.response_text, "Here is the answer.");
    assert!(h.system_message().contains("## IDENTITY SNAPSHOT\nName: Nexus"));
}

#[tokio::test]
async fn memory_failure_omits_memory_slot() {
    let mut h = Harness::healthy();
    h.memory = Arc::new(ScriptedMemory::failing("index corrupted"));
    let result = h.orchestrator().process_turn("alice", "s1", "Hello", &[]).await;

    assert_eq!(result.degradation_mode, DegradationMode::Degraded);
    let system = h.system_message();
    assert!(!system.contains("## RELEVANT MEMORY"));
    assert!(system.contains("## MOOD STATE"));
}

#[tokio::test(start_paused = true)]
async fn two_failures_are_minimal_viable() {
    let mut h = Harness::healthy();
    h.mood = Arc::new(ScriptedMood::hanging());
    h.memory = Arc::new(ScriptedMemory::failing("down"));
    let result = h.orchestrator().process_turn("alice", "s1", "Hello", &[]).await;

    assert!(!result.aborted);
    assert_eq!(result.degradation_mode, DegradationMode::MinimalViable);
    let system = h.system_message();
    assert!(system.contains("## SYSTEM"));
    assert!(system.contains("## IDENTITY SNAPSHOT"));
    assert!(!system.contains("## MOOD STATE"));
    assert!(!system.contains("## RELEVANT MEMORY"));
}

#[tokio::test]
async fn all_three_failing_still_answers() {
    let mut h = Harness::healthy();
    h.identity = Arc::new(ScriptedIdentity::panicking());
    h.mood = Arc::new(ScriptedMood::panicking());
    h.memory = Arc::new(ScriptedMemory::failing("down"));
    let result = h.orchestrator().process_turn("alice", "s1", "Hello", &[]).await;

    assert!(!result.aborted);
    assert_eq!(result.degradation_mode, DegradationMode::MinimalViable);
    assert_eq!(result.failed_subsystems.len(), 3);
}

// ── Model failures ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn unreachable_model_aborts_after_one_retry_without_persisting() {
    let mut h = Harness::healthy();
    h.provider = Arc::new(ScriptedProvider::unreachable());
    let result = h.orchestrator().process_turn("alice", "s1", "Hello", &[]).await;

    assert!(result.aborted);
    assert_eq!(result.abort_reason, Some(AbortReason::LlmUnreachable));
    assert_eq!(result.degradation_mode, DegradationMode::Aborted);
    assert_eq!(h.provider.calls(), 2);
    assert_eq!(h.memory.persist_calls(), 0);
    assert_ne!(result.response_text, "Here is the answer.");
}

#[tokio::test(start_paused = true)]
async fn unreachable_beats_degradation() {
    let mut h = Harness::healthy();
    h.mood = Arc::new(ScriptedMood::failing("x"));
    h.memory = Arc::new(ScriptedMemory::failing("y"));
    h.provider = Arc::new(ScriptedProvider::new(vec![
        Step::Fail(ProviderError::RateLimited { retry_after_secs: 1 }),
        Step::Hang,
    ]));
    let result = h.orchestrator().process_turn("alice", "s1", "Hello", &[]).await;

    assert_eq!(result.abort_reason, Some(AbortReason::LlmUnreachable));
    assert_eq!(result.failed_subsystems.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancelled_turn_never_persists() {
    let mut h = Harness::healthy();
    h.provider = Arc::new(ScriptedProvider::new(vec![Step::Hang]));
    let orchestrator = h.orchestrator();

    let outcome = tokio::time::timeout(
        Duration::from_millis(500),
        orchestrator.process_turn("alice", "s1", "Hello", &[]),
    )
    .await;

    assert!(outcome.is_err());
    assert_eq!(h.provider.calls(), 1);
    assert_eq!(h.memory.persist_calls(), 0);
}

// ── Determinism & concurrency ────────────────────────────────────────────

#[tokio::test]
async fn identical_inputs_give_identical_results() {
    let mut h = Harness::healthy();
    h.memory = Arc::new(ScriptedMemory::with_items(vec![
        memory_item("first", 30),
        memory_item("second", 20),
    ]));
    let orchestrator = h.orchestrator();
    let history = vec![Message::user("before"), Message::assistant("reply")];

    let a = orchestrator.process_turn("alice", "s1", "Again?", &history).await;
    let b = orchestrator.process_turn("alice", "s1", "Again?", &history).await;
    assert_eq!(a, b);
    assert_eq!(a.response_text, b.response_text);
    assert_eq!(a.token_usage, b.token_usage);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_turns_stay_isolated() {
    let memory = InMemoryMemoryService::new();
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(ScriptedIdentity::ok(IdentitySnapshot::minimal_skeleton())),
        Arc::new(ScriptedMood::ok(MoodState::baseline())),
        Arc::new(memory.clone()),
        Arc::new(EchoProvider),
        "echo",
    ));

    let mut handles = Vec::new();
    for i in 0..8 {
        let orchestrator = Arc::clone(&orchestrator);
        handles.push(tokio::spawn(async move {
            let user = format!("user-{i}");
            let request = format!("request number {i}");
            let result = orchestrator.process_turn(&user, "s", &request, &[]).await;
            (i, result)
        }));
    }

    for handle in handles {
        let (i, result) = handle.await.unwrap();
        assert!(!result.aborted);
        assert_eq!(result.degradation_mode, DegradationMode::Full);
        assert_eq!(result.response_text, format!("You said: request number {i}"));
        assert_within_budget(&result);
    }

    assert_eq!(memory.count().await, 8);
    for i in 0..8 {
        assert_eq!(memory.for_user(&format!("user-{i}")).await.len(), 1);
    }
}

// ── Real collaborators ───────────────────────────────────────────────────

#[tokio::test]
async fn persisted_turn_is_recalled_from_file_memory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memories.jsonl");
    let provider = Arc::new(ScriptedProvider::replying("Noted: the deploy window is Friday."));

    let build = |memory: FileMemoryService| {
        Orchestrator::new(
            Arc::new(ScriptedIdentity::ok(IdentitySnapshot::minimal_skeleton())),
            Arc::new(ScriptedMood::ok(MoodState::baseline())),
            Arc::new(memory),
            provider.clone(),
            "m",
        )
    };

    build(FileMemoryService::new(path.clone()))
        .process_turn("alice", "s1", "Remember the deploy window is Friday", &[])
        .await;

    // A fresh store reads what the first one appended.
    let result = build(FileMemoryService::new(path.clone()))
        .process_turn("alice", "s2", "When is the deploy window?", &[])
        .await;

    assert_eq!(result.token_usage.memory_items_included, 1);
    let system = provider.last_request().unwrap().messages[0].content.clone();
    assert!(system.contains("## RELEVANT MEMORY"));
    assert!(system.contains("deploy window is Friday"));
}

#[tokio::test]
async fn echo_provider_round_trip_through_prompt() {
    let orchestrator = Orchestrator::new(
        Arc::new(ScriptedIdentity::ok(IdentitySnapshot::minimal_skeleton())),
        Arc::new(ScriptedMood::ok(MoodState::baseline())),
        Arc::new(InMemoryMemoryService::new()),
        Arc::new(EchoProvider),
        "echo",
    );
    let result = orchestrator.process_turn("bob", "s", "ping", &[]).await;
    assert_eq!(result.response_text, "You said: ping");
    assert!(result.token_usage.completion_tokens > 0);
    assert!(result.token_usage.sections.iter().any(|s| s.section == Section::Request));
}
