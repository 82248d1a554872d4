//! Scripted collaborators for tests.
//!
//! Each stub can answer, fail, hang forever, or panic, which covers every
//! failure mode a real backend has. Call counts and received arguments are
//! recorded so tests can assert on what the pipeline did.
//!
//! Available under `cfg(test)` and the `test-support` feature.

use async_trait::async_trait;
use nexus_core::{
    IdentitySnapshot, IdentitySource, MemoryItem, MemoryService, Message, MoodSource, MoodState,
    Provider, ProviderError, ProviderRequest, ProviderResponse, RetrievalRequest, SubsystemError,
    TurnRecord, Usage,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How a scripted collaborator behaves on every call.
#[derive(Debug, Clone)]
pub enum Behavior<T> {
    Answer(T),
    Fail(String),
    Unreachable(String),
    Hang,
    Panic,
}

impl<T: Clone> Behavior<T> {
    async fn run(&self) -> Result<T, SubsystemError> {
        match self {
            Self::Answer(v) => Ok(v.clone()),
            Self::Fail(msg) => Err(SubsystemError::Failed(msg.clone())),
            Self::Unreachable(msg) => Err(SubsystemError::Unreachable(msg.clone())),
            Self::Hang => std::future::pending().await,
            Self::Panic => panic!("scripted collaborator panic"),
        }
    }
}

// ── Identity ──────────────────────────────────────────────────────────────

pub struct ScriptedIdentity {
    behavior: Behavior<IdentitySnapshot>,
    calls: AtomicUsize,
}

impl ScriptedIdentity {
    pub fn new(behavior: Behavior<IdentitySnapshot>) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn ok(snapshot: IdentitySnapshot) -> Self {
        Self::new(Behavior::Answer(snapshot))
    }

    pub fn failing(msg: &str) -> Self {
        Self::new(Behavior::Fail(msg.into()))
    }

    pub fn unreachable(msg: &str) -> Self {
        Self::new(Behavior::Unreachable(msg.into()))
    }

    pub fn hanging() -> Self {
        Self::new(Behavior::Hang)
    }

    pub fn panicking() -> Self {
        Self::new(Behavior::Panic)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentitySource for ScriptedIdentity {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn get_snapshot(&self, _user_id: &str) -> Result<IdentitySnapshot, SubsystemError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.behavior.run().await
    }
}

// ── Mood ──────────────────────────────────────────────────────────────────

pub struct ScriptedMood {
    behavior: Behavior<MoodState>,
    calls: AtomicUsize,
}

impl ScriptedMood {
    pub fn new(behavior: Behavior<MoodState>) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn ok(state: MoodState) -> Self {
        Self::new(Behavior::Answer(state))
    }

    pub fn failing(msg: &str) -> Self {
        Self::new(Behavior::Fail(msg.into()))
    }

    pub fn hanging() -> Self {
        Self::new(Behavior::Hang)
    }

    pub fn panicking() -> Self {
        Self::new(Behavior::Panic)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MoodSource for ScriptedMood {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn get_state(&self, _user_id: &str) -> Result<MoodState, SubsystemError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.behavior.run().await
    }
}

// ── Memory ────────────────────────────────────────────────────────────────

pub struct ScriptedMemory {
    retrieval: Behavior<Vec<MemoryItem>>,
    persistence: Behavior<()>,
    hints: Mutex<Vec<usize>>,
    persisted: Mutex<Vec<TurnRecord>>,
    persist_calls: AtomicUsize,
}

impl ScriptedMemory {
    pub fn new(retrieval: Behavior<Vec<MemoryItem>>) -> Self {
        Self {
            retrieval,
            persistence: Behavior::Answer(()),
            hints: Mutex::new(Vec::new()),
            persisted: Mutex::new(Vec::new()),
            persist_calls: AtomicUsize::new(0),
        }
    }

    /// Answers every retrieval with `items`, in the given rank order.
    pub fn with_items(items: Vec<MemoryItem>) -> Self {
        Self::new(Behavior::Answer(items))
    }

    pub fn failing(msg: &str) -> Self {
        Self::new(Behavior::Fail(msg.into()))
    }

    pub fn hanging() -> Self {
        Self::new(Behavior::Hang)
    }

    /// Replace how `persist` behaves.
    pub fn with_persistence(mut self, behavior: Behavior<()>) -> Self {
        self.persistence = behavior;
        self
    }

    pub fn last_hint(&self) -> Option<usize> {
        lock(&self.hints).last().copied()
    }

    pub fn retrieve_calls(&self) -> usize {
        lock(&self.hints).len()
    }

    /// Persist calls made, successful or not.
    pub fn persist_calls(&self) -> usize {
        self.persist_calls.load(Ordering::SeqCst)
    }

    /// Records whose persist call succeeded.
    pub fn persisted(&self) -> Vec<TurnRecord> {
        lock(&self.persisted).clone()
    }
}

#[async_trait]
impl MemoryService for ScriptedMemory {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn retrieve(&self, request: RetrievalRequest) -> Result<Vec<MemoryItem>, SubsystemError> {
        lock(&self.hints).push(request.budget_hint);
        self.retrieval.run().await
    }

    async fn persist(&self, record: TurnRecord) -> Result<(), SubsystemError> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        self.persistence.run().await?;
        lock(&self.persisted).push(record);
        Ok(())
    }
}

// ── Provider ──────────────────────────────────────────────────────────────

/// One scripted model call.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(String),
    Fail(ProviderError),
    Hang,
    Panic,
}

/// Plays its steps in order, one per call. Once the script runs out the
/// last step repeats.
pub struct ScriptedProvider {
    steps: Vec<Step>,
    calls: AtomicUsize,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with `text`.
    pub fn replying(text: &str) -> Self {
        Self::new(vec![Step::Reply(text.into())])
    }

    /// Always fails as unreachable.
    pub fn unreachable() -> Self {
        Self::new(vec![Step::Fail(ProviderError::Network("connection refused".into()))])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        lock(&self.requests).clone()
    }

    pub fn last_request(&self) -> Option<ProviderRequest> {
        lock(&self.requests).last().cloned()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let model = request.model.clone();
        lock(&self.requests).push(request);

        let step = self
            .steps
            .get(n)
            .or_else(|| self.steps.last())
            .cloned()
            .unwrap_or(Step::Hang);
        match step {
            Step::Reply(text) => Ok(ProviderResponse {
                message: Message::assistant(text),
                usage: None::<Usage>,
                model,
            }),
            Step::Fail(e) => Err(e),
            Step::Hang => std::future::pending().await,
            Step::Panic => panic!("scripted provider panic"),
        }
    }
}
