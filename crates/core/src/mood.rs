//! Affect state in the Pleasure-Arousal-Dominance (PAD) space.
//!
//! Mood is metadata, never role-play: a [`MoodState`] is three bounded
//! numbers and its only rendering is `key=value` lines. There is no way to
//! turn it into first-person narrative text.
//!
//! Decay over time is the collaborator's business; the governor only ever
//! sees the already-decayed state.

use crate::error::SubsystemError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Magnitude below which a dimension counts as neutral for labelling.
const NEUTRAL_BAND: f32 = 0.05;

/// A point in PAD space. Every dimension is clamped to `[-1.0, 1.0]`,
/// including when deserialized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredMood")]
pub struct MoodState {
    pleasure: f32,
    arousal: f32,
    dominance: f32,
}

/// Wire shape of a [`MoodState`] before clamping.
#[derive(Deserialize)]
struct StoredMood {
    #[serde(default)]
    pleasure: f32,
    #[serde(default)]
    arousal: f32,
    #[serde(default)]
    dominance: f32,
}

impl From<StoredMood> for MoodState {
    fn from(raw: StoredMood) -> Self {
        Self::new(raw.pleasure, raw.arousal, raw.dominance)
    }
}

impl MoodState {
    pub fn new(pleasure: f32, arousal: f32, dominance: f32) -> Self {
        Self {
            pleasure: clamp_unit(pleasure),
            arousal: clamp_unit(arousal),
            dominance: clamp_unit(dominance),
        }
    }

    /// The fixed neutral state substituted when the mood collaborator fails.
    pub fn baseline() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn pleasure(&self) -> f32 {
        self.pleasure
    }

    pub fn arousal(&self) -> f32 {
        self.arousal
    }

    pub fn dominance(&self) -> f32 {
        self.dominance
    }

    /// The PAD octant name, or `neutral` when every dimension is near zero.
    pub fn label(&self) -> &'static str {
        let dims = [self.pleasure, self.arousal, self.dominance];
        if dims.iter().all(|d| d.abs() < NEUTRAL_BAND) {
            return "neutral";
        }
        match (self.pleasure >= 0.0, self.arousal >= 0.0, self.dominance >= 0.0) {
            (true, true, true) => "exuberant",
            (true, true, false) => "dependent",
            (true, false, true) => "relaxed",
            (true, false, false) => "docile",
            (false, true, true) => "hostile",
            (false, true, false) => "anxious",
            (false, false, true) => "disdainful",
            (false, false, false) => "bored",
        }
    }

    /// Render as key-value metadata lines. Deterministic.
    pub fn render_metadata(&self) -> String {
        format!(
            "pleasure={:+.2}\narousal={:+.2}\ndominance={:+.2}\nlabel={}",
            self.pleasure,
            self.arousal,
            self.dominance,
            self.label()
        )
    }
}

impl Default for MoodState {
    fn default() -> Self {
        Self::baseline()
    }
}

fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() {
        return 0.0;
    }
    let c = v.clamp(-1.0, 1.0);
    // Normalise negative zero so rendering never shows "-0.00".
    if c == 0.0 { 0.0 } else { c }
}

/// Source of per-user mood state.
#[async_trait]
pub trait MoodSource: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch the current (already decayed) state for a user.
    async fn get_state(&self, user_id: &str) -> std::result::Result<MoodState, SubsystemError>;
}

/// Process-local mood store. Users without a stored state get the baseline.
#[derive(Default)]
pub struct InMemoryMoodStore {
    states: RwLock<HashMap<String, MoodState>>,
}

impl InMemoryMoodStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, user_id: impl Into<String>, state: MoodState) {
        self.states.write().await.insert(user_id.into(), state);
    }
}

#[async_trait]
impl MoodSource for InMemoryMoodStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn get_state(&self, user_id: &str) -> std::result::Result<MoodState, SubsystemError> {
        Ok(self
            .states
            .read()
            .await
            .get(user_id)
            .copied()
            .unwrap_or_else(MoodState::baseline))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_are_clamped() {
        let m = MoodState::new(3.0, -7.5, f32::NAN);
        assert_eq!(m.pleasure(), 1.0);
        assert_eq!(m.arousal(), -1.0);
        assert_eq!(m.dominance(), 0.0);
    }

    #[test]
    fn deserialized_mood_is_clamped() {
        let mood: MoodState =
            serde_json::from_str(r#"{"pleasure": 4.0, "arousal": -2.5, "dominance": 0.25}"#).unwrap();
        assert_eq!(mood, MoodState::new(1.0, -1.0, 0.25));

        let partial: MoodState = serde_json::from_str(r#"{"pleasure": -0.5}"#).unwrap();
        assert_eq!(partial, MoodState::new(-0.5, 0.0, 0.0));
    }

    #[test]
    fn baseline_renders_neutral() {
        let text = MoodState::baseline().render_metadata();
        assert_eq!(
            text,
            "pleasure=+0.00\narousal=+0.00\ndominance=+0.00\nlabel=neutral"
        );
    }

    #[test]
    fn negative_zero_never_rendered() {
        let text = MoodState::new(-0.0, 0.0, 0.0).render_metadata();
        assert!(!text.contains("-0.00"));
    }

    #[test]
    fn rendering_is_key_value_only() {
        let text = MoodState::new(0.4, -0.3, 0.2).render_metadata();
        for line in text.lines() {
            let (key, value) = line.split_once('=').expect("key=value line");
            assert!(!key.contains(' '));
            assert!(!value.contains(' '));
        }
        assert!(text.contains("label=relaxed"));
    }

    #[test]
    fn octant_labels() {
        assert_eq!(MoodState::new(0.5, 0.5, 0.5).label(), "exuberant");
        assert_eq!(MoodState::new(-0.5, 0.5, -0.5).label(), "anxious");
        assert_eq!(MoodState::new(-0.5, -0.5, -0.5).label(), "bored");
    }

    #[tokio::test]
    async fn store_returns_baseline_for_unknown_user() {
        let store = InMemoryMoodStore::new();
        store.set("alice", MoodState::new(0.3, 0.1, 0.0)).await;
        assert_eq!(store.get_state("bob").await.unwrap(), MoodState::baseline());
        assert!((store.get_state("alice").await.unwrap().pleasure() - 0.3).abs() < f32::EPSILON);
    }
}
