//! Configuration loading, validation, and management for nexus.
//!
//! Loads configuration from `~/.nexus/config.toml` with environment
//! variable overrides. Validates all settings at startup, so a budget that
//! could never work is rejected before the first turn rather than during one.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.nexus/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// Token budget per turn
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Per-subsystem call timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Bounded retry for the language model
    #[serde(default)]
    pub retry: RetryConfig,

    /// Post-generation invariant validation
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Language model backend
    #[serde(default)]
    pub model: ModelConfig,

    /// Memory collaborator
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Identity collaborator
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Logging and turn metrics
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

// ── Budget ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Immutable token ceiling for one turn (prompt + output)
    #[serde(default = "default_total_tokens")]
    pub total_tokens: usize,

    /// Tokens held back for the model's output
    #[serde(default = "default_reserved_output")]
    pub reserved_output: usize,

    /// Most recent conversation turns (a user message and its reply)
    /// considered for the prompt
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
}

fn default_total_tokens() -> usize {
    128_000
}
fn default_reserved_output() -> usize {
    8_000
}
fn default_max_history_turns() -> usize {
    8
}

impl BudgetConfig {
    /// History window in messages: two per turn.
    pub fn history_messages(&self) -> usize {
        self.max_history_turns.saturating_mul(2)
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            total_tokens: default_total_tokens(),
            reserved_output: default_reserved_output(),
            max_history_turns: default_max_history_turns(),
        }
    }
}

// ── Timeouts ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_identity_ms")]
    pub identity_ms: u64,

    #[serde(default = "default_mood_ms")]
    pub mood_ms: u64,

    #[serde(default = "default_memory_ms")]
    pub memory_ms: u64,

    #[serde(default = "default_llm_ms")]
    pub llm_ms: u64,

    #[serde(default = "default_persist_ms")]
    pub persist_ms: u64,
}

fn default_identity_ms() -> u64 {
    100
}
fn default_mood_ms() -> u64 {
    100
}
fn default_memory_ms() -> u64 {
    500
}
fn default_llm_ms() -> u64 {
    60_000
}
fn default_persist_ms() -> u64 {
    1_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            identity_ms: default_identity_ms(),
            mood_ms: default_mood_ms(),
            memory_ms: default_memory_ms(),
            llm_ms: default_llm_ms(),
            persist_ms: default_persist_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn identity(&self) -> Duration {
        Duration::from_millis(self.identity_ms)
    }
    pub fn mood(&self) -> Duration {
        Duration::from_millis(self.mood_ms)
    }
    pub fn memory(&self) -> Duration {
        Duration::from_millis(self.memory_ms)
    }
    pub fn llm(&self) -> Duration {
        Duration::from_millis(self.llm_ms)
    }
    pub fn persist(&self) -> Duration {
        Duration::from_millis(self.persist_ms)
    }
}

// ── Retry ─────────────────────────────────────────────────────────────────

/// Upper bound on `llm_max_retries`; the retry must stay bounded.
pub const MAX_LLM_RETRIES: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Extra attempts after the first unreachable LLM call
    #[serde(default = "default_llm_max_retries")]
    pub llm_max_retries: u32,

    /// Delay before the first retry; doubles for each further retry
    #[serde(default = "default_llm_backoff_ms")]
    pub llm_backoff_ms: u64,
}

fn default_llm_max_retries() -> u32 {
    1
}
fn default_llm_backoff_ms() -> u64 {
    250
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            llm_max_retries: default_llm_max_retries(),
            llm_backoff_ms: default_llm_backoff_ms(),
        }
    }
}

// ── Validation ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Stricter re-generations allowed after an invariant violation
    #[serde(default = "default_max_regenerations")]
    pub max_regenerations: u32,

    /// Notice attached to responses that still violate an invariant
    #[serde(default = "default_annotation")]
    pub annotation: String,
}

fn default_max_regenerations() -> u32 {
    1
}
fn default_annotation() -> String {
    "This response may conflict with the assistant's identity rules.".into()
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_regenerations: default_max_regenerations(),
            annotation: default_annotation(),
        }
    }
}

// ── Model ─────────────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Backend kind: "openai_compat" or "echo"
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_provider() -> String {
    "openai_compat".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_url: None,
            api_key: None,
            temperature: default_temperature(),
        }
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("temperature", &self.temperature)
            .finish()
    }
}

// ── Memory / identity / telemetry ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Backend kind: "in_memory", "file", or "none"
    #[serde(default = "default_memory_backend")]
    pub backend: String,

    /// JSONL path for the file backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn default_memory_backend() -> String {
    "in_memory".into()
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            path: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Directory of per-user identity TOML files; unset means the skeleton
    /// identity is served statically
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,

    /// Recent turn metrics kept in memory
    #[serde(default = "default_recent_turns")]
    pub recent_turns: usize,
}

fn default_recent_turns() -> usize {
    256
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            json_logs: false,
            recent_turns: default_recent_turns(),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────

impl GovernorConfig {
    /// Load configuration from the default path, then apply env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_dir().join("config.toml"))
    }

    /// Load from `path` (defaults if missing), then apply env overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `NEXUS_*` overrides using the given variable lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.model.api_key.is_none() {
            self.model.api_key = lookup("NEXUS_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }
        if let Some(model) = lookup("NEXUS_MODEL") {
            self.model.model = model;
        }
        if let Some(provider) = lookup("NEXUS_PROVIDER") {
            self.model.provider = provider;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".nexus")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.budget.reserved_output >= self.budget.total_tokens {
            return Err(ConfigError::ValidationError(format!(
                "budget.reserved_output ({}) must be smaller than budget.total_tokens ({})",
                self.budget.reserved_output, self.budget.total_tokens
            )));
        }

        let t = &self.timeouts;
        if [t.identity_ms, t.mood_ms, t.memory_ms, t.llm_ms, t.persist_ms].contains(&0) {
            return Err(ConfigError::ValidationError(
                "every timeout must be greater than 0 ms".into(),
            ));
        }

        if self.retry.llm_max_retries > MAX_LLM_RETRIES {
            return Err(ConfigError::ValidationError(format!(
                "retry.llm_max_retries must be at most {MAX_LLM_RETRIES}"
            )));
        }

        if self.model.temperature < 0.0 || self.model.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "model.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if !matches!(self.model.provider.as_str(), "openai_compat" | "echo") {
            return Err(ConfigError::ValidationError(format!(
                "unknown model provider '{}' (expected openai_compat or echo)",
                self.model.provider
            )));
        }

        if !matches!(self.memory.backend.as_str(), "in_memory" | "file" | "none") {
            return Err(ConfigError::ValidationError(format!(
                "unknown memory backend '{}'",
                self.memory.backend
            )));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = GovernorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.budget.total_tokens, 128_000);
        assert_eq!(config.budget.reserved_output, 8_000);
        assert_eq!(config.timeouts.identity_ms, 100);
        assert_eq!(config.timeouts.memory_ms, 500);
        assert_eq!(config.retry.llm_max_retries, 1);
        assert_eq!(config.validation.max_regenerations, 1);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = GovernorConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: GovernorConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.budget.total_tokens, config.budget.total_tokens);
        assert_eq!(parsed.model.provider, config.model.provider);
    }

    #[test]
    fn reservation_at_or_above_total_rejected() {
        let mut config = GovernorConfig::default();
        config.budget.reserved_output = config.budget.total_tokens;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reserved_output"));
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut config = GovernorConfig::default();
        config.timeouts.mood_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unbounded_retry_rejected() {
        let mut config = GovernorConfig::default();
        config.retry.llm_max_retries = MAX_LLM_RETRIES + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = GovernorConfig::default();
        config.model.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn history_window_counts_both_sides_of_a_turn() {
        let mut budget = BudgetConfig::default();
        assert_eq!(budget.history_messages(), 16);
        budget.max_history_turns = usize::MAX;
        assert_eq!(budget.history_messages(), usize::MAX);
    }

    #[test]
    fn unknown_provider_rejected() {
        let mut config = GovernorConfig::default();
        config.model.provider = "ollama".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ollama"));

        config.model.provider = "echo".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = GovernorConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.model.provider, "openai_compat");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[budget]\ntotal_tokens = 4096\nreserved_output = 512\n\n[memory]\nbackend = \"none\"\n",
        )
        .unwrap();
        let config = GovernorConfig::load_from(&path).unwrap();
        assert_eq!(config.budget.total_tokens, 4096);
        assert_eq!(config.budget.max_history_turns, 8);
        assert_eq!(config.memory.backend, "none");
        assert_eq!(config.timeouts.llm_ms, 60_000);
    }

    #[test]
    fn invalid_file_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[budget\n").unwrap();
        assert!(matches!(
            GovernorConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-test"),
            ("NEXUS_MODEL", "local-model"),
            ("NEXUS_PROVIDER", "echo"),
        ]
        .into_iter()
        .collect();
        let mut config = GovernorConfig::default();
        config.apply_env(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.model.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.model.model, "local-model");
        assert_eq!(config.model.provider, "echo");
    }

    #[test]
    fn api_key_is_redacted_in_debug() {
        let mut config = GovernorConfig::default();
        config.model.api_key = Some("sk-secret".into());
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = GovernorConfig::default_toml();
        assert!(toml_str.contains("total_tokens"));
        assert!(toml_str.contains("openai_compat"));
    }
}
