//! Identity system — the persistent kernel a turn is answered from.
//!
//! An [`IdentitySnapshot`] is a point-in-time record of who the assistant is
//! for a given user: name, role, values, style, expertise, and the
//! invariants every generated response is checked against.
//!
//! Snapshots come from an [`IdentitySource`]. Two sources ship here:
//!
//! 1. **Static**: one fixed snapshot for every user
//! 2. **File**: `<dir>/<user_id>.toml`, falling back to `<dir>/default.toml`
//!
//! When the source fails the governor substitutes
//! [`IdentitySnapshot::minimal_skeleton`], so invariant checks always have
//! something to run against.

use crate::error::SubsystemError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Version tag carried by the fallback skeleton.
pub const SKELETON_VERSION: &str = "skeleton";

/// A point-in-time identity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentitySnapshot {
    /// Snapshot version, reported back to callers for traceability
    pub version: String,

    /// The identity kernel
    pub kernel: IdentityKernel,
}

/// The persistent identity attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityKernel {
    /// The assistant's name
    pub name: String,

    /// One-line role description
    pub role: String,

    /// Core values, in priority order
    #[serde(default)]
    pub core_values: Vec<String>,

    /// Communication style guidance
    #[serde(default)]
    pub communication_style: String,

    /// Domains the assistant is expected to be competent in
    #[serde(default)]
    pub expertise_domains: Vec<String>,

    /// Rules a generated response must never break
    #[serde(default)]
    pub invariants: Vec<IdentityInvariant>,
}

/// A checkable identity rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityInvariant {
    /// Stable identifier, reported when the rule is violated
    pub id: String,

    /// Human-readable statement of the rule (rendered into the prompt)
    pub description: String,

    /// Phrases whose presence (case-insensitive) violates the rule
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forbidden_phrases: Vec<String>,
}

impl IdentityInvariant {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            forbidden_phrases: Vec::new(),
        }
    }

    pub fn forbidding<I, S>(mut self, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.forbidden_phrases
            .extend(phrases.into_iter().map(Into::into));
        self
    }
}

impl IdentitySnapshot {
    /// The fixed, safe identity substituted when the identity collaborator
    /// fails. Never loaded from anywhere.
    pub fn minimal_skeleton() -> Self {
        Self {
            version: SKELETON_VERSION.into(),
            kernel: IdentityKernel {
                name: "Nexus".into(),
                role: "General-purpose assistant".into(),
                core_values: vec!["honesty".into(), "helpfulness".into(), "safety".into()],
                communication_style: "Clear, concise, and neutral".into(),
                expertise_domains: vec![],
                invariants: vec![
                    IdentityInvariant::new("no-human-claim", "Never claim to be human")
                        .forbidding(["i am a human", "i'm a human", "i am human", "i'm human"]),
                    IdentityInvariant::new(
                        "no-credential-request",
                        "Never ask the user for passwords or secret keys",
                    )
                    .forbidding([
                        "tell me your password",
                        "send me your password",
                        "what is your password",
                    ]),
                ],
            },
        }
    }

    /// Whether this is the fallback skeleton rather than a loaded snapshot.
    pub fn is_skeleton(&self) -> bool {
        self.version == SKELETON_VERSION
    }

    /// Render the snapshot as the structured summary placed in the
    /// identity section of the prompt. Deterministic.
    pub fn render(&self) -> String {
        let k = &self.kernel;
        let mut out = format!("Name: {}\nRole: {}\n", k.name, k.role);
        out.push_str(&format!("Core Values: {}\n", join_or(&k.core_values, "unspecified")));
        if !k.communication_style.is_empty() {
            out.push_str(&format!("Communication: {}\n", k.communication_style));
        }
        out.push_str(&format!("Expertise: {}\n", join_or(&k.expertise_domains, "general")));
        if k.invariants.is_empty() {
            out.push_str("Invariants: none");
        } else {
            out.push_str("Invariants:");
            for inv in &k.invariants {
                out.push_str(&format!("\n- {}", inv.description));
            }
        }
        out
    }

    /// Parse a snapshot from TOML text.
    pub fn from_toml(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

fn join_or(items: &[String], empty: &str) -> String {
    if items.is_empty() {
        empty.to_string()
    } else {
        items.join(", ")
    }
}

/// Source of identity snapshots, scoped by user.
#[async_trait]
pub trait IdentitySource: Send + Sync {
    /// Source name for logs (e.g. "file", "static").
    fn name(&self) -> &str;

    /// Fetch the current snapshot for a user.
    async fn get_snapshot(&self, user_id: &str) -> std::result::Result<IdentitySnapshot, SubsystemError>;
}

/// Serves the same snapshot for every user.
pub struct StaticIdentitySource {
    snapshot: IdentitySnapshot,
}

impl StaticIdentitySource {
    pub fn new(snapshot: IdentitySnapshot) -> Self {
        Self { snapshot }
    }
}

#[async_trait]
impl IdentitySource for StaticIdentitySource {
    fn name(&self) -> &str {
        "static"
    }

    async fn get_snapshot(&self, _user_id: &str) -> std::result::Result<IdentitySnapshot, SubsystemError> {
        Ok(self.snapshot.clone())
    }
}

/// Loads per-user snapshots from a directory of TOML files.
pub struct FileIdentitySource {
    dir: PathBuf,
}

/// Name of the snapshot used for users without their own file.
pub const DEFAULT_IDENTITY_FILE: &str = "default.toml";

impl FileIdentitySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn candidates(&self, user_id: &str) -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(2);
        let sanitized = sanitize_user_id(user_id);
        if !sanitized.is_empty() {
            paths.push(self.dir.join(format!("{sanitized}.toml")));
        }
        paths.push(self.dir.join(DEFAULT_IDENTITY_FILE));
        paths
    }
}

#[async_trait]
impl IdentitySource for FileIdentitySource {
    fn name(&self) -> &str {
        "file"
    }

    async fn get_snapshot(&self, user_id: &str) -> std::result::Result<IdentitySnapshot, SubsystemError> {
        for path in self.candidates(user_id) {
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(c) => c,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(SubsystemError::Unreachable(format!(
                        "cannot read {}: {e}",
                        path.display()
                    )));
                }
            };
            debug!(file = %path.display(), "Loaded identity snapshot");
            return IdentitySnapshot::from_toml(&content).map_err(|e| {
                SubsystemError::Failed(format!("invalid identity file {}: {e}", path.display()))
            });
        }
        Err(SubsystemError::Failed(format!(
            "no identity file for '{user_id}' in {}",
            self.dir.display()
        )))
    }
}

/// Reduce a user id to characters that are safe in a file name.
pub fn sanitize_user_id(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.trim().chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    out.trim_matches(|c| c == '_' || c == '.').to_string()
}
