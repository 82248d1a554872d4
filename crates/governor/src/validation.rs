//! Post-generation identity checks.
//!
//! A generated response is checked against the turn's identity snapshot
//! (loaded or skeleton). Two kinds of rule exist:
//!
//! - every [`IdentityInvariant`](nexus_core::IdentityInvariant) with
//!   forbidden phrases, matched case-insensitively
//! - the built-in name rule: the response must not introduce the assistant
//!   under a different name

use nexus_core::IdentitySnapshot;
use serde::{Deserialize, Serialize};

/// Identifier reported when a response claims a different name.
pub const NAME_INVARIANT_ID: &str = "identity-name";

const NAME_PREFIXES: [&str; 4] = ["my name is ", "i am ", "i'm ", "i\u{2019}m "];

/// A rule broken by a generated response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub invariant_id: String,
    pub description: String,
    /// The text that triggered the rule.
    pub evidence: String,
}

/// Check `response` against every rule of `snapshot`. At most one violation
/// is reported per rule, in rule order.
pub fn check_response(snapshot: &IdentitySnapshot, response: &str) -> Vec<Violation> {
    let lowered = response.to_lowercase();
    let mut violations = Vec::new();

    for inv in &snapshot.kernel.invariants {
        let hit = inv
            .forbidden_phrases
            .iter()
            .find(|p| !p.trim().is_empty() && lowered.contains(&p.to_lowercase()));
        if let Some(phrase) = hit {
            violations.push(Violation {
                invariant_id: inv.id.clone(),
                description: inv.description.clone(),
                evidence: phrase.clone(),
            });
        }
    }

    if let Some(claimed) = claimed_name(response, &snapshot.kernel.name) {
        violations.push(Violation {
            invariant_id: NAME_INVARIANT_ID.into(),
            description: format!("Always introduce yourself as {}", snapshot.kernel.name),
            evidence: claimed,
        });
    }

    violations
}

/// The first name the response claims that is not `own_name`.
///
/// `my name is X` counts for any capitalized `X`. `I am X` / `I'm X` only
/// count when `X` is capitalized and directly followed by punctuation or the
/// end of the text, so "I am Going to check" is not a claim.
fn claimed_name(response: &str, own_name: &str) -> Option<String> {
    // ASCII lowering keeps byte offsets aligned with `response`.
    let lowered = response.to_ascii_lowercase();

    for prefix in NAME_PREFIXES {
        let strict = prefix != "my name is ";
        let mut from = 0;
        while let Some(pos) = lowered[from..].find(prefix) {
            let start = from + pos;
            from = start + prefix.len();

            let at_word_start = response[..start]
                .chars()
                .next_back()
                .is_none_or(|c| !c.is_alphanumeric());
            if !at_word_start {
                continue;
            }

            let rest = &response[from..];
            if names_self(rest, own_name) {
                continue;
            }
            let word: String = rest
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '-')
                .collect();
            let Some(first) = word.chars().next() else {
                continue;
            };
            if !first.is_uppercase() || word == "I" {
                continue;
            }
            if strict {
                let next = rest[word.len()..].chars().next();
                if !next.is_none_or(|c| matches!(c, '.' | ',' | '!' | '?' | ';' | ':')) {
                    continue;
                }
            }
            if !word.eq_ignore_ascii_case(own_name) {
                return Some(word);
            }
        }
    }
    None
}

/// Whether `rest` opens with `own_name` as whole words.
fn names_self(rest: &str, own_name: &str) -> bool {
    let own_name = own_name.trim();
    if own_name.is_empty() {
        return false;
    }
    match rest.get(..own_name.len()) {
        Some(head) if head.eq_ignore_ascii_case(own_name) => rest[own_name.len()..]
            .chars()
            .next()
            .is_none_or(|c| !c.is_alphanumeric()),
        _ => false,
    }
}
