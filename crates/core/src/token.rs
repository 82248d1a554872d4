//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token.
//! This approximation is accurate within ~10% for BPE tokenizers on English
//! text and, more importantly, is deterministic: the same text always costs
//! the same number of tokens.

/// Counts tokens for budget accounting.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// The default 4-characters-per-token counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicCounter;

impl TokenCounter for HeuristicCounter {
    fn count(&self, text: &str) -> usize {
        estimate_tokens(text)
    }
}

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(estimate_tokens("test"), 1);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn hundred_chars() {
        let text = "a".repeat(100);
        assert_eq!(estimate_tokens(&text), 25);
    }

    #[test]
    fn heuristic_counter_matches_free_function() {
        let text = "The quick brown fox";
        assert_eq!(HeuristicCounter.count(text), estimate_tokens(text));
    }
}
