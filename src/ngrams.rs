//! Utterance n-gram context.
//!
//! Every user utterance is scanned once into an [`NgramContext`] before any
//! matching happens. The context carries:
//!
//! - the **normalized text** the matching compiler runs its regex against
//!   (lowercased, whitespace collapsed, punctuation kept);
//! - the **tokens** (word characters and apostrophes);
//! - the set of **n-grams** up to `max_n` tokens long, for cheap phrase
//!   lookups from macros.
//!
//! A context is built per utterance and dropped when the next one arrives.

use std::collections::HashSet;

pub const DEFAULT_NGRAM_MAX: usize = 4;

#[derive(Debug, Clone, Default)]
pub struct NgramContext {
    raw: String,
    text: String,
    tokens: Vec<String>,
    ngrams: HashSet<String>,
    max_n: usize,
}

fn tokenize(input: &str) -> Vec<String> {
    regex!(r"[\w']+").find_iter(input).map(|m| m.as_str().to_lowercase()).collect()
}

impl NgramContext {
    pub fn new(utterance: &str) -> Self {
        Self::with_max_n(utterance, DEFAULT_NGRAM_MAX)
    }

    /// Scan `utterance`, materializing n-grams of up to `max_n` tokens.
    pub fn with_max_n(utterance: &str, max_n: usize) -> Self {
        let text = utterance.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        let tokens = tokenize(&text);
        let max_n = max_n.max(1);

        let mut ngrams = HashSet::new();
        for n in 1..=max_n.min(tokens.len()) {
            for window in tokens.windows(n) {
                ngrams.insert(window.join(" "));
            }
        }

        NgramContext { raw: utterance.to_string(), text, tokens, ngrams, max_n }
    }

    /// Context for a turn without user input.
    pub fn empty() -> Self {
        Self::with_max_n("", DEFAULT_NGRAM_MAX)
    }

    /// The utterance exactly as received.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Normalized text used for matching.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Materialized n-grams (unordered).
    pub fn ngrams(&self) -> impl Iterator<Item = &str> {
        self.ngrams.iter().map(String::as_str)
    }

    /// True if `phrase` occurs as a contiguous run of tokens.
    ///
    /// Phrases longer than `max_n` fall back to a window scan.
    pub fn contains(&self, phrase: &str) -> bool {
        let needle = tokenize(phrase);
        if needle.is_empty() {
            return false;
        }
        if needle.len() <= self.max_n {
            return self.ngrams.contains(&needle.join(" "));
        }
        self.tokens.windows(needle.len()).any(|window| window == needle.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_and_tokenizes() {
        let ctx = NgramContext::new("  Well,   I DON'T know ");
        assert_eq!(ctx.text(), "well, i don't know");
        assert_eq!(ctx.tokens(), ["well", "i", "don't", "know"]);
        assert_eq!(ctx.raw(), "  Well,   I DON'T know ");
    }

    #[test]
    fn phrase_lookup_uses_token_boundaries() {
        let ctx = NgramContext::with_max_n("the quick brown fox jumps", 2);
        assert!(ctx.contains("quick brown"));
        assert!(ctx.contains("Quick, brown"));
        assert!(!ctx.contains("quic"));
        // Longer than max_n: window scan.
        assert!(ctx.contains("quick brown fox jumps"));
        assert!(!ctx.contains("fox quick"));
        assert_eq!(ctx.ngrams().filter(|g| !g.contains(' ')).count(), 5);
    }

    #[test]
    fn empty_context_has_no_tokens() {
        let ctx = NgramContext::empty();
        assert!(ctx.is_empty());
        assert!(!ctx.contains("anything"));
    }
}
