//! Wildcard patterns for selecting middleware by method name.
//!
//! `*` matches zero or more characters; everything else is literal. Matching
//! is anchored at both ends, so `user.*` matches `user.fetch` but not
//! `other.user.fetch`.

use regex::Regex;

/// A compiled wildcard pattern.
#[derive(Clone, Debug)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    /// Compiles `pattern`. Regex metacharacters are escaped, never rejected.
    ///
    /// # Panics
    ///
    /// Panics only if the escaped pattern exceeds the regex size limit, which
    /// takes a pattern several megabytes long.
    pub fn new(pattern: &str) -> Self {
        let anchored = format!("^{}$", regex::escape(pattern).replace(r"\*", ".*"));
        let regex = Regex::new(&anchored)
            .unwrap_or_else(|e| panic!("invalid middleware pattern `{pattern}`: {e}"));
        Self { source: pattern.to_owned(), regex }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }
}

/// One-shot form of [`Pattern::matches`].
pub fn matches(candidate: &str, pattern: &str) -> bool {
    Pattern::new(pattern).matches(candidate)
}
