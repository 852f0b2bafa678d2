//! Device identifier matching.
//!
//! # Design Decisions
//! - Patterns are regular expressions, compiled once when a table is built
//! - Unanchored: `300` matches anywhere, use `^300` for a prefix
//! - An empty pattern matches every identifier, including the empty one

use regex::Regex;

/// A compiled identifier pattern.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    regex: Regex,
}

impl PatternMatcher {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
        })
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Returns true if the identifier matches this pattern.
    pub fn matches(&self, identifier: &str) -> bool {
        self.regex.is_match(identifier)
    }
}
