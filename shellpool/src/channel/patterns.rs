//! Pattern matching utilities for prompt detection.

use std::ops::Range;

use memchr::memmem::Finder;
use regex::bytes::Regex;

/// Trait for prompt matching - literal by default, extensible for regexes.
pub trait PromptMatcher: Send + Sync {
    /// Returns the byte range of the first match in `data`, if any.
    fn find_match(&self, data: &[u8]) -> Option<Range<usize>>;

    /// Upper bound on the length of a match, if known.
    ///
    /// The buffer uses this to skip already-scanned bytes on the next pass:
    /// a match can start at most `max_len - 1` bytes before the end of the
    /// previously scanned region. `None` forces a rescan from the consumed
    /// offset.
    fn max_len(&self) -> Option<usize> {
        None
    }

    /// Check if the data matches the pattern.
    fn is_match(&self, data: &[u8]) -> bool {
        self.find_match(data).is_some()
    }
}

/// Byte-exact literal marker such as a shell prompt.
#[derive(Debug, Clone)]
pub struct LiteralPrompt {
    finder: Finder<'static>,
}

impl LiteralPrompt {
    /// Create a matcher for the given literal bytes.
    pub fn new(pattern: impl AsRef<[u8]>) -> Self {
        Self {
            finder: Finder::new(pattern.as_ref()).into_owned(),
        }
    }

    /// The literal being searched for.
    pub fn as_bytes(&self) -> &[u8] {
        self.finder.needle()
    }

    /// Length of the literal in bytes.
    pub fn len(&self) -> usize {
        self.finder.needle().len()
    }

    /// Whether the literal is empty (it then matches everywhere).
    pub fn is_empty(&self) -> bool {
        self.finder.needle().is_empty()
    }
}

impl PromptMatcher for LiteralPrompt {
    fn find_match(&self, data: &[u8]) -> Option<Range<usize>> {
        self.finder
            .find(data)
            .map(|start| start..start + self.len())
    }

    fn max_len(&self) -> Option<usize> {
        Some(self.len())
    }
}

/// Regex-based prompt matcher.
impl PromptMatcher for Regex {
    fn find_match(&self, data: &[u8]) -> Option<Range<usize>> {
        self.find(data).map(|m| m.range())
    }
}
