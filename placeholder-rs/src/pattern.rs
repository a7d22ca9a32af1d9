//! Regular-expression patterns used by `=~`, `!~` and `one_of()`.
//!
//! Template regexes are written between slashes (`/^G1 /`) and always match
//! the whole subject string, so every source is anchored at both ends before
//! it is handed to the [`regex`] crate.
//!
//! ## Pattern forms
//!
//! | Form | Example | Match rule |
//! |------|---------|------------|
//! | [`Pattern::regex`]   | `/PLA.*/` | whole-string regex match |
//! | [`Pattern::literal`] | `"PLA"`   | exact string equality |

use std::sync::Arc;

use regex::Regex;

// ── Public types ─────────────────────────────────────────────────────────────

/// Error returned when a regex cannot be compiled.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct PatternError(#[from] regex::Error);

// Arc keeps Clone a reference-count bump instead of a recompile.
#[derive(Clone)]
enum Compiled {
    Regex(Arc<Regex>),
    Literal,
}

/// A compiled pattern ready for matching.
#[derive(Clone)]
pub struct Pattern {
    src: String,
    compiled: Compiled,
}

impl std::fmt::Debug for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pattern")
            .field("src", &self.src)
            .field("regex", &matches!(self.compiled, Compiled::Regex(_)))
            .finish()
    }
}

impl Pattern {
    /// Compile `src` as a whole-string regular expression.
    pub fn regex(src: &str) -> Result<Self, PatternError> {
        let anchored = format!("^(?:{src})$");
        Ok(Self {
            src: src.to_owned(),
            compiled: Compiled::Regex(Arc::new(Regex::new(&anchored)?)),
        })
    }

    /// A pattern that matches only `src` itself.
    pub fn literal(src: &str) -> Self {
        Self {
            src: src.to_owned(),
            compiled: Compiled::Literal,
        }
    }

    /// The source text, without the anchors.
    pub fn src(&self) -> &str {
        &self.src
    }

    /// Returns `true` if this pattern matches all of `text`.
    pub fn matches(&self, text: &str) -> bool {
        match &self.compiled {
            Compiled::Regex(re) => re.is_match(text),
            Compiled::Literal => self.src == text,
        }
    }
}

/// Undo the `\/` escape used to embed a slash in a `/…/` regex literal.
/// Every other backslash sequence is passed through to the regex engine.
pub fn unescape_slashes(raw: &str) -> String {
    raw.replace("\\/", "/")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regex_matches_whole_string() {
        let p = Pattern::regex("PLA").unwrap();
        assert!(p.matches("PLA"));
        assert!(!p.matches("PLA+"));
        assert!(!p.matches("xPLA"));
    }

    #[test]
    fn regex_alternation_is_grouped() {
        let p = Pattern::regex("PLA|PETG").unwrap();
        assert!(p.matches("PETG"));
        assert!(!p.matches("PLA-PETG"));
    }

    #[test]
    fn regex_wildcards() {
        let p = Pattern::regex(r".*Prusa.*").unwrap();
        assert!(p.matches("Original Prusa i3"));
        assert!(!p.matches("Voron"));
    }

    #[test]
    fn invalid_regex_is_an_error() {
        assert!(Pattern::regex("(unclosed").is_err());
    }

    #[test]
    fn literal_is_exact() {
        let p = Pattern::literal("a.b");
        assert!(p.matches("a.b"));
        assert!(!p.matches("axb"));
        assert_eq!(p.src(), "a.b");
    }

    #[test]
    fn slash_unescape() {
        assert_eq!(unescape_slashes(r"a\/b\d"), r"a/b\d");
    }
}
