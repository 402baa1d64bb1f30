//! Compiled form of a rule matcher.

use crate::error::{EditResult, PatchError};
use patchship_types::patch::Matcher;
use regex::Regex;

#[derive(Debug)]
pub(crate) enum CompiledMatcher {
    Literal(String),
    Regex(Regex),
}

impl CompiledMatcher {
    pub(crate) fn compile(rule_index: usize, matcher: &Matcher) -> EditResult<Self> {
        match matcher {
            Matcher::Literal { text } => {
                if text.is_empty() {
                    return Err(PatchError::InvalidPattern {
                        rule_index,
                        message: "literal matcher is empty".to_string(),
                    });
                }
                Ok(CompiledMatcher::Literal(text.clone()))
            }
            Matcher::Regex { pattern } => Regex::new(pattern)
                .map(CompiledMatcher::Regex)
                .map_err(|e| PatchError::InvalidPattern {
                    rule_index,
                    message: e.to_string(),
                }),
        }
    }

    pub(crate) fn count(&self, haystack: &str) -> usize {
        match self {
            CompiledMatcher::Literal(text) => haystack.matches(text.as_str()).count(),
            CompiledMatcher::Regex(re) => re.find_iter(haystack).count(),
        }
    }

    /// Literal replacements are inserted verbatim; regex replacements expand `$1` / `${name}`.
    pub(crate) fn replace(&self, haystack: &str, replacement: &str, all: bool) -> String {
        match (self, all) {
            (CompiledMatcher::Literal(text), true) => haystack.replace(text.as_str(), replacement),
            (CompiledMatcher::Literal(text), false) => {
                haystack.replacen(text.as_str(), replacement, 1)
            }
            (CompiledMatcher::Regex(re), true) => re.replace_all(haystack, replacement).into_owned(),
            (CompiledMatcher::Regex(re), false) => re.replace(haystack, replacement).into_owned(),
        }
    }

    /// Whether a matcher that found nothing has already been applied: the
    /// replacement text is present in the buffer. Regex replacements that
    /// expand captures cannot be checked and never count as applied.
    pub(crate) fn already_applied(&self, haystack: &str, replacement: &str) -> bool {
        if replacement.is_empty() {
            return false;
        }
        match self {
            CompiledMatcher::Literal(_) => haystack.contains(replacement),
            CompiledMatcher::Regex(_) => !replacement.contains('$') && haystack.contains(replacement),
        }
    }
}
