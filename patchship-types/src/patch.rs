use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// How a rule locates the text it replaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Matcher {
    /// Exact substring match.
    Literal { text: String },
    /// Regular expression; the replacement may use `$1` / `${name}` captures.
    Regex { pattern: String },
}

impl Matcher {
    pub fn literal(text: impl Into<String>) -> Self {
        Matcher::Literal { text: text.into() }
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Matcher::Regex {
            pattern: pattern.into(),
        }
    }

    /// The raw literal text or pattern source.
    pub fn source(&self) -> &str {
        match self {
            Matcher::Literal { text } => text,
            Matcher::Regex { pattern } => pattern,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Matcher::Literal { .. } => "literal",
            Matcher::Regex { .. } => "regex",
        }
    }
}

/// A single find/replace instruction against one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchRule {
    /// Target file, relative to the repository root unless absolute.
    pub path: Utf8PathBuf,
    pub matcher: Matcher,
    pub replacement: String,

    /// A required rule that matches nothing fails the whole file.
    #[serde(default = "default_true")]
    pub required: bool,

    /// Replace every occurrence (default) or only the first one.
    #[serde(default = "default_true", alias = "replaceAll")]
    pub replace_all: bool,

    /// Set to `false` for rules whose matcher still matches after they ran.
    #[serde(default = "default_true")]
    pub idempotent: bool,
}

fn default_true() -> bool {
    true
}

impl PatchRule {
    pub fn literal(
        path: impl Into<Utf8PathBuf>,
        text: impl Into<String>,
        replacement: impl Into<String>,
    ) -> Self {
        Self::new(path.into(), Matcher::literal(text), replacement.into())
    }

    pub fn regex(
        path: impl Into<Utf8PathBuf>,
        pattern: impl Into<String>,
        replacement: impl Into<String>,
    ) -> Self {
        Self::new(path.into(), Matcher::regex(pattern), replacement.into())
    }

    fn new(path: Utf8PathBuf, matcher: Matcher, replacement: String) -> Self {
        Self {
            path,
            matcher,
            replacement,
            required: true,
            replace_all: true,
            idempotent: true,
        }
    }

    /// Mark the rule best-effort: a non-match is logged and skipped.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn first_only(mut self) -> Self {
        self.replace_all = false;
        self
    }

    pub fn non_idempotent(mut self) -> Self {
        self.idempotent = false;
        self
    }
}

/// Effect of one rule on the in-memory buffer of its file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchResult {
    pub path: Utf8PathBuf,
    /// Index of the rule in the list it was declared in.
    pub rule_index: usize,
    pub applied: bool,
    /// Occurrences the matcher found before replacement.
    pub matches: u64,
    pub byte_len_before: u64,
    pub byte_len_after: u64,
    pub sha256_before: String,
    pub sha256_after: String,
}

/// Everything the patcher did to one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchOutcome {
    pub path: Utf8PathBuf,
    pub results: Vec<PatchResult>,
    /// True when the file on disk was rewritten.
    pub written: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<Utf8PathBuf>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub diff: String,
}

impl PatchOutcome {
    pub fn applied_count(&self) -> usize {
        self.results.iter().filter(|r| r.applied).count()
    }

    pub fn changed(&self) -> bool {
        !self.diff.is_empty()
    }
}
