//! Patch engine for patchship.
//!
//! Responsibilities:
//! - Apply literal/regex rules in declared order against one in-memory buffer per file.
//! - Write each file at most once, and only after every rule for it succeeded.
//! - Optionally copy the original to `<file>.backup-<unix-ms>` before writing.
//! - Generate a unified diff preview.

pub mod error;
mod matcher;

pub use error::{EditResult, PatchError};

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use chrono::Utc;
use diffy::PatchFormatter;
use fs_err as fs;
use matcher::CompiledMatcher;
use patchship_types::patch::{PatchOutcome, PatchResult, PatchRule};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Compute results and the diff without writing anything.
    pub dry_run: bool,
    /// Copy the original file aside before overwriting it.
    pub backup: bool,
}

/// Rules that target the same file, with their index in the original rule list.
#[derive(Debug, Clone)]
pub struct RuleGroup<'a> {
    pub path: Utf8PathBuf,
    pub rules: Vec<(usize, &'a PatchRule)>,
}

/// Group rules by target file, keeping first-seen file order and declared rule order.
///
/// Paths that name the same file (`app.ts`, `./app.ts`, `src/../app.ts`, or an
/// absolute path under `repo_root`) land in one group, labelled with the first
/// spelling seen.
pub fn group_rules<'a>(repo_root: &Utf8Path, rules: &'a [PatchRule]) -> Vec<RuleGroup<'a>> {
    let mut groups: Vec<(Utf8PathBuf, RuleGroup<'a>)> = Vec::new();
    for (idx, rule) in rules.iter().enumerate() {
        let key = file_key(repo_root, &rule.path);
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, group)) => group.rules.push((idx, rule)),
            None => groups.push((
                key,
                RuleGroup {
                    path: rule.path.clone(),
                    rules: vec![(idx, rule)],
                },
            )),
        }
    }
    groups.into_iter().map(|(_, g)| g).collect()
}

/// Identity of the file a rule path points at.
///
/// Canonical when the file exists (resolves symlinks), otherwise the
/// lexically normalized absolute path.
fn file_key(repo_root: &Utf8Path, path: &Utf8Path) -> Utf8PathBuf {
    let abs = normalize(&abs_path(repo_root, path));
    abs.canonicalize_utf8().unwrap_or(abs)
}

/// Collapse `.` and `..` components without touching the filesystem.
fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    let mut out = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Utf8Component::Normal(_))) {
                    out.pop();
                } else {
                    out.push("..");
                }
            }
            other => out.push(other.as_str()),
        }
    }
    out
}

/// Outcome of running rules against text, without touching disk.
#[derive(Debug, Clone)]
pub struct TextPatch {
    pub content: String,
    pub results: Vec<PatchResult>,
}

/// Apply `rules` to `content` in order. Each rule sees the previous rule's output.
///
/// `path` is only used to label results and errors.
pub fn apply_to_text(
    path: &Utf8Path,
    content: &str,
    rules: &[(usize, &PatchRule)],
) -> EditResult<TextPatch> {
    let mut current = content.to_string();
    let mut results = Vec::with_capacity(rules.len());

    for &(idx, rule) in rules {
        let compiled = CompiledMatcher::compile(idx, &rule.matcher)?;
        let matches = compiled.count(&current);

        if matches == 0 {
            if rule.idempotent && compiled.already_applied(&current, &rule.replacement) {
                info!(path = %path, rule = idx, "replacement already present, rule already applied");
                results.push(result_for(path, idx, false, 0, &current, &current));
                continue;
            }
            if rule.required {
                return Err(PatchError::PatchNotApplied {
                    path: path.to_path_buf(),
                    rule_index: idx,
                });
            }
            debug!(path = %path, rule = idx, "optional rule matched nothing, skipping");
            results.push(result_for(path, idx, false, 0, &current, &current));
            continue;
        }

        let next = compiled.replace(&current, &rule.replacement, rule.replace_all);
        if next != current && compiled.count(&next) > 0 {
            if rule.idempotent {
                warn!(
                    path = %path,
                    rule = idx,
                    "matcher still matches after replacement; a re-run will patch again \
                     (set idempotent = false if intended)"
                );
            } else {
                debug!(path = %path, rule = idx, "non-idempotent rule applied");
            }
        }

        results.push(result_for(path, idx, true, matches as u64, &current, &next));
        current = next;
    }

    Ok(TextPatch {
        content: current,
        results,
    })
}

fn result_for(
    path: &Utf8Path,
    rule_index: usize,
    applied: bool,
    matches: u64,
    before: &str,
    after: &str,
) -> PatchResult {
    PatchResult {
        path: path.to_path_buf(),
        rule_index,
        applied,
        matches,
        byte_len_before: before.len() as u64,
        byte_len_after: after.len() as u64,
        sha256_before: sha256_hex(before.as_bytes()),
        sha256_after: sha256_hex(after.as_bytes()),
    }
}

/// A file whose rules all succeeded in memory but which has not been written yet.
#[derive(Debug, Clone)]
pub struct PreparedFile {
    pub path: Utf8PathBuf,
    abs: Utf8PathBuf,
    before: String,
    after: String,
    pub results: Vec<PatchResult>,
}

impl PreparedFile {
    pub fn changed(&self) -> bool {
        self.before != self.after
    }

    pub fn diff(&self) -> String {
        render_diff(&self.path, &self.before, &self.after)
    }

    /// Write the patched content (once) unless dry-run or unchanged.
    pub fn commit(self, opts: &ApplyOptions) -> EditResult<PatchOutcome> {
        let diff = self.diff();
        let mut written = false;
        let mut backup_path = None;

        if self.changed() && !opts.dry_run {
            if opts.backup {
                let backup = backup_path_for(&self.abs);
                fs::copy(&self.abs, &backup).map_err(|e| PatchError::io(&backup, e))?;
                debug!(backup = %backup, "wrote backup");
                backup_path = Some(backup);
            }
            fs::write(&self.abs, &self.after).map_err(|e| PatchError::io(&self.abs, e))?;
            written = true;
            info!(path = %self.path, rules = self.results.len(), "patched file");
        } else if !self.changed() {
            debug!(path = %self.path, "content unchanged, not writing");
        }

        Ok(PatchOutcome {
            path: self.path,
            results: self.results,
            written,
            backup_path,
            diff,
        })
    }
}

/// Read `path` and run its rules in memory. Nothing is written.
pub fn prepare_file(
    repo_root: &Utf8Path,
    path: &Utf8Path,
    rules: &[(usize, &PatchRule)],
) -> EditResult<PreparedFile> {
    let abs = abs_path(repo_root, path);
    if !abs.is_file() {
        return Err(PatchError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let before = fs::read_to_string(&abs).map_err(|e| PatchError::io(path, e))?;
    let patched = apply_to_text(path, &before, rules)?;

    Ok(PreparedFile {
        path: path.to_path_buf(),
        abs,
        before,
        after: patched.content,
        results: patched.results,
    })
}

/// Apply every rule in `rules` to the file at `path` (the rules' own `path` is not consulted).
///
/// All-or-nothing: a failing required rule leaves the file byte-for-byte unchanged.
pub fn apply(
    repo_root: &Utf8Path,
    path: &Utf8Path,
    rules: &[PatchRule],
    opts: &ApplyOptions,
) -> EditResult<PatchOutcome> {
    let indexed: Vec<(usize, &PatchRule)> = rules.iter().enumerate().collect();
    prepare_file(repo_root, path, &indexed)?.commit(opts)
}

/// Apply a mixed rule list, grouped per file.
///
/// Every file is prepared before any is written, so one failing file leaves
/// the whole tree untouched.
pub fn apply_rules(
    repo_root: &Utf8Path,
    rules: &[PatchRule],
    opts: &ApplyOptions,
) -> EditResult<Vec<PatchOutcome>> {
    let prepared = group_rules(repo_root, rules)
        .iter()
        .map(|g| prepare_file(repo_root, &g.path, &g.rules))
        .collect::<EditResult<Vec<_>>>()?;

    prepared.into_iter().map(|p| p.commit(opts)).collect()
}

/// Compile every matcher without reading any file.
pub fn validate_rules(rules: &[PatchRule]) -> EditResult<()> {
    for (idx, rule) in rules.iter().enumerate() {
        CompiledMatcher::compile(idx, &rule.matcher)?;
    }
    Ok(())
}

/// Render a combined diff for several outcomes.
pub fn combined_diff(outcomes: &[PatchOutcome]) -> String {
    outcomes.iter().map(|o| o.diff.as_str()).collect()
}

fn abs_path(repo_root: &Utf8Path, rel: &Utf8Path) -> Utf8PathBuf {
    if rel.is_absolute() {
        rel.to_path_buf()
    } else {
        repo_root.join(rel)
    }
}

fn backup_path_for(abs: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{}.backup-{}", abs, Utc::now().timestamp_millis()))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn render_diff(path: &Utf8Path, old: &str, new: &str) -> String {
    if old == new {
        return String::new();
    }

    let formatter = PatchFormatter::new();
    let patch = diffy::create_patch(old, new);
    let body = formatter.fmt_patch(&patch).to_string();
    let body = body
        .replacen("--- original\n", &format!("--- a/{}\n", path), 1)
        .replacen("+++ modified\n", &format!("+++ b/{}\n", path), 1);

    let mut out = format!("diff --git a/{0} b/{0}\n", path);
    out.push_str(&body);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}
