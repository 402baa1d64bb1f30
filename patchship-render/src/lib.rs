//! Rendering helpers (console text and markdown) for run outcomes.

use patchship_types::outcome::{RunOutcome, StepStatus};

/// Plain-text report: one line per step, a verdict, then recovery commands.
pub fn render_text(outcome: &RunOutcome) -> String {
    let mut out = String::new();
    out.push_str(&format!("patchship run {}\n", outcome.run_id));

    for r in &outcome.records {
        out.push_str(&format!("{} {}", status_tag(r.status), r.step.label()));
        if let Some(msg) = &r.message {
            let mut lines = msg.lines();
            if let Some(first) = lines.next() {
                out.push_str(&format!(" - {}", first));
            }
            for line in lines {
                out.push_str(&format!("\n       {}", line));
            }
        }
        if r.status == StepStatus::Failed && !r.abort_on_failure {
            out.push_str(" (best-effort, continued)");
        }
        out.push('\n');
    }

    out.push('\n');
    out.push_str(&verdict_line(outcome));
    out.push('\n');

    if let Some(step) = outcome.aborting_step() {
        out.push_str(&format!("Run aborted at: {}\n", step.step.label()));
    }

    if !outcome.recovery.is_empty() {
        out.push_str("\nManual recovery:\n");
        for cmd in &outcome.recovery {
            out.push_str(&format!("  {}\n", cmd));
        }
    }

    out
}

/// `ALL STEPS SUCCEEDED` or `N STEPS FAILED: <labels>`.
pub fn verdict_line(outcome: &RunOutcome) -> String {
    let failed: Vec<String> = outcome.failed().map(|r| r.step.label()).collect();
    if failed.is_empty() {
        "ALL STEPS SUCCEEDED".to_string()
    } else {
        format!("{} STEPS FAILED: {}", failed.len(), failed.join("; "))
    }
}

pub fn render_md(outcome: &RunOutcome) -> String {
    let mut out = String::new();
    out.push_str("# patchship run\n\n");
    out.push_str(&format!("- Run: `{}`\n", outcome.run_id));
    out.push_str(&format!("- Started: {}\n", outcome.started_at.to_rfc3339()));
    if let Some(ended) = outcome.ended_at {
        out.push_str(&format!("- Ended: {}\n", ended.to_rfc3339()));
    }
    out.push_str(&format!(
        "- Steps: {} (failed {}, warned {})\n",
        outcome.records.len(),
        outcome.failed_count(),
        outcome.warned_count()
    ));
    out.push_str(&format!("- Verdict: {}\n\n", verdict_line(outcome)));

    out.push_str("## Steps\n\n");
    if outcome.records.is_empty() {
        out.push_str("_No steps recorded._\n");
    }
    for (i, r) in outcome.records.iter().enumerate() {
        out.push_str(&format!("### {}. {}\n\n", i + 1, r.step.label()));
        out.push_str(&format!("- Kind: `{}`\n", r.step.kind()));
        out.push_str(&format!("- Status: `{}`\n", status_label(r.status)));
        out.push_str(&format!("- Abort on failure: `{}`\n", r.abort_on_failure));
        if let Some(msg) = &r.message {
            out.push_str(&format!("- Message: {}\n", msg));
        }
        out.push('\n');
    }

    if !outcome.patches.is_empty() {
        out.push_str("## Patches\n\n");
        for p in &outcome.patches {
            out.push_str(&format!(
                "- `{}`: {}/{} rules applied, written `{}`\n",
                p.path,
                p.applied_count(),
                p.results.len(),
                p.written
            ));
            if let Some(backup) = &p.backup_path {
                out.push_str(&format!("  - backup: `{}`\n", backup));
            }
        }
        out.push('\n');
    }

    if !outcome.recovery.is_empty() {
        out.push_str("## Manual recovery\n\n```sh\n");
        for cmd in &outcome.recovery {
            out.push_str(cmd);
            out.push('\n');
        }
        out.push_str("```\n");
    }

    out
}

fn status_tag(s: StepStatus) -> &'static str {
    match s {
        StepStatus::Succeeded => "[ OK ]",
        StepStatus::Warned => "[WARN]",
        StepStatus::Failed => "[FAIL]",
        StepStatus::Skipped => "[SKIP]",
    }
}

pub fn status_label(s: StepStatus) -> &'static str {
    match s {
        StepStatus::Succeeded => "succeeded",
        StepStatus::Warned => "warned",
        StepStatus::Failed => "failed",
        StepStatus::Skipped => "skipped",
    }
}
