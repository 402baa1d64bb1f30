//! Run pipeline: patch → branch → stage → commit → push → deploy → health.
//!
//! All subprocess and HTTP I/O goes through the port traits. Patch files are
//! read and written directly by `patchship-edit`.

use crate::deploy::{DeployAttempt, DeployState, check_health, trigger_deploy};
use crate::error::{StepNote, StepResult, ToolError};
use crate::git::{GitDriver, git_workflow_steps};
use crate::ports::{HealthProbe, ProcessRunner, WritePort};
use crate::recovery;
use crate::report::RunReport;
use crate::settings::RunSettings;
use anyhow::Context;
use patchship_edit::{
    ApplyOptions, PreparedFile, combined_diff, group_rules, prepare_file, validate_rules,
};
use patchship_render::render_md;
use patchship_types::outcome::RunOutcome;
use patchship_types::patch::PatchOutcome;
use patchship_types::step::{DeployStep, PlannedStep};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

const SKIPPED_AFTER_ABORT: &str = "skipped: earlier step failed";

/// Rejects overlapping runs within one process.
///
/// Owned by the caller and passed to [`run`]; a second `run` while a
/// [`RunToken`] is alive fails with [`ToolError::Busy`].
#[derive(Debug, Default)]
pub struct RunGuard {
    active: AtomicBool,
}

impl RunGuard {
    pub const fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
        }
    }

    pub fn try_acquire(&self) -> Option<RunToken<'_>> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunToken { guard: self })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Held for the duration of a run; releases the guard on drop.
#[derive(Debug)]
pub struct RunToken<'a> {
    guard: &'a RunGuard,
}

impl Drop for RunToken<'_> {
    fn drop(&mut self) {
        self.guard.active.store(false, Ordering::Release);
    }
}

/// External effects a run needs.
#[derive(Clone, Copy)]
pub struct RunPorts<'a> {
    pub runner: &'a dyn ProcessRunner,
    pub probe: &'a dyn HealthProbe,
}

/// The steps a run executes, in order: one per patched file, the git
/// workflow, then the optional deploy trigger and health check.
pub fn plan_steps(settings: &RunSettings) -> Vec<PlannedStep> {
    let mut steps: Vec<PlannedStep> = group_rules(&settings.repo_root, &settings.rules)
        .into_iter()
        .map(|g| {
            PlannedStep::fatal(DeployStep::PatchFile {
                path: g.path,
                rules: g.rules.len(),
            })
        })
        .collect();

    steps.extend(git_workflow_steps(
        &settings.branch,
        &settings.files_to_stage,
        &settings.commit_message,
        &settings.remotes,
    ));

    if let Some(deploy) = &settings.deploy {
        steps.push(PlannedStep {
            step: DeployStep::TriggerRebuild {
                strategy: deploy.strategy,
                remote: deploy.remote.clone(),
                branch: deploy.branch.clone(),
                target_branch: deploy.target_branch.clone(),
            },
            abort_on_failure: deploy.abort_on_failure,
        });
    }

    if let Some(health) = &settings.health {
        steps.push(PlannedStep::best_effort(DeployStep::PollHealth {
            url: health.url.clone(),
        }));
    }

    steps
}

/// Execute `steps` in order, recording each result.
///
/// Once the report is sealed by an aborting failure the rest are recorded
/// as skipped without being executed.
pub fn execute_steps(
    steps: &[PlannedStep],
    report: &mut RunReport,
    mut exec: impl FnMut(&DeployStep) -> StepResult,
) {
    for (i, planned) in steps.iter().enumerate() {
        if report.is_sealed() {
            report.skip_remaining(&steps[i..], SKIPPED_AFTER_ABORT);
            return;
        }
        debug!(step = %planned.step.label(), "executing step");
        let result = exec(&planned.step);
        report.record_result(planned, result);
    }
}

/// Execute a full run.
///
/// A fatal step failure is not an `Err`: it is recorded in the returned
/// outcome (`aborted_at`, `exit_code() == 2`) together with recovery
/// commands. `Err` means the run could not start or hit an internal error.
pub fn run(
    settings: &RunSettings,
    ports: RunPorts<'_>,
    guard: &RunGuard,
) -> Result<RunOutcome, ToolError> {
    let _token = guard.try_acquire().ok_or(ToolError::Busy)?;
    validate_rules(&settings.rules).context("invalid patch rule")?;

    let plan = plan_steps(settings);
    let mut report = RunReport::new();
    info!(
        run_id = %report.run_id(),
        steps = plan.len(),
        dry_run = settings.dry_run,
        "starting run"
    );

    let patch_count = apply_patches(settings, &plan, &mut report);

    if report.is_sealed() {
        return Ok(finish(report, settings, &plan, Vec::new()));
    }

    if settings.dry_run {
        report.skip_remaining(&plan[patch_count..], "dry-run");
        return Ok(finish(report, settings, &plan, Vec::new()));
    }

    let driver = GitDriver::new(ports.runner, &settings.repo_root);
    let mut attempt = DeployAttempt::new();
    let mut manual_deploy = Vec::new();

    execute_steps(&plan[patch_count..], &mut report, |step| match step {
        DeployStep::TriggerRebuild { .. } => {
            let Some(deploy) = &settings.deploy else {
                return Ok(StepNote::skipped("no deploy configured"));
            };
            let result = trigger_deploy(ports.runner, &settings.repo_root, deploy, &mut attempt);
            if attempt.state() == DeployState::PushFailed {
                manual_deploy.extend(recovery::manual_command(step, settings));
            }
            result
        }
        DeployStep::PollHealth { .. } => {
            let Some(health) = &settings.health else {
                return Ok(StepNote::skipped("no health check configured"));
            };
            if attempt.state() == DeployState::PushFailed {
                return Ok(StepNote::skipped("deploy did not go out"));
            }
            Ok(check_health(ports.probe, health, &mut attempt).into_note())
        }
        other => driver.run_step(other),
    });

    Ok(finish(report, settings, &plan, manual_deploy))
}

/// Run every patch step. Files are all prepared in memory before any is
/// written, so a failing rule in any file leaves the tree untouched.
///
/// Returns the number of patch steps at the front of `plan`.
fn apply_patches(settings: &RunSettings, plan: &[PlannedStep], report: &mut RunReport) -> usize {
    let groups = group_rules(&settings.repo_root, &settings.rules);
    let count = groups.len();
    let opts = ApplyOptions {
        dry_run: settings.dry_run,
        backup: settings.backup,
    };

    let mut prepared: Vec<PreparedFile> = Vec::with_capacity(count);
    for (i, group) in groups.iter().enumerate() {
        match prepare_file(&settings.repo_root, &group.path, &group.rules) {
            Ok(file) => prepared.push(file),
            Err(e) => {
                report.skip_remaining(&plan[..i], "not written: another file failed to patch");
                report.record_result(&plan[i], Err(e.into()));
                report.skip_remaining(&plan[i + 1..], SKIPPED_AFTER_ABORT);
                return count;
            }
        }
    }

    for (i, file) in prepared.into_iter().enumerate() {
        match file.commit(&opts) {
            Ok(outcome) => {
                report.record_result(&plan[i], Ok(patch_note(&outcome, settings.dry_run)));
                report.add_patch(outcome);
            }
            Err(e) => {
                report.record_result(&plan[i], Err(e.into()));
                report.skip_remaining(&plan[i + 1..], SKIPPED_AFTER_ABORT);
                return count;
            }
        }
    }
    count
}

fn patch_note(outcome: &PatchOutcome, dry_run: bool) -> StepNote {
    let applied = outcome.applied_count();
    let total = outcome.results.len();
    let missed = if applied < total {
        format!(", {} optional rule(s) matched nothing", total - applied)
    } else {
        String::new()
    };

    if dry_run {
        StepNote::ok(format!("would apply {}/{} rules{}", applied, total, missed))
    } else if !outcome.changed() {
        StepNote::ok("already patched, file unchanged")
    } else {
        StepNote::ok(format!("applied {}/{} rules{}", applied, total, missed))
    }
}

fn finish(
    mut report: RunReport,
    settings: &RunSettings,
    plan: &[PlannedStep],
    manual_deploy: Vec<String>,
) -> RunOutcome {
    let commands = recovery::recovery_commands(settings, plan, report.outcome());
    report.add_recovery(commands);
    report.add_recovery(manual_deploy);

    let outcome = report.finish();
    info!(
        run_id = %outcome.run_id,
        failed = outcome.failed_count(),
        warned = outcome.warned_count(),
        aborted = outcome.aborted_at.is_some(),
        "run finished"
    );
    outcome
}

/// Write `run.json`, `run.md` and `patch.diff` into `out_dir`.
pub fn write_run_artifacts(
    outcome: &RunOutcome,
    out_dir: &camino::Utf8Path,
    writer: &dyn WritePort,
) -> anyhow::Result<()> {
    writer.create_dir_all(out_dir)?;

    let run_json = serde_json::to_string_pretty(outcome).context("serialize run outcome")?;
    writer.write_file(&out_dir.join("run.json"), run_json.as_bytes())?;

    let run_md = render_md(outcome);
    writer.write_file(&out_dir.join("run.md"), run_md.as_bytes())?;

    writer.write_file(
        &out_dir.join("patch.diff"),
        combined_diff(&outcome.patches).as_bytes(),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{DeploySettings, HealthSettings, RemoteSettings};
    use camino::Utf8PathBuf;
    use patchship_types::patch::PatchRule;
    use pretty_assertions::assert_eq;

    #[test]
    fn guard_rejects_second_acquire_until_released() {
        let guard = RunGuard::new();
        let token = guard.try_acquire().expect("first acquire");
        assert!(guard.is_active());
        assert!(guard.try_acquire().is_none());
        drop(token);
        assert!(!guard.is_active());
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn plan_orders_patch_git_deploy_health() {
        let settings = RunSettings {
            rules: vec![
                PatchRule::literal("a.ts", "x", "y"),
                PatchRule::literal("b.ts", "x", "y"),
                PatchRule::literal("a.ts", "p", "q"),
            ],
            branch: "fix".to_string(),
            files_to_stage: vec![Utf8PathBuf::from("a.ts"), Utf8PathBuf::from("b.ts")],
            commit_message: "fix".to_string(),
            remotes: vec![
                RemoteSettings::new("origin").best_effort(),
                RemoteSettings::new("heroku"),
            ],
            deploy: Some(DeploySettings::push("heroku", "fix")),
            health: Some(HealthSettings::new("http://app/health")),
            ..RunSettings::default()
        };

        let kinds: Vec<&str> = plan_steps(&settings).iter().map(|p| p.step.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                "patch_file",
                "patch_file",
                "create_or_checkout_branch",
                "stage_files",
                "commit",
                "push_remote",
                "push_remote",
                "trigger_rebuild",
                "poll_health",
            ]
        );
        let plan = plan_steps(&settings);
        assert_eq!(
            plan[0].step,
            DeployStep::PatchFile {
                path: Utf8PathBuf::from("a.ts"),
                rules: 2
            }
        );
        assert!(!plan.last().unwrap().abort_on_failure);
    }

    #[test]
    fn execute_steps_skips_after_abort() {
        let steps = vec![
            PlannedStep::fatal(DeployStep::Commit {
                message: "m".into(),
            }),
            PlannedStep::fatal(DeployStep::CreateOrCheckoutBranch {
                branch: "b".into(),
            }),
        ];
        let mut report = RunReport::new();
        let mut calls = 0;
        execute_steps(&steps, &mut report, |_| {
            calls += 1;
            Err(crate::StepError::Internal(anyhow::anyhow!("boom")))
        });
        assert_eq!(calls, 1);
        assert_eq!(report.outcome().records.len(), 2);
        assert_eq!(report.outcome().aborted_at, Some(0));
    }
}
