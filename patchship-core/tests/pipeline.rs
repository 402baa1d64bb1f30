//! End-to-end pipeline tests against scripted process and health ports.

use camino::{Utf8Path, Utf8PathBuf};
use patchship_core::adapters::{ScriptedProbe, ScriptedRunner};
use patchship_core::pipeline::{RunGuard, RunPorts, run, write_run_artifacts};
use patchship_core::ports::{ProbeResult, ProcessOutput};
use patchship_core::settings::{DeploySettings, HealthSettings, RemoteSettings, RunSettings};
use patchship_core::{DeployStep, DeployStrategy, PatchRule, StepStatus, ToolError};
use pretty_assertions::assert_eq;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn temp_repo() -> (TempDir, Utf8PathBuf) {
    let td = tempfile::tempdir().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(td.path().to_path_buf()).expect("utf8 path");
    fs::create_dir_all(root.join("src")).unwrap();
    fs::write(root.join("src/app.ts"), "const x = 1;\nexport default x;\n").unwrap();
    (td, root)
}

fn settings(root: &Utf8Path) -> RunSettings {
    RunSettings {
        repo_root: root.to_path_buf(),
        rules: vec![PatchRule::literal("src/app.ts", "const x = 1;", "const x = 2;")],
        branch: "fix-x".to_string(),
        files_to_stage: vec![Utf8PathBuf::from("src/app.ts")],
        commit_message: "Bump x".to_string(),
        remotes: vec![
            RemoteSettings::new("origin").best_effort(),
            RemoteSettings::new("heroku"),
        ],
        ..RunSettings::default()
    }
}

fn healthy() -> ScriptedProbe {
    ScriptedProbe::new(vec![ProbeResult::Healthy {
        status: 200,
        body: "{\"status\":\"ok\"}".to_string(),
    }])
}

fn statuses(outcome: &patchship_core::RunOutcome) -> Vec<StepStatus> {
    outcome.records.iter().map(|r| r.status).collect()
}

#[test]
fn full_run_patches_commits_and_pushes() {
    let (_td, root) = temp_repo();
    let runner = ScriptedRunner::new();
    let probe = healthy();

    let outcome = run(
        &settings(&root),
        RunPorts {
            runner: &runner,
            probe: &probe,
        },
        &RunGuard::new(),
    )
    .expect("run");

    assert!(outcome.is_success());
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(
        fs::read_to_string(root.join("src/app.ts")).unwrap(),
        "const x = 2;\nexport default x;\n"
    );
    assert_eq!(
        runner.calls(),
        vec![
            "git checkout -b fix-x",
            "git add -- src/app.ts",
            "git commit -m Bump x",
            "git push origin fix-x",
            "git push heroku fix-x",
        ]
    );
    assert!(outcome.recovery.is_empty());
}

#[test]
fn best_effort_origin_failure_still_pushes_heroku() {
    let (_td, root) = temp_repo();
    let runner = ScriptedRunner::new().on(
        "git push origin",
        ProcessOutput::failed(128, "fatal: 'origin' does not appear to be a git repository"),
    );
    let probe = healthy();

    let outcome = run(
        &settings(&root),
        RunPorts {
            runner: &runner,
            probe: &probe,
        },
        &RunGuard::new(),
    )
    .expect("run");

    assert!(runner.was_called("git push heroku fix-x"));
    assert_eq!(outcome.failed_count(), 1);
    assert!(outcome.is_success());
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(
        statuses(&outcome),
        vec![
            StepStatus::Succeeded,
            StepStatus::Succeeded,
            StepStatus::Succeeded,
            StepStatus::Succeeded,
            StepStatus::Failed,
            StepStatus::Succeeded,
        ]
    );
}

#[test]
fn fatal_push_failure_aborts_with_recovery() {
    let (_td, root) = temp_repo();
    let runner = ScriptedRunner::new().on("git push heroku", ProcessOutput::failed(1, "rejected"));
    let probe = healthy();
    let mut s = settings(&root);
    s.health = Some(HealthSettings::new("http://app/health"));

    let outcome = run(
        &s,
        RunPorts {
            runner: &runner,
            probe: &probe,
        },
        &RunGuard::new(),
    )
    .expect("run");

    assert_eq!(outcome.exit_code(), 2);
    assert_eq!(outcome.aborted_at, Some(5));
    assert_eq!(outcome.records.last().unwrap().status, StepStatus::Skipped);
    assert_eq!(probe.calls(), 0);
    assert!(
        outcome
            .recovery
            .iter()
            .any(|c| c == "git reset --soft HEAD~1  # undo the patch commit")
    );
    assert!(outcome.recovery.iter().any(|c| c == "git push heroku fix-x"));
}

#[test]
fn repeated_commit_is_a_warning() {
    let (_td, root) = temp_repo();
    let runner = ScriptedRunner::new().on(
        "git commit",
        ProcessOutput {
            code: Some(1),
            stdout: "On branch fix-x\nnothing to commit, working tree clean\n".to_string(),
            ..ProcessOutput::default()
        },
    );
    let probe = healthy();

    let outcome = run(
        &settings(&root),
        RunPorts {
            runner: &runner,
            probe: &probe,
        },
        &RunGuard::new(),
    )
    .expect("run");

    assert_eq!(outcome.records[3].status, StepStatus::Warned);
    assert!(outcome.is_success());
    assert!(runner.was_called("git push heroku"));
}

#[test]
fn missing_staged_file_fails_without_commit() {
    let (_td, root) = temp_repo();
    let runner = ScriptedRunner::new();
    let probe = healthy();
    let mut s = settings(&root);
    s.files_to_stage.push(Utf8PathBuf::from("src/missing.ts"));

    let outcome = run(
        &s,
        RunPorts {
            runner: &runner,
            probe: &probe,
        },
        &RunGuard::new(),
    )
    .expect("run");

    assert_eq!(outcome.exit_code(), 2);
    let failed = outcome.aborting_step().expect("aborting step");
    assert!(matches!(failed.step, DeployStep::StageFiles { .. }));
    assert_eq!(
        failed.message.as_deref(),
        Some("file not found: src/missing.ts")
    );
    assert!(!runner.was_called("git add"));
    assert!(!runner.was_called("git commit"));
    assert!(
        outcome
            .recovery
            .iter()
            .any(|c| c == "git checkout -- src/app.ts  # discard patch")
    );
}

#[test]
fn required_patch_miss_aborts_before_git() {
    let (_td, root) = temp_repo();
    let runner = ScriptedRunner::new();
    let probe = healthy();
    let mut s = settings(&root);
    s.rules
        .push(PatchRule::literal("src/app.ts", "not in file", "anything"));

    let outcome = run(
        &s,
        RunPorts {
            runner: &runner,
            probe: &probe,
        },
        &RunGuard::new(),
    )
    .expect("run");

    assert_eq!(outcome.exit_code(), 2);
    assert_eq!(outcome.aborted_at, Some(0));
    assert!(runner.calls().is_empty());
    assert_eq!(
        fs::read_to_string(root.join("src/app.ts")).unwrap(),
        "const x = 1;\nexport default x;\n"
    );
}

#[test]
fn invalid_rule_is_tool_error_before_any_step() {
    let (_td, root) = temp_repo();
    let runner = ScriptedRunner::new();
    let probe = healthy();
    let mut s = settings(&root);
    s.rules.push(PatchRule::regex("src/app.ts", "(unclosed", "x"));

    let err = run(
        &s,
        RunPorts {
            runner: &runner,
            probe: &probe,
        },
        &RunGuard::new(),
    )
    .expect_err("invalid regex");

    assert!(matches!(err, ToolError::Internal(_)));
    assert_eq!(err.exit_code(), 1);
    assert!(err.to_string().contains("invalid patch rule"));
    assert!(runner.calls().is_empty());
    assert_eq!(
        fs::read_to_string(root.join("src/app.ts")).unwrap(),
        "const x = 1;\nexport default x;\n"
    );
}

#[test]
fn second_run_with_required_rule_reports_already_patched() {
    let (_td, root) = temp_repo();
    let probe = healthy();
    let s = settings(&root);
    let guard = RunGuard::new();

    let first_runner = ScriptedRunner::new();
    let first = run(
        &s,
        RunPorts {
            runner: &first_runner,
            probe: &probe,
        },
        &guard,
    )
    .expect("first run");
    assert_eq!(first.exit_code(), 0);

    let runner = ScriptedRunner::new();
    let second = run(
        &s,
        RunPorts {
            runner: &runner,
            probe: &probe,
        },
        &guard,
    )
    .expect("second run");

    assert_eq!(second.exit_code(), 0);
    assert_eq!(second.aborted_at, None);
    assert_eq!(second.records[0].status, StepStatus::Succeeded);
    assert_eq!(
        second.records[0].message.as_deref(),
        Some("already patched, file unchanged")
    );
    assert!(runner.was_called("git push heroku"));
    assert_eq!(
        fs::read_to_string(root.join("src/app.ts")).unwrap(),
        "const x = 2;\nexport default x;\n"
    );
}

#[test]
fn health_timeout_is_warning_and_run_succeeds() {
    let (_td, root) = temp_repo();
    let runner = ScriptedRunner::new();
    let probe = ScriptedProbe::new(vec![ProbeResult::TimedOut]);
    let mut s = settings(&root);
    s.deploy = Some(DeploySettings::push("heroku", "fix-x"));
    s.health = Some(HealthSettings {
        recheck_delay: Duration::ZERO,
        ..HealthSettings::new("http://app/health")
    });

    let outcome = run(
        &s,
        RunPorts {
            runner: &runner,
            probe: &probe,
        },
        &RunGuard::new(),
    )
    .expect("run");

    assert!(runner.was_called("git push --force heroku fix-x:main"));
    assert_eq!(probe.calls(), 2);
    let health = outcome.records.last().unwrap();
    assert_eq!(health.status, StepStatus::Warned);
    assert!(outcome.is_success());
    assert_eq!(outcome.exit_code(), 0);
}

#[test]
fn failed_cli_rebuild_skips_health_and_suggests_manual_deploy() {
    let (_td, root) = temp_repo();
    let runner = ScriptedRunner::new().on("platform", ProcessOutput::failed(1, "unauthorized"));
    let probe = healthy();
    let mut s = settings(&root);
    s.deploy = Some(DeploySettings {
        strategy: DeployStrategy::CliRebuild,
        rebuild: vec!["platform".into(), "rebuild".into(), "{remote}".into()],
        restart: Some(vec!["platform".into(), "restart".into(), "{remote}".into()]),
        ..DeploySettings::push("shop", "fix-x")
    });
    s.health = Some(HealthSettings::new("http://app/health"));

    let outcome = run(
        &s,
        RunPorts {
            runner: &runner,
            probe: &probe,
        },
        &RunGuard::new(),
    )
    .expect("run");

    let n = outcome.records.len();
    assert_eq!(outcome.records[n - 2].status, StepStatus::Warned);
    assert_eq!(outcome.records[n - 1].status, StepStatus::Skipped);
    assert_eq!(probe.calls(), 0);
    assert!(outcome.is_success());
    assert_eq!(
        outcome.recovery,
        vec!["platform rebuild shop || platform restart shop"]
    );
}

#[test]
fn dry_run_writes_nothing_and_skips_git() {
    let (_td, root) = temp_repo();
    let runner = ScriptedRunner::new();
    let probe = healthy();
    let mut s = settings(&root);
    s.dry_run = true;

    let outcome = run(
        &s,
        RunPorts {
            runner: &runner,
            probe: &probe,
        },
        &RunGuard::new(),
    )
    .expect("run");

    assert!(runner.calls().is_empty());
    assert_eq!(
        fs::read_to_string(root.join("src/app.ts")).unwrap(),
        "const x = 1;\nexport default x;\n"
    );
    assert!(outcome.patches[0].diff.contains("+const x = 2;"));
    assert!(
        outcome.records[1..]
            .iter()
            .all(|r| r.status == StepStatus::Skipped)
    );
}

#[test]
fn busy_guard_rejects_run() {
    let (_td, root) = temp_repo();
    let guard = RunGuard::new();
    let _held = guard.try_acquire().expect("acquire");
    let runner = ScriptedRunner::new();
    let probe = healthy();

    let err = run(
        &settings(&root),
        RunPorts {
            runner: &runner,
            probe: &probe,
        },
        &guard,
    )
    .unwrap_err();
    assert!(matches!(err, ToolError::Busy));
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn artifacts_are_written() {
    let (_td, root) = temp_repo();
    let runner = ScriptedRunner::new();
    let probe = healthy();
    let outcome = run(
        &settings(&root),
        RunPorts {
            runner: &runner,
            probe: &probe,
        },
        &RunGuard::new(),
    )
    .expect("run");

    let out_dir = root.join("out");
    write_run_artifacts(&outcome, &out_dir, &patchship_core::adapters::FsWritePort)
        .expect("artifacts");

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out_dir.join("run.json")).unwrap()).unwrap();
    assert_eq!(json["schema"], "patchship.run.v1");
    assert!(out_dir.join("run.md").exists());
    assert!(
        fs::read_to_string(out_dir.join("patch.diff"))
            .unwrap()
            .contains("-const x = 1;")
    );
}
