use patchship_types::outcome::{RunOutcome, StepRecord, StepStatus};
use patchship_types::patch::{Matcher, PatchRule};
use patchship_types::step::{DeployStep, DeployStrategy, PlannedStep};
use pretty_assertions::assert_eq;

#[test]
fn patch_rule_defaults_to_required_replace_all() {
    let rule: PatchRule = toml::from_str(
        r#"
path = "src/app.ts"
replacement = "const x = 2;"

[matcher]
kind = "literal"
text = "const x = 1;"
"#,
    )
    .expect("parse rule");

    assert_eq!(rule, PatchRule::literal("src/app.ts", "const x = 1;", "const x = 2;"));
    assert!(rule.required);
    assert!(rule.replace_all);
    assert!(rule.idempotent);
}

#[test]
fn patch_rule_accepts_optional_regex_from_json() {
    let rule: PatchRule = serde_json::from_str(
        r#"{
            "path": "server/index.js",
            "matcher": { "kind": "regex", "pattern": "token:\\s*(\\w+)" },
            "replacement": "accessToken: $1",
            "required": false,
            "replaceAll": false
        }"#,
    )
    .expect("parse rule");

    assert_eq!(rule.matcher, Matcher::regex("token:\\s*(\\w+)"));
    assert!(!rule.required);
    assert!(!rule.replace_all);
}

#[test]
fn deploy_step_is_tagged_by_type() {
    let step = DeployStep::TriggerRebuild {
        strategy: DeployStrategy::CliRebuild,
        remote: "heroku".to_string(),
        branch: "deploy/fix".to_string(),
        target_branch: "main".to_string(),
    };
    let json = serde_json::to_value(&step).expect("serialize");
    assert_eq!(json["type"], "trigger_rebuild");
    assert_eq!(json["strategy"], "cli-rebuild");

    let back: DeployStep = serde_json::from_value(json).expect("deserialize");
    assert_eq!(back, step);
}

#[test]
fn push_label_includes_refspec_and_force() {
    let step = DeployStep::PushRemote {
        remote: "heroku".to_string(),
        branch: "deploy/fix".to_string(),
        target: Some("main".to_string()),
        force: true,
    };
    assert_eq!(step.label(), "push heroku deploy/fix:main (force)");
    assert_eq!(step.kind(), "push_remote");
}

#[test]
fn planned_step_constructors_set_policy() {
    let step = DeployStep::Commit {
        message: "fix cors".to_string(),
    };
    assert!(PlannedStep::fatal(step.clone()).abort_on_failure);
    assert!(!PlannedStep::best_effort(step).abort_on_failure);
}

#[test]
fn run_outcome_exit_code_tracks_aborting_step() {
    let mut outcome = RunOutcome::new();
    assert_eq!(outcome.schema, patchship_types::schema::PATCHSHIP_RUN_V1);

    outcome.records.push(StepRecord {
        step: DeployStep::PushRemote {
            remote: "origin".to_string(),
            branch: "b".to_string(),
            target: None,
            force: false,
        },
        status: StepStatus::Failed,
        message: Some("rejected".to_string()),
        abort_on_failure: false,
    });
    assert_eq!(outcome.failed_count(), 1);
    assert!(outcome.is_success());
    assert_eq!(outcome.exit_code(), 0);

    outcome.aborted_at = Some(0);
    assert!(!outcome.is_success());
    assert_eq!(outcome.exit_code(), 2);
    assert_eq!(
        outcome.aborting_step().map(|r| r.step.kind()),
        Some("push_remote")
    );
}
