//! Copy-pasteable shell commands for finishing or rolling back a run by hand.

use crate::deploy::expand_command;
use crate::settings::RunSettings;
use patchship_types::outcome::{RunOutcome, StepStatus};
use patchship_types::step::{DeployStep, DeployStrategy, PlannedStep};

/// Quote `s` for a POSIX shell, leaving plain words untouched.
pub fn shell_quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@+,%".contains(c));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

fn join_argv(argv: &[String]) -> String {
    argv.iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// The shell command an operator would run to perform `step` by hand.
///
/// Patch steps have no shell equivalent and yield `None`.
pub fn manual_command(step: &DeployStep, settings: &RunSettings) -> Option<String> {
    match step {
        DeployStep::PatchFile { .. } => None,
        DeployStep::CreateOrCheckoutBranch { branch } => {
            let b = shell_quote(branch);
            Some(format!("git checkout -b {b} || git checkout {b}"))
        }
        DeployStep::StageFiles { files } => {
            if files.is_empty() {
                return None;
            }
            let paths: Vec<String> = files.iter().map(|f| shell_quote(f.as_str())).collect();
            Some(format!("git add -- {}", paths.join(" ")))
        }
        DeployStep::Commit { message } => Some(format!("git commit -m {}", shell_quote(message))),
        DeployStep::PushRemote {
            remote,
            branch,
            target,
            force,
        } => {
            let refspec = match target {
                Some(t) => format!("{}:{}", branch, t),
                None => branch.clone(),
            };
            Some(format!(
                "git push {}{} {}",
                if *force { "--force " } else { "" },
                shell_quote(remote),
                shell_quote(&refspec)
            ))
        }
        DeployStep::TriggerRebuild {
            strategy,
            remote,
            branch,
            target_branch,
        } => match (strategy, &settings.deploy) {
            (DeployStrategy::CliRebuild, Some(deploy)) if !deploy.rebuild.is_empty() => {
                let rebuild = join_argv(&expand_command(&deploy.rebuild, deploy));
                match &deploy.restart {
                    Some(restart) => Some(format!(
                        "{} || {}",
                        rebuild,
                        join_argv(&expand_command(restart, deploy))
                    )),
                    None => Some(rebuild),
                }
            }
            _ => Some(format!(
                "git push --force {} {}",
                shell_quote(remote),
                shell_quote(&format!("{}:{}", branch, target_branch))
            )),
        },
        DeployStep::PollHealth { url } => {
            let secs = settings
                .health
                .as_ref()
                .map(|h| h.timeout.as_secs().max(1))
                .unwrap_or(10);
            Some(format!("curl -fsS --max-time {} {}", secs, shell_quote(url)))
        }
    }
}

/// Recovery commands for an aborted run: undo local changes that were left
/// uncommitted, then retry every step from the one that failed.
///
/// Relies on `outcome.records[i]` describing `plan[i]`.
pub fn recovery_commands(
    settings: &RunSettings,
    plan: &[PlannedStep],
    outcome: &RunOutcome,
) -> Vec<String> {
    let Some(failed_at) = outcome.aborted_at else {
        return Vec::new();
    };
    let mut commands = Vec::new();

    if settings.repo_root.as_str() != "." {
        commands.push(format!("cd {}", shell_quote(settings.repo_root.as_str())));
    }

    let committed = outcome.records.iter().any(|r| {
        matches!(r.step, DeployStep::Commit { .. }) && r.status == StepStatus::Succeeded
    });

    if committed {
        commands.push("git reset --soft HEAD~1  # undo the patch commit".to_string());
    } else {
        for patch in outcome.patches.iter().filter(|p| p.written) {
            match &patch.backup_path {
                Some(backup) => commands.push(format!(
                    "cp {} {}  # restore original",
                    shell_quote(backup.as_str()),
                    shell_quote(patch.path.as_str())
                )),
                None => commands.push(format!(
                    "git checkout -- {}  # discard patch",
                    shell_quote(patch.path.as_str())
                )),
            }
        }
    }

    commands.extend(
        plan.iter()
            .skip(failed_at)
            .filter_map(|planned| manual_command(&planned.step, settings)),
    );
    commands
}
