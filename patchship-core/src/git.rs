//! Source control driver: branch, stage, commit and push through the git CLI.

use crate::error::{StepError, StepNote, StepResult};
use crate::pipeline::execute_steps;
use crate::ports::{ProcessOutput, ProcessRunner};
use crate::report::RunReport;
use crate::settings::RemoteSettings;
use camino::{Utf8Path, Utf8PathBuf};
use patchship_types::outcome::StepRecord;
use patchship_types::step::{DeployStep, PlannedStep};
use tracing::debug;

/// Thin sequential wrapper over `git` subcommands run in `repo_root`.
pub struct GitDriver<'a> {
    runner: &'a dyn ProcessRunner,
    repo_root: &'a Utf8Path,
}

impl<'a> GitDriver<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, repo_root: &'a Utf8Path) -> Self {
        Self { runner, repo_root }
    }

    fn git(&self, args: &[&str]) -> Result<ProcessOutput, StepError> {
        let owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        self.runner
            .run(self.repo_root, "git", &owned)
            .map_err(|e| StepError::GitCommand {
                command: command_line(args),
                stderr: format!("{:#}", e),
            })
    }

    fn git_ok(&self, args: &[&str]) -> Result<ProcessOutput, StepError> {
        let out = self.git(args)?;
        if out.success() {
            Ok(out)
        } else {
            Err(StepError::git(command_line(args), &out))
        }
    }

    /// `checkout -b`, falling back to `checkout` when the branch already exists.
    pub fn create_or_checkout_branch(&self, branch: &str) -> StepResult {
        let created = self.git(&["checkout", "-b", branch])?;
        if created.success() {
            return Ok(StepNote::ok(format!("created branch {}", branch)));
        }
        if created.timed_out {
            return Err(StepError::git(
                command_line(&["checkout", "-b", branch]),
                &created,
            ));
        }

        debug!(branch, stderr = %created.diagnostic(), "create failed, checking out existing branch");
        self.git_ok(&["checkout", branch])?;
        Ok(StepNote::ok(format!("checked out existing branch {}", branch)))
    }

    /// Every path must exist in the working tree; nothing is staged otherwise.
    pub fn stage_files(&self, files: &[Utf8PathBuf]) -> StepResult {
        if files.is_empty() {
            return Ok(StepNote::warn("no files to stage"));
        }
        for file in files {
            let abs = if file.is_absolute() {
                file.clone()
            } else {
                self.repo_root.join(file)
            };
            if !abs.exists() {
                return Err(StepError::FileNotFound { path: file.clone() });
            }
        }

        let mut args = vec!["add", "--"];
        args.extend(files.iter().map(|f| f.as_str()));
        self.git_ok(&args)?;
        Ok(StepNote::ok(format!("staged {} file(s)", files.len())))
    }

    /// A "nothing to commit" result is a warning so re-runs stay harmless.
    pub fn commit(&self, message: &str) -> StepResult {
        let args = ["commit", "-m", message];
        let out = self.git(&args)?;
        if out.success() {
            let summary = out.stdout.lines().next().unwrap_or("committed").trim();
            return Ok(StepNote::ok(summary.to_string()));
        }
        if is_nothing_to_commit(&out) {
            return Ok(StepNote::warn("nothing to commit, working tree unchanged"));
        }
        Err(StepError::git(command_line(&args), &out))
    }

    pub fn push(&self, remote: &str, branch: &str, target: Option<&str>, force: bool) -> StepResult {
        let refspec = match target {
            Some(t) => format!("{}:{}", branch, t),
            None => branch.to_string(),
        };
        let mut args = vec!["push"];
        if force {
            args.push("--force");
        }
        args.push(remote);
        args.push(&refspec);

        let out = self.git_ok(&args)?;
        if out.stderr.contains("Everything up-to-date") || out.stdout.contains("Everything up-to-date")
        {
            return Ok(StepNote::ok(format!("{} already up to date", remote)));
        }
        Ok(StepNote::ok(format!("pushed {} to {}", refspec, remote)))
    }

    /// Execute one git step.
    pub fn run_step(&self, step: &DeployStep) -> StepResult {
        match step {
            DeployStep::CreateOrCheckoutBranch { branch } => self.create_or_checkout_branch(branch),
            DeployStep::StageFiles { files } => self.stage_files(files),
            DeployStep::Commit { message } => self.commit(message),
            DeployStep::PushRemote {
                remote,
                branch,
                target,
                force,
            } => self.push(remote, branch, target.as_deref(), *force),
            other => Err(StepError::Internal(anyhow::anyhow!(
                "{} is not a git step",
                other.kind()
            ))),
        }
    }
}

fn is_nothing_to_commit(out: &ProcessOutput) -> bool {
    let text = format!("{}\n{}", out.stdout, out.stderr);
    text.contains("nothing to commit")
        || text.contains("nothing added to commit")
        || text.contains("no changes added to commit")
}

fn command_line(args: &[&str]) -> String {
    format!("git {}", args.join(" "))
}

/// Branch → stage → commit → push steps, in that order.
pub fn git_workflow_steps(
    branch: &str,
    files: &[Utf8PathBuf],
    message: &str,
    remotes: &[RemoteSettings],
) -> Vec<PlannedStep> {
    let mut steps = vec![
        PlannedStep::fatal(DeployStep::CreateOrCheckoutBranch {
            branch: branch.to_string(),
        }),
        PlannedStep::fatal(DeployStep::StageFiles {
            files: files.to_vec(),
        }),
        PlannedStep::fatal(DeployStep::Commit {
            message: message.to_string(),
        }),
    ];
    for remote in remotes {
        steps.push(PlannedStep {
            step: DeployStep::PushRemote {
                remote: remote.name.clone(),
                branch: branch.to_string(),
                target: remote.target.clone(),
                force: remote.force,
            },
            abort_on_failure: remote.abort_on_failure,
        });
    }
    steps
}

/// Run the git half of a deploy on its own, returning the records it appended.
pub fn run_git_workflow(
    runner: &dyn ProcessRunner,
    repo_root: &Utf8Path,
    branch: &str,
    files: &[Utf8PathBuf],
    message: &str,
    remotes: &[RemoteSettings],
    report: &mut RunReport,
) -> Vec<StepRecord> {
    let start = report.outcome().records.len();
    let steps = git_workflow_steps(branch, files, message, remotes);
    let driver = GitDriver::new(runner, repo_root);
    execute_steps(&steps, report, |step| driver.run_step(step));
    report.outcome().records[start..].to_vec()
}
