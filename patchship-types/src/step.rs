use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// How a redeploy is triggered on the hosting platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeployStrategy {
    /// Force-push `branch:target_branch` to the platform remote.
    #[default]
    Push,
    /// Run the configured platform rebuild command, falling back to restart.
    CliRebuild,
}

impl DeployStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            DeployStrategy::Push => "push",
            DeployStrategy::CliRebuild => "cli-rebuild",
        }
    }
}

/// One discrete action in the release workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeployStep {
    PatchFile {
        path: Utf8PathBuf,
        rules: usize,
    },
    CreateOrCheckoutBranch {
        branch: String,
    },
    StageFiles {
        files: Vec<Utf8PathBuf>,
    },
    Commit {
        message: String,
    },
    PushRemote {
        remote: String,
        branch: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        #[serde(default)]
        force: bool,
    },
    TriggerRebuild {
        strategy: DeployStrategy,
        remote: String,
        branch: String,
        target_branch: String,
    },
    PollHealth {
        url: String,
    },
}

impl DeployStep {
    /// Stable short name, used in artifacts and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DeployStep::PatchFile { .. } => "patch_file",
            DeployStep::CreateOrCheckoutBranch { .. } => "create_or_checkout_branch",
            DeployStep::StageFiles { .. } => "stage_files",
            DeployStep::Commit { .. } => "commit",
            DeployStep::PushRemote { .. } => "push_remote",
            DeployStep::TriggerRebuild { .. } => "trigger_rebuild",
            DeployStep::PollHealth { .. } => "poll_health",
        }
    }

    /// Human-readable one-line description.
    pub fn label(&self) -> String {
        match self {
            DeployStep::PatchFile { path, rules } => {
                format!("patch {} ({} rule{})", path, rules, plural(*rules))
            }
            DeployStep::CreateOrCheckoutBranch { branch } => format!("checkout branch {}", branch),
            DeployStep::StageFiles { files } => {
                format!("stage {} file{}", files.len(), plural(files.len()))
            }
            DeployStep::Commit { message } => format!("commit \"{}\"", first_line(message)),
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
                let force = if *force { " (force)" } else { "" };
                format!("push {} {}{}", remote, refspec, force)
            }
            DeployStep::TriggerRebuild {
                strategy,
                remote,
                branch,
                target_branch,
            } => match strategy {
                DeployStrategy::Push => {
                    format!("deploy {}:{} to {}", branch, target_branch, remote)
                }
                DeployStrategy::CliRebuild => format!("rebuild {} via platform cli", remote),
            },
            DeployStep::PollHealth { url } => format!("health check {}", url),
        }
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("")
}

/// A step together with its failure policy, constructed before the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub step: DeployStep,
    /// When false the step is best-effort: failure is recorded and the run continues.
    pub abort_on_failure: bool,
}

impl PlannedStep {
    pub fn fatal(step: DeployStep) -> Self {
        Self {
            step,
            abort_on_failure: true,
        }
    }

    pub fn best_effort(step: DeployStep) -> Self {
        Self {
            step,
            abort_on_failure: false,
        }
    }
}
