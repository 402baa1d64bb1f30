//! Clap-free settings for a run.

use camino::Utf8PathBuf;
use patchship_types::patch::PatchRule;
use patchship_types::step::DeployStrategy;
use std::time::Duration;

/// A git remote to push the working branch to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    pub name: String,
    /// Remote branch; defaults to the local branch name.
    pub target: Option<String>,
    pub force: bool,
    pub abort_on_failure: bool,
}

impl RemoteSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: None,
            force: false,
            abort_on_failure: true,
        }
    }

    pub fn best_effort(mut self) -> Self {
        self.abort_on_failure = false;
        self
    }
}

/// Platform redeploy configuration.
///
/// Command argv entries may contain `{remote}`, `{branch}` and
/// `{target_branch}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploySettings {
    pub strategy: DeployStrategy,
    pub remote: String,
    pub branch: String,
    pub target_branch: String,
    pub rebuild: Vec<String>,
    pub restart: Option<Vec<String>>,
    pub logs: Option<Vec<String>>,
    pub abort_on_failure: bool,
}

impl DeploySettings {
    pub fn push(remote: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            strategy: DeployStrategy::Push,
            remote: remote.into(),
            branch: branch.into(),
            target_branch: "main".to_string(),
            rebuild: Vec::new(),
            restart: None,
            logs: None,
            abort_on_failure: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSettings {
    pub url: String,
    pub timeout: Duration,
    /// Wait before the single re-check of an unhealthy endpoint.
    pub recheck_delay: Duration,
    /// Treat a non-JSON 2xx body as unhealthy.
    pub expect_json: bool,
}

impl HealthSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(10),
            recheck_delay: Duration::from_secs(10),
            expect_json: false,
        }
    }
}

/// Settings for the run pipeline.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub repo_root: Utf8PathBuf,
    pub rules: Vec<PatchRule>,

    // Git
    pub branch: String,
    pub files_to_stage: Vec<Utf8PathBuf>,
    pub commit_message: String,
    pub remotes: Vec<RemoteSettings>,

    // Deploy
    pub deploy: Option<DeploySettings>,
    pub health: Option<HealthSettings>,

    // Behaviour
    pub backup: bool,
    /// Patch preview only: nothing is written, no git or deploy step runs.
    pub dry_run: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            repo_root: Utf8PathBuf::from("."),
            rules: Vec::new(),
            branch: String::new(),
            files_to_stage: Vec::new(),
            commit_message: String::new(),
            remotes: Vec::new(),
            deploy: None,
            health: None,
            backup: false,
            dry_run: false,
        }
    }
}
