//! Configuration file loading for patchship.
//!
//! Discovers `patchship.toml` in the repository root, or loads an explicit
//! `.toml` / `.json` / `.yaml` file. Merges file settings with CLI arguments
//! (CLI takes precedence).

use anyhow::{Context, bail};
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use patchship_core::settings::{DeploySettings, HealthSettings, RemoteSettings, RunSettings};
use patchship_types::patch::PatchRule;
use patchship_types::step::DeployStrategy;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// The config file name to search for.
pub const CONFIG_FILE_NAME: &str = "patchship.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PatchshipConfig {
    /// Patch rules, applied in declared order.
    pub rules: Vec<PatchRule>,

    /// Working branch to create or check out.
    pub branch: Option<String>,

    #[serde(alias = "filesToStage")]
    pub files_to_stage: Vec<Utf8PathBuf>,

    #[serde(alias = "commitMessage")]
    pub commit_message: Option<String>,

    /// Remotes to push to, in order.
    pub remotes: Vec<RemoteEntry>,

    /// Shorthand for `[health] url`.
    #[serde(alias = "healthCheckUrl")]
    pub health_check_url: Option<String>,

    /// Copy each patched file to `<file>.backup-<unix-ms>` first.
    pub backup: bool,

    pub deploy: Option<DeployConfig>,

    pub health: HealthConfig,

    pub process: ProcessConfig,
}

/// A remote given either by name or as a table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RemoteEntry {
    Name(String),
    Detailed(RemoteConfig),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteConfig {
    pub name: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub force: bool,
    #[serde(default, alias = "abortOnFailure")]
    pub abort_on_failure: Option<bool>,
}

/// `[deploy]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub strategy: DeployStrategy,

    /// Platform remote or app name; defaults to the last configured remote.
    pub remote: Option<String>,

    #[serde(alias = "targetBranch")]
    pub target_branch: String,

    /// Rebuild argv for `cli-rebuild`.
    pub rebuild: Vec<String>,

    /// Fallback argv when the rebuild fails.
    pub restart: Option<Vec<String>>,

    /// Log tail argv run after a successful deploy.
    pub logs: Option<Vec<String>>,

    #[serde(alias = "abortOnFailure")]
    pub abort_on_failure: bool,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            strategy: DeployStrategy::Push,
            remote: None,
            target_branch: "main".to_string(),
            rebuild: Vec::new(),
            restart: None,
            logs: None,
            abort_on_failure: true,
        }
    }
}

/// `[health]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub url: Option<String>,
    pub timeout_secs: u64,
    pub recheck_delay_secs: u64,
    /// Require the response body to be JSON.
    pub expect_json: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 10,
            recheck_delay_secs: 10,
            expect_json: false,
        }
    }
}

/// `[process]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Kill git / platform commands that run longer than this.
    pub timeout_secs: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self { timeout_secs: 300 }
    }
}

/// Discover the patchship.toml config file in the repository root.
pub fn discover_config(repo_root: &Utf8Path) -> Option<Utf8PathBuf> {
    let config_path = repo_root.join(CONFIG_FILE_NAME);
    if config_path.exists() {
        debug!("found config file at {}", config_path);
        Some(config_path)
    } else {
        debug!("no config file found at {}", config_path);
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
    Yaml,
}

impl ConfigFormat {
    /// Format implied by the file extension; TOML when unknown.
    pub fn from_path(path: &Utf8Path) -> Self {
        match path.extension().map(str::to_ascii_lowercase).as_deref() {
            Some("json") => ConfigFormat::Json,
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Toml,
        }
    }
}

/// Load and parse a config file.
pub fn load_config(path: &Utf8Path) -> anyhow::Result<PatchshipConfig> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read config file {}", path))?;
    parse_config(&contents, ConfigFormat::from_path(path))
        .with_context(|| format!("parse config file {}", path))
}

/// Parse a config file from a string.
pub fn parse_config(contents: &str, format: ConfigFormat) -> anyhow::Result<PatchshipConfig> {
    let config = match format {
        ConfigFormat::Toml => toml::from_str(contents).context("invalid TOML")?,
        ConfigFormat::Json => serde_json::from_str(contents).context("invalid JSON")?,
        ConfigFormat::Yaml => serde_yaml::from_str(contents).context("invalid YAML")?,
    };
    Ok(config)
}

/// Load the explicit config, or discover one under `repo_root`.
pub fn load(explicit: Option<&Utf8Path>, repo_root: &Utf8Path) -> anyhow::Result<PatchshipConfig> {
    match explicit {
        Some(path) => load_config(path),
        None => match discover_config(repo_root) {
            Some(path) => load_config(&path),
            None => bail!(
                "no {} found in {} (pass --config <file>)",
                CONFIG_FILE_NAME,
                repo_root
            ),
        },
    }
}

/// CLI values that override the config file.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub repo_root: Utf8PathBuf,
    pub dry_run: bool,
    /// Force backups on; the file value is kept otherwise.
    pub backup: bool,
    pub no_deploy: bool,
}

/// Run settings plus the process timeout for the shell runner.
#[derive(Debug, Clone)]
pub struct MergedConfig {
    pub settings: RunSettings,
    pub process_timeout: Duration,
}

/// Builder for merging config file with CLI arguments.
pub struct ConfigMerger {
    config: PatchshipConfig,
}

impl ConfigMerger {
    pub fn new(config: PatchshipConfig) -> Self {
        Self { config }
    }

    /// Merge with `run` command arguments and validate the result.
    pub fn merge_run_args(self, overrides: &RunOverrides) -> anyhow::Result<MergedConfig> {
        let cfg = self.config;

        let branch = match cfg.branch {
            Some(b) if !b.trim().is_empty() => b,
            _ => bail!("`branch` is required"),
        };
        let commit_message = match cfg.commit_message {
            Some(m) if !m.trim().is_empty() => m,
            _ => bail!("`commit_message` is required"),
        };

        let remotes = remote_settings(&cfg.remotes)?;

        let deploy = match cfg.deploy {
            Some(d) if !overrides.no_deploy => {
                Some(deploy_settings(d, &branch, remotes.last())?)
            }
            _ => None,
        };

        let health = match cfg.health.url.or(cfg.health_check_url) {
            Some(url) if !overrides.no_deploy => Some(HealthSettings {
                url,
                timeout: Duration::from_secs(cfg.health.timeout_secs),
                recheck_delay: Duration::from_secs(cfg.health.recheck_delay_secs),
                expect_json: cfg.health.expect_json,
            }),
            _ => None,
        };

        if cfg.process.timeout_secs == 0 {
            bail!("`process.timeout_secs` must be greater than zero");
        }

        let settings = RunSettings {
            repo_root: overrides.repo_root.clone(),
            rules: cfg.rules,
            branch,
            files_to_stage: cfg.files_to_stage,
            commit_message,
            remotes,
            deploy,
            health,
            backup: overrides.backup || cfg.backup,
            dry_run: overrides.dry_run,
        };

        debug!(
            "merged config: branch={}, remotes={:?}, deploy={:?}, health={:?}",
            settings.branch,
            settings.remotes.iter().map(|r| &r.name).collect::<Vec<_>>(),
            settings.deploy.as_ref().map(|d| d.strategy),
            settings.health.as_ref().map(|h| &h.url)
        );

        Ok(MergedConfig {
            settings,
            process_timeout: Duration::from_secs(cfg.process.timeout_secs),
        })
    }
}

/// A bare-string remote is best-effort unless it is the last one listed.
fn remote_settings(entries: &[RemoteEntry]) -> anyhow::Result<Vec<RemoteSettings>> {
    let last = entries.len().saturating_sub(1);
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let remote = match entry {
                RemoteEntry::Name(name) => RemoteSettings {
                    abort_on_failure: i == last,
                    ..RemoteSettings::new(name.clone())
                },
                RemoteEntry::Detailed(rc) => RemoteSettings {
                    name: rc.name.clone(),
                    target: rc.target.clone(),
                    force: rc.force,
                    abort_on_failure: rc.abort_on_failure.unwrap_or(true),
                },
            };
            if remote.name.trim().is_empty() {
                bail!("remote #{} has an empty name", i + 1);
            }
            Ok(remote)
        })
        .collect()
}

fn deploy_settings(
    cfg: DeployConfig,
    branch: &str,
    last_remote: Option<&RemoteSettings>,
) -> anyhow::Result<DeploySettings> {
    let remote = match cfg.remote.or_else(|| last_remote.map(|r| r.name.clone())) {
        Some(r) => r,
        None => bail!("`deploy.remote` is required when no remotes are configured"),
    };
    if cfg.strategy == DeployStrategy::CliRebuild && cfg.rebuild.is_empty() {
        bail!("`deploy.rebuild` is required for the cli-rebuild strategy");
    }
    Ok(DeploySettings {
        strategy: cfg.strategy,
        remote,
        branch: branch.to_string(),
        target_branch: cfg.target_branch,
        rebuild: cfg.rebuild,
        restart: cfg.restart,
        logs: cfg.logs,
        abort_on_failure: cfg.abort_on_failure,
    })
}
