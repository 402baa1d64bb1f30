//! Remote deploy trigger and post-deploy health check.
//!
//! One attempt walks `Idle → Pushing → (PushSucceeded | PushFailed)` and,
//! after a successful push, `HealthChecking → (Healthy | Unhealthy | Timeout)`.
//! There is no retry loop; an unhealthy endpoint is re-probed exactly once
//! after `recheck_delay`.

use crate::error::{StepError, StepNote, StepResult};
use crate::ports::{HealthProbe, ProbeResult, ProcessRunner};
use crate::settings::{DeploySettings, HealthSettings};
use camino::Utf8Path;
use patchship_types::step::DeployStrategy;
use std::thread;
use tracing::{debug, info, warn};

const BODY_LOG_LIMIT: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployState {
    Idle,
    Pushing,
    PushSucceeded,
    PushFailed,
    HealthChecking,
    Healthy,
    Unhealthy,
    Timeout,
}

impl DeployState {
    pub fn can_transition_to(self, next: DeployState) -> bool {
        use DeployState::*;
        matches!(
            (self, next),
            (Idle, Pushing)
                | (Pushing, PushSucceeded)
                | (Pushing, PushFailed)
                | (PushSucceeded, HealthChecking)
                // health-only runs never push
                | (Idle, HealthChecking)
                | (HealthChecking, Healthy)
                | (HealthChecking, Unhealthy)
                | (HealthChecking, Timeout)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeployState::PushFailed
                | DeployState::Healthy
                | DeployState::Unhealthy
                | DeployState::Timeout
        )
    }
}

/// Tracks the states one deploy attempt passed through.
#[derive(Debug, Clone)]
pub struct DeployAttempt {
    state: DeployState,
    trail: Vec<DeployState>,
}

impl Default for DeployAttempt {
    fn default() -> Self {
        Self {
            state: DeployState::Idle,
            trail: vec![DeployState::Idle],
        }
    }
}

impl DeployAttempt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DeployState {
        self.state
    }

    pub fn trail(&self) -> &[DeployState] {
        &self.trail
    }

    fn advance(&mut self, next: DeployState) {
        if !self.state.can_transition_to(next) {
            warn!(from = ?self.state, to = ?next, "unexpected deploy state transition");
        }
        debug!(from = ?self.state, to = ?next, "deploy state");
        self.state = next;
        self.trail.push(next);
    }
}

/// Substitute `{remote}`, `{branch}` and `{target_branch}` in a command argv.
pub fn expand_command(argv: &[String], settings: &DeploySettings) -> Vec<String> {
    argv.iter()
        .map(|arg| {
            arg.replace("{remote}", &settings.remote)
                .replace("{branch}", &settings.branch)
                .replace("{target_branch}", &settings.target_branch)
        })
        .collect()
}

/// Trigger a redeploy with the configured strategy.
///
/// A failed push is a step error. A failed CLI rebuild falls back to the
/// restart command; if that fails too the result is a warning, since the
/// operator can still deploy by hand.
pub fn trigger_deploy(
    runner: &dyn ProcessRunner,
    repo_root: &Utf8Path,
    settings: &DeploySettings,
    attempt: &mut DeployAttempt,
) -> StepResult {
    attempt.advance(DeployState::Pushing);

    let result = match settings.strategy {
        DeployStrategy::Push => push_deploy(runner, repo_root, settings),
        DeployStrategy::CliRebuild => cli_rebuild(runner, repo_root, settings),
    };

    match result {
        Ok((note, true)) => {
            attempt.advance(DeployState::PushSucceeded);
            if let Some(logs) = &settings.logs {
                tail_logs(runner, repo_root, &expand_command(logs, settings));
            }
            Ok(note)
        }
        Ok((note, false)) => {
            attempt.advance(DeployState::PushFailed);
            Ok(note)
        }
        Err(e) => {
            attempt.advance(DeployState::PushFailed);
            Err(e)
        }
    }
}

fn push_deploy(
    runner: &dyn ProcessRunner,
    repo_root: &Utf8Path,
    settings: &DeploySettings,
) -> Result<(StepNote, bool), StepError> {
    let refspec = format!("{}:{}", settings.branch, settings.target_branch);
    let args = vec![
        "push".to_string(),
        "--force".to_string(),
        settings.remote.clone(),
        refspec.clone(),
    ];
    let command = format!("git {}", args.join(" "));
    info!(remote = %settings.remote, %refspec, "deploying via force-push");

    let out = runner
        .run(repo_root, "git", &args)
        .map_err(|e| StepError::GitCommand {
            command: command.clone(),
            stderr: format!("{:#}", e),
        })?;
    if !out.success() {
        return Err(StepError::git(command, &out));
    }
    Ok((
        StepNote::ok(format!("pushed {} to {}", refspec, settings.remote)),
        true,
    ))
}

fn cli_rebuild(
    runner: &dyn ProcessRunner,
    repo_root: &Utf8Path,
    settings: &DeploySettings,
) -> Result<(StepNote, bool), StepError> {
    let rebuild = expand_command(&settings.rebuild, settings);
    let rebuild_err = match run_platform(runner, repo_root, &rebuild) {
        Ok(()) => return Ok((StepNote::ok(format!("rebuild triggered: {}", rebuild.join(" "))), true)),
        Err(e) => e,
    };
    warn!(error = %rebuild_err, "rebuild command failed");

    let Some(restart) = &settings.restart else {
        return Ok((
            StepNote::warn(format!("{}; deploy manually", rebuild_err)),
            false,
        ));
    };

    let restart = expand_command(restart, settings);
    match run_platform(runner, repo_root, &restart) {
        Ok(()) => Ok((
            StepNote::warn(format!(
                "rebuild failed, restarted instead: {}",
                restart.join(" ")
            )),
            true,
        )),
        Err(restart_err) => {
            warn!(error = %restart_err, "restart command failed");
            Ok((
                StepNote::warn(format!(
                    "{}; restart fallback also failed: {}; deploy manually",
                    rebuild_err, restart_err
                )),
                false,
            ))
        }
    }
}

fn run_platform(
    runner: &dyn ProcessRunner,
    repo_root: &Utf8Path,
    argv: &[String],
) -> Result<(), StepError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(StepError::DeployCommand {
            command: String::new(),
            stderr: "no command configured".to_string(),
        });
    };
    let command = argv.join(" ");
    let out = runner
        .run(repo_root, program, args)
        .map_err(|e| StepError::DeployCommand {
            command: command.clone(),
            stderr: format!("{:#}", e),
        })?;
    if out.success() {
        Ok(())
    } else {
        Err(StepError::deploy(command, &out))
    }
}

fn tail_logs(runner: &dyn ProcessRunner, repo_root: &Utf8Path, argv: &[String]) {
    let Some((program, args)) = argv.split_first() else {
        return;
    };
    match runner.run(repo_root, program, args) {
        Ok(out) if out.success() => {
            for line in out.stdout.lines() {
                info!(target: "patchship::platform_logs", "{}", line);
            }
        }
        Ok(out) => warn!(command = %argv.join(" "), error = %out.diagnostic(), "log tail failed"),
        Err(e) => warn!(command = %argv.join(" "), error = %e, "log tail failed"),
    }
}

/// Final classification of a health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthOutcome {
    Healthy { status: u16 },
    Unhealthy { detail: String },
    Timeout,
}

/// Non-fatal report of an endpoint that never became healthy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("health check warning for {url}: {detail}")]
pub struct HealthCheckWarning {
    pub url: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub url: String,
    pub outcome: HealthOutcome,
    pub probes: u8,
}

impl HealthReport {
    pub fn warning(&self) -> Option<HealthCheckWarning> {
        let detail = match &self.outcome {
            HealthOutcome::Healthy { .. } => return None,
            HealthOutcome::Unhealthy { detail } => detail.clone(),
            HealthOutcome::Timeout => "timed out".to_string(),
        };
        Some(HealthCheckWarning {
            url: self.url.clone(),
            detail,
        })
    }

    pub fn into_note(self) -> StepNote {
        match (&self.outcome, self.warning()) {
            (HealthOutcome::Healthy { status }, _) => StepNote::ok(format!(
                "healthy (HTTP {}) after {} probe{}",
                status,
                self.probes,
                if self.probes == 1 { "" } else { "s" }
            )),
            (_, Some(w)) => StepNote::warn(w.to_string()),
            (_, None) => StepNote::warn("health check inconclusive"),
        }
    }
}

/// Probe the endpoint, re-checking once after `recheck_delay` if needed.
pub fn check_health(
    probe: &dyn HealthProbe,
    settings: &HealthSettings,
    attempt: &mut DeployAttempt,
) -> HealthReport {
    attempt.advance(DeployState::HealthChecking);

    let mut outcome = probe_once(probe, settings);
    let mut probes = 1;
    if !matches!(outcome, HealthOutcome::Healthy { .. }) {
        warn!(
            url = %settings.url,
            outcome = ?outcome,
            delay_secs = settings.recheck_delay.as_secs_f64(),
            "endpoint not healthy yet, re-checking once"
        );
        thread::sleep(settings.recheck_delay);
        outcome = probe_once(probe, settings);
        probes += 1;
    }

    attempt.advance(match outcome {
        HealthOutcome::Healthy { .. } => DeployState::Healthy,
        HealthOutcome::Unhealthy { .. } => DeployState::Unhealthy,
        HealthOutcome::Timeout => DeployState::Timeout,
    });

    HealthReport {
        url: settings.url.clone(),
        outcome,
        probes,
    }
}

fn probe_once(probe: &dyn HealthProbe, settings: &HealthSettings) -> HealthOutcome {
    match probe.probe(&settings.url, settings.timeout) {
        ProbeResult::Healthy { status, body } => {
            info!(url = %settings.url, status, body = %truncate(&body), "health endpoint responded");
            if settings.expect_json && serde_json::from_str::<serde_json::Value>(&body).is_err() {
                return HealthOutcome::Unhealthy {
                    detail: format!("HTTP {} but body is not JSON", status),
                };
            }
            HealthOutcome::Healthy { status }
        }
        ProbeResult::Unhealthy { status, body } => {
            info!(url = %settings.url, status, body = %truncate(&body), "health endpoint responded");
            HealthOutcome::Unhealthy {
                detail: format!("HTTP {}", status),
            }
        }
        ProbeResult::TimedOut => HealthOutcome::Timeout,
        ProbeResult::Unreachable { message } => HealthOutcome::Unhealthy { detail: message },
    }
}

fn truncate(body: &str) -> &str {
    if body.len() <= BODY_LOG_LIMIT {
        return body;
    }
    let mut end = BODY_LOG_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
