//! Embeddable core library for patchship.
//!
//! Provides a clap-free, I/O-abstracted entry point for the
//! patch → git → deploy → health-check workflow.
//!
//! # Port traits
//!
//! Subprocesses and HTTP are abstracted behind port traits in [`ports`]:
//! - [`ProcessRunner`](ports::ProcessRunner) — run git / platform CLI commands
//! - [`HealthProbe`](ports::HealthProbe) — probe a health endpoint
//! - [`WritePort`](ports::WritePort) — write run artifacts
//!
//! The [`adapters`] module provides the shell, HTTP and filesystem
//! implementations plus a scripted runner for embedding and tests.
//!
//! # Entry points
//!
//! - [`run`](pipeline::run) — execute a full run and return its outcome
//! - [`run_git_workflow`](git::run_git_workflow) — branch, stage, commit, push only
//! - [`plan_steps`](pipeline::plan_steps) — the steps a run would execute

pub mod adapters;
pub mod deploy;
pub mod error;
pub mod git;
pub mod pipeline;
pub mod ports;
pub mod recovery;
pub mod report;
pub mod settings;

pub use error::{StepError, StepNote, StepResult, ToolError};
pub use report::RunReport;

// Re-export the data model so embedders don't need patchship-types directly.
pub use patchship_types::outcome::{RunOutcome, StepRecord, StepStatus};
pub use patchship_types::patch::{Matcher, PatchOutcome, PatchResult, PatchRule};
pub use patchship_types::step::{DeployStep, DeployStrategy, PlannedStep};
