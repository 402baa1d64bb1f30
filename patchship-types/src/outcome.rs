use crate::patch::PatchOutcome;
use crate::step::DeployStep;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    /// Completed with a non-fatal problem (nothing to commit, unhealthy endpoint, ...).
    Warned,
    Failed,
    /// Not attempted because an earlier fatal step failed, or the run was a dry-run.
    Skipped,
}

impl StepStatus {
    pub fn is_failure(self) -> bool {
        matches!(self, StepStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: DeployStep,
    pub status: StepStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default = "default_true")]
    pub abort_on_failure: bool,
}

fn default_true() -> bool {
    true
}

/// Ordered log of one run. Append-only while the run is in progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub schema: String,
    pub run_id: String,
    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub records: Vec<StepRecord>,

    /// Index into `records` of the fatal step that stopped the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted_at: Option<usize>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<PatchOutcome>,

    /// Copy-pasteable commands for finishing or undoing the run by hand.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recovery: Vec<String>,
}

impl RunOutcome {
    pub fn new() -> Self {
        Self {
            schema: crate::schema::PATCHSHIP_RUN_V1.to_string(),
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            ended_at: None,
            records: Vec::new(),
            aborted_at: None,
            patches: Vec::new(),
            recovery: Vec::new(),
        }
    }

    pub fn failed(&self) -> impl Iterator<Item = &StepRecord> {
        self.records.iter().filter(|r| r.status.is_failure())
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }

    pub fn warned_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status == StepStatus::Warned)
            .count()
    }

    /// The run succeeded unless a fatal (`abort_on_failure`) step failed.
    pub fn is_success(&self) -> bool {
        self.aborted_at.is_none()
    }

    pub fn aborting_step(&self) -> Option<&StepRecord> {
        self.aborted_at.and_then(|i| self.records.get(i))
    }

    /// 0 on success, 2 when a fatal step failed.
    pub fn exit_code(&self) -> u8 {
        if self.is_success() { 0 } else { 2 }
    }
}

impl Default for RunOutcome {
    fn default() -> Self {
        Self::new()
    }
}
