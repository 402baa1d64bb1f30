//! Append-only run log.

use crate::error::{StepError, StepNote};
use chrono::Utc;
use patchship_types::outcome::{RunOutcome, StepRecord, StepStatus};
use patchship_types::patch::PatchOutcome;
use patchship_types::step::PlannedStep;
use tracing::{debug, error, info, warn};

/// Accumulates one record per planned step, in execution order.
///
/// Once a step with `abort_on_failure` fails the report is sealed: later
/// `record` calls are ignored and the remaining steps can only be marked
/// skipped.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    outcome: RunOutcome,
    sealed: bool,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_id(&self) -> &str {
        &self.outcome.run_id
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Append a record. Returns false when the report is sealed.
    pub fn record(
        &mut self,
        planned: &PlannedStep,
        status: StepStatus,
        message: Option<String>,
    ) -> bool {
        if self.sealed {
            debug!(step = planned.step.kind(), "report sealed, ignoring record");
            return false;
        }

        let idx = self.outcome.records.len();
        self.outcome.records.push(StepRecord {
            step: planned.step.clone(),
            status,
            message,
            abort_on_failure: planned.abort_on_failure,
        });

        if status.is_failure() && planned.abort_on_failure {
            self.sealed = true;
            self.outcome.aborted_at = Some(idx);
        }
        true
    }

    /// Record the result of executing `planned`, logging it.
    pub fn record_result(&mut self, planned: &PlannedStep, result: Result<StepNote, StepError>) {
        let label = planned.step.label();
        match result {
            Ok(note) => {
                match note.status {
                    StepStatus::Warned => {
                        warn!(step = %label, message = ?note.message, "step completed with warning")
                    }
                    StepStatus::Skipped => info!(step = %label, message = ?note.message, "step skipped"),
                    _ => info!(step = %label, "step succeeded"),
                }
                self.record(planned, note.status, note.message);
            }
            Err(e) => {
                if planned.abort_on_failure {
                    error!(step = %label, error = %e, "step failed");
                } else {
                    warn!(step = %label, error = %e, "best-effort step failed, continuing");
                }
                self.record(planned, StepStatus::Failed, Some(e.to_string()));
            }
        }
    }

    /// Mark steps that will not be attempted.
    pub fn skip_remaining(&mut self, steps: &[PlannedStep], reason: &str) {
        for planned in steps {
            self.outcome.records.push(StepRecord {
                step: planned.step.clone(),
                status: StepStatus::Skipped,
                message: Some(reason.to_string()),
                abort_on_failure: planned.abort_on_failure,
            });
        }
    }

    pub fn add_patch(&mut self, patch: PatchOutcome) {
        self.outcome.patches.push(patch);
    }

    pub fn add_recovery<I, S>(&mut self, commands: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outcome
            .recovery
            .extend(commands.into_iter().map(Into::into));
    }

    pub fn outcome(&self) -> &RunOutcome {
        &self.outcome
    }

    /// Console rendering of the current state of the report.
    pub fn render(&self) -> String {
        patchship_render::render_text(&self.outcome)
    }

    pub fn finish(mut self) -> RunOutcome {
        self.outcome.ended_at = Some(Utc::now());
        self.outcome
    }
}
