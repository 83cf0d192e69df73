//! Run report data types.

use chrono::{DateTime, Utc};
use chunkflow_types::Coordinate;
use serde::{Deserialize, Serialize};

use super::ExecutorStatus;

/// Status of one step within one pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step executed and its outputs were written to run state.
    Succeeded,
    /// Step received the no-work sentinel and was not invoked.
    Skipped,
    /// Step failed under the ignore policy; its outputs are absent for this pass.
    Ignored,
    /// Step failed under the raise policy and aborted the run.
    Failed,
}

/// Outcome of invoking (or skipping) a single step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepOutcome {
    pub step_id: String,
    pub status: StepStatus,
    /// Coordinate assigned for this pass; `None` for steps outside the schedule.
    #[serde(default)]
    pub coordinate: Option<Coordinate>,
    /// Failure message captured for ignored or failed steps.
    #[serde(default)]
    pub message: Option<String>,
}

/// Everything that happened during one pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PassReport {
    /// Pass number, counted from 1 across resumed runs.
    pub pass: u64,
    pub outcomes: Vec<StepOutcome>,
}

impl PassReport {
    pub fn outcome(&self, step_id: &str) -> Option<&StepOutcome> {
        self.outcomes.iter().find(|outcome| outcome.step_id == step_id)
    }
}

/// Summary of a run produced by the pass executor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub status: ExecutorStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub passes: Vec<PassReport>,
}

impl RunReport {
    pub(crate) fn started() -> Self {
        Self {
            status: ExecutorStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            passes: Vec::new(),
        }
    }

    pub(crate) fn finish(&mut self, status: ExecutorStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    /// Number of passes that ran, including a pass that aborted.
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Number of step outcomes across all passes with the given status.
    pub fn count(&self, status: StepStatus) -> usize {
        self.passes
            .iter()
            .flat_map(|pass| pass.outcomes.iter())
            .filter(|outcome| outcome.status == status)
            .count()
    }

    /// Every outcome recorded for `step_id`, in pass order.
    pub fn outcomes_for<'a>(&'a self, step_id: &'a str) -> impl Iterator<Item = &'a StepOutcome> + 'a {
        self.passes.iter().filter_map(move |pass| pass.outcome(step_id))
    }
}
