//! Pass executor: drains the coordinate schedule one pass at a time.
//!
//! - Every pass dequeues one bundle and invokes every step in declared order
//! - Steps whose coordinate is the no-work sentinel are not invoked; prior outputs stay put
//! - Idleness flows downstream: a step whose run-state inputs all come from idle steps is idle
//!   too, so an appending sink never writes the same slice twice
//! - Steps outside the schedule (functions, sinks, unchunked sources) run without a coordinate
//! - A chunk-enabled source missing from the bundle halts the run instead of reading everything
//! - A failing step under [`ErrorPolicy::Raise`] halts the run; under [`ErrorPolicy::Ignore`]
//!   its outputs are cleared and the pass continues
//! - After each successful pass the planner (and optional [`CheckpointStore`]) receive a
//!   checkpoint of the remaining queue and the run state

mod report;

use std::collections::HashSet;

use chunkflow_types::{Coordinate, CoordinateBundle, ErrorPolicy};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

pub use report::{PassReport, RunReport, StepOutcome, StepStatus};

use crate::checkpoint::{Checkpoint, CheckpointStore, ParameterIndex};
use crate::error::RunError;
use crate::planner::ChunkPlanner;
use crate::run_state::RunState;
use crate::step::Step;

/// Lifecycle of a [`PassExecutor`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorStatus {
    Idle,
    Running,
    Done,
    Failed,
}

/// Runs pipeline steps against the planner's schedule.
pub struct PassExecutor {
    status: ExecutorStatus,
    checkpointing: bool,
    store: Option<Box<dyn CheckpointStore>>,
    completed_passes: u64,
    report: Option<RunReport>,
}

impl Default for PassExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl PassExecutor {
    pub fn new() -> Self {
        Self {
            status: ExecutorStatus::Idle,
            checkpointing: false,
            store: None,
            completed_passes: 0,
            report: None,
        }
    }

    /// Executor continuing a run that already completed `completed_passes` passes.
    pub fn resuming(completed_passes: u64) -> Self {
        Self {
            completed_passes,
            ..Self::new()
        }
    }

    /// Saves a checkpoint into the planner after every successful pass.
    pub fn with_checkpointing(mut self, enabled: bool) -> Self {
        self.checkpointing = enabled;
        self
    }

    /// Persists every checkpoint to `store` as well; implies checkpointing.
    pub fn with_store(mut self, store: impl CheckpointStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self.checkpointing = true;
        self
    }

    pub fn status(&self) -> ExecutorStatus {
        self.status
    }

    /// Passes completed so far, including those completed before a resume.
    pub fn completed_passes(&self) -> u64 {
        self.completed_passes
    }

    /// Report of the last run, available after both success and failure.
    pub fn report(&self) -> Option<&RunReport> {
        self.report.as_ref()
    }

    /// Drains `planner`, invoking `steps` in order against `run_state` once per pass.
    pub fn run(&mut self, steps: &mut [Step], planner: &mut ChunkPlanner, run_state: &mut RunState) -> Result<RunReport, RunError> {
        if self.status != ExecutorStatus::Idle {
            return Err(RunError::NotIdle { status: self.status });
        }

        self.status = ExecutorStatus::Running;
        let mut report = RunReport::started();
        info!(
            steps = steps.len(),
            passes = planner.pending_queue().len(),
            completed_passes = self.completed_passes,
            "run started"
        );

        let outcome = self.run_passes(steps, planner, run_state, &mut report);
        self.status = match outcome {
            Ok(()) => ExecutorStatus::Done,
            Err(_) => ExecutorStatus::Failed,
        };
        report.finish(self.status);
        self.report = Some(report.clone());

        match outcome {
            Ok(()) => {
                info!(passes = report.pass_count(), ignored = report.count(StepStatus::Ignored), "run finished");
                Ok(report)
            }
            Err(error) => Err(error),
        }
    }

    fn run_passes(
        &mut self,
        steps: &mut [Step],
        planner: &mut ChunkPlanner,
        run_state: &mut RunState,
        report: &mut RunReport,
    ) -> Result<(), RunError> {
        while planner.has_pending_work() {
            let Some(bundle) = planner.dequeue() else {
                break;
            };
            let pass = self.completed_passes + 1;
            info!(pass, remaining = planner.pending_queue().len(), "pass started");

            let pass_result = run_pass(steps, &bundle, pass, run_state);
            report.passes.push(pass_result.report);
            if let Some(error) = pass_result.error {
                return Err(error);
            }

            self.completed_passes = pass;
            if self.checkpointing {
                self.checkpoint(planner, run_state, pass)?;
            }
        }
        Ok(())
    }

    fn checkpoint(&mut self, planner: &mut ChunkPlanner, run_state: &RunState, pass: u64) -> Result<(), RunError> {
        let parameter_index = ParameterIndex {
            completed_passes: pass,
            pending: planner.pending_queue().clone(),
        };
        planner.save(&parameter_index, run_state);

        if let Some(store) = self.store.as_mut() {
            let checkpoint = Checkpoint::capture(&parameter_index, run_state);
            store.save(&checkpoint).map_err(|error| {
                error!(pass, error = %error, "checkpoint could not be persisted");
                RunError::Checkpoint { pass, error }
            })?;
        }
        Ok(())
    }
}

struct PassResult {
    report: PassReport,
    error: Option<RunError>,
}

fn run_pass(steps: &mut [Step], bundle: &CoordinateBundle, pass: u64, run_state: &mut RunState) -> PassResult {
    let mut report = PassReport {
        pass,
        outcomes: Vec::with_capacity(steps.len()),
    };

    let mut idle_outputs: HashSet<String> = HashSet::new();

    for step in steps.iter_mut() {
        let coordinate = bundle.get(step.id()).copied();
        if coordinate.is_none() && step.chunk_size().is_some() {
            error!(step_id = %step.id(), pass, "chunked step has no coordinate; aborting run");
            report.outcomes.push(StepOutcome {
                step_id: step.id().to_string(),
                status: StepStatus::Failed,
                coordinate: None,
                message: Some("no coordinate scheduled for chunked step".to_string()),
            });
            return PassResult {
                report,
                error: Some(RunError::MissingCoordinate {
                    step_id: step.id().to_string(),
                    pass,
                }),
            };
        }

        let idle = match coordinate {
            Some(coordinate) => coordinate.is_skip(),
            None => reads_only_idle_outputs(step, &idle_outputs),
        };
        if idle {
            debug!(step_id = %step.id(), pass, "no fresh input for step this pass");
            idle_outputs.extend(step.output_names().map(str::to_string));
            report.outcomes.push(StepOutcome {
                step_id: step.id().to_string(),
                status: StepStatus::Skipped,
                coordinate,
                message: None,
            });
            continue;
        }

        let range = coordinate.as_ref().and_then(Coordinate::range);
        debug!(
            step_id = %step.id(),
            pass,
            start = range.map(|range| range.start),
            count = range.map(|range| range.count),
            "invoking step"
        );

        match step.invoke(run_state, range) {
            Ok(()) => report.outcomes.push(StepOutcome {
                step_id: step.id().to_string(),
                status: StepStatus::Succeeded,
                coordinate,
                message: None,
            }),
            Err(failure) => match step.error_policy() {
                ErrorPolicy::Ignore => {
                    warn!(step_id = %step.id(), pass, error = %failure, "ignoring step failure");
                    step.clear_outputs(run_state);
                    report.outcomes.push(StepOutcome {
                        step_id: step.id().to_string(),
                        status: StepStatus::Ignored,
                        coordinate,
                        message: Some(failure.to_string()),
                    });
                }
                ErrorPolicy::Raise => {
                    error!(step_id = %step.id(), pass, error = %failure, "step failed; aborting run");
                    report.outcomes.push(StepOutcome {
                        step_id: step.id().to_string(),
                        status: StepStatus::Failed,
                        coordinate,
                        message: Some(failure.to_string()),
                    });
                    return PassResult {
                        report,
                        error: Some(RunError::StepFailed {
                            step_id: step.id().to_string(),
                            pass,
                            error: failure,
                        }),
                    };
                }
            },
        }
    }

    PassResult { report, error: None }
}

/// True when `step` reads from run state and every such input was left stale this pass.
fn reads_only_idle_outputs(step: &Step, idle_outputs: &HashSet<String>) -> bool {
    let mut inputs = step.state_inputs().peekable();
    inputs.peek().is_some() && inputs.all(|input| idle_outputs.contains(input))
}
