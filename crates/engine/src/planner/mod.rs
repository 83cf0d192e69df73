//! Chunk planning: turning chunk-enabled sources into a per-pass coordinate schedule.
//!
//! The [`ChunkPlanner`] is built once from the ordered step list. Construction validates the
//! pipeline shape, records a [`ChunkState`] for every source that declares a chunk size, and
//! asks the configured [`ChunkStrategy`] for the complete schedule. The schedule is never
//! recomputed mid-run; the executor drains it one bundle per pass.

mod balanced;
mod round_robin;

use std::collections::HashSet;

use chunkflow_types::{ChunkStrategyKind, Coordinate, CoordinateBundle, CoordinateQueue, WriteMode};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use balanced::BalancedStrategy;
pub use round_robin::RoundRobinStrategy;

use crate::checkpoint::ParameterIndex;
use crate::error::ConfigurationError;
use crate::run_state::RunState;
use crate::step::Step;

/// Scheduling progress of one chunk-enabled source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkState {
    pub chunk_size: u64,
    pub ordinal: u64,
    pub total_rows: u64,
    pub finished: bool,
}

impl ChunkState {
    /// Fresh state; a source without rows starts out finished.
    pub fn new(chunk_size: u64, total_rows: u64) -> Self {
        Self {
            chunk_size,
            ordinal: 0,
            total_rows,
            finished: total_rows == 0,
        }
    }

    /// Number of chunks needed to cover every row.
    pub fn chunks_needed(&self) -> u64 {
        if self.chunk_size == 0 {
            return 0;
        }
        self.total_rows.div_ceil(self.chunk_size)
    }
}

/// A way of turning chunk states into a full coordinate schedule.
pub trait ChunkStrategy {
    /// Computes every bundle up front, advancing `states` as coordinates are assigned.
    fn plan(&self, states: &mut IndexMap<String, ChunkState>) -> Result<CoordinateQueue, ConfigurationError>;
}

/// Returns the strategy implementation selected by `kind`.
pub fn strategy_for(kind: ChunkStrategyKind) -> Box<dyn ChunkStrategy> {
    match kind {
        ChunkStrategyKind::RoundRobin => Box::new(RoundRobinStrategy),
        ChunkStrategyKind::Balanced => Box::new(BalancedStrategy),
    }
}

/// Owns the coordinate schedule and the in-memory checkpoint slot for one run.
#[derive(Debug, Clone)]
pub struct ChunkPlanner {
    strategy: ChunkStrategyKind,
    initial_states: IndexMap<String, ChunkState>,
    states: IndexMap<String, ChunkState>,
    queue: CoordinateQueue,
    pending: bool,
    checkpoint: Option<(ParameterIndex, RunState)>,
}

impl ChunkPlanner {
    /// Validates `steps` and computes the complete schedule with the chosen strategy.
    pub fn new(steps: &[Step], strategy: ChunkStrategyKind) -> Result<Self, ConfigurationError> {
        let initial_states = collect_chunk_states(steps)?;
        let (queue, states) = schedule(strategy, &initial_states)?;

        info!(
            strategy = %strategy,
            chunked_steps = initial_states.len(),
            passes = queue.len(),
            "planned coordinate schedule"
        );

        Ok(Self::assemble(strategy, initial_states, states, queue))
    }

    /// Rebuilds a planner whose queue is the remainder recorded in `parameter_index`.
    ///
    /// The same configuration checks as [`ChunkPlanner::new`] run against `steps`; the stored
    /// queue, not a fresh schedule, determines which passes are left. Every stored bundle must
    /// cover exactly the chunk-enabled steps of `steps` with coordinates inside their rows.
    pub fn resume(steps: &[Step], strategy: ChunkStrategyKind, parameter_index: ParameterIndex) -> Result<Self, ConfigurationError> {
        let initial_states = collect_chunk_states(steps)?;
        let (_, states) = schedule(strategy, &initial_states)?;
        let queue = parameter_index.pending;
        for bundle in queue.iter() {
            check_bundle(&initial_states, bundle)?;
        }

        info!(
            strategy = %strategy,
            completed_passes = parameter_index.completed_passes,
            remaining_passes = queue.len(),
            "resuming coordinate schedule"
        );

        Ok(Self::assemble(strategy, initial_states, states, queue))
    }

    fn assemble(
        strategy: ChunkStrategyKind,
        initial_states: IndexMap<String, ChunkState>,
        states: IndexMap<String, ChunkState>,
        queue: CoordinateQueue,
    ) -> Self {
        let pending = !queue.is_empty();
        Self {
            strategy,
            initial_states,
            states,
            queue,
            pending,
            checkpoint: None,
        }
    }

    /// Recomputes the schedule from the chunk states captured at construction.
    pub fn replan(&self) -> Result<CoordinateQueue, ConfigurationError> {
        schedule(self.strategy, &self.initial_states).map(|(queue, _)| queue)
    }

    pub fn strategy(&self) -> ChunkStrategyKind {
        self.strategy
    }

    pub fn has_pending_work(&self) -> bool {
        self.pending
    }

    /// Appends a bundle after checking it against the chunk-enabled steps.
    pub fn enqueue(&mut self, bundle: CoordinateBundle) -> Result<(), ConfigurationError> {
        check_bundle(&self.initial_states, &bundle)?;
        self.queue.push_back(bundle);
        self.pending = true;
        Ok(())
    }

    /// Takes the next bundle and recomputes the pending flag.
    pub fn dequeue(&mut self) -> Option<CoordinateBundle> {
        let bundle = self.queue.pop_front();
        self.pending = !self.queue.is_empty();
        bundle
    }

    /// Bundles not yet handed to the executor.
    pub fn pending_queue(&self) -> &CoordinateQueue {
        &self.queue
    }

    /// Chunk states after scheduling; every state is finished once planning succeeds.
    pub fn chunk_states(&self) -> &IndexMap<String, ChunkState> {
        &self.states
    }

    /// Identifiers of the chunk-enabled steps, in declared order.
    pub fn chunked_steps(&self) -> impl Iterator<Item = &str> {
        self.initial_states.keys().map(String::as_str)
    }

    /// Stores a deep copy of the parameter index and run state in the checkpoint slot.
    pub fn save(&mut self, parameter_index: &ParameterIndex, run_state: &RunState) {
        debug!(completed_passes = parameter_index.completed_passes, "saving checkpoint in planner");
        self.checkpoint = Some((parameter_index.clone(), run_state.clone()));
    }

    /// Returns a deep copy of the last saved checkpoint.
    pub fn restore(&self) -> Option<(ParameterIndex, RunState)> {
        self.checkpoint.clone()
    }

    pub fn last_checkpoint(&self) -> Option<&ParameterIndex> {
        self.checkpoint.as_ref().map(|(parameter_index, _)| parameter_index)
    }
}

fn collect_chunk_states(steps: &[Step]) -> Result<IndexMap<String, ChunkState>, ConfigurationError> {
    let mut seen = HashSet::new();
    let mut states = IndexMap::new();

    for step in steps {
        if step.id().trim().is_empty() {
            return Err(ConfigurationError::EmptyIdentifier);
        }
        if !seen.insert(step.id()) {
            return Err(ConfigurationError::DuplicateStep {
                step_id: step.id().to_string(),
            });
        }

        let Some(chunk_size) = step.chunk_size() else {
            continue;
        };
        if chunk_size == 0 {
            return Err(ConfigurationError::ZeroChunkSize {
                step_id: step.id().to_string(),
            });
        }

        let total_rows = match step.max_row_count() {
            Some(Ok(total_rows)) => total_rows,
            Some(Err(error)) => {
                return Err(ConfigurationError::UnresolvedRowCount {
                    step_id: step.id().to_string(),
                    reason: format!("{error:#}"),
                });
            }
            None => {
                return Err(ConfigurationError::UnresolvedRowCount {
                    step_id: step.id().to_string(),
                    reason: "step is not a source".to_string(),
                });
            }
        };

        states.insert(step.id().to_string(), ChunkState::new(chunk_size, total_rows));
    }

    if !states.is_empty()
        && let Some((step, mode)) = steps
            .iter()
            .filter_map(|step| step.write_mode().map(|mode| (step, mode)))
            .find(|(_, mode)| *mode != WriteMode::Append)
    {
        return Err(ConfigurationError::SinkNotAppend {
            step_id: step.id().to_string(),
            mode,
        });
    }

    Ok(states)
}

fn check_bundle(states: &IndexMap<String, ChunkState>, bundle: &CoordinateBundle) -> Result<(), ConfigurationError> {
    if bundle.len() != states.len() || !states.keys().all(|step_id| bundle.contains_key(step_id)) {
        return Err(ConfigurationError::BundleMismatch {
            expected: states.keys().map(String::as_str).collect::<Vec<_>>().join(", "),
            found: bundle.keys().map(String::as_str).collect::<Vec<_>>().join(", "),
        });
    }

    for (step_id, coordinate) in bundle {
        let (Some(range), Some(state)) = (coordinate.range(), states.get(step_id)) else {
            continue;
        };
        if range.end() > state.total_rows {
            return Err(ConfigurationError::CoordinateOutOfRange {
                step_id: step_id.clone(),
                start: range.start,
                count: range.count,
                total_rows: state.total_rows,
            });
        }
    }
    Ok(())
}

fn schedule(
    strategy: ChunkStrategyKind,
    initial_states: &IndexMap<String, ChunkState>,
) -> Result<(CoordinateQueue, IndexMap<String, ChunkState>), ConfigurationError> {
    let mut states = initial_states.clone();

    if states.is_empty() {
        let mut queue = CoordinateQueue::new();
        queue.push_back(CoordinateBundle::new());
        return Ok((queue, states));
    }

    let mut queue = strategy_for(strategy).plan(&mut states)?;
    if queue.is_empty() {
        queue.push_back(states.keys().map(|step_id| (step_id.clone(), Coordinate::Skip)).collect());
    }
    Ok((queue, states))
}

#[cfg(test)]
mod tests {
    use chunkflow_types::{RowRange, Table};
    use serde_json::json;

    use super::*;
    use crate::memory::{MemorySink, MemorySource};

    fn source(id: &str, rows: u64, chunk_size: Option<u64>) -> Step {
        let mut table = Table::with_columns(["n"]);
        for n in 0..rows {
            table.push_row(vec![json!(n)]).expect("row");
        }
        let mut source = MemorySource::new(table);
        if let Some(chunk_size) = chunk_size {
            source = source.with_chunk_size(chunk_size);
        }
        Step::source(id, source).build().expect("source")
    }

    #[test]
    fn no_chunked_steps_yields_one_empty_pass() {
        let steps = vec![source("orders", 5, None)];
        let planner = ChunkPlanner::new(&steps, ChunkStrategyKind::RoundRobin).expect("planner");
        assert_eq!(planner.pending_queue().len(), 1);
        assert!(planner.pending_queue().front().expect("bundle").is_empty());
    }

    #[test]
    fn empty_chunked_source_yields_one_sentinel_pass() {
        let steps = vec![source("orders", 0, Some(3))];
        let planner = ChunkPlanner::new(&steps, ChunkStrategyKind::Balanced).expect("planner");
        assert_eq!(planner.pending_queue().len(), 1);
        assert_eq!(planner.pending_queue().front().expect("bundle")["orders"], Coordinate::Skip);
    }

    #[test]
    fn duplicate_identifiers_are_rejected() {
        let steps = vec![source("orders", 1, None), source("orders", 1, None)];
        let error = ChunkPlanner::new(&steps, ChunkStrategyKind::RoundRobin).expect_err("duplicate");
        assert_eq!(error, ConfigurationError::DuplicateStep { step_id: "orders".into() });
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let steps = vec![source("orders", 4, Some(0))];
        let error = ChunkPlanner::new(&steps, ChunkStrategyKind::RoundRobin).expect_err("zero");
        assert_eq!(error, ConfigurationError::ZeroChunkSize { step_id: "orders".into() });
    }

    #[test]
    fn non_append_sink_is_rejected_when_chunking() {
        let steps = vec![
            source("orders", 4, Some(2)),
            Step::sink("archive", "orders", MemorySink::new().with_mode(WriteMode::Overwrite))
                .build()
                .expect("sink"),
        ];
        let error = ChunkPlanner::new(&steps, ChunkStrategyKind::RoundRobin).expect_err("overwrite");
        assert_eq!(
            error,
            ConfigurationError::SinkNotAppend {
                step_id: "archive".into(),
                mode: WriteMode::Overwrite
            }
        );
    }

    #[test]
    fn non_append_sink_is_allowed_without_chunking() {
        let steps = vec![
            source("orders", 4, None),
            Step::sink("archive", "orders", MemorySink::new().with_mode(WriteMode::Overwrite))
                .build()
                .expect("sink"),
        ];
        assert!(ChunkPlanner::new(&steps, ChunkStrategyKind::RoundRobin).is_ok());
    }

    #[test]
    fn dequeue_recomputes_pending_flag() {
        let steps = vec![source("orders", 4, Some(2))];
        let mut planner = ChunkPlanner::new(&steps, ChunkStrategyKind::RoundRobin).expect("planner");

        assert!(planner.has_pending_work());
        planner.dequeue().expect("first");
        assert!(planner.has_pending_work());
        planner.dequeue().expect("second");
        assert!(!planner.has_pending_work());
        assert!(planner.dequeue().is_none());

        planner
            .enqueue(indexmap::indexmap! { "orders".to_string() => Coordinate::rows(0, 1) })
            .expect("enqueue");
        assert!(planner.has_pending_work());
    }

    #[test]
    fn enqueue_rejects_bundles_for_other_steps() {
        let steps = vec![source("orders", 4, Some(2))];
        let mut planner = ChunkPlanner::new(&steps, ChunkStrategyKind::RoundRobin).expect("planner");
        let queued = planner.pending_queue().len();

        let error = planner
            .enqueue(indexmap::indexmap! { "refunds".to_string() => Coordinate::rows(0, 2) })
            .expect_err("foreign step");
        assert_eq!(
            error,
            ConfigurationError::BundleMismatch {
                expected: "orders".into(),
                found: "refunds".into()
            }
        );

        let error = planner
            .enqueue(indexmap::indexmap! { "orders".to_string() => Coordinate::rows(3, 2) })
            .expect_err("past the end");
        assert!(matches!(error, ConfigurationError::CoordinateOutOfRange { total_rows: 4, .. }));
        assert_eq!(planner.pending_queue().len(), queued);
    }

    #[test]
    fn replan_is_idempotent() {
        let steps = vec![source("a", 7, Some(3)), source("b", 4, Some(2))];
        for strategy in [ChunkStrategyKind::RoundRobin, ChunkStrategyKind::Balanced] {
            let planner = ChunkPlanner::new(&steps, strategy).expect("planner");
            assert_eq!(&planner.replan().expect("replan"), planner.pending_queue());
            assert!(planner.chunk_states().values().all(|state| state.finished));
        }
    }

    #[test]
    fn restore_returns_unaliased_copy() {
        let steps = vec![source("orders", 4, Some(2))];
        let mut planner = ChunkPlanner::new(&steps, ChunkStrategyKind::RoundRobin).expect("planner");
        assert!(planner.restore().is_none());

        let parameter_index = ParameterIndex {
            completed_passes: 1,
            pending: planner.pending_queue().clone(),
        };
        let mut run_state = RunState::new();
        run_state.insert_variable("total", json!(1));
        planner.save(&parameter_index, &run_state);
        run_state.insert_variable("total", json!(2));

        let (restored_index, mut restored_state) = planner.restore().expect("checkpoint");
        assert_eq!(restored_index, parameter_index);
        assert_eq!(restored_state.variable("total"), Some(&json!(1)));

        restored_state.insert_variable("total", json!(3));
        let (_, again) = planner.restore().expect("checkpoint");
        assert_eq!(again.variable("total"), Some(&json!(1)));
    }

    #[test]
    fn resume_uses_recorded_queue() {
        let steps = vec![source("orders", 6, Some(2))];
        let planner = ChunkPlanner::new(&steps, ChunkStrategyKind::RoundRobin).expect("planner");
        let mut remaining = planner.pending_queue().clone();
        remaining.pop_front();

        let resumed = ChunkPlanner::resume(
            &steps,
            ChunkStrategyKind::RoundRobin,
            ParameterIndex {
                completed_passes: 1,
                pending: remaining,
            },
        )
        .expect("resume");

        assert_eq!(resumed.pending_queue().len(), 2);
        assert_eq!(resumed.pending_queue().ranges_for("orders"), vec![RowRange::new(2, 2), RowRange::new(4, 2)]);
        assert!(resumed.restore().is_none());
    }

    #[test]
    fn resume_rejects_queue_recorded_for_other_steps() {
        let recorded = vec![source("orders_v1", 10, Some(2))];
        let planner = ChunkPlanner::new(&recorded, ChunkStrategyKind::RoundRobin).expect("planner");
        let mut remaining = planner.pending_queue().clone();
        remaining.pop_front();

        let steps = vec![source("orders", 10, Some(2))];
        let error = ChunkPlanner::resume(
            &steps,
            ChunkStrategyKind::RoundRobin,
            ParameterIndex {
                completed_passes: 1,
                pending: remaining,
            },
        )
        .expect_err("renamed source");
        assert_eq!(
            error,
            ConfigurationError::BundleMismatch {
                expected: "orders".into(),
                found: "orders_v1".into()
            }
        );
    }

    #[test]
    fn resume_rejects_queue_for_shrunken_source() {
        let planner = ChunkPlanner::new(&[source("orders", 10, Some(4))], ChunkStrategyKind::RoundRobin).expect("planner");
        let remaining = planner.pending_queue().clone();

        let error = ChunkPlanner::resume(
            &[source("orders", 6, Some(4))],
            ChunkStrategyKind::RoundRobin,
            ParameterIndex {
                completed_passes: 0,
                pending: remaining,
            },
        )
        .expect_err("fewer rows than recorded");
        assert_eq!(
            error,
            ConfigurationError::CoordinateOutOfRange {
                step_id: "orders".into(),
                start: 4,
                count: 4,
                total_rows: 6
            }
        );
    }
}
