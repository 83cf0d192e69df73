use chunkflow_types::{Coordinate, CoordinateBundle, CoordinateQueue};
use indexmap::IndexMap;
use tracing::debug;

use super::{ChunkState, ChunkStrategy};
use crate::error::ConfigurationError;

/// Spreads every source evenly across the same number of passes.
///
/// The pass count is the product of every source's chunk count. Each source's rows are then
/// divided into that many near-equal ranges: the first `total_rows % passes` ranges carry one
/// extra row. A source with fewer rows than passes receives [`Coordinate::Skip`] once its rows
/// are used up.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalancedStrategy;

impl BalancedStrategy {
    /// Product of every source's chunk count, counting empty sources as one chunk.
    pub fn total_passes(states: &IndexMap<String, ChunkState>) -> Result<u64, ConfigurationError> {
        states
            .values()
            .try_fold(1u64, |passes, state| passes.checked_mul(state.chunks_needed().max(1)))
            .ok_or(ConfigurationError::PassCountOverflow { step_count: states.len() })
    }
}

impl ChunkStrategy for BalancedStrategy {
    fn plan(&self, states: &mut IndexMap<String, ChunkState>) -> Result<CoordinateQueue, ConfigurationError> {
        let total_passes = Self::total_passes(states)?;
        debug!(total_passes, chunked_steps = states.len(), "balanced pass count");

        if states.values().all(|state| state.finished) {
            return Ok(CoordinateQueue::new());
        }

        let mut queue = CoordinateQueue::new();
        for pass in 0..total_passes {
            let mut bundle = CoordinateBundle::with_capacity(states.len());
            for (step_id, state) in states.iter_mut() {
                bundle.insert(step_id.clone(), balanced_chunk(state, pass, total_passes));
            }
            queue.push_back(bundle);
        }

        Ok(queue)
    }
}

fn balanced_chunk(state: &mut ChunkState, pass: u64, total_passes: u64) -> Coordinate {
    if state.finished {
        return Coordinate::Skip;
    }

    let base = state.total_rows / total_passes;
    let remainder = state.total_rows % total_passes;
    let count = base + u64::from(pass < remainder);
    if count == 0 {
        state.finished = true;
        return Coordinate::Skip;
    }

    let start = pass * base + pass.min(remainder);
    state.ordinal += 1;
    if start + count == state.total_rows {
        state.finished = true;
    }
    Coordinate::rows(start, count)
}
