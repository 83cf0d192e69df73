use chunkflow_types::{Coordinate, CoordinateBundle, CoordinateQueue};
use indexmap::IndexMap;

use super::{ChunkState, ChunkStrategy};
use crate::error::ConfigurationError;

/// Advances every chunk-enabled source by one chunk per pass.
///
/// Each pass assigns the next `chunk_size` rows to every unfinished source; a source that has
/// already covered its rows receives [`Coordinate::Skip`]. The number of passes is the largest
/// chunk count of any source.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobinStrategy;

impl ChunkStrategy for RoundRobinStrategy {
    fn plan(&self, states: &mut IndexMap<String, ChunkState>) -> Result<CoordinateQueue, ConfigurationError> {
        let mut queue = CoordinateQueue::new();

        while states.values().any(|state| !state.finished) {
            let mut bundle = CoordinateBundle::with_capacity(states.len());
            for (step_id, state) in states.iter_mut() {
                bundle.insert(step_id.clone(), next_chunk(state));
            }
            queue.push_back(bundle);
        }

        Ok(queue)
    }
}

fn next_chunk(state: &mut ChunkState) -> Coordinate {
    if state.finished {
        return Coordinate::Skip;
    }

    let start = state.ordinal.saturating_mul(state.chunk_size).min(state.total_rows);
    let stop = start.saturating_add(state.chunk_size).min(state.total_rows);
    state.ordinal += 1;
    if stop == state.total_rows {
        state.finished = true;
    }
    Coordinate::rows(start, stop - start)
}

#[cfg(test)]
mod tests {
    use chunkflow_types::RowRange;
    use indexmap::indexmap;

    use super::*;

    fn states(specs: &[(&str, u64, u64)]) -> IndexMap<String, ChunkState> {
        specs
            .iter()
            .map(|(step_id, total_rows, chunk_size)| (step_id.to_string(), ChunkState::new(*chunk_size, *total_rows)))
            .collect()
    }

    #[test]
    fn three_sources_finish_at_different_passes() {
        let mut states = states(&[("a", 7, 3), ("b", 4, 2), ("c", 5, 4)]);
        let queue = RoundRobinStrategy.plan(&mut states).expect("plan");
        let bundles: Vec<_> = queue.into_iter().collect();

        assert_eq!(
            bundles,
            vec![
                indexmap! {
                    "a".to_string() => Coordinate::rows(0, 3),
                    "b".to_string() => Coordinate::rows(0, 2),
                    "c".to_string() => Coordinate::rows(0, 4),
                },
                indexmap! {
                    "a".to_string() => Coordinate::rows(3, 3),
                    "b".to_string() => Coordinate::rows(2, 2),
                    "c".to_string() => Coordinate::rows(4, 1),
                },
                indexmap! {
                    "a".to_string() => Coordinate::rows(6, 1),
                    "b".to_string() => Coordinate::Skip,
                    "c".to_string() => Coordinate::Skip,
                },
            ]
        );
        assert!(states.values().all(|state| state.finished));
    }

    #[test]
    fn coverage_matches_row_counts() {
        let specs = [("a", 1000, 7), ("b", 13, 13), ("c", 1, 5), ("d", 64, 8)];
        let mut states = states(&specs);
        let queue = RoundRobinStrategy.plan(&mut states).expect("plan");

        assert_eq!(queue.len(), 143);
        for (step_id, total_rows, chunk_size) in specs {
            let ranges = queue.ranges_for(step_id);
            assert_eq!(ranges.len() as u64, total_rows.div_ceil(chunk_size), "chunk count for {step_id}");
            assert_eq!(ranges.iter().map(|range| range.count).sum::<u64>(), total_rows, "rows for {step_id}");
            assert!(ranges.windows(2).all(|pair| pair[0].end() == pair[1].start), "contiguous ranges for {step_id}");
        }
        assert!(queue.iter().all(|bundle| bundle.len() == specs.len()));
    }

    #[test]
    fn finished_source_only_receives_sentinels() {
        let mut states = states(&[("empty", 0, 3), ("full", 3, 2)]);
        let queue = RoundRobinStrategy.plan(&mut states).expect("plan");

        assert_eq!(queue.len(), 2);
        assert!(queue.iter().all(|bundle| bundle["empty"].is_skip()));
        assert_eq!(queue.ranges_for("full"), vec![RowRange::new(0, 2), RowRange::new(2, 1)]);
    }
}
