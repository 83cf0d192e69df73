//! Row-range coordinates and the per-pass schedule built from them.

use std::collections::VecDeque;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A contiguous range of rows within a source, `count` rows beginning at `start`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RowRange {
    pub start: u64,
    pub count: u64,
}

impl RowRange {
    pub fn new(start: u64, count: u64) -> Self {
        Self { start, count }
    }

    /// Exclusive end of the range.
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.count)
    }
}

impl fmt::Display for RowRange {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "({}, {})", self.start, self.count)
    }
}

/// Work assigned to one chunk-enabled step for one pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Coordinate {
    /// Read and process the given row range.
    Rows(RowRange),
    /// No work for this step during this pass.
    Skip,
}

impl Coordinate {
    pub fn rows(start: u64, count: u64) -> Self {
        Coordinate::Rows(RowRange::new(start, count))
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Coordinate::Skip)
    }

    pub fn range(&self) -> Option<RowRange> {
        match self {
            Coordinate::Rows(range) => Some(*range),
            Coordinate::Skip => None,
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coordinate::Rows(range) => range.fmt(formatter),
            Coordinate::Skip => formatter.write_str("(none, none)"),
        }
    }
}

/// One coordinate per chunk-enabled step, keyed by step identifier in declared order.
pub type CoordinateBundle = IndexMap<String, Coordinate>;

/// FIFO schedule of coordinate bundles, one bundle per pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoordinateQueue {
    bundles: VecDeque<CoordinateBundle>,
}

impl CoordinateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, bundle: CoordinateBundle) {
        self.bundles.push_back(bundle);
    }

    pub fn pop_front(&mut self) -> Option<CoordinateBundle> {
        self.bundles.pop_front()
    }

    pub fn front(&self) -> Option<&CoordinateBundle> {
        self.bundles.front()
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CoordinateBundle> {
        self.bundles.iter()
    }

    /// Every real (non-skip) range scheduled for `step_id`, in pass order.
    pub fn ranges_for(&self, step_id: &str) -> Vec<RowRange> {
        self.bundles
            .iter()
            .filter_map(|bundle| bundle.get(step_id).and_then(Coordinate::range))
            .collect()
    }
}

impl FromIterator<CoordinateBundle> for CoordinateQueue {
    fn from_iter<T: IntoIterator<Item = CoordinateBundle>>(iter: T) -> Self {
        Self {
            bundles: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for CoordinateQueue {
    type Item = CoordinateBundle;
    type IntoIter = std::collections::vec_deque::IntoIter<CoordinateBundle>;

    fn into_iter(self) -> Self::IntoIter {
        self.bundles.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::indexmap;

    #[test]
    fn queue_drains_in_fifo_order() {
        let mut queue = CoordinateQueue::new();
        queue.push_back(indexmap! { "a".to_string() => Coordinate::rows(0, 2) });
        queue.push_back(indexmap! { "a".to_string() => Coordinate::Skip });

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_front().expect("first")["a"], Coordinate::rows(0, 2));
        assert_eq!(queue.pop_front().expect("second")["a"], Coordinate::Skip);
        assert!(queue.is_empty());
    }

    #[test]
    fn ranges_for_ignores_skips() {
        let queue: CoordinateQueue = vec![
            indexmap! { "a".to_string() => Coordinate::rows(0, 3) },
            indexmap! { "a".to_string() => Coordinate::Skip },
            indexmap! { "a".to_string() => Coordinate::rows(3, 1) },
        ]
        .into_iter()
        .collect();

        assert_eq!(queue.ranges_for("a"), vec![RowRange::new(0, 3), RowRange::new(3, 1)]);
        assert!(queue.ranges_for("missing").is_empty());
    }

    #[test]
    fn coordinate_display_marks_sentinel() {
        assert_eq!(Coordinate::rows(4, 1).to_string(), "(4, 1)");
        assert_eq!(Coordinate::Skip.to_string(), "(none, none)");
    }

    #[test]
    fn queue_round_trips_through_json() {
        let queue: CoordinateQueue = vec![indexmap! {
            "a".to_string() => Coordinate::rows(0, 3),
            "b".to_string() => Coordinate::Skip,
        }]
        .into_iter()
        .collect();

        let encoded = serde_json::to_string(&queue).expect("encode");
        let decoded: CoordinateQueue = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, queue);
    }
}
