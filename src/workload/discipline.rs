use serde::{Deserialize, Serialize};
use std::fmt;

/// Order in which a worker requests its two resources
///
/// The registry records whatever order callers use; it never enforces one.
/// The two variants exist to show both outcomes against the same core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Discipline {
    /// Always lowest resource index first. Circular wait cannot form.
    Ordered,
    /// Order depends on the worker and iteration parity. Two workers sharing
    /// a pair of resources end up requesting them in opposite orders.
    #[value(alias = "deadlock")]
    Unordered,
}

impl Discipline {
    /// Indices of the first and second resource for `worker` on `iteration`
    ///
    /// Each worker uses its neighbour pair `(worker % n, (worker + 1) % n)`.
    /// `resources` must be at least 2.
    pub fn order(self, worker: usize, iteration: usize, resources: usize) -> (usize, usize) {
        let left = worker % resources;
        let right = (worker + 1) % resources;
        match self {
            Discipline::Ordered => (left.min(right), left.max(right)),
            Discipline::Unordered if iteration % 2 == 0 => (left, right),
            Discipline::Unordered => (right, left),
        }
    }
}

impl fmt::Display for Discipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discipline::Ordered => f.write_str("ordered"),
            Discipline::Unordered => f.write_str("unordered"),
        }
    }
}
