//! Circular-wait detection over a [`WaitForGraph`]
//!
//! Three-color depth-first search driven by an explicit stack, so adversarial
//! inputs cannot exhaust the native call stack. Roots are taken in ascending
//! id order, which makes the output deterministic for a given graph.

use crate::core::graph::WaitForGraph;
use crate::core::types::ThreadId;
use fxhash::FxHashMap;

/// A closed walk of thread ids: the first id is repeated at the end
pub type Cycle = Vec<ThreadId>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    /// On the active DFS path
    Gray,
    /// Fully explored
    Black,
}

struct Frame {
    node: ThreadId,
    successors: Vec<ThreadId>,
    next: usize,
}

/// Find circular waits in `graph`
///
/// Every back edge found by the search yields one cycle: the path from the
/// back edge's target to the current node, closed by repeating the target.
/// Each reported cycle is elementary and is a genuine deadlock certificate.
///
/// An empty result means no circular wait exists *in this graph*. It says
/// nothing about the moment after the snapshot was taken.
///
/// When every thread waits on at most one other thread, which is always the
/// case for graphs built from a registry snapshot, each elementary cycle is
/// reported exactly once. On general graphs a cycle is reported iff one
/// exists, but not every elementary cycle is enumerated.
pub fn find_cycles(graph: &WaitForGraph) -> Vec<Cycle> {
    let mut color: FxHashMap<ThreadId, Color> = FxHashMap::default();
    let mut cycles = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();

    for root in graph.nodes() {
        if color.contains_key(&root) {
            continue;
        }
        color.insert(root, Color::Gray);
        stack.push(Frame {
            node: root,
            successors: graph.successors(root),
            next: 0,
        });

        while let Some(frame) = stack.last_mut() {
            let Some(&next) = frame.successors.get(frame.next) else {
                color.insert(frame.node, Color::Black);
                stack.pop();
                continue;
            };
            frame.next += 1;

            match color.get(&next) {
                None => {
                    color.insert(next, Color::Gray);
                    stack.push(Frame {
                        node: next,
                        successors: graph.successors(next),
                        next: 0,
                    });
                }
                Some(Color::Gray) => {
                    if let Some(start) = stack.iter().position(|f| f.node == next) {
                        let mut cycle: Cycle = stack[start..].iter().map(|f| f.node).collect();
                        cycle.push(next);
                        cycles.push(cycle);
                    }
                }
                Some(Color::Black) => {}
            }
        }
    }

    cycles
}

/// Canonical form of a cycle for comparison: open (no repeated closing id)
/// and rotated so the smallest id comes first.
pub fn canonical(cycle: &[ThreadId]) -> Vec<ThreadId> {
    let open = match cycle {
        [first, .., last] if first == last => &cycle[..cycle.len() - 1],
        _ => cycle,
    };
    let Some(min_at) = open.iter().enumerate().min_by_key(|(_, t)| **t).map(|(i, _)| i) else {
        return Vec::new();
    };
    open[min_at..].iter().chain(&open[..min_at]).copied().collect()
}
