//! Wait-for graph built from a registry snapshot
//!
//! Nodes are threads; an edge `A -> B` means thread A is blocked on a
//! resource that thread B currently owns. The graph is never maintained
//! incrementally: it is rebuilt from a fresh [`RegistrySnapshot`] every time
//! a diagnosis needs it.
//!
//! Both directions are stored:
//! 1. *Forward* (`edges`): `A -> {B}`, walked by the cycle detector.
//! 2. *Reverse* (`incoming_edges`): `B -> {A}`, answers "who is stuck behind
//!    B" for the diagnosis without scanning every thread.

use crate::core::registry::RegistrySnapshot;
use crate::core::types::ThreadId;
use fxhash::{FxHashMap, FxHashSet};

/// Represents a directed graph of thread wait relationships
#[derive(Debug, Clone, Default)]
pub struct WaitForGraph {
    /// Maps a thread to all the threads it is waiting for (outgoing edges).
    edges: FxHashMap<ThreadId, FxHashSet<ThreadId>>,
    /// Maps a thread to all threads that are waiting for it (incoming edges).
    incoming_edges: FxHashMap<ThreadId, FxHashSet<ThreadId>>,
}

impl WaitForGraph {
    /// Create a new empty wait-for graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the graph from one consistent snapshot
    ///
    /// For every thread with a wait target, look up that resource's owner;
    /// if there is one and it is not the waiting thread itself, add
    /// `waiter -> owner`. Threads that are not waiting contribute nothing.
    pub fn from_snapshot(snapshot: &RegistrySnapshot) -> Self {
        let mut graph = Self::new();
        for thread in &snapshot.threads {
            let Some(resource) = thread.waiting_for else {
                continue;
            };
            if let Some(owner) = snapshot.resource(resource).and_then(|r| r.owner) {
                graph.add_edge(thread.id, owner);
            }
        }
        graph
    }

    /// Build a graph from an explicit edge list
    pub fn from_edges<I>(edges: I) -> Self
    where
        I: IntoIterator<Item = (ThreadId, ThreadId)>,
    {
        let mut graph = Self::new();
        for (from, to) in edges {
            graph.add_edge(from, to);
        }
        graph
    }

    /// Add a directed edge: `from` thread waits for `to` thread
    ///
    /// Self-loops are dropped: a thread is never reported as waiting on
    /// itself. Returns whether a new edge was inserted.
    pub fn add_edge(&mut self, from: ThreadId, to: ThreadId) -> bool {
        if from == to {
            return false;
        }
        if !self.edges.entry(from).or_default().insert(to) {
            return false;
        }
        self.incoming_edges.entry(to).or_default().insert(from);
        true
    }

    pub fn contains_edge(&self, from: ThreadId, to: ThreadId) -> bool {
        self.edges.get(&from).is_some_and(|t| t.contains(&to))
    }

    /// Threads with at least one incident edge, in ascending id order
    pub fn nodes(&self) -> Vec<ThreadId> {
        let mut nodes: Vec<ThreadId> = self
            .edges
            .keys()
            .chain(self.incoming_edges.keys())
            .copied()
            .collect::<FxHashSet<_>>()
            .into_iter()
            .collect();
        nodes.sort();
        nodes
    }

    /// Threads that `thread` waits for, in ascending id order
    pub fn successors(&self, thread: ThreadId) -> Vec<ThreadId> {
        sorted(self.edges.get(&thread))
    }

    /// Threads waiting for `thread`, in ascending id order
    pub fn waiting_on(&self, thread: ThreadId) -> Vec<ThreadId> {
        sorted(self.incoming_edges.get(&thread))
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(FxHashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// All edges, sorted
    pub fn edges(&self) -> Vec<(ThreadId, ThreadId)> {
        let mut edges: Vec<_> = self
            .edges
            .iter()
            .flat_map(|(&from, targets)| targets.iter().map(move |&to| (from, to)))
            .collect();
        edges.sort();
        edges
    }
}

fn sorted(set: Option<&FxHashSet<ThreadId>>) -> Vec<ThreadId> {
    let mut out: Vec<ThreadId> = set.map(|s| s.iter().copied().collect()).unwrap_or_default();
    out.sort();
    out
}
