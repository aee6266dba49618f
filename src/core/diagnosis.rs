use crate::core::graph::{Cycle, WaitForGraph, find_cycles};
use crate::core::registry::RegistrySnapshot;
use crate::core::types::{ResourceId, ThreadId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of the cycle search at alarm time
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// At least one circular wait was found; each cycle is a deadlock certificate.
    Deadlock,
    /// Nothing circular in this snapshot. The quiet period may be starvation
    /// or a slow patch, or a cycle may have formed after the snapshot.
    NoCycleFound,
}

/// One row of the resource table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceEntry {
    pub id: ResourceId,
    pub name: String,
    pub owner: Option<ThreadId>,
    /// Sorted by id
    pub waiters: Vec<ThreadId>,
}

/// One row of the thread table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThreadEntry {
    pub id: ThreadId,
    pub name: String,
    /// Sorted by id
    pub held: Vec<ResourceId>,
    pub waiting_for: Option<ResourceId>,
    /// Milliseconds since this thread last reported progress
    pub idle_ms: u64,
}

/// Structured result of a liveness alarm
///
/// This is the whole externally observable payload of the watchdog. Turning
/// it into text is up to the consumer (see [`crate::report`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Diagnosis {
    pub resources: Vec<ResourceEntry>,
    pub threads: Vec<ThreadEntry>,
    /// Closed cycles (first id repeated at the end)
    pub cycles: Vec<Cycle>,
    pub verdict: Verdict,
    /// How long the system had gone without progress when the alarm fired
    pub quiet_for_ms: u64,
    /// RFC 3339 wall-clock time of the alarm
    pub timestamp: String,
}

impl Diagnosis {
    /// Build the wait-for graph for `snapshot`, search it, and tabulate
    pub fn from_snapshot(snapshot: &RegistrySnapshot, quiet_for: Duration) -> Self {
        let graph = WaitForGraph::from_snapshot(snapshot);
        let cycles = find_cycles(&graph);
        let verdict = if cycles.is_empty() {
            Verdict::NoCycleFound
        } else {
            Verdict::Deadlock
        };

        let resources = snapshot
            .resources
            .iter()
            .map(|r| {
                let mut waiters: Vec<ThreadId> = r.waiters.iter().copied().collect();
                waiters.sort();
                ResourceEntry {
                    id: r.id,
                    name: r.name.clone(),
                    owner: r.owner,
                    waiters,
                }
            })
            .collect();

        let threads = snapshot
            .threads
            .iter()
            .map(|t| {
                let mut held: Vec<ResourceId> = t.held.iter().copied().collect();
                held.sort();
                ThreadEntry {
                    id: t.id,
                    name: t.name.clone(),
                    held,
                    waiting_for: t.waiting_for,
                    idle_ms: millis(snapshot.taken_at.saturating_duration_since(t.last_progress)),
                }
            })
            .collect();

        Diagnosis {
            resources,
            threads,
            cycles,
            verdict,
            quiet_for_ms: millis(quiet_for),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn has_deadlock(&self) -> bool {
        self.verdict == Verdict::Deadlock
    }

    pub fn thread(&self, id: ThreadId) -> Option<&ThreadEntry> {
        self.threads.iter().find(|t| t.id == id)
    }

    pub fn resource(&self, id: ResourceId) -> Option<&ResourceEntry> {
        self.resources.iter().find(|r| r.id == id)
    }

    /// Display name for a thread id, falling back to the id itself
    pub fn thread_label(&self, id: ThreadId) -> String {
        match self.thread(id) {
            Some(t) => format!("{}({})", t.name, id),
            None => id.to_string(),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::Registry;

    #[test]
    fn test_two_thread_deadlock_diagnosis() {
        let registry = Registry::new();
        let a = registry.register_thread("worker-0");
        let b = registry.register_thread("worker-1");
        let r1 = registry.register_resource("L0");
        let r2 = registry.register_resource("L1");
        registry.mark_held(a, r1).unwrap();
        registry.mark_held(b, r2).unwrap();
        registry.mark_waiting(a, r2).unwrap();
        registry.mark_waiting(b, r1).unwrap();

        let diag = Diagnosis::from_snapshot(&registry.snapshot(), Duration::from_secs(2));
        assert!(diag.has_deadlock());
        assert_eq!(diag.cycles, vec![vec![a, b, a]]);
        assert_eq!(diag.quiet_for_ms, 2000);
        assert_eq!(diag.resource(r1).unwrap().owner, Some(a));
        assert_eq!(diag.resource(r1).unwrap().waiters, vec![b]);
        assert_eq!(diag.thread(b).unwrap().held, vec![r2]);
        assert_eq!(diag.thread(b).unwrap().waiting_for, Some(r1));
        assert_eq!(diag.thread_label(a), "worker-0(T1)");
    }

    #[test]
    fn test_quiet_registry_reports_no_cycle() {
        let registry = Registry::new();
        let a = registry.register_thread("a");
        let r = registry.register_resource("r");
        registry.mark_held(a, r).unwrap();

        let diag = Diagnosis::from_snapshot(&registry.snapshot(), Duration::ZERO);
        assert_eq!(diag.verdict, Verdict::NoCycleFound);
        assert!(diag.cycles.is_empty());

        let json = serde_json::to_string(&diag).unwrap();
        assert!(json.contains("\"verdict\":\"no_cycle_found\""));
        let back: Diagnosis = serde_json::from_str(&json).unwrap();
        assert_eq!(back, diag);
    }
}
