//! # Lockwatch
//!
//! Registry-backed deadlock diagnosis for lock-heavy thread workloads.
//!
//! Every [`MonitoredLock`] reports who holds it and who is waiting for it to
//! a shared [`Registry`]. A [`Watchdog`] samples the registry's progress
//! markers; when nothing moves for too long it builds a wait-for graph from a
//! snapshot, searches it for circular waits, and publishes a [`Diagnosis`].
//!
//! ## Features
//!
//! - Thread and resource registry with checkable invariants
//! - Monitored locks with blocking, bounded and non-blocking acquire
//! - Wait-for graph and iterative cycle detection
//! - Liveness watchdog with cooperative cancellation
//! - A two-discipline workload driver (`ordered` vs `unordered`)
//! - Optional JSON-lines event log
//!
//! ## Example
//!
//! ```rust
//! use lockwatch::{Discipline, RunConfig, RunStatus};
//! use std::time::Duration;
//!
//! let report = lockwatch::run(
//!     RunConfig::default()
//!         .discipline(Discipline::Ordered)
//!         .resources(2)
//!         .workers(2)
//!         .iterations(20)
//!         .hold(0, 1)
//!         .watchdog(Duration::from_secs(2), Duration::from_millis(50)),
//! )
//! .unwrap();
//! assert_eq!(report.status, RunStatus::Completed);
//! ```

mod core;
pub use crate::core::{
    CancellationToken, Diagnosis, EventLogger, Events, InvariantViolation, LockError,
    MonitoredLock, ProtocolViolation, Registry, RegistrySnapshot, ResourceEntry, ResourceGuard,
    ResourceId, ResourceRecord, ThreadEntry, ThreadId, ThreadRecord, Verdict, Watchdog,
    WatchdogConfig, WatchdogHandle, WatchdogState,
};

/// Wait-for graph construction and cycle search
pub mod graph {
    pub use crate::core::graph::{Cycle, WaitForGraph, canonical, find_cycles};
}

/// Watchdog decision logic, usable without spawning a thread
pub mod watchdog {
    pub use crate::core::watchdog::{Check, ProgressTracker};
}

pub mod report;

pub mod workload;
pub use workload::{Discipline, HoldRange, RunConfig, RunReport, RunStatus, Workload, run};
