// Core types
pub mod types;
pub use types::*;

pub mod error;
pub use error::{LockError, ProtocolViolation};

// Event log
pub mod logger;
pub use logger::EventLogger;

// Shared thread/resource registry
pub mod registry;
pub use registry::{
    InvariantViolation, Registry, RegistrySnapshot, ResourceRecord, ThreadRecord,
};

// Monitored locks
pub mod locks;
pub use locks::{MonitoredLock, ResourceGuard};

// Wait-for graph and cycle detection
pub mod graph;

pub mod diagnosis;
pub use diagnosis::{Diagnosis, ResourceEntry, ThreadEntry, Verdict};

pub mod cancel;
pub use cancel::CancellationToken;

// Liveness watchdog
pub mod watchdog;
pub use watchdog::{Watchdog, WatchdogConfig, WatchdogHandle, WatchdogState};
