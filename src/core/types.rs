use serde::{Deserialize, Serialize};
use std::fmt;

/// Thread identifier type
///
/// A sequence number handed out by [`Registry::register_thread`]. It is not a
/// native thread handle: a single OS thread may act under several identities,
/// which is how the unit tests drive the registry without spawning anything.
///
/// [`Registry::register_thread`]: crate::Registry::register_thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub u64);

/// Resource identifier type
///
/// Uniquely identifies a lockable resource. Assigned in registration order,
/// which is also the global order used by the ordered acquisition discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// Represents the type of registry event that occurred
///
/// These are the transitions recorded by the event log. One entry is written
/// per transition, so replaying a log reconstructs the owner/waiter history
/// that led up to an alarm.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Events {
    /// A thread registered itself
    ThreadRegistered,
    /// A thread deregistered on exit
    ThreadExited,
    /// A resource was registered
    ResourceRegistered,
    /// Thread started waiting for a resource
    Attempt,
    /// Thread acquired the resource
    Acquired,
    /// A bounded acquire gave up and was rolled back
    TimedOut,
    /// Thread released the resource
    Released,
    /// The watchdog raised its liveness alarm
    Alarm,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_serialize_as_plain_numbers() {
        let json = serde_json::to_string(&(ThreadId(3), ResourceId(7))).unwrap();
        assert_eq!(json, "[3,7]");
    }

    #[test]
    fn test_ids_order_by_sequence_number() {
        let mut ids = vec![ResourceId(4), ResourceId(1), ResourceId(3)];
        ids.sort();
        assert_eq!(ids, vec![ResourceId(1), ResourceId(3), ResourceId(4)]);
        assert_eq!(ThreadId(12).to_string(), "T12");
    }
}
