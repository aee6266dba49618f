use crate::core::types::{ResourceId, ThreadId};
use std::time::Duration;
use thiserror::Error;

/// Misuse of the lock protocol by a caller
///
/// These indicate a bug in the calling code rather than a runtime condition.
/// They are reported before any registry state is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// The thread id was never registered, or has already exited.
    #[error("thread {0} is not registered")]
    UnknownThread(ThreadId),

    /// The resource id was never registered.
    #[error("resource {0} is not registered")]
    UnknownResource(ResourceId),

    /// Release by a thread that does not own the resource.
    #[error("thread {thread} released {resource} but the owner is {owner:?}")]
    NotOwner {
        thread: ThreadId,
        resource: ResourceId,
        owner: Option<ThreadId>,
    },

    /// A second acquire while the thread is still blocked on the first.
    #[error("thread {thread} requested {requested} while already waiting for {waiting_for}")]
    AlreadyWaiting {
        thread: ThreadId,
        waiting_for: ResourceId,
        requested: ResourceId,
    },

    /// The primitive is not reentrant; this would block the thread on itself.
    #[error("thread {thread} already holds {resource}")]
    Reentrant {
        thread: ThreadId,
        resource: ResourceId,
    },

    /// Ownership recorded for a resource that already has an owner.
    #[error("{resource} is already owned by {owner}")]
    AlreadyOwned {
        resource: ResourceId,
        owner: ThreadId,
    },

    /// A thread tried to exit while holding or waiting for resources.
    #[error("thread {thread} exited while holding or waiting for resources")]
    ExitWhileBusy { thread: ThreadId },
}

/// Error type for monitored lock operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Programmer error; never retried.
    #[error("lock protocol violation: {0}")]
    ProtocolViolation(#[from] ProtocolViolation),

    /// A bounded acquire did not succeed in time. Registry state was rolled back.
    #[error("thread {thread} timed out after {timeout:?} waiting for {resource}")]
    AcquireTimeout {
        thread: ThreadId,
        resource: ResourceId,
        timeout: Duration,
    },
}

impl LockError {
    /// Whether the caller may retry the operation.
    pub fn is_timeout(&self) -> bool {
        matches!(self, LockError::AcquireTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_messages_name_the_parties() {
        let err = LockError::from(ProtocolViolation::NotOwner {
            thread: ThreadId(2),
            resource: ResourceId(1),
            owner: Some(ThreadId(1)),
        });
        let msg = err.to_string();
        assert!(msg.contains("T2"));
        assert!(msg.contains("R1"));
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_timeout_is_recoverable() {
        let err = LockError::AcquireTimeout {
            thread: ThreadId(1),
            resource: ResourceId(1),
            timeout: Duration::from_millis(5),
        };
        assert!(err.is_timeout());
    }
}
