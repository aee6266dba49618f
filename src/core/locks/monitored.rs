use crate::core::error::LockError;
use crate::core::registry::Registry;
use crate::core::types::{ResourceId, ThreadId};
use parking_lot::RawMutex;
use parking_lot::lock_api::{RawMutex as _, RawMutexTimed as _};
use std::sync::Arc;
use std::time::Duration;

/// A raw mutex bound 1:1 to one registered resource
///
/// Every acquire and release is mirrored into the shared [`Registry`]: the
/// wait is recorded before the thread blocks on the primitive and cleared
/// after it returns, so the watchdog can always see who is stuck behind whom.
/// The registry guard is never held while blocking on the primitive.
///
/// Thread identities are passed explicitly rather than read from the OS
/// thread, so one OS thread may drive several identities in tests.
///
/// # Example
///
/// ```rust
/// use lockwatch::{MonitoredLock, Registry};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let registry = Arc::new(Registry::new());
/// let lock = MonitoredLock::new(Arc::clone(&registry), "L0");
/// let a = registry.register_thread("a");
/// let b = registry.register_thread("b");
///
/// assert!(lock.acquire(a, None).unwrap());
/// // Non-blocking attempt by another identity fails and leaves no trace
/// assert!(!lock.acquire(b, Some(Duration::ZERO)).unwrap());
/// lock.release(a).unwrap();
/// ```
pub struct MonitoredLock {
    /// Resource record this primitive is bound to
    id: ResourceId,
    name: String,
    /// The wrapped primitive
    raw: RawMutex,
    registry: Arc<Registry>,
}

/// Releases the lock it was obtained from when dropped
pub struct ResourceGuard<'a> {
    lock: &'a MonitoredLock,
    thread: ThreadId,
}

impl MonitoredLock {
    /// Register a new resource called `name` and bind a fresh primitive to it
    pub fn new(registry: Arc<Registry>, name: impl Into<String>) -> Self {
        let name = name.into();
        let id = registry.register_resource(name.clone());
        MonitoredLock {
            id,
            name,
            raw: RawMutex::INIT,
            registry,
        }
    }

    /// Get the resource ID of this lock
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the underlying primitive is currently held by anyone
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// Acquire the lock on behalf of `thread`
    ///
    /// With `timeout` of `None` this blocks until the primitive is obtained.
    /// `Some(Duration::ZERO)` makes a single non-blocking attempt; any other
    /// value bounds the wait.
    ///
    /// # Returns
    /// `Ok(true)` if the lock was acquired, `Ok(false)` if the timeout expired.
    /// After a timeout the registry holds exactly what it held before the call.
    ///
    /// # Errors
    /// A `ProtocolViolation` if `thread` is unknown, is already waiting on
    /// another resource, or already holds this one. Nothing is recorded in
    /// that case.
    pub fn acquire(&self, thread: ThreadId, timeout: Option<Duration>) -> Result<bool, LockError> {
        self.registry.mark_waiting(thread, self.id)?;

        let acquired = match timeout {
            None => {
                self.raw.lock();
                true
            }
            Some(timeout) if timeout.is_zero() => self.raw.try_lock(),
            Some(timeout) => self.raw.try_lock_for(timeout),
        };

        if let Err(e) = self.registry.finish_acquire(thread, self.id, acquired) {
            if acquired {
                // SAFETY: the primitive was obtained just above and ownership
                // was never recorded, so nobody else can unlock it.
                unsafe { self.raw.unlock() };
            }
            // Drop the wait this call recorded.
            let _ = self.registry.clear_waiting(thread);
            return Err(e);
        }
        Ok(acquired)
    }

    /// Release the lock held by `thread`
    ///
    /// # Errors
    /// `NotOwner` if `thread` does not currently hold this lock. The primitive
    /// is left untouched in that case.
    pub fn release(&self, thread: ThreadId) -> Result<(), LockError> {
        self.registry.clear_held(thread, self.id)?;
        // SAFETY: the registry only records an owner after `acquire` obtained
        // the primitive, and the record was cleared exactly once above.
        unsafe { self.raw.unlock() };
        Ok(())
    }

    /// Acquire and return a guard that releases on drop
    ///
    /// # Errors
    /// `AcquireTimeout` if a bounded wait expired, otherwise as [`acquire`].
    ///
    /// [`acquire`]: MonitoredLock::acquire
    pub fn lock(
        &self,
        thread: ThreadId,
        timeout: Option<Duration>,
    ) -> Result<ResourceGuard<'_>, LockError> {
        if self.acquire(thread, timeout)? {
            Ok(ResourceGuard { lock: self, thread })
        } else {
            Err(LockError::AcquireTimeout {
                thread,
                resource: self.id,
                timeout: timeout.unwrap_or_default(),
            })
        }
    }
}

impl ResourceGuard<'_> {
    pub fn resource(&self) -> ResourceId {
        self.lock.id
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }
}

impl Drop for ResourceGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release(self.thread) {
            eprintln!(
                "Warning: guard for {} ({}) could not release: {e}",
                self.lock.name(),
                self.lock.id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ProtocolViolation;

    fn setup() -> (Arc<Registry>, MonitoredLock, ThreadId, ThreadId) {
        let registry = Arc::new(Registry::new());
        let lock = MonitoredLock::new(Arc::clone(&registry), "L0");
        let a = registry.register_thread("a");
        let b = registry.register_thread("b");
        (registry, lock, a, b)
    }

    #[test]
    fn test_acquire_records_owner_and_held() {
        let (registry, lock, a, _) = setup();
        assert!(lock.acquire(a, None).unwrap());
        let snap = registry.snapshot();
        assert_eq!(snap.resource(lock.id()).unwrap().owner, Some(a));
        assert!(snap.thread(a).unwrap().held.contains(&lock.id()));
        assert!(snap.thread(a).unwrap().waiting_for.is_none());
        assert!(lock.is_locked());

        lock.release(a).unwrap();
        assert!(!lock.is_locked());
        assert!(registry.check_invariants().is_empty());
    }

    #[test]
    fn test_zero_timeout_on_held_lock_leaves_no_residue() {
        let (registry, lock, a, b) = setup();
        assert!(lock.acquire(a, None).unwrap());
        let before = registry.snapshot();

        assert!(!lock.acquire(b, Some(Duration::ZERO)).unwrap());

        let after = registry.snapshot();
        let r_before = before.resource(lock.id()).unwrap();
        let r_after = after.resource(lock.id()).unwrap();
        assert_eq!(r_before.waiters, r_after.waiters);
        assert_eq!(r_after.owner, Some(a));
        assert_eq!(
            before.thread(b).unwrap().waiting_for,
            after.thread(b).unwrap().waiting_for
        );
        assert!(after.thread(b).unwrap().held.is_empty());
        lock.release(a).unwrap();
    }

    #[test]
    fn test_bounded_timeout_expires() {
        let (_registry, lock, a, b) = setup();
        assert!(lock.acquire(a, None).unwrap());
        let err = lock.lock(b, Some(Duration::from_millis(10))).err().unwrap();
        assert!(err.is_timeout());
        lock.release(a).unwrap();
        let guard = lock.lock(b, Some(Duration::from_millis(10))).unwrap();
        assert_eq!(guard.thread(), b);
    }

    #[test]
    fn test_release_by_other_thread_is_rejected() {
        let (_registry, lock, a, b) = setup();
        assert!(lock.acquire(a, None).unwrap());
        let err = lock.release(b).unwrap_err();
        assert!(matches!(
            err,
            LockError::ProtocolViolation(ProtocolViolation::NotOwner { .. })
        ));
        // Still held by a
        assert!(lock.is_locked());
        lock.release(a).unwrap();
    }

    #[test]
    fn test_reentrant_acquire_is_rejected_without_blocking() {
        let (registry, lock, a, _) = setup();
        assert!(lock.acquire(a, None).unwrap());
        let err = lock.acquire(a, None).unwrap_err();
        assert_eq!(
            err,
            LockError::ProtocolViolation(ProtocolViolation::Reentrant {
                thread: a,
                resource: lock.id(),
            })
        );
        assert!(registry.check_invariants().is_empty());
        lock.release(a).unwrap();
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let (registry, lock, a, b) = setup();
        {
            let _guard = lock.lock(a, None).unwrap();
            assert!(!lock.acquire(b, Some(Duration::ZERO)).unwrap());
        }
        assert!(registry.snapshot().resource(lock.id()).unwrap().owner.is_none());
        assert!(lock.acquire(b, Some(Duration::ZERO)).unwrap());
        lock.release(b).unwrap();
    }
}
