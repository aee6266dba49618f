//! Shared thread and resource registry
//!
//! One store holds both tables and a single `parking_lot::Mutex` protects all
//! of it. Every mutation is O(1) and never blocks while the guard is held, so
//! a snapshot can always be taken promptly and always observes a state made
//! of whole updates.

use crate::core::error::{LockError, ProtocolViolation};
use crate::core::logger::EventLogger;
use crate::core::types::{Events, ResourceId, ThreadId};
use fxhash::{FxHashMap, FxHashSet};
use parking_lot::Mutex;
use std::time::Instant;

/// Per-thread bookkeeping
#[derive(Debug, Clone)]
pub struct ThreadRecord {
    pub id: ThreadId,
    /// Human label, not identity-bearing
    pub name: String,
    /// Resources currently owned by this thread
    pub held: FxHashSet<ResourceId>,
    /// Resource this thread is blocked on, if any
    pub waiting_for: Option<ResourceId>,
    /// Last explicit progress marker
    pub last_progress: Instant,
}

/// Per-resource bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub id: ResourceId,
    pub name: String,
    /// Thread holding the primitive, if any
    pub owner: Option<ThreadId>,
    /// Threads blocked trying to acquire this resource
    pub waiters: FxHashSet<ThreadId>,
}

/// A broken registry invariant, as found by [`RegistrySnapshot::check_invariants`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// More than one thread lists the resource as held.
    SharedHold {
        resource: ResourceId,
        holders: Vec<ThreadId>,
    },
    /// Thread waits for the resource but is missing from its waiter set.
    OrphanWait {
        thread: ThreadId,
        resource: ResourceId,
    },
    /// Thread is in the waiter set but is not waiting for that resource.
    OrphanWaiter {
        thread: ThreadId,
        resource: ResourceId,
    },
    /// The owner also appears among the waiters.
    OwnerWaiting {
        thread: ThreadId,
        resource: ResourceId,
    },
    /// Held set and owner field disagree.
    HoldMismatch {
        thread: ThreadId,
        resource: ResourceId,
    },
}

/// Owned copy of both tables, taken under one guard acquisition
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    /// Thread records sorted by id
    pub threads: Vec<ThreadRecord>,
    /// Resource records sorted by id
    pub resources: Vec<ResourceRecord>,
    /// When the copy was made
    pub taken_at: Instant,
}

impl RegistrySnapshot {
    pub fn thread(&self, id: ThreadId) -> Option<&ThreadRecord> {
        self.threads
            .binary_search_by_key(&id, |t| t.id)
            .ok()
            .map(|i| &self.threads[i])
    }

    pub fn resource(&self, id: ResourceId) -> Option<&ResourceRecord> {
        self.resources
            .binary_search_by_key(&id, |r| r.id)
            .ok()
            .map(|i| &self.resources[i])
    }

    /// Cross-check owners, held sets and wait entries in this snapshot
    ///
    /// Returns every violation found; an empty vector means the snapshot is
    /// consistent.
    pub fn check_invariants(&self) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();

        let mut holders: FxHashMap<ResourceId, Vec<ThreadId>> = FxHashMap::default();
        for thread in &self.threads {
            for &resource in &thread.held {
                holders.entry(resource).or_default().push(thread.id);
            }
            if let Some(resource) = thread.waiting_for {
                let listed = self
                    .resource(resource)
                    .is_some_and(|r| r.waiters.contains(&thread.id));
                if !listed {
                    violations.push(InvariantViolation::OrphanWait {
                        thread: thread.id,
                        resource,
                    });
                }
            }
        }

        for resource in &self.resources {
            let mut held_by = holders.remove(&resource.id).unwrap_or_default();
            held_by.sort();

            if held_by.len() > 1 {
                violations.push(InvariantViolation::SharedHold {
                    resource: resource.id,
                    holders: held_by.clone(),
                });
            }

            let owner_as_held: Vec<ThreadId> = resource.owner.into_iter().collect();
            if held_by != owner_as_held {
                let thread = resource.owner.or(held_by.first().copied());
                if let Some(thread) = thread {
                    violations.push(InvariantViolation::HoldMismatch {
                        thread,
                        resource: resource.id,
                    });
                }
            }

            let mut waiters: Vec<ThreadId> = resource.waiters.iter().copied().collect();
            waiters.sort();
            for thread in waiters {
                if Some(thread) == resource.owner {
                    violations.push(InvariantViolation::OwnerWaiting {
                        thread,
                        resource: resource.id,
                    });
                }
                let waiting = self
                    .thread(thread)
                    .is_some_and(|t| t.waiting_for == Some(resource.id));
                if !waiting {
                    violations.push(InvariantViolation::OrphanWaiter {
                        thread,
                        resource: resource.id,
                    });
                }
            }
        }

        violations
    }
}

#[derive(Default)]
struct RegistryState {
    threads: FxHashMap<ThreadId, ThreadRecord>,
    resources: FxHashMap<ResourceId, ResourceRecord>,
    next_thread: u64,
    next_resource: u64,
}

impl RegistryState {
    fn thread_mut(&mut self, id: ThreadId) -> Result<&mut ThreadRecord, ProtocolViolation> {
        self.threads
            .get_mut(&id)
            .ok_or(ProtocolViolation::UnknownThread(id))
    }

    fn resource_mut(&mut self, id: ResourceId) -> Result<&mut ResourceRecord, ProtocolViolation> {
        self.resources
            .get_mut(&id)
            .ok_or(ProtocolViolation::UnknownResource(id))
    }

    fn mark_waiting(
        &mut self,
        thread: ThreadId,
        resource: ResourceId,
    ) -> Result<(), ProtocolViolation> {
        if !self.resources.contains_key(&resource) {
            return Err(ProtocolViolation::UnknownResource(resource));
        }
        let record = self.thread_mut(thread)?;
        if let Some(waiting_for) = record.waiting_for {
            return Err(ProtocolViolation::AlreadyWaiting {
                thread,
                waiting_for,
                requested: resource,
            });
        }
        if record.held.contains(&resource) {
            return Err(ProtocolViolation::Reentrant { thread, resource });
        }
        record.waiting_for = Some(resource);
        self.resource_mut(resource)?.waiters.insert(thread);
        Ok(())
    }

    fn clear_waiting(&mut self, thread: ThreadId) -> Result<Option<ResourceId>, ProtocolViolation> {
        let waiting_for = self.thread_mut(thread)?.waiting_for.take();
        if let Some(resource) = waiting_for
            && let Some(record) = self.resources.get_mut(&resource)
        {
            record.waiters.remove(&thread);
        }
        Ok(waiting_for)
    }

    /// Fails unless `thread` is registered and `resource` has no owner
    fn check_unowned(
        &self,
        thread: ThreadId,
        resource: ResourceId,
    ) -> Result<(), ProtocolViolation> {
        if !self.threads.contains_key(&thread) {
            return Err(ProtocolViolation::UnknownThread(thread));
        }
        let record = self
            .resources
            .get(&resource)
            .ok_or(ProtocolViolation::UnknownResource(resource))?;
        match record.owner {
            Some(owner) if owner != thread => {
                Err(ProtocolViolation::AlreadyOwned { resource, owner })
            }
            Some(_) => Err(ProtocolViolation::Reentrant { thread, resource }),
            None => Ok(()),
        }
    }

    fn mark_held(
        &mut self,
        thread: ThreadId,
        resource: ResourceId,
    ) -> Result<(), ProtocolViolation> {
        self.check_unowned(thread, resource)?;
        let record = self.resource_mut(resource)?;
        if record.waiters.contains(&thread) {
            // An owner cannot also be queued on the same resource.
            return Err(ProtocolViolation::AlreadyWaiting {
                thread,
                waiting_for: resource,
                requested: resource,
            });
        }
        record.owner = Some(thread);
        self.thread_mut(thread)?.held.insert(resource);
        Ok(())
    }

    fn clear_held(
        &mut self,
        thread: ThreadId,
        resource: ResourceId,
    ) -> Result<(), ProtocolViolation> {
        if !self.threads.contains_key(&thread) {
            return Err(ProtocolViolation::UnknownThread(thread));
        }
        let record = self.resource_mut(resource)?;
        if record.owner != Some(thread) {
            return Err(ProtocolViolation::NotOwner {
                thread,
                resource,
                owner: record.owner,
            });
        }
        record.owner = None;
        self.thread_mut(thread)?.held.remove(&resource);
        Ok(())
    }
}

/// The shared registry handle
///
/// Wrap it in an `Arc` and pass it explicitly to every monitored lock,
/// worker and watchdog that needs it.
///
/// # Example
///
/// ```rust
/// use lockwatch::Registry;
///
/// let registry = Registry::new();
/// let t = registry.register_thread("worker-0");
/// let r = registry.register_resource("L0");
///
/// registry.mark_waiting(t, r).unwrap();
/// registry.clear_waiting(t).unwrap();
/// registry.mark_held(t, r).unwrap();
/// assert_eq!(registry.snapshot().resource(r).unwrap().owner, Some(t));
/// ```
pub struct Registry {
    state: Mutex<RegistryState>,
    logger: Option<EventLogger>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create an empty registry without an event log
    pub fn new() -> Self {
        Registry {
            state: Mutex::new(RegistryState::default()),
            logger: None,
        }
    }

    /// Create an empty registry that records every transition to `logger`
    pub fn with_logger(logger: EventLogger) -> Self {
        Registry {
            state: Mutex::new(RegistryState::default()),
            logger: Some(logger),
        }
    }

    /// The attached event log, if any
    pub fn logger(&self) -> Option<&EventLogger> {
        self.logger.as_ref()
    }

    fn log(&self, event: Events, thread: Option<ThreadId>, resource: Option<ResourceId>) {
        if let Some(logger) = &self.logger {
            logger.log_event(event, thread, resource);
        }
    }

    /// Register the calling thread under a fresh identity
    ///
    /// The new record holds nothing, waits for nothing, and counts as having
    /// made progress right now. It is visible to the watchdog immediately.
    pub fn register_thread(&self, name: impl Into<String>) -> ThreadId {
        let name = name.into();
        let id = {
            let mut state = self.state.lock();
            state.next_thread += 1;
            let id = ThreadId(state.next_thread);
            state.threads.insert(
                id,
                ThreadRecord {
                    id,
                    name: name.clone(),
                    held: FxHashSet::default(),
                    waiting_for: None,
                    last_progress: Instant::now(),
                },
            );
            id
        };
        if let Some(logger) = &self.logger {
            logger.log_registration(Events::ThreadRegistered, Some(id), None, &name);
        }
        id
    }

    /// Remove a thread's record on exit
    ///
    /// # Errors
    /// `UnknownThread` if not registered; `ExitWhileBusy` if the thread still
    /// holds or waits for any resource.
    pub fn deregister_thread(&self, thread: ThreadId) -> Result<(), LockError> {
        {
            let mut state = self.state.lock();
            let record = state.thread_mut(thread)?;
            if !record.held.is_empty() || record.waiting_for.is_some() {
                return Err(ProtocolViolation::ExitWhileBusy { thread }.into());
            }
            state.threads.remove(&thread);
        }
        self.log(Events::ThreadExited, Some(thread), None);
        Ok(())
    }

    /// Register a lockable resource
    pub fn register_resource(&self, name: impl Into<String>) -> ResourceId {
        let name = name.into();
        let id = {
            let mut state = self.state.lock();
            state.next_resource += 1;
            let id = ResourceId(state.next_resource);
            state.resources.insert(
                id,
                ResourceRecord {
                    id,
                    name: name.clone(),
                    owner: None,
                    waiters: FxHashSet::default(),
                },
            );
            id
        };
        if let Some(logger) = &self.logger {
            logger.log_registration(Events::ResourceRegistered, None, Some(id), &name);
        }
        id
    }

    /// Record that `thread` is about to block on `resource`
    pub fn mark_waiting(&self, thread: ThreadId, resource: ResourceId) -> Result<(), LockError> {
        self.state.lock().mark_waiting(thread, resource)?;
        self.log(Events::Attempt, Some(thread), Some(resource));
        Ok(())
    }

    /// Clear the thread's wait target, returning what it was waiting for
    pub fn clear_waiting(&self, thread: ThreadId) -> Result<Option<ResourceId>, LockError> {
        Ok(self.state.lock().clear_waiting(thread)?)
    }

    /// Record `thread` as the owner of `resource`
    pub fn mark_held(&self, thread: ThreadId, resource: ResourceId) -> Result<(), LockError> {
        self.state.lock().mark_held(thread, resource)?;
        self.log(Events::Acquired, Some(thread), Some(resource));
        Ok(())
    }

    /// Drop `thread`'s ownership of `resource`
    ///
    /// # Errors
    /// `NotOwner` if `thread` is not the current owner.
    pub fn clear_held(&self, thread: ThreadId, resource: ResourceId) -> Result<(), LockError> {
        self.state.lock().clear_held(thread, resource)?;
        self.log(Events::Released, Some(thread), Some(resource));
        Ok(())
    }

    /// Record that `thread` completed a unit of work
    pub fn touch_progress(&self, thread: ThreadId) -> Result<(), LockError> {
        self.state.lock().thread_mut(thread)?.last_progress = Instant::now();
        Ok(())
    }

    /// Close out an acquire attempt in one guarded step
    ///
    /// Removes the wait entry and, if the primitive was obtained, records
    /// ownership. Used by [`MonitoredLock`] so that no snapshot ever sees the
    /// thread neither waiting nor owning after a successful acquire.
    ///
    /// [`MonitoredLock`]: crate::MonitoredLock
    pub(crate) fn finish_acquire(
        &self,
        thread: ThreadId,
        resource: ResourceId,
        acquired: bool,
    ) -> Result<(), LockError> {
        {
            let mut state = self.state.lock();
            // Validate first so a rejected call changes nothing.
            if acquired {
                state.check_unowned(thread, resource)?;
            }
            state.clear_waiting(thread)?;
            if acquired {
                state.mark_held(thread, resource)?;
            }
        }
        let event = if acquired {
            Events::Acquired
        } else {
            Events::TimedOut
        };
        self.log(event, Some(thread), Some(resource));
        Ok(())
    }

    /// Most recent progress marker across all registered threads
    pub fn latest_progress(&self) -> Option<Instant> {
        self.state
            .lock()
            .threads
            .values()
            .map(|t| t.last_progress)
            .max()
    }

    /// Copy out both tables under a single guard acquisition
    pub fn snapshot(&self) -> RegistrySnapshot {
        let (mut threads, mut resources) = {
            let state = self.state.lock();
            (
                state.threads.values().cloned().collect::<Vec<_>>(),
                state.resources.values().cloned().collect::<Vec<_>>(),
            )
        };
        threads.sort_by_key(|t| t.id);
        resources.sort_by_key(|r| r.id);
        RegistrySnapshot {
            threads,
            resources,
            taken_at: Instant::now(),
        }
    }

    /// Shorthand for `snapshot().check_invariants()`
    pub fn check_invariants(&self) -> Vec<InvariantViolation> {
        self.snapshot().check_invariants()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_assigns_sequential_ids() {
        let registry = Registry::new();
        let a = registry.register_thread("a");
        let b = registry.register_thread("b");
        let r = registry.register_resource("L0");
        assert_eq!(a, ThreadId(1));
        assert_eq!(b, ThreadId(2));
        assert_eq!(r, ResourceId(1));

        let snap = registry.snapshot();
        let rec = snap.thread(a).unwrap();
        assert_eq!(rec.name, "a");
        assert!(rec.held.is_empty());
        assert!(rec.waiting_for.is_none());
        assert!(snap.resource(r).unwrap().owner.is_none());
    }

    #[test]
    fn test_wait_then_hold_keeps_invariants() {
        let registry = Registry::new();
        let t = registry.register_thread("t");
        let r = registry.register_resource("r");

        registry.mark_waiting(t, r).unwrap();
        let snap = registry.snapshot();
        assert!(snap.resource(r).unwrap().waiters.contains(&t));
        assert_eq!(snap.thread(t).unwrap().waiting_for, Some(r));
        assert!(snap.check_invariants().is_empty());

        assert_eq!(registry.clear_waiting(t).unwrap(), Some(r));
        registry.mark_held(t, r).unwrap();
        assert!(registry.check_invariants().is_empty());

        registry.clear_held(t, r).unwrap();
        let snap = registry.snapshot();
        assert!(snap.resource(r).unwrap().owner.is_none());
        assert!(snap.thread(t).unwrap().held.is_empty());
    }

    #[test]
    fn test_unknown_ids_are_violations() {
        let registry = Registry::new();
        let t = registry.register_thread("t");
        let err = registry.mark_waiting(t, ResourceId(99)).unwrap_err();
        assert_eq!(
            err,
            LockError::ProtocolViolation(ProtocolViolation::UnknownResource(ResourceId(99)))
        );
        let err = registry.touch_progress(ThreadId(42)).unwrap_err();
        assert_eq!(
            err,
            LockError::ProtocolViolation(ProtocolViolation::UnknownThread(ThreadId(42)))
        );
    }

    #[test]
    fn test_second_wait_is_rejected() {
        let registry = Registry::new();
        let t = registry.register_thread("t");
        let r1 = registry.register_resource("r1");
        let r2 = registry.register_resource("r2");
        registry.mark_waiting(t, r1).unwrap();
        assert!(matches!(
            registry.mark_waiting(t, r2),
            Err(LockError::ProtocolViolation(ProtocolViolation::AlreadyWaiting { .. }))
        ));
        // Rejected call left no trace on r2.
        assert!(registry.snapshot().resource(r2).unwrap().waiters.is_empty());
    }

    #[test]
    fn test_release_by_non_owner_is_rejected() {
        let registry = Registry::new();
        let a = registry.register_thread("a");
        let b = registry.register_thread("b");
        let r = registry.register_resource("r");
        registry.mark_held(a, r).unwrap();
        let err = registry.clear_held(b, r).unwrap_err();
        assert_eq!(
            err,
            LockError::ProtocolViolation(ProtocolViolation::NotOwner {
                thread: b,
                resource: r,
                owner: Some(a),
            })
        );
        assert!(matches!(
            registry.mark_held(b, r),
            Err(LockError::ProtocolViolation(ProtocolViolation::AlreadyOwned { .. }))
        ));
    }

    #[test]
    fn test_deregister_requires_idle_thread() {
        let registry = Registry::new();
        let t = registry.register_thread("t");
        let r = registry.register_resource("r");
        registry.mark_held(t, r).unwrap();
        assert!(matches!(
            registry.deregister_thread(t),
            Err(LockError::ProtocolViolation(ProtocolViolation::ExitWhileBusy { .. }))
        ));
        registry.clear_held(t, r).unwrap();
        registry.deregister_thread(t).unwrap();
        assert!(registry.snapshot().thread(t).is_none());
    }

    #[test]
    fn test_latest_progress_tracks_touches() {
        let registry = Registry::new();
        assert!(registry.latest_progress().is_none());
        let t = registry.register_thread("t");
        let before = registry.latest_progress().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        registry.touch_progress(t).unwrap();
        assert!(registry.latest_progress().unwrap() > before);
    }

    #[test]
    fn test_rejected_finish_leaves_wait_in_place() {
        let registry = Registry::new();
        let owner = registry.register_thread("owner");
        let t = registry.register_thread("t");
        let r = registry.register_resource("r");
        registry.mark_held(owner, r).unwrap();
        registry.mark_waiting(t, r).unwrap();
        let before = registry.snapshot();

        let err = registry.finish_acquire(t, r, true).unwrap_err();
        assert_eq!(
            err,
            LockError::ProtocolViolation(ProtocolViolation::AlreadyOwned { resource: r, owner })
        );

        let after = registry.snapshot();
        assert_eq!(after.thread(t).unwrap().waiting_for, Some(r));
        assert_eq!(after.resource(r), before.resource(r));
        assert!(after.check_invariants().is_empty());

        // A timed-out finish still clears the wait.
        registry.finish_acquire(t, r, false).unwrap();
        assert!(registry.snapshot().thread(t).unwrap().waiting_for.is_none());
    }

    #[test]
    fn test_check_invariants_reports_orphans() {
        let registry = Registry::new();
        let t = registry.register_thread("t");
        let r = registry.register_resource("r");
        let mut snap = registry.snapshot();
        snap.threads[0].waiting_for = Some(r);
        assert_eq!(
            snap.check_invariants(),
            vec![InvariantViolation::OrphanWait { thread: t, resource: r }]
        );

        let mut snap = registry.snapshot();
        snap.resources[0].owner = Some(t);
        assert_eq!(
            snap.check_invariants(),
            vec![InvariantViolation::HoldMismatch { thread: t, resource: r }]
        );
    }
}
