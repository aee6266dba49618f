//! Two-resource workload driver
//!
//! Spawns workers that repeatedly take a pair of monitored locks in the
//! order dictated by a [`Discipline`], hold both for a seeded random time,
//! and report progress. A watchdog runs alongside; if it alarms, the shared
//! token is cancelled and the run ends with its diagnosis. Workers that are
//! blocked inside an unbounded acquire cannot be interrupted and are left
//! behind as stuck.

pub mod config;
pub mod discipline;

pub use config::{HoldRange, RunConfig};
pub use discipline::Discipline;

use crate::core::cancel::CancellationToken;
use crate::core::diagnosis::Diagnosis;
use crate::core::error::LockError;
use crate::core::locks::{MonitoredLock, ResourceGuard};
use crate::core::logger::EventLogger;
use crate::core::registry::Registry;
use crate::core::types::ThreadId;
use crate::core::watchdog::Watchdog;
use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, select, unbounded};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every worker finished all its iterations.
    Completed,
    /// The watchdog declared a liveness alarm.
    Alarmed,
    /// Workers stopped early without an alarm.
    Stopped,
}

/// Summary of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub discipline: Discipline,
    pub resources: usize,
    pub workers: usize,
    pub iterations: usize,
    pub elapsed_ms: u64,
    /// Critical sections (both resources held, work done) completed
    pub completed_sections: u64,
    /// Sections per minute over the whole run
    pub throughput_per_min: f64,
    pub status: RunStatus,
    /// Workers still blocked when the run was abandoned
    pub stuck_workers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<Diagnosis>,
}

impl RunReport {
    pub fn attempted_sections(&self) -> u64 {
        (self.workers * self.iterations) as u64
    }
}

/// A configured set of monitored locks plus the registry they report to
pub struct Workload {
    registry: Arc<Registry>,
    locks: Arc<Vec<MonitoredLock>>,
    config: RunConfig,
}

impl Workload {
    /// Validate `config`, open the event log if one is configured, and
    /// register one monitored lock per resource.
    pub fn new(config: RunConfig) -> Result<Self> {
        config.validate().context("Invalid run configuration")?;
        let registry = match &config.log_path {
            Some(path) => Registry::with_logger(
                EventLogger::with_file(path).context("Failed to initialize event log")?,
            ),
            None => Registry::new(),
        };
        Ok(Self::with_registry(Arc::new(registry), config))
    }

    /// Use an existing registry (config is assumed valid)
    pub fn with_registry(registry: Arc<Registry>, config: RunConfig) -> Self {
        let locks = (0..config.resources)
            .map(|i| MonitoredLock::new(Arc::clone(&registry), format!("L{i}")))
            .collect();
        Workload {
            registry,
            locks: Arc::new(locks),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn locks(&self) -> &[MonitoredLock] {
        &self.locks
    }

    /// Run all workers under a watchdog until they finish or the alarm fires
    ///
    /// # Errors
    /// Fails if a thread cannot be spawned or a worker violates the lock
    /// protocol. An alarm is not an error: it is reported in the
    /// [`RunReport`].
    pub fn run(self) -> Result<RunReport> {
        let config = &self.config;
        let token = CancellationToken::new();
        let completed = Arc::new(AtomicU64::new(0));
        let (done_tx, done_rx) = unbounded::<(usize, Result<(), LockError>)>();

        let watchdog = Watchdog::new(Arc::clone(&self.registry), config.watchdog)
            .with_token(token.clone())
            .spawn()?;

        let started = Instant::now();
        let mut handles: Vec<Option<JoinHandle<()>>> = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let worker = Worker {
                index,
                registry: Arc::clone(&self.registry),
                locks: Arc::clone(&self.locks),
                config: config.clone(),
                token: token.clone(),
                completed: Arc::clone(&completed),
            };
            let done = done_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("worker-{index}"))
                .spawn(move || {
                    let result = worker.run();
                    let _ = done.send((index, result));
                })
                .with_context(|| format!("Failed to spawn worker-{index}"));
            match handle {
                Ok(handle) => handles.push(Some(handle)),
                Err(e) => {
                    token.cancel();
                    return Err(e);
                }
            }
        }
        drop(done_tx);

        let mut finished = vec![false; config.workers];
        let mut failure: Option<(usize, LockError)> = None;
        let mut record = |index: usize, result: Result<(), LockError>| {
            finished[index] = true;
            if let Err(e) = result {
                failure.get_or_insert((index, e));
                token.cancel();
            }
        };

        // Wait for every worker, or for the alarm.
        let mut pending = config.workers;
        let mut alarm_open = true;
        while pending > 0 {
            let event = if alarm_open {
                select! {
                    recv(done_rx) -> msg => Wake::Done(msg.ok()),
                    recv(watchdog.alarms()) -> msg => Wake::Alarm(msg.is_ok()),
                }
            } else {
                Wake::Done(done_rx.recv_timeout(grace_period(config)).ok())
            };
            match event {
                Wake::Done(Some((index, result))) => {
                    record(index, result);
                    pending -= 1;
                }
                Wake::Done(None) => break,
                Wake::Alarm(true) => break,
                Wake::Alarm(false) => alarm_open = false,
            }
        }

        // Give cancelled workers a chance to unwind.
        token.cancel();
        pending -= drain(&done_rx, pending, grace_period(config), &mut record);
        let elapsed = started.elapsed();

        let diagnosis = watchdog.shutdown();
        for (index, handle) in handles.iter_mut().enumerate() {
            if finished[index]
                && let Some(handle) = handle.take()
            {
                let _ = handle.join();
            }
        }

        if let Some(logger) = self.registry.logger() {
            logger.flush().context("Failed to flush event log")?;
        }

        if let Some((index, e)) = failure {
            return Err(anyhow!(e).context(format!("worker-{index} violated the lock protocol")));
        }

        let completed_sections = completed.load(Ordering::SeqCst);
        let attempted = (config.workers * config.iterations) as u64;
        let status = run_status(completed_sections, attempted, diagnosis.is_some());
        // An alarm raised after the last section finished describes an idle system.
        let diagnosis = diagnosis.filter(|_| status == RunStatus::Alarmed);
        let secs = elapsed.as_secs_f64();
        let throughput_per_min = if secs > 0.0 {
            completed_sections as f64 / secs * 60.0
        } else {
            0.0
        };

        Ok(RunReport {
            discipline: config.discipline,
            resources: config.resources,
            workers: config.workers,
            iterations: config.iterations,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            completed_sections,
            throughput_per_min,
            status,
            stuck_workers: pending,
            diagnosis,
        })
    }
}

/// Validate, build and run a workload in one call
pub fn run(config: RunConfig) -> Result<RunReport> {
    Workload::new(config)?.run()
}

/// Finishing every section wins over an alarm that arrived afterwards
fn run_status(completed: u64, attempted: u64, alarmed: bool) -> RunStatus {
    if completed == attempted {
        RunStatus::Completed
    } else if alarmed {
        RunStatus::Alarmed
    } else {
        RunStatus::Stopped
    }
}

enum Wake {
    Done(Option<(usize, Result<(), LockError>)>),
    Alarm(bool),
}

/// How long to wait for cancelled workers before declaring them stuck
fn grace_period(config: &RunConfig) -> Duration {
    let step = config
        .acquire_timeout
        .unwrap_or_default()
        .max(config.watchdog.check_interval);
    step * 2 + config.gap + Duration::from_millis(config.hold.max_ms)
}

/// Collect up to `pending` completions until `grace` runs out
fn drain<F>(
    done_rx: &Receiver<(usize, Result<(), LockError>)>,
    pending: usize,
    grace: Duration,
    record: &mut F,
) -> usize
where
    F: FnMut(usize, Result<(), LockError>),
{
    let deadline = Instant::now() + grace;
    let mut drained = 0;
    while drained < pending {
        match done_rx.recv_deadline(deadline) {
            Ok((index, result)) => {
                record(index, result);
                drained += 1;
            }
            Err(_) => break,
        }
    }
    drained
}

struct Worker {
    index: usize,
    registry: Arc<Registry>,
    locks: Arc<Vec<MonitoredLock>>,
    config: RunConfig,
    token: CancellationToken,
    completed: Arc<AtomicU64>,
}

impl Worker {
    fn run(self) -> Result<(), LockError> {
        let me = self
            .registry
            .register_thread(format!("worker-{}", self.index));
        let mut rng = StdRng::seed_from_u64(self.config.seed ^ self.index as u64);
        let hold = self.config.hold;

        for iteration in 0..self.config.iterations {
            if self.token.is_cancelled() {
                break;
            }
            let (first, second) =
                self.config
                    .discipline
                    .order(self.index, iteration, self.locks.len());

            let Some(_first) = self.acquire(&self.locks[first], me)? else {
                break;
            };
            if !self.config.gap.is_zero() && self.token.wait_timeout(self.config.gap) {
                break;
            }
            let Some(_second) = self.acquire(&self.locks[second], me)? else {
                break;
            };

            let work = Duration::from_millis(rng.random_range(hold.min_ms..=hold.max_ms));
            if !work.is_zero() && self.token.wait_timeout(work) {
                break;
            }
            self.registry.touch_progress(me)?;
            self.completed.fetch_add(1, Ordering::SeqCst);
        }

        self.registry.deregister_thread(me)
    }

    /// Take `lock`, retrying bounded waits until the token is cancelled
    ///
    /// Returns `Ok(None)` if the worker should unwind instead.
    fn acquire<'a>(
        &self,
        lock: &'a MonitoredLock,
        me: ThreadId,
    ) -> Result<Option<ResourceGuard<'a>>, LockError> {
        loop {
            match lock.lock(me, self.config.acquire_timeout) {
                Ok(guard) => return Ok(Some(guard)),
                Err(e) if e.is_timeout() => {
                    if self.token.is_cancelled() {
                        return Ok(None);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
