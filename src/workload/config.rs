use crate::core::watchdog::WatchdogConfig;
use crate::workload::discipline::Discipline;
use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Inclusive range of simulated work, in milliseconds, spent holding both resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl HoldRange {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        HoldRange { min_ms, max_ms }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.min_ms <= self.max_ms,
            "hold range minimum ({}) exceeds maximum ({})",
            self.min_ms,
            self.max_ms
        );
        Ok(())
    }
}

impl FromStr for HoldRange {
    type Err = anyhow::Error;

    /// Parse `"MIN,MAX"` (or a single `"N"`). A maximum below the minimum is
    /// raised to the minimum.
    fn from_str(s: &str) -> Result<Self> {
        let (min, max) = s.split_once(',').unwrap_or((s, s));
        let min: u64 = min
            .trim()
            .parse()
            .with_context(|| format!("invalid hold minimum in {s:?}"))?;
        let max: u64 = max
            .trim()
            .parse()
            .with_context(|| format!("invalid hold maximum in {s:?}"))?;
        Ok(HoldRange::new(min, max.max(min)))
    }
}

/// Configuration for one workload run
///
/// Built with chained setters starting from [`RunConfig::default`], then
/// checked by [`RunConfig::validate`] before anything is spawned.
///
/// # Example
///
/// ```rust
/// use lockwatch::{Discipline, RunConfig};
/// use std::time::Duration;
///
/// let config = RunConfig::default()
///     .discipline(Discipline::Ordered)
///     .resources(2)
///     .workers(2)
///     .iterations(10)
///     .hold(0, 0)
///     .watchdog(Duration::from_secs(2), Duration::from_millis(50));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub discipline: Discipline,
    /// Number of monitored locks (at least 2)
    pub resources: usize,
    /// Number of worker threads (at least 2)
    pub workers: usize,
    /// Critical sections each worker attempts (at least 1)
    pub iterations: usize,
    pub hold: HoldRange,
    /// Pause between taking the first and the second resource
    pub gap: Duration,
    /// Bound on each individual acquire; `None` blocks indefinitely
    pub acquire_timeout: Option<Duration>,
    pub watchdog: WatchdogConfig,
    /// Base seed; worker `i` uses `seed ^ i`
    pub seed: u64,
    /// Event log destination, if any
    pub log_path: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            discipline: Discipline::Unordered,
            resources: 4,
            workers: 4,
            iterations: 100,
            hold: HoldRange::new(10, 30),
            gap: Duration::ZERO,
            acquire_timeout: None,
            watchdog: WatchdogConfig::default(),
            seed: 0xA11CE,
            log_path: None,
        }
    }
}

impl RunConfig {
    pub fn discipline(mut self, discipline: Discipline) -> Self {
        self.discipline = discipline;
        self
    }

    pub fn resources(mut self, resources: usize) -> Self {
        self.resources = resources;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn hold(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.hold = HoldRange::new(min_ms, max_ms);
        self
    }

    pub fn gap(mut self, gap: Duration) -> Self {
        self.gap = gap;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn watchdog(mut self, timeout: Duration, check_interval: Duration) -> Self {
        self.watchdog = WatchdogConfig {
            timeout,
            check_interval,
        };
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Record registry events to `path`. "{timestamp}" in the name is expanded.
    pub fn with_log<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.log_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Check every field against its documented bounds
    ///
    /// # Errors
    /// Names the first offending field.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.resources >= 2,
            "resources must be at least 2 (got {})",
            self.resources
        );
        ensure!(
            self.workers >= 2,
            "workers must be at least 2 (got {})",
            self.workers
        );
        ensure!(
            self.iterations >= 1,
            "iterations must be at least 1 (got {})",
            self.iterations
        );
        self.hold.validate()?;
        self.watchdog.validate()?;
        if let Some(timeout) = self.acquire_timeout {
            ensure!(!timeout.is_zero(), "acquire timeout must be > 0");
        }
        Ok(())
    }
}
