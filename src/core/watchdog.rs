//! Liveness watchdog
//!
//! The watchdog never takes part in locking. It periodically reads the most
//! recent progress marker in the registry; once nothing has advanced for the
//! configured timeout it takes one snapshot, searches the wait-for graph for
//! circular waits, cancels the shared token so workers can unwind, and
//! publishes a [`Diagnosis`]. That transition happens at most once per run.

use crate::core::cancel::CancellationToken;
use crate::core::diagnosis::Diagnosis;
use crate::core::registry::Registry;
use anyhow::{Context, Result, ensure};
use crossbeam_channel::{Receiver, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Timing parameters for the watchdog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogConfig {
    /// How long the system may go without progress before alarming
    pub timeout: Duration,
    /// How often progress is sampled
    pub check_interval: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        WatchdogConfig {
            timeout: Duration::from_secs(2),
            check_interval: Duration::from_millis(200),
        }
    }
}

impl WatchdogConfig {
    /// Create a validated config
    pub fn new(timeout: Duration, check_interval: Duration) -> Result<Self> {
        let config = WatchdogConfig {
            timeout,
            check_interval,
        };
        config.validate()?;
        Ok(config)
    }

    /// Both values must be positive and the interval shorter than the timeout
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.timeout.is_zero(), "watchdog timeout must be > 0");
        ensure!(
            !self.check_interval.is_zero(),
            "watchdog check interval must be > 0"
        );
        ensure!(
            self.check_interval < self.timeout,
            "watchdog check interval ({:?}) must be smaller than the timeout ({:?})",
            self.check_interval,
            self.timeout
        );
        Ok(())
    }
}

/// Watchdog state. `Alarmed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    Monitoring,
    Alarmed,
}

/// Result of one progress check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    /// The latest progress marker moved forward since the previous check.
    Progressed,
    /// No movement yet, but still within the timeout.
    Quiet { quiet_for: Duration },
    /// The timeout elapsed with no movement. Returned exactly once.
    Alarm { quiet_for: Duration },
    /// Already alarmed; further checks are ignored.
    Alarmed,
}

/// The watchdog's decision logic, separated from threads and clocks
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    timeout: Duration,
    last_seen: Option<Instant>,
    quiet_since: Instant,
    state: WatchdogState,
}

impl ProgressTracker {
    /// Start monitoring at `started`
    pub fn new(timeout: Duration, started: Instant) -> Self {
        ProgressTracker {
            timeout,
            last_seen: None,
            quiet_since: started,
            state: WatchdogState::Monitoring,
        }
    }

    pub fn state(&self) -> WatchdogState {
        self.state
    }

    /// Feed the latest progress marker observed at `now`
    pub fn observe(&mut self, latest: Option<Instant>, now: Instant) -> Check {
        if self.state == WatchdogState::Alarmed {
            return Check::Alarmed;
        }

        if let Some(latest) = latest
            && self.last_seen.is_none_or(|seen| latest > seen)
        {
            self.last_seen = Some(latest);
            self.quiet_since = self.quiet_since.max(latest);
            return Check::Progressed;
        }

        let quiet_for = now.saturating_duration_since(self.quiet_since);
        if quiet_for >= self.timeout {
            self.state = WatchdogState::Alarmed;
            Check::Alarm { quiet_for }
        } else {
            Check::Quiet { quiet_for }
        }
    }
}

/// Builder for the background watchdog thread
pub struct Watchdog {
    registry: Arc<Registry>,
    config: WatchdogConfig,
    token: CancellationToken,
    callback: Option<Box<dyn Fn(&Diagnosis) + Send + 'static>>,
}

impl Watchdog {
    /// Create a watchdog over `registry` with its own cancellation token
    pub fn new(registry: Arc<Registry>, config: WatchdogConfig) -> Self {
        Watchdog {
            registry,
            config,
            token: CancellationToken::new(),
            callback: None,
        }
    }

    /// Share `token` with the workers instead of using a private one
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Set a callback to be invoked with the diagnosis when the alarm fires
    ///
    /// The callback runs on the watchdog thread after the token is cancelled
    /// and before the diagnosis is published on [`WatchdogHandle::alarms`].
    pub fn on_alarm<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Diagnosis) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Start monitoring on a dedicated thread
    ///
    /// # Errors
    /// Returns an error if the config is invalid or the thread cannot be spawned.
    pub fn spawn(self) -> Result<WatchdogHandle> {
        self.config.validate()?;

        let (tx, rx) = bounded::<Diagnosis>(1);
        let alarmed = Arc::new(AtomicBool::new(false));
        let token = self.token.clone();
        let flag = Arc::clone(&alarmed);

        let thread = thread::Builder::new()
            .name("lockwatch-watchdog".into())
            .spawn(move || {
                let Watchdog {
                    registry,
                    config,
                    token,
                    callback,
                } = self;
                let mut tracker = ProgressTracker::new(config.timeout, Instant::now());

                loop {
                    if token.wait_timeout(config.check_interval) {
                        return None;
                    }
                    let check = tracker.observe(registry.latest_progress(), Instant::now());
                    let Check::Alarm { quiet_for } = check else {
                        continue;
                    };

                    let diagnosis = Diagnosis::from_snapshot(&registry.snapshot(), quiet_for);
                    flag.store(true, Ordering::SeqCst);
                    // Anyone who receives the diagnosis must already see the stop request.
                    token.cancel();

                    if let Some(logger) = registry.logger() {
                        logger.log_alarm(&diagnosis);
                        if let Err(e) = logger.flush() {
                            eprintln!("Warning: Failed to flush event log after alarm: {e:?}");
                        }
                    }
                    if let Some(callback) = &callback {
                        callback(&diagnosis);
                    }
                    let _ = tx.send(diagnosis.clone());
                    return Some(diagnosis);
                }
            })
            .context("Failed to spawn watchdog thread")?;

        Ok(WatchdogHandle {
            alarms: rx,
            alarmed,
            token,
            thread,
        })
    }
}

/// Handle to a running watchdog
pub struct WatchdogHandle {
    alarms: Receiver<Diagnosis>,
    alarmed: Arc<AtomicBool>,
    token: CancellationToken,
    thread: JoinHandle<Option<Diagnosis>>,
}

impl WatchdogHandle {
    /// Receives the diagnosis once, when the alarm fires
    pub fn alarms(&self) -> &Receiver<Diagnosis> {
        &self.alarms
    }

    pub fn is_alarmed(&self) -> bool {
        self.alarmed.load(Ordering::SeqCst)
    }

    /// The token the watchdog cancels on alarm
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel the token (if not already) and wait for the thread to exit
    ///
    /// # Returns
    /// The diagnosis if the watchdog alarmed before being stopped.
    pub fn shutdown(self) -> Option<Diagnosis> {
        self.token.cancel();
        self.thread.join().ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(100);

    #[test]
    fn test_config_validation() {
        assert!(WatchdogConfig::new(Duration::from_secs(1), Duration::from_millis(100)).is_ok());
        assert!(WatchdogConfig::new(Duration::ZERO, Duration::from_millis(100)).is_err());
        assert!(WatchdogConfig::new(Duration::from_secs(1), Duration::ZERO).is_err());
        assert!(WatchdogConfig::new(Duration::from_millis(100), Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_advance_resets_quiet_period() {
        let t0 = Instant::now();
        let mut tracker = ProgressTracker::new(TIMEOUT, t0);

        assert_eq!(tracker.observe(Some(t0), t0), Check::Progressed);
        assert_eq!(
            tracker.observe(Some(t0), t0 + Duration::from_millis(50)),
            Check::Quiet {
                quiet_for: Duration::from_millis(50)
            }
        );
        let p1 = t0 + Duration::from_millis(90);
        assert_eq!(tracker.observe(Some(p1), p1), Check::Progressed);
        // Measured from the new marker, not from the start.
        assert_eq!(
            tracker.observe(Some(p1), t0 + Duration::from_millis(150)),
            Check::Quiet {
                quiet_for: Duration::from_millis(60)
            }
        );
        assert_eq!(tracker.state(), WatchdogState::Monitoring);
    }

    #[test]
    fn test_alarm_fires_once() {
        let t0 = Instant::now();
        let mut tracker = ProgressTracker::new(TIMEOUT, t0);
        assert_eq!(tracker.observe(Some(t0), t0), Check::Progressed);

        let late = t0 + TIMEOUT;
        assert_eq!(tracker.observe(Some(t0), late), Check::Alarm { quiet_for: TIMEOUT });
        assert_eq!(tracker.state(), WatchdogState::Alarmed);
        // Terminal, even if progress resumes
        let later = late + Duration::from_millis(1);
        assert_eq!(tracker.observe(Some(later), later), Check::Alarmed);
    }

    #[test]
    fn test_empty_registry_counts_as_quiet() {
        let t0 = Instant::now();
        let mut tracker = ProgressTracker::new(TIMEOUT, t0);
        assert!(matches!(
            tracker.observe(None, t0 + TIMEOUT / 2),
            Check::Quiet { .. }
        ));
        assert!(matches!(
            tracker.observe(None, t0 + TIMEOUT),
            Check::Alarm { .. }
        ));
    }

    #[test]
    fn test_spawned_watchdog_stops_quietly_on_cancel() {
        let registry = Arc::new(Registry::new());
        let config =
            WatchdogConfig::new(Duration::from_secs(5), Duration::from_millis(10)).unwrap();
        let handle = Watchdog::new(registry, config).spawn().unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert!(!handle.is_alarmed());
        assert!(handle.shutdown().is_none());
    }

    #[test]
    fn test_spawned_watchdog_alarms_on_silence() {
        let registry = Arc::new(Registry::new());
        registry.register_thread("idle");
        let config =
            WatchdogConfig::new(Duration::from_millis(50), Duration::from_millis(10)).unwrap();
        let token = CancellationToken::new();
        let handle = Watchdog::new(registry, config)
            .with_token(token.clone())
            .spawn()
            .unwrap();

        let diagnosis = handle
            .alarms()
            .recv_timeout(Duration::from_secs(5))
            .expect("watchdog did not alarm");
        assert!(!diagnosis.has_deadlock());
        assert!(diagnosis.quiet_for_ms >= 50);
        assert!(token.is_cancelled());
        assert!(handle.is_alarmed());
        assert_eq!(handle.shutdown(), Some(diagnosis));
    }
}
