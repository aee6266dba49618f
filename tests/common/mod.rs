use lockwatch::{Diagnosis, Registry, ThreadId, Watchdog, WatchdogConfig, WatchdogHandle};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

#[allow(dead_code)]
pub const ALARM_TIMEOUT: Duration = Duration::from_secs(5);
#[allow(dead_code)]
pub const NO_ALARM_WINDOW: Duration = Duration::from_millis(800);

/// A watchdog tuned for tests: short timeout, frequent checks
#[allow(dead_code)]
pub fn start_watchdog(registry: &Arc<Registry>, timeout_ms: u64) -> WatchdogHandle {
    let config = WatchdogConfig::new(
        Duration::from_millis(timeout_ms),
        Duration::from_millis(20),
    )
    .expect("valid watchdog config");
    Watchdog::new(Arc::clone(registry), config)
        .spawn()
        .expect("Failed to start watchdog")
}

#[allow(dead_code)]
pub fn expect_alarm(handle: &WatchdogHandle, timeout: Duration) -> Diagnosis {
    match handle.alarms().recv_timeout(timeout) {
        Ok(diagnosis) => {
            assert!(handle.is_alarmed(), "Alarm flag should be set");
            assert!(handle.token().is_cancelled(), "Token should be cancelled");
            diagnosis
        }
        Err(_) => panic!("No alarm within {timeout:?}"),
    }
}

#[allow(dead_code)]
pub fn assert_no_alarm(handle: &WatchdogHandle, window: Duration) {
    assert!(
        handle.alarms().recv_timeout(window).is_err(),
        "Unexpected alarm"
    );
    assert!(!handle.is_alarmed(), "Alarm flag should not be set");
}

/// The set of distinct threads in a closed cycle
#[allow(dead_code)]
pub fn members(cycle: &[ThreadId]) -> BTreeSet<ThreadId> {
    cycle.iter().copied().collect()
}
