pub mod monitored;

pub use monitored::{MonitoredLock, ResourceGuard};
