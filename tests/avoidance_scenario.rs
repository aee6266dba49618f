mod common;

use lockwatch::{Discipline, RunConfig, RunStatus, Workload};
use std::sync::Arc;
use std::time::Duration;

fn ordered(seed: u64) -> RunConfig {
    RunConfig::default()
        .discipline(Discipline::Ordered)
        .resources(2)
        .workers(2)
        .iterations(1000)
        .hold(0, 0)
        .watchdog(Duration::from_secs(2), Duration::from_millis(50))
        .seed(seed)
}

#[test]
fn test_ordered_acquisition_never_alarms() {
    for seed in [1, 2, 0xA11CE] {
        let workload = Workload::new(ordered(seed)).unwrap();
        let registry = Arc::clone(workload.registry());
        let report = workload.run().unwrap();

        assert_eq!(report.status, RunStatus::Completed, "seed {seed}");
        assert_eq!(report.completed_sections, 2000);
        assert_eq!(report.stuck_workers, 0);
        assert!(report.diagnosis.is_none());
        assert!(registry.snapshot().threads.is_empty());
        assert!(registry.check_invariants().is_empty());
    }
}

#[test]
fn test_ordered_with_gap_and_more_workers() {
    let config = ordered(7)
        .resources(4)
        .workers(6)
        .iterations(40)
        .hold(0, 2)
        .gap(Duration::from_millis(1));
    let report = lockwatch::run(config).unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.completed_sections, 240);
    assert!(report.throughput_per_min > 0.0);
    assert!(report.to_string().contains("completed (no deadlock)"));
}

#[test]
fn test_json_report_omits_missing_diagnosis() {
    let report = lockwatch::run(ordered(3).iterations(10)).unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["status"], "completed");
    assert_eq!(json["discipline"], "ordered");
    assert!(json.get("diagnosis").is_none());
}
