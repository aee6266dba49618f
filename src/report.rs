//! Human-readable rendering of diagnoses and run summaries

use crate::core::diagnosis::{Diagnosis, Verdict};
use crate::core::types::ResourceId;
use crate::workload::{RunReport, RunStatus};
use std::fmt;

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "[WATCHDOG] No progress for {} ms ({})",
            self.quiet_for_ms, self.timestamp
        )?;

        writeln!(f, "  Resources:")?;
        for r in &self.resources {
            let owner = r
                .owner
                .map(|t| self.thread_label(t))
                .unwrap_or_else(|| "None".to_string());
            let waiters = if r.waiters.is_empty() {
                "-".to_string()
            } else {
                r.waiters
                    .iter()
                    .map(|&t| self.thread_label(t))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            writeln!(f, "   - {}: owner={owner}; waiters=[{waiters}]", r.name)?;
        }

        writeln!(f, "  Threads:")?;
        for t in &self.threads {
            let held = if t.held.is_empty() {
                "-".to_string()
            } else {
                t.held
                    .iter()
                    .map(|&r| self.resource_label(r))
                    .collect::<Vec<_>>()
                    .join(",")
            };
            let waiting = t
                .waiting_for
                .map(|r| self.resource_label(r))
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                f,
                "   - {} holds=[{held}] waiting={waiting} idle={}ms",
                self.thread_label(t.id),
                t.idle_ms
            )?;
        }

        match self.verdict {
            Verdict::Deadlock => {
                writeln!(f, "  Cycles in the wait-for graph (deadlock):")?;
                for cycle in &self.cycles {
                    let path = cycle
                        .iter()
                        .map(|&t| self.thread_label(t))
                        .collect::<Vec<_>>()
                        .join(" -> ");
                    writeln!(f, "   * {path}")?;
                }
                Ok(())
            }
            Verdict::NoCycleFound => {
                writeln!(f, "  No cycle found (possible starvation or slowdown).")
            }
        }
    }
}

impl Diagnosis {
    fn resource_label(&self, id: ResourceId) -> String {
        self.resource(id)
            .map(|r| r.name.clone())
            .unwrap_or_else(|| id.to_string())
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => f.write_str("completed (no deadlock)"),
            RunStatus::Alarmed => f.write_str("deadlock alarm raised"),
            RunStatus::Stopped => f.write_str("stopped early"),
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(diagnosis) = &self.diagnosis {
            writeln!(f, "{diagnosis}")?;
        }
        writeln!(f, "=== SUMMARY ===")?;
        writeln!(
            f,
            "Mode: {} | resources={} | threads={} | iters/thread={}",
            self.discipline, self.resources, self.workers, self.iterations
        )?;
        writeln!(
            f,
            "Time: {:.2}s | Status: {}",
            self.elapsed_ms as f64 / 1000.0,
            self.status
        )?;
        match self.status {
            RunStatus::Completed => writeln!(
                f,
                "Progress: {} critical sections completed | ~{:.1} / min",
                self.completed_sections, self.throughput_per_min
            ),
            RunStatus::Alarmed => writeln!(
                f,
                "Progress: {} of {} sections before the watchdog stopped the run ({} worker(s) stuck)",
                self.completed_sections,
                self.attempted_sections(),
                self.stuck_workers
            ),
            RunStatus::Stopped => writeln!(
                f,
                "Progress: {} of {} sections, stopped without an alarm",
                self.completed_sections,
                self.attempted_sections()
            ),
        }
    }
}
