use anyhow::{Context, Result};
use clap::Parser;
use lockwatch::{Discipline, HoldRange, RunConfig, RunStatus};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Lockwatch - provoke a deadlock and diagnose it with a watchdog, or avoid it with a total lock order"
)]
struct Cli {
    /// unordered (alias: deadlock) = opposite orders; ordered = global order by index
    #[arg(long, value_enum, default_value_t = Discipline::Unordered)]
    mode: Discipline,

    /// Number of resources (locks); values below 2 are raised to 2
    #[arg(long, default_value_t = 4)]
    resources: usize,

    /// Number of worker threads; values below 2 are raised to 2
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Iterations per worker
    #[arg(long, default_value_t = 100)]
    iters: usize,

    /// Time spent holding both locks, as MIN,MAX milliseconds
    #[arg(long, default_value = "10,30")]
    hold_ms: HoldRange,

    /// Pause between taking the first and second lock, in milliseconds
    #[arg(long, default_value_t = 0)]
    gap_ms: u64,

    /// Bound each acquire so workers can unwind after an alarm (milliseconds)
    #[arg(long)]
    acquire_timeout_ms: Option<u64>,

    /// Watchdog timeout without progress, in seconds
    #[arg(long, default_value_t = 2.0)]
    wd_timeout: f64,

    /// Watchdog check interval, in seconds
    #[arg(long, default_value_t = 0.2)]
    wd_check: f64,

    /// Base seed for the workers' hold durations
    #[arg(long, default_value_t = 0xA11CE)]
    seed: u64,

    /// Write a JSON-lines event log ("{timestamp}" is expanded)
    #[arg(long)]
    log: Option<PathBuf>,

    /// Print the report as JSON instead of text
    #[arg(long)]
    json: bool,
}

fn seconds(value: f64, name: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("invalid {name}: {value}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = RunConfig::default()
        .discipline(cli.mode)
        .resources(cli.resources.max(2))
        .workers(cli.threads.max(2))
        .iterations(cli.iters)
        .hold(cli.hold_ms.min_ms, cli.hold_ms.max_ms)
        .gap(Duration::from_millis(cli.gap_ms))
        .acquire_timeout(cli.acquire_timeout_ms.map(Duration::from_millis))
        .watchdog(
            seconds(cli.wd_timeout, "--wd-timeout")?,
            seconds(cli.wd_check, "--wd-check")?,
        )
        .seed(cli.seed);
    if let Some(path) = &cli.log {
        config = config.with_log(path);
    }

    eprintln!(
        "[INFO] Starting mode={} | R={} | T={} | iters={} | hold={},{} ms",
        config.discipline,
        config.resources,
        config.workers,
        config.iterations,
        config.hold.min_ms,
        config.hold.max_ms
    );

    let report = lockwatch::run(config)?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    } else {
        print!("{report}");
    }

    if report.status == RunStatus::Alarmed {
        // Blocked workers cannot be joined; leave without waiting for them.
        std::process::exit(2);
    }
    Ok(())
}
