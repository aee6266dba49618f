//! Event log for registry transitions
//!
//! Every registry transition (registration, attempt, acquisition, timeout,
//! release, exit) and the watchdog's alarm can be recorded as one JSON line.
//! Entries are handed to a background writer thread over a channel, so the
//! registry guard is never held across file I/O.

use crate::core::diagnosis::Diagnosis;
use crate::core::types::{Events, ResourceId, ThreadId};
use anyhow::{Context, Result};
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Structure for a single log entry
#[derive(Debug, Serialize, Clone)]
pub struct LogEntry {
    /// Type of event that occurred
    pub event: Events,
    /// Thread involved, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<ThreadId>,
    /// Resource involved, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<ResourceId>,
    /// Display name, recorded on registration events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Full diagnosis, recorded on the alarm event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<Diagnosis>,
    /// Absolute timestamp (seconds since Unix Epoch)
    pub timestamp: f64,
}

/// Commands for controlling the writer thread
#[derive(Debug)]
enum LoggerCommand {
    /// Write a log entry to the file
    Entry(Box<LogEntry>),
    /// Flush all pending entries to disk and signal completion
    Flush(Sender<()>),
}

/// Event logger writing JSON lines through a background thread
pub struct EventLogger {
    sender: Sender<LoggerCommand>,
    path: PathBuf,
}

impl Drop for EventLogger {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            eprintln!("Warning: Failed to flush event log during drop: {e:?}");
        }
    }
}

impl EventLogger {
    /// Create a new logger that writes to the specified file
    ///
    /// # Arguments
    /// * `path` - Path to the log file. If the filename contains "{timestamp}",
    ///   it will be replaced with the current timestamp.
    ///
    /// # Errors
    /// Returns an error if the parent directory cannot be created or the file
    /// cannot be opened for writing.
    pub fn with_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_buf = expand_timestamp(path.as_ref());

        if let Some(parent) = path_buf.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path_buf)
            .with_context(|| format!("Failed to open log file {}", path_buf.display()))?;

        let (tx, rx) = unbounded::<LoggerCommand>();
        thread::Builder::new()
            .name("lockwatch-log".into())
            .spawn(move || writer_thread(file, rx))
            .context("Failed to spawn log writer thread")?;

        Ok(EventLogger {
            sender: tx,
            path: path_buf,
        })
    }

    /// Path of the file being written, after placeholder expansion
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn send(&self, entry: LogEntry) {
        if let Err(e) = self.sender.send(LoggerCommand::Entry(Box::new(entry))) {
            eprintln!("Failed to send log entry: {e:?}");
        }
    }

    /// Log a registry transition
    pub fn log_event(
        &self,
        event: Events,
        thread_id: Option<ThreadId>,
        resource_id: Option<ResourceId>,
    ) {
        self.send(LogEntry {
            event,
            thread_id,
            resource_id,
            name: None,
            diagnosis: None,
            timestamp: now_timestamp(),
        });
    }

    /// Log a thread or resource registration together with its display name
    pub fn log_registration(
        &self,
        event: Events,
        thread_id: Option<ThreadId>,
        resource_id: Option<ResourceId>,
        name: &str,
    ) {
        self.send(LogEntry {
            event,
            thread_id,
            resource_id,
            name: Some(name.to_owned()),
            diagnosis: None,
            timestamp: now_timestamp(),
        });
    }

    /// Write the terminal alarm record
    pub fn log_alarm(&self, diagnosis: &Diagnosis) {
        self.send(LogEntry {
            event: Events::Alarm,
            thread_id: None,
            resource_id: None,
            name: None,
            diagnosis: Some(diagnosis.clone()),
            timestamp: now_timestamp(),
        });
    }

    /// Force flush all pending log entries to disk
    ///
    /// Blocks until the writer thread confirms, or fails after ten seconds.
    pub fn flush(&self) -> Result<()> {
        let (flush_tx, flush_rx) = crossbeam_channel::bounded(1);
        self.sender
            .send(LoggerCommand::Flush(flush_tx))
            .context("Log writer thread is gone")?;
        flush_rx
            .recv_timeout(Duration::from_secs(10))
            .context("Flush operation timed out")
    }
}

fn now_timestamp() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + now.timestamp_subsec_micros() as f64 / 1_000_000.0
}

#[allow(clippy::literal_string_with_formatting_args)]
fn expand_timestamp(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    if raw.contains("{timestamp}") {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        PathBuf::from(raw.replace("{timestamp}", &stamp))
    } else {
        path.to_path_buf()
    }
}

fn writer_thread(file: File, rx: Receiver<LoggerCommand>) {
    let mut writer = BufWriter::new(file);

    while let Ok(cmd) = rx.recv() {
        match cmd {
            LoggerCommand::Entry(entry) => {
                if let Ok(json) = serde_json::to_string(&entry)
                    && let Err(e) = writeln!(writer, "{json}")
                {
                    eprintln!("Logger write error: {e:?}");
                }
            }
            LoggerCommand::Flush(responder) => {
                if let Err(e) = writer.flush() {
                    eprintln!("Logger flush error: {e:?}");
                }
                let _ = responder.send(());
            }
        }
    }

    if let Err(e) = writer.flush() {
        eprintln!("Logger final flush error: {e:?}");
    }
}
