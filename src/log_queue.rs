//! Queue of human-readable log lines
//!
//! Connection tasks produce [`LogEntry`] values through a cloneable
//! [`LogQueue`]; a single [`LogReceiver`] owned by the log writer consumes
//! them in FIFO order.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::models::{LogCategory, LogEntry};

const PARTITION_FORMAT: &str = "%Y-%m-%d";
const LINE_TIME_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Producer side of the log queue
#[derive(Debug, Clone)]
pub struct LogQueue {
    tx: mpsc::UnboundedSender<LogEntry>,
}

/// Consumer side of the log queue
#[derive(Debug)]
pub struct LogReceiver {
    rx: mpsc::UnboundedReceiver<LogEntry>,
    closed: bool,
}

impl LogQueue {
    pub fn new() -> (Self, LogReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, LogReceiver { rx, closed: false })
    }

    /// Append an entry without blocking
    pub fn enqueue(&self, entry: LogEntry) {
        if let Err(e) = self.tx.send(entry) {
            warn!(destination = %e.0.destination.display(), "Log writer gone, entry dropped");
        }
    }
}

impl LogReceiver {
    /// Wait up to `timeout` for the next entry.
    ///
    /// Returns `None` on timeout, or once every producer is gone and the
    /// queue is empty (see [`LogReceiver::is_closed`]).
    pub async fn dequeue(&mut self, timeout: Duration) -> Option<LogEntry> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(entry)) => Some(entry),
            Ok(None) => {
                self.closed = true;
                None
            }
            Err(_) => None,
        }
    }

    /// Next entry if one is already queued
    pub fn try_dequeue(&mut self) -> Option<LogEntry> {
        self.rx.try_recv().ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Formats log lines into their day-partitioned destination
#[derive(Debug, Clone)]
pub struct LogRecorder {
    root: PathBuf,
    queue: LogQueue,
}

impl LogRecorder {
    pub fn new(root: impl Into<PathBuf>, queue: LogQueue) -> Self {
        Self {
            root: root.into(),
            queue,
        }
    }

    pub fn record(&self, category: LogCategory, message: &str) {
        self.record_at(category, message, Local::now());
    }

    pub fn record_at(&self, category: LogCategory, message: &str, at: DateTime<Local>) {
        let entry = entry_for(&self.root, category, message, at);
        trace!(%category, "Log entry queued");
        self.queue.enqueue(entry);
    }
}

/// `<root>/<YYYY-MM-DD>/<category>_data.log` and its timestamped line
pub fn entry_for(
    root: &Path,
    category: LogCategory,
    message: &str,
    at: DateTime<Local>,
) -> LogEntry {
    let destination = root
        .join(at.format(PARTITION_FORMAT).to_string())
        .join(category.file_name());
    let line = format!(
        "currenttime: {} - {}\n",
        at.format(LINE_TIME_FORMAT),
        message
    );
    LogEntry { destination, line }
}
