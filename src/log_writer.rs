//! Background writer for the log queue
//!
//! One writer per replica is the only task appending to the category files,
//! so files need no locking.

use std::time::Duration;

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{log_queue::LogReceiver, models::LogEntry};

pub struct LogWriter {
    receiver: LogReceiver,
    poll_interval: Duration,
}

/// Running writer task
pub struct LogWriterHandle {
    cancel: CancellationToken,
    task: JoinHandle<usize>,
}

impl LogWriter {
    pub fn new(receiver: LogReceiver, poll_interval: Duration) -> Self {
        Self {
            receiver,
            poll_interval,
        }
    }

    pub fn spawn(self) -> LogWriterHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.run(cancel.clone()));
        LogWriterHandle { cancel, task }
    }

    /// Write entries until cancelled, then drain what is still queued.
    ///
    /// Returns the number of entries written.
    async fn run(mut self, cancel: CancellationToken) -> usize {
        let mut written = 0;

        loop {
            let entry = tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                entry = self.receiver.dequeue(self.poll_interval) => entry,
            };

            match entry {
                Some(entry) => {
                    if write_entry(&entry).await {
                        written += 1;
                    }
                }
                None if self.receiver.is_closed() => break,
                None => continue,
            }
        }

        let mut drained = 0;
        while let Some(entry) = self.receiver.try_dequeue() {
            if write_entry(&entry).await {
                written += 1;
            }
            drained += 1;
        }
        info!(written, drained, "Log writer stopped");

        written
    }
}

impl LogWriterHandle {
    /// Signal the writer and wait until the backlog is flushed
    pub async fn stop(self) -> usize {
        self.cancel.cancel();
        match self.task.await {
            Ok(written) => written,
            Err(e) => {
                error!("Log writer task failed: {}", e);
                0
            }
        }
    }
}

async fn write_entry(entry: &LogEntry) -> bool {
    match append(entry).await {
        Ok(()) => {
            debug!(destination = %entry.destination.display(), "Log line written");
            true
        }
        Err(e) => {
            error!(
                destination = %entry.destination.display(),
                "Failed to write log line: {}", e
            );
            false
        }
    }
}

async fn append(entry: &LogEntry) -> std::io::Result<()> {
    if let Some(parent) = entry.destination.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&entry.destination)
        .await?;
    file.write_all(entry.line.as_bytes()).await?;
    file.flush().await
}
