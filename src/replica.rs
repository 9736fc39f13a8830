//! Replica lifecycle and multi-process fan-out
//!
//! A replica owns its own listener, database pool and log writer. Several
//! replicas share one address through port reuse and know nothing of each
//! other; the kernel spreads incoming connections across them.

use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::EnvironmentConfig,
    database::{Persister, SqlStore},
    errors::IngestError,
    handler::ConnectionHandler,
    log_queue::{LogQueue, LogRecorder},
    log_writer::{LogWriter, LogWriterHandle},
    server::Listener,
};

/// Counters reported by a replica once it has shut down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaReport {
    pub accepted: usize,
    pub logged: usize,
}

pub struct Replica {
    id: usize,
    listener: Listener,
    persister: Persister,
    writer: LogWriterHandle,
}

impl Replica {
    /// Connect storage, bind the listener and start the log writer
    pub async fn start(id: usize, settings: &EnvironmentConfig) -> Result<Self, IngestError> {
        settings.validate()?;

        let max_connections = u32::try_from(settings.workers + 1).unwrap_or(u32::MAX);
        let store = SqlStore::connect(&settings.database_url, max_connections).await?;
        let persister = Persister::new(Arc::new(store));

        let (queue, receiver) = LogQueue::new();
        let handler = ConnectionHandler::new(
            persister.clone(),
            LogRecorder::new(&settings.log_folder_path, queue),
            settings.max_message_bytes,
            settings.read_timeout,
            settings.mode,
        );

        let listener = match Listener::bind(
            settings.socket_addr()?,
            settings.backlog,
            settings.workers,
            handler,
        ) {
            Ok(listener) => listener,
            Err(e) => {
                persister.close().await;
                return Err(e);
            }
        };
        let writer = LogWriter::new(receiver, settings.log_poll_interval).spawn();

        Ok(Self {
            id,
            listener,
            persister,
            writer,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, IngestError> {
        self.listener.local_addr()
    }

    /// Serve until `shutdown` fires, then wind down in order: stop accepting,
    /// finish in-flight connections, drain the log writer, close storage,
    /// close the listening socket.
    pub async fn run(self, shutdown: CancellationToken) -> ReplicaReport {
        let Self {
            id,
            listener,
            persister,
            writer,
        } = self;

        if let Ok(addr) = listener.local_addr() {
            info!(replica = id, address = %addr, "Replica listening");
        }

        let accepted = listener.serve(shutdown).await;
        let logged = writer.stop().await;
        persister.close().await;
        drop(listener);

        info!(replica = id, accepted, logged, "Replica stopped");
        ReplicaReport { accepted, logged }
    }
}

/// Resolves on SIGINT, or SIGTERM on unix
pub async fn termination_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!("Could not install SIGTERM handler: {}", e);
                if let Err(e) = ctrl_c.await {
                    error!("Could not listen for SIGINT: {}", e);
                }
            }
        }
    }

    #[cfg(not(unix))]
    if let Err(e) = ctrl_c.await {
        error!("Could not listen for SIGINT: {}", e);
    }
}

/// Token cancelled when the process receives a termination signal
pub fn shutdown_on_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        termination_signal().await;
        info!("Received shutdown signal");
        trigger.cancel();
    });
    token
}

/// Launches replica processes and waits for them
pub struct ReplicaSupervisor {
    program: PathBuf,
    args: Vec<OsString>,
    replicas: usize,
    grace: Duration,
}

impl ReplicaSupervisor {
    /// Each replica runs `program args.. --id <n>`
    pub fn new(
        program: impl Into<PathBuf>,
        args: Vec<OsString>,
        replicas: usize,
        grace: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            replicas,
            grace,
        }
    }

    /// Re-execute the running binary in replica mode
    pub fn for_current_exe(
        config_path: impl Into<OsString>,
        env: &str,
        replicas: usize,
        grace: Duration,
    ) -> Result<Self, IngestError> {
        let args = vec![
            OsString::from("replica"),
            OsString::from("--config"),
            config_path.into(),
            OsString::from("--env"),
            OsString::from(env),
        ];
        Ok(Self::new(std::env::current_exe()?, args, replicas, grace))
    }

    fn command(&self, id: usize) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--id")
            .arg(id.to_string())
            .kill_on_drop(true);
        command
    }

    /// Start every replica and wait until all have exited.
    ///
    /// Once `shutdown` fires every replica is sent SIGTERM and has `grace` to
    /// drain and exit before being killed.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), IngestError> {
        let mut children = Vec::with_capacity(self.replicas);
        for id in 0..self.replicas {
            let child = self.command(id).spawn().map_err(|e| IngestError::Replica {
                id,
                message: format!("failed to start: {e}"),
            })?;
            info!(replica = id, pid = child.id(), "Replica started");
            children.push(child);
        }

        let finished = tokio::select! {
            statuses = wait_all(&mut children) => Some(statuses),
            _ = shutdown.cancelled() => None,
        };

        let statuses = match finished {
            Some(statuses) => statuses,
            None => {
                for (id, child) in children.iter().enumerate() {
                    request_stop(id, child);
                }
                info!(grace = ?self.grace, "Waiting for replicas to exit");
                match tokio::time::timeout(self.grace, wait_all(&mut children)).await {
                    Ok(statuses) => statuses,
                    Err(_) => {
                        warn!("Replicas still running after grace period, killing them");
                        for child in children.iter_mut() {
                            if let Err(e) = child.start_kill() {
                                warn!("Failed to kill replica: {}", e);
                            }
                        }
                        wait_all(&mut children).await
                    }
                }
            }
        };

        let mut failure = None;
        for (id, status) in statuses.into_iter().enumerate() {
            match status {
                Ok(status) if status.success() => info!(replica = id, "Replica exited"),
                Ok(status) => {
                    error!(replica = id, %status, "Replica exited abnormally");
                    failure.get_or_insert(IngestError::Replica {
                        id,
                        message: status.to_string(),
                    });
                }
                Err(e) => {
                    error!(replica = id, "Failed to wait for replica: {}", e);
                    failure.get_or_insert(IngestError::Replica {
                        id,
                        message: e.to_string(),
                    });
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Ask a replica to shut down cleanly
#[cfg(unix)]
fn request_stop(id: usize, child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // No pid once the child has been reaped
    let Some(pid) = child.id() else {
        return;
    };
    let Ok(pid) = i32::try_from(pid) else {
        warn!(replica = id, pid, "Replica pid out of range");
        return;
    };
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => debug!(replica = id, pid, "Sent SIGTERM to replica"),
        Err(e) => warn!(replica = id, pid, "Failed to signal replica: {}", e),
    }
}

#[cfg(not(unix))]
fn request_stop(_id: usize, _child: &Child) {}

async fn wait_all(children: &mut [Child]) -> Vec<std::io::Result<ExitStatus>> {
    let mut statuses = Vec::with_capacity(children.len());
    for child in children.iter_mut() {
        statuses.push(child.wait().await);
    }
    statuses
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str, replicas: usize, grace: Duration) -> ReplicaSupervisor {
        ReplicaSupervisor::new(
            "sh",
            vec![OsString::from("-c"), OsString::from(script)],
            replicas,
            grace,
        )
    }

    #[tokio::test]
    async fn test_waits_for_all_replicas() {
        let supervisor = shell("exit 0", 3, Duration::from_secs(1));
        supervisor.run(CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_reports_failed_replica() {
        // $1 is the replica id
        let supervisor = shell("[ \"$1\" != 1 ]", 2, Duration::from_secs(1));
        let err = supervisor.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, IngestError::Replica { id: 1, .. }));
    }

    #[tokio::test]
    async fn test_forwards_sigterm_to_replicas() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("stopped");
        let script = format!(
            "trap 'touch \"{}-$1\"; kill $!; exit 0' TERM INT; sleep 30 & wait",
            marker.display()
        );
        let supervisor = shell(&script, 2, Duration::from_secs(5));
        let shutdown = CancellationToken::new();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(10), supervisor.run(shutdown))
            .await
            .expect("replicas should exit on SIGTERM");
        assert!(result.is_ok(), "{result:?}");
        assert!(dir.path().join("stopped-0").exists());
        assert!(dir.path().join("stopped-1").exists());
    }

    #[tokio::test]
    async fn test_kills_replicas_after_grace() {
        // Replicas that ignore SIGTERM
        let supervisor = shell("trap '' TERM; sleep 30 & wait", 2, Duration::from_millis(100));
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let result = tokio::time::timeout(Duration::from_secs(10), supervisor.run(shutdown))
            .await
            .expect("supervisor should not wait for the full sleep");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unknown_program_fails_to_start() {
        let supervisor = ReplicaSupervisor::new(
            "/nonexistent/gps-ingest",
            Vec::new(),
            1,
            Duration::from_secs(1),
        );
        let err = supervisor.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, IngestError::Replica { id: 0, .. }));
    }
}
