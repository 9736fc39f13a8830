//! TCP listener and worker dispatch

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::{errors::IngestError, handler::ConnectionHandler};

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Bind `addr` with address and port reuse so sibling replicas can share it.
pub fn bind_reusable(addr: SocketAddr, backlog: i32) -> Result<TcpListener, IngestError> {
    let bind_err = |source| IngestError::Bind {
        address: addr,
        source,
    };

    let socket =
        Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    #[cfg(unix)]
    socket.set_reuse_port(true).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(backlog).map_err(bind_err)?;

    TcpListener::from_std(socket.into()).map_err(bind_err)
}

/// Accept loop feeding a bounded pool of connection workers
pub struct Listener {
    listener: TcpListener,
    handler: Arc<ConnectionHandler>,
    workers: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl Listener {
    pub fn bind(
        addr: SocketAddr,
        backlog: i32,
        workers: usize,
        handler: ConnectionHandler,
    ) -> Result<Self, IngestError> {
        let listener = bind_reusable(addr, backlog)?;
        Ok(Self::new(listener, workers, handler))
    }

    pub fn new(listener: TcpListener, workers: usize, handler: ConnectionHandler) -> Self {
        Self {
            listener,
            handler: Arc::new(handler),
            workers: Arc::new(Semaphore::new(workers.max(1))),
            tracker: TaskTracker::new(),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, IngestError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` fires, then wait for in-flight ones.
    ///
    /// Returns the number of accepted connections.
    pub async fn serve(&self, shutdown: CancellationToken) -> usize {
        let mut accepted = 0;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Listener stopped accepting connections");
                    break;
                }

                result = self.listener.accept() => match result {
                    Ok((stream, peer)) => {
                        accepted += 1;
                        debug!(%peer, "Connection accepted");
                        self.dispatch(stream, peer, shutdown.clone());
                    }
                    Err(e) => {
                        // Persistent errors such as EMFILE would otherwise spin
                        warn!("Accept error: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        self.tracker.close();
        info!(in_flight = self.tracker.len(), "Waiting for in-flight connections");
        self.tracker.wait().await;

        accepted
    }

    /// Queue a connection for the worker pool without blocking the accept loop
    fn dispatch(&self, stream: tokio::net::TcpStream, peer: SocketAddr, shutdown: CancellationToken) {
        let workers = Arc::clone(&self.workers);
        let handler = Arc::clone(&self.handler);

        self.tracker.spawn(async move {
            let _permit = match workers.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            // Run in its own task so a panic surfaces as a JoinError here
            let worker = tokio::spawn(async move {
                handler
                    .handle(stream, &peer.to_string(), &shutdown)
                    .await
            });
            match worker.await {
                Ok(Ok(outcome)) => debug!(%peer, ?outcome, "Connection closed"),
                Ok(Err(e)) => warn!(%peer, "Connection failed: {}", e),
                Err(e) if e.is_panic() => error!(%peer, "Connection handler panicked"),
                Err(e) => error!(%peer, "Connection handler aborted: {}", e),
            }
        });
    }
}
