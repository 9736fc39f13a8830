//! Per-connection ingestion
//!
//! A connection moves through
//! `AWAIT_PAYLOAD -> RAW_PERSISTED -> {GPS_PERSISTED | DECODE_FAILED} -> LOGGED -> CLOSED`,
//! or straight from `AWAIT_PAYLOAD` to `CLOSED` when the peer sends nothing.

use std::io;
use std::time::Duration;

use chrono::Local;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    codec,
    config::InteractionMode,
    database::Persister,
    errors::IngestError,
    log_queue::LogRecorder,
    models::{LogCategory, RawMessage},
};

pub const ACK_SAVED: &[u8] = b"Data saved!";
pub const ACK_REJECTED: &[u8] = b"Data rejected!";

/// Result of serving one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// Peer closed, or shutdown came, before anything was sent
    Empty,
    /// Payload decoded into a GPS record
    Ingested,
    /// Payload stored raw only, decode or parse failed
    Rejected,
}

#[derive(Clone)]
pub struct ConnectionHandler {
    persister: Persister,
    recorder: LogRecorder,
    max_message_bytes: usize,
    read_timeout: Duration,
    mode: InteractionMode,
}

impl ConnectionHandler {
    pub fn new(
        persister: Persister,
        recorder: LogRecorder,
        max_message_bytes: usize,
        read_timeout: Duration,
        mode: InteractionMode,
    ) -> Self {
        Self {
            persister,
            recorder,
            max_message_bytes,
            read_timeout,
            mode,
        }
    }

    /// Serve one accepted connection until it is done with.
    ///
    /// Decode and storage failures are handled here; only socket errors and
    /// read timeouts are returned. A read still waiting for data when
    /// `shutdown` fires is abandoned.
    pub async fn handle<S>(
        &self,
        mut stream: S,
        peer: &str,
        shutdown: &CancellationToken,
    ) -> Result<ConnectionOutcome, IngestError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let outcome = match self.mode {
            InteractionMode::FireAndForget => match self
                .read_message(&mut stream, peer, shutdown)
                .await?
            {
                Some(payload) => self.ingest(payload).await,
                None => ConnectionOutcome::Empty,
            },
            InteractionMode::Acknowledged => {
                let mut last = ConnectionOutcome::Empty;
                while let Some(payload) = self.read_message(&mut stream, peer, shutdown).await? {
                    last = self.ingest(payload).await;
                    let ack = match last {
                        ConnectionOutcome::Ingested => ACK_SAVED,
                        _ => ACK_REJECTED,
                    };
                    stream
                        .write_all(ack)
                        .await
                        .map_err(|e| IngestError::connection(peer, e))?;
                }
                debug!(%peer, "Connection ended by the client");
                last
            }
        };

        if let Err(e) = stream.shutdown().await {
            debug!(%peer, "Socket shutdown failed: {}", e);
        }
        Ok(outcome)
    }

    /// Single bounded read; `None` when the peer has closed or on shutdown
    async fn read_message<S>(
        &self,
        stream: &mut S,
        peer: &str,
        shutdown: &CancellationToken,
    ) -> Result<Option<String>, IngestError>
    where
        S: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; self.max_message_bytes];
        // Data already waiting wins over shutdown
        let n = tokio::select! {
            biased;

            result = tokio::time::timeout(self.read_timeout, stream.read(&mut buf)) => match result {
                Ok(read) => read.map_err(|e| IngestError::connection(peer, e))?,
                Err(_) => {
                    return Err(IngestError::connection(
                        peer,
                        io::Error::new(io::ErrorKind::TimedOut, "no data before read timeout"),
                    ))
                }
            },

            _ = shutdown.cancelled() => {
                debug!(%peer, "Idle connection abandoned on shutdown");
                return Ok(None);
            }
        };
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&buf[..n]).into_owned()))
    }

    /// Persist and log one payload
    pub async fn ingest(&self, raw_hex: String) -> ConnectionOutcome {
        let raw = RawMessage::new(Local::now(), raw_hex);
        self.persister.write_raw(&raw).await;

        let payload = raw.raw_hex.trim();
        match codec::decode_record(payload) {
            Ok(record) => {
                self.persister.write_gps(&record).await;
                self.recorder.record(LogCategory::Client, &record.to_string());
                self.recorder.record(LogCategory::Raw, payload);
                ConnectionOutcome::Ingested
            }
            Err(e) => {
                warn!("Rejected payload: {}", e);
                self.recorder
                    .record(LogCategory::Error, &format!("{e}, payload: {payload}"));
                ConnectionOutcome::Rejected
            }
        }
    }
}
