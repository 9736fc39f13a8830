//! Errors for GPS ingestion
use std::net::SocketAddr;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Malformed hex payload: {0}")]
    Decode(String),

    #[error("Expected 3 comma-separated fields, found {found}")]
    Parse { found: usize },

    #[error("Failed to write to {table}: {origin}")]
    Storage { table: &'static str, origin: String },

    #[error("Connection error with {peer}: {source}")]
    Connection {
        peer: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error")]
    Config(#[from] config::ConfigError),

    #[error("Environment '{0}' not found in configuration")]
    UnknownEnvironment(String),

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Failed to bind listener on {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Database connection error: {0}")]
    DatabaseConnection(String),

    #[error("Replica {id} failed: {message}")]
    Replica { id: usize, message: String },

    #[error("IO error")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    pub(crate) fn connection(peer: impl ToString, source: std::io::Error) -> Self {
        Self::Connection {
            peer: peer.to_string(),
            source,
        }
    }

    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
