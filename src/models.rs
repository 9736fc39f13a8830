//! Data models.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Format of the `timestamp` column of raw messages.
pub const RAW_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Unmodified payload received from a client.
///
/// Stored once for every connection that delivers at least one byte,
/// whatever the outcome of decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Local reception time, formatted with [`RAW_TIMESTAMP_FORMAT`]
    pub timestamp: String,
    /// Payload text exactly as received
    pub raw_hex: String,
}

impl RawMessage {
    pub fn new(received_at: DateTime<Local>, raw_hex: impl Into<String>) -> Self {
        Self {
            timestamp: received_at.format(RAW_TIMESTAMP_FORMAT).to_string(),
            raw_hex: raw_hex.into(),
        }
    }
}

/// GPS reading extracted from a decoded payload.
///
/// Coordinates are kept as text so that ingestion never loses precision
/// or rejects an unusual but legitimate notation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpsRecord {
    pub client_name: String,
    pub latitude: String,
    pub longitude: String,
}

impl GpsRecord {
    pub fn new(
        client_name: impl Into<String>,
        latitude: impl Into<String>,
        longitude: impl Into<String>,
    ) -> Self {
        Self {
            client_name: client_name.into(),
            latitude: latitude.into(),
            longitude: longitude.into(),
        }
    }
}

impl fmt::Display for GpsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "client_name: {}, latitude: {}, longitude: {}",
            self.client_name, self.latitude, self.longitude
        )
    }
}

/// Category of a human-readable log line, one file per category and day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    /// Summary of a parsed GPS record
    Client,
    /// Original hex payload of a parsed message
    Raw,
    /// Decode or parse failure description
    Error,
}

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Raw => "raw",
            Self::Error => "error",
        }
    }

    /// File name inside a day partition, e.g. `client_data.log`
    pub fn file_name(&self) -> String {
        format!("{}_data.log", self.as_str())
    }
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A line waiting in the log queue together with the file it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub destination: PathBuf,
    pub line: String,
}
