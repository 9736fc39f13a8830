//! GPS telemetry ingestion server
//!
//! Clients connect over TCP and send one hex-encoded reading. Every payload
//! is stored raw, decoded readings are also stored as GPS records, and a
//! background writer appends human-readable lines to day-partitioned files.

pub mod codec;
pub mod config;
pub mod database;
pub mod errors;
pub mod handler;
pub mod log_queue;
pub mod log_writer;
pub mod models;
pub mod replica;
pub mod server;
