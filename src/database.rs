// src/database.rs
pub mod schema;

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::AnyPool;
use tracing::{debug, error, info};

use crate::{
    errors::IngestError,
    models::{GpsRecord, RawMessage},
};
use schema::{Backend, Schema, Table};

/// Relational store receiving raw and structured records.
///
/// Each insert is its own atomic unit; implementations must not couple
/// the two record kinds.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_raw(&self, message: &RawMessage) -> Result<(), IngestError>;

    async fn insert_gps(&self, record: &GpsRecord) -> Result<(), IngestError>;

    /// Release connections held by the store
    async fn close(&self) {}
}

/// `sqlx` store over any supported backend
pub struct SqlStore {
    pool: AnyPool,
    schema: Schema,
}

impl SqlStore {
    /// Connect to `url` and make sure the tables exist
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, IngestError> {
        let backend = Backend::from_url(url).ok_or_else(|| {
            IngestError::DatabaseConnection(format!("unsupported database URL scheme: {url}"))
        })?;

        install_default_drivers();

        info!(?backend, "Connecting to database");
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(url)
            .await
            .map_err(|e| IngestError::DatabaseConnection(e.to_string()))?;

        let store = Self {
            pool,
            schema: Schema::new(backend),
        };
        store.create_tables().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn create_tables(&self) -> Result<(), IngestError> {
        for table in self.schema.tables() {
            sqlx::query(&table.create)
                .execute(&self.pool)
                .await
                .map_err(|e| storage_error(table, e))?;
        }
        Ok(())
    }

    async fn insert(&self, table: &Table, values: &[&str]) -> Result<(), IngestError> {
        let mut tx = self.pool.begin().await.map_err(|e| storage_error(table, e))?;

        let mut query = sqlx::query(&table.insert);
        for value in values {
            query = query.bind(*value);
        }
        // Dropping an uncommitted transaction rolls it back
        query
            .execute(&mut *tx)
            .await
            .map_err(|e| storage_error(table, e))?;

        tx.commit().await.map_err(|e| storage_error(table, e))
    }
}

fn storage_error(table: &Table, e: sqlx::Error) -> IngestError {
    IngestError::Storage {
        table: table.name,
        origin: e.to_string(),
    }
}

#[async_trait]
impl Store for SqlStore {
    async fn insert_raw(&self, message: &RawMessage) -> Result<(), IngestError> {
        self.insert(
            &self.schema.raw_messages,
            &[message.timestamp.as_str(), message.raw_hex.as_str()],
        )
        .await
    }

    async fn insert_gps(&self, record: &GpsRecord) -> Result<(), IngestError> {
        self.insert(
            &self.schema.gps_records,
            &[
                record.client_name.as_str(),
                record.latitude.as_str(),
                record.longitude.as_str(),
            ],
        )
        .await
    }

    async fn close(&self) {
        info!("Closing database pool");
        self.pool.close().await;
    }
}

/// Writes records without ever failing the caller.
///
/// Storage failures are logged and the write is abandoned; the returned flag
/// only tells whether the row was committed.
#[derive(Clone)]
pub struct Persister {
    store: Arc<dyn Store>,
}

impl Persister {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn write_raw(&self, message: &RawMessage) -> bool {
        match self.store.insert_raw(message).await {
            Ok(()) => {
                debug!(timestamp = %message.timestamp, "Raw message stored");
                true
            }
            Err(e) => {
                error!("Raw message write abandoned: {}", e);
                false
            }
        }
    }

    pub async fn write_gps(&self, record: &GpsRecord) -> bool {
        match self.store.insert_gps(record).await {
            Ok(()) => {
                debug!(client = %record.client_name, "GPS record stored");
                true
            }
            Err(e) => {
                error!("GPS record write abandoned: {}", e);
                false
            }
        }
    }

    pub async fn close(&self) {
        self.store.close().await;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// In-memory store with switchable failures
    #[derive(Default)]
    pub struct MemoryStore {
        pub raw: Mutex<Vec<RawMessage>>,
        pub gps: Mutex<Vec<GpsRecord>>,
        pub gps_attempts: Mutex<usize>,
        pub fail_raw: AtomicBool,
        pub fail_gps: AtomicBool,
        pub closed: AtomicBool,
    }

    impl MemoryStore {
        pub fn raw_rows(&self) -> Vec<RawMessage> {
            self.raw.lock().unwrap().clone()
        }

        pub fn gps_rows(&self) -> Vec<GpsRecord> {
            self.gps.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Store for MemoryStore {
        async fn insert_raw(&self, message: &RawMessage) -> Result<(), IngestError> {
            if self.fail_raw.load(Ordering::SeqCst) {
                return Err(IngestError::Storage {
                    table: "raw_messages",
                    origin: "injected failure".to_string(),
                });
            }
            self.raw.lock().unwrap().push(message.clone());
            Ok(())
        }

        async fn insert_gps(&self, record: &GpsRecord) -> Result<(), IngestError> {
            *self.gps_attempts.lock().unwrap() += 1;
            if self.fail_gps.load(Ordering::SeqCst) {
                return Err(IngestError::Storage {
                    table: "gps_records",
                    origin: "injected failure".to_string(),
                });
            }
            self.gps.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use chrono::Local;

    use super::testing::MemoryStore;
    use super::*;

    #[tokio::test]
    async fn test_persister_reports_success() {
        let store = Arc::new(MemoryStore::default());
        let persister = Persister::new(store.clone());

        assert!(persister.write_raw(&RawMessage::new(Local::now(), "4142")).await);
        assert!(
            persister
                .write_gps(&GpsRecord::new("Truck1", "40.7128", "-74.0060"))
                .await
        );
        assert_eq!(store.raw_rows().len(), 1);
        assert_eq!(store.gps_rows().len(), 1);
    }

    #[tokio::test]
    async fn test_persister_swallows_storage_failure() {
        let store = Arc::new(MemoryStore::default());
        store.fail_raw.store(true, Ordering::SeqCst);
        let persister = Persister::new(store.clone());

        assert!(!persister.write_raw(&RawMessage::new(Local::now(), "4142")).await);
        assert!(
            persister
                .write_gps(&GpsRecord::new("Truck1", "40.7128", "-74.0060"))
                .await
        );
        assert!(store.raw_rows().is_empty());
        assert_eq!(store.gps_rows().len(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_url_is_rejected() {
        let result = SqlStore::connect("mysql://localhost/gps", 1).await;
        assert!(matches!(result, Err(IngestError::DatabaseConnection(_))));
    }
}
