use std::sync::Arc;

use chrono::Local;
use sqlx::Row;
use tempfile::TempDir;

use gps_ingest::{
    database::{schema::Backend, Persister, SqlStore, Store},
    errors::IngestError,
    models::{GpsRecord, RawMessage},
};

async fn setup_test_db() -> (TempDir, SqlStore) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("gps.db").display());
    let store = SqlStore::connect(&url, 4)
        .await
        .expect("Failed to connect to database");
    (dir, store)
}

#[tokio::test]
async fn test_insert_raw_message() {
    let (_dir, store) = setup_test_db().await;
    assert_eq!(store.schema().backend, Backend::Sqlite);

    let message = RawMessage::new(Local::now(), "547275636b31");
    store
        .insert_raw(&message)
        .await
        .expect("Failed to insert raw message");

    let row = sqlx::query("SELECT timestamp, raw_hex FROM raw_messages")
        .fetch_one(store.pool())
        .await
        .expect("Failed to retrieve raw message");

    assert_eq!(row.get::<String, _>(0), message.timestamp);
    assert_eq!(row.get::<String, _>(1), "547275636b31");
}

#[tokio::test]
async fn test_insert_gps_record() {
    let (_dir, store) = setup_test_db().await;

    let record = GpsRecord::new("Truck1", "40.7128", "-74.0060");
    store
        .insert_gps(&record)
        .await
        .expect("Failed to insert GPS record");

    let row = sqlx::query("SELECT client_name, latitude, longitude FROM gps_records")
        .fetch_one(store.pool())
        .await
        .expect("Failed to retrieve GPS record");

    assert_eq!(row.get::<String, _>(0), "Truck1");
    assert_eq!(row.get::<String, _>(1), "40.7128");
    assert_eq!(row.get::<String, _>(2), "-74.0060");
}

#[tokio::test]
async fn test_rows_are_appended() {
    let (_dir, store) = setup_test_db().await;

    for i in 0..5 {
        store
            .insert_raw(&RawMessage::new(Local::now(), format!("{i:02x}")))
            .await
            .unwrap();
    }

    let ids: Vec<i64> = sqlx::query("SELECT id FROM raw_messages ORDER BY id")
        .fetch_all(store.pool())
        .await
        .unwrap()
        .iter()
        .map(|row| row.get::<i64, _>(0))
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_reconnect_keeps_existing_tables() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("gps.db").display());

    let first = SqlStore::connect(&url, 1).await.unwrap();
    first
        .insert_gps(&GpsRecord::new("Van", "1", "2"))
        .await
        .unwrap();
    first.close().await;

    let second = SqlStore::connect(&url, 1).await.unwrap();
    let count: i64 = sqlx::query("SELECT COUNT(*) FROM gps_records")
        .fetch_one(second.pool())
        .await
        .unwrap()
        .get(0);
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_failed_write_is_isolated() {
    let (_dir, store) = setup_test_db().await;
    sqlx::query("DROP TABLE raw_messages")
        .execute(store.pool())
        .await
        .unwrap();

    let err = store
        .insert_raw(&RawMessage::new(Local::now(), "00"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        IngestError::Storage {
            table: "raw_messages",
            ..
        }
    ));

    let store = Arc::new(store);
    let persister = Persister::new(store.clone());
    assert!(!persister.write_raw(&RawMessage::new(Local::now(), "00")).await);
    assert!(persister.write_gps(&GpsRecord::new("Van", "1", "2")).await);

    let count: i64 = sqlx::query("SELECT COUNT(*) FROM gps_records")
        .fetch_one(store.pool())
        .await
        .unwrap()
        .get(0);
    assert_eq!(count, 1);
}
