use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use logingest_core::LogEntry;
use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::db;
use crate::error::{Result, StoreError};

/// Destination for normalized log entries.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Persist `entries` atomically: either all rows are written or none.
    /// Returns the number of rows written.
    async fn insert_batch(&self, entries: Vec<LogEntry>) -> Result<usize>;
}

type SharedConnection = Arc<Mutex<Option<Connection>>>;

/// SQLite-backed log store shared by every job.
///
/// One connection behind a mutex; inserts run on the blocking pool so the
/// scheduler's async workers never wait on disk I/O. `close()` drops the
/// connection and every later operation fails with [`StoreError::Closed`].
#[derive(Clone)]
pub struct LogStore {
    conn: SharedConnection,
}

impl LogStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=3000;")?;
        info!(path = %path.display(), "log store opened");
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        }
    }

    /// Create the `logs` table and indexes if they do not exist yet.
    pub fn ensure_schema(&self) -> Result<()> {
        with_conn(&self.conn, |conn| Ok(db::init_db(conn)?))?;
        info!("log store schema ready");
        Ok(())
    }

    /// Number of rows in `logs`.
    pub fn count(&self) -> Result<u64> {
        with_conn(&self.conn, |conn| {
            Ok(conn.query_row("SELECT count(*) FROM logs", [], |row| row.get(0))?)
        })
    }

    /// Drop the connection. Closing twice is harmless.
    pub fn close(&self) {
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(conn) = conn {
            if let Err((_, e)) = conn.close() {
                tracing::warn!(error = %e, "log store did not close cleanly");
            }
            info!("log store closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

#[async_trait]
impl LogSink for LogStore {
    async fn insert_batch(&self, entries: Vec<LogEntry>) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || with_conn(&conn, |conn| insert_rows(conn, &entries)))
            .await?
    }
}

fn with_conn<T>(
    conn: &Mutex<Option<Connection>>,
    f: impl FnOnce(&mut Connection) -> Result<T>,
) -> Result<T> {
    let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
    let conn = guard.as_mut().ok_or(StoreError::Closed)?;
    f(conn)
}

/// Insert every entry inside one transaction. An error on any row drops the
/// transaction uncommitted, which rolls back the rows before it.
fn insert_rows(conn: &mut Connection, entries: &[LogEntry]) -> Result<usize> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO logs (source, product, event_type, severity, timestamp, raw_data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for entry in entries {
            stmt.execute(params![
                entry.source,
                entry.product,
                entry.event_type,
                entry.severity,
                entry.timestamp_rfc3339(),
                entry.raw_data,
            ])?;
        }
    }
    tx.commit()?;
    debug!(rows = entries.len(), "log batch committed");
    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(source: &str, raw: serde_json::Value) -> LogEntry {
        LogEntry::new(source, "product", "api_request", "info", &raw)
    }

    fn store() -> LogStore {
        let store = LogStore::open_in_memory().unwrap();
        store.ensure_schema().unwrap();
        store
    }

    #[tokio::test]
    async fn batch_is_written() {
        let store = store();
        let written = store
            .insert_batch(vec![entry("a", json!({"id": 1})), entry("a", json!("plain"))])
            .await
            .unwrap();
        assert_eq!(written, 2);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn one_bad_entry_rolls_back_the_batch() {
        let store = store();
        let batch = vec![
            entry("svc", json!({"id": 1})),
            entry("svc", json!({"id": 2})),
            entry("svc", json!({"id": 3})),
            entry("", json!({"id": 4})),
        ];
        let err = store.insert_batch(batch).await.unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn malformed_raw_data_rolls_back_the_batch() {
        let store = store();
        let mut bad = entry("svc", json!({}));
        bad.raw_data = "{not json".to_string();
        let result = store.insert_batch(vec![entry("svc", json!(1)), bad]).await;
        assert!(result.is_err());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let store = store();
        assert_eq!(store.insert_batch(Vec::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stored_row_keeps_fields() {
        let store = store();
        let e = entry("svc", json!({"id": 1, "title": "Test"}));
        store.insert_batch(vec![e.clone()]).await.unwrap();

        let (source, ts, raw): (String, String, String) = with_conn(&store.conn, |conn| {
            Ok(conn.query_row(
                "SELECT source, timestamp, raw_data FROM logs",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?)
        })
        .unwrap();
        assert_eq!(source, "svc");
        assert_eq!(ts, e.timestamp_rfc3339());
        let raw: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(raw, json!({"id": 1, "title": "Test"}));
    }

    #[tokio::test]
    async fn operations_after_close_fail() {
        let store = store();
        store.close();
        store.close();
        assert!(store.is_closed());
        assert!(matches!(store.count(), Err(StoreError::Closed)));
        assert!(matches!(store.ensure_schema(), Err(StoreError::Closed)));
        let err = store
            .insert_batch(vec![entry("svc", json!({}))])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Closed));
    }

    #[tokio::test]
    async fn rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.db");

        let store = LogStore::open(&path).unwrap();
        store.ensure_schema().unwrap();
        store.insert_batch(vec![entry("svc", json!([1, 2]))]).await.unwrap();
        store.close();

        let reopened = LogStore::open(&path).unwrap();
        reopened.ensure_schema().unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_batches_serialize() {
        let store = store();
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .insert_batch(vec![entry("svc", json!({"batch": i})); 5])
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 5);
        }
        assert_eq!(store.count().unwrap(), 40);
    }
}
