//! SQLite-backed durable key-value store.

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

use hoverlate_core::error::{HoverlateError, Result};
use hoverlate_core::store::{Entries, KvStore};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);";

fn store_err(e: rusqlite::Error) -> HoverlateError {
    HoverlateError::Store(e.to_string())
}

/// SQLite store: one `kv` table of JSON values.
///
/// Tiny footprint and no external services, so the ledger, cache, and
/// settings survive restarts of the host process.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a SQLite database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| HoverlateError::Store(format!("SQLite open error: {}", e)))?;
        Self::init(conn)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| HoverlateError::Store(format!("SQLite error: {}", e)))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| HoverlateError::Store(format!("SQLite init error: {}", e)))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| HoverlateError::Store("SQLite connection lock poisoned".to_string()))
    }
}

/// Decode a stored value, skipping rows that are not valid JSON.
fn decode(key: &str, raw: &str) -> Option<Value> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, "Ignoring unreadable store value: {}", e);
            None
        }
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, keys: &[&str]) -> Result<Entries> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached("SELECT value FROM kv WHERE key = ?1")
            .map_err(store_err)?;

        let mut entries = Entries::new();
        for key in keys {
            let raw: Option<String> = stmt
                .query_row(rusqlite::params![key], |row| row.get(0))
                .optional()
                .map_err(store_err)?;
            if let Some(value) = raw.and_then(|r| decode(key, &r)) {
                entries.insert(key.to_string(), value);
            }
        }
        Ok(entries)
    }

    async fn get_all(&self) -> Result<Entries> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT key, value FROM kv")
            .map_err(store_err)?;

        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(store_err)?;

        let mut entries = Entries::new();
        for row in rows {
            let (key, raw) = row.map_err(store_err)?;
            if let Some(value) = decode(&key, &raw) {
                entries.insert(key, value);
            }
        }
        Ok(entries)
    }

    async fn set(&self, entries: Entries) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(store_err)?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO kv (key, value, updated_at)
                     VALUES (?1, ?2, CURRENT_TIMESTAMP)
                     ON CONFLICT(key) DO UPDATE SET
                        value = excluded.value,
                        updated_at = CURRENT_TIMESTAMP",
                )
                .map_err(store_err)?;
            for (key, value) in &entries {
                stmt.execute(rusqlite::params![key, value.to_string()])
                    .map_err(store_err)?;
            }
        }
        tx.commit().map_err(store_err)
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(store_err)?;
        {
            let mut stmt = tx
                .prepare_cached("DELETE FROM kv WHERE key = ?1")
                .map_err(store_err)?;
            for key in keys {
                stmt.execute(rusqlite::params![key]).map_err(store_err)?;
            }
        }
        tx.commit().map_err(store_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .set(Entries::from([
                ("dailyLimit_m".to_string(), json!({ "expiry": 1234 })),
                ("failureCount_m".to_string(), json!(2)),
            ]))
            .await
            .unwrap();

        let got = store.get(&["dailyLimit_m", "missing"]).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got["dailyLimit_m"]["expiry"], 1234);

        store.set_one("failureCount_m", json!(3)).await.unwrap();
        assert_eq!(store.get_one("failureCount_m").await.unwrap(), Some(json!(3)));

        store.remove(&["failureCount_m", "missing"]).await.unwrap();
        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all.contains_key("dailyLimit_m"));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("hoverlate.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .set_one("cache_44GT44KT", json!({ "translation": "Hello" }))
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let value = store.get_one("cache_44GT44KT").await.unwrap().unwrap();
        assert_eq!(value["translation"], "Hello");
    }

    #[tokio::test]
    async fn test_unreadable_rows_are_skipped() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO kv (key, value) VALUES ('broken', '{not json')",
                [],
            )
            .unwrap();
        store.set_one("ok", json!(true)).await.unwrap();

        assert!(store.get_one("broken").await.unwrap().is_none());
        assert_eq!(store.get_all().await.unwrap().len(), 1);
    }
}
