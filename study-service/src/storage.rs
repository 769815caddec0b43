//! Key-value storage backends.
//!
//! Everything the service persists lives in a flat key → JSON value space
//! (`folders`, `quizzes`, `summaries`, `settings`, `videos`, ...). Callers
//! read a set of keys and write back a mapping; absent keys are simply
//! missing from the returned map. Appends and edits to a collection go
//! through [`KeyValueStore::update`] so concurrent writers never drop
//! each other's records.

use crate::error::StorageError;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::Mutex;

const UPSERT_SQL: &str = "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at";

/// Edit applied to one key's current value (`Value::Null` when absent).
/// Returning an error leaves the stored value untouched.
pub type Update<'a> = Box<dyn FnOnce(&mut Value) -> Result<(), StorageError> + Send + 'a>;

/// Awaitable key-value interface every module persists through
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the given keys; keys with no stored value are absent from the result
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StorageError>;

    /// Write every entry of the mapping, replacing previous values
    async fn set(&self, items: Map<String, Value>) -> Result<(), StorageError>;

    /// Read, edit and write back one key with no other writer in between
    async fn update(&self, key: &str, apply: Update<'_>) -> Result<(), StorageError>;
}

/// SQLite-backed store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StorageError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached("SELECT value FROM kv WHERE key = ?1")?;

        let mut result = Map::new();
        for key in keys {
            let raw: Option<String> = stmt
                .query_row(params![key], |row| row.get(0))
                .optional()?;
            if let Some(raw) = raw {
                result.insert((*key).to_string(), serde_json::from_str(&raw)?);
            }
        }
        Ok(result)
    }

    async fn set(&self, items: Map<String, Value>) -> Result<(), StorageError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        for (key, value) in &items {
            let raw = serde_json::to_string(value)?;
            tx.execute(UPSERT_SQL, params![key, raw])?;
        }

        tx.commit()?;
        Ok(())
    }

    async fn update(&self, key: &str, apply: Update<'_>) -> Result<(), StorageError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let raw: Option<String> = tx
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        let mut value = match raw {
            Some(raw) => serde_json::from_str(&raw)?,
            None => Value::Null,
        };

        // Dropping the transaction on error rolls it back
        apply(&mut value)?;
        tx.execute(UPSERT_SQL, params![key, serde_json::to_string(&value)?])?;
        tx.commit()?;
        Ok(())
    }
}

/// Process-local store, used by tests and as a scratch backend
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StorageError> {
        let values = self.values.lock().await;
        Ok(keys
            .iter()
            .filter_map(|key| values.get(*key).map(|v| ((*key).to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, items: Map<String, Value>) -> Result<(), StorageError> {
        let mut values = self.values.lock().await;
        values.extend(items);
        Ok(())
    }

    async fn update(&self, key: &str, apply: Update<'_>) -> Result<(), StorageError> {
        let mut values = self.values.lock().await;
        let mut value = values.get(key).cloned().unwrap_or(Value::Null);
        apply(&mut value)?;
        values.insert(key.to_string(), value);
        Ok(())
    }
}

/// Atomically edit the object stored under `key`, treating anything else as empty
pub async fn update_object<T, F>(kv: &dyn KeyValueStore, key: &str, edit: F) -> Result<T, StorageError>
where
    T: Send,
    F: FnOnce(&mut Map<String, Value>) -> Result<T, StorageError> + Send,
{
    let mut output = None;
    kv.update(
        key,
        Box::new(|value: &mut Value| {
            let mut map = match value.take() {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            let result = edit(&mut map);
            *value = Value::Object(map);
            output = Some(result?);
            Ok(())
        }),
    )
    .await?;
    output.ok_or(StorageError::NotFound("Updated value"))
}

/// Atomically edit the array stored under `key`, treating anything else as empty
pub async fn update_array<T, F>(kv: &dyn KeyValueStore, key: &str, edit: F) -> Result<T, StorageError>
where
    T: Send,
    F: FnOnce(&mut Vec<Value>) -> Result<T, StorageError> + Send,
{
    let mut output = None;
    kv.update(
        key,
        Box::new(|value: &mut Value| {
            let mut items = match value.take() {
                Value::Array(items) => items,
                _ => Vec::new(),
            };
            let result = edit(&mut items);
            *value = Value::Array(items);
            output = Some(result?);
            Ok(())
        }),
    )
    .await?;
    output.ok_or(StorageError::NotFound("Updated value"))
}

/// Build a single-entry mapping for `set`
pub fn entry(key: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_sqlite_set_and_get() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .set(entry("settings", json!({"language": "english"})))
            .await
            .unwrap();

        let result = store.get(&["settings", "folders"]).await.unwrap();
        assert_eq!(result["settings"]["language"], "english");
        assert!(!result.contains_key("folders"));
    }

    #[tokio::test]
    async fn test_sqlite_overwrite() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set(entry("quizzes", json!([1]))).await.unwrap();
        store.set(entry("quizzes", json!([1, 2]))).await.unwrap();

        let result = store.get(&["quizzes"]).await.unwrap();
        assert_eq!(result["quizzes"], json!([1, 2]));
    }

    #[tokio::test]
    async fn test_sqlite_persists_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("study.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.set(entry("folders", json!({"Science": []}))).await.unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        let result = reopened.get(&["folders"]).await.unwrap();
        assert_eq!(result["folders"], json!({"Science": []}));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_are_all_kept() {
        let store = std::sync::Arc::new(SqliteStore::open_in_memory().unwrap());
        let mut tasks = Vec::new();
        for i in 0..50 {
            let store = std::sync::Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                update_array(store.as_ref(), "quizzes", |items| {
                    items.push(json!(i));
                    Ok(items.len())
                })
                .await
                .unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let result = store.get(&["quizzes"]).await.unwrap();
        assert_eq!(result["quizzes"].as_array().unwrap().len(), 50);
    }

    #[tokio::test]
    async fn test_failed_update_leaves_value() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set(entry("folders", json!({"Science": []}))).await.unwrap();

        let failed: Result<(), _> = update_object(&store, "folders", |folders| {
            folders.clear();
            Err(StorageError::NotFound("Flashcard"))
        })
        .await;
        assert!(matches!(failed, Err(StorageError::NotFound("Flashcard"))));

        let result = store.get(&["folders"]).await.unwrap();
        assert_eq!(result["folders"], json!({"Science": []}));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        store.set(entry("a", json!(1))).await.unwrap();
        let result = store.get(&["a", "b"]).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result["a"], 1);
    }
}
