use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use tracing::warn;

/// Generic namespaced key-value store backing settings and the persisted cache tier.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;

    fn get_or(&self, key: &str, fallback: Value) -> Result<Value> {
        Ok(self.get(key)?.unwrap_or(fallback))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let items = self.items.lock().expect("memory store lock poisoned");
        Ok(items.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut items = self.items.lock().expect("memory store lock poisoned");
        items.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut items = self.items.lock().expect("memory store lock poisoned");
        items.remove(key);
        Ok(())
    }
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open sqlite store {}", path.display()))?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite store")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

impl KvStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let conn = self.conn.lock().expect("sqlite store lock poisoned");
        let raw: Option<String> = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
            .with_context(|| format!("read key {key}"))?;
        match raw {
            Some(raw) => {
                let value = serde_json::from_str(&raw)
                    .with_context(|| format!("decode stored value for {key}"))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let raw = serde_json::to_string(&value).context("encode stored value")?;
        let conn = self.conn.lock().expect("sqlite store lock poisoned");
        conn.execute(
            r#"
            INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            params![key, raw, Utc::now().to_rfc3339()],
        )
        .with_context(|| format!("write key {key}"))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite store lock poisoned");
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
            .with_context(|| format!("remove key {key}"))?;
        Ok(())
    }
}

/// SQLite at `path` when given (`.json` paths get a `JsonFileStore`), memory otherwise or when
/// the database cannot be opened.
pub fn open_store(path: Option<&Path>) -> Arc<dyn KvStore> {
    let Some(path) = path else {
        return Arc::new(MemoryStore::new());
    };
    if path.extension().is_some_and(|ext| ext == "json") {
        return Arc::new(JsonFileStore::new(path));
    }
    match SqliteStore::open(path) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "store unavailable, using memory");
            Arc::new(MemoryStore::new())
        }
    }
}

/// Whole-file JSON store. Every write rewrites the file through a tmp + rename swap.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> HashMap<String, Value> {
        let Ok(raw) = fs::read_to_string(&self.path) else {
            return HashMap::new();
        };
        serde_json::from_str(&raw).unwrap_or_default()
    }

    fn save(&self, items: &HashMap<String, Value>) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).ok();
        }
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string(items).context("serialize json store")?;
        fs::write(&tmp, json).context("write json store")?;
        fs::rename(&tmp, &self.path).context("swap json store")?;
        Ok(())
    }
}

impl KvStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let _guard = self.lock.lock().expect("json store lock poisoned");
        Ok(self.load().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.lock.lock().expect("json store lock poisoned");
        let mut items = self.load();
        items.insert(key.to_string(), value);
        self.save(&items)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().expect("json store lock poisoned");
        let mut items = self.load();
        if items.remove(key).is_some() {
            self.save(&items)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn exercise(store: &dyn KvStore) {
        assert_eq!(store.get("missing").unwrap(), None);
        assert_eq!(
            store.get_or("missing", json!({"enabled": true})).unwrap(),
            json!({"enabled": true})
        );
        store.set("a", json!({"n": 1})).unwrap();
        store.set("a", json!({"n": 2})).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(json!({"n": 2})));
        store.remove("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn memory_store_contract() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn sqlite_store_contract() {
        exercise(&SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.sqlite");
        SqliteStore::open(&path)
            .unwrap()
            .set("player:abc", json!("x"))
            .unwrap();
        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.get("player:abc").unwrap(), Some(json!("x")));
    }

    #[test]
    fn json_file_store_contract() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&JsonFileStore::new(dir.path().join("store.json")));
    }

    #[test]
    fn open_store_picks_backend_by_path() {
        exercise(open_store(None).as_ref());

        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("settings.json");
        open_store(Some(&json_path)).set("k", json!(1)).unwrap();
        assert!(json_path.exists());

        let db_path = dir.path().join("store.sqlite");
        open_store(Some(&db_path)).set("k", json!(2)).unwrap();
        assert_eq!(SqliteStore::open(&db_path).unwrap().get("k").unwrap(), Some(json!(2)));
    }
}
