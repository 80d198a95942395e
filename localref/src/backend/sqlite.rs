use super::KeyValueStore;
use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// Key/value persistence in a single SQLite table.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create the store database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = SqliteStore { conn };
        store.initialize_tables()?;
        log::debug!("Opened SQLite store at {}", path.display());
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = SqliteStore { conn };
        store.initialize_tables()?;
        Ok(store)
    }

    fn initialize_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "
        )?;
        Ok(())
    }

    /// When the key was last written, as SQLite's `datetime('now')` text.
    pub fn updated_at(&self, key: &str) -> Result<Option<String>> {
        let result = self.conn.query_row(
            "SELECT updated_at FROM entries WHERE key = ?1",
            params![key],
            |row| row.get(0),
        ).optional()?;
        Ok(result)
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let result = self.conn.query_row(
            "SELECT value FROM entries WHERE key = ?1",
            params![key],
            |row| row.get(0),
        ).optional()?;
        Ok(result)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO entries (key, value, updated_at) VALUES (?1, ?2, datetime('now'))",
            params![key, value],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.conn.execute("DELETE FROM entries WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT key FROM entries ORDER BY key")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_set_and_get() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set("/items", r#"{"documents":{}}"#).unwrap();

        let value = store.get("/items").unwrap().unwrap();
        assert_eq!(value, r#"{"documents":{}}"#);
        assert!(store.updated_at("/items").unwrap().is_some());
    }

    #[test]
    fn test_missing_key_is_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.get("/nothing").unwrap(), None);
        assert_eq!(store.updated_at("/nothing").unwrap(), None);
    }

    #[test]
    fn test_overwrite_and_delete() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set("/counter", "1").unwrap();
        store.set("/counter", "2").unwrap();
        assert_eq!(store.get("/counter").unwrap().as_deref(), Some("2"));

        store.delete("/counter").unwrap();
        assert_eq!(store.get("/counter").unwrap(), None);
        store.delete("/counter").unwrap();
    }

    #[test]
    fn test_keys_sorted() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set("/todos", "{}").unwrap();
        store.set("/counter", "{}").unwrap();
        assert_eq!(store.keys().unwrap(), vec!["/counter", "/todos"]);
    }

    #[test]
    fn test_reopen_from_disk() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("localref.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.set("/counter", r#"{"fields":{"count":4}}"#).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.get("/counter").unwrap().as_deref(),
            Some(r#"{"fields":{"count":4}}"#)
        );
    }
}
