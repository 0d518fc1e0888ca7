//! SQLite-backed persistence.
//!
//! Keeps every table in a single database file so the CLI can be invoked
//! repeatedly against the same local state.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use omnisync_common::{Error, Result};

use crate::backend::Backend;

fn storage(err: rusqlite::Error) -> Error {
    Error::Storage(err.to_string())
}

/// Backend over a SQLite database.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Create or open a database file.
    ///
    /// # Errors
    /// - Database creation or schema initialization failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref()).map_err(storage)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                tbl TEXT NOT NULL,
                id INTEGER NOT NULL,
                lookup TEXT,
                data TEXT NOT NULL,
                PRIMARY KEY (tbl, id)
            );

            CREATE TABLE IF NOT EXISTS sequences (
                tbl TEXT PRIMARY KEY,
                last_id INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS run_locks (
                key TEXT PRIMARY KEY,
                token TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_documents_lookup ON documents(tbl, lookup);
            "#,
        )
        .map_err(storage)?;

        info!(path = %db_path.as_ref().display(), "Local store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("SQLite connection lock poisoned".to_string()))
    }
}

impl Backend for SqliteBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn next_id(&self, table: &str) -> Result<i64> {
        let conn = self.conn()?;
        conn.query_row(
            r#"
            INSERT INTO sequences (tbl, last_id) VALUES (?1, 1)
            ON CONFLICT(tbl) DO UPDATE SET last_id = last_id + 1
            RETURNING last_id
            "#,
            params![table],
            |row| row.get(0),
        )
        .map_err(storage)
    }

    fn put(&self, table: &str, id: i64, lookup: Option<&str>, data: &str) -> Result<()> {
        debug!(table, id, "Upserting document");
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO documents (tbl, id, lookup, data)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![table, id, lookup, data],
        )
        .map_err(storage)?;
        Ok(())
    }

    fn get(&self, table: &str, id: i64) -> Result<Option<String>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT data FROM documents WHERE tbl = ?1 AND id = ?2",
            params![table, id],
            |row| row.get(0),
        )
        .optional()
        .map_err(storage)
    }

    fn find(&self, table: &str, lookup: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        conn.query_row(
            r#"
            SELECT data FROM documents
            WHERE tbl = ?1 AND lookup = ?2
            ORDER BY id LIMIT 1
            "#,
            params![table, lookup],
            |row| row.get(0),
        )
        .optional()
        .map_err(storage)
    }

    fn scan(&self, table: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT data FROM documents WHERE tbl = ?1 ORDER BY id")
            .map_err(storage)?;
        let rows = stmt
            .query_map(params![table], |row| row.get(0))
            .map_err(storage)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row.map_err(storage)?);
        }
        Ok(result)
    }

    fn delete(&self, table: &str, id: i64) -> Result<bool> {
        debug!(table, id, "Deleting document");
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "DELETE FROM documents WHERE tbl = ?1 AND id = ?2",
                params![table, id],
            )
            .map_err(storage)?;
        Ok(changed > 0)
    }

    fn lock_holder(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT token FROM run_locks WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(storage)
    }

    fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(storage)?;

        let current: Option<String> = tx
            .query_row(
                "SELECT token FROM run_locks WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage)?;
        if current.as_deref() != expected {
            return Ok(false);
        }

        let written = match new {
            Some(token) => tx.execute(
                "INSERT OR REPLACE INTO run_locks (key, token) VALUES (?1, ?2)",
                params![key, token],
            ),
            None => tx.execute("DELETE FROM run_locks WHERE key = ?1", params![key]),
        };
        written.map_err(storage)?;

        tx.commit().map_err(storage)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_documents_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.db");

        {
            let backend = SqliteBackend::open(&path).unwrap();
            let id = backend.next_id("products").unwrap();
            backend.put("products", id, Some("SKU-1"), r#"{"name":"Drill"}"#).unwrap();
        }

        let backend = SqliteBackend::open(&path).unwrap();
        assert_eq!(
            backend.find("products", "SKU-1").unwrap().as_deref(),
            Some(r#"{"name":"Drill"}"#)
        );
        assert_eq!(backend.next_id("products").unwrap(), 2);
    }

    #[test]
    fn test_scan_and_delete() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.put("runs", 2, None, "b").unwrap();
        backend.put("runs", 1, None, "a").unwrap();
        assert_eq!(backend.scan("runs").unwrap(), vec!["a", "b"]);

        assert!(backend.delete("runs", 1).unwrap());
        assert!(!backend.delete("runs", 1).unwrap());
        assert_eq!(backend.get("runs", 1).unwrap(), None);
    }

    #[test]
    fn test_compare_and_set() {
        let backend = SqliteBackend::in_memory().unwrap();
        assert!(backend.compare_and_set("config:1", None, Some("t1")).unwrap());
        assert!(!backend.compare_and_set("config:1", None, Some("t2")).unwrap());
        assert_eq!(backend.lock_holder("config:1").unwrap().as_deref(), Some("t1"));
        assert!(backend.compare_and_set("config:1", Some("t1"), None).unwrap());
        assert_eq!(backend.lock_holder("config:1").unwrap(), None);
    }
}
