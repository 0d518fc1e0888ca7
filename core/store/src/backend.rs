//! Persistence backend trait and the in-memory implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use omnisync_common::{Error, Result};

/// Raw document persistence.
///
/// Documents are opaque JSON strings grouped by table. Ids are assigned by
/// [`Backend::next_id`] and are unique and increasing per table. Scans return
/// documents in id order.
pub trait Backend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Allocate the next id for `table`.
    fn next_id(&self, table: &str) -> Result<i64>;

    /// Insert or replace a document.
    fn put(&self, table: &str, id: i64, lookup: Option<&str>, data: &str) -> Result<()>;

    /// Fetch a document by id.
    fn get(&self, table: &str, id: i64) -> Result<Option<String>>;

    /// Fetch the lowest-id document carrying `lookup`.
    fn find(&self, table: &str, lookup: &str) -> Result<Option<String>>;

    /// All documents of `table`, in id order.
    fn scan(&self, table: &str) -> Result<Vec<String>>;

    /// Delete a document. Returns whether it existed.
    fn delete(&self, table: &str, id: i64) -> Result<bool>;

    /// Current holder of a named lock.
    fn lock_holder(&self, key: &str) -> Result<Option<String>>;

    /// Atomically replace the holder of `key` if it currently equals
    /// `expected`. `None` means unheld. Returns whether the swap happened.
    fn compare_and_set(&self, key: &str, expected: Option<&str>, new: Option<&str>)
        -> Result<bool>;
}

#[derive(Debug, Default)]
struct Document {
    lookup: Option<String>,
    data: String,
}

#[derive(Debug, Default)]
struct Tables {
    documents: HashMap<String, BTreeMap<i64, Document>>,
    sequences: HashMap<String, i64>,
    locks: HashMap<String, String>,
}

/// In-memory backend.
///
/// Useful for testing. All data is lost on drop.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| Error::Storage("Memory backend lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| Error::Storage("Memory backend lock poisoned".to_string()))
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn next_id(&self, table: &str) -> Result<i64> {
        let mut tables = self.write()?;
        let last = tables.sequences.entry(table.to_string()).or_insert(0);
        *last += 1;
        Ok(*last)
    }

    fn put(&self, table: &str, id: i64, lookup: Option<&str>, data: &str) -> Result<()> {
        let mut tables = self.write()?;
        tables.documents.entry(table.to_string()).or_default().insert(
            id,
            Document {
                lookup: lookup.map(str::to_string),
                data: data.to_string(),
            },
        );
        Ok(())
    }

    fn get(&self, table: &str, id: i64) -> Result<Option<String>> {
        let tables = self.read()?;
        Ok(tables
            .documents
            .get(table)
            .and_then(|docs| docs.get(&id))
            .map(|doc| doc.data.clone()))
    }

    fn find(&self, table: &str, lookup: &str) -> Result<Option<String>> {
        let tables = self.read()?;
        Ok(tables.documents.get(table).and_then(|docs| {
            docs.values()
                .find(|doc| doc.lookup.as_deref() == Some(lookup))
                .map(|doc| doc.data.clone())
        }))
    }

    fn scan(&self, table: &str) -> Result<Vec<String>> {
        let tables = self.read()?;
        Ok(tables
            .documents
            .get(table)
            .map(|docs| docs.values().map(|doc| doc.data.clone()).collect())
            .unwrap_or_default())
    }

    fn delete(&self, table: &str, id: i64) -> Result<bool> {
        let mut tables = self.write()?;
        Ok(tables
            .documents
            .get_mut(table)
            .and_then(|docs| docs.remove(&id))
            .is_some())
    }

    fn lock_holder(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read()?.locks.get(key).cloned())
    }

    fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> Result<bool> {
        let mut tables = self.write()?;
        if tables.locks.get(key).map(String::as_str) != expected {
            return Ok(false);
        }
        match new {
            Some(token) => tables.locks.insert(key.to_string(), token.to_string()),
            None => tables.locks.remove(key),
        };
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_increase_per_table() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.next_id("products").unwrap(), 1);
        assert_eq!(backend.next_id("products").unwrap(), 2);
        assert_eq!(backend.next_id("invoices").unwrap(), 1);
    }

    #[test]
    fn test_find_returns_lowest_id() {
        let backend = MemoryBackend::new();
        backend.put("products", 5, Some("SKU"), "five").unwrap();
        backend.put("products", 2, Some("SKU"), "two").unwrap();
        backend.put("products", 3, None, "three").unwrap();

        assert_eq!(backend.find("products", "SKU").unwrap().as_deref(), Some("two"));
        assert_eq!(backend.scan("products").unwrap(), vec!["two", "three", "five"]);
    }

    #[test]
    fn test_compare_and_set() {
        let backend = MemoryBackend::new();
        assert!(backend.compare_and_set("cfg:1", None, Some("a")).unwrap());
        assert!(!backend.compare_and_set("cfg:1", None, Some("b")).unwrap());
        assert!(!backend.compare_and_set("cfg:1", Some("b"), None).unwrap());
        assert!(backend.compare_and_set("cfg:1", Some("a"), None).unwrap());
        assert_eq!(backend.lock_holder("cfg:1").unwrap(), None);
    }
}
