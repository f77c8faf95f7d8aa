// Local cache: one serialized list per key, SQLite backed

use crate::entry::{self, Entry, ListName};
use eyre::{Context, Result, eyre};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use tracing::{debug, warn};

/// Key-value storage for serialized lists
///
/// Implementors only provide raw string access. `get` and `put` layer the
/// list semantics on top: unreadable or corrupt values read as an empty list,
/// and a write always replaces the whole list.
pub trait LocalCache: Send {
    /// Raw stored value for `key`, if any
    fn read(&self, key: &str) -> Result<Option<String>>;

    /// Replace the value for `key` in a single step
    fn write(&mut self, key: &str, value: &str) -> Result<()>;

    /// Read a list. Missing, unreadable and corrupt data all read as empty.
    fn get(&self, list: ListName) -> Vec<Entry> {
        let key = list.storage_key();
        let raw = match self.read(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(key, error = ?e, "Failed to read list from cache, treating as empty");
                return Vec::new();
            }
        };

        match entry::deserialize_list(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(key, error = %e, "Stored list is corrupt, treating as empty");
                Vec::new()
            }
        }
    }

    /// Serialize and store a whole list. Returns the payload written.
    fn put(&mut self, list: ListName, entries: &[Entry]) -> Result<String> {
        let payload = entry::serialize_list(entries).context("Failed to serialize list")?;
        self.write(list.storage_key(), &payload)?;
        Ok(payload)
    }
}

/// Cache backed by a single SQLite table
pub struct SqliteCache {
    db: Connection,
}

impl SqliteCache {
    /// Open or create the cache database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Connection::open(path.as_ref()).context("Failed to open SQLite database")?;
        Self::with_connection(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        Self::with_connection(db)
    }

    fn with_connection(db: Connection) -> Result<Self> {
        let cache = Self { db };
        cache.create_schema()?;
        Ok(cache)
    }

    fn create_schema(&self) -> Result<()> {
        debug!("Creating cache schema");

        self.db
            .execute_batch(
                r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
            )
            .context("Failed to create cache schema")?;

        Ok(())
    }

    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(eyre!("Cache key cannot be empty"));
        }
        if key.len() > 64 {
            return Err(eyre!("Cache key too long: {} (max 64 chars)", key));
        }
        if !key.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
            return Err(eyre!("Invalid cache key: {} (must be alphanumeric with _/-)", key));
        }
        Ok(())
    }
}

impl LocalCache for SqliteCache {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .db
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
            .optional()
            .context("Failed to read from cache")?;
        Ok(value)
    }

    fn write(&mut self, key: &str, value: &str) -> Result<()> {
        Self::validate_key(key)?;

        let tx = self.db.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![key, value, crate::now_ms()],
        )
        .context("Failed to write to cache")?;
        tx.commit()?;

        debug!(key, bytes = value.len(), "Cache write");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::NewEntry;
    use chrono::Utc;
    use tempfile::TempDir;

    fn entries(texts: &[&str]) -> Vec<Entry> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| NewEntry::new(*text).into_entry(format!("id-{}", i), Utc::now()))
            .collect()
    }

    #[test]
    fn test_get_missing_list_is_empty() {
        let cache = SqliteCache::open_in_memory().unwrap();
        assert!(cache.get(ListName::Daily).is_empty());
        assert!(cache.read("clarity_daily_tasks").unwrap().is_none());
    }

    #[test]
    fn test_put_then_get_preserves_order() {
        let mut cache = SqliteCache::open_in_memory().unwrap();
        let list = entries(&["first", "second", "third"]);

        let payload = cache.put(ListName::Weekly, &list).unwrap();
        assert_eq!(cache.read("clarity_weekly_goals").unwrap(), Some(payload));

        let back = cache.get(ListName::Weekly);
        let texts: Vec<_> = back.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_put_replaces_whole_list() {
        let mut cache = SqliteCache::open_in_memory().unwrap();
        cache.put(ListName::Daily, &entries(&["a", "b", "c"])).unwrap();
        cache.put(ListName::Daily, &entries(&["z"])).unwrap();

        let back = cache.get(ListName::Daily);
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].text, "z");
    }

    #[test]
    fn test_corrupt_value_reads_as_empty() {
        let mut cache = SqliteCache::open_in_memory().unwrap();
        cache.write("clarity_monthly_goals", "{not json").unwrap();

        assert!(cache.get(ListName::Monthly).is_empty());
    }

    #[test]
    fn test_lists_are_independent() {
        let mut cache = SqliteCache::open_in_memory().unwrap();
        cache.put(ListName::Daily, &entries(&["task"])).unwrap();
        cache.put(ListName::Reflections, &entries(&["note", "note 2"])).unwrap();

        assert_eq!(cache.get(ListName::Daily).len(), 1);
        assert_eq!(cache.get(ListName::Reflections).len(), 2);
        assert!(cache.read("clarity_weekly_goals").unwrap().is_none());
    }

    #[test]
    fn test_persists_across_reopen() {
        let temp = TempDir::new().unwrap();
        let db_path = temp.path().join("cache.db");

        {
            let mut cache = SqliteCache::open(&db_path).unwrap();
            cache.put(ListName::Daily, &entries(&["kept"])).unwrap();
        }

        let cache = SqliteCache::open(&db_path).unwrap();
        assert_eq!(cache.get(ListName::Daily)[0].text, "kept");
    }

    #[test]
    fn test_validate_key() {
        assert!(SqliteCache::validate_key("clarity_daily_tasks").is_ok());
        assert!(SqliteCache::validate_key("with-dash").is_ok());

        assert!(SqliteCache::validate_key("").is_err());
        assert!(SqliteCache::validate_key("bad/key").is_err());
        assert!(SqliteCache::validate_key(&"a".repeat(65)).is_err());
    }
}
