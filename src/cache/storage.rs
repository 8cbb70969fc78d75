//! Durable cache mirror: storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::entry::CacheEntry;

/// Trait for durable cache backends.
///
/// The store mirrors every cache write into a backend so cached results
/// survive restarts. Backends are only ever touched while the store lock is
/// held, so implementations need not order concurrent writes themselves.
pub trait CacheStorage: Send + Sync {
  /// Load every non-expired entry.
  fn load_all(&self) -> Result<Vec<CacheEntry>>;

  /// Insert or replace an entry.
  fn store(&self, entry: &CacheEntry) -> Result<()>;

  /// Remove the given keys.
  fn remove(&self, keys: &[String]) -> Result<()>;

  /// Remove everything.
  fn clear(&self) -> Result<()>;
}

/// Storage implementation that doesn't persist anything.
/// Used when the durable mirror is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn load_all(&self) -> Result<Vec<CacheEntry>> {
    Ok(Vec::new())
  }

  fn store(&self, _entry: &CacheEntry) -> Result<()> {
    Ok(())
  }

  fn remove(&self, _keys: &[String]) -> Result<()> {
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    Ok(())
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the cache database at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open (or create) the cache database at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("padel-sync").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    expires_at TEXT,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_expires
    ON cache_entries(expires_at);
"#;

impl CacheStorage for SqliteStorage {
  fn load_all(&self) -> Result<Vec<CacheEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT key, value, expires_at FROM cache_entries ORDER BY key")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, Vec<u8>, Option<String>)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
      .map_err(|e| eyre!("Failed to query cache entries: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let now = Utc::now();
    let mut entries = Vec::with_capacity(rows.len());
    for (key, data, expires_at) in rows {
      let value = match serde_json::from_slice(&data) {
        Ok(value) => value,
        Err(e) => {
          tracing::warn!(%key, "Skipping undecodable cache entry: {}", e);
          continue;
        }
      };
      let expires_at = match expires_at.as_deref().map(parse_datetime).transpose() {
        Ok(expires_at) => expires_at,
        Err(e) => {
          tracing::warn!(%key, "Skipping cache entry with bad expiry: {}", e);
          continue;
        }
      };
      let entry = CacheEntry {
        key,
        value,
        expires_at,
      };
      if !entry.is_expired_at(now) {
        entries.push(entry);
      }
    }

    Ok(entries)
  }

  fn store(&self, entry: &CacheEntry) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let data =
      serde_json::to_vec(&entry.value).map_err(|e| eyre!("Failed to serialize entry: {}", e))?;
    let expires_at = entry.expires_at.map(|at| at.to_rfc3339());

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (key, value, expires_at, cached_at)
         VALUES (?, ?, ?, datetime('now'))",
        params![entry.key, data, expires_at],
      )
      .map_err(|e| eyre!("Failed to store cache entry {}: {}", entry.key, e))?;

    Ok(())
  }

  fn remove(&self, keys: &[String]) -> Result<()> {
    if keys.is_empty() {
      return Ok(());
    }

    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    for key in keys {
      tx.execute("DELETE FROM cache_entries WHERE key = ?", params![key])
        .map_err(|e| eyre!("Failed to remove cache entry {}: {}", key, e))?;
    }
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn clear(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM cache_entries", [])
      .map_err(|e| eyre!("Failed to clear cache: {}", e))?;

    Ok(())
  }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::time::Duration;

  fn temp_storage() -> (tempfile::TempDir, SqliteStorage) {
    let dir = tempfile::tempdir().unwrap();
    let storage = SqliteStorage::open_at(&dir.path().join("cache.db")).unwrap();
    (dir, storage)
  }

  #[test]
  fn test_store_and_load() {
    let (_dir, storage) = temp_storage();
    storage
      .store(&CacheEntry::new("client:7", json!({"name": "Ana"}), None))
      .unwrap();

    let entries = storage.load_all().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key, "client:7");
    assert_eq!(entries[0].value, json!({"name": "Ana"}));
    assert_eq!(entries[0].expires_at, None);
  }

  #[test]
  fn test_load_skips_expired_entries() {
    let (_dir, storage) = temp_storage();
    storage
      .store(&CacheEntry::new("fresh", json!(1), Some(Duration::from_secs(3600))))
      .unwrap();
    storage
      .store(&CacheEntry {
        key: "stale".to_string(),
        value: json!(2),
        expires_at: Some(Utc::now() - chrono::Duration::seconds(5)),
      })
      .unwrap();

    let keys: Vec<String> = storage.load_all().unwrap().into_iter().map(|e| e.key).collect();
    assert_eq!(keys, vec!["fresh"]);
  }

  #[test]
  fn test_load_skips_rows_with_bad_expiry() {
    let (_dir, storage) = temp_storage();
    storage.store(&CacheEntry::new("court:1", json!(1), None)).unwrap();
    storage
      .conn
      .lock()
      .unwrap()
      .execute(
        "INSERT INTO cache_entries (key, value, expires_at) VALUES ('court:2', X'32', 'tomorrow')",
        [],
      )
      .unwrap();

    let keys: Vec<String> = storage.load_all().unwrap().into_iter().map(|e| e.key).collect();
    assert_eq!(keys, vec!["court:1"]);
  }

  #[test]
  fn test_store_replaces_existing_key() {
    let (_dir, storage) = temp_storage();
    storage.store(&CacheEntry::new("k", json!(1), None)).unwrap();
    storage.store(&CacheEntry::new("k", json!(2), None)).unwrap();

    let entries = storage.load_all().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].value, json!(2));
  }

  #[test]
  fn test_remove_and_clear() {
    let (_dir, storage) = temp_storage();
    for key in ["a", "b", "c"] {
      storage.store(&CacheEntry::new(key, json!(key), None)).unwrap();
    }

    storage.remove(&["a".to_string(), "c".to_string()]).unwrap();
    let keys: Vec<String> = storage.load_all().unwrap().into_iter().map(|e| e.key).collect();
    assert_eq!(keys, vec!["b"]);

    storage.clear().unwrap();
    assert!(storage.load_all().unwrap().is_empty());
  }

  #[test]
  fn test_entries_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    {
      let storage = SqliteStorage::open_at(&path).unwrap();
      storage.store(&CacheEntry::new("court:2", json!({"surface": "glass"}), None)).unwrap();
    }

    let storage = SqliteStorage::open_at(&path).unwrap();
    let entries = storage.load_all().unwrap();
    assert_eq!(entries[0].value, json!({"surface": "glass"}));
  }
}
