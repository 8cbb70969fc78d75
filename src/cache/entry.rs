//! In-memory result cache keyed by flattened query keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use super::key::InvalidationPattern;

/// A single cached value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  /// Flattened cache key (e.g., "reservation:42")
  pub key: String,
  /// Cached JSON value
  pub value: Value,
  /// When the entry stops being served. `None` never expires.
  pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
  /// Build an entry that expires `ttl` from now.
  ///
  /// A ttl too large to represent as a timestamp never expires.
  pub fn new(key: impl Into<String>, value: Value, ttl: Option<Duration>) -> Self {
    let expires_at = ttl
      .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
      .and_then(|ttl| Utc::now().checked_add_signed(ttl));
    Self {
      key: key.into(),
      value,
      expires_at,
    }
  }

  /// Check whether the entry is past its expiry at `now`.
  pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
    self.expires_at.map(|at| now >= at).unwrap_or(false)
  }

  pub fn is_expired(&self) -> bool {
    self.is_expired_at(Utc::now())
  }
}

/// Generic key/value result cache.
///
/// A key maps to at most one entry. Expired entries are treated as absent on
/// read and dropped the next time they are touched.
#[derive(Debug, Default)]
pub struct ResultCache {
  entries: HashMap<String, CacheEntry>,
}

impl ResultCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Get the live entry for a key, purging it if it has expired.
  pub fn get(&mut self, key: &str) -> Option<&CacheEntry> {
    let expired = self.entries.get(key)?.is_expired();
    if expired {
      self.entries.remove(key);
      return None;
    }
    self.entries.get(key)
  }

  /// Get the live entry for a key without purging.
  pub fn peek(&self, key: &str) -> Option<&CacheEntry> {
    self.entries.get(key).filter(|e| !e.is_expired())
  }

  /// Insert or replace an entry, returning the previous one.
  pub fn insert(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
    self.entries.insert(entry.key.clone(), entry)
  }

  /// Remove a single key. Returns the removed entry if there was one.
  pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
    self.entries.remove(key)
  }

  /// Remove every entry whose key matches the pattern.
  ///
  /// Returns the removed keys, sorted for stable reporting.
  pub fn remove_matching(&mut self, pattern: &InvalidationPattern) -> Vec<String> {
    let mut removed: Vec<String> = self
      .entries
      .keys()
      .filter(|key| pattern.matches(key))
      .cloned()
      .collect();
    removed.sort();

    for key in &removed {
      self.entries.remove(key);
    }

    removed
  }

  /// Drop all entries.
  pub fn clear(&mut self) {
    self.entries.clear();
  }

  /// Keys of all live entries, sorted.
  pub fn keys(&self) -> Vec<String> {
    let now = Utc::now();
    let mut keys: Vec<String> = self
      .entries
      .values()
      .filter(|e| !e.is_expired_at(now))
      .map(|e| e.key.clone())
      .collect();
    keys.sort();
    keys
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}
