use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::cache::CacheEntry;

/// What produced an optimistic update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
  /// A single data-sync mutation
  Mutation,
  /// A batch operation over many items
  Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateStatus {
  Pending,
  Committed,
  RolledBack,
}

/// An optimistic cache write recorded as data rather than closures.
///
/// `before` is filled in by the store when the update is registered, so
/// rollback restores exactly what was cached at that moment (including its
/// expiry), or removes the key if nothing was cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimisticUpdate {
  pub id: Uuid,
  pub kind: UpdateKind,
  pub key: String,
  pub before: Option<CacheEntry>,
  pub after: Value,
  pub status: UpdateStatus,
}

impl OptimisticUpdate {
  pub fn new(kind: UpdateKind, key: impl Into<String>, after: Value) -> Self {
    Self {
      id: Uuid::new_v4(),
      kind,
      key: key.into(),
      before: None,
      after,
      status: UpdateStatus::Pending,
    }
  }

  pub fn is_pending(&self) -> bool {
    self.status == UpdateStatus::Pending
  }
}
