use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::notification::Notification;
use super::optimistic::OptimisticUpdate;
use crate::cache::ResultCache;

/// Authenticated user as returned by `GET /api/auth/me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub email: Option<String>,
  /// Club the user administers, if any
  #[serde(default)]
  pub club_id: Option<u64>,
  #[serde(default)]
  pub roles: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
  pub user: Option<Principal>,
  pub is_authenticated: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
  #[default]
  Light,
  Dark,
}

impl Theme {
  pub fn toggled(self) -> Self {
    match self {
      Theme::Light => Theme::Dark,
      Theme::Dark => Theme::Light,
    }
  }
}

/// Everything the store owns.
///
/// Read it through [`Store::select`](super::Store::select); only store actions
/// mutate it.
#[derive(Debug, Default)]
pub struct StoreState {
  pub session: SessionState,
  /// Notifications in insertion order
  pub notifications: Vec<Notification>,
  pub theme: Theme,
  pub cache: ResultCache,
  /// Optimistic updates awaiting commit or rollback
  pub pending: HashMap<Uuid, OptimisticUpdate>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_theme_toggles_between_two_values() {
    assert_eq!(Theme::Light.toggled(), Theme::Dark);
    assert_eq!(Theme::Dark.toggled(), Theme::Light);
    assert_eq!(Theme::default(), Theme::Light);
  }

  #[test]
  fn test_principal_deserializes_with_optional_fields_missing() {
    let user: Principal = serde_json::from_str(r#"{"id": "u1", "name": "Marta"}"#).unwrap();
    assert_eq!(user.email, None);
    assert!(user.roles.is_empty());
  }
}
