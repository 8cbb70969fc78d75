use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
  Success,
  Info,
  Warning,
  Error,
}

impl fmt::Display for NotificationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let label = match self {
      NotificationKind::Success => "success",
      NotificationKind::Info => "info",
      NotificationKind::Warning => "warning",
      NotificationKind::Error => "error",
    };
    f.write_str(label)
  }
}

/// User-facing feedback message held by the store until dismissed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
  pub id: Uuid,
  pub kind: NotificationKind,
  pub title: String,
  pub message: String,
  /// Remove automatically once this much time has passed
  pub auto_dismiss_after: Option<Duration>,
  pub created_at: DateTime<Utc>,
}

impl Notification {
  pub fn new(kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      id: Uuid::new_v4(),
      kind,
      title: title.into(),
      message: message.into(),
      auto_dismiss_after: None,
      created_at: Utc::now(),
    }
  }

  pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
    Self::new(NotificationKind::Success, title, message)
  }

  pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
    Self::new(NotificationKind::Info, title, message)
  }

  pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
    Self::new(NotificationKind::Warning, title, message)
  }

  pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
    Self::new(NotificationKind::Error, title, message)
  }

  pub fn auto_dismiss(mut self, after: Duration) -> Self {
    self.auto_dismiss_after = Some(after);
    self
  }
}

impl fmt::Display for Notification {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[{}] {}: {}", self.kind, self.title, self.message)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_constructors_set_kind() {
    assert_eq!(Notification::success("a", "b").kind, NotificationKind::Success);
    assert_eq!(Notification::error("a", "b").kind, NotificationKind::Error);
  }

  #[test]
  fn test_ids_are_unique() {
    let a = Notification::info("a", "b");
    let b = Notification::info("a", "b");
    assert_ne!(a.id, b.id);
  }

  #[test]
  fn test_display() {
    let n = Notification::warning("Court 3", "Lights are off");
    assert_eq!(n.to_string(), "[warning] Court 3: Lights are off");
  }
}
