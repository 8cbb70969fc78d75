use tokio::sync::broadcast;
use uuid::Uuid;

use crate::store::{Notification, Theme};

/// Capacity of the store event channel. Slow subscribers that fall further
/// behind than this skip the oldest events.
pub const EVENT_CAPACITY: usize = 256;

/// Store events, published after each action has been applied.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
  /// Login or logout
  SessionChanged { authenticated: bool },
  NotificationAdded(Notification),
  NotificationRemoved { id: Uuid },
  NotificationsCleared,
  ThemeChanged(Theme),
  /// A value was written under `key`
  CacheUpdated { key: String },
  /// Entries were dropped and should be refetched by whoever shows them
  CacheInvalidated { keys: Vec<String> },
  CacheCleared,
  OptimisticApplied { id: Uuid, key: String },
  OptimisticCommitted { id: Uuid, key: String },
  OptimisticReverted { id: Uuid, key: String },
}

impl StoreEvent {
  /// Whether this event dropped the cached value under `key`.
  pub fn invalidates_key(&self, key: &str) -> bool {
    match self {
      StoreEvent::CacheInvalidated { keys } => keys.iter().any(|k| k == key),
      StoreEvent::CacheCleared => true,
      _ => false,
    }
  }

  /// Whether this event wrote a new value under `key`: a plain write, an
  /// optimistic apply, or a rollback to the previous value.
  pub fn updates_key(&self, key: &str) -> bool {
    match self {
      StoreEvent::CacheUpdated { key: k }
      | StoreEvent::OptimisticApplied { key: k, .. }
      | StoreEvent::OptimisticReverted { key: k, .. } => k == key,
      _ => false,
    }
  }
}

/// The subscriber fell behind and this many events were dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lagged(pub u64);

/// Subscriber side of the store event channel.
pub struct EventStream {
  rx: broadcast::Receiver<StoreEvent>,
}

impl EventStream {
  pub(crate) fn new(rx: broadcast::Receiver<StoreEvent>) -> Self {
    Self { rx }
  }

  /// Receive the next event. Returns `None` once the store is gone.
  pub async fn next(&mut self) -> Option<StoreEvent> {
    loop {
      match self.rx.recv().await {
        Ok(event) => return Some(event),
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
          tracing::warn!(skipped, "Event subscriber lagged behind the store");
        }
        Err(broadcast::error::RecvError::Closed) => return None,
      }
    }
  }

  /// Receive without waiting. Returns `None` when no event is queued.
  /// Dropped events are logged and skipped.
  pub fn try_next(&mut self) -> Option<StoreEvent> {
    loop {
      match self.try_recv() {
        Ok(event) => return event,
        Err(Lagged(skipped)) => {
          tracing::warn!(skipped, "Event subscriber lagged behind the store");
        }
      }
    }
  }

  /// Receive without waiting, reporting dropped events to the caller.
  ///
  /// After a `Lagged` error the next call resumes at the oldest event still
  /// held by the channel.
  pub fn try_recv(&mut self) -> Result<Option<StoreEvent>, Lagged> {
    match self.rx.try_recv() {
      Ok(event) => Ok(Some(event)),
      Err(broadcast::error::TryRecvError::Lagged(skipped)) => Err(Lagged(skipped)),
      Err(_) => Ok(None),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_invalidates_and_updates_key() {
    let id = Uuid::new_v4();
    let invalidated = StoreEvent::CacheInvalidated {
      keys: vec!["court:1".into(), "court:2".into()],
    };
    assert!(invalidated.invalidates_key("court:2"));
    assert!(!invalidated.invalidates_key("court:3"));
    assert!(StoreEvent::CacheCleared.invalidates_key("anything"));

    let applied = StoreEvent::OptimisticApplied {
      id,
      key: "client:4".into(),
    };
    assert!(applied.updates_key("client:4"));
    assert!(!applied.invalidates_key("client:4"));
    assert!(StoreEvent::OptimisticReverted {
      id,
      key: "client:4".into()
    }
    .updates_key("client:4"));
    assert!(!StoreEvent::OptimisticCommitted {
      id,
      key: "client:4".into()
    }
    .updates_key("client:4"));
    assert!(!StoreEvent::CacheUpdated { key: "client:5".into() }.updates_key("client:4"));
  }

  #[test]
  fn test_lag_is_reported_then_stream_resumes() {
    let (tx, rx) = broadcast::channel(2);
    let mut events = EventStream::new(rx);
    for i in 0..5 {
      tx.send(StoreEvent::CacheUpdated {
        key: format!("court:{}", i),
      })
      .unwrap();
    }

    assert_eq!(events.try_recv(), Err(Lagged(3)));
    assert_eq!(
      events.try_recv(),
      Ok(Some(StoreEvent::CacheUpdated {
        key: "court:3".into()
      }))
    );
    assert_eq!(events.try_next(), Some(StoreEvent::CacheUpdated { key: "court:4".into() }));
    assert_eq!(events.try_recv(), Ok(None));
  }
}
