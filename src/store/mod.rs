//! Unified client state container.
//!
//! The store owns the session, notifications, theme, result cache and the
//! pending optimistic updates. It is shared by cloning a [`Store`] handle;
//! every mutation goes through one of the action methods below, which hold
//! the state lock only for the mutation itself and publish a [`StoreEvent`]
//! afterwards.

mod notification;
mod optimistic;
mod state;

pub use notification::{Notification, NotificationKind};
pub use optimistic::{OptimisticUpdate, UpdateKind, UpdateStatus};
pub use state::{Principal, SessionState, StoreState, Theme};

use color_eyre::Result;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{CacheEntry, CacheStorage, InvalidationPattern, NoopStorage};
use crate::event::{EventStream, StoreEvent, EVENT_CAPACITY};

struct StoreInner {
  state: Mutex<StoreState>,
  storage: Arc<dyn CacheStorage>,
  events: broadcast::Sender<StoreEvent>,
}

/// Handle to the shared store. Cloning is cheap and yields the same store.
#[derive(Clone)]
pub struct Store {
  inner: Arc<StoreInner>,
}

impl Default for Store {
  fn default() -> Self {
    Self::new()
  }
}

impl Store {
  /// Create an in-memory store with no durable cache mirror.
  pub fn new() -> Self {
    Self::with_storage(Arc::new(NoopStorage))
  }

  /// Create a store that mirrors its cache into `storage`.
  ///
  /// Live entries already in the backend are loaded into the cache.
  pub fn with_storage(storage: Arc<dyn CacheStorage>) -> Self {
    let mut state = StoreState::default();
    match storage.load_all() {
      Ok(entries) => {
        debug!(count = entries.len(), "Hydrated cache from storage");
        for entry in entries {
          state.cache.insert(entry);
        }
      }
      Err(e) => warn!("Failed to load persisted cache: {}", e),
    }

    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    Self {
      inner: Arc::new(StoreInner {
        state: Mutex::new(state),
        storage,
        events,
      }),
    }
  }

  fn lock(&self) -> MutexGuard<'_, StoreState> {
    self
      .inner
      .state
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  fn emit(&self, event: StoreEvent) {
    // No subscribers is fine
    let _ = self.inner.events.send(event);
  }

  fn mirror(&self, what: &str, op: impl FnOnce(&dyn CacheStorage) -> Result<()>) {
    if let Err(e) = op(self.inner.storage.as_ref()) {
      warn!("Cache mirror failed to {}: {}", what, e);
    }
  }

  /// Subscribe to store events.
  pub fn subscribe(&self) -> EventStream {
    EventStream::new(self.inner.events.subscribe())
  }

  /// Read a slice of the state through a selector.
  pub fn select<R>(&self, selector: impl FnOnce(&StoreState) -> R) -> R {
    let state = self.lock();
    selector(&state)
  }

  // ---------------------------------------------------------------------------
  // Session
  // ---------------------------------------------------------------------------

  pub fn login(&self, principal: Principal) {
    {
      let mut state = self.lock();
      debug!(user = %principal.id, "Logged in");
      state.session = SessionState {
        user: Some(principal),
        is_authenticated: true,
      };
    }
    self.emit(StoreEvent::SessionChanged {
      authenticated: true,
    });
  }

  /// Clear the session. Notifications are left for the caller to clear.
  pub fn logout(&self) {
    self.lock().session = SessionState::default();
    self.emit(StoreEvent::SessionChanged {
      authenticated: false,
    });
  }

  pub fn session(&self) -> SessionState {
    self.select(|s| s.session.clone())
  }

  pub fn is_authenticated(&self) -> bool {
    self.select(|s| s.session.is_authenticated)
  }

  // ---------------------------------------------------------------------------
  // Notifications
  // ---------------------------------------------------------------------------

  /// Append a notification. If it has an auto-dismiss duration and a tokio
  /// runtime is available, a timer removes it once the duration elapses.
  pub fn add_notification(&self, notification: Notification) -> Uuid {
    let id = notification.id;
    let auto_dismiss = notification.auto_dismiss_after;

    self.lock().notifications.push(notification.clone());
    self.emit(StoreEvent::NotificationAdded(notification));

    if let Some(after) = auto_dismiss {
      self.schedule_dismiss(id, after);
    }

    id
  }

  fn schedule_dismiss(&self, id: Uuid, after: Duration) {
    let handle = match tokio::runtime::Handle::try_current() {
      Ok(handle) => handle,
      Err(_) => {
        debug!(%id, "No runtime, notification will not auto-dismiss");
        return;
      }
    };

    let weak: Weak<StoreInner> = Arc::downgrade(&self.inner);
    let deadline = tokio::time::Instant::now() + after;
    handle.spawn(async move {
      tokio::time::sleep_until(deadline).await;
      if let Some(inner) = weak.upgrade() {
        Store { inner }.remove_notification(id);
      }
    });
  }

  /// Remove a notification. Returns false if it was already gone.
  pub fn remove_notification(&self, id: Uuid) -> bool {
    let removed = {
      let mut state = self.lock();
      let before = state.notifications.len();
      state.notifications.retain(|n| n.id != id);
      state.notifications.len() != before
    };
    if removed {
      self.emit(StoreEvent::NotificationRemoved { id });
    }
    removed
  }

  pub fn clear_notifications(&self) {
    self.lock().notifications.clear();
    self.emit(StoreEvent::NotificationsCleared);
  }

  pub fn notifications(&self) -> Vec<Notification> {
    self.select(|s| s.notifications.clone())
  }

  // ---------------------------------------------------------------------------
  // Theme
  // ---------------------------------------------------------------------------

  /// Flip the theme and return the new value.
  pub fn toggle_theme(&self) -> Theme {
    let theme = {
      let mut state = self.lock();
      state.theme = state.theme.toggled();
      state.theme
    };
    self.emit(StoreEvent::ThemeChanged(theme));
    theme
  }

  pub fn theme(&self) -> Theme {
    self.select(|s| s.theme)
  }

  // ---------------------------------------------------------------------------
  // Cache
  // ---------------------------------------------------------------------------

  /// Write a value, replacing whatever was cached under `key`.
  pub fn set_cache(&self, key: &str, value: Value, ttl: Option<Duration>) {
    let entry = CacheEntry::new(key, value, ttl);
    {
      let mut state = self.lock();
      self.mirror("store entry", |s| s.store(&entry));
      state.cache.insert(entry);
    }
    debug!(%key, "Cache updated");
    self.emit(StoreEvent::CacheUpdated {
      key: key.to_string(),
    });
  }

  /// Get the live value under `key`.
  pub fn get_cache(&self, key: &str) -> Option<Value> {
    self.cache_entry(key).map(|e| e.value)
  }

  /// Get the live entry under `key`, including its expiry.
  pub fn cache_entry(&self, key: &str) -> Option<CacheEntry> {
    self.lock().cache.get(key).cloned()
  }

  /// Drop a single key. Returns false if nothing was cached.
  pub fn invalidate_cache(&self, key: &str) -> bool {
    let removed = {
      let mut state = self.lock();
      let removed = state.cache.remove(key).is_some();
      if removed {
        self.mirror("remove entry", |s| s.remove(&[key.to_string()]));
      }
      removed
    };
    if removed {
      debug!(%key, "Cache invalidated");
      self.emit(StoreEvent::CacheInvalidated {
        keys: vec![key.to_string()],
      });
    }
    removed
  }

  /// Drop every key matching the pattern and return the dropped keys.
  pub fn invalidate_matching(&self, pattern: &InvalidationPattern) -> Vec<String> {
    if pattern.is_empty() {
      return Vec::new();
    }

    let removed = {
      let mut state = self.lock();
      let removed = state.cache.remove_matching(pattern);
      if !removed.is_empty() {
        self.mirror("remove entries", |s| s.remove(&removed));
      }
      removed
    };

    if !removed.is_empty() {
      debug!(pattern = pattern.as_str(), count = removed.len(), "Cache invalidated by pattern");
      self.emit(StoreEvent::CacheInvalidated {
        keys: removed.clone(),
      });
    }
    removed
  }

  pub fn clear_cache(&self) {
    {
      let mut state = self.lock();
      state.cache.clear();
      self.mirror("clear", |s| s.clear());
    }
    debug!("Cache cleared");
    self.emit(StoreEvent::CacheCleared);
  }

  pub fn cache_keys(&self) -> Vec<String> {
    self.select(|s| s.cache.keys())
  }

  // ---------------------------------------------------------------------------
  // Optimistic updates
  // ---------------------------------------------------------------------------

  /// Register an optimistic update and apply it to the cache.
  ///
  /// The current entry under the update's key is captured as its `before`
  /// snapshot in the same critical section as the write. The optimistic
  /// value is kept in memory only; storage sees it once it is committed.
  pub fn add_optimistic_update(&self, mut update: OptimisticUpdate) -> Uuid {
    let id = update.id;
    let key = update.key.clone();
    {
      let mut state = self.lock();
      update.before = state.cache.get(&key).cloned();
      update.status = UpdateStatus::Pending;

      state
        .cache
        .insert(CacheEntry::new(key.as_str(), update.after.clone(), None));
      state.pending.insert(id, update);
    }
    debug!(%id, %key, "Optimistic update applied");
    self.emit(StoreEvent::OptimisticApplied { id, key });
    id
  }

  /// Mark an update committed and drop it from the pending set.
  ///
  /// The live value under the key is persisted as confirmed; the caller may
  /// still overwrite it with the authoritative result.
  pub fn commit_optimistic_update(&self, id: Uuid) -> Option<OptimisticUpdate> {
    let mut update = {
      let mut state = self.lock();
      let update = state.pending.remove(&id)?;
      if let Some(entry) = state.cache.peek(&update.key) {
        self.mirror("store committed entry", |s| s.store(entry));
      }
      update
    };
    update.status = UpdateStatus::Committed;
    debug!(%id, key = %update.key, "Optimistic update committed");
    self.emit(StoreEvent::OptimisticCommitted {
      id,
      key: update.key.clone(),
    });
    Some(update)
  }

  /// Restore the update's snapshot and drop it from the pending set.
  pub fn revert_optimistic_update(&self, id: Uuid) -> Option<OptimisticUpdate> {
    let mut update = {
      let mut state = self.lock();
      let update = state.pending.remove(&id)?;
      // Storage never saw the optimistic value, so only memory is restored
      match &update.before {
        Some(entry) => {
          state.cache.insert(entry.clone());
        }
        None => {
          state.cache.remove(&update.key);
        }
      }
      update
    };
    update.status = UpdateStatus::RolledBack;
    warn!(%id, key = %update.key, "Optimistic update rolled back");
    self.emit(StoreEvent::OptimisticReverted {
      id,
      key: update.key.clone(),
    });
    Some(update)
  }

  pub fn pending_updates(&self) -> Vec<OptimisticUpdate> {
    self.select(|s| s.pending.values().cloned().collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use serde_json::json;

  fn principal() -> Principal {
    Principal {
      id: "u-1".to_string(),
      name: "Marta".to_string(),
      email: Some("marta@club.test".to_string()),
      club_id: Some(3),
      roles: vec!["admin".to_string()],
    }
  }

  #[test]
  fn test_set_get_invalidate() {
    let store = Store::new();
    store.set_cache("k", json!({"v": 1}), None);
    assert_eq!(store.get_cache("k"), Some(json!({"v": 1})));

    assert!(store.invalidate_cache("k"));
    assert_eq!(store.get_cache("k"), None);
    assert!(!store.invalidate_cache("k"));
  }

  #[test]
  fn test_ttl_expiry_hides_value() {
    let store = Store::new();
    store.set_cache("k", json!(1), Some(Duration::ZERO));
    assert_eq!(store.get_cache("k"), None);
  }

  #[test]
  fn test_invalidate_matching() {
    let store = Store::new();
    for key in ["reservation:1", "court:2", "availability:3"] {
      store.set_cache(key, json!(key), None);
    }

    let pattern = InvalidationPattern::new("reservation|availability").unwrap();
    let removed = store.invalidate_matching(&pattern);

    assert_eq!(removed, vec!["availability:3", "reservation:1"]);
    assert_eq!(store.cache_keys(), vec!["court:2"]);
  }

  #[test]
  fn test_empty_pattern_invalidates_nothing() {
    let store = Store::new();
    store.set_cache("court:2", json!(1), None);

    let removed = store.invalidate_matching(&InvalidationPattern::none());
    assert!(removed.is_empty());
    assert_eq!(store.cache_keys(), vec!["court:2"]);
  }

  #[test]
  fn test_login_logout() {
    let store = Store::new();
    store.login(principal());
    assert!(store.is_authenticated());
    assert_eq!(store.session().user.map(|u| u.name), Some("Marta".to_string()));

    store.logout();
    assert_eq!(store.session(), SessionState::default());
  }

  #[test]
  fn test_login_does_not_touch_cache() {
    let store = Store::new();
    store.set_cache("client:1", json!(1), None);
    store.login(principal());
    assert_eq!(store.cache_keys(), vec!["client:1"]);
  }

  #[test]
  fn test_notifications_keep_insertion_order() {
    let store = Store::new();
    let first = store.add_notification(Notification::info("one", ""));
    store.add_notification(Notification::info("two", ""));
    store.add_notification(Notification::info("three", ""));

    let titles: Vec<String> = store.notifications().into_iter().map(|n| n.title).collect();
    assert_eq!(titles, vec!["one", "two", "three"]);

    assert!(store.remove_notification(first));
    assert!(!store.remove_notification(first));
    let titles: Vec<String> = store.notifications().into_iter().map(|n| n.title).collect();
    assert_eq!(titles, vec!["two", "three"]);

    store.clear_notifications();
    assert!(store.notifications().is_empty());
  }

  #[test]
  fn test_notification_without_runtime_stays() {
    let store = Store::new();
    store.add_notification(Notification::info("x", "").auto_dismiss(Duration::from_millis(1)));
    std::thread::sleep(Duration::from_millis(5));
    assert_eq!(store.notifications().len(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_notification_auto_dismiss() {
    let store = Store::new();
    let id = store.add_notification(
      Notification::success("Saved", "Reservation created").auto_dismiss(Duration::from_millis(2000)),
    );

    tokio::time::sleep(Duration::from_millis(1999)).await;
    assert!(store.notifications().iter().any(|n| n.id == id));

    tokio::time::sleep(Duration::from_millis(1)).await;
    tokio::task::yield_now().await;
    assert!(store.notifications().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_manual_dismiss_before_timer() {
    let store = Store::new();
    let mut events = store.subscribe();
    let id = store.add_notification(Notification::info("x", "").auto_dismiss(Duration::from_secs(1)));
    assert!(store.remove_notification(id));

    tokio::time::sleep(Duration::from_secs(2)).await;
    tokio::task::yield_now().await;

    let mut removals = 0;
    while let Some(event) = events.try_next() {
      if matches!(event, StoreEvent::NotificationRemoved { .. }) {
        removals += 1;
      }
    }
    assert_eq!(removals, 1);
  }

  #[test]
  fn test_toggle_theme() {
    let store = Store::new();
    assert_eq!(store.theme(), Theme::Light);
    assert_eq!(store.toggle_theme(), Theme::Dark);
    assert_eq!(store.toggle_theme(), Theme::Light);
  }

  #[test]
  fn test_optimistic_commit_keeps_value() {
    let store = Store::new();
    store.set_cache("client:1", json!({"name": "old"}), None);

    let id = store.add_optimistic_update(OptimisticUpdate::new(
      UpdateKind::Mutation,
      "client:1",
      json!({"name": "new"}),
    ));
    assert_eq!(store.get_cache("client:1"), Some(json!({"name": "new"})));
    assert_eq!(store.pending_updates().len(), 1);

    let committed = store.commit_optimistic_update(id).unwrap();
    assert_eq!(committed.status, UpdateStatus::Committed);
    assert_eq!(committed.before.map(|e| e.value), Some(json!({"name": "old"})));
    assert!(store.pending_updates().is_empty());
    assert_eq!(store.get_cache("client:1"), Some(json!({"name": "new"})));
  }

  #[test]
  fn test_optimistic_revert_restores_snapshot() {
    let store = Store::new();
    store.set_cache("client:1", json!({"name": "old"}), Some(Duration::from_secs(600)));
    let before = store.cache_entry("client:1");

    let id = store.add_optimistic_update(OptimisticUpdate::new(
      UpdateKind::Mutation,
      "client:1",
      json!({"name": "new"}),
    ));
    let reverted = store.revert_optimistic_update(id).unwrap();

    assert_eq!(reverted.status, UpdateStatus::RolledBack);
    assert_eq!(store.cache_entry("client:1"), before);
    assert!(store.revert_optimistic_update(id).is_none());
  }

  #[test]
  fn test_optimistic_revert_removes_key_that_was_absent() {
    let store = Store::new();
    let id = store.add_optimistic_update(OptimisticUpdate::new(
      UpdateKind::Mutation,
      "reservation:9",
      json!({"id": 9}),
    ));
    store.revert_optimistic_update(id);
    assert_eq!(store.get_cache("reservation:9"), None);
  }

  #[test]
  fn test_events_are_published() {
    let store = Store::new();
    let mut events = store.subscribe();

    store.set_cache("court:1", json!(1), None);
    store.invalidate_cache("court:1");
    store.toggle_theme();

    assert_eq!(
      events.try_next(),
      Some(StoreEvent::CacheUpdated {
        key: "court:1".to_string()
      })
    );
    assert_eq!(
      events.try_next(),
      Some(StoreEvent::CacheInvalidated {
        keys: vec!["court:1".to_string()]
      })
    );
    assert_eq!(events.try_next(), Some(StoreEvent::ThemeChanged(Theme::Dark)));
    assert_eq!(events.try_next(), None);
  }

  #[test]
  fn test_clones_share_state() {
    let store = Store::new();
    let other = store.clone();
    other.set_cache("k", json!(true), None);
    assert_eq!(store.get_cache("k"), Some(json!(true)));
  }

  #[test]
  fn test_cache_is_mirrored_and_rehydrated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");

    {
      let store = Store::with_storage(Arc::new(SqliteStorage::open_at(&path).unwrap()));
      store.set_cache("court:1", json!({"name": "Central"}), None);
      store.set_cache("court:2", json!({"name": "Side"}), None);
      store.set_cache("court:3", json!({"name": "Gone"}), Some(Duration::ZERO));
      store.invalidate_cache("court:2");
    }

    let store = Store::with_storage(Arc::new(SqliteStorage::open_at(&path).unwrap()));
    assert_eq!(store.cache_keys(), vec!["court:1"]);
    assert_eq!(store.get_cache("court:1"), Some(json!({"name": "Central"})));
  }

  #[test]
  fn test_reverted_optimistic_write_is_not_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");

    {
      let store = Store::with_storage(Arc::new(SqliteStorage::open_at(&path).unwrap()));
      let id = store.add_optimistic_update(OptimisticUpdate::new(
        UpdateKind::Mutation,
        "client:5",
        json!({"name": "pending"}),
      ));
      store.revert_optimistic_update(id);
    }

    let store = Store::with_storage(Arc::new(SqliteStorage::open_at(&path).unwrap()));
    assert!(store.cache_keys().is_empty());
  }

  #[test]
  fn test_unconfirmed_optimistic_write_is_not_rehydrated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");

    {
      let store = Store::with_storage(Arc::new(SqliteStorage::open_at(&path).unwrap()));
      store.set_cache("client:5", json!({"name": "Ana"}), None);
      store.add_optimistic_update(OptimisticUpdate::new(
        UpdateKind::Mutation,
        "client:5",
        json!({"name": "pending"}),
      ));
      assert_eq!(store.get_cache("client:5"), Some(json!({"name": "pending"})));
      // dropped before commit or revert
    }

    let store = Store::with_storage(Arc::new(SqliteStorage::open_at(&path).unwrap()));
    assert_eq!(store.get_cache("client:5"), Some(json!({"name": "Ana"})));
  }

  #[test]
  fn test_committed_optimistic_write_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");

    {
      let store = Store::with_storage(Arc::new(SqliteStorage::open_at(&path).unwrap()));
      let id = store.add_optimistic_update(OptimisticUpdate::new(
        UpdateKind::Batch,
        "reservations:court:2",
        json!([]),
      ));
      store.commit_optimistic_update(id);
    }

    let store = Store::with_storage(Arc::new(SqliteStorage::open_at(&path).unwrap()));
    assert_eq!(store.get_cache("reservations:court:2"), Some(json!([])));
  }
}
