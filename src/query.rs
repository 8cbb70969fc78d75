//! Async query abstraction for reads backed by the store cache.
//!
//! Inspired by TanStack Query, this module provides a `Query<T>` type bound to
//! a cache key. It serves live cached values without touching the network,
//! writes fetched results back into the store, and refetches when the store
//! reports that its key was invalidated (for example by a mutation's
//! invalidation pattern).
//!
//! # Example
//!
//! ```ignore
//! let api = api_client.clone();
//! let mut query = Query::new(store.clone(), "reservations:court:3", move || {
//!     let api = api.clone();
//!     async move { api.list_reservations(3).await }
//! });
//!
//! query.fetch();
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, re-render
//! }
//! ```

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::event::{EventStream, Lagged};
use crate::store::Store;
use crate::sync::MutationError;

/// The state of a query
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Query has not been started
  Idle,
  /// Query is currently fetching data
  Loading,
  /// Query completed successfully
  Success(T),
  /// Query failed with an error
  Error(String),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, MutationError>> + Send>>;

type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<T> + Send + Sync>;

/// Async query for a single cache key.
pub struct Query<T> {
  key: String,
  store: Store,
  state: QueryState<T>,
  fetcher: FetcherFn<T>,
  receiver: Option<mpsc::UnboundedReceiver<Result<T, MutationError>>>,
  events: EventStream,
  cache_time: Option<Duration>,
  /// Cached value behind the current data, so echoes of our own writes
  /// are not reported as changes
  shown: Option<Value>,
}

impl<T> Query<T>
where
  T: Serialize + DeserializeOwned + Send + 'static,
{
  /// Create a query for `key`. The fetcher is called each time the network
  /// has to be hit.
  pub fn new<F, Fut>(store: Store, key: impl Into<String>, fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, MutationError>> + Send + 'static,
  {
    let events = store.subscribe();
    Self {
      key: key.into(),
      store,
      state: QueryState::Idle,
      fetcher: Box::new(move || Box::pin(fetcher())),
      receiver: None,
      events,
      cache_time: None,
      shown: None,
    }
  }

  /// Expiry applied when fetched data is written into the cache.
  pub fn with_cache_time(mut self, cache_time: Duration) -> Self {
    self.cache_time = Some(cache_time);
    self
  }

  pub fn key(&self) -> &str {
    &self.key
  }

  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  pub fn is_success(&self) -> bool {
    self.state.is_success()
  }

  pub fn is_error(&self) -> bool {
    self.state.is_error()
  }

  pub fn error(&self) -> Option<&str> {
    self.state.error()
  }

  /// Whether the data shown no longer has a live cache entry behind it.
  pub fn is_stale(&self) -> bool {
    match &self.state {
      QueryState::Success(_) => self.store.get_cache(&self.key).is_none(),
      _ => false,
    }
  }

  /// Load data, preferring a live cache entry over the network.
  ///
  /// This is a no-op if the query is already loading.
  pub fn fetch(&mut self) {
    if self.state.is_loading() {
      return;
    }

    if let Some(value) = self.store.get_cache(&self.key) {
      match serde_json::from_value::<T>(value.clone()) {
        Ok(data) => {
          debug!(key = %self.key, "Query served from cache");
          self.state = QueryState::Success(data);
          self.shown = Some(value);
          return;
        }
        Err(e) => debug!(key = %self.key, "Cached value has a different shape: {}", e),
      }
    }

    self.start_fetch();
  }

  /// Force a network fetch, dropping any pending one.
  pub fn refetch(&mut self) {
    self.receiver = None;
    self.start_fetch();
  }

  /// Poll for results and store changes.
  ///
  /// Writes to the query's key (including optimistic values and rollbacks)
  /// are shown as they are; invalidation triggers a refetch. Missed store
  /// events count as an invalidation. Returns `true` if the state changed.
  /// Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;

    let mut invalidated = false;
    let mut updated = false;
    loop {
      match self.events.try_recv() {
        Ok(Some(event)) => {
          invalidated |= event.invalidates_key(&self.key);
          updated |= event.updates_key(&self.key);
        }
        Ok(None) => break,
        Err(Lagged(skipped)) => {
          debug!(key = %self.key, skipped, "Query missed store events");
          invalidated = true;
        }
      }
    }

    let idle = matches!(self.state, QueryState::Idle);
    if invalidated && !idle {
      debug!(key = %self.key, "Query invalidated, refetching");
      self.refetch();
      changed = true;
    } else if updated && !idle && !self.state.is_loading() {
      changed = self.show_cached();
    }

    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return changed,
    };

    match receiver.try_recv() {
      Ok(Ok(data)) => {
        match serde_json::to_value(&data) {
          Ok(value) => {
            self.shown = Some(value.clone());
            self.store.set_cache(&self.key, value, self.cache_time);
          }
          Err(e) => debug!(key = %self.key, "Query result not cached: {}", e),
        }
        self.state = QueryState::Success(data);
        self.receiver = None;
        true
      }
      Ok(Err(error)) => {
        self.state = QueryState::Error(error.to_string());
        self.receiver = None;
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => changed,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        self.state = QueryState::Error("Query was cancelled".to_string());
        self.receiver = None;
        true
      }
    }
  }

  /// Show the value the store now holds under the key, refetching if it
  /// is gone.
  fn show_cached(&mut self) -> bool {
    let value = match self.store.get_cache(&self.key) {
      Some(value) => value,
      None => {
        debug!(key = %self.key, "Cached value removed, refetching");
        self.refetch();
        return true;
      }
    };
    if self.shown.as_ref() == Some(&value) {
      return false;
    }

    match serde_json::from_value::<T>(value.clone()) {
      Ok(data) => {
        self.state = QueryState::Success(data);
        self.shown = Some(value);
        true
      }
      Err(e) => {
        debug!(key = %self.key, "Cached value has a different shape: {}", e);
        false
      }
    }
  }

  fn start_fetch(&mut self) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state = QueryState::Loading;

    let future = (self.fetcher)();
    tokio::spawn(async move {
      let result = future.await;
      // Receiver may have been dropped by a refetch
      let _ = tx.send(result);
    });
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("key", &self.key)
      .field("state", &self.state)
      .field("cache_time", &self.cache_time)
      .finish_non_exhaustive()
  }
}
