//! Optimistic mutation wrapper.
//!
//! [`DataSync::mutate`] runs one remote mutation as:
//!
//! 1. optimistic apply: write the optimistic value into the store cache and
//!    register an [`OptimisticUpdate`] holding the previous entry
//! 2. remote call, retried on transient failure per [`RetryPolicy`]
//! 3. success: commit, invalidate dependent keys, write the authoritative
//!    result; failure: roll back to the snapshot and surface the error
//!
//! Calls on different keys are independent. Calls sharing a key are not
//! serialized; the cache keeps whichever write lands last. Overlapping
//! optimistic calls on one key can also roll back out of order: the later
//! call's snapshot is the earlier call's optimistic value, so if the earlier
//! call rolls back first and the later one rolls back after it, that
//! optimistic value is restored and stays cached until the key is written
//! or invalidated again.

mod batch;
mod error;
mod retry;

pub use batch::{BatchOptions, BatchReport, DEFAULT_BATCH_SIZE};
pub use error::MutationError;
pub use retry::{Backoff, BackoffKind, RetryConfig, RetryPolicy};

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cache::InvalidationPattern;
use crate::store::{Notification, OptimisticUpdate, Store, UpdateKind};

pub type SuccessCallback = Arc<dyn Fn(&Value) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&MutationError) + Send + Sync>;

/// Configuration for a single mutation.
#[derive(Clone)]
pub struct MutationOptions {
  /// Cache key the mutation result is written under
  pub key: String,
  /// Value shown in the cache while the mutation is in flight
  pub optimistic: Option<Value>,
  /// Invalidate `key` itself before writing the result
  pub invalidate_on_success: bool,
  /// Regex over flattened keys; matches are invalidated on success
  pub invalidate_pattern: Option<String>,
  /// Expiry of the cached result
  pub cache_time: Option<Duration>,
  pub retry: RetryPolicy,
  /// Notification message added on success
  pub success_message: Option<String>,
  /// Notification title added on failure
  pub error_title: Option<String>,
  on_success: Option<SuccessCallback>,
  on_error: Option<ErrorCallback>,
}

impl MutationOptions {
  pub fn new(key: impl Into<String>) -> Self {
    Self {
      key: key.into(),
      optimistic: None,
      invalidate_on_success: false,
      invalidate_pattern: None,
      cache_time: None,
      retry: RetryPolicy::default(),
      success_message: None,
      error_title: None,
      on_success: None,
      on_error: None,
    }
  }

  pub fn optimistic(mut self, value: Value) -> Self {
    self.optimistic = Some(value);
    self
  }

  pub fn invalidate_on_success(mut self, invalidate: bool) -> Self {
    self.invalidate_on_success = invalidate;
    self
  }

  pub fn invalidate(mut self, pattern: impl Into<String>) -> Self {
    self.invalidate_pattern = Some(pattern.into());
    self
  }

  pub fn cache_time(mut self, cache_time: Duration) -> Self {
    self.cache_time = Some(cache_time);
    self
  }

  pub fn retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  pub fn notify_success(mut self, message: impl Into<String>) -> Self {
    self.success_message = Some(message.into());
    self
  }

  pub fn notify_error(mut self, title: impl Into<String>) -> Self {
    self.error_title = Some(title.into());
    self
  }

  pub fn on_success<F>(mut self, f: F) -> Self
  where
    F: Fn(&Value) + Send + Sync + 'static,
  {
    self.on_success = Some(Arc::new(f));
    self
  }

  pub fn on_error<F>(mut self, f: F) -> Self
  where
    F: Fn(&MutationError) + Send + Sync + 'static,
  {
    self.on_error = Some(Arc::new(f));
    self
  }

  /// Check the configuration and compile the invalidation pattern.
  fn validate(&self) -> Result<Option<InvalidationPattern>, MutationError> {
    if self.key.trim().is_empty() {
      return Err(MutationError::InvalidConfig(
        "mutation key must not be empty".to_string(),
      ));
    }

    self
      .invalidate_pattern
      .as_deref()
      .map(InvalidationPattern::new)
      .transpose()
      .map_err(|e| MutationError::InvalidConfig(format!("invalid invalidation pattern: {}", e)))
  }
}

impl fmt::Debug for MutationOptions {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MutationOptions")
      .field("key", &self.key)
      .field("optimistic", &self.optimistic)
      .field("invalidate_on_success", &self.invalidate_on_success)
      .field("invalidate_pattern", &self.invalidate_pattern)
      .field("cache_time", &self.cache_time)
      .field("retry", &self.retry)
      .finish_non_exhaustive()
  }
}

/// Runs remote mutations against the shared store.
#[derive(Clone)]
pub struct DataSync {
  store: Store,
  retry: RetryPolicy,
  cache_time: Option<Duration>,
  notification_ttl: Option<Duration>,
}

impl DataSync {
  pub fn new(store: Store) -> Self {
    Self {
      store,
      retry: RetryPolicy::default(),
      cache_time: None,
      notification_ttl: None,
    }
  }

  /// Retry policy used by [`options`](Self::options).
  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  /// Cache time used by [`options`](Self::options).
  pub fn with_cache_time(mut self, cache_time: Option<Duration>) -> Self {
    self.cache_time = cache_time;
    self
  }

  /// Auto-dismiss duration for notifications added by mutations.
  pub fn with_notification_ttl(mut self, ttl: Option<Duration>) -> Self {
    self.notification_ttl = ttl;
    self
  }

  pub fn store(&self) -> &Store {
    &self.store
  }

  /// Mutation options for `key` prefilled with this instance's defaults.
  pub fn options(&self, key: impl Into<String>) -> MutationOptions {
    let mut options = MutationOptions::new(key).retry(self.retry);
    options.cache_time = self.cache_time;
    options
  }

  fn notify(&self, notification: Notification) {
    let notification = match self.notification_ttl {
      Some(ttl) => notification.auto_dismiss(ttl),
      None => notification,
    };
    self.store.add_notification(notification);
  }

  /// Run `mutation` with optimistic apply, retry, and commit or rollback.
  ///
  /// The mutation is called once per attempt with a clone of `variables`.
  /// Errors are passed to `on_error` and then returned.
  pub async fn mutate<V, R, F, Fut>(
    &self,
    options: &MutationOptions,
    variables: V,
    mutation: F,
  ) -> Result<R, MutationError>
  where
    V: Clone,
    R: Serialize,
    F: Fn(V) -> Fut,
    Fut: Future<Output = Result<R, MutationError>>,
  {
    let pattern = options.validate()?;
    let key = options.key.as_str();

    let optimistic_id = options.optimistic.clone().map(|value| {
      self
        .store
        .add_optimistic_update(OptimisticUpdate::new(UpdateKind::Mutation, key, value))
    });

    let outcome = options
      .retry
      .run(|| mutation(variables.clone()))
      .await
      .and_then(|result| {
        serde_json::to_value(&result)
          .map(|value| (result, value))
          .map_err(|e| MutationError::Decode(format!("result is not cacheable: {}", e)))
      });

    match outcome {
      Ok((result, value)) => {
        if let Some(id) = optimistic_id {
          self.store.commit_optimistic_update(id);
        }

        let mut invalidated = match &pattern {
          Some(pattern) => self.store.invalidate_matching(pattern),
          None => Vec::new(),
        };
        if options.invalidate_on_success && self.store.invalidate_cache(key) {
          invalidated.push(key.to_string());
        }

        self.store.set_cache(key, value.clone(), options.cache_time);
        info!(%key, invalidated = invalidated.len(), "Mutation committed");

        if let Some(message) = &options.success_message {
          self.notify(Notification::success("Saved", message.as_str()));
        }
        if let Some(on_success) = &options.on_success {
          on_success(&value);
        }
        Ok(result)
      }
      Err(e) => {
        if let Some(id) = optimistic_id {
          self.store.revert_optimistic_update(id);
        }
        warn!(%key, "Mutation failed: {}", e);

        if let Some(title) = &options.error_title {
          self.notify(Notification::error(title.as_str(), e.to_string()));
        }
        if let Some(on_error) = &options.on_error {
          on_error(&e);
        }
        Err(e)
      }
    }
  }
}
