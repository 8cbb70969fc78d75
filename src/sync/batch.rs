use futures::future::join_all;
use serde_json::Value;
use std::future::Future;
use tracing::{debug, info, warn};

use super::{DataSync, MutationError, RetryPolicy};
use crate::cache::InvalidationPattern;
use crate::store::{OptimisticUpdate, UpdateKind};

pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Configuration for [`DataSync::process_batch`].
#[derive(Debug, Clone)]
pub struct BatchOptions {
  /// Items dispatched concurrently per batch
  pub batch_size: usize,
  /// Cache key and value applied before the first batch. Restored to the
  /// pre-batch snapshot if any item fails.
  pub optimistic: Option<(String, Value)>,
  /// Regex over flattened keys invalidated once any item succeeded
  pub invalidate_pattern: Option<String>,
  /// Retry policy applied to each item
  pub retry: RetryPolicy,
}

impl Default for BatchOptions {
  fn default() -> Self {
    Self {
      batch_size: DEFAULT_BATCH_SIZE,
      optimistic: None,
      invalidate_pattern: None,
      retry: RetryPolicy::never(),
    }
  }
}

/// Per-item outcome of a batch, in input order.
#[derive(Debug)]
pub struct BatchReport<R> {
  pub results: Vec<Result<R, MutationError>>,
  /// Percentage of items processed when the batch finished
  pub progress: f64,
}

impl<R> BatchReport<R> {
  pub fn succeeded(&self) -> usize {
    self.results.iter().filter(|r| r.is_ok()).count()
  }

  pub fn failed(&self) -> usize {
    self.results.len() - self.succeeded()
  }

  /// Failed items as `(input index, error)`.
  pub fn errors(&self) -> Vec<(usize, &MutationError)> {
    self
      .results
      .iter()
      .enumerate()
      .filter_map(|(i, r)| r.as_ref().err().map(|e| (i, e)))
      .collect()
  }
}

impl DataSync {
  /// Apply `op` to every item, `batch_size` items at a time.
  ///
  /// Items within a batch run concurrently and a failing item never aborts
  /// its siblings. `on_progress` receives `processed / total * 100` after
  /// each batch completes. Only configuration errors fail the call itself.
  pub async fn process_batch<I, R, F, Fut, P>(
    &self,
    items: Vec<I>,
    options: &BatchOptions,
    op: F,
    mut on_progress: P,
  ) -> Result<BatchReport<R>, MutationError>
  where
    I: Clone,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<R, MutationError>>,
    P: FnMut(f64),
  {
    if options.batch_size == 0 {
      return Err(MutationError::InvalidConfig(
        "batch size must be at least 1".to_string(),
      ));
    }
    let pattern = options
      .invalidate_pattern
      .as_deref()
      .map(InvalidationPattern::new)
      .transpose()
      .map_err(|e| MutationError::InvalidConfig(format!("invalid invalidation pattern: {}", e)))?;

    let optimistic_id = options.optimistic.as_ref().map(|(key, value)| {
      self
        .store
        .add_optimistic_update(OptimisticUpdate::new(UpdateKind::Batch, key.as_str(), value.clone()))
    });

    let total = items.len();
    let mut results = Vec::with_capacity(total);
    let mut progress = if total == 0 { 100.0 } else { 0.0 };
    let op = &op;
    let retry = options.retry;

    for chunk in items.chunks(options.batch_size) {
      let outcomes = join_all(
        chunk
          .iter()
          .map(|item| async move { retry.run(|| op(item.clone())).await }),
      )
      .await;
      results.extend(outcomes);

      progress = results.len() as f64 / total as f64 * 100.0;
      debug!(processed = results.len(), total, progress, "Batch chunk finished");
      on_progress(progress);
    }

    let report = BatchReport { results, progress };
    let failed = report.failed();

    if let Some(id) = optimistic_id {
      if failed > 0 {
        self.store.revert_optimistic_update(id);
      } else {
        self.store.commit_optimistic_update(id);
      }
    }

    // Items that went through changed server state even if others failed
    if report.succeeded() > 0 {
      if let Some(pattern) = &pattern {
        self.store.invalidate_matching(pattern);
      }
    }

    if failed > 0 {
      warn!(failed, total, "Batch finished with failures");
    } else {
      info!(total, "Batch finished");
    }

    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::Store;
  use serde_json::json;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  fn flaky(i: u32) -> std::future::Ready<Result<u32, MutationError>> {
    std::future::ready(if i == 5 {
      Err(MutationError::Status {
        status: 404,
        message: format!("reservation {} not found", i),
      })
    } else {
      Ok(i * 10)
    })
  }

  #[tokio::test]
  async fn test_partial_failure_is_captured_per_item() {
    let sync = DataSync::new(Store::new());
    let mut reported = Vec::new();

    let report = sync
      .process_batch((1..=10).collect(), &BatchOptions::default(), flaky, |p| {
        reported.push(p)
      })
      .await
      .unwrap();

    assert_eq!(report.succeeded(), 9);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.errors()[0].0, 4);
    assert_eq!(report.results[0], Ok(10));
    assert_eq!(report.progress, 100.0);
    assert_eq!(reported, vec![100.0]);
  }

  #[tokio::test]
  async fn test_progress_reported_after_each_chunk() {
    let sync = DataSync::new(Store::new());
    let options = BatchOptions {
      batch_size: 4,
      ..BatchOptions::default()
    };
    let mut reported = Vec::new();

    let report = sync
      .process_batch((1..=10).collect(), &options, flaky, |p| reported.push(p))
      .await
      .unwrap();

    assert_eq!(reported, vec![40.0, 80.0, 100.0]);
    assert_eq!(report.results.len(), 10);
    assert_eq!(report.results[9], Ok(100));
  }

  #[tokio::test]
  async fn test_items_in_chunk_run_concurrently() {
    let sync = DataSync::new(Store::new());
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let op = {
      let in_flight = in_flight.clone();
      let peak = peak.clone();
      move |i: u32| {
        let in_flight = in_flight.clone();
        let peak = peak.clone();
        async move {
          let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
          peak.fetch_max(now, Ordering::SeqCst);
          tokio::task::yield_now().await;
          in_flight.fetch_sub(1, Ordering::SeqCst);
          Ok::<_, MutationError>(i)
        }
      }
    };

    let options = BatchOptions {
      batch_size: 5,
      ..BatchOptions::default()
    };
    sync
      .process_batch((0..10).collect(), &options, op, |_| {})
      .await
      .unwrap();

    assert_eq!(peak.load(Ordering::SeqCst), 5);
  }

  #[tokio::test]
  async fn test_failure_restores_pre_batch_snapshot() {
    let store = Store::new();
    store.set_cache("reservations:court:1", json!([1, 2, 3, 4, 5]), None);
    let before = store.cache_entry("reservations:court:1");
    let sync = DataSync::new(store.clone());

    let options = BatchOptions {
      optimistic: Some(("reservations:court:1".to_string(), json!([]))),
      ..BatchOptions::default()
    };
    sync
      .process_batch((1..=10).collect(), &options, flaky, |_| {})
      .await
      .unwrap();

    assert_eq!(store.cache_entry("reservations:court:1"), before);
    assert!(store.pending_updates().is_empty());
  }

  #[tokio::test]
  async fn test_partial_failure_still_invalidates_dependents() {
    let store = Store::new();
    store.set_cache("reservations:court:1", json!([1, 2, 3]), None);
    store.set_cache("availability:court:1", json!("stale"), None);
    store.set_cache("court:1", json!({"name": "Central"}), None);
    let sync = DataSync::new(store.clone());

    let options = BatchOptions {
      optimistic: Some(("reservations:court:1".to_string(), json!([]))),
      invalidate_pattern: Some("^availability".to_string()),
      ..BatchOptions::default()
    };
    let report = sync
      .process_batch((1..=10).collect(), &options, flaky, |_| {})
      .await
      .unwrap();

    assert_eq!(report.succeeded(), 9);
    assert_eq!(store.get_cache("availability:court:1"), None);
    assert_eq!(store.get_cache("reservations:court:1"), Some(json!([1, 2, 3])));
    assert_eq!(store.get_cache("court:1"), Some(json!({"name": "Central"})));
  }

  #[tokio::test]
  async fn test_total_failure_invalidates_nothing() {
    let store = Store::new();
    store.set_cache("availability:court:1", json!("busy"), None);
    let sync = DataSync::new(store.clone());

    let options = BatchOptions {
      invalidate_pattern: Some("^availability".to_string()),
      ..BatchOptions::default()
    };
    let report = sync
      .process_batch(vec![5u32, 5], &options, flaky, |_| {})
      .await
      .unwrap();

    assert_eq!(report.succeeded(), 0);
    assert_eq!(store.get_cache("availability:court:1"), Some(json!("busy")));
  }

  #[tokio::test]
  async fn test_success_commits_and_invalidates() {
    let store = Store::new();
    store.set_cache("availability:court:1", json!("busy"), None);
    let sync = DataSync::new(store.clone());

    let options = BatchOptions {
      optimistic: Some(("reservations:court:1".to_string(), json!([]))),
      invalidate_pattern: Some("^availability".to_string()),
      ..BatchOptions::default()
    };
    let report = sync
      .process_batch(vec![1u32, 2, 3], &options, |i| async move { Ok::<_, MutationError>(i) }, |_| {})
      .await
      .unwrap();

    assert_eq!(report.failed(), 0);
    assert_eq!(store.get_cache("reservations:court:1"), Some(json!([])));
    assert_eq!(store.get_cache("availability:court:1"), None);
  }

  #[tokio::test]
  async fn test_empty_input_and_bad_config() {
    let sync = DataSync::new(Store::new());

    let report = sync
      .process_batch(Vec::<u32>::new(), &BatchOptions::default(), flaky, |_| {})
      .await
      .unwrap();
    assert!(report.results.is_empty());
    assert_eq!(report.progress, 100.0);

    let options = BatchOptions {
      batch_size: 0,
      ..BatchOptions::default()
    };
    let result = sync.process_batch(vec![1u32], &options, flaky, |_| {}).await;
    assert!(matches!(result, Err(MutationError::InvalidConfig(_))));
  }
}
