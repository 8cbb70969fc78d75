use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use super::error::MutationError;

/// Delay strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
  /// Retry immediately
  None,
  /// Wait the same delay before every retry
  Fixed(Duration),
  /// Double the delay after every retry, starting at `base`, capped at `max`
  Exponential { base: Duration, max: Duration },
}

impl Backoff {
  /// Delay before retry number `retry` (1-based).
  pub fn delay(&self, retry: u32) -> Duration {
    match *self {
      Backoff::None => Duration::ZERO,
      Backoff::Fixed(delay) => delay,
      Backoff::Exponential { base, max } => {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        base.saturating_mul(factor).min(max)
      }
    }
  }
}

/// How many times a transient failure is retried and how long to wait
/// between attempts. Permanent failures are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_retries: u32,
  pub backoff: Backoff,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: 3,
      backoff: Backoff::Exponential {
        base: Duration::from_millis(200),
        max: Duration::from_secs(5),
      },
    }
  }
}

impl RetryPolicy {
  /// A single attempt, no retries.
  pub fn never() -> Self {
    Self {
      max_retries: 0,
      backoff: Backoff::None,
    }
  }

  pub fn new(max_retries: u32, backoff: Backoff) -> Self {
    Self {
      max_retries,
      backoff,
    }
  }

  /// Run `op` until it succeeds, fails permanently, or retries run out.
  pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, MutationError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MutationError>>,
  {
    let mut retry = 0;
    loop {
      match op().await {
        Ok(value) => return Ok(value),
        Err(e) if e.is_transient() && retry < self.max_retries => {
          retry += 1;
          let delay = self.backoff.delay(retry);
          debug!(retry, max = self.max_retries, ?delay, "Retrying after transient error: {}", e);
          if !delay.is_zero() {
            tokio::time::sleep(delay).await;
          }
        }
        Err(e) => return Err(e),
      }
    }
  }
}

/// Retry settings as written in the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  pub max_retries: u32,
  pub backoff: BackoffKind,
  pub base_delay_ms: u64,
  pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
  None,
  Fixed,
  #[default]
  Exponential,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_retries: 3,
      backoff: BackoffKind::Exponential,
      base_delay_ms: 200,
      max_delay_ms: 5000,
    }
  }
}

impl From<&RetryConfig> for RetryPolicy {
  fn from(config: &RetryConfig) -> Self {
    let base = Duration::from_millis(config.base_delay_ms);
    let backoff = match config.backoff {
      BackoffKind::None => Backoff::None,
      BackoffKind::Fixed => Backoff::Fixed(base),
      BackoffKind::Exponential => Backoff::Exponential {
        base,
        max: Duration::from_millis(config.max_delay_ms),
      },
    };
    RetryPolicy::new(config.max_retries, backoff)
  }
}
