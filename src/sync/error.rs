use thiserror::Error;

/// Failure of a remote mutation.
///
/// Variants fall into three groups: transient failures that are worth
/// retrying, permanent failures that are surfaced immediately, and
/// configuration mistakes caught before anything runs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MutationError {
  /// Connection failure or timeout before a response arrived
  #[error("network error: {0}")]
  Network(String),

  /// The server answered with a non-success status
  #[error("HTTP {status}: {message}")]
  Status { status: u16, message: String },

  /// The response body could not be decoded, or the result could not be cached
  #[error("invalid response: {0}")]
  Decode(String),

  /// The mutation was configured incorrectly
  #[error("invalid mutation config: {0}")]
  InvalidConfig(String),
}

impl MutationError {
  /// Whether retrying the same request may succeed.
  ///
  /// Network errors, request timeouts, rate limiting and server errors are
  /// transient. Every other status is a permanent rejection.
  pub fn is_transient(&self) -> bool {
    match self {
      MutationError::Network(_) => true,
      MutationError::Status { status, .. } => matches!(status, 408 | 429 | 500..=599),
      MutationError::Decode(_) | MutationError::InvalidConfig(_) => false,
    }
  }
}
