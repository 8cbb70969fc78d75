//! Cache key flattening and invalidation patterns.

use regex::Regex;
use std::fmt;

/// Delimiter between key segments in the flattened form.
pub const KEY_DELIMITER: &str = ":";

/// Trait for typed query keys that address entries in the result cache.
pub trait QueryKey {
  /// Key segments, most general first (e.g., `["reservations", "court", "3"]`).
  fn segments(&self) -> Vec<String>;

  /// Human-readable description for logs and listings.
  fn description(&self) -> String;

  /// Flattened string form used as the cache key.
  fn cache_key(&self) -> String {
    flatten(&self.segments())
  }
}

impl QueryKey for str {
  fn segments(&self) -> Vec<String> {
    self.split(KEY_DELIMITER).map(String::from).collect()
  }

  fn description(&self) -> String {
    self.to_string()
  }

  fn cache_key(&self) -> String {
    self.to_string()
  }
}

/// Join key segments with the key delimiter.
pub fn flatten<S: AsRef<str>>(segments: &[S]) -> String {
  segments
    .iter()
    .map(|s| s.as_ref())
    .collect::<Vec<_>>()
    .join(KEY_DELIMITER)
}

/// Predicate selecting which cached keys are stale.
///
/// Wraps a regular expression tested against flattened keys. An empty
/// pattern matches nothing.
#[derive(Clone)]
pub struct InvalidationPattern {
  regex: Option<Regex>,
}

impl InvalidationPattern {
  /// Compile a pattern. Leading/trailing whitespace is ignored.
  pub fn new(pattern: &str) -> Result<Self, regex::Error> {
    let pattern = pattern.trim();
    if pattern.is_empty() {
      return Ok(Self::none());
    }
    Ok(Self {
      regex: Some(Regex::new(pattern)?),
    })
  }

  /// A pattern matching exactly one key.
  pub fn exact(key: &str) -> Self {
    let regex = Regex::new(&format!("^{}$", regex::escape(key)))
      .expect("escaped literal is always a valid regex");
    Self { regex: Some(regex) }
  }

  /// A pattern that matches nothing.
  pub fn none() -> Self {
    Self { regex: None }
  }

  pub fn is_empty(&self) -> bool {
    self.regex.is_none()
  }

  pub fn matches(&self, key: &str) -> bool {
    self
      .regex
      .as_ref()
      .map(|re| re.is_match(key))
      .unwrap_or(false)
  }

  pub fn as_str(&self) -> &str {
    self.regex.as_ref().map(|re| re.as_str()).unwrap_or("")
  }
}

impl fmt::Debug for InvalidationPattern {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("InvalidationPattern")
      .field(&self.as_str())
      .finish()
  }
}
