use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sync::RetryConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub retry: RetryConfig,
  #[serde(default)]
  pub notifications: NotificationsConfig,
  #[serde(default)]
  pub batch: BatchConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the padel API (e.g., "https://api.mypadel.club")
  pub url: String,
  /// Per-request timeout
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// Club used when a command doesn't name one
  pub club_id: Option<u64>,
}

fn default_timeout_secs() -> u64 {
  15
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Mirror the cache into SQLite so it survives restarts
  pub persist: bool,
  /// Database location (defaults to $XDG_DATA_HOME/padel-sync/cache.db)
  pub path: Option<PathBuf>,
  /// Expiry of cached results; unset keeps them until invalidated
  pub ttl_secs: Option<u64>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      persist: true,
      path: None,
      ttl_secs: Some(300),
    }
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> Option<Duration> {
    self.ttl_secs.map(Duration::from_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
  /// Auto-dismiss delay for notifications raised by mutations
  pub auto_dismiss_ms: Option<u64>,
}

impl Default for NotificationsConfig {
  fn default() -> Self {
    Self {
      auto_dismiss_ms: Some(4000),
    }
  }
}

impl NotificationsConfig {
  pub fn auto_dismiss(&self) -> Option<Duration> {
    self.auto_dismiss_ms.map(Duration::from_millis)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
  /// Items dispatched concurrently per batch
  pub size: usize,
}

impl Default for BatchConfig {
  fn default() -> Self {
    Self {
      size: crate::sync::DEFAULT_BATCH_SIZE,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./padel-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/padel-sync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/padel-sync/config.yaml\n\
                 with at least an `api.url` entry."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("padel-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("padel-sync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.batch.size == 0 {
      return Err(eyre!("batch.size must be at least 1"));
    }
    Ok(config)
  }

  /// Get the API token from environment variables.
  ///
  /// Checks PADEL_SYNC_TOKEN first, then PADEL_API_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("PADEL_SYNC_TOKEN")
      .or_else(|_| std::env::var("PADEL_API_TOKEN"))
      .map_err(|_| {
        eyre!("API token not found. Set PADEL_SYNC_TOKEN or PADEL_API_TOKEN environment variable.")
      })
  }
}
