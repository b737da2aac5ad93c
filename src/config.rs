//! Client configuration.
//!
//! Every knob has a default matching the service contract, so a missing file
//! or field falls back to sensible behavior. Windows are expressed in
//! milliseconds on the wire and converted to durations at the edges.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("config file not found: {0}")]
  NotFound(PathBuf),
  #[error("failed to read config file {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("failed to parse config file {path}: {source}")]
  Parse {
    path: PathBuf,
    source: serde_yaml::Error,
  },
  #[error("invalid base url {url}: {source}")]
  BadUrl {
    url: String,
    source: url::ParseError,
  },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Root of the API, e.g. "http://localhost:3000/api"
  #[serde(default = "default_base_url")]
  pub base_url: String,
  /// Per-request timeout
  #[serde(default = "default_timeout_ms")]
  pub timeout_ms: u64,
  /// How long a fetched value counts as fresh
  #[serde(default = "default_stale_ms")]
  pub stale_ms: i64,
  /// How long an unobserved cache entry is retained before eviction
  #[serde(default = "default_gc_ms")]
  pub gc_ms: i64,
  /// Automatic retries for reads
  #[serde(default = "default_read_retry")]
  pub read_retry: u32,
  /// Delay between read retries
  #[serde(default = "default_read_retry_delay_ms")]
  pub read_retry_delay_ms: u64,
  /// Recognized for completeness; writes are never retried, so any value
  /// above 0 is ignored
  #[serde(default)]
  pub write_retry: u32,
}

fn default_base_url() -> String {
  "http://localhost:3000/api".to_string()
}

fn default_timeout_ms() -> u64 {
  10_000
}

fn default_stale_ms() -> i64 {
  120_000
}

fn default_gc_ms() -> i64 {
  600_000
}

fn default_read_retry() -> u32 {
  1
}

fn default_read_retry_delay_ms() -> u64 {
  1_000
}

impl Default for Config {
  fn default() -> Self {
    Self {
      base_url: default_base_url(),
      timeout_ms: default_timeout_ms(),
      stale_ms: default_stale_ms(),
      gc_ms: default_gc_ms(),
      read_retry: default_read_retry(),
      read_retry_delay_ms: default_read_retry_delay_ms(),
      write_retry: 0,
    }
  }
}

impl Config {
  /// Load configuration.
  ///
  /// Search order:
  /// 1. Explicit path if provided (an error if it does not exist)
  /// 2. ./aula.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/aula/config.yaml
  ///
  /// Falls back to defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(ConfigError::NotFound(p.to_path_buf()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("aula.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("aula").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;

    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  pub fn base_url(&self) -> Result<Url, ConfigError> {
    Url::parse(&self.base_url).map_err(|source| ConfigError::BadUrl {
      url: self.base_url.clone(),
      source,
    })
  }

  pub fn timeout(&self) -> std::time::Duration {
    std::time::Duration::from_millis(self.timeout_ms)
  }

  pub fn stale_after(&self) -> chrono::Duration {
    chrono::Duration::milliseconds(self.stale_ms)
  }

  pub fn retain_for(&self) -> chrono::Duration {
    chrono::Duration::milliseconds(self.gc_ms)
  }

  pub fn read_retry_delay(&self) -> std::time::Duration {
    std::time::Duration::from_millis(self.read_retry_delay_ms)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_the_service_contract() {
    let config = Config::default();
    assert_eq!(config.timeout_ms, 10_000);
    assert_eq!(config.stale_ms, 120_000);
    assert_eq!(config.gc_ms, 600_000);
    assert_eq!(config.read_retry, 1);
    assert_eq!(config.read_retry_delay_ms, 1_000);
    assert_eq!(config.write_retry, 0);
  }

  #[test]
  fn partial_yaml_fills_in_defaults() {
    let config: Config =
      serde_yaml::from_str("base_url: https://example.org/api\ntimeout_ms: 500\n").expect("parse");
    assert_eq!(config.base_url, "https://example.org/api");
    assert_eq!(config.timeout_ms, 500);
    assert_eq!(config.stale_ms, 120_000);
  }

  #[test]
  fn bad_base_url_is_reported() {
    let config = Config {
      base_url: "not a url".to_string(),
      ..Config::default()
    };
    assert!(config.base_url().is_err());
  }
}
