use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bracket::BracketRules;
use crate::cache::FreshnessPolicy;
use crate::remote::RetryPolicy;

/// Leagues fanned out over when a command names none:
/// Premier League, La Liga, Serie A, Bundesliga, Ligue 1.
const DEFAULT_LEAGUES: [u32; 5] = [39, 140, 135, 78, 61];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub retry: RetryConfig,
  pub cache: CacheConfig,
  pub leagues: Vec<u32>,
  /// Round keyword lists for bracket synthesis
  pub bracket: BracketRules,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      api: ApiConfig::default(),
      retry: RetryConfig::default(),
      cache: CacheConfig::default(),
      leagues: DEFAULT_LEAGUES.to_vec(),
      bracket: BracketRules::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub url: String,
  /// Per-request timeout
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: "https://v3.football.api-sports.io".to_string(),
      timeout_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  pub max_retries: u32,
  pub base_delay_ms: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_retries: 3,
      base_delay_ms: 2000,
    }
  }
}

impl RetryConfig {
  pub fn policy(&self) -> RetryPolicy {
    RetryPolicy {
      max_retries: self.max_retries,
      base_delay: Duration::from_millis(self.base_delay_ms),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
  /// On-disk SQLite database, survives restarts
  #[default]
  Sqlite,
  /// Process-local map, gone on exit
  Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub backend: CacheBackend,
  /// Database path (defaults to <data_dir>/kickoff/cache.db)
  pub path: Option<PathBuf>,
  /// Freshness window of fixtures lists, standings, teams and leagues
  pub static_ttl_secs: u64,
  /// Freshness window of in-play data
  pub live_ttl_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      backend: CacheBackend::Sqlite,
      path: None,
      static_ttl_secs: 24 * 60 * 60,
      live_ttl_secs: 30,
    }
  }
}

impl CacheConfig {
  /// Database file, the configured one or the default in the data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.path {
      Some(path) => Ok(path.clone()),
      None => Ok(Config::data_dir()?.join("cache.db")),
    }
  }

  pub fn freshness(&self) -> FreshnessPolicy {
    FreshnessPolicy {
      static_ttl: Duration::from_secs(self.static_ttl_secs),
      live_ttl: Duration::from_secs(self.live_ttl_secs),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./kickoff.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/kickoff/config.yaml
  ///
  /// Without any file the defaults apply.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("kickoff.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("kickoff").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty file deserializes to null, not to an empty mapping
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;

    if config.api.timeout_secs == 0 {
      return Err(eyre!("api.timeout_secs must be greater than zero"));
    }
    Ok(config)
  }

  /// Directory holding the cache database and the log file.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("kickoff"))
  }

  /// Get the API-Football key from environment variables.
  ///
  /// Checks KICKOFF_API_KEY first, then API_FOOTBALL_KEY as fallback.
  /// Without a key requests are sent unauthenticated and upstream answers 403.
  pub fn api_key() -> Option<String> {
    std::env::var("KICKOFF_API_KEY")
      .or_else(|_| std::env::var("API_FOOTBALL_KEY"))
      .ok()
      .filter(|key| !key.trim().is_empty())
  }
}
