use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::agent::AgentConfig;
use crate::cache::SqliteStorage;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the manifest paths and relative fetch targets are resolved against
  pub origin: Url,
  /// Cache generation name; change it whenever the manifest or fetch policy changes
  pub cache_name: String,
  /// Path of the fallback document served to navigations while offline
  #[serde(default = "default_offline_url")]
  pub offline_url: String,
  /// Absolute paths cached at install time; must include `offline_url`
  pub manifest: Vec<String>,
  /// Activate a new generation right after install; when false it waits
  /// until no page is controlled by the previous one
  #[serde(default = "default_skip_waiting")]
  pub skip_waiting: bool,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// SQLite database file (defaults to $XDG_DATA_HOME/swcache/cache.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
  /// Request timeout in seconds; 0 disables it
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  #[serde(default = "default_user_agent")]
  pub user_agent: String,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      timeout_secs: default_timeout_secs(),
      user_agent: default_user_agent(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// Default filter when RUST_LOG is not set
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Write a daily rolling log file here in addition to stderr
  pub directory: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      directory: None,
    }
  }
}

fn default_skip_waiting() -> bool {
  true
}

fn default_offline_url() -> String {
  "/offline".to_string()
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_user_agent() -> String {
  format!("swcache/{}", env!("CARGO_PKG_VERSION"))
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./swcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/swcache/config.yaml
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
        "No configuration file found. Create one at ~/.config/swcache/config.yaml\n\
                 See swcache.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("swcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("swcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.cache_name.trim().is_empty() {
      return Err(eyre!("cache_name must not be empty"));
    }
    if !self.offline_url.starts_with('/') {
      return Err(eyre!(
        "offline_url must be an absolute path, got '{}'",
        self.offline_url
      ));
    }
    if let Some(bad) = self.manifest.iter().find(|p| !p.starts_with('/')) {
      return Err(eyre!("Manifest entries must be absolute paths, got '{}'", bad));
    }
    if !self.manifest.contains(&self.offline_url) {
      return Err(eyre!(
        "Manifest must include the offline document '{}'",
        self.offline_url
      ));
    }
    Ok(())
  }

  /// Resolve a path or absolute URL against the origin.
  pub fn resolve(&self, target: &str) -> Result<Url> {
    self
      .origin
      .join(target)
      .map_err(|e| eyre!("Invalid URL '{}': {}", target, e))
  }

  /// Agent settings with every URL resolved.
  pub fn agent_config(&self) -> Result<AgentConfig> {
    let manifest = self
      .manifest
      .iter()
      .map(|p| self.resolve(p))
      .collect::<Result<Vec<_>>>()?;

    Ok(AgentConfig {
      generation: self.cache_name.clone(),
      offline_url: self.resolve(&self.offline_url)?,
      manifest,
      skip_waiting: self.skip_waiting,
    })
  }

  pub fn storage_path(&self) -> Result<PathBuf> {
    match &self.storage.path {
      Some(path) => Ok(path.clone()),
      None => SqliteStorage::default_path(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLE: &str = r#"
origin: https://app.example
cache_name: app-cache-v2
manifest:
  - /
  - /static/css/style.css
  - /offline
"#;

  #[test]
  fn test_parse_with_defaults() {
    let config = Config::from_yaml(SAMPLE).unwrap();
    assert_eq!(config.cache_name, "app-cache-v2");
    assert_eq!(config.offline_url, "/offline");
    assert!(config.skip_waiting);
    assert_eq!(config.network.timeout_secs, 30);
    assert_eq!(config.log.level, "info");
    assert!(config.storage.path.is_none());
  }

  #[test]
  fn test_agent_config_resolves_urls() {
    let agent = Config::from_yaml(SAMPLE).unwrap().agent_config().unwrap();
    assert_eq!(agent.generation, "app-cache-v2");
    assert_eq!(agent.offline_url.as_str(), "https://app.example/offline");
    assert_eq!(agent.manifest.len(), 3);
    assert_eq!(
      agent.manifest[1].as_str(),
      "https://app.example/static/css/style.css"
    );
  }

  #[test]
  fn test_manifest_without_offline_document_is_rejected() {
    let yaml = r#"
origin: https://app.example
cache_name: v1
manifest: ["/", "/login"]
"#;
    let err = Config::from_yaml(yaml).unwrap_err();
    assert!(err.to_string().contains("offline document"));
  }

  #[test]
  fn test_relative_manifest_entry_is_rejected() {
    let yaml = r#"
origin: https://app.example
cache_name: v1
manifest: ["/offline", "static/app.js"]
"#;
    assert!(Config::from_yaml(yaml).is_err());
  }

  #[test]
  fn test_load_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("swcache.yaml");
    std::fs::write(&path, SAMPLE).unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.manifest.len(), 3);

    let missing = dir.path().join("missing.yaml");
    assert!(Config::load(Some(&missing)).is_err());
  }
}
