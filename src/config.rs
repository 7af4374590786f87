use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::Freshness;
use crate::gitlab::TlsOptions;

const APP_DIR: &str = "labpal";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub gitlab: GitLabConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabConfig {
  /// Instance URL, without the `/api/v4` suffix
  #[serde(default = "default_url")]
  pub url: String,
  /// Extra CA certificate (PEM) to trust
  pub ca_cert: Option<PathBuf>,
  /// Client certificate with its private key (PEM)
  pub client_cert: Option<PathBuf>,
  #[serde(default)]
  pub ignore_cert_errors: bool,
}

fn default_url() -> String {
  "https://gitlab.com".to_string()
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CacheConfig {
  /// Age after which cached data is refreshed in the background
  #[serde(default = "default_soft_secs")]
  pub soft_secs: i64,
  /// Age after which cached data is no longer served
  #[serde(default = "default_hard_secs")]
  pub hard_secs: i64,
}

fn default_soft_secs() -> i64 {
  Freshness::default().soft_secs
}

fn default_hard_secs() -> i64 {
  Freshness::default().hard_secs
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      soft_secs: default_soft_secs(),
      hard_secs: default_hard_secs(),
    }
  }
}

impl CacheConfig {
  pub fn freshness(&self) -> Freshness {
    Freshness::new(self.soft_secs, self.hard_secs)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./labpal.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/labpal/config.yaml
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
        "No configuration file found. Create one at ~/.config/labpal/config.yaml\n\
                 with at least:\n\n  gitlab:\n    url: https://gitlab.com"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("labpal.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join(APP_DIR).join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;

    if config.cache.soft_secs < 0 || config.cache.soft_secs > config.cache.hard_secs {
      return Err(eyre!(
        "cache.soft_secs ({}) must be between 0 and cache.hard_secs ({})",
        config.cache.soft_secs,
        config.cache.hard_secs
      ));
    }

    Ok(config)
  }

  /// Get the GitLab access token from environment variables.
  ///
  /// Checks LABPAL_GITLAB_TOKEN first, then GITLAB_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("LABPAL_GITLAB_TOKEN")
      .or_else(|_| std::env::var("GITLAB_TOKEN"))
      .map_err(|_| {
        eyre!("GitLab token not found. Set LABPAL_GITLAB_TOKEN or GITLAB_TOKEN environment variable.")
      })
  }

  /// Read the configured certificate files.
  pub fn tls_options(&self) -> Result<TlsOptions> {
    let read = |path: &Path| {
      std::fs::read(path).map_err(|e| eyre!("Failed to read certificate {}: {}", path.display(), e))
    };

    Ok(TlsOptions {
      ca_cert_pem: self.gitlab.ca_cert.as_deref().map(read).transpose()?,
      client_identity_pem: self.gitlab.client_cert.as_deref().map(read).transpose()?,
      accept_invalid_certs: self.gitlab.ignore_cert_errors,
    })
  }

  /// Per-installation support directory holding the cache and logs.
  pub fn support_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join(APP_DIR))
  }

  pub fn cache_dir() -> Result<PathBuf> {
    Ok(Self::support_dir()?.join("cache"))
  }

  pub fn icon_dir() -> Result<PathBuf> {
    Ok(Self::cache_dir()?.join("img"))
  }

  pub fn log_dir() -> Result<PathBuf> {
    Ok(Self::support_dir()?.join("logs"))
  }
}
