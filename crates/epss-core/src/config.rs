use crate::error::{EpssError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.first.org/data/v1/epss";

/// Upper bound on identifiers per request accepted by the FIRST.org API.
pub const UPSTREAM_BATCH_CEILING: usize = 100;

pub const EPSS_DIR: &str = ".epss";
pub const CONFIG_FILE: &str = "config.yaml";
pub const CACHE_FILE: &str = "cache.redb";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// EpssConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpssConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Age after which a cached score is refetched.
    #[serde(default = "default_freshness_hours")]
    pub freshness_hours: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// On-disk snapshot location. `None` falls back to `~/.epss/cache.redb`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_path: Option<PathBuf>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_freshness_hours() -> u64 {
    24
}

fn default_cache_capacity() -> u64 {
    10_000
}

fn default_batch_size() -> usize {
    UPSTREAM_BATCH_CEILING
}

impl Default for EpssConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            freshness_hours: default_freshness_hours(),
            cache_capacity: default_cache_capacity(),
            batch_size: default_batch_size(),
            cache_path: None,
        }
    }
}

impl EpssConfig {
    /// Load from a YAML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: EpssConfig = serde_yaml::from_str(&data)?;
        Ok(config)
    }

    /// Load from `path` (defaults when `None`), then apply `EPSS_*`
    /// environment overrides.
    pub fn load_with_env(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("EPSS_BASE_URL") {
            self.base_url = url;
        }
        if let Some(v) = lookup("EPSS_TIMEOUT_SECS") {
            self.timeout_secs = parse_override("EPSS_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("EPSS_MAX_RETRIES") {
            self.max_retries = parse_override("EPSS_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("EPSS_FRESHNESS_HOURS") {
            self.freshness_hours = parse_override("EPSS_FRESHNESS_HOURS", &v)?;
        }
        if let Some(path) = lookup("EPSS_CACHE_PATH") {
            self.cache_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn freshness_window(&self) -> Duration {
        hours(self.freshness_hours)
    }

    /// Batch size actually used when chunking requests. Never zero.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(1, UPSTREAM_BATCH_CEILING)
    }

    /// Resolve the snapshot path, defaulting under the home directory.
    pub fn resolved_cache_path(&self) -> Result<PathBuf> {
        match &self.cache_path {
            Some(p) => Ok(p.clone()),
            None => Ok(epss_home()?.join(CACHE_FILE)),
        }
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if !(self.base_url.starts_with("https://") || self.base_url.starts_with("http://")) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!("base_url '{}' must be an http(s) URL", self.base_url),
            });
        } else if self.base_url.starts_with("http://") {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!("base_url '{}' is not using TLS", self.base_url),
            });
        }

        if self.timeout_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "timeout_secs must be greater than 0".to_string(),
            });
        }

        if self.cache_capacity == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "cache_capacity must be greater than 0".to_string(),
            });
        }

        if self.batch_size == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "batch_size must be greater than 0".to_string(),
            });
        } else if self.batch_size > UPSTREAM_BATCH_CEILING {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "batch_size {} exceeds upstream limit; {} will be used",
                    self.batch_size, UPSTREAM_BATCH_CEILING
                ),
            });
        }

        if self.max_retries == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "max_retries is 0; upstream requests will be attempted once".to_string(),
            });
        }

        warnings
    }
}

/// `h` hours as a `Duration`, saturating instead of overflowing.
pub fn hours(h: u64) -> Duration {
    Duration::from_secs(h.saturating_mul(3600))
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| EpssError::Config(format!("{key}={value} is not a valid number")))
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// `~/.epss`
pub fn epss_home() -> Result<PathBuf> {
    let home = home::home_dir().ok_or(EpssError::HomeNotFound)?;
    Ok(home.join(EPSS_DIR))
}

/// `~/.epss/config.yaml`
pub fn default_config_path() -> Result<PathBuf> {
    Ok(epss_home()?.join(CONFIG_FILE))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
