use anyhow::Context as _;
use epss_core::config::{default_config_path, EpssConfig};
use epss_core::store::ScoreDb;
use epss_core::{EpssService, ScoreCache};
use std::path::{Path, PathBuf};

/// Effective configuration for one CLI invocation.
pub struct Context {
    pub config: EpssConfig,
    /// `None` when no explicit path was given and no home directory exists.
    pub config_path: Option<PathBuf>,
    pub use_snapshot: bool,
}

impl Context {
    /// Resolve the config file.
    ///
    /// Priority:
    /// 1. `--config` flag / `EPSS_CONFIG` env var (passed in as `explicit`)
    /// 2. `~/.epss/config.yaml`
    /// 3. Built-in defaults
    ///
    /// `EPSS_*` overrides are applied on top in every case.
    pub fn load(explicit: Option<&Path>, no_cache: bool) -> anyhow::Result<Self> {
        let config_path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path().ok(),
        };

        let config = EpssConfig::load_with_env(config_path.as_deref()).with_context(|| {
            match &config_path {
                Some(path) => format!("failed to load config {}", path.display()),
                None => "invalid EPSS_* environment override".to_string(),
            }
        })?;

        Ok(Self {
            config,
            config_path,
            use_snapshot: !no_cache,
        })
    }

    /// Open the on-disk snapshot, if enabled. Failure to open is logged and
    /// treated as "no snapshot" so lookups still proceed.
    pub fn open_snapshot(&self) -> Option<ScoreDb> {
        if !self.use_snapshot {
            return None;
        }
        let path = match self.config.resolved_cache_path() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "no cache path available, continuing without snapshot");
                return None;
            }
        };
        match ScoreDb::open(&path) {
            Ok(db) => Some(db),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to open score cache");
                None
            }
        }
    }

    /// Build a service whose cache is warmed from the snapshot.
    pub fn session(&self) -> anyhow::Result<Session> {
        let cache = ScoreCache::new(self.config.cache_capacity);
        let snapshot = self.open_snapshot();
        if let Some(db) = &snapshot {
            match db.load_into(&cache) {
                Ok(n) => tracing::debug!(loaded = n, "warmed cache from snapshot"),
                Err(e) => tracing::warn!(error = %e, "failed to read score cache"),
            }
        }
        let service = EpssService::from_config(&self.config, cache)
            .context("failed to initialise EPSS client")?;
        Ok(Session { service, snapshot })
    }
}

/// A service plus the snapshot it should be written back to.
pub struct Session {
    pub service: EpssService,
    snapshot: Option<ScoreDb>,
}

impl Session {
    /// Persist the cache. Errors are logged, never returned.
    pub fn finish(self) {
        if let Some(db) = &self.snapshot {
            if let Err(e) = db.save_all(self.service.cache()) {
                tracing::warn!(error = %e, "failed to save score cache");
            }
        }
    }
}
