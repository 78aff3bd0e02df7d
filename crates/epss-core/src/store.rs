//! On-disk snapshot of the score cache using redb.
//!
//! # Table design
//!
//! A single `SCORES` table maps the canonical CVE id (`CVE-2021-44228`) to a
//! JSON-encoded `EpssScore`. Keys sort lexically, so `list_all` comes back in
//! id order without post-sorting.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};

use crate::cache::ScoreCache;
use crate::error::{EpssError, Result};
use crate::types::EpssScore;

/// Key: canonical CVE id. Value: JSON-encoded EpssScore.
const SCORES: TableDefinition<&str, &[u8]> = TableDefinition::new("epss_scores");

fn db_err(e: impl std::fmt::Display) -> EpssError {
    EpssError::ScoreDb(e.to_string())
}

// ---------------------------------------------------------------------------
// ScoreDb
// ---------------------------------------------------------------------------

pub struct ScoreDb {
    db: Database,
}

impl ScoreDb {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        // Ensure the table exists before any reads
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(SCORES).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    /// Write every record in a single transaction.
    pub fn upsert_many(&self, scores: &[EpssScore]) -> Result<()> {
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(SCORES).map_err(db_err)?;
            for score in scores {
                let value = serde_json::to_vec(score)?;
                table
                    .insert(score.cve_id.as_str(), value.as_slice())
                    .map_err(db_err)?;
            }
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    /// All stored records in CVE id order. Undecodable rows are skipped.
    pub fn list_all(&self) -> Result<Vec<EpssScore>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(SCORES).map_err(db_err)?;

        let mut result = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (k, v) = entry.map_err(db_err)?;
            match serde_json::from_slice::<EpssScore>(v.value()) {
                Ok(score) => result.push(score),
                Err(e) => tracing::warn!(cve = k.value(), error = %e, "skipping unreadable score"),
            }
        }
        Ok(result)
    }

    /// Records whose age has reached `max_age` at `now`.
    pub fn stale(&self, now: DateTime<Utc>, max_age: Duration) -> Result<Vec<EpssScore>> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|s| !s.is_fresh(now, max_age))
            .collect())
    }

    pub fn clear(&self) -> Result<()> {
        let wt = self.db.begin_write().map_err(db_err)?;
        wt.delete_table(SCORES).map_err(db_err)?;
        wt.open_table(SCORES).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    /// Persist the current cache contents. Returns the number of records written.
    pub fn save_all(&self, cache: &ScoreCache) -> Result<usize> {
        let scores = cache.snapshot();
        self.upsert_many(&scores)?;
        Ok(scores.len())
    }

    /// Warm `cache` from disk. Returns the number of records loaded.
    pub fn load_into(&self, cache: &ScoreCache) -> Result<usize> {
        let scores = self.list_all()?;
        let count = scores.len();
        for score in scores {
            cache.insert(score);
        }
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
