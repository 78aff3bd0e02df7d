//! In-memory score cache shared by every lookup in the process.
//!
//! Entries are never expired by the cache itself: freshness is decided per
//! lookup from `EpssScore::retrieved_at`, so a stale entry stays available as
//! a fallback when the upstream cannot be reached. Capacity is bounded and
//! moka evicts the least useful entries once it is reached.

use crate::cve::CveId;
use crate::types::EpssScore;
use chrono::{DateTime, Utc};
use moka::sync::Cache;
use std::time::Duration;

/// Cloning is cheap; clones share the same storage.
#[derive(Debug, Clone)]
pub struct ScoreCache {
    inner: Cache<CveId, EpssScore>,
}

impl ScoreCache {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: Cache::builder().max_capacity(max_capacity).build(),
        }
    }

    /// Cached record regardless of age.
    pub fn get(&self, id: &CveId) -> Option<EpssScore> {
        self.inner.get(id)
    }

    /// Cached record only if it is younger than `window`.
    pub fn get_fresh(&self, id: &CveId, now: DateTime<Utc>, window: Duration) -> Option<EpssScore> {
        self.inner.get(id).filter(|s| s.is_fresh(now, window))
    }

    /// Insert or replace. Concurrent writers for the same id: last write wins.
    pub fn insert(&self, score: EpssScore) {
        self.inner.insert(score.cve_id.clone(), score);
    }

    pub fn invalidate(&self, id: &CveId) {
        self.inner.invalidate(id);
    }

    pub fn clear(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks();
    }

    pub fn len(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All cached records, sorted by CVE id.
    pub fn snapshot(&self) -> Vec<EpssScore> {
        let mut scores: Vec<EpssScore> = self.inner.iter().map(|(_, v)| v).collect();
        scores.sort_by(|a, b| a.cve_id.cmp(&b.cve_id));
        scores
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
