//! Cache-fronted EPSS lookups with best-effort degradation.
//!
//! Only malformed identifiers are reported to the caller. Anything that goes
//! wrong upstream (transport, timeout, HTTP status, payload shape) is logged
//! and the affected ids come back absent, or stale if an older cached record
//! exists.

use crate::cache::ScoreCache;
use crate::client::{EpssSource, HttpSource};
use crate::config::EpssConfig;
use crate::cve::CveId;
use crate::error::Result;
use crate::types::EpssScore;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

pub struct EpssService<S = HttpSource> {
    source: S,
    cache: ScoreCache,
    freshness: Duration,
    batch_size: usize,
}

impl EpssService<HttpSource> {
    /// Service backed by the public HTTP endpoint described by `config`.
    pub fn from_config(config: &EpssConfig, cache: ScoreCache) -> Result<Self> {
        Ok(Self::new(HttpSource::new(config)?, cache, config))
    }
}

impl<S: EpssSource> EpssService<S> {
    pub fn new(source: S, cache: ScoreCache, config: &EpssConfig) -> Self {
        Self {
            source,
            cache,
            freshness: config.freshness_window(),
            batch_size: config.effective_batch_size(),
        }
    }

    /// Look up a single CVE.
    ///
    /// `Err` only for a malformed identifier, in which case nothing is sent
    /// upstream. `Ok(None)` when no score is known or the upstream failed.
    pub fn get_epss_score(&self, cve_id: &str) -> Result<Option<EpssScore>> {
        let id = CveId::parse(cve_id)?;
        Ok(self.lookup(std::slice::from_ref(&id)).remove(&id))
    }

    /// Look up many CVEs at once.
    ///
    /// Every identifier is validated before any request is made. The map
    /// holds only the ids that resolved.
    pub fn get_epss_scores<I, T>(&self, cve_ids: I) -> Result<HashMap<CveId, EpssScore>>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let ids = cve_ids
            .into_iter()
            .map(|raw| CveId::parse(raw.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.lookup(&ids))
    }

    /// Batched lookup over already validated ids. Never fails.
    pub fn lookup(&self, ids: &[CveId]) -> HashMap<CveId, EpssScore> {
        let unique: BTreeSet<&CveId> = ids.iter().collect();
        let now = Utc::now();

        let mut found = HashMap::with_capacity(unique.len());
        let mut misses: Vec<CveId> = Vec::new();
        for id in unique {
            match self.cache.get_fresh(id, now, self.freshness) {
                Some(score) => {
                    found.insert(id.clone(), score);
                }
                None => misses.push(id.clone()),
            }
        }

        if misses.is_empty() {
            tracing::debug!(hits = found.len(), "EPSS lookup served from cache");
            return found;
        }

        let hits = found.len();
        for chunk in misses.chunks(self.batch_size) {
            self.fetch_chunk(chunk, &mut found);
        }

        tracing::info!(
            requested = hits + misses.len(),
            cache_hits = hits,
            resolved = found.len(),
            "EPSS lookup complete"
        );
        found
    }

    fn fetch_chunk(&self, chunk: &[CveId], found: &mut HashMap<CveId, EpssScore>) {
        match self.source.fetch(chunk) {
            Ok(scores) => {
                for score in scores {
                    if !chunk.contains(&score.cve_id) {
                        tracing::debug!(cve = %score.cve_id, "ignoring unrequested EPSS entry");
                        continue;
                    }
                    self.cache.insert(score.clone());
                    found.insert(score.cve_id.clone(), score);
                }
                for id in chunk.iter().filter(|id| !found.contains_key(*id)) {
                    tracing::debug!(cve = %id, "no EPSS score published");
                }
            }
            Err(e) => {
                let mut stale = 0usize;
                for id in chunk {
                    if let Some(score) = self.cache.get(id) {
                        found.insert(id.clone(), score);
                        stale += 1;
                    }
                }
                if e.is_upstream() {
                    tracing::warn!(
                        error = %e,
                        batch = chunk.len(),
                        stale_fallback = stale,
                        "EPSS unavailable, continuing without fresh scores"
                    );
                } else {
                    tracing::error!(
                        error = %e,
                        batch = chunk.len(),
                        stale_fallback = stale,
                        "EPSS source failed, continuing without fresh scores"
                    );
                }
            }
        }
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        tracing::info!("EPSS cache cleared");
    }

    pub fn cache(&self) -> &ScoreCache {
        &self.cache
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EpssError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// In-memory upstream that records every batch it is asked for.
    #[derive(Default)]
    struct FakeSource {
        known: HashMap<String, (f64, f64)>,
        fail: bool,
        calls: AtomicUsize,
        batches: Mutex<Vec<Vec<String>>>,
    }

    impl FakeSource {
        fn with(entries: &[(&str, f64, f64)]) -> Self {
            Self {
                known: entries
                    .iter()
                    .map(|(id, e, p)| (id.to_string(), (*e, *p)))
                    .collect(),
                ..Self::default()
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl EpssSource for FakeSource {
        fn fetch(&self, ids: &[CveId]) -> Result<Vec<EpssScore>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batches
                .lock()
                .unwrap()
                .push(ids.iter().map(|i| i.to_string()).collect());
            if self.fail {
                return Err(EpssError::UpstreamUnavailable("request timed out".into()));
            }
            Ok(ids
                .iter()
                .filter_map(|id| {
                    self.known.get(id.as_str()).map(|(e, p)| {
                        EpssScore::new(id.clone(), *e, *p, None, Utc::now()).unwrap()
                    })
                })
                .collect())
        }
    }

    fn service(source: Arc<FakeSource>, config: &EpssConfig) -> EpssService<Arc<FakeSource>> {
        EpssService::new(source, ScoreCache::new(1_000), config)
    }

    #[test]
    fn returns_known_score() {
        let source = Arc::new(FakeSource::with(&[("CVE-2021-44228", 0.9445, 0.9999)]));
        let svc = service(source.clone(), &EpssConfig::default());
        let score = svc.get_epss_score("CVE-2021-44228").unwrap().unwrap();
        assert!((0.0..=1.0).contains(&score.epss_score));
        assert!((0.0..=1.0).contains(&score.percentile));
        assert_eq!(score.cve_id.as_str(), "CVE-2021-44228");
    }

    #[test]
    fn invalid_identifier_makes_no_request() {
        let source = Arc::new(FakeSource::default());
        let svc = service(source.clone(), &EpssConfig::default());
        let err = svc.get_epss_score("not-a-cve").unwrap_err();
        assert!(matches!(err, EpssError::InvalidIdentifier(_)));
        assert_eq!(source.calls(), 0);
    }

    #[test]
    fn invalid_identifier_in_batch_fails_whole_call() {
        let source = Arc::new(FakeSource::default());
        let svc = service(source.clone(), &EpssConfig::default());
        let err = svc
            .get_epss_scores(["CVE-2021-44228", "bogus"])
            .unwrap_err();
        assert!(matches!(err, EpssError::InvalidIdentifier(s) if s == "bogus"));
        assert_eq!(source.calls(), 0);
    }

    #[test]
    fn upstream_failure_degrades_to_none() {
        let source = Arc::new(FakeSource::failing());
        let svc = service(source.clone(), &EpssConfig::default());
        assert!(svc.get_epss_score("CVE-2021-44228").unwrap().is_none());
        assert!(svc.cache().is_empty());
    }

    #[test]
    fn unknown_cve_is_none_and_not_cached() {
        let source = Arc::new(FakeSource::with(&[]));
        let svc = service(source.clone(), &EpssConfig::default());
        assert!(svc.get_epss_score("CVE-9999-00000").unwrap().is_none());
        assert!(svc.cache().is_empty());
    }

    #[test]
    fn second_lookup_is_a_cache_hit() {
        let source = Arc::new(FakeSource::with(&[("CVE-2021-44228", 0.94, 0.99)]));
        let svc = service(source.clone(), &EpssConfig::default());
        svc.get_epss_score("CVE-2021-44228").unwrap().unwrap();
        svc.get_epss_score("cve-2021-44228").unwrap().unwrap();
        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn stale_entry_is_refetched() {
        let source = Arc::new(FakeSource::with(&[("CVE-2021-44228", 0.94, 0.99)]));
        let config = EpssConfig {
            freshness_hours: 0,
            ..EpssConfig::default()
        };
        let svc = service(source.clone(), &config);
        svc.get_epss_score("CVE-2021-44228").unwrap();
        svc.get_epss_score("CVE-2021-44228").unwrap();
        assert_eq!(source.calls(), 2);
    }

    #[test]
    fn stale_entry_survives_upstream_failure() {
        let cache = ScoreCache::new(100);
        let old = EpssScore::new(
            CveId::parse("CVE-2021-44228").unwrap(),
            0.90,
            0.99,
            None,
            Utc::now() - chrono::Duration::days(3),
        )
        .unwrap();
        cache.insert(old.clone());

        let source = Arc::new(FakeSource::failing());
        let svc = EpssService::new(source.clone(), cache, &EpssConfig::default());
        let score = svc.get_epss_score("CVE-2021-44228").unwrap().unwrap();
        assert_eq!(score, old);
        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn source_infrastructure_error_also_degrades() {
        struct Broken;
        impl EpssSource for Broken {
            fn fetch(&self, _ids: &[CveId]) -> Result<Vec<EpssScore>> {
                Err(EpssError::ScoreDb("disk full".into()))
            }
        }
        assert!(!EpssError::ScoreDb(String::new()).is_upstream());
        assert!(EpssError::MalformedResponse(String::new()).is_upstream());
        let svc = EpssService::new(Broken, ScoreCache::new(10), &EpssConfig::default());
        assert!(svc.get_epss_score("CVE-2021-44228").unwrap().is_none());
    }

    #[test]
    fn huge_freshness_window_keeps_entries_fresh() {
        let source = Arc::new(FakeSource::with(&[("CVE-2021-44228", 0.94, 0.99)]));
        let config = EpssConfig {
            freshness_hours: u64::MAX / 1000,
            ..EpssConfig::default()
        };
        let svc = service(source.clone(), &config);
        svc.get_epss_score("CVE-2021-44228").unwrap().unwrap();
        svc.get_epss_score("CVE-2021-44228").unwrap().unwrap();
        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn batch_returns_only_resolvable() {
        let source = Arc::new(FakeSource::with(&[("CVE-2021-44228", 0.94, 0.99)]));
        let svc = service(source.clone(), &EpssConfig::default());
        let scores = svc
            .get_epss_scores(["CVE-2021-44228", "CVE-9999-00000"])
            .unwrap();
        assert_eq!(scores.len(), 1);
        assert!(scores.contains_key(&CveId::parse("CVE-2021-44228").unwrap()));
        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn batch_fetches_only_misses_and_dedupes() {
        let source = Arc::new(FakeSource::with(&[
            ("CVE-2021-44228", 0.94, 0.99),
            ("CVE-2023-4863", 0.4, 0.9),
        ]));
        let svc = service(source.clone(), &EpssConfig::default());
        svc.get_epss_score("CVE-2021-44228").unwrap();
        let scores = svc
            .get_epss_scores(["CVE-2021-44228", "CVE-2023-4863", "cve-2023-4863"])
            .unwrap();
        assert_eq!(scores.len(), 2);
        let batches = source.batches.lock().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1], vec!["CVE-2023-4863".to_string()]);
    }

    #[test]
    fn misses_are_chunked_by_batch_size() {
        let entries: Vec<(String, f64, f64)> = (0..25)
            .map(|n| (format!("CVE-2024-{:05}", n), 0.01, 0.5))
            .collect();
        let refs: Vec<(&str, f64, f64)> = entries
            .iter()
            .map(|(id, e, p)| (id.as_str(), *e, *p))
            .collect();
        let source = Arc::new(FakeSource::with(&refs));
        let config = EpssConfig {
            batch_size: 10,
            ..EpssConfig::default()
        };
        let svc = service(source.clone(), &config);
        let scores = svc
            .get_epss_scores(entries.iter().map(|(id, _, _)| id))
            .unwrap();
        assert_eq!(scores.len(), 25);
        assert_eq!(source.calls(), 3);
        let sizes: Vec<usize> = source
            .batches
            .lock()
            .unwrap()
            .iter()
            .map(Vec::len)
            .collect();
        assert_eq!(sizes, vec![10, 10, 5]);
    }

    #[test]
    fn unrequested_entries_are_ignored() {
        struct Chatty;
        impl EpssSource for Chatty {
            fn fetch(&self, _ids: &[CveId]) -> Result<Vec<EpssScore>> {
                Ok(vec![EpssScore::new(
                    CveId::parse("CVE-2000-0001").unwrap(),
                    0.1,
                    0.1,
                    None,
                    Utc::now(),
                )
                .unwrap()])
            }
        }
        let svc = EpssService::new(Chatty, ScoreCache::new(10), &EpssConfig::default());
        assert!(svc.get_epss_score("CVE-2021-44228").unwrap().is_none());
        assert!(svc.cache().is_empty());
    }

    #[test]
    fn clear_cache_forces_refetch() {
        let source = Arc::new(FakeSource::with(&[("CVE-2021-44228", 0.94, 0.99)]));
        let svc = service(source.clone(), &EpssConfig::default());
        svc.get_epss_score("CVE-2021-44228").unwrap();
        svc.clear_cache();
        svc.get_epss_score("CVE-2021-44228").unwrap();
        assert_eq!(source.calls(), 2);
    }

    #[test]
    fn shared_across_threads() {
        let source = Arc::new(FakeSource::with(&[("CVE-2021-44228", 0.94, 0.99)]));
        let svc = service(source.clone(), &EpssConfig::default());
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    let score = svc.get_epss_score("CVE-2021-44228").unwrap();
                    assert!(score.is_some());
                });
            }
        });
        assert!(source.calls() >= 1);
        assert_eq!(svc.cache().len(), 1);
    }

    #[test]
    fn empty_batch_is_empty() {
        let source = Arc::new(FakeSource::default());
        let svc = service(source.clone(), &EpssConfig::default());
        let none: [&str; 0] = [];
        assert!(svc.get_epss_scores(none).unwrap().is_empty());
        assert_eq!(source.calls(), 0);
    }
}
