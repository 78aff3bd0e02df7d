use crate::cve::CveId;
use crate::error::{EpssError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// EpssScore
// ---------------------------------------------------------------------------

/// One EPSS observation for a CVE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpssScore {
    pub cve_id: CveId,
    /// Probability of exploitation in the next 30 days, 0.0 to 1.0.
    pub epss_score: f64,
    /// Rank among all scored CVEs on the model date, 0.0 to 1.0.
    pub percentile: f64,
    /// Model date reported by the API (`YYYY-MM-DD`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    pub retrieved_at: DateTime<Utc>,
}

impl EpssScore {
    /// Build a record, rejecting values outside [0.0, 1.0] or non-finite.
    pub fn new(
        cve_id: CveId,
        epss_score: f64,
        percentile: f64,
        date: Option<String>,
        retrieved_at: DateTime<Utc>,
    ) -> Result<Self> {
        check_unit("epss", &cve_id, epss_score)?;
        check_unit("percentile", &cve_id, percentile)?;
        Ok(Self {
            cve_id,
            epss_score,
            percentile,
            date,
            retrieved_at,
        })
    }

    /// Time elapsed since the record was fetched. Never negative.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.retrieved_at).max(chrono::Duration::zero())
    }

    /// True while the record is younger than `window`.
    pub fn is_fresh(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match chrono::Duration::from_std(window) {
            Ok(window) => self.age(now) < window,
            Err(_) => true,
        }
    }
}

fn check_unit(field: &str, cve_id: &CveId, value: f64) -> Result<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(EpssError::MalformedResponse(format!(
            "{cve_id}: {field} {value} outside [0, 1]"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn log4shell() -> CveId {
        CveId::parse("CVE-2021-44228").unwrap()
    }

    #[test]
    fn new_accepts_unit_interval() {
        let now = Utc::now();
        let score = EpssScore::new(log4shell(), 0.9445, 0.99989, None, now).unwrap();
        assert_eq!(score.epss_score, 0.9445);
        assert_eq!(score.percentile, 0.99989);
        assert!(EpssScore::new(log4shell(), 0.0, 1.0, None, now).is_ok());
    }

    #[test]
    fn new_rejects_out_of_range() {
        let now = Utc::now();
        for (epss, pct) in [(1.5, 0.5), (0.5, -0.1), (f64::NAN, 0.5), (0.5, f64::INFINITY)] {
            assert!(
                matches!(
                    EpssScore::new(log4shell(), epss, pct, None, now),
                    Err(EpssError::MalformedResponse(_))
                ),
                "expected rejection for ({epss}, {pct})"
            );
        }
    }

    #[test]
    fn freshness_window() {
        let now = Utc::now();
        let fetched = now - chrono::Duration::hours(23);
        let score = EpssScore::new(log4shell(), 0.5, 0.5, None, fetched).unwrap();
        assert!(score.is_fresh(now, Duration::from_secs(24 * 3600)));
        assert!(!score.is_fresh(now, Duration::from_secs(23 * 3600)));
        assert!(!score.is_fresh(now, Duration::ZERO));
    }

    #[test]
    fn age_is_clamped_for_future_timestamps() {
        let now = Utc::now();
        let score =
            EpssScore::new(log4shell(), 0.5, 0.5, None, now + chrono::Duration::hours(1)).unwrap();
        assert_eq!(score.age(now), chrono::Duration::zero());
    }

    #[test]
    fn json_omits_missing_date() {
        let score = EpssScore::new(log4shell(), 0.1, 0.2, None, Utc::now()).unwrap();
        let json = serde_json::to_value(&score).unwrap();
        assert_eq!(json["cve_id"], "CVE-2021-44228");
        assert!(json.get("date").is_none());
    }
}
