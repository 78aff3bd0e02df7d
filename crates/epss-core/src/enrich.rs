use crate::client::EpssSource;
use crate::cve::{extract_cve, CveId};
use crate::service::EpssService;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Finding
// ---------------------------------------------------------------------------

/// A scan result that can carry EPSS data alongside its own fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cve_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epss_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epss_percentile: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epss_updated_at: Option<DateTime<Utc>>,
    /// Fields this crate does not interpret, preserved on round-trip.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Finding {
    /// The CVE this finding refers to: the explicit `cve_id` when it parses,
    /// otherwise the first id mentioned in the description.
    pub fn resolved_cve(&self) -> Option<CveId> {
        match &self.cve_id {
            Some(raw) => CveId::parse(raw).ok(),
            None => self.description.as_deref().and_then(extract_cve),
        }
    }

    fn has_cve_reference(&self) -> bool {
        self.cve_id.is_some() || self.resolved_cve().is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentSummary {
    pub enriched: usize,
    pub skipped: usize,
}

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

/// Attach EPSS data to every finding that references a CVE.
///
/// One batched lookup covers all distinct CVEs. Findings with no CVE
/// reference are left untouched and not counted. A finding whose CVE has no
/// score (or whose `cve_id` is malformed) counts as skipped and keeps any
/// EPSS data it already had.
pub fn enrich_findings<S: EpssSource>(
    service: &EpssService<S>,
    findings: &mut [Finding],
) -> EnrichmentSummary {
    let targets: Vec<usize> = (0..findings.len()).collect();
    enrich_indices(service, findings, &targets)
}

/// Whether a finding's EPSS data is missing or at least `max_age` old.
pub fn should_refresh(finding: &Finding, max_age: Duration, now: DateTime<Utc>) -> bool {
    if !finding.has_cve_reference() {
        return false;
    }
    let Some(updated) = finding.epss_updated_at else {
        return true;
    };
    match chrono::Duration::from_std(max_age) {
        Ok(max_age) => now - updated >= max_age,
        Err(_) => false,
    }
}

/// Re-enrich only the findings for which [`should_refresh`] holds.
pub fn refresh_stale<S: EpssSource>(
    service: &EpssService<S>,
    findings: &mut [Finding],
    max_age: Duration,
) -> EnrichmentSummary {
    let now = Utc::now();
    let targets: Vec<usize> = findings
        .iter()
        .enumerate()
        .filter(|(_, f)| should_refresh(f, max_age, now))
        .map(|(i, _)| i)
        .collect();
    if targets.is_empty() {
        tracing::info!("no stale EPSS data found");
        return EnrichmentSummary::default();
    }
    enrich_indices(service, findings, &targets)
}

fn enrich_indices<S: EpssSource>(
    service: &EpssService<S>,
    findings: &mut [Finding],
    targets: &[usize],
) -> EnrichmentSummary {
    let mut summary = EnrichmentSummary::default();

    let resolved: Vec<(usize, Option<CveId>)> = targets
        .iter()
        .filter(|&&i| findings[i].has_cve_reference())
        .map(|&i| (i, findings[i].resolved_cve()))
        .collect();

    let ids: Vec<CveId> = resolved.iter().filter_map(|(_, id)| id.clone()).collect();
    if ids.is_empty() {
        summary.skipped = resolved.len();
        if resolved.is_empty() {
            tracing::info!("no CVE ids found, skipping EPSS enrichment");
        }
        return summary;
    }

    let scores = service.lookup(&ids);
    let now = Utc::now();

    for (i, id) in resolved {
        let finding = &mut findings[i];
        match id.as_ref().and_then(|id| scores.get(id)) {
            Some(score) => {
                finding.epss_score = Some(score.epss_score);
                finding.epss_percentile = Some(score.percentile);
                finding.epss_updated_at = Some(now);
                summary.enriched += 1;
            }
            None => {
                let cve = finding.cve_id.as_deref().unwrap_or("<from description>");
                tracing::warn!(cve, "CVE not found in EPSS data");
                summary.skipped += 1;
            }
        }
    }

    tracing::info!(
        enriched = summary.enriched,
        skipped = summary.skipped,
        "EPSS enrichment complete"
    );
    summary
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
