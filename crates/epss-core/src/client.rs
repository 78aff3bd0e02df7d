//! Upstream access to the FIRST.org EPSS API.
//!
//! # Wire format
//!
//! `GET {base_url}?cve=CVE-2021-44228,CVE-2023-4863` answers with:
//!
//! ```text
//! { "status": "OK",
//!   "data": [ { "cve": "CVE-2021-44228", "epss": "0.944500000",
//!               "percentile": "0.999890000", "date": "2025-11-21" } ] }
//! ```
//!
//! `epss` and `percentile` arrive as strings in practice; bare JSON numbers
//! are accepted too. Entries that fail to parse are dropped individually.

use crate::config::EpssConfig;
use crate::cve::CveId;
use crate::error::{EpssError, Result};
use crate::types::EpssScore;
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const USER_AGENT: &str = concat!("epss-core/", env!("CARGO_PKG_VERSION"));
const DEFAULT_BACKOFF: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// EpssSource
// ---------------------------------------------------------------------------

/// Anything that can resolve a batch of CVE ids to scores.
///
/// Returning `Ok` with fewer records than requested means the missing ids
/// have no score. `Err` means the batch could not be answered at all.
pub trait EpssSource: Send + Sync {
    fn fetch(&self, ids: &[CveId]) -> Result<Vec<EpssScore>>;
}

impl<S: EpssSource + ?Sized> EpssSource for Arc<S> {
    fn fetch(&self, ids: &[CveId]) -> Result<Vec<EpssScore>> {
        (**self).fetch(ids)
    }
}

impl<S: EpssSource + ?Sized> EpssSource for &S {
    fn fetch(&self, ids: &[CveId]) -> Result<Vec<EpssScore>> {
        (**self).fetch(ids)
    }
}

// ---------------------------------------------------------------------------
// HttpSource
// ---------------------------------------------------------------------------

/// Blocking HTTP client for the public EPSS endpoint. No credentials needed.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    base_url: String,
    max_retries: u32,
    backoff: Duration,
}

impl HttpSource {
    pub fn new(config: &EpssConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout())?,
            base_url: config.base_url.clone(),
            max_retries: config.max_retries.max(1),
            backoff: DEFAULT_BACKOFF,
        })
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = build_client(timeout)?;
        Ok(self)
    }

    /// Delay between retries, multiplied by the attempt number.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn request_once(&self, cve_param: &str) -> std::result::Result<String, Failure> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("cve", cve_param)])
            .send()
            .map_err(|e| Failure::Retryable(transport_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            let err =
                EpssError::UpstreamUnavailable(format!("HTTP {status} from {}", self.base_url));
            // Client errors other than rate limiting will not improve on retry.
            return Err(
                if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                    Failure::Fatal(err)
                } else {
                    Failure::Retryable(err)
                },
            );
        }

        response
            .text()
            .map_err(|e| Failure::Retryable(transport_error(&e)))
    }
}

enum Failure {
    Retryable(EpssError),
    Fatal(EpssError),
}

impl EpssSource for HttpSource {
    fn fetch(&self, ids: &[CveId]) -> Result<Vec<EpssScore>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let cve_param = ids
            .iter()
            .map(CveId::as_str)
            .collect::<Vec<_>>()
            .join(",");

        let mut last_err = EpssError::UpstreamUnavailable("no attempt made".to_string());
        for attempt in 1..=self.max_retries {
            match self.request_once(&cve_param) {
                Ok(body) => return parse_response(&body, Utc::now()),
                Err(Failure::Fatal(e)) => {
                    tracing::warn!(attempt, error = %e, "EPSS request rejected");
                    return Err(e);
                }
                Err(Failure::Retryable(e)) => {
                    tracing::warn!(
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "EPSS request failed"
                    );
                    last_err = e;
                    if attempt < self.max_retries && !self.backoff.is_zero() {
                        std::thread::sleep(self.backoff * attempt);
                    }
                }
            }
        }
        Err(last_err)
    }
}

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| EpssError::UpstreamUnavailable(format!("failed to build HTTP client: {e}")))
}

fn transport_error(e: &reqwest::Error) -> EpssError {
    let detail = if e.is_timeout() {
        format!("request timed out: {e}")
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    };
    EpssError::UpstreamUnavailable(detail)
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    data: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct ApiEntry {
    cve: String,
    epss: Numeric,
    percentile: Numeric,
    #[serde(default)]
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Numeric {
    Number(f64),
    Text(String),
}

impl Numeric {
    fn to_f64(&self) -> Option<f64> {
        match self {
            Numeric::Number(n) => Some(*n),
            Numeric::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Parse an API body into records stamped with `retrieved_at`.
///
/// A body that is not JSON, lacks `"status": "OK"` or has no `data` array is
/// `MalformedResponse`. Individual bad entries are skipped.
pub fn parse_response(body: &str, retrieved_at: DateTime<Utc>) -> Result<Vec<EpssScore>> {
    let response: ApiResponse = serde_json::from_str(body)
        .map_err(|e| EpssError::MalformedResponse(format!("invalid JSON: {e}")))?;

    match response.status.as_deref() {
        Some("OK") => {}
        other => {
            return Err(EpssError::MalformedResponse(format!(
                "unexpected status {other:?}"
            )))
        }
    }

    let entries = response
        .data
        .ok_or_else(|| EpssError::MalformedResponse("missing data array".to_string()))?;

    let mut scores = Vec::with_capacity(entries.len());
    for entry in entries {
        match parse_entry(&entry, retrieved_at) {
            Ok(score) => scores.push(score),
            Err(e) => tracing::warn!(error = %e, entry = %entry, "skipping EPSS entry"),
        }
    }
    Ok(scores)
}

fn parse_entry(value: &serde_json::Value, retrieved_at: DateTime<Utc>) -> Result<EpssScore> {
    let entry: ApiEntry = serde_json::from_value(value.clone())
        .map_err(|e| EpssError::MalformedResponse(e.to_string()))?;
    let cve_id = CveId::parse(&entry.cve)
        .map_err(|_| EpssError::MalformedResponse(format!("bad cve field '{}'", entry.cve)))?;
    let epss = entry
        .epss
        .to_f64()
        .ok_or_else(|| EpssError::MalformedResponse(format!("{cve_id}: epss is not numeric")))?;
    let percentile = entry.percentile.to_f64().ok_or_else(|| {
        EpssError::MalformedResponse(format!("{cve_id}: percentile is not numeric"))
    })?;
    EpssScore::new(cve_id, epss, percentile, entry.date, retrieved_at)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
