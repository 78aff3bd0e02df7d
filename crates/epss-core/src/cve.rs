use crate::error::{EpssError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

static CANONICAL_RE: OnceLock<Regex> = OnceLock::new();
static EMBEDDED_RE: OnceLock<Regex> = OnceLock::new();

fn canonical_re() -> &'static Regex {
    CANONICAL_RE.get_or_init(|| Regex::new(r"^CVE-[0-9]{4}-[0-9]{4,}$").unwrap())
}

/// Matches CVE ids inside prose: 4-digit year, 4 to 7 digit sequence number.
/// ASCII digits only.
fn embedded_re() -> &'static Regex {
    EMBEDDED_RE.get_or_init(|| Regex::new(r"(?i)\bCVE-([0-9]{4})-([0-9]{4,7})\b").unwrap())
}

// ---------------------------------------------------------------------------
// CveId
// ---------------------------------------------------------------------------

/// A validated CVE identifier in canonical upper-case form, e.g. `CVE-2021-44228`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CveId(String);

impl CveId {
    /// Validate and normalise an identifier.
    ///
    /// Surrounding whitespace is trimmed and the `cve-` prefix is accepted in
    /// any case; the stored form is always upper case.
    pub fn parse(raw: &str) -> Result<Self> {
        let normalised = raw.trim().to_ascii_uppercase();
        if !canonical_re().is_match(&normalised) {
            return Err(EpssError::InvalidIdentifier(raw.to_string()));
        }
        Ok(Self(normalised))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CveId {
    type Err = EpssError;

    fn from_str(s: &str) -> Result<Self> {
        CveId::parse(s)
    }
}

impl TryFrom<String> for CveId {
    type Error = EpssError;

    fn try_from(value: String) -> Result<Self> {
        CveId::parse(&value)
    }
}

impl From<CveId> for String {
    fn from(id: CveId) -> Self {
        id.0
    }
}

impl AsRef<str> for CveId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Extraction from free text
// ---------------------------------------------------------------------------

/// Return the first CVE id mentioned in `text`, if any.
///
/// ```
/// use epss_core::cve::extract_cve;
/// let id = extract_cve("WordPress Plugin XSS (cve-2024-1234)").unwrap();
/// assert_eq!(id.as_str(), "CVE-2024-1234");
/// ```
pub fn extract_cve(text: &str) -> Option<CveId> {
    embedded_re()
        .captures(text)
        .map(|caps| CveId(format!("CVE-{}-{}", &caps[1], &caps[2])))
}

/// Return every distinct CVE id in `text`, in order of first appearance.
pub fn extract_all_cves(text: &str) -> Vec<CveId> {
    let mut out: Vec<CveId> = Vec::new();
    for caps in embedded_re().captures_iter(text) {
        let id = CveId(format!("CVE-{}-{}", &caps[1], &caps[2]));
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
