use thiserror::Error;

#[derive(Debug, Error)]
pub enum EpssError {
    #[error("invalid CVE identifier '{0}': expected CVE-YYYY-NNNN")]
    InvalidIdentifier(String),

    #[error("EPSS upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("malformed EPSS response: {0}")]
    MalformedResponse(String),

    #[error("score database error: {0}")]
    ScoreDb(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("home directory not found: set HOME environment variable")]
    HomeNotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl EpssError {
    /// Failures of the upstream itself, as opposed to local infrastructure.
    /// The service degrades on both but logs them at different levels.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            EpssError::UpstreamUnavailable(_) | EpssError::MalformedResponse(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EpssError>;
