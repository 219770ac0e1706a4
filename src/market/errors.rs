use thiserror::Error;

/// Error types for market data fetching
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Provider throttled us. Never retried locally; the scheduler applies
    /// interval backoff instead.
    #[error("provider rate limit hit (retry_after: {retry_after:?})")]
    RateLimited { retry_after: Option<u64> },

    #[error("provider error: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("malformed provider payload: {message}")]
    Parse { message: String },

    #[error("no data returned for dataset {0}")]
    NoData(String),

    #[error("request timed out after {timeout_seconds}s")]
    Timeout { timeout_seconds: u64 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for fetch operations
pub type FetchResult<T> = Result<T, FetchError>;

impl FetchError {
    /// Transient failures are retried a bounded number of times by the
    /// fetcher itself. Rate limiting is deliberately not transient here.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network(_) => true,
            FetchError::Timeout { .. } => true,
            FetchError::Api { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }

    pub fn parse_error<S: Into<String>>(message: S) -> Self {
        FetchError::Parse {
            message: message.into(),
        }
    }

    pub fn api_error<S: Into<String>>(status_code: u16, message: S) -> Self {
        FetchError::Api {
            status_code,
            message: message.into(),
        }
    }
}
