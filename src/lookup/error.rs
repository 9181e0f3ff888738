use thiserror::Error;

use crate::types::FailureKind;

/// Failure of a single lookup. Always scoped to one record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Service unavailable: HTTP {status}")]
    ServerError { status: u16 },

    #[error("Rate limited by lookup service")]
    RateLimited,

    #[error("Request rejected: HTTP {status}")]
    Rejected { status: u16 },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("No feature matched the coordinate")]
    NoFeature,
}

impl LookupError {
    pub fn kind(&self) -> FailureKind {
        match self {
            LookupError::Request(_)
            | LookupError::Timeout
            | LookupError::ServerError { .. }
            | LookupError::RateLimited => FailureKind::Transient,
            LookupError::Rejected { .. } => FailureKind::Rejected,
            LookupError::Malformed(_) => FailureKind::MalformedResponse,
            LookupError::NoFeature => FailureKind::NotFound,
        }
    }

    /// Maps a non-success HTTP status onto the failure taxonomy.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => LookupError::RateLimited,
            500..=599 => LookupError::ServerError { status },
            _ => LookupError::Rejected { status },
        }
    }
}

impl From<reqwest::Error> for LookupError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            LookupError::Timeout
        } else if error.is_decode() {
            LookupError::Malformed(error.to_string())
        } else if let Some(status) = error.status() {
            LookupError::from_status(status.as_u16())
        } else {
            LookupError::Request(error.to_string())
        }
    }
}

impl From<serde_json::Error> for LookupError {
    fn from(error: serde_json::Error) -> Self {
        LookupError::Malformed(error.to_string())
    }
}
