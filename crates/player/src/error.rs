use std::sync::Arc;

use hls::PlaylistError;
use reqwest::StatusCode;

#[derive(Debug, Clone, thiserror::Error)]
pub enum PlayerError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("HTTP request failed: {source}")]
    Network { source: Arc<reqwest::Error> },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("operation timed out: {reason}")]
    Timeout { reason: String },

    #[error("playlist error: {0}")]
    Playlist(#[from] PlaylistError),

    #[error("failed to choose stream `{variant}`: {reason}")]
    FailedToChooseStream {
        variant: String,
        reason: &'static str,
    },

    #[error("manifest has no variants")]
    MissingVariants,

    #[error("variant `{variant}` could not be resolved to a chunk list")]
    MissingResolvedVariant { variant: String },

    #[error("work queue is full or closed")]
    QueueFull,

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl From<reqwest::Error> for PlayerError {
    fn from(source: reqwest::Error) -> Self {
        Self::Network {
            source: Arc::new(source),
        }
    }
}

impl PlayerError {
    pub fn http_status(
        status: StatusCode,
        url: impl Into<String>,
        operation: &'static str,
    ) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    pub fn failed_to_choose(variant: impl std::fmt::Display, reason: &'static str) -> Self {
        Self::FailedToChooseStream {
            variant: variant.to_string(),
            reason,
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Whether the HTTP layer may try the request again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cancelled => false,
            Self::Network { source } => is_retryable_reqwest_error(source),
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Timeout { .. } => true,
            Self::Playlist(_)
            | Self::FailedToChooseStream { .. }
            | Self::MissingVariants
            | Self::MissingResolvedVariant { .. }
            | Self::QueueFull
            | Self::Internal { .. } => false,
        }
    }

    /// Migration conflicts are reported to the caller but are not failures of playback.
    pub fn is_choose_conflict(&self) -> bool {
        matches!(self, Self::FailedToChooseStream { .. })
    }
}

/// Classify a reqwest error as retryable or non-retryable.
///
/// Retryable: connect, timeout, request, body read, and decode errors.
/// Non-retryable: redirect and builder errors.
pub fn is_retryable_reqwest_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() || e.is_decode()
}

/// Failure reported by a decode collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("sample conversion failed with status {status}")]
    Convert { status: i32 },

    #[error("decoder is not running")]
    NotRunning,
}

pub type Result<T> = std::result::Result<T, PlayerError>;
