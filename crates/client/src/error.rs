//! REST client errors and their conversions into the engine errors.

use commons_download::DownloadError;
use commons_protocol::ProtocolError;
use commons_transfer::{RetryPolicy, Retryable};
use commons_upload::UploadError;

/// Errors from the REST client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (HTTP {status}): {reason}")]
    Api { status: u16, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid auth token")]
    InvalidToken,

    #[error("response missing field `{0}`")]
    MissingField(&'static str),

    #[error("file handle {file_handle_id} unavailable: {code}")]
    Unavailable { file_handle_id: String, code: String },
}

impl Retryable for ClientError {
    fn is_retryable(&self, policy: &RetryPolicy) -> bool {
        match self {
            Self::Http(e) => e.is_connect() || e.is_timeout() || e.is_request() || e.is_body(),
            Self::Api { status, .. } => policy.is_retry_status(*status),
            _ => false,
        }
    }
}

impl From<ClientError> for UploadError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Http(e) => Self::Http(e),
            ClientError::Api { status, reason } => Self::Api { status, reason },
            ClientError::Json(e) => Self::Json(e),
            ClientError::MissingField(field) => Self::Protocol(ProtocolError::MissingField(field)),
            other => Self::Service(other.to_string()),
        }
    }
}

impl From<ClientError> for DownloadError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Http(e) => Self::Http(e),
            ClientError::Api { status, reason } => Self::Api { status, reason },
            ClientError::Url(e) => Self::Url(e),
            other => Self::Service(other.to_string()),
        }
    }
}
