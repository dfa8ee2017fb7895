//! Upload error types.

use commons_protocol::ProtocolError;
use commons_transfer::{RetryPolicy, Retryable, TransferError};

/// Errors produced while uploading a file.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Object storage rejected the part's pre-signed URL (HTTP 403).
    #[error("pre-signed URL for part {part} expired")]
    PartExpired { part: u32 },

    #[error("part {part} rejected by object storage with HTTP {status}")]
    PartStatus { part: u32, status: u16 },

    #[error("no pre-signed URL issued for part {part}")]
    MissingUrl { part: u32 },

    /// A sibling part failed; the attempt was abandoned and may be retried.
    #[error("upload attempt aborted: {reason}")]
    Aborted { reason: String },

    /// The caller cancelled the upload. Never retried.
    #[error("upload cancelled")]
    Cancelled,

    #[error("upload not complete after finalize: {state}")]
    Incomplete { state: String },

    #[error("upload failed after {attempts} attempts; last state: {last_state}")]
    Exhausted { attempts: u32, last_state: String },

    #[error("API error (HTTP {status}): {reason}")]
    Api { status: u16, reason: String },

    #[error("adding part {part} failed: {message}")]
    AddPartFailed { part: u32, message: String },

    #[error("worker task failed: {0}")]
    Task(String),

    /// The REST service answered in a way the upload cannot use.
    #[error("service error: {0}")]
    Service(String),
}

impl UploadError {
    /// Whether the outer loop may run another full attempt after this error.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Aborted { .. }
            | Self::Incomplete { .. }
            | Self::Http(_)
            | Self::PartExpired { .. }
            | Self::AddPartFailed { .. }
            | Self::Task(_) => true,
            Self::Api { status, .. } | Self::PartStatus { status, .. } => {
                *status >= 500 || *status == 429
            }
            _ => false,
        }
    }
}

impl Retryable for UploadError {
    fn is_retryable(&self, policy: &RetryPolicy) -> bool {
        match self {
            Self::Http(e) => e.is_connect() || e.is_timeout() || e.is_request() || e.is_body(),
            Self::Api { status, .. } | Self::PartStatus { status, .. } => {
                policy.is_retry_status(*status)
            }
            _ => false,
        }
    }
}
