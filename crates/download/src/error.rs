//! Download error types.

use std::io;
use std::path::PathBuf;

use commons_transfer::{RetryPolicy, Retryable, TransferError};

/// `ENOSPC` on Unix-likes.
const ENOSPC: i32 = 28;

/// Errors produced while downloading a file.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("I/O error: {0}")]
    Io(io::Error),

    #[error("out of disk space: {0}")]
    OutOfDiskSpace(io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("pre-signed URL expired: {url}")]
    Expired { url: String },

    #[error("too many redirects (limit {limit}) starting at {url}")]
    TooManyRedirects { url: String, limit: u32 },

    #[error("range {start}-{end} returned {received} bytes")]
    ShortRange { start: u64, end: u64, received: u64 },

    #[error(
        "checksum mismatch downloading {url} to {}: expected {expected}, got {actual}",
        .destination.display()
    )]
    ChecksumMismatch {
        url: String,
        destination: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("file handle {0} has no content size")]
    MissingSize(String),

    #[error("API error (HTTP {status}): {reason}")]
    Api { status: u16, reason: String },

    #[error("download cancelled")]
    Cancelled,

    #[error("worker failed: {0}")]
    Task(String),

    /// The REST service answered in a way the download cannot use.
    #[error("service error: {0}")]
    Service(String),
}

impl From<io::Error> for DownloadError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::StorageFull || e.raw_os_error() == Some(ENOSPC) {
            Self::OutOfDiskSpace(e)
        } else {
            Self::Io(e)
        }
    }
}

impl Retryable for DownloadError {
    fn is_retryable(&self, policy: &RetryPolicy) -> bool {
        match self {
            Self::Http(e) => e.is_connect() || e.is_timeout() || e.is_request() || e.is_body(),
            Self::Status { status, .. } | Self::Api { status, .. } => {
                policy.is_retry_status(*status)
            }
            Self::ShortRange { .. } => true,
            _ => false,
        }
    }
}
