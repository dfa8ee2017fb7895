//! Collaborator traits for the download engines.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use bytes::Bytes;
use commons_protocol::{DownloadLocation, FileHandleAssociateType};
use reqwest::header::RANGE;
use url::Url;

use crate::error::DownloadError;

/// Boxed future returned by the collaborator traits.
pub type DownloadFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, DownloadError>> + Send + 'a>>;

/// What to download and where to put it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub file_handle_id: String,
    pub object_id: String,
    pub object_type: FileHandleAssociateType,
    pub destination: PathBuf,
}

/// Resolves a file handle to its metadata and a freshly signed GET URL.
///
/// Implementations retry transient failures themselves.
pub trait DownloadApi: Send + Sync {
    fn get_file_handle_for_download(
        &self,
        file_handle_id: &str,
        object_id: &str,
        object_type: FileHandleAssociateType,
    ) -> DownloadFuture<'_, DownloadLocation>;
}

/// Body and status of a ranged GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeResponse {
    pub status: u16,
    pub body: Bytes,
}

/// Fetches one inclusive byte range of a pre-signed object.
///
/// Non-2xx responses are returned, not raised, so callers can interpret them.
pub trait RangeSource: Send + Sync {
    fn get_range(&self, url: &str, start: u64, end: u64) -> DownloadFuture<'_, RangeResponse>;
}

/// `RangeSource` over a shared `reqwest` client.
#[derive(Debug, Clone, Default)]
pub struct HttpRangeSource {
    client: reqwest::Client,
}

impl HttpRangeSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl RangeSource for HttpRangeSource {
    fn get_range(&self, url: &str, start: u64, end: u64) -> DownloadFuture<'_, RangeResponse> {
        let req = self
            .client
            .get(url)
            .header(RANGE, format!("bytes={start}-{end}"));
        Box::pin(async move {
            let resp = req.send().await?;
            let status = resp.status().as_u16();
            let body = resp.bytes().await?;
            Ok(RangeResponse { status, body })
        })
    }
}

/// Downloads `sftp://` and `ftp://` URLs on behalf of the stream engine.
pub trait ExternalFetcher: Send + Sync {
    fn fetch(&self, url: &Url, destination: &Path) -> DownloadFuture<'_, ()>;
}
