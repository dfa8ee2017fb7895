//! Collaborator traits for the upload flow.
//!
//! `MultipartApi` is implemented by the REST client; `PartTransport` carries
//! the raw PUTs to object storage. Both stay behind traits so the upload
//! logic is testable with in-memory fakes.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use commons_protocol::{
    AddPartResponse, MultipartRequest, MultipartUploadStatus, PartPresignedUrl,
};
use reqwest::header::ETAG;
use tracing::trace;

use crate::error::UploadError;

/// Boxed future returned by the collaborator traits.
pub type UploadFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, UploadError>> + Send + 'a>>;

/// Server endpoints driving a multipart upload session.
///
/// Implementations retry transient failures themselves; callers make each
/// call once.
pub trait MultipartApi: Send + Sync {
    /// Creates a session, or returns the existing one for the same content
    /// hash, file name and part size unless `force_restart` is set.
    fn create_or_resume_upload(
        &self,
        request: &MultipartRequest,
        force_restart: bool,
    ) -> UploadFuture<'_, MultipartUploadStatus>;

    /// Issues signed PUT targets for `part_numbers` in one call.
    fn presigned_part_urls(
        &self,
        upload_id: &str,
        part_numbers: &[u32],
        content_type: Option<&str>,
    ) -> UploadFuture<'_, Vec<PartPresignedUrl>>;

    /// Records a transferred part and its MD5 in the session bitmap.
    fn add_part(
        &self,
        upload_id: &str,
        part_number: u32,
        md5_hex: &str,
    ) -> UploadFuture<'_, AddPartResponse>;

    /// Finalizes the session.
    fn complete_upload(&self, upload_id: &str) -> UploadFuture<'_, MultipartUploadStatus>;
}

/// Status and entity tag of a part PUT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResponse {
    pub status: u16,
    pub etag: Option<String>,
}

impl PutResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// ETag with surrounding quotes stripped.
    pub fn etag_hex(&self) -> Option<&str> {
        self.etag.as_deref().map(|t| t.trim_matches('"'))
    }
}

/// Raw PUT of part bytes to a pre-signed object-storage URL.
///
/// Non-2xx responses are returned as a `PutResponse`, not an error, so
/// callers can interpret 403 as expiry.
pub trait PartTransport: Send + Sync {
    fn put_part(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        body: Bytes,
    ) -> UploadFuture<'_, PutResponse>;
}

/// `PartTransport` over a shared `reqwest` client.
#[derive(Debug, Clone, Default)]
pub struct HttpPartTransport {
    client: reqwest::Client,
}

impl HttpPartTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl PartTransport for HttpPartTransport {
    fn put_part(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        body: Bytes,
    ) -> UploadFuture<'_, PutResponse> {
        let mut req = self.client.put(url).body(body);
        for (name, value) in headers {
            req = req.header(name.as_str(), value.as_str());
        }
        Box::pin(async move {
            let resp = req.send().await?;
            let status = resp.status().as_u16();
            let etag = resp
                .headers()
                .get(ETAG)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            trace!(status, "part PUT finished");
            Ok(PutResponse { status, etag })
        })
    }
}
