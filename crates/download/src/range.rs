//! Ranged GETs against a shared, refreshable pre-signed URL.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use chrono::Utc;
use commons_transfer::{RetryPolicy, execute_with_url_refresh, is_expired, with_retry};
use tracing::{debug, info};

use crate::api::{DownloadApi, DownloadRequest, RangeSource};
use crate::error::DownloadError;

/// One unit of fetch work: the inclusive byte range `start..=end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteRangeChunk {
    pub start: u64,
    pub end: u64,
    pub file_name: String,
    /// URL current when the chunk was generated.
    pub url: String,
    pub destination: std::path::PathBuf,
}

impl ByteRangeChunk {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// The pre-signed GET URL shared by every fetch worker of one download.
///
/// Refreshes are serialized, and a refresh for a URL that was already
/// replaced returns the replacement without calling the service.
pub struct SignedUrlSlot {
    api: Arc<dyn DownloadApi>,
    request: DownloadRequest,
    current: Mutex<String>,
    refresh_lock: tokio::sync::Mutex<()>,
    refreshes: AtomicU32,
}

impl SignedUrlSlot {
    pub fn new(api: Arc<dyn DownloadApi>, request: DownloadRequest, url: String) -> Self {
        Self {
            api,
            request,
            current: Mutex::new(url),
            refresh_lock: tokio::sync::Mutex::new(()),
            refreshes: AtomicU32::new(0),
        }
    }

    pub fn current(&self) -> String {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of service round-trips made by [`refresh`](Self::refresh).
    pub fn refresh_count(&self) -> u32 {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Replaces `expired` with a freshly signed URL.
    pub async fn refresh(&self, expired: &str) -> Result<String, DownloadError> {
        let _guard = self.refresh_lock.lock().await;
        let current = self.current();
        if current != expired {
            debug!("signed URL already refreshed by another worker");
            return Ok(current);
        }

        let location = self
            .api
            .get_file_handle_for_download(
                &self.request.file_handle_id,
                &self.request.object_id,
                self.request.object_type,
            )
            .await?;
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        info!(
            file_handle_id = %self.request.file_handle_id,
            "refreshed pre-signed download URL"
        );
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = location.pre_signed_url.clone();
        Ok(location.pre_signed_url)
    }
}

/// Fetches byte ranges with bounded retry and one URL refresh per range.
pub struct RangeFetcher {
    pub(crate) source: Arc<dyn RangeSource>,
    pub(crate) slot: Arc<SignedUrlSlot>,
    pub(crate) retry: RetryPolicy,
}

impl RangeFetcher {
    pub fn new(source: Arc<dyn RangeSource>, slot: Arc<SignedUrlSlot>, retry: RetryPolicy) -> Self {
        Self {
            source,
            slot,
            retry,
        }
    }

    /// Returns exactly `chunk.len()` bytes.
    ///
    /// The URL's embedded expiry is checked before every GET, including
    /// retries after a backoff. An expired URL, a 403, or any non-partial
    /// response that survives the retry budget triggers one refresh of the
    /// shared URL.
    pub async fn fetch(&self, chunk: &ByteRangeChunk) -> Result<Bytes, DownloadError> {
        let mut url = self.slot.current();
        if url != chunk.url {
            debug!(start = chunk.start, "chunk URL superseded");
        }
        if is_expired(&url, Utc::now()) {
            debug!(start = chunk.start, "signed URL expired before request");
            url = self.slot.refresh(&url).await?;
        }

        execute_with_url_refresh(
            url,
            1,
            |target: String| self.get(chunk, target),
            |expired: String| async move { self.slot.refresh(&expired).await },
            |e: &DownloadError| {
                matches!(e, DownloadError::Expired { .. } | DownloadError::Status { .. })
            },
        )
        .await
    }

    async fn get(&self, chunk: &ByteRangeChunk, url: String) -> Result<Bytes, DownloadError> {
        let expected = chunk.len();
        with_retry(&self.retry, "get range", |_| {
            let url = &url;
            async move {
                if is_expired(url, Utc::now()) {
                    debug!(start = chunk.start, "signed URL expired during retries");
                    return Err(DownloadError::Expired { url: url.clone() });
                }
                let resp = self.source.get_range(url, chunk.start, chunk.end).await?;
                let received = resp.body.len() as u64;
                match resp.status {
                    206 if received == expected => Ok(resp.body),
                    // Servers that ignore Range send the whole object.
                    200 if received > chunk.end => {
                        Ok(resp.body.slice(chunk.start as usize..=chunk.end as usize))
                    }
                    200 | 206 => Err(DownloadError::ShortRange {
                        start: chunk.start,
                        end: chunk.end,
                        received,
                    }),
                    403 => Err(DownloadError::Expired { url: url.clone() }),
                    status => Err(DownloadError::Status {
                        status,
                        url: url.clone(),
                    }),
                }
            }
        })
        .await
    }
}
