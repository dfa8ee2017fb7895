//! Pre-signed part URL cache for one upload attempt.
//!
//! Holds the signed PUT targets of the parts that have not been added yet.
//! Removal and refresh share one lock, and the lock is held across the
//! batched refresh call so concurrent expiries coalesce into one request.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::api::MultipartApi;
use crate::error::UploadError;

/// A signed PUT target and the headers that were signed with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartUrl {
    pub url: String,
    pub headers: HashMap<String, String>,
}

pub struct PresignedUrlCache {
    api: Arc<dyn MultipartApi>,
    upload_id: String,
    content_type: Option<String>,
    entries: Mutex<HashMap<u32, PartUrl>>,
    refreshes: AtomicU32,
}

impl PresignedUrlCache {
    pub fn new(api: Arc<dyn MultipartApi>, upload_id: &str, content_type: Option<&str>) -> Self {
        Self {
            api,
            upload_id: upload_id.to_string(),
            content_type: content_type.map(str::to_string),
            entries: Mutex::new(HashMap::new()),
            refreshes: AtomicU32::new(0),
        }
    }

    /// Fetches URLs for `part_numbers` in one batch and caches them.
    pub async fn fetch(&self, part_numbers: &[u32]) -> Result<HashMap<u32, PartUrl>, UploadError> {
        let mut entries = self.entries.lock().await;
        let fetched = self.fetch_batch(part_numbers).await?;
        entries.extend(fetched.iter().map(|(n, u)| (*n, u.clone())));
        debug!(upload_id = %self.upload_id, parts = fetched.len(), "fetched pre-signed part URLs");
        Ok(fetched)
    }

    /// Returns a usable URL for `part_number` after `expired_url` was rejected.
    ///
    /// If the cached entry already differs from `expired_url`, another part
    /// refreshed it and the cached entry is returned without a network call.
    /// Otherwise all outstanding parts are re-signed in one batch.
    pub async fn refresh(
        &self,
        part_number: u32,
        expired_url: &str,
    ) -> Result<PartUrl, UploadError> {
        let mut entries = self.entries.lock().await;
        if let Some(current) = entries.get(&part_number)
            && current.url != expired_url
        {
            debug!(upload_id = %self.upload_id, part = part_number, "URL already refreshed");
            return Ok(current.clone());
        }

        let mut outstanding: Vec<u32> = entries.keys().copied().collect();
        if !outstanding.contains(&part_number) {
            outstanding.push(part_number);
        }
        outstanding.sort_unstable();

        let fetched = self.fetch_batch(&outstanding).await?;
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        info!(
            upload_id = %self.upload_id,
            part = part_number,
            outstanding = outstanding.len(),
            "refreshed expired pre-signed URLs"
        );
        entries.extend(fetched);
        entries
            .get(&part_number)
            .cloned()
            .ok_or(UploadError::MissingUrl { part: part_number })
    }

    pub async fn get(&self, part_number: u32) -> Option<PartUrl> {
        self.entries.lock().await.get(&part_number).cloned()
    }

    /// Drops the entry of a part that reached storage, so later refreshes skip it.
    pub async fn remove(&self, part_number: u32) {
        self.entries.lock().await.remove(&part_number);
    }

    pub async fn outstanding(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Network refreshes performed so far.
    pub fn refresh_count(&self) -> u32 {
        self.refreshes.load(Ordering::Relaxed)
    }

    async fn fetch_batch(
        &self,
        part_numbers: &[u32],
    ) -> Result<HashMap<u32, PartUrl>, UploadError> {
        let urls = self
            .api
            .presigned_part_urls(&self.upload_id, part_numbers, self.content_type.as_deref())
            .await?;
        Ok(urls
            .into_iter()
            .map(|p| {
                (
                    p.part_number,
                    PartUrl {
                        url: p.upload_presigned_url,
                        headers: p.signed_headers,
                    },
                )
            })
            .collect())
    }
}
