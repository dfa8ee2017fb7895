//! Uploads one part to its pre-signed URL.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use commons_transfer::{
    RetryPolicy, checksum_bytes, data_chunk, execute_with_url_refresh, read_file_part, with_retry,
};
use tracing::{debug, trace};

use crate::api::{PartTransport, PutResponse};
use crate::error::UploadError;
use crate::types::{HandlePartResult, UploadSource};
use crate::url_cache::{PartUrl, PresignedUrlCache};

/// Why an attempt was abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortCause {
    Cancelled,
    Failed(String),
}

/// Once-only abort flag shared by the parts of one attempt.
#[derive(Debug, Default)]
pub struct AbortSignal {
    cause: Mutex<Option<AbortCause>>,
}

impl AbortSignal {
    /// Sets the flag. Returns `true` only for the caller that set it first;
    /// later causes are dropped.
    pub fn trigger(&self, cause: AbortCause) -> bool {
        let mut slot = self.cause.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return false;
        }
        *slot = Some(cause);
        true
    }

    pub fn is_set(&self) -> bool {
        self.cause.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    pub fn cause(&self) -> Option<AbortCause> {
        self.cause.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Shared by every part task of one attempt.
pub struct PartUploader {
    pub(crate) cache: Arc<PresignedUrlCache>,
    pub(crate) transport: Arc<dyn PartTransport>,
    pub(crate) source: UploadSource,
    pub(crate) part_size: u64,
    pub(crate) retry: RetryPolicy,
    pub(crate) abort: Arc<AbortSignal>,
}

impl PartUploader {
    /// Uploads `part_number`.
    ///
    /// Returns `Ok(None)` when the attempt was aborted before this part
    /// started any network work. A 403 on the first PUT triggers one URL
    /// refresh; a second 403 propagates as [`UploadError::PartExpired`].
    pub async fn upload(&self, part_number: u32) -> Result<Option<HandlePartResult>, UploadError> {
        if self.abort.is_set() {
            return Ok(None);
        }
        let body = self.read_part(part_number).await?;
        if self.abort.is_set() {
            trace!(part = part_number, "attempt aborted, skipping part");
            return Ok(None);
        }

        let initial = self
            .cache
            .get(part_number)
            .await
            .ok_or(UploadError::MissingUrl { part: part_number })?;
        let payload = body.as_ref().map(|(data, _)| data.clone()).unwrap_or_default();

        let this = self;
        let response = execute_with_url_refresh(
            initial,
            1,
            move |target: PartUrl| this.put(part_number, target, payload.clone()),
            move |expired: PartUrl| async move {
                this.cache.refresh(part_number, &expired.url).await
            },
            |e: &UploadError| matches!(e, UploadError::PartExpired { .. }),
        )
        .await?;

        let (size, md5_hex) = match body {
            Some((data, md5)) => (data.len() as u64, md5),
            None => {
                let etag = response.etag_hex().ok_or(UploadError::Api {
                    status: response.status,
                    reason: format!("copy of part {part_number} returned no ETag"),
                })?;
                (0, etag.to_string())
            }
        };

        self.cache.remove(part_number).await;
        debug!(part = part_number, size, "part stored");
        Ok(Some(HandlePartResult {
            part_number,
            size,
            md5_hex,
        }))
    }

    async fn put(
        &self,
        part_number: u32,
        target: PartUrl,
        body: Bytes,
    ) -> Result<PutResponse, UploadError> {
        with_retry(&self.retry, "put part", |_| {
            let body = body.clone();
            let target = &target;
            async move {
                let resp = self
                    .transport
                    .put_part(&target.url, &target.headers, body)
                    .await?;
                if resp.is_success() {
                    return Ok(resp);
                }
                match resp.status {
                    403 => Err(UploadError::PartExpired { part: part_number }),
                    status => Err(UploadError::PartStatus {
                        part: part_number,
                        status,
                    }),
                }
            }
        })
        .await
    }

    /// Reads the part's bytes and MD5 off the async runtime.
    /// Server-side copies have no body.
    async fn read_part(&self, part_number: u32) -> Result<Option<(Bytes, String)>, UploadError> {
        let part_size = self.part_size;
        let source = self.source.clone();
        let read = tokio::task::spawn_blocking(move || -> Result<_, UploadError> {
            let data = match source {
                UploadSource::File(path) => read_file_part(&path, part_number, part_size)?.data,
                UploadSource::Bytes(all) => {
                    let chunk = data_chunk(&all, part_number, part_size)?;
                    all.slice_ref(chunk)
                }
                UploadSource::Copy => return Ok(None),
            };
            let md5 = checksum_bytes(&data);
            Ok(Some((data, md5)))
        });
        read.await
            .map_err(|e| UploadError::Task(format!("part {part_number} read: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeServer, FakeStorage};

    async fn uploader(
        server: Arc<FakeServer>,
        storage: Arc<FakeStorage>,
        source: UploadSource,
        part_size: u64,
        parts: &[u32],
    ) -> PartUploader {
        let cache = Arc::new(PresignedUrlCache::new(server, "u1", None));
        cache.fetch(parts).await.unwrap();
        PartUploader {
            cache,
            transport: storage,
            source,
            part_size,
            retry: RetryPolicy::none(),
            abort: Arc::new(AbortSignal::default()),
        }
    }

    #[test]
    fn abort_signal_first_trigger_wins() {
        let signal = Arc::new(AbortSignal::default());
        let winners: usize = (0..16)
            .map(|i| {
                let s = Arc::clone(&signal);
                std::thread::spawn(move || s.trigger(AbortCause::Failed(format!("part {i}"))))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(winners, 1);
        assert!(signal.is_set());
        assert!(!signal.trigger(AbortCause::Cancelled));
        assert!(matches!(signal.cause(), Some(AbortCause::Failed(_))));
    }

    #[tokio::test]
    async fn uploads_bytes_and_returns_md5() {
        let server = Arc::new(FakeServer::new());
        let storage = Arc::new(FakeStorage::new());
        let data = Bytes::from_static(b"AABBCCDDEE");
        let up = uploader(
            server,
            storage.clone(),
            UploadSource::Bytes(data),
            4,
            &[1, 2, 3],
        )
        .await;

        let result = up.upload(3).await.unwrap().unwrap();
        assert_eq!(result.part_number, 3);
        assert_eq!(result.size, 2);
        assert_eq!(result.md5_hex, checksum_bytes(b"EE"));
        assert_eq!(storage.assembled(), b"EE");
        assert!(up.cache.get(3).await.is_none());
    }

    #[tokio::test]
    async fn first_403_refreshes_once() {
        let server = Arc::new(FakeServer::new());
        let storage = Arc::new(FakeStorage::failing(|_, url| {
            url.ends_with("gen=0").then_some(403)
        }));
        let up = uploader(
            server.clone(),
            storage.clone(),
            UploadSource::Bytes(Bytes::from_static(b"abcd")),
            4,
            &[1],
        )
        .await;

        let result = up.upload(1).await.unwrap().unwrap();
        assert_eq!(result.md5_hex, checksum_bytes(b"abcd"));
        assert_eq!(storage.calls(), 2);
        assert_eq!(up.cache.refresh_count(), 1);
    }

    #[tokio::test]
    async fn second_403_propagates() {
        let server = Arc::new(FakeServer::new());
        let storage = Arc::new(FakeStorage::failing(|_, _| Some(403)));
        let up = uploader(
            server,
            storage.clone(),
            UploadSource::Bytes(Bytes::from_static(b"abcd")),
            4,
            &[1],
        )
        .await;

        let err = up.upload(1).await.unwrap_err();
        assert!(matches!(err, UploadError::PartExpired { part: 1 }));
        assert_eq!(storage.calls(), 2);
        assert_eq!(up.cache.refresh_count(), 1);
    }

    #[tokio::test]
    async fn other_status_does_not_refresh() {
        let server = Arc::new(FakeServer::new());
        let storage = Arc::new(FakeStorage::failing(|_, _| Some(400)));
        let up = uploader(
            server,
            storage,
            UploadSource::Bytes(Bytes::from_static(b"abcd")),
            4,
            &[1],
        )
        .await;

        let err = up.upload(1).await.unwrap_err();
        assert!(matches!(err, UploadError::PartStatus { part: 1, status: 400 }));
        assert_eq!(up.cache.refresh_count(), 0);
    }

    #[tokio::test]
    async fn transient_status_retried_with_backoff() {
        let server = Arc::new(FakeServer::new());
        let storage = Arc::new(FakeStorage::failing(|call, _| (call == 1).then_some(503)));
        let mut up = uploader(
            server,
            storage.clone(),
            UploadSource::Bytes(Bytes::from_static(b"abcd")),
            4,
            &[1],
        )
        .await;
        up.retry = RetryPolicy {
            max_retries: 2,
            initial_delay_ms: 1,
            max_delay_ms: 1,
            ..RetryPolicy::default()
        };

        assert!(up.upload(1).await.unwrap().is_some());
        assert_eq!(storage.calls(), 2);
    }

    #[tokio::test]
    async fn copy_part_takes_checksum_from_etag() {
        let server = Arc::new(FakeServer::new());
        let storage = Arc::new(FakeStorage::new());
        let up = uploader(server, storage.clone(), UploadSource::Copy, 8, &[2]).await;

        let result = up.upload(2).await.unwrap().unwrap();
        assert_eq!(result.md5_hex, checksum_bytes(b"copy-2"));
        assert_eq!(result.size, 0);
        assert!(storage.assembled().is_empty());
    }

    #[tokio::test]
    async fn aborted_attempt_skips_network() {
        let server = Arc::new(FakeServer::new());
        let storage = Arc::new(FakeStorage::new());
        let up = uploader(
            server,
            storage.clone(),
            UploadSource::Bytes(Bytes::from_static(b"abcd")),
            4,
            &[1],
        )
        .await;
        up.abort.trigger(AbortCause::Failed("sibling failed".into()));

        assert!(up.upload(1).await.unwrap().is_none());
        assert_eq!(storage.calls(), 0);
    }

    #[tokio::test]
    async fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"0123456789").unwrap();
        let server = Arc::new(FakeServer::new());
        let storage = Arc::new(FakeStorage::new());
        let up = uploader(server, storage.clone(), UploadSource::File(path), 4, &[2]).await;

        let result = up.upload(2).await.unwrap().unwrap();
        assert_eq!(result.md5_hex, checksum_bytes(b"4567"));
        assert_eq!(storage.assembled(), b"4567");
    }
}
