//! In-memory stand-ins for the file-handle service and object storage.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use bytes::Bytes;
use commons_protocol::{DownloadLocation, FileHandle, FileHandleAssociateType};
use commons_transfer::checksum_bytes;

use crate::api::{DownloadApi, DownloadFuture, DownloadRequest, RangeResponse, RangeSource};

pub fn request(destination: std::path::PathBuf) -> DownloadRequest {
    DownloadRequest {
        file_handle_id: "fh-1".into(),
        object_id: "syn1".into(),
        object_type: FileHandleAssociateType::FileEntity,
        destination,
    }
}

/// Signs `https://storage.test/obj?gen=N` where N counts previous calls.
pub struct FakeApi {
    pub file_handle: FileHandle,
    first_url: Option<String>,
    calls: AtomicU32,
}

impl FakeApi {
    pub fn new(data: &[u8]) -> Self {
        Self {
            file_handle: FileHandle {
                id: "fh-1".into(),
                file_name: "obj.bin".into(),
                content_md5: Some(checksum_bytes(data)),
                content_size: Some(data.len() as u64),
                content_type: None,
                concrete_type: None,
            },
            first_url: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Hands out `url` on the first call instead of a generated one.
    pub fn with_first_url(mut self, url: &str) -> Self {
        self.first_url = Some(url.to_string());
        self
    }

    pub fn with_md5(mut self, md5: &str) -> Self {
        self.file_handle.content_md5 = Some(md5.to_string());
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DownloadApi for FakeApi {
    fn get_file_handle_for_download(
        &self,
        file_handle_id: &str,
        _object_id: &str,
        _object_type: FileHandleAssociateType,
    ) -> DownloadFuture<'_, DownloadLocation> {
        let generation = self.calls.fetch_add(1, Ordering::SeqCst);
        let url = match (&self.first_url, generation) {
            (Some(url), 0) => url.clone(),
            _ => format!("https://storage.test/obj?gen={generation}"),
        };
        let mut file_handle = self.file_handle.clone();
        file_handle.id = file_handle_id.to_string();
        Box::pin(async move {
            Ok(DownloadLocation {
                file_handle,
                pre_signed_url: url,
            })
        })
    }
}

type FailRule = Box<dyn Fn(u32, &str) -> Option<u16> + Send + Sync>;
type DelayRule = Box<dyn Fn(u64) -> Duration + Send + Sync>;

/// Serves ranges of `data`. Rules see the 1-based call index and the URL.
pub struct FakeSource {
    data: Bytes,
    fail: FailRule,
    delay: DelayRule,
    calls: AtomicU32,
    seen: Mutex<Vec<(String, u64, u64)>>,
}

impl FakeSource {
    pub fn new(data: &[u8]) -> Self {
        Self {
            data: Bytes::copy_from_slice(data),
            fail: Box::new(|_, _| None),
            delay: Box::new(|_| Duration::ZERO),
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(
        mut self,
        rule: impl Fn(u32, &str) -> Option<u16> + Send + Sync + 'static,
    ) -> Self {
        self.fail = Box::new(rule);
        self
    }

    /// Delays each response by a function of its start offset.
    pub fn delayed(mut self, rule: impl Fn(u64) -> Duration + Send + Sync + 'static) -> Self {
        self.delay = Box::new(rule);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<(String, u64, u64)> {
        self.seen.lock().unwrap().clone()
    }
}

impl RangeSource for FakeSource {
    fn get_range(&self, url: &str, start: u64, end: u64) -> DownloadFuture<'_, RangeResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen.lock().unwrap().push((url.to_string(), start, end));
        let failure = (self.fail)(call, url);
        let delay = (self.delay)(start);
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            if let Some(status) = failure {
                return Ok(RangeResponse {
                    status,
                    body: Bytes::new(),
                });
            }
            let end = end.min(self.data.len() as u64 - 1);
            Ok(RangeResponse {
                status: 206,
                body: self.data.slice(start as usize..=end as usize),
            })
        })
    }
}

/// Deterministic non-repeating test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
