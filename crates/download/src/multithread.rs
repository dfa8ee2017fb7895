//! Multi-threaded ranged download.
//!
//! One generator thread splits the object into fixed-size ranges and feeds
//! a bounded range queue. `N` fetch threads turn ranges into bytes on the
//! async runtime and feed a bounded data queue; `N` write threads store each
//! chunk at its absolute offset in the pre-allocated destination. The
//! pipeline is done when both queues are drained and every sender is gone.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use bytes::Bytes;
use commons_protocol::DownloadLocation;
use commons_transfer::{TransferContext, byte_ranges, calculate_file_checksum};
use flume::{Receiver, Sender};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{DownloadApi, DownloadRequest, RangeSource};
use crate::error::DownloadError;
use crate::range::{ByteRangeChunk, RangeFetcher, SignedUrlSlot};

/// Downloads a file handle through concurrent ranged GETs.
pub struct MultiThreadedDownloader {
    api: Arc<dyn DownloadApi>,
    source: Arc<dyn RangeSource>,
    ctx: TransferContext,
}

impl MultiThreadedDownloader {
    pub fn new(
        api: Arc<dyn DownloadApi>,
        source: Arc<dyn RangeSource>,
        ctx: TransferContext,
    ) -> Self {
        Self { api, source, ctx }
    }

    pub fn context(&self) -> &TransferContext {
        &self.ctx
    }

    /// Resolves the file handle, then downloads it to `request.destination`.
    pub async fn download(&self, request: &DownloadRequest) -> Result<PathBuf, DownloadError> {
        let resolve = self.api.get_file_handle_for_download(
            &request.file_handle_id,
            &request.object_id,
            request.object_type,
        );
        let location = tokio::select! {
            _ = self.ctx.cancel.cancelled() => return Err(DownloadError::Cancelled),
            r = resolve => r?,
        };
        self.download_location(request, location).await
    }

    /// Downloads an already resolved location.
    ///
    /// The destination is removed when the pipeline fails or the content
    /// MD5 does not match.
    pub async fn download_location(
        &self,
        request: &DownloadRequest,
        location: DownloadLocation,
    ) -> Result<PathBuf, DownloadError> {
        let file_handle = &location.file_handle;
        let size = file_handle
            .content_size
            .ok_or_else(|| DownloadError::MissingSize(file_handle.id.clone()))?;
        let destination = request.destination.clone();
        let threads = self.ctx.config.max_threads.max(1);
        info!(
            file_handle_id = %file_handle.id,
            size,
            threads,
            destination = %destination.display(),
            "starting multi-threaded download"
        );

        self.ctx.progress.set_total(size);
        self.ctx.progress.set_transferred(0);
        preallocate(&destination, size).await?;

        let slot = Arc::new(SignedUrlSlot::new(
            Arc::clone(&self.api),
            request.clone(),
            location.pre_signed_url.clone(),
        ));
        let pipeline = Pipeline {
            fetcher: RangeFetcher::new(
                Arc::clone(&self.source),
                Arc::clone(&slot),
                self.ctx.config.retry.clone(),
            ),
            destination: destination.clone(),
            file_name: file_handle.file_name.clone(),
            size,
            chunk_size: self.ctx.config.download_chunk_size,
            threads,
            ctx: self.ctx.clone(),
            runtime: Handle::current(),
        };

        let outcome = tokio::task::spawn_blocking(move || pipeline.run())
            .await
            .map_err(|e| DownloadError::Task(format!("download pipeline: {e}")))
            .and_then(|r| r);
        if let Err(e) = outcome {
            discard(&destination).await;
            return Err(e);
        }
        debug!(refreshes = slot.refresh_count(), "all ranges written");

        if let Some(expected) = &file_handle.content_md5 {
            let path = destination.clone();
            let actual = tokio::task::spawn_blocking(move || calculate_file_checksum(&path))
                .await
                .map_err(|e| DownloadError::Task(format!("checksum: {e}")))??;
            if !actual.eq_ignore_ascii_case(expected) {
                discard(&destination).await;
                return Err(DownloadError::ChecksumMismatch {
                    url: location.pre_signed_url.clone(),
                    destination,
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        self.ctx.progress.notify();
        info!(destination = %destination.display(), size, "download complete");
        Ok(destination)
    }
}

/// Creates `path` as a sparse file of `size` bytes.
async fn preallocate(path: &Path, size: u64) -> Result<(), DownloadError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<(), DownloadError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        File::create(&path)?.set_len(size)?;
        Ok(())
    })
    .await
    .map_err(|e| DownloadError::Task(format!("preallocate: {e}")))?
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "failed to remove incomplete download");
    }
}

/// Keeps the first worker error and halts the rest of the pipeline.
#[derive(Default)]
struct FirstFailure(Mutex<Option<DownloadError>>);

impl FirstFailure {
    fn record(&self, e: DownloadError, halt: &CancellationToken) {
        let mut slot = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            if !matches!(e, DownloadError::Cancelled) {
                warn!(error = %e, "download worker failed");
            }
            *slot = Some(e);
        }
        halt.cancel();
    }

    fn into_inner(self) -> Option<DownloadError> {
        self.0.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

struct Pipeline {
    fetcher: RangeFetcher,
    destination: PathBuf,
    file_name: String,
    size: u64,
    chunk_size: u64,
    threads: usize,
    ctx: TransferContext,
    runtime: Handle,
}

impl Pipeline {
    fn run(self) -> Result<(), DownloadError> {
        let depth = self.threads * 2;
        let (range_tx, range_rx) = flume::bounded::<ByteRangeChunk>(depth);
        let (data_tx, data_rx) = flume::bounded::<(u64, Bytes)>(depth);
        let halt = self.ctx.cancel.child_token();
        let failure = FirstFailure::default();
        let written = AtomicU64::new(0);

        thread::scope(|s| {
            let (this, halt, failure, written) = (&self, &halt, &failure, &written);
            let mut workers = Vec::with_capacity(self.threads * 2 + 1);

            workers.push(
                thread::Builder::new()
                    .name("download-ranges".into())
                    .spawn_scoped(s, move || this.generate(range_tx, halt)),
            );
            for i in 0..self.threads {
                let (rx, tx) = (range_rx.clone(), data_tx.clone());
                workers.push(
                    thread::Builder::new()
                        .name(format!("download-fetch-{i}"))
                        .spawn_scoped(s, move || this.produce(rx, tx, halt, failure)),
                );
            }
            for i in 0..self.threads {
                let rx = data_rx.clone();
                workers.push(
                    thread::Builder::new()
                        .name(format!("download-write-{i}"))
                        .spawn_scoped(s, move || this.consume(rx, halt, failure, written)),
                );
            }
            drop((range_rx, data_tx, data_rx));

            for worker in workers {
                match worker {
                    Ok(handle) => {
                        if handle.join().is_err() {
                            failure.record(DownloadError::Task("worker panicked".into()), halt);
                        }
                    }
                    Err(e) => failure.record(e.into(), halt),
                }
            }
        });

        if let Some(e) = failure.into_inner() {
            return Err(e);
        }
        if self.ctx.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        let written = written.into_inner();
        if written != self.size {
            return Err(DownloadError::Task(format!(
                "wrote {written} of {} bytes",
                self.size
            )));
        }
        Ok(())
    }

    fn generate(&self, tx: Sender<ByteRangeChunk>, halt: &CancellationToken) {
        for (start, end) in byte_ranges(self.size, self.chunk_size) {
            if halt.is_cancelled() {
                break;
            }
            let chunk = ByteRangeChunk {
                start,
                end,
                file_name: self.file_name.clone(),
                url: self.fetcher.slot.current(),
                destination: self.destination.clone(),
            };
            if tx.send(chunk).is_err() {
                break;
            }
        }
    }

    fn produce(
        &self,
        rx: Receiver<ByteRangeChunk>,
        tx: Sender<(u64, Bytes)>,
        halt: &CancellationToken,
        failure: &FirstFailure,
    ) {
        while let Ok(chunk) = rx.recv() {
            if halt.is_cancelled() {
                break;
            }
            let fetched = self.runtime.block_on(async {
                tokio::select! {
                    _ = halt.cancelled() => Err(DownloadError::Cancelled),
                    r = self.fetcher.fetch(&chunk) => r,
                }
            });
            match fetched {
                Ok(body) => {
                    if tx.send((chunk.start, body)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    failure.record(e, halt);
                    break;
                }
            }
        }
    }

    fn consume(
        &self,
        rx: Receiver<(u64, Bytes)>,
        halt: &CancellationToken,
        failure: &FirstFailure,
        written: &AtomicU64,
    ) {
        let mut file = match OpenOptions::new().write(true).open(&self.destination) {
            Ok(file) => file,
            Err(e) => return failure.record(e.into(), halt),
        };
        while let Ok((offset, body)) = rx.recv() {
            if halt.is_cancelled() {
                break;
            }
            let stored = file
                .seek(SeekFrom::Start(offset))
                .and_then(|_| file.write_all(&body));
            if let Err(e) = stored {
                failure.record(e.into(), halt);
                break;
            }
            let len = body.len() as u64;
            written.fetch_add(len, Ordering::Relaxed);
            self.ctx.progress.add(len);
        }
    }
}
