//! Entry points for moving files to and from the data-commons service.
//!
//! [`CommonsClient`] ties the REST client to the upload and download
//! engines:
//!
//! - [`CommonsClient::upload_file`]: resumable multipart upload of a local file
//! - [`CommonsClient::copy_file`]: server-side copy of an existing file handle
//! - [`CommonsClient::download_file`]: ranged multi-threaded download for
//!   large objects, single-stream download for everything else
//!
//! Embedding programs call [`telemetry::init_tracing`] once and may wire
//! Ctrl-C to a transfer's context with [`cancel_on_ctrl_c`].

pub mod config;
pub mod error;
pub mod rest;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use commons_download::{
    DownloadError, DownloadRequest, ExternalFetcher, HttpRangeSource, MultiThreadedDownloader,
    RangeSource, StreamDownloader, UrlScheme,
};
use commons_protocol::{DownloadLocation, FileHandleAssociation};
use commons_transfer::{TransferConfig, TransferContext};
use commons_upload::{
    HttpPartTransport, MultipartUploader, PartTransport, UploadAttempt, UploadError,
    UploadOutcome,
};
use reqwest::redirect::Policy;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub use config::ClientConfig;
pub use error::ClientError;
pub use rest::RestClient;

/// File transfers against one service endpoint.
///
/// Every transfer runs under a [`TransferContext`] supplied by the caller,
/// usually from [`CommonsClient::new_context`]. Cancelling one transfer
/// leaves the client usable for the next.
pub struct CommonsClient {
    rest: Arc<RestClient>,
    transport: Arc<dyn PartTransport>,
    ranges: Arc<dyn RangeSource>,
    stream_http: reqwest::Client,
    external: Option<Arc<dyn ExternalFetcher>>,
    config: Arc<TransferConfig>,
}

impl CommonsClient {
    pub fn new(config: &ClientConfig, transfer: TransferConfig) -> Result<Self, ClientError> {
        let rest = RestClient::new(config, transfer.retry.clone())?;
        // Object storage gets its own client: pre-signed URLs must not carry
        // the service's bearer token.
        let storage = reqwest::Client::builder().build()?;
        let stream_http = reqwest::Client::builder()
            .redirect(Policy::none())
            .build()?;
        Ok(Self {
            rest: Arc::new(rest),
            transport: Arc::new(HttpPartTransport::new(storage.clone())),
            ranges: Arc::new(HttpRangeSource::new(storage)),
            stream_http,
            external: None,
            config: Arc::new(transfer),
        })
    }

    /// Fetcher for `sftp://` and `ftp://` download sources.
    pub fn with_external(mut self, fetcher: Arc<dyn ExternalFetcher>) -> Self {
        self.external = Some(fetcher);
        self
    }

    /// A context with its own progress and cancellation token.
    pub fn new_context(&self) -> TransferContext {
        TransferContext::from_shared(Arc::clone(&self.config))
    }

    pub fn transfer_config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    /// Uploads the file at `path` and returns the new file handle.
    pub async fn upload_file(
        &self,
        ctx: &TransferContext,
        path: &Path,
        content_type: &str,
        storage_location_id: Option<i64>,
    ) -> Result<UploadOutcome, UploadError> {
        let path = path.to_path_buf();
        let content_type = content_type.to_string();
        let config = Arc::clone(&ctx.config);
        // Hashing the whole file is blocking work.
        let attempt = tokio::task::spawn_blocking(move || {
            UploadAttempt::from_file(&path, &content_type, storage_location_id, &config)
        })
        .await
        .map_err(|e| UploadError::Task(format!("prepare upload: {e}")))??;
        self.upload(ctx, &attempt).await
    }

    /// Copies an existing file handle into a new one without sending bytes.
    pub async fn copy_file(
        &self,
        ctx: &TransferContext,
        source: FileHandleAssociation,
        file_name: &str,
        storage_location_id: Option<i64>,
    ) -> Result<UploadOutcome, UploadError> {
        let attempt = UploadAttempt::copy(
            source,
            file_name,
            storage_location_id,
            ctx.config.upload_part_size,
        );
        self.upload(ctx, &attempt).await
    }

    /// Runs a prepared upload.
    pub async fn upload(
        &self,
        ctx: &TransferContext,
        attempt: &UploadAttempt,
    ) -> Result<UploadOutcome, UploadError> {
        let uploader = MultipartUploader::new(
            Arc::clone(&self.rest) as _,
            Arc::clone(&self.transport),
            ctx.clone(),
        );
        uploader.upload(attempt).await
    }

    /// Downloads the requested file handle to `request.destination`.
    pub async fn download_file(
        &self,
        ctx: &TransferContext,
        request: &DownloadRequest,
    ) -> Result<PathBuf, DownloadError> {
        let resolve = self.rest.file_handle_for_download(
            &request.file_handle_id,
            &request.object_id,
            request.object_type,
        );
        let location = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(DownloadError::Cancelled),
            r = resolve => r?,
        };

        if use_multithreaded(&location, &ctx.config) {
            let engine = MultiThreadedDownloader::new(
                Arc::clone(&self.rest) as _,
                Arc::clone(&self.ranges),
                ctx.clone(),
            );
            return engine.download_location(request, location).await;
        }

        info!(
            file_handle_id = %location.file_handle.id,
            destination = %request.destination.display(),
            "downloading as a single stream"
        );
        let mut engine = StreamDownloader::with_client(self.stream_http.clone(), ctx.clone());
        if let Some(fetcher) = &self.external {
            engine = engine.with_external(Arc::clone(fetcher));
        }
        engine
            .download(
                &location.pre_signed_url,
                &request.destination,
                location.file_handle.content_md5.as_deref(),
                &location.file_handle.id,
            )
            .await
    }
}

/// Whether `location` should go through the ranged multi-threaded engine:
/// an HTTP(S) URL with a known size larger than one download chunk.
pub fn use_multithreaded(location: &DownloadLocation, config: &TransferConfig) -> bool {
    config.multithreaded_download
        && matches!(
            UrlScheme::parse(&location.pre_signed_url),
            Ok(UrlScheme::Http(_))
        )
        && location
            .file_handle
            .content_size
            .is_some_and(|size| size > config.download_chunk_size)
}

/// Cancels `ctx` on the first Ctrl-C. The task ends once the context is
/// cancelled by either path.
pub fn cancel_on_ctrl_c(ctx: &TransferContext) -> JoinHandle<()> {
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    warn!("interrupt received, cancelling transfer");
                    cancel.cancel();
                }
                Err(e) => warn!(error = %e, "failed to listen for interrupt"),
            },
        }
    })
}
