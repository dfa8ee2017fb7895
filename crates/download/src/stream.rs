//! Sequential single-stream download.
//!
//! The source URL is classified once into a [`UrlScheme`] and handed to the
//! matching handler. HTTP downloads stream into a temp file next to the
//! destination, resume it with a `Range` header, follow a bounded number of
//! redirects, and hash while writing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use commons_transfer::{Md5Stream, TransferContext, calculate_file_checksum, with_retry};
use reqwest::header::{LOCATION, RANGE};
use reqwest::redirect::Policy;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use url::Url;

use crate::api::ExternalFetcher;
use crate::error::DownloadError;

/// Where a download comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlScheme {
    /// `file://`; the source is used in place and never deleted.
    Local(PathBuf),
    Sftp(Url),
    Ftp(Url),
    /// `http://` or `https://`.
    Http(Url),
}

impl UrlScheme {
    pub fn parse(url: &str) -> Result<Self, DownloadError> {
        let parsed = Url::parse(url)?;
        match parsed.scheme() {
            "file" => parsed
                .to_file_path()
                .map(Self::Local)
                .map_err(|_| DownloadError::UnsupportedScheme(format!("file URL {url}"))),
            "sftp" => Ok(Self::Sftp(parsed)),
            "ftp" => Ok(Self::Ftp(parsed)),
            "http" | "https" => Ok(Self::Http(parsed)),
            other => Err(DownloadError::UnsupportedScheme(other.to_string())),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

/// Path of the resumable temp file for `destination`.
pub fn temp_path(destination: &Path, temp_key: &str) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    name.push(format!(".commons_download_{temp_key}"));
    PathBuf::from(name)
}

pub struct StreamDownloader {
    client: reqwest::Client,
    ctx: TransferContext,
    external: Option<Arc<dyn ExternalFetcher>>,
}

impl StreamDownloader {
    pub fn new(ctx: TransferContext) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .build()?;
        Ok(Self::with_client(client, ctx))
    }

    /// Redirects are followed here, so `client` should not follow them itself.
    pub fn with_client(client: reqwest::Client, ctx: TransferContext) -> Self {
        Self {
            client,
            ctx,
            external: None,
        }
    }

    /// Handles `sftp://` and `ftp://` sources. Without one those schemes
    /// are rejected as unsupported.
    pub fn with_external(mut self, fetcher: Arc<dyn ExternalFetcher>) -> Self {
        self.external = Some(fetcher);
        self
    }

    pub fn context(&self) -> &TransferContext {
        &self.ctx
    }

    /// Downloads `url` and returns the local path of the result.
    ///
    /// `temp_key` names the resumable temp file, normally the file handle ID.
    /// When `expected_md5` is given and does not match, the downloaded file
    /// is removed, unless the source was a local `file://` path.
    pub async fn download(
        &self,
        url: &str,
        destination: &Path,
        expected_md5: Option<&str>,
        temp_key: &str,
    ) -> Result<PathBuf, DownloadError> {
        if self.ctx.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        let scheme = UrlScheme::parse(url)?;
        let verify = expected_md5.is_some();
        let (path, actual) = match &scheme {
            UrlScheme::Local(source) => self.from_local(source, verify).await?,
            UrlScheme::Sftp(remote) | UrlScheme::Ftp(remote) => {
                self.from_external(remote, destination, verify).await?
            }
            UrlScheme::Http(remote) => self.from_http(remote, destination, temp_key).await?,
        };

        if let (Some(expected), Some(actual)) = (expected_md5, actual) {
            if !actual.eq_ignore_ascii_case(expected) {
                if !scheme.is_local() {
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        warn!(
                            path = %path.display(),
                            error = %e,
                            "failed to remove corrupt download"
                        );
                    }
                }
                return Err(DownloadError::ChecksumMismatch {
                    url: url.to_string(),
                    destination: path,
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        info!(url, path = %path.display(), "download complete");
        Ok(path)
    }

    async fn from_local(
        &self,
        source: &Path,
        verify: bool,
    ) -> Result<(PathBuf, Option<String>), DownloadError> {
        let meta = tokio::fs::metadata(source).await?;
        self.ctx.progress.set_total(meta.len());
        self.ctx.progress.set_transferred(meta.len());
        let md5 = if verify { Some(hash_file(source).await?) } else { None };
        Ok((source.to_path_buf(), md5))
    }

    async fn from_external(
        &self,
        remote: &Url,
        destination: &Path,
        verify: bool,
    ) -> Result<(PathBuf, Option<String>), DownloadError> {
        let fetcher = self
            .external
            .as_ref()
            .ok_or_else(|| DownloadError::UnsupportedScheme(remote.scheme().to_string()))?;
        ensure_parent(destination).await?;
        fetcher.fetch(remote, destination).await?;
        let md5 = if verify { Some(hash_file(destination).await?) } else { None };
        Ok((destination.to_path_buf(), md5))
    }

    async fn from_http(
        &self,
        remote: &Url,
        destination: &Path,
        temp_key: &str,
    ) -> Result<(PathBuf, Option<String>), DownloadError> {
        let temp = temp_path(destination, temp_key);
        ensure_parent(destination).await?;

        let fetch = with_retry(&self.ctx.config.retry, "stream download", |attempt| {
            let temp = &temp;
            async move {
                if attempt > 1 {
                    debug!(attempt, "resuming stream download");
                }
                self.fetch_to_temp(remote, temp).await
            }
        });
        // The temp file is kept on cancel so a later call can resume it.
        let md5 = tokio::select! {
            _ = self.ctx.cancel.cancelled() => return Err(DownloadError::Cancelled),
            r = fetch => r?,
        };

        tokio::fs::rename(&temp, destination).await?;
        Ok((destination.to_path_buf(), Some(md5)))
    }

    /// Fetches `remote` into `temp`, resuming whatever is already there.
    /// Returns the MD5 of the complete temp file.
    async fn fetch_to_temp(&self, remote: &Url, temp: &Path) -> Result<String, DownloadError> {
        let limit = self.ctx.config.max_redirects;
        let mut current = remote.clone();
        let mut redirects = 0;
        loop {
            if self.ctx.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }
            let existing = tokio::fs::metadata(temp).await.map(|m| m.len()).unwrap_or(0);
            let mut req = self.client.get(current.clone());
            if existing > 0 {
                req = req.header(RANGE, format!("bytes={existing}-"));
            }
            let resp = req.send().await?;
            let status = resp.status();

            match status.as_u16() {
                200 => return self.write_body(resp, temp, 0).await,
                206 => return self.write_body(resp, temp, existing).await,
                // A previous attempt already wrote the whole object.
                416 if existing > 0 => {
                    debug!(bytes = existing, "temp file already complete");
                    self.ctx.progress.set_total(existing);
                    self.ctx.progress.set_transferred(existing);
                    return hash_file(temp).await;
                }
                _ if status.is_redirection() => {
                    redirects += 1;
                    if redirects > limit {
                        return Err(DownloadError::TooManyRedirects {
                            url: remote.to_string(),
                            limit,
                        });
                    }
                    let location = resp
                        .headers()
                        .get(LOCATION)
                        .and_then(|v| v.to_str().ok())
                        .ok_or_else(|| DownloadError::Status {
                            status: status.as_u16(),
                            url: current.to_string(),
                        })?;
                    current = current.join(location)?;
                    debug!(redirects, to = %current, "following redirect");
                }
                code => {
                    return Err(DownloadError::Status {
                        status: code,
                        url: current.to_string(),
                    });
                }
            }
        }
    }

    /// Streams the body into `temp`. With a non-zero `offset` the body is
    /// appended and the existing bytes seed the hash.
    async fn write_body(
        &self,
        mut resp: reqwest::Response,
        temp: &Path,
        offset: u64,
    ) -> Result<String, DownloadError> {
        let (mut md5, mut file) = if offset > 0 {
            debug!(offset, "appending to partial download");
            let md5 = hash_prefix(temp).await?;
            let file = OpenOptions::new().append(true).open(temp).await?;
            (md5, file)
        } else {
            (Md5Stream::new(), tokio::fs::File::create(temp).await?)
        };

        if let Some(len) = resp.content_length() {
            self.ctx.progress.set_total(offset + len);
        }
        self.ctx.progress.set_transferred(offset);

        while let Some(chunk) = resp.chunk().await? {
            if self.ctx.is_cancelled() {
                file.flush().await?;
                return Err(DownloadError::Cancelled);
            }
            md5.update(&chunk);
            file.write_all(&chunk).await?;
            self.ctx.progress.add(chunk.len() as u64);
        }
        file.flush().await?;
        self.ctx.progress.notify();
        Ok(md5.finish())
    }
}

async fn ensure_parent(path: &Path) -> Result<(), DownloadError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

async fn hash_file(path: &Path) -> Result<String, DownloadError> {
    let path = path.to_path_buf();
    let md5 = tokio::task::spawn_blocking(move || calculate_file_checksum(&path))
        .await
        .map_err(|e| DownloadError::Task(format!("checksum: {e}")))??;
    Ok(md5)
}

async fn hash_prefix(path: &Path) -> Result<Md5Stream, DownloadError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut md5 = Md5Stream::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok(md5);
        }
        md5.update(&buf[..n]);
    }
}
