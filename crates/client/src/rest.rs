//! REST client for the file service.
//!
//! Async HTTP client using `reqwest` with Bearer token authentication.
//! Every call is retried on connection failures and on the configured
//! transient statuses.

use commons_download::{DownloadApi, DownloadError, DownloadFuture};
use commons_protocol::{
    AddPartResponse, BatchFileRequest, BatchFileResult, BatchPresignedUploadUrlRequest,
    BatchPresignedUploadUrlResponse, DownloadLocation, ErrorResponse, FileHandleAssociateType,
    FileHandleAssociation, MultipartRequest, MultipartUploadStatus, PartPresignedUrl,
};
use commons_transfer::{RetryPolicy, with_retry};
use commons_upload::{MultipartApi, UploadFuture};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::ClientError;

/// File-service client.
pub struct RestClient {
    http: reqwest::Client,
    file_endpoint: String,
    retry: RetryPolicy,
}

impl RestClient {
    pub fn new(config: &ClientConfig, retry: RetryPolicy) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = &config.auth_token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|_| ClientError::InvalidToken)?,
            );
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        // Validated once so endpoint formatting below cannot produce garbage.
        url::Url::parse(&config.file_endpoint)?;

        Ok(Self {
            http,
            file_endpoint: config.file_endpoint.trim_end_matches('/').to_string(),
            retry,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.file_endpoint, path)
    }

    /// Sends the request built by `build` until it succeeds or the retry
    /// policy gives up, and decodes the JSON body.
    async fn call<T: DeserializeOwned>(
        &self,
        what: &str,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        with_retry(&self.retry, what, |_| {
            let req = build();
            async move {
                let resp = req.send().await?;
                let status = resp.status();
                let body = resp.bytes().await?;
                if !status.is_success() {
                    let reason = serde_json::from_slice::<ErrorResponse>(&body)
                        .map(|e| e.reason)
                        .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
                    return Err(ClientError::Api {
                        status: status.as_u16(),
                        reason,
                    });
                }
                Ok(serde_json::from_slice(&body)?)
            }
        })
        .await
    }

    pub async fn start_multipart(
        &self,
        request: &MultipartRequest,
        force_restart: bool,
    ) -> Result<MultipartUploadStatus, ClientError> {
        let url = self.url("/file/multipart");
        self.call("start multipart upload", || {
            self.http
                .post(&url)
                .query(&[("forceRestart", force_restart)])
                .json(request)
        })
        .await
    }

    pub async fn presigned_urls(
        &self,
        upload_id: &str,
        part_numbers: &[u32],
        content_type: Option<&str>,
    ) -> Result<Vec<PartPresignedUrl>, ClientError> {
        let url = self.url(&format!("/file/multipart/{upload_id}/presigned/url/batch"));
        let body = BatchPresignedUploadUrlRequest {
            upload_id: upload_id.to_string(),
            part_numbers: part_numbers.to_vec(),
            content_type: content_type.map(str::to_string),
        };
        let resp: BatchPresignedUploadUrlResponse = self
            .call("presign parts", || self.http.post(&url).json(&body))
            .await?;
        debug!(upload_id, count = resp.part_presigned_urls.len(), "presigned part URLs");
        Ok(resp.part_presigned_urls)
    }

    pub async fn add_multipart_part(
        &self,
        upload_id: &str,
        part_number: u32,
        md5_hex: &str,
    ) -> Result<AddPartResponse, ClientError> {
        let url = self.url(&format!("/file/multipart/{upload_id}/add/{part_number}"));
        self.call("add part", || {
            self.http.put(&url).query(&[("partMD5Hex", md5_hex)])
        })
        .await
    }

    pub async fn complete_multipart(
        &self,
        upload_id: &str,
    ) -> Result<MultipartUploadStatus, ClientError> {
        let url = self.url(&format!("/file/multipart/{upload_id}/complete"));
        self.call("complete multipart upload", || self.http.put(&url))
            .await
    }

    /// Fetches the file handle and a fresh pre-signed GET URL.
    pub async fn file_handle_for_download(
        &self,
        file_handle_id: &str,
        object_id: &str,
        object_type: FileHandleAssociateType,
    ) -> Result<DownloadLocation, ClientError> {
        let url = self.url("/fileHandle/batch");
        let body = BatchFileRequest {
            requested_files: vec![FileHandleAssociation {
                file_handle_id: file_handle_id.to_string(),
                associate_object_id: object_id.to_string(),
                associate_object_type: object_type,
            }],
            include_pre_signed_urls: true,
            include_file_handles: true,
            include_preview_pre_signed_urls: false,
        };
        let batch: BatchFileResult = self
            .call("get file handle", || self.http.post(&url).json(&body))
            .await?;

        let result = batch
            .requested_files
            .into_iter()
            .find(|r| r.file_handle_id == file_handle_id)
            .ok_or(ClientError::MissingField("requestedFiles"))?;
        if let Some(code) = result.failure_code {
            return Err(ClientError::Unavailable {
                file_handle_id: file_handle_id.to_string(),
                code,
            });
        }
        Ok(DownloadLocation {
            file_handle: result
                .file_handle
                .ok_or(ClientError::MissingField("fileHandle"))?,
            pre_signed_url: result
                .pre_signed_url
                .ok_or(ClientError::MissingField("preSignedURL"))?,
        })
    }
}

impl MultipartApi for RestClient {
    fn create_or_resume_upload(
        &self,
        request: &MultipartRequest,
        force_restart: bool,
    ) -> UploadFuture<'_, MultipartUploadStatus> {
        let request = request.clone();
        Box::pin(async move {
            Ok(self.start_multipart(&request, force_restart).await?)
        })
    }

    fn presigned_part_urls(
        &self,
        upload_id: &str,
        part_numbers: &[u32],
        content_type: Option<&str>,
    ) -> UploadFuture<'_, Vec<PartPresignedUrl>> {
        let upload_id = upload_id.to_string();
        let part_numbers = part_numbers.to_vec();
        let content_type = content_type.map(str::to_string);
        Box::pin(async move {
            Ok(self
                .presigned_urls(&upload_id, &part_numbers, content_type.as_deref())
                .await?)
        })
    }

    fn add_part(
        &self,
        upload_id: &str,
        part_number: u32,
        md5_hex: &str,
    ) -> UploadFuture<'_, AddPartResponse> {
        let upload_id = upload_id.to_string();
        let md5_hex = md5_hex.to_string();
        Box::pin(async move {
            Ok(self
                .add_multipart_part(&upload_id, part_number, &md5_hex)
                .await?)
        })
    }

    fn complete_upload(&self, upload_id: &str) -> UploadFuture<'_, MultipartUploadStatus> {
        let upload_id = upload_id.to_string();
        Box::pin(async move { Ok(self.complete_multipart(&upload_id).await?) })
    }
}

impl DownloadApi for RestClient {
    fn get_file_handle_for_download(
        &self,
        file_handle_id: &str,
        object_id: &str,
        object_type: FileHandleAssociateType,
    ) -> DownloadFuture<'_, DownloadLocation> {
        let file_handle_id = file_handle_id.to_string();
        let object_id = object_id.to_string();
        Box::pin(async move {
            self.file_handle_for_download(&file_handle_id, &object_id, object_type)
                .await
                .map_err(DownloadError::from)
        })
    }
}
