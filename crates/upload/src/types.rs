//! Data types for the multipart upload flow.

use std::fmt;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use commons_protocol::{
    FileHandleAssociation, MultipartCopyRequest, MultipartRequest, MultipartUploadRequest,
};
use commons_transfer::{
    TransferConfig, calculate_file_checksum, calculate_part_size, checksum_bytes,
};

use crate::error::UploadError;

/// Where part bytes come from.
#[derive(Debug, Clone)]
pub enum UploadSource {
    /// Parts are read from this file on demand.
    File(PathBuf),
    /// Parts are sliced out of an in-memory buffer.
    Bytes(Bytes),
    /// Server-side copy; no bytes are sent.
    Copy,
}

/// One multipart upload, possibly spanning several full attempts.
#[derive(Debug, Clone)]
pub struct UploadAttempt {
    pub request: MultipartRequest,
    pub source: UploadSource,
    /// Discard any existing session on the first attempt.
    pub force_restart: bool,
}

impl UploadAttempt {
    /// Prepares an upload of the file at `path`. Blocking: hashes the whole file.
    pub fn from_file(
        path: &Path,
        content_type: &str,
        storage_location_id: Option<i64>,
        config: &TransferConfig,
    ) -> Result<Self, UploadError> {
        let file_size = std::fs::metadata(path)?.len();
        let content_md5_hex = calculate_file_checksum(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            request: upload_request(
                content_md5_hex,
                file_name,
                file_size,
                content_type,
                storage_location_id,
                config,
            ),
            source: UploadSource::File(path.to_path_buf()),
            force_restart: false,
        })
    }

    /// Prepares an upload of an in-memory buffer.
    pub fn from_bytes(
        file_name: &str,
        data: Bytes,
        content_type: &str,
        storage_location_id: Option<i64>,
        config: &TransferConfig,
    ) -> Self {
        Self {
            request: upload_request(
                checksum_bytes(&data),
                file_name.to_string(),
                data.len() as u64,
                content_type,
                storage_location_id,
                config,
            ),
            source: UploadSource::Bytes(data),
            force_restart: false,
        }
    }

    /// Prepares a server-side copy of an existing file handle.
    pub fn copy(
        source: FileHandleAssociation,
        file_name: &str,
        storage_location_id: Option<i64>,
        part_size: u64,
    ) -> Self {
        Self {
            request: MultipartRequest::Copy(MultipartCopyRequest {
                file_name: file_name.to_string(),
                part_size_bytes: part_size,
                storage_location_id,
                source_file_handle_association: source,
            }),
            source: UploadSource::Copy,
            force_restart: false,
        }
    }

    pub fn with_force_restart(mut self, force_restart: bool) -> Self {
        self.force_restart = force_restart;
        self
    }

    /// Total bytes to send, when known locally.
    pub fn file_size(&self) -> Option<u64> {
        match &self.request {
            MultipartRequest::Upload(r) => Some(r.file_size_bytes),
            MultipartRequest::Copy(_) => None,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        match &self.request {
            MultipartRequest::Upload(r) => Some(&r.content_type),
            MultipartRequest::Copy(_) => None,
        }
    }
}

fn upload_request(
    content_md5_hex: String,
    file_name: String,
    file_size: u64,
    content_type: &str,
    storage_location_id: Option<i64>,
    config: &TransferConfig,
) -> MultipartRequest {
    let part_size = calculate_part_size(
        config.upload_part_size,
        file_size,
        config.min_part_size,
        config.max_part_count,
    );
    MultipartRequest::Upload(MultipartUploadRequest {
        content_md5_hex,
        file_name,
        file_size_bytes: file_size,
        part_size_bytes: part_size,
        content_type: content_type.to_string(),
        storage_location_id,
        generate_preview: true,
    })
}

/// A part that reached object storage, ready to be added to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlePartResult {
    pub part_number: u32,
    pub size: u64,
    pub md5_hex: String,
}

/// Lifecycle of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Initiated,
    PartsPending,
    PartsComplete,
    Completed,
    Aborted,
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initiated => "INITIATED",
            Self::PartsPending => "PARTS_PENDING",
            Self::PartsComplete => "PARTS_COMPLETE",
            Self::Completed => "COMPLETED",
            Self::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

/// Result of a successful multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub upload_id: String,
    pub file_handle_id: String,
    /// Full attempts used, starting at 1.
    pub attempts: u32,
}
