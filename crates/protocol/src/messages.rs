use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;
use crate::types::{FileHandle, FileHandleAssociation};

// ---------------------------------------------------------------------------
// Multipart upload session
// ---------------------------------------------------------------------------

/// Body of `POST /file/multipart`, discriminated by `concreteType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "concreteType")]
pub enum MultipartRequest {
    #[serde(rename = "org.sagebionetworks.repo.model.file.MultipartUploadRequest")]
    Upload(MultipartUploadRequest),
    #[serde(rename = "org.sagebionetworks.repo.model.file.MultipartUploadCopyRequest")]
    Copy(MultipartCopyRequest),
}

impl MultipartRequest {
    /// Destination file name.
    pub fn file_name(&self) -> &str {
        match self {
            Self::Upload(r) => &r.file_name,
            Self::Copy(r) => &r.file_name,
        }
    }

    /// Part size negotiated for the session.
    pub fn part_size(&self) -> u64 {
        match self {
            Self::Upload(r) => r.part_size_bytes,
            Self::Copy(r) => r.part_size_bytes,
        }
    }

    /// Returns `true` for a server-side copy (no bytes leave this process).
    pub fn is_copy(&self) -> bool {
        matches!(self, Self::Copy(_))
    }
}

/// Uploads local bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartUploadRequest {
    #[serde(rename = "contentMD5Hex")]
    pub content_md5_hex: String,
    pub file_name: String,
    pub file_size_bytes: u64,
    pub part_size_bytes: u64,
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_location_id: Option<i64>,
    #[serde(default)]
    pub generate_preview: bool,
}

/// Copies an existing file handle into a new storage location server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartCopyRequest {
    pub file_name: String,
    pub part_size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_location_id: Option<i64>,
    pub source_file_handle_association: FileHandleAssociation,
}

/// Overall session state as tracked by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MultipartUploadState {
    Uploading,
    Completed,
}

/// Server-side view of one multipart upload session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartUploadStatus {
    pub upload_id: String,
    pub state: MultipartUploadState,
    /// One character per part, `'1'` when the part has been added.
    #[serde(default)]
    pub parts_state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_file_handle_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_on: Option<String>,
}

impl MultipartUploadStatus {
    /// Number of parts in the session.
    pub fn part_count(&self) -> usize {
        self.parts_state.len()
    }

    pub fn is_completed(&self) -> bool {
        self.state == MultipartUploadState::Completed
    }

    /// Decodes the per-part bitmap.
    pub fn completed_parts(&self) -> Result<Vec<bool>, ProtocolError> {
        self.parts_state
            .chars()
            .enumerate()
            .map(|(i, c)| match c {
                '1' => Ok(true),
                '0' => Ok(false),
                found => Err(ProtocolError::InvalidPartsState { part: i + 1, found }),
            })
            .collect()
    }

    /// Returns `true` if the 1-indexed `part_number` has been added.
    pub fn is_part_complete(&self, part_number: u32) -> bool {
        part_number
            .checked_sub(1)
            .and_then(|i| self.parts_state.as_bytes().get(i as usize))
            == Some(&b'1')
    }

    /// 1-indexed part numbers not yet added to the session.
    pub fn remaining_parts(&self) -> Result<Vec<u32>, ProtocolError> {
        Ok(self
            .completed_parts()?
            .into_iter()
            .enumerate()
            .filter(|(_, done)| !done)
            .map(|(i, _)| (i + 1) as u32)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Pre-signed part URLs
// ---------------------------------------------------------------------------

/// Body of `POST /file/multipart/{uploadId}/presigned/url/batch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPresignedUploadUrlRequest {
    pub upload_id: String,
    pub part_numbers: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPresignedUploadUrlResponse {
    #[serde(default)]
    pub part_presigned_urls: Vec<PartPresignedUrl>,
}

/// A signed PUT target for one part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartPresignedUrl {
    pub part_number: u32,
    pub upload_presigned_url: String,
    /// Headers that were included in the signature and must be sent verbatim.
    #[serde(default)]
    pub signed_headers: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Add part / complete
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AddPartState {
    AddSuccess,
    AddFailed,
}

/// Response of `PUT /file/multipart/{uploadId}/add/{partNumber}?partMD5Hex=`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddPartResponse {
    pub upload_id: String,
    pub part_number: u32,
    pub add_part_state: AddPartState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

// ---------------------------------------------------------------------------
// File handle batch (download side)
// ---------------------------------------------------------------------------

/// Body of `POST /fileHandle/batch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFileRequest {
    pub requested_files: Vec<FileHandleAssociation>,
    #[serde(rename = "includePreSignedURLs")]
    pub include_pre_signed_urls: bool,
    pub include_file_handles: bool,
    #[serde(default)]
    pub include_preview_pre_signed_urls: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFileResult {
    #[serde(default)]
    pub requested_files: Vec<FileResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResult {
    pub file_handle_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_handle: Option<FileHandle>,
    #[serde(rename = "preSignedURL", default, skip_serializing_if = "Option::is_none")]
    pub pre_signed_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<String>,
}

/// Error body returned by the service on non-2xx responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub reason: String,
}
