//! Wire types for the data-commons REST endpoints used by the transfer engines.
//!
//! Field names follow the service's JSON (camelCase, with a few irregular
//! spellings such as `contentMD5Hex` and `preSignedURL` renamed explicitly).

pub mod messages;
pub mod types;

pub use messages::{
    AddPartResponse, AddPartState, BatchFileRequest, BatchFileResult,
    BatchPresignedUploadUrlRequest, BatchPresignedUploadUrlResponse, ErrorResponse, FileResult,
    MultipartCopyRequest, MultipartRequest, MultipartUploadRequest, MultipartUploadState,
    MultipartUploadStatus, PartPresignedUrl,
};
pub use types::{DownloadLocation, FileHandle, FileHandleAssociateType, FileHandleAssociation};

/// Errors produced while interpreting wire payloads.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid partsState character {found:?} at part {part}")]
    InvalidPartsState { part: usize, found: char },

    #[error("missing field: {0}")]
    MissingField(&'static str),
}
