//! Resumable multipart upload to object storage through pre-signed URLs.
//!
//! # Flow
//!
//! 1. **Initiate**: create or resume the server session for the file
//! 2. **Parts**: PUT each missing part to its pre-signed URL, refreshing
//!    expired URLs in coalesced batches, and add it to the session
//! 3. **Complete**: finalize and return the new file handle ID
//!
//! Whole attempts are retried on recoverable failures; each retry resumes
//! from the server's part bitmap.

pub mod api;
pub mod error;
pub mod orchestrator;
pub mod part;
pub mod types;
pub mod url_cache;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{HttpPartTransport, MultipartApi, PartTransport, PutResponse, UploadFuture};
pub use error::UploadError;
pub use orchestrator::MultipartUploader;
pub use part::{AbortCause, AbortSignal, PartUploader};
pub use types::{HandlePartResult, UploadAttempt, UploadOutcome, UploadSource, UploadState};
pub use url_cache::{PartUrl, PresignedUrlCache};
