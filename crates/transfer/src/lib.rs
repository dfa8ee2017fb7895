//! Transfer primitives shared by the multipart upload and ranged download engines.
//!
//! - [`chunked`]: part sizing, part/range extraction and MD5 checksums
//! - [`presigned`]: expiry inspection of pre-signed object-storage URLs
//! - [`retry`]: bounded exponential backoff and refresh-on-expiry execution
//! - [`progress`]: byte counters and throughput estimation
//! - [`context`]: the per-call [`TransferContext`] handed to orchestrators
//! - [`config`]: tunables with serde defaults and environment overrides

pub mod chunked;
pub mod config;
pub mod context;
pub mod presigned;
pub mod progress;
pub mod retry;

pub use chunked::{
    FilePart, Md5Stream, byte_ranges, calculate_file_checksum, calculate_part_size, checksum_bytes,
    data_chunk, part_count, part_range, read_file_part,
};
pub use config::{TransferConfig, config_dir};
pub use context::TransferContext;
pub use presigned::{expires_at, is_expired};
pub use progress::{ProgressCallback, ProgressSnapshot, SpeedCalculator, TransferProgress};
pub use retry::{RetryPolicy, Retryable, execute_with_url_refresh, with_retry};

/// Part size used when the caller does not request one: 8 MiB.
pub const DEFAULT_PART_SIZE: u64 = 8 * 1024 * 1024;

/// Smallest part object storage accepts (except for the last part): 5 MiB.
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Upper bound on parts per multipart upload.
pub const MAX_PART_COUNT: u64 = 10_000;

/// Byte range size for multi-threaded downloads: 8 MiB.
pub const DEFAULT_DOWNLOAD_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("part {part} out of range: file has {count} parts")]
    PartOutOfRange { part: u32, count: u64 },

    #[error("invalid part size: {0}")]
    InvalidPartSize(String),
}
