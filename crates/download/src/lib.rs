//! Download engines for stored file handles.
//!
//! - [`multithread`]: concurrent ranged GETs reassembled into a
//!   pre-allocated file, for large objects behind pre-signed URLs
//! - [`stream`]: sequential, resumable download for every other source

pub mod api;
pub mod error;
pub mod multithread;
pub mod range;
pub mod stream;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{
    DownloadApi, DownloadFuture, DownloadRequest, ExternalFetcher, HttpRangeSource, RangeResponse,
    RangeSource,
};
pub use error::DownloadError;
pub use multithread::MultiThreadedDownloader;
pub use range::{ByteRangeChunk, RangeFetcher, SignedUrlSlot};
pub use stream::{StreamDownloader, UrlScheme, temp_path};
