use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use bytes::Bytes;
use md5::{Digest, Md5};

use crate::TransferError;

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes MD5 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes MD5 of an entire file and returns the hex-encoded digest.
pub fn calculate_file_checksum(path: &Path) -> Result<String, TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut stream = Md5Stream::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        stream.update(&buf[..n]);
    }
    Ok(stream.finish())
}

/// Incremental MD5 over bytes as they are streamed to disk.
#[derive(Default)]
pub struct Md5Stream {
    hasher: Md5,
    len: u64,
}

impl Md5Stream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.len += data.len() as u64;
    }

    /// Bytes hashed so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Consumes the stream and returns the hex digest.
    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

// ---------------------------------------------------------------------------
// Part sizing
// ---------------------------------------------------------------------------

/// Effective part size for a multipart upload.
///
/// The result is at least `min_part_size` and large enough that the file
/// splits into no more than `max_part_count` parts.
pub fn calculate_part_size(
    requested_part_size: u64,
    file_size: u64,
    min_part_size: u64,
    max_part_count: u64,
) -> u64 {
    let min_part_size = min_part_size.max(1);
    let max_part_count = max_part_count.max(1);
    requested_part_size
        .max(min_part_size)
        .max(file_size.div_ceil(max_part_count))
}

/// Number of parts `file_size` splits into. An empty file still has one part.
pub fn part_count(file_size: u64, part_size: u64) -> u64 {
    if file_size == 0 || part_size == 0 {
        return 1;
    }
    file_size.div_ceil(part_size)
}

/// Byte offset and length of the 1-indexed `part_number`.
pub fn part_range(
    part_number: u32,
    part_size: u64,
    file_size: u64,
) -> Result<(u64, u64), TransferError> {
    if part_size == 0 {
        return Err(TransferError::InvalidPartSize("part size must be > 0".into()));
    }
    let count = part_count(file_size, part_size);
    if part_number == 0 || u64::from(part_number) > count {
        return Err(TransferError::PartOutOfRange {
            part: part_number,
            count,
        });
    }
    let offset = (u64::from(part_number) - 1) * part_size;
    let len = part_size.min(file_size - offset);
    Ok((offset, len))
}

// ---------------------------------------------------------------------------
// Part extraction
// ---------------------------------------------------------------------------

/// The bytes of one part, read from a file or a buffer.
#[derive(Debug, Clone)]
pub struct FilePart {
    /// 1-indexed part number.
    pub part_number: u32,
    /// Byte offset within the source.
    pub offset: u64,
    pub data: Bytes,
}

impl FilePart {
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Reads exactly the bytes of `part_number` from the file at `path`.
///
/// Blocking; callers on an async runtime run this under `spawn_blocking`.
pub fn read_file_part(
    path: &Path,
    part_number: u32,
    part_size: u64,
) -> Result<FilePart, TransferError> {
    let mut file = std::fs::File::open(path)?;
    let file_size = file.metadata()?.len();
    let (offset, len) = part_range(part_number, part_size, file_size)?;

    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf)?;

    Ok(FilePart {
        part_number,
        offset,
        data: Bytes::from(buf),
    })
}

/// Slices the bytes of `part_number` out of an in-memory buffer.
pub fn data_chunk(data: &[u8], part_number: u32, part_size: u64) -> Result<&[u8], TransferError> {
    let (offset, len) = part_range(part_number, part_size, data.len() as u64)?;
    let start = offset as usize;
    Ok(&data[start..start + len as usize])
}

/// Splits `[0, total)` into inclusive `(start, end)` ranges of at most `chunk_size` bytes.
pub fn byte_ranges(total: u64, chunk_size: u64) -> impl Iterator<Item = (u64, u64)> {
    let chunk_size = chunk_size.max(1);
    (0..total.div_ceil(chunk_size)).map(move |i| {
        let start = i * chunk_size;
        let end = (start + chunk_size).min(total) - 1;
        (start, end)
    })
}
