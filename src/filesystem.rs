//! Filesystem-backed object storage.
//!
//! Streams object bytes to and from disk in bounded chunks, computes MD5
//! ETags, and serves byte ranges. Every path is resolved through the
//! [`PathResolver`] so the containment check applies to all access.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use mime_guess::MimeGuess;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::error::SandbarError;
use crate::paths::PathResolver;

/// Fixed chunk size for all streaming reads and writes.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Streaming response body, chunked at [`CHUNK_SIZE`].
pub type ByteStreamBody = BoxBody<Bytes, std::io::Error>;

#[derive(Debug, Clone)]
pub struct ObjectMetadata {
    pub path: PathBuf,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub content_type: String,
}

pub struct ObjectStore {
    resolver: PathResolver,
}

impl ObjectStore {
    pub fn new(resolver: PathResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Stat an object, mapping a missing or non-regular file to NoSuchKey.
    pub async fn metadata(&self, bucket: &str, key: &str) -> Result<ObjectMetadata, SandbarError> {
        let path = self.resolver.resolve(bucket, key)?;
        let metadata = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SandbarError::NoSuchKey(format!("{}/{}", bucket, key)));
            }
            Err(e) => return Err(e.into()),
        };

        if !metadata.is_file() {
            warn!(bucket = %bucket, key = %key, "Path is not a regular file");
            return Err(SandbarError::NoSuchKey(format!("{}/{}", bucket, key)));
        }

        let last_modified = metadata
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH)
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default();
        let last_modified =
            DateTime::from_timestamp(last_modified.as_secs() as i64, 0).unwrap_or_else(Utc::now);

        let content_type = MimeGuess::from_path(&path)
            .first_or_octet_stream()
            .to_string();

        Ok(ObjectMetadata {
            path,
            size: metadata.len(),
            last_modified,
            content_type,
        })
    }

    /// Compute the quoted hex-MD5 ETag of a file by streaming it.
    pub async fn compute_etag(&self, path: &Path) -> Result<String, SandbarError> {
        let mut file = fs::File::open(path).await?;
        let mut context = md5::Context::new();
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let read = file.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            context.consume(&buf[..read]);
        }
        Ok(format!("\"{:x}\"", context.compute()))
    }

    /// Stream an object (or an inclusive byte span of it) in fixed-size
    /// chunks without buffering it in memory.
    pub async fn stream_object(
        &self,
        metadata: &ObjectMetadata,
        range: Option<(u64, u64)>,
    ) -> Result<ByteStreamBody, SandbarError> {
        let mut file = fs::File::open(&metadata.path).await?;

        let length = match range {
            Some((start, end)) => {
                file.seek(std::io::SeekFrom::Start(start)).await?;
                end - start + 1
            }
            None => metadata.size,
        };

        let reader = file.take(length);
        let stream = ReaderStream::with_capacity(reader, CHUNK_SIZE).map_ok(Frame::data);
        Ok(StreamBody::new(stream).boxed())
    }

    /// Write an object by streaming request body frames to a temporary
    /// sibling file, then renaming atomically into place. Returns the ETag
    /// and the number of bytes written.
    pub async fn write_object<B>(
        &self,
        bucket: &str,
        key: &str,
        body: B,
    ) -> Result<(String, u64), SandbarError>
    where
        B: http_body::Body<Data = Bytes> + Unpin,
        B::Error: std::fmt::Display,
    {
        let path = self.resolver.resolve(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = temp_sibling(&path);
        let result = write_body_to_file(&temp_path, body).await;

        match result {
            Ok((etag, size)) => {
                fs::rename(&temp_path, &path).await?;
                debug!(bucket = %bucket, key = %key, size = size, "Wrote object");
                Ok((etag, size))
            }
            Err(e) => {
                // A failed write must not leave the key updated; drop the temp file
                let _ = fs::remove_file(&temp_path).await;
                Err(e)
            }
        }
    }

    /// Delete an object. A missing key is an error here: the emulator's
    /// callers expect 404 rather than S3's idempotent success.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), SandbarError> {
        let metadata = self.metadata(bucket, key).await?;
        fs::remove_file(&metadata.path).await?;
        debug!(bucket = %bucket, key = %key, "Deleted object");
        Ok(())
    }
}

/// Derive a temp path next to `path` so the final rename stays on one
/// filesystem.
pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Stream body frames into `path`, fsync, and return (etag, size).
pub(crate) async fn write_body_to_file<B>(
    path: &Path,
    mut body: B,
) -> Result<(String, u64), SandbarError>
where
    B: http_body::Body<Data = Bytes> + Unpin,
    B::Error: std::fmt::Display,
{
    let mut file = fs::File::create(path).await?;
    let mut context = md5::Context::new();
    let mut written: u64 = 0;

    while let Some(frame) = body.frame().await {
        let frame =
            frame.map_err(|e| SandbarError::Io(std::io::Error::other(e.to_string())))?;
        if let Some(data) = frame.data_ref() {
            file.write_all(data).await?;
            context.consume(data);
            written += data.len() as u64;
        }
    }

    file.sync_all().await?;
    Ok((format!("\"{:x}\"", context.compute()), written))
}

/// Parse a `Range: bytes=start-end` header against the object size.
///
/// Only the explicit inclusive form is accepted; suffix and open-ended
/// ranges are rejected along with anything out of bounds.
pub fn parse_range_header(header: &str, size: u64) -> Result<(u64, u64), SandbarError> {
    let spec = header
        .strip_prefix("bytes=")
        .ok_or_else(|| SandbarError::InvalidRange(header.to_string()))?;

    let (start_str, end_str) = spec
        .split_once('-')
        .ok_or_else(|| SandbarError::InvalidRange(header.to_string()))?;

    let start: u64 = start_str
        .parse()
        .map_err(|_| SandbarError::InvalidRange(header.to_string()))?;
    let end: u64 = end_str
        .parse()
        .map_err(|_| SandbarError::InvalidRange(header.to_string()))?;

    if start > end || end >= size {
        return Err(SandbarError::InvalidRange(header.to_string()));
    }

    Ok((start, end))
}
