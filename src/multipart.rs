//! Multipart upload state management.
//!
//! In-flight uploads live in a mutex-guarded registry keyed by a random
//! upload id; part bodies are spooled to `{root}/.multipart/{uploadId}/`
//! until the upload is completed or aborted. The registry lock is never
//! held across file I/O, so parts of one upload can land concurrently.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::SandbarError;
use crate::filesystem::{temp_sibling, write_body_to_file, ObjectStore, CHUNK_SIZE};

const MIN_PART_NUMBER: u32 = 1;
const MAX_PART_NUMBER: u32 = 10000;

/// One uploaded part: content fingerprint plus its spool location.
#[derive(Debug, Clone)]
pub struct PartInfo {
    pub etag: String,
    pub size: u64,
    pub temp_path: PathBuf,
}

/// In-flight multipart upload session.
#[derive(Debug, Clone)]
pub struct MultipartUpload {
    pub bucket: String,
    pub key: String,
    pub initiated: DateTime<Utc>,
    pub parts: BTreeMap<u32, PartInfo>,
}

/// Registry of in-flight multipart uploads plus their spool directory.
pub struct MultipartManager {
    spool_dir: PathBuf,
    uploads: Mutex<HashMap<String, MultipartUpload>>,
}

impl MultipartManager {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            spool_dir: root_dir.into().join(".multipart"),
            uploads: Mutex::new(HashMap::new()),
        }
    }

    fn upload_dir(&self, upload_id: &str) -> PathBuf {
        self.spool_dir.join(upload_id)
    }

    fn part_path(&self, upload_id: &str, part_number: u32) -> PathBuf {
        self.upload_dir(upload_id)
            .join(format!("part-{}", part_number))
    }

    /// Register a new upload and create its spool directory.
    pub async fn create_upload(&self, bucket: &str, key: &str) -> Result<String, SandbarError> {
        let upload_id = Uuid::new_v4().to_string();

        let upload_dir = self.upload_dir(&upload_id);
        fs::create_dir_all(&upload_dir).await.inspect_err(
            |e| error!(upload_dir = %upload_dir.display(), "Failed to create upload directory: {}", e),
        )?;

        let upload = MultipartUpload {
            bucket: bucket.to_string(),
            key: key.to_string(),
            initiated: Utc::now(),
            parts: BTreeMap::new(),
        };
        self.uploads.lock().await.insert(upload_id.clone(), upload);

        debug!(
            upload_id = %upload_id,
            bucket = %bucket,
            key = %key,
            "Created multipart upload"
        );
        Ok(upload_id)
    }

    /// Persist one part body and record it in the registry. A later upload
    /// of the same part number replaces the earlier one.
    pub async fn upload_part<B>(
        &self,
        upload_id: &str,
        part_number: u32,
        body: B,
    ) -> Result<String, SandbarError>
    where
        B: http_body::Body<Data = Bytes> + Unpin,
        B::Error: std::fmt::Display,
    {
        if !(MIN_PART_NUMBER..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(SandbarError::InvalidArgument(format!(
                "Part number must be between {} and {}",
                MIN_PART_NUMBER, MAX_PART_NUMBER
            )));
        }

        if !self.uploads.lock().await.contains_key(upload_id) {
            return Err(SandbarError::NoSuchUpload(upload_id.to_string()));
        }

        let part_path = self.part_path(upload_id, part_number);
        let (etag, size) = write_body_to_file(&part_path, body).await?;

        // The upload may have been aborted while the part was streaming in;
        // recheck before recording, and discard the orphaned spool file.
        let mut uploads = self.uploads.lock().await;
        match uploads.get_mut(upload_id) {
            Some(upload) => {
                upload.parts.insert(
                    part_number,
                    PartInfo {
                        etag: etag.clone(),
                        size,
                        temp_path: part_path,
                    },
                );
            }
            None => {
                drop(uploads);
                let _ = fs::remove_file(&part_path).await;
                return Err(SandbarError::NoSuchUpload(upload_id.to_string()));
            }
        }

        debug!(
            upload_id = %upload_id,
            part_number = part_number,
            size = size,
            "Uploaded part"
        );
        Ok(etag)
    }

    /// Complete an upload: concatenate the spooled parts in ascending
    /// part-number order into the final object, clean up the spool, and
    /// return (bucket, key, etag). The registry entry is consumed first,
    /// making the transition terminal.
    pub async fn complete_upload(
        &self,
        upload_id: &str,
        store: &ObjectStore,
    ) -> Result<(String, String, String), SandbarError> {
        let upload = self
            .uploads
            .lock()
            .await
            .remove(upload_id)
            .ok_or_else(|| SandbarError::NoSuchUpload(upload_id.to_string()))?;

        let result = self.assemble(&upload, store).await;

        let upload_dir = self.upload_dir(upload_id);
        if let Err(e) = fs::remove_dir_all(&upload_dir).await {
            error!(upload_dir = %upload_dir.display(), error = %e, "Failed to clean up multipart spool directory");
        }

        let etag = result?;
        debug!(
            upload_id = %upload_id,
            bucket = %upload.bucket,
            key = %upload.key,
            parts = upload.parts.len(),
            "Completed multipart upload"
        );
        Ok((upload.bucket, upload.key, etag))
    }

    async fn assemble(
        &self,
        upload: &MultipartUpload,
        store: &ObjectStore,
    ) -> Result<String, SandbarError> {
        let dest_path = store.resolver().resolve(&upload.bucket, &upload.key)?;
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = temp_sibling(&dest_path);
        let mut dest_file = fs::File::create(&temp_path).await?;
        let mut context = md5::Context::new();
        let mut buf = vec![0u8; CHUNK_SIZE];

        // BTreeMap iteration gives ascending part numbers regardless of
        // the order parts arrived in.
        for (part_number, part) in &upload.parts {
            let mut part_file = fs::File::open(&part.temp_path).await.inspect_err(
                |e| error!(part_number = part_number, path = %part.temp_path.display(), "Failed to open part: {}", e),
            )?;
            loop {
                let read = part_file.read(&mut buf).await?;
                if read == 0 {
                    break;
                }
                dest_file.write_all(&buf[..read]).await?;
                context.consume(&buf[..read]);
            }
        }

        if let Err(e) = dest_file.sync_all().await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        drop(dest_file);
        fs::rename(&temp_path, &dest_path).await?;

        Ok(format!("\"{:x}\"", context.compute()))
    }

    /// Abort an upload: drop the registry entry and its spooled parts.
    pub async fn abort_upload(&self, upload_id: &str) -> Result<(), SandbarError> {
        if self.uploads.lock().await.remove(upload_id).is_none() {
            return Err(SandbarError::NoSuchUpload(upload_id.to_string()));
        }

        let upload_dir = self.upload_dir(upload_id);
        if let Err(e) = fs::remove_dir_all(&upload_dir).await {
            error!(upload_dir = %upload_dir.display(), error = %e, "Failed to remove upload directory");
        }

        debug!(upload_id = %upload_id, "Aborted multipart upload");
        Ok(())
    }

    /// Whether an upload id is currently registered.
    pub async fn contains(&self, upload_id: &str) -> bool {
        self.uploads.lock().await.contains_key(upload_id)
    }
}
