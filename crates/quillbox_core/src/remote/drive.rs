//! Backup-folder transport over a Drive-style file API.
//!
//! # Responsibility
//! - Resolve (and create once) the backup folder.
//! - Choose between a single write and a resumable chunked upload.
//! - Overwrite objects by name; filter and order the historical listing.
//!
//! # Invariants
//! - Payloads below `TransferLimits::simple_upload_max` use exactly one write.
//! - Larger payloads open one session and send `chunk_size` ranges strictly
//!   in order; the next range starts where the previous one ended.
//! - Concurrent `ensure_folder` callers share one lookup/creation.

use crate::remote::{
    is_historical_name, RemoteError, RemoteObjectHandle, RemoteResult, RemoteTransport,
};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::time::Instant;
use tokio::sync::Mutex;

const MIB: usize = 1024 * 1024;

/// Size thresholds for uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferLimits {
    /// Payloads strictly smaller than this go out in one request.
    pub simple_upload_max: usize,
    /// Range size for resumable sessions.
    pub chunk_size: usize,
}

impl Default for TransferLimits {
    fn default() -> Self {
        Self {
            simple_upload_max: 4 * MIB,
            chunk_size: 5 * MIB,
        }
    }
}

/// Where an upload lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadTarget<'a> {
    /// New object `name` inside `folder_id`.
    Create { folder_id: &'a str, name: &'a str },
    /// Replace the content of an existing object.
    Replace { file_id: &'a str, name: &'a str },
}

impl UploadTarget<'_> {
    pub fn name(&self) -> &str {
        match self {
            Self::Create { name, .. } | Self::Replace { name, .. } => name,
        }
    }
}

/// Primitive requests of a Drive-style file API.
///
/// Each method maps to one remote request, which keeps request counts
/// observable for callers and fakes.
#[async_trait]
pub trait DriveApi: Send + Sync {
    /// Cheap authenticated call used as a connectivity check.
    async fn check_access(&self) -> RemoteResult<()>;
    async fn find_folder(&self, name: &str) -> RemoteResult<Option<String>>;
    async fn create_folder(&self, name: &str) -> RemoteResult<String>;
    async fn find_file(
        &self,
        folder_id: &str,
        name: &str,
    ) -> RemoteResult<Option<RemoteObjectHandle>>;
    /// Folder contents, any order.
    async fn list_folder(&self, folder_id: &str) -> RemoteResult<Vec<RemoteObjectHandle>>;
    async fn write_simple(
        &self,
        target: UploadTarget<'_>,
        data: &[u8],
    ) -> RemoteResult<RemoteObjectHandle>;
    /// Opens a resumable session and returns its address.
    async fn open_session(&self, target: UploadTarget<'_>, total_len: u64)
        -> RemoteResult<String>;
    /// Sends one range; returns the object once the final range is accepted.
    async fn write_range(
        &self,
        session: &str,
        offset: u64,
        chunk: &[u8],
        total_len: u64,
    ) -> RemoteResult<Option<RemoteObjectHandle>>;
    async fn read_content(&self, file_id: &str) -> RemoteResult<Vec<u8>>;
    async fn delete_file(&self, file_id: &str) -> RemoteResult<()>;
}

/// `RemoteTransport` over any `DriveApi`.
pub struct DriveTransport<A: DriveApi> {
    api: A,
    folder_name: String,
    limits: TransferLimits,
    folder_id: Mutex<Option<String>>,
}

impl<A: DriveApi> DriveTransport<A> {
    pub fn new(api: A, folder_name: impl Into<String>) -> Self {
        Self::with_limits(api, folder_name, TransferLimits::default())
    }

    pub fn with_limits(api: A, folder_name: impl Into<String>, limits: TransferLimits) -> Self {
        Self {
            api,
            folder_name: folder_name.into(),
            limits,
            folder_id: Mutex::new(None),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn limits(&self) -> TransferLimits {
        self.limits
    }

    async fn lookup_folder(&self) -> RemoteResult<Option<String>> {
        match self.api.find_folder(&self.folder_name).await {
            Ok(found) => Ok(found),
            Err(RemoteError::NotFound(_)) => Ok(None),
            Err(err @ RemoteError::Connectivity(_)) => Err(err),
            Err(err) => {
                warn!(
                    "event=remote_folder_lookup module=remote status=error error_code={} error={err}",
                    err.code()
                );
                Ok(None)
            }
        }
    }

    async fn chunked_upload(
        &self,
        target: UploadTarget<'_>,
        data: &[u8],
    ) -> RemoteResult<RemoteObjectHandle> {
        let total_len = data.len() as u64;
        let session = self.api.open_session(target, total_len).await?;
        let mut offset = 0usize;
        let mut finished = None;
        while offset < data.len() {
            let end = (offset + self.limits.chunk_size).min(data.len());
            debug!(
                "event=remote_upload_range module=remote status=start name={} offset={offset} end={end} total={total_len}",
                target.name()
            );
            finished = self
                .api
                .write_range(&session, offset as u64, &data[offset..end], total_len)
                .await?;
            offset = end;
        }
        finished.ok_or_else(|| {
            RemoteError::InvalidResponse(format!(
                "upload session for `{}` ended without a file",
                target.name()
            ))
        })
    }
}

#[async_trait]
impl<A: DriveApi> RemoteTransport for DriveTransport<A> {
    async fn check_connectivity(&self) -> RemoteResult<()> {
        self.api.check_access().await
    }

    async fn ensure_folder(&self) -> RemoteResult<String> {
        let mut cached = self.folder_id.lock().await;
        if let Some(folder_id) = cached.as_ref() {
            return Ok(folder_id.clone());
        }

        let folder_id = match self.lookup_folder().await? {
            Some(folder_id) => folder_id,
            None => match self.api.create_folder(&self.folder_name).await {
                Ok(folder_id) => {
                    info!(
                        "event=remote_folder_create module=remote status=ok folder={}",
                        self.folder_name
                    );
                    folder_id
                }
                Err(RemoteError::AlreadyExists(_)) => self
                    .api
                    .find_folder(&self.folder_name)
                    .await?
                    .ok_or_else(|| RemoteError::NotFound(self.folder_name.clone()))?,
                Err(err) => return Err(err),
            },
        };

        *cached = Some(folder_id.clone());
        Ok(folder_id)
    }

    async fn upload(&self, name: &str, data: &[u8]) -> RemoteResult<RemoteObjectHandle> {
        let started_at = Instant::now();
        let folder_id = self.ensure_folder().await?;
        let existing = self.api.find_file(&folder_id, name).await?;
        let target = match existing.as_ref() {
            Some(handle) => UploadTarget::Replace {
                file_id: &handle.id,
                name,
            },
            None => UploadTarget::Create {
                folder_id: &folder_id,
                name,
            },
        };

        let chunked = data.len() >= self.limits.simple_upload_max;
        let result = if chunked {
            self.chunked_upload(target, data).await
        } else {
            self.api.write_simple(target, data).await
        };

        match &result {
            Ok(_) => info!(
                "event=remote_upload module=remote status=ok name={name} bytes={} chunked={chunked} duration_ms={}",
                data.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=remote_upload module=remote status=error name={name} bytes={} chunked={chunked} error_code={} error={err}",
                data.len(),
                err.code()
            ),
        }
        result
    }

    async fn download(&self, name: &str) -> RemoteResult<Vec<u8>> {
        let folder_id = self.ensure_folder().await?;
        let handle = self
            .api
            .find_file(&folder_id, name)
            .await?
            .ok_or_else(|| RemoteError::NotFound(name.to_string()))?;
        match self.api.read_content(&handle.id).await {
            Err(RemoteError::NotFound(_)) => Err(RemoteError::NotFound(name.to_string())),
            other => other,
        }
    }

    async fn list_backups(&self) -> RemoteResult<Vec<RemoteObjectHandle>> {
        let folder_id = self.ensure_folder().await?;
        let mut backups: Vec<RemoteObjectHandle> = self
            .api
            .list_folder(&folder_id)
            .await?
            .into_iter()
            .filter(|handle| is_historical_name(&handle.name))
            .collect();
        backups.sort_by(|left, right| {
            right
                .last_modified
                .cmp(&left.last_modified)
                .then_with(|| right.name.cmp(&left.name))
        });
        Ok(backups)
    }

    async fn delete(&self, handle: &RemoteObjectHandle) -> RemoteResult<()> {
        self.api.delete_file(&handle.id).await
    }
}
