//! Storage abstraction trait
//!
//! This module defines the Storage trait that all storage backends must
//! implement, together with the operation options and the error taxonomy
//! shared by every backend.

use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use thiserror::Error;

use recstore_core::{BackendKind, FileConfig, FileDescriptor, StorageConfig};

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Not a regular file: {0}")]
    BadFileType(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Stream of file content chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// Byte range of a read, inclusive of `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

/// Options for `get`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// Read only this byte range. Ignored unless `start < end`.
    pub range: Option<ByteRange>,
    /// Hand the stream back before the underlying resource is confirmed
    /// open; the open then happens on first poll. Local-only optimization,
    /// the b2 backend ignores it.
    pub skip_open: bool,
}

/// Content source for `save`.
pub enum SaveSource {
    /// Existing local file to copy byte-for-byte.
    Path(PathBuf),
    /// Stream to consume. Never buffered whole in memory.
    Stream(ByteStream),
}

/// Storage abstraction trait
///
/// All storage backends (local filesystem, b2) implement this trait, which
/// lets the platform persist and serve recording files without coupling to
/// where the bytes physically live. Backend instances are long-lived shared
/// objects, safe for concurrent calls from independent request workers.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Open a read stream over a stored file, optionally limited to a byte
    /// range.
    async fn get(&self, file: &FileDescriptor, options: GetOptions) -> StorageResult<ByteStream>;

    /// Persist a file and return the descriptor identifying where it landed.
    async fn save(&self, file: &FileConfig, source: SaveSource) -> StorageResult<FileDescriptor>;

    /// Delete a stored file.
    async fn del(&self, file: &FileDescriptor) -> StorageResult<()>;

    /// Whether the file exists. Plain absence is `Ok(false)`, never an
    /// error; only I/O failures other than "not found" error.
    async fn exists_file(&self, file: &FileDescriptor) -> StorageResult<bool>;

    /// Copy a stored file into `target`, returning the new descriptor.
    ///
    /// Streams bytes from this backend directly into `target.save` without
    /// inspecting either backend's internals, so it works uniformly for
    /// same-type and cross-type pairs. The source copy is left in place.
    async fn copy_to(
        &self,
        file: &FileDescriptor,
        target: &dyn Storage,
    ) -> StorageResult<FileDescriptor> {
        let stream = self
            .get(
                file,
                GetOptions {
                    range: None,
                    skip_open: true,
                },
            )
            .await?;
        target
            .save(&file.file_config(), SaveSource::Stream(stream))
            .await
    }

    /// True iff `config` and `mask` exactly match every identity field this
    /// backend was constructed from. Used on configuration reload to decide
    /// whether the instance can be kept.
    fn check_config(&self, config: &StorageConfig, mask: &str) -> bool;

    /// Get the storage backend kind
    fn backend_kind(&self) -> BackendKind;
}
