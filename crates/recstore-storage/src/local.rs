use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::{ReaderStream, StreamReader};

use recstore_core::{BackendKind, FileConfig, FileDescriptor, FileLocation, StorageConfig};

use crate::mask;
use crate::traits::{
    ByteRange, ByteStream, GetOptions, SaveSource, Storage, StorageError, StorageResult,
};

/// Local filesystem storage implementation
#[derive(Clone)]
pub struct LocalStorage {
    root: PathBuf,
    mask: String,
}

impl LocalStorage {
    /// Create a new LocalStorage instance from its configuration.
    ///
    /// Requires `file_root`; the directory tree under it is created lazily
    /// at save time.
    pub fn new(config: &StorageConfig) -> StorageResult<Self> {
        let root = config.file_root.clone().ok_or_else(|| {
            StorageError::ConfigError("file_root is required for the local backend".to_string())
        })?;

        Ok(LocalStorage {
            root,
            mask: config.mask.clone(),
        })
    }

    /// Path a file with this name would be stored under right now.
    pub fn file_path(&self, domain: &str, file_name: &str) -> PathBuf {
        self.root
            .join(mask::resolve(&self.mask, domain, Some(file_name), Utc::now()))
    }

    async fn save_at(
        &self,
        file: &FileConfig,
        source: SaveSource,
        now: DateTime<Utc>,
    ) -> StorageResult<FileDescriptor> {
        let dir = self
            .root
            .join(mask::resolve(&self.mask, &file.domain, None, now));

        fs::create_dir_all(&dir).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to create directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let path = match source {
            SaveSource::Stream(stream) => {
                let path = dir.join(mask::object_name(file));
                write_stream(&path, stream).await?;
                tracing::trace!(path = %path.display(), "saved recording stream");
                path
            }
            SaveSource::Path(source_path) => {
                let path = dir.join(&file.name);
                fs::copy(&source_path, &path).await.map_err(|e| {
                    StorageError::UploadFailed(format!(
                        "Failed to copy {} to {}: {}",
                        source_path.display(),
                        path.display(),
                        e
                    ))
                })?;
                tracing::trace!(path = %path.display(), "saved recording file");
                path
            }
        };

        Ok(FileDescriptor {
            uuid: file.uuid.clone(),
            name: file.name.clone(),
            domain: file.domain.clone(),
            application_name: file.application_name.clone(),
            backend: BackendKind::Local,
            location: FileLocation::Path(path),
        })
    }
}

/// Path referenced by a descriptor, rejecting descriptors that belong to an
/// object storage backend.
fn descriptor_path(file: &FileDescriptor) -> StorageResult<&Path> {
    match &file.location {
        FileLocation::Path(path) => Ok(path),
        FileLocation::Object { .. } => Err(StorageError::InvalidDescriptor(format!(
            "descriptor for {} does not reference a local path",
            file.uuid
        ))),
    }
}

/// Map a stat failure, distinguishing plain absence from real I/O errors.
fn stat_error(path: &Path, err: io::Error) -> StorageError {
    if err.kind() == io::ErrorKind::NotFound {
        StorageError::NotFound(path.display().to_string())
    } else {
        StorageError::IoError(err)
    }
}

async fn write_stream(path: &Path, stream: ByteStream) -> StorageResult<u64> {
    let mut reader = StreamReader::new(
        stream.map(|chunk| chunk.map_err(|e| io::Error::new(io::ErrorKind::Other, e))),
    );

    let mut file = fs::File::create(path).await.map_err(|e| {
        StorageError::UploadFailed(format!("Failed to create file {}: {}", path.display(), e))
    })?;

    let bytes_copied = tokio::io::copy(&mut reader, &mut file).await.map_err(|e| {
        StorageError::UploadFailed(format!(
            "Failed to write stream to file {}: {}",
            path.display(),
            e
        ))
    })?;

    file.sync_all().await.map_err(|e| {
        StorageError::UploadFailed(format!("Failed to sync file {}: {}", path.display(), e))
    })?;

    Ok(bytes_copied)
}

/// Stat the target, then open a read stream over it honoring an optional
/// byte range. The range is end-inclusive and ignored unless `start < end`.
async fn open_read_stream(path: &Path, range: Option<ByteRange>) -> StorageResult<ByteStream> {
    let meta = fs::symlink_metadata(path)
        .await
        .map_err(|e| stat_error(path, e))?;

    if !meta.is_file() {
        return Err(StorageError::BadFileType(path.display().to_string()));
    }

    let mut file = fs::File::open(path).await.map_err(|e| {
        StorageError::DownloadFailed(format!("Failed to open file {}: {}", path.display(), e))
    })?;

    let stream: ByteStream = match range {
        Some(ByteRange { start, end }) if start < end => {
            file.seek(SeekFrom::Start(start)).await?;
            let limited = file.take(end - start + 1);
            Box::pin(ReaderStream::new(limited).map(|chunk| chunk.map_err(StorageError::IoError)))
        }
        _ => Box::pin(ReaderStream::new(file).map(|chunk| chunk.map_err(StorageError::IoError))),
    };

    Ok(stream)
}

#[async_trait]
impl Storage for LocalStorage {
    async fn get(&self, file: &FileDescriptor, options: GetOptions) -> StorageResult<ByteStream> {
        let path = descriptor_path(file)?.to_path_buf();

        if options.skip_open {
            // Hand the stream back immediately; the stat and open happen on
            // first poll.
            let range = options.range;
            let deferred = futures::stream::once(async move {
                match open_read_stream(&path, range).await {
                    Ok(stream) => stream,
                    Err(err) => {
                        Box::pin(futures::stream::once(async move { Err(err) })) as ByteStream
                    }
                }
            })
            .flatten();
            return Ok(Box::pin(deferred));
        }

        open_read_stream(&path, options.range).await
    }

    async fn save(&self, file: &FileConfig, source: SaveSource) -> StorageResult<FileDescriptor> {
        self.save_at(file, source, Utc::now()).await
    }

    async fn del(&self, file: &FileDescriptor) -> StorageResult<()> {
        let path = descriptor_path(file)?;

        let meta = fs::symlink_metadata(path)
            .await
            .map_err(|e| stat_error(path, e))?;

        if !meta.is_file() {
            return Err(StorageError::BadFileType(path.display().to_string()));
        }

        tracing::debug!(path = %path.display(), "deleting recording file");

        fs::remove_file(path).await.map_err(|e| {
            StorageError::DeleteFailed(format!("Failed to delete file {}: {}", path.display(), e))
        })?;

        Ok(())
    }

    async fn exists_file(&self, file: &FileDescriptor) -> StorageResult<bool> {
        let path = descriptor_path(file)?;

        match fs::symlink_metadata(path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(_) => Ok(false),
        }
    }

    fn check_config(&self, config: &StorageConfig, mask: &str) -> bool {
        self.mask == mask && config.file_root.as_deref() == Some(self.root.as_path())
    }

    fn backend_kind(&self) -> BackendKind {
        BackendKind::Local
    }
}
