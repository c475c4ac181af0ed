//! Backblaze B2 object storage backend.
//!
//! Composes a per-instance auth session manager with a serialized upload
//! queue. The wire protocol itself stays behind the [`api::B2Api`] trait;
//! this module owns the orchestration: no call reaches the provider while
//! the session is absent or expired, every save goes through the queue, and
//! every provider call runs under a bounded timeout. Timeouts surface to
//! the caller and are never retried internally; only the auth probe
//! retries, on a fixed backoff.

pub mod api;
mod auth;
mod queue;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::oneshot;
use tokio_util::io::ReaderStream;

use recstore_core::{BackendKind, FileConfig, FileDescriptor, FileLocation, StorageConfig};

use crate::b2::api::{B2Api, B2ApiError, B2Credentials};
use crate::b2::auth::AuthSession;
use crate::b2::queue::{UploadQueue, UploadTask};
use crate::mask;
use crate::traits::{
    ByteStream, GetOptions, SaveSource, Storage, StorageError, StorageResult,
};

/// Bounded timeout applied to every individual provider call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Uploads run strictly one at a time.
const UPLOAD_CONCURRENCY: usize = 1;

/// Backblaze B2 storage implementation
pub struct B2Storage {
    credentials: B2Credentials,
    mask: String,
    api: Arc<dyn B2Api>,
    auth: AuthSession,
    queue: UploadQueue,
}

impl B2Storage {
    /// Create a new B2Storage instance from its configuration and an
    /// injected API client.
    ///
    /// Spawns the upload worker and fires the first authorization handshake
    /// in the background; must be called from within a tokio runtime.
    pub fn new(config: &StorageConfig, api: Arc<dyn B2Api>) -> StorageResult<Self> {
        let credentials = B2Credentials {
            account_id: required(&config.account_id, "account_id")?,
            application_key: required(&config.application_key, "application_key")?,
            bucket_id: required(&config.bucket_id, "bucket_id")?,
            bucket_name: required(&config.bucket_name, "bucket_name")?,
        };

        let auth = AuthSession::new(Arc::clone(&api), credentials.clone(), REQUEST_TIMEOUT);
        let queue = UploadQueue::new(
            Arc::clone(&api),
            auth.clone(),
            credentials.bucket_id.clone(),
            REQUEST_TIMEOUT,
            UPLOAD_CONCURRENCY,
        );

        // First handshake happens off the construction path; operations
        // re-check the session themselves.
        let session = auth.clone();
        tokio::spawn(async move {
            if let Err(err) = session.ensure_auth().await {
                tracing::error!(error = %err, "initial storage authorization failed");
            }
        });

        Ok(B2Storage {
            credentials,
            mask: config.mask.clone(),
            api,
            auth,
            queue,
        })
    }

    async fn save_at(
        &self,
        file: &FileConfig,
        source: SaveSource,
        now: DateTime<Utc>,
    ) -> StorageResult<FileDescriptor> {
        // Fail fast to the caller before the task ever reaches the queue.
        self.auth.ensure_auth().await?;

        let file_name = mask::resolve(
            &self.mask,
            &file.domain,
            Some(&mask::object_name(file)),
            now,
        );

        let body: ByteStream = match source {
            SaveSource::Stream(stream) => stream,
            SaveSource::Path(path) => {
                let source_file = tokio::fs::File::open(&path).await.map_err(|e| {
                    StorageError::UploadFailed(format!(
                        "Failed to open file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Box::pin(
                    ReaderStream::new(source_file).map(|chunk| chunk.map_err(StorageError::IoError)),
                )
            }
        };

        let (done, done_rx) = oneshot::channel();
        self.queue
            .submit(UploadTask {
                file_name,
                body,
                done,
            })
            .await?;

        let info = match done_rx.await {
            Ok(result) => result?,
            Err(_) => {
                return Err(StorageError::UploadFailed(
                    "upload task was dropped by the queue".to_string(),
                ))
            }
        };

        Ok(FileDescriptor {
            uuid: file.uuid.clone(),
            name: file.name.clone(),
            domain: file.domain.clone(),
            application_name: file.application_name.clone(),
            backend: BackendKind::B2,
            location: FileLocation::Object {
                file_id: Some(info.file_id),
                file_name: info.file_name,
            },
        })
    }
}

fn required(value: &Option<String>, name: &str) -> StorageResult<String> {
    value.clone().ok_or_else(|| {
        StorageError::ConfigError(format!("{} is required for the b2 backend", name))
    })
}

/// Provider id and object name referenced by a descriptor.
fn object_location(file: &FileDescriptor) -> StorageResult<(String, String)> {
    match &file.location {
        FileLocation::Object {
            file_id: Some(id),
            file_name,
        } => Ok((id.clone(), file_name.clone())),
        FileLocation::Object { file_id: None, .. } => Err(StorageError::NotFound(format!(
            "no provider file id for {}",
            file.uuid
        ))),
        FileLocation::Path(_) => Err(StorageError::InvalidDescriptor(format!(
            "descriptor for {} does not reference a stored object",
            file.uuid
        ))),
    }
}

#[async_trait]
impl Storage for B2Storage {
    // skip_open is a local-filesystem optimization; the provider stream
    // opens on the API call itself.
    async fn get(&self, file: &FileDescriptor, options: GetOptions) -> StorageResult<ByteStream> {
        let (file_id, _) = object_location(file)?;
        let params = self.auth.ensure_auth().await?;

        let download = self.api.download(&params, &file_id, options.range);
        match tokio::time::timeout(REQUEST_TIMEOUT, download).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(B2ApiError::NotFound(msg))) => Err(StorageError::NotFound(msg)),
            Ok(Err(err)) => Err(StorageError::DownloadFailed(err.to_string())),
            Err(_) => Err(StorageError::Timeout(REQUEST_TIMEOUT)),
        }
    }

    async fn save(&self, file: &FileConfig, source: SaveSource) -> StorageResult<FileDescriptor> {
        self.save_at(file, source, Utc::now()).await
    }

    async fn del(&self, file: &FileDescriptor) -> StorageResult<()> {
        let (file_id, file_name) = object_location(file)?;
        let params = self.auth.ensure_auth().await?;

        let delete = self.api.delete(&params, &file_id, &file_name);
        match tokio::time::timeout(REQUEST_TIMEOUT, delete).await {
            Ok(Ok(())) => {
                tracing::debug!(file_id = %file_id, file_name = %file_name, "deleted stored object");
                Ok(())
            }
            Ok(Err(B2ApiError::NotFound(msg))) => Err(StorageError::NotFound(msg)),
            Ok(Err(err)) => Err(StorageError::DeleteFailed(err.to_string())),
            Err(_) => Err(StorageError::Timeout(REQUEST_TIMEOUT)),
        }
    }

    async fn exists_file(&self, file: &FileDescriptor) -> StorageResult<bool> {
        // A record that never completed an upload has no provider id, so
        // there is nothing to ask the provider about.
        let file_id = match file.file_id() {
            Some(id) => id.to_string(),
            None => return Ok(false),
        };

        let params = self.auth.ensure_auth().await?;

        let info = self.api.file_info(&params, &file_id);
        match tokio::time::timeout(REQUEST_TIMEOUT, info).await {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(B2ApiError::NotFound(_))) => Ok(false),
            Ok(Err(err)) => Err(StorageError::BackendError(err.to_string())),
            Err(_) => Err(StorageError::Timeout(REQUEST_TIMEOUT)),
        }
    }

    fn check_config(&self, config: &StorageConfig, mask: &str) -> bool {
        self.mask == mask
            && config.account_id.as_deref() == Some(self.credentials.account_id.as_str())
            && config.bucket_id.as_deref() == Some(self.credentials.bucket_id.as_str())
            && config.bucket_name.as_deref() == Some(self.credentials.bucket_name.as_str())
            && config.application_key.as_deref() == Some(self.credentials.application_key.as_str())
    }

    fn backend_kind(&self) -> BackendKind {
        BackendKind::B2
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::StreamExt;

    use crate::b2::api::{B2Api, B2ApiError, B2AuthParams, B2Credentials, B2FileInfo};
    use crate::traits::{ByteRange, ByteStream, StorageError};

    #[derive(Default)]
    struct MockState {
        objects: HashMap<String, (String, Vec<u8>)>,
        upload_order: Vec<String>,
        fail_uploads: HashSet<String>,
        next_id: u64,
    }

    /// In-memory stand-in for the provider API client.
    #[derive(Default)]
    pub(crate) struct MockB2Api {
        state: Mutex<MockState>,
        pub(crate) auth_calls: AtomicUsize,
        pub(crate) download_calls: AtomicUsize,
        pub(crate) info_calls: AtomicUsize,
        pub(crate) fail_auth: AtomicBool,
        pub(crate) fail_info: AtomicBool,
    }

    impl MockB2Api {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn fail_upload(&self, file_name: &str) {
            self.state
                .lock()
                .unwrap()
                .fail_uploads
                .insert(file_name.to_string());
        }

        pub(crate) fn upload_order(&self) -> Vec<String> {
            self.state.lock().unwrap().upload_order.clone()
        }

        pub(crate) fn object_bytes(&self, file_id: &str) -> Option<Vec<u8>> {
            self.state
                .lock()
                .unwrap()
                .objects
                .get(file_id)
                .map(|(_, bytes)| bytes.clone())
        }
    }

    async fn read_all(mut body: ByteStream) -> Result<Vec<u8>, B2ApiError> {
        let mut out = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| B2ApiError::Transport(e.to_string()))?;
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    fn auth_params() -> B2AuthParams {
        B2AuthParams {
            authorization_token: "token".to_string(),
            api_url: "https://api.example".to_string(),
            download_url: "https://dl.example".to_string(),
        }
    }

    #[async_trait]
    impl B2Api for MockB2Api {
        async fn authorize(
            &self,
            _credentials: &B2Credentials,
        ) -> Result<B2AuthParams, B2ApiError> {
            self.auth_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_auth.load(Ordering::SeqCst) {
                return Err(B2ApiError::Unauthorized("bad application key".to_string()));
            }
            Ok(auth_params())
        }

        async fn upload(
            &self,
            _auth: &B2AuthParams,
            _bucket_id: &str,
            file_name: &str,
            body: ByteStream,
        ) -> Result<B2FileInfo, B2ApiError> {
            let bytes = read_all(body).await?;

            let mut state = self.state.lock().unwrap();
            if state.fail_uploads.contains(file_name) {
                return Err(B2ApiError::Transport("simulated upload failure".to_string()));
            }

            state.next_id += 1;
            let file_id = format!("4_z{:04}", state.next_id);
            let content_length = bytes.len() as u64;
            state
                .objects
                .insert(file_id.clone(), (file_name.to_string(), bytes));
            state.upload_order.push(file_name.to_string());

            Ok(B2FileInfo {
                file_id,
                file_name: file_name.to_string(),
                content_length,
            })
        }

        async fn download(
            &self,
            _auth: &B2AuthParams,
            file_id: &str,
            range: Option<ByteRange>,
        ) -> Result<ByteStream, B2ApiError> {
            self.download_calls.fetch_add(1, Ordering::SeqCst);

            let state = self.state.lock().unwrap();
            let (_, bytes) = state
                .objects
                .get(file_id)
                .ok_or_else(|| B2ApiError::NotFound(file_id.to_string()))?;

            let data = match range {
                Some(ByteRange { start, end }) if start < end => {
                    let end = (end as usize + 1).min(bytes.len());
                    bytes[start as usize..end].to_vec()
                }
                _ => bytes.clone(),
            };

            let chunks: Vec<Result<Bytes, StorageError>> = data
                .chunks(7)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();
            Ok(Box::pin(futures::stream::iter(chunks)) as ByteStream)
        }

        async fn delete(
            &self,
            _auth: &B2AuthParams,
            file_id: &str,
            _file_name: &str,
        ) -> Result<(), B2ApiError> {
            let mut state = self.state.lock().unwrap();
            state
                .objects
                .remove(file_id)
                .map(|_| ())
                .ok_or_else(|| B2ApiError::NotFound(file_id.to_string()))
        }

        async fn file_info(
            &self,
            _auth: &B2AuthParams,
            file_id: &str,
        ) -> Result<B2FileInfo, B2ApiError> {
            self.info_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_info.load(Ordering::SeqCst) {
                return Err(B2ApiError::Transport("simulated metadata failure".to_string()));
            }

            let state = self.state.lock().unwrap();
            state
                .objects
                .get(file_id)
                .map(|(file_name, bytes)| B2FileInfo {
                    file_id: file_id.to_string(),
                    file_name: file_name.clone(),
                    content_length: bytes.len() as u64,
                })
                .ok_or_else(|| B2ApiError::NotFound(file_id.to_string()))
        }
    }
}
