//! Serialized upload queue for the b2 backend.
//!
//! Every save goes through this queue instead of hitting the remote API
//! directly: the provider negotiates an exclusive upload target per request
//! and throttles aggressively, so uploads run in enqueue order with a small
//! fixed concurrency (one at a time unless configured otherwise). Each
//! task's outcome is reported only to its own submitter; a failed upload
//! never halts the queue.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Semaphore};

use crate::b2::api::{B2Api, B2FileInfo};
use crate::b2::auth::AuthSession;
use crate::traits::{ByteStream, StorageError, StorageResult};

/// Bound on tasks waiting in the channel.
const QUEUE_SIZE: usize = 1024;

pub(crate) struct UploadTask {
    pub(crate) file_name: String,
    pub(crate) body: ByteStream,
    pub(crate) done: oneshot::Sender<StorageResult<B2FileInfo>>,
}

pub(crate) struct UploadQueue {
    tx: mpsc::Sender<UploadTask>,
    pending: Arc<AtomicUsize>,
}

impl UploadQueue {
    /// Create the queue and spawn its worker loop.
    pub(crate) fn new(
        api: Arc<dyn B2Api>,
        auth: AuthSession,
        bucket_id: String,
        request_timeout: Duration,
        max_concurrent: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_SIZE);
        let pending = Arc::new(AtomicUsize::new(0));

        tokio::spawn(worker_loop(
            rx,
            api,
            auth,
            bucket_id,
            request_timeout,
            max_concurrent,
            pending.clone(),
        ));

        Self { tx, pending }
    }

    /// Enqueue an upload. The task's oneshot channel resolves when it has
    /// run, independently of every other queued task.
    pub(crate) async fn submit(&self, task: UploadTask) -> StorageResult<()> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(task).await.is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(StorageError::UploadFailed(
                "upload queue is closed".to_string(),
            ));
        }
        Ok(())
    }
}

async fn worker_loop(
    mut rx: mpsc::Receiver<UploadTask>,
    api: Arc<dyn B2Api>,
    auth: AuthSession,
    bucket_id: String,
    request_timeout: Duration,
    max_concurrent: usize,
    pending: Arc<AtomicUsize>,
) {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));

    while let Some(task) = rx.recv().await {
        let permit = semaphore.clone().acquire_owned().await;
        let api = Arc::clone(&api);
        let auth = auth.clone();
        let bucket_id = bucket_id.clone();
        let pending = Arc::clone(&pending);

        tokio::spawn(async move {
            let _permit = permit;
            run_task(task, api, auth, &bucket_id, request_timeout).await;
            if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                tracing::debug!("all queued uploads done");
            }
        });
    }
}

async fn run_task(
    task: UploadTask,
    api: Arc<dyn B2Api>,
    auth: AuthSession,
    bucket_id: &str,
    request_timeout: Duration,
) {
    let UploadTask {
        file_name,
        body,
        done,
    } = task;

    let result = upload(api, auth, bucket_id, &file_name, body, request_timeout).await;

    if let Err(err) = &result {
        tracing::error!(file_name = %file_name, error = %err, "queued upload failed");
    }

    // The submitter may have gone away; its loss, not the queue's problem.
    let _ = done.send(result);
}

async fn upload(
    api: Arc<dyn B2Api>,
    auth: AuthSession,
    bucket_id: &str,
    file_name: &str,
    body: ByteStream,
    request_timeout: Duration,
) -> StorageResult<B2FileInfo> {
    let params = auth.ensure_auth().await?;

    let upload = api.upload(&params, bucket_id, file_name, body);
    match tokio::time::timeout(request_timeout, upload).await {
        Ok(Ok(info)) => {
            tracing::trace!(
                file_id = %info.file_id,
                file_name = %info.file_name,
                size_bytes = info.content_length,
                "upload complete"
            );
            Ok(info)
        }
        Ok(Err(err)) => Err(StorageError::UploadFailed(err.to_string())),
        Err(_) => Err(StorageError::Timeout(request_timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::b2::api::B2Credentials;
    use crate::b2::testing::MockB2Api;
    use bytes::Bytes;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn session(api: Arc<MockB2Api>) -> AuthSession {
        AuthSession::new(
            api,
            B2Credentials {
                account_id: "acct".to_string(),
                application_key: "key".to_string(),
                bucket_id: "bucket-id".to_string(),
                bucket_name: "bucket".to_string(),
            },
            TIMEOUT,
        )
    }

    fn body(data: &[u8]) -> ByteStream {
        let chunks: Vec<Result<Bytes, StorageError>> = vec![Ok(Bytes::copy_from_slice(data))];
        Box::pin(futures::stream::iter(chunks))
    }

    #[tokio::test]
    async fn test_uploads_run_in_enqueue_order() {
        let api = Arc::new(MockB2Api::new());
        let queue = UploadQueue::new(
            api.clone(),
            session(api.clone()),
            "bucket-id".to_string(),
            TIMEOUT,
            1,
        );

        let mut receivers = Vec::new();
        for i in 0..5 {
            let (done, rx) = oneshot::channel();
            queue
                .submit(UploadTask {
                    file_name: format!("rec-{}.wav", i),
                    body: body(b"bytes"),
                    done,
                })
                .await
                .unwrap();
            receivers.push(rx);
        }

        for rx in receivers {
            rx.await.unwrap().unwrap();
        }

        let order = api.upload_order();
        let expected: Vec<String> = (0..5).map(|i| format!("rec-{}.wav", i)).collect();
        assert_eq!(order, expected);
    }

    #[tokio::test]
    async fn test_one_failed_task_does_not_halt_the_queue() {
        let api = Arc::new(MockB2Api::new());
        api.fail_upload("rec-2.wav");

        let queue = UploadQueue::new(
            api.clone(),
            session(api.clone()),
            "bucket-id".to_string(),
            TIMEOUT,
            1,
        );

        let mut receivers = Vec::new();
        for i in 0..5 {
            let (done, rx) = oneshot::channel();
            queue
                .submit(UploadTask {
                    file_name: format!("rec-{}.wav", i),
                    body: body(b"bytes"),
                    done,
                })
                .await
                .unwrap();
            receivers.push(rx);
        }

        // Every task reaches a terminal state; only the scripted one fails.
        for (i, rx) in receivers.into_iter().enumerate() {
            let result = rx.await.unwrap();
            if i == 2 {
                assert!(matches!(result, Err(StorageError::UploadFailed(_))));
            } else {
                let info = result.unwrap();
                assert_eq!(info.file_name, format!("rec-{}.wav", i));
            }
        }
    }
}
