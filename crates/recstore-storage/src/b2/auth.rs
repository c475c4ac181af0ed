//! Auth session lifecycle for the b2 backend.
//!
//! One session per backend instance, no process-wide state. The cached
//! params expire well before the provider's own token lifetime so that
//! clock skew and in-flight operations never race an actually-dead token.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::b2::api::{B2Api, B2AuthParams, B2Credentials};
use crate::traits::{StorageError, StorageResult};

/// Provider tokens are valid for 24h; re-authenticate after 6h.
const AUTH_VALIDITY: Duration = Duration::from_secs(6 * 60 * 60);

/// Fixed delay before the retry scheduled after a failed handshake.
const AUTH_RETRY_BACKOFF: Duration = Duration::from_secs(60);

struct SessionState {
    params: Option<B2AuthParams>,
    expires_at: Instant,
    retry_scheduled: bool,
}

struct Inner {
    api: Arc<dyn B2Api>,
    credentials: B2Credentials,
    request_timeout: Duration,
    state: Mutex<SessionState>,
}

/// Cached authorization session shared by all operations of one backend
/// instance.
#[derive(Clone)]
pub(crate) struct AuthSession {
    inner: Arc<Inner>,
}

impl AuthSession {
    pub(crate) fn new(
        api: Arc<dyn B2Api>,
        credentials: B2Credentials,
        request_timeout: Duration,
    ) -> Self {
        AuthSession {
            inner: Arc::new(Inner {
                api,
                credentials,
                request_timeout,
                state: Mutex::new(SessionState {
                    params: None,
                    expires_at: Instant::now(),
                    retry_scheduled: false,
                }),
            }),
        }
    }

    /// Return the cached auth params, performing the handshake first when
    /// the session is absent or expired.
    ///
    /// The handshake runs under the session lock, so concurrent callers that
    /// both observe an expired session coalesce into a single in-flight
    /// refresh. On failure the error goes to the triggering caller and one
    /// retry is scheduled after a fixed backoff.
    pub(crate) async fn ensure_auth(&self) -> StorageResult<B2AuthParams> {
        let mut state = self.inner.state.lock().await;

        if let Some(params) = &state.params {
            if Instant::now() < state.expires_at {
                return Ok(params.clone());
            }
        }

        match self.handshake().await {
            Ok(params) => {
                state.params = Some(params.clone());
                state.expires_at = Instant::now() + AUTH_VALIDITY;
                tracing::trace!(
                    account_id = %self.inner.credentials.account_id,
                    "confirmed storage authorization"
                );
                Ok(params)
            }
            Err(err) => {
                tracing::error!(
                    account_id = %self.inner.credentials.account_id,
                    error = %err,
                    "storage authorization failed"
                );
                self.schedule_retry(&mut state);
                Err(err)
            }
        }
    }

    async fn handshake(&self) -> StorageResult<B2AuthParams> {
        let authorize = self.inner.api.authorize(&self.inner.credentials);
        match tokio::time::timeout(self.inner.request_timeout, authorize).await {
            Ok(Ok(params)) => Ok(params),
            Ok(Err(err)) => Err(StorageError::AuthFailed(err.to_string())),
            Err(_) => Err(StorageError::Timeout(self.inner.request_timeout)),
        }
    }

    /// Schedule a single delayed re-authorization attempt. No-op while one
    /// is already pending.
    fn schedule_retry(&self, state: &mut SessionState) {
        if state.retry_scheduled {
            return;
        }
        state.retry_scheduled = true;

        let session = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(AUTH_RETRY_BACKOFF).await;
            {
                let mut state = session.inner.state.lock().await;
                state.retry_scheduled = false;
            }
            if let Err(err) = session.ensure_auth().await {
                tracing::error!(error = %err, "scheduled storage authorization retry failed");
            }
        });
    }
}
