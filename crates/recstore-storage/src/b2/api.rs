//! Seam to the Backblaze B2 API client.
//!
//! The wire protocol lives outside this crate: the embedding application
//! injects a client implementing [`B2Api`], and the backend only drives the
//! calls below. Error normalization is the caller's contract: a client
//! must map provider 404-class responses to [`B2ApiError::NotFound`] so the
//! backend can distinguish absence from real failures.

use async_trait::async_trait;
use thiserror::Error;

use crate::traits::{ByteRange, ByteStream};

/// Account and bucket identity used for the authorization handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct B2Credentials {
    pub account_id: String,
    pub application_key: String,
    pub bucket_id: String,
    pub bucket_name: String,
}

/// Opaque parameters returned by a successful handshake. Valid for the
/// provider's token lifetime; the backend re-authenticates sooner.
#[derive(Debug, Clone)]
pub struct B2AuthParams {
    pub authorization_token: String,
    pub api_url: String,
    pub download_url: String,
}

/// Provider-side record of an uploaded object.
#[derive(Debug, Clone)]
pub struct B2FileInfo {
    pub file_id: String,
    pub file_name: String,
    pub content_length: u64,
}

/// Errors surfaced by a [`B2Api`] client.
#[derive(Debug, Error)]
pub enum B2ApiError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Client-side operations the b2 backend orchestrates.
#[async_trait]
pub trait B2Api: Send + Sync {
    /// Perform the authorization handshake for the account.
    async fn authorize(&self, credentials: &B2Credentials) -> Result<B2AuthParams, B2ApiError>;

    /// Upload `body` under `file_name` into the bucket, returning the
    /// provider-assigned file record.
    async fn upload(
        &self,
        auth: &B2AuthParams,
        bucket_id: &str,
        file_name: &str,
        body: ByteStream,
    ) -> Result<B2FileInfo, B2ApiError>;

    /// Download an object by its provider-assigned id, optionally limited
    /// to a byte range.
    async fn download(
        &self,
        auth: &B2AuthParams,
        file_id: &str,
        range: Option<ByteRange>,
    ) -> Result<ByteStream, B2ApiError>;

    /// Delete an object version by id and name.
    async fn delete(
        &self,
        auth: &B2AuthParams,
        file_id: &str,
        file_name: &str,
    ) -> Result<(), B2ApiError>;

    /// Fetch the metadata record of an object by id.
    async fn file_info(&self, auth: &B2AuthParams, file_id: &str)
        -> Result<B2FileInfo, B2ApiError>;
}
