//! Recstore Storage Library
//!
//! This crate provides the storage abstraction used by the call-recording
//! platform to persist and retrieve recording files regardless of physical
//! location. It includes the [`Storage`] trait and implementations for the
//! local filesystem and Backblaze B2 object storage.
//!
//! # Path layout
//!
//! All backends derive a file's relative location from the same path mask
//! (see the `mask` module), so switching the backend serving a domain
//! changes only the storage root or bucket, never the logical addressing
//! scheme. Files are stored as
//! `{resolved mask}/{domain}/{uuid}_{name}.{application_name}`.
//!
//! # Migration
//!
//! `copy_to` streams bytes out of one backend directly into another's
//! `save` and works for any backend pair. It never deletes the source and
//! never touches the descriptor store; both are the calling layer's
//! responsibility.

pub mod b2;
pub mod factory;
pub mod local;
pub mod mask;
pub mod traits;

// Re-export commonly used types
pub use b2::api::{B2Api, B2ApiError, B2AuthParams, B2Credentials, B2FileInfo};
pub use b2::B2Storage;
pub use factory::{create_storage, reuse_or_create};
pub use local::LocalStorage;
pub use recstore_core::BackendKind;
pub use traits::{
    ByteRange, ByteStream, GetOptions, SaveSource, Storage, StorageError, StorageResult,
};
