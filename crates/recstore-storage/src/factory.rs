//! Backend construction and reuse across configuration reloads.

use std::sync::Arc;

use recstore_core::{BackendKind, StorageConfig};

use crate::b2::api::B2Api;
use crate::b2::B2Storage;
use crate::local::LocalStorage;
use crate::traits::{Storage, StorageError, StorageResult};

/// Create a storage backend of the requested kind from its configuration.
///
/// The b2 backend needs an injected API client; `api` is ignored for the
/// local backend.
pub fn create_storage(
    kind: BackendKind,
    config: &StorageConfig,
    api: Option<Arc<dyn B2Api>>,
) -> StorageResult<Arc<dyn Storage>> {
    match kind {
        BackendKind::Local => {
            let storage = LocalStorage::new(config)?;
            Ok(Arc::new(storage))
        }
        BackendKind::B2 => {
            let api = api.ok_or_else(|| {
                StorageError::ConfigError("b2 backend requires an API client".to_string())
            })?;
            let storage = B2Storage::new(config, api)?;
            Ok(Arc::new(storage))
        }
    }
}

/// Keep `current` when it still matches the reloaded configuration;
/// otherwise build a fresh instance. Reusing a matching b2 backend keeps
/// its auth session and upload queue alive instead of re-authenticating.
pub fn reuse_or_create(
    current: Option<Arc<dyn Storage>>,
    kind: BackendKind,
    config: &StorageConfig,
    api: Option<Arc<dyn B2Api>>,
) -> StorageResult<Arc<dyn Storage>> {
    if let Some(existing) = current {
        if existing.backend_kind() == kind && existing.check_config(config, &config.mask) {
            return Ok(existing);
        }
        tracing::debug!(backend = %kind, "storage configuration changed, rebuilding backend");
    }

    create_storage(kind, config, api)
}
