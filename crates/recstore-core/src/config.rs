//! Configuration module
//!
//! Storage backend configuration. One instance of [`StorageConfig`] fully
//! identifies one backend: credentials and bucket identity for the object
//! storage provider, or the filesystem root for the local backend, plus the
//! path mask. Which fields are required depends on the backend kind the
//! owning layer selects; the backend constructors reject configurations
//! missing their required fields.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default path mask applied when the configuration carries none.
///
/// Tokens: `$Y` year, `$M` month, `$D` day, `$H` hour, all zero-padded.
pub const DEFAULT_MASK: &str = "$Y/$M/$D/$H";

/// Identity of a single storage backend instance.
///
/// The mask together with every credential/bucket/root field forms the
/// backend's identity: a backend instance is constructed from exactly one
/// `StorageConfig`, and `check_config` on the backend reports whether a
/// reloaded configuration still matches it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Object storage account id (b2 backend).
    pub account_id: Option<String>,
    /// Target bucket id (b2 backend).
    pub bucket_id: Option<String>,
    /// Target bucket name (b2 backend).
    pub bucket_name: Option<String>,
    /// Application key used for the authorization handshake (b2 backend).
    pub application_key: Option<String>,
    /// Root directory for stored files (local backend).
    pub file_root: Option<PathBuf>,
    /// Path mask; see [`DEFAULT_MASK`].
    #[serde(default = "default_mask")]
    pub mask: String,
}

fn default_mask() -> String {
    DEFAULT_MASK.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mask_applied_when_missing() {
        let config: StorageConfig =
            serde_json::from_str(r#"{"file_root": "/var/spool/recordings"}"#).unwrap();
        assert_eq!(config.mask, DEFAULT_MASK);
        assert_eq!(
            config.file_root.as_deref(),
            Some(std::path::Path::new("/var/spool/recordings"))
        );
        assert!(config.account_id.is_none());
    }

    #[test]
    fn test_explicit_mask_preserved() {
        let config: StorageConfig = serde_json::from_str(r#"{"mask": "$Y/$M"}"#).unwrap();
        assert_eq!(config.mask, "$Y/$M");
    }
}
