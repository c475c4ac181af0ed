//! File models: save-time inputs and backend-agnostic file descriptors.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::storage_types::BackendKind;

/// Save-time description of a recording file.
///
/// The uuid is the call leg uuid assigned by the switch, not generated here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub uuid: String,
    pub name: String,
    pub domain: String,
    pub application_name: String,
}

/// Where the bytes of a stored file physically live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileLocation {
    /// Absolute path on the local filesystem.
    Path(PathBuf),
    /// Object under the provider bucket. `file_id` is assigned by the
    /// provider on upload and is absent for records that never completed one.
    Object {
        file_id: Option<String>,
        file_name: String,
    },
}

/// Identifies a stored file and the backend able to serve it.
///
/// Produced by `save`; consumed by `get`/`del`/`exists_file`/`copy_to`.
/// Immutable once created: migrating a file produces a new descriptor
/// rather than mutating the old one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub uuid: String,
    pub name: String,
    pub domain: String,
    pub application_name: String,
    pub backend: BackendKind,
    pub location: FileLocation,
}

impl FileDescriptor {
    /// Save-time view of this descriptor, used when re-saving the same
    /// logical file into another backend.
    pub fn file_config(&self) -> FileConfig {
        FileConfig {
            uuid: self.uuid.clone(),
            name: self.name.clone(),
            domain: self.domain.clone(),
            application_name: self.application_name.clone(),
        }
    }

    /// Local filesystem path, if this descriptor references one.
    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            FileLocation::Path(path) => Some(path),
            FileLocation::Object { .. } => None,
        }
    }

    /// Provider-assigned object id, if this descriptor carries one.
    pub fn file_id(&self) -> Option<&str> {
        match &self.location {
            FileLocation::Object {
                file_id: Some(id), ..
            } => Some(id),
            _ => None,
        }
    }
}
