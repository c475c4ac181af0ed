//! Shared path-mask resolution for storage backends.
//!
//! Every backend derives a file's relative location from the same mask, so
//! a domain can be moved between backends without changing its logical
//! addressing scheme.

use chrono::{DateTime, Datelike, Timelike, Utc};

use recstore_core::FileConfig;

/// Expand the date tokens in `mask` from `now` and join the result with
/// `domain` and, when given, `file_name`.
///
/// Pure: identical inputs always yield an identical path.
pub fn resolve(mask: &str, domain: &str, file_name: Option<&str>, now: DateTime<Utc>) -> String {
    let expanded = mask
        .replace("$Y", &format!("{:04}", now.year()))
        .replace("$M", &format!("{:02}", now.month()))
        .replace("$D", &format!("{:02}", now.day()))
        .replace("$H", &format!("{:02}", now.hour()));

    let mut path = format!("{}/{}", expanded, domain);
    if let Some(name) = file_name {
        path.push('/');
        path.push_str(name);
    }
    path
}

/// File name a recording is stored under, shared by all backends.
pub fn object_name(file: &FileConfig) -> String {
    format!("{}_{}.{}", file.uuid, file.name, file.application_name)
}
