//! Versioned, crash-consistent JSON documents for the file-backed stores.
//!
//! Layout: `{"version": 1, "<collection>": [...]}`. A bare JSON array is read
//! as the legacy unversioned layout. Writes go to a sibling temp file which is
//! synced and then renamed over the target.

use crate::error::StoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

/// Current schema version of every persisted document.
pub const SCHEMA_VERSION: u64 = 1;

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Load the records of `collection` from `path`.
///
/// A missing file is an empty store.
pub fn load_records<T: DeserializeOwned>(
    path: &Path,
    collection: &str,
) -> Result<Vec<T>, StoreError> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error(path, e)),
    };

    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    match serde_json::from_slice::<Value>(&raw)? {
        Value::Array(items) => Ok(serde_json::from_value(Value::Array(items))?),
        Value::Object(mut doc) => {
            let version = doc
                .get("version")
                .and_then(Value::as_u64)
                .ok_or_else(|| StoreError::Malformed("missing version".into()))?;
            if version > SCHEMA_VERSION {
                return Err(StoreError::UnsupportedVersion {
                    found: version,
                    supported: SCHEMA_VERSION,
                });
            }
            let records = doc
                .remove(collection)
                .unwrap_or_else(|| Value::Array(Vec::new()));
            Ok(serde_json::from_value(records)?)
        }
        _ => Err(StoreError::Malformed(format!(
            "expected an object or array in {}",
            path.display()
        ))),
    }
}

/// Atomically replace `path` with the given records.
pub fn save_records<T: Serialize>(
    path: &Path,
    collection: &str,
    records: &[T],
) -> Result<(), StoreError> {
    let mut doc = Map::new();
    doc.insert("version".into(), Value::from(SCHEMA_VERSION));
    doc.insert(collection.into(), serde_json::to_value(records)?);
    let body = serde_json::to_vec_pretty(&Value::Object(doc))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = Path::new(&tmp_name);

    let mut file = open_private(tmp).map_err(|e| io_error(tmp, e))?;
    file.write_all(&body).map_err(|e| io_error(tmp, e))?;
    file.sync_all().map_err(|e| io_error(tmp, e))?;
    drop(file);

    fs::rename(tmp, path).map_err(|e| io_error(path, e))
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}
