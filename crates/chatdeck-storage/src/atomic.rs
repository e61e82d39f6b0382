//! Write-to-temporary-then-rename helpers

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use crate::error::StorageError;
use crate::Result;

/// Serialize `value` and atomically replace the file at `path`.
///
/// The temporary file lives in the destination directory so the final rename
/// never crosses a filesystem boundary.
pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes =
        serde_json::to_vec_pretty(value).map_err(|source| StorageError::serialize(path, source))?;
    write_bytes(path, &bytes)
}

pub(crate) fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or("record.json");
    let temp_path = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let written = (|| -> io::Result<()> {
        let mut temp_file = File::create(&temp_path)?;
        temp_file.write_all(bytes)?;
        temp_file.sync_all()
    })();

    if let Err(source) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(StorageError::io("writing temporary record", &temp_path, source));
    }

    fs::rename(&temp_path, path).map_err(|source| {
        let _ = fs::remove_file(&temp_path);
        StorageError::io("renaming temporary record into place", path, source)
    })
}

/// Read and decode a record; a missing file is `Ok(None)`
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(StorageError::io("reading record", path, source)),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StorageError::corrupt(path, source))
}

/// Remove a file; returns whether it existed
pub(crate) fn remove(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(StorageError::io("removing record", path, source)),
    }
}
