//! On-disk layout
//!
//! ```text
//! <root>/
//!   index.json
//!   tabs/<tab_id>.json
//!   checkpoints/<checkpoint_id>.json
//!   archive/<tab_id>.json
//!   exports/
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::Result;

const RECORD_EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create every directory of the layout
    pub fn ensure(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.tabs_dir(),
            self.checkpoints_dir(),
            self.archive_dir(),
            self.exports_dir(),
        ] {
            fs::create_dir_all(&dir)
                .map_err(|source| StorageError::io("creating storage directory", &dir, source))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tabs_dir(&self) -> PathBuf {
        self.root.join("tabs")
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.root.join("checkpoints")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.root.join("archive")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.root.join("exports")
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    pub fn tab_path(&self, id: &str) -> Result<PathBuf> {
        Ok(self.tabs_dir().join(record_file_name(id)?))
    }

    pub fn checkpoint_path(&self, id: &str) -> Result<PathBuf> {
        Ok(self.checkpoints_dir().join(record_file_name(id)?))
    }

    pub fn archive_path(&self, id: &str) -> Result<PathBuf> {
        Ok(self.archive_dir().join(record_file_name(id)?))
    }

    /// Record paths in a directory, skipping temporaries and foreign files
    pub fn record_paths(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(dir)
            .map_err(|source| StorageError::io("listing records", dir, source))?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_record_path(path))
            .collect();
        paths.sort();
        Ok(paths)
    }
}

/// Ids become file names, so only a conservative character set is accepted
pub fn validate_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidId(id.to_string()))
    }
}

fn record_file_name(id: &str) -> Result<String> {
    validate_id(id)?;
    Ok(format!("{id}.{RECORD_EXTENSION}"))
}

fn is_record_path(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|name| name.to_str())
        .map_or(true, |name| name.starts_with('.'));

    !hidden && path.extension().and_then(|ext| ext.to_str()) == Some(RECORD_EXTENSION)
}
