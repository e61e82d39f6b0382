//! Deck configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use chatdeck_session::SessionConfig;

use crate::error::CoreError;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the on-disk store
    pub data_dir: PathBuf,
    /// Filter used when `RUST_LOG` is not set
    pub log_filter: String,
    pub session: SessionConfig,
}

impl Config {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            log_filter: "info".to_string(),
            session: SessionConfig::default(),
        }
    }

    /// Load a JSON config file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| CoreError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&raw).map_err(|source| CoreError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Like [`Config::load`], but a missing file yields the defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join("chatdeck"))
            .unwrap_or_else(|| PathBuf::from(".chatdeck"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Self::data_dir())
    }
}

// Platform data directory lookup
mod dirs {
    use std::path::PathBuf;

    pub fn data_local_dir() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            std::env::var("LOCALAPPDATA").ok().map(PathBuf::from)
        }
        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library/Application Support"))
        }
        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_DATA_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".local/share"))
                })
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_partial_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatdeck.json");
        std::fs::write(
            &path,
            r#"{"data_dir": "/tmp/deck", "session": {"hydrate_on_start": 2}}"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/deck"));
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.session.hydrate_on_start, 2);
        assert_eq!(config.session.max_checkpoints_per_tab, 50);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");

        assert!(matches!(
            Config::load(&path),
            Err(CoreError::ConfigRead { .. })
        ));
        assert_eq!(
            Config::load_or_default(&path).unwrap().session,
            SessionConfig::default()
        );

        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            Config::load(&path),
            Err(CoreError::ConfigParse { .. })
        ));
    }
}
