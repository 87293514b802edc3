//! Persisted host state
//!
//! Small TOML file holding the password hash and the "manually stopped"
//! flag owned by the host lifecycle layer.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{RemoteCamError, Result};

/// On-disk state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFile {
    /// `salt:hex(sha256(salt || password))`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,

    /// Set once `password_hash` is authoritative
    #[serde(default)]
    pub is_hashed: bool,

    /// Legacy plaintext password, removed after migration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// The user stopped serving explicitly; do not auto-start
    #[serde(default)]
    pub manually_stopped: bool,
}

impl StateFile {
    /// Default state file location
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".local/share")))
            .unwrap_or_else(|| PathBuf::from("/var/lib"))
            .join("remotecam")
            .join("state.toml")
    }

    /// Load the state file, or defaults if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("State file not found at {:?}, starting fresh", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| RemoteCamError::Config(format!("Failed to read state file: {}", e)))?;
        Ok(toml::from_str(&content)?)
    }

    /// Write the state file with owner-only permissions
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RemoteCamError::Config(format!("Failed to create state directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| RemoteCamError::Config(format!("Failed to serialize state: {}", e)))?;
        let write_err = |e: std::io::Error| {
            RemoteCamError::Config(format!("Failed to write state file: {}", e))
        };
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .map_err(write_err)?;
        // `mode` only applies on creation; tighten files left by older versions
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .map_err(write_err)?;
        file.write_all(content.as_bytes()).map_err(write_err)?;

        debug!("Saved state to {:?}", path);
        Ok(())
    }

    /// Update only the manually-stopped flag
    pub fn set_manually_stopped(path: &Path, stopped: bool) -> Result<()> {
        let mut state = Self::load_from(path)?;
        if state.manually_stopped != stopped {
            state.manually_stopped = stopped;
            state.save_to(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let state = StateFile::load_from(&dir.path().join("state.toml")).unwrap();
        assert_eq!(state, StateFile::default());
    }

    #[test]
    fn test_manually_stopped_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.toml");

        StateFile::set_manually_stopped(&path, true).unwrap();
        assert!(StateFile::load_from(&path).unwrap().manually_stopped);

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_save_tightens_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.toml");
        std::fs::write(&path, "manually_stopped = false\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let state = StateFile {
            password: Some("hunter2".into()),
            ..StateFile::default()
        };
        state.save_to(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(StateFile::load_from(&path).unwrap(), state);
    }

    #[test]
    fn test_legacy_plaintext_parses() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.toml");
        std::fs::write(&path, "password = \"hunter2\"\n").unwrap();

        let state = StateFile::load_from(&path).unwrap();
        assert_eq!(state.password.as_deref(), Some("hunter2"));
        assert!(!state.is_hashed);
        assert!(state.password_hash.is_none());
    }
}
