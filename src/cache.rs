//! Cache Store
//!
//! One JSON file per `(profile, kind)` under a profile-scoped directory. An
//! entry that exists is trusted verbatim; there is no expiry.

use crate::error::CacheError;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Validate a name used as a single path component.
/// Letters, digits, `-`, `_` and `.`; never `.` or `..`.
pub fn validate_name(name: &str) -> Result<(), CacheError> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');

    if valid {
        Ok(())
    } else {
        Err(CacheError::InvalidName(name.to_string()))
    }
}

/// Per-profile JSON blob store
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store under the system temp directory
    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a profile's entries
    pub fn profile_dir(&self, profile: &str) -> Result<PathBuf, CacheError> {
        validate_name(profile)?;
        Ok(self.root.join(profile))
    }

    /// File holding one kind's entry
    pub fn entry_path(&self, profile: &str, kind: &str) -> Result<PathBuf, CacheError> {
        validate_name(kind)?;
        Ok(self.profile_dir(profile)?.join(format!("{}.json", kind)))
    }

    /// Read an entry, telling a corrupt file apart from a missing one
    pub fn read(&self, profile: &str, kind: &str) -> Result<Option<Value>, CacheError> {
        let path = self.entry_path(profile, kind)?;

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CacheError::Io { path, source }),
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| CacheError::Corrupt { path, source })
    }

    /// Read an entry; missing, unreadable and corrupt entries are all absent
    pub fn load(&self, profile: &str, kind: &str) -> Option<Value> {
        match self.read(profile, kind) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Ignoring cache entry {}/{}: {}", profile, kind, e);
                None
            }
        }
    }

    /// Persist an entry; the file is replaced atomically
    pub fn save(&self, profile: &str, kind: &str, value: &Value) -> Result<(), CacheError> {
        let path = self.entry_path(profile, kind)?;
        let dir = self.profile_dir(profile)?;

        std::fs::create_dir_all(&dir).map_err(|source| CacheError::Io {
            path: dir.clone(),
            source,
        })?;

        let content = serde_json::to_string(value).map_err(|source| CacheError::Corrupt {
            path: path.clone(),
            source,
        })?;

        let partial = dir.join(format!(".{}.json.partial", kind));
        std::fs::write(&partial, content).map_err(|source| CacheError::Io {
            path: partial.clone(),
            source,
        })?;
        std::fs::rename(&partial, &path).map_err(|source| CacheError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::debug!("Cached {}/{} at {:?}", profile, kind, path);
        Ok(())
    }

    /// Remove every entry of a profile; returns whether anything existed
    pub fn clear(&self, profile: &str) -> Result<bool, CacheError> {
        let dir = self.profile_dir(profile)?;
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CacheError::Io { path: dir, source }),
        }
    }
}
