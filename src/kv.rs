//! File-backed key/value store standing in for browser local storage.
//!
//! Each key is one file under the configured directory. Values are strings
//! (JSON documents or data URLs). Writes go through a temporary file and a
//! rename so a crash never leaves a half-written value behind.

use std::path::{Path, PathBuf};

use crate::error::{NoteError, Result};

/// Persisted keys, shared with the other local consumers.
pub mod keys {
    pub const CATEGORIES: &str = "noteapp_categories";
    pub const NOTES: &str = "noteapp_notes";
    pub const APP_STATE: &str = "noteapp_state";
    pub const TOKEN: &str = "noteapp_token";
    pub const AUTH: &str = "noteapp_auth";
    pub const USERS: &str = "noteapp_users";
    pub const DATA_SOURCE: &str = "noteapp_data_source";
    pub const IMAGE_PREFIX: &str = "noteapp_image_";

    pub fn image(id: &str) -> String {
        format!("{}{}", IMAGE_PREFIX, id)
    }
}

#[derive(Debug, Clone)]
pub struct LocalKv {
    dir: PathBuf,
}

impl LocalKv {
    /// Open (and create if needed) the storage directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(NoteError::validation(format!("invalid storage key '{}'", key)));
        }
        Ok(self.dir.join(key))
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp = self.dir.join(format!(".{}.tmp", key));
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    out.push(name.to_string());
                }
            }
        }
        out.sort();
        Ok(out)
    }

    /// Deserialize a JSON value, `None` when the key is absent.
    pub fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn set_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.set(key, &serde_json::to_string(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn set_get_remove() {
        let tmp = TempDir::new().unwrap();
        let kv = LocalKv::open(tmp.path()).unwrap();
        assert_eq!(kv.get("a").unwrap(), None);
        kv.set("a", "1").unwrap();
        assert_eq!(kv.get("a").unwrap().as_deref(), Some("1"));
        kv.remove("a").unwrap();
        kv.remove("a").unwrap();
        assert_eq!(kv.get("a").unwrap(), None);
    }

    #[test]
    fn rejects_path_like_keys() {
        let tmp = TempDir::new().unwrap();
        let kv = LocalKv::open(tmp.path()).unwrap();
        assert!(kv.set("../escape", "x").is_err());
        assert!(kv.set(".hidden", "x").is_err());
        assert!(kv.get("a/b").is_err());
    }

    #[test]
    fn keys_skip_temporary_files() {
        let tmp = TempDir::new().unwrap();
        let kv = LocalKv::open(tmp.path()).unwrap();
        kv.set("b", "2").unwrap();
        kv.set("a", "1").unwrap();
        std::fs::write(tmp.path().join(".a.tmp"), "junk").unwrap();
        assert_eq!(kv.keys().unwrap(), vec!["a", "b"]);
    }
}
