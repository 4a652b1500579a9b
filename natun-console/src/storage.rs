use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use natun_core::{KeyValueStore, StoreError};
use serde::{Serialize, de::DeserializeOwned};
use tracing::warn;

/// Console state files hold a few short records; anything larger is treated
/// as corrupt instead of being read into memory.
pub const MAX_STATE_BYTES: u64 = 64 * 1024;

#[derive(Debug)]
pub enum StateLoadError {
    Metadata(io::Error),
    TooLarge { size: u64, max: u64 },
    Read(io::Error),
    Parse(serde_json::Error),
}

impl StateLoadError {
    pub fn is_missing(&self) -> bool {
        matches!(self, StateLoadError::Metadata(e) if e.kind() == io::ErrorKind::NotFound)
    }
}

impl std::fmt::Display for StateLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateLoadError::Metadata(e) => write!(f, "metadata read failed: {e}"),
            StateLoadError::TooLarge { size, max } => {
                write!(f, "file too large: {size} bytes (max {max})")
            }
            StateLoadError::Read(e) => write!(f, "read failed: {e}"),
            StateLoadError::Parse(e) => write!(f, "parse failed: {e}"),
        }
    }
}

impl std::error::Error for StateLoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StateLoadError::Metadata(e) => Some(e),
            StateLoadError::Read(e) => Some(e),
            StateLoadError::Parse(e) => Some(e),
            StateLoadError::TooLarge { .. } => None,
        }
    }
}

#[derive(Debug)]
pub enum StateSaveError {
    CreateDir(io::Error),
    Serialize(serde_json::Error),
    WriteTmp(io::Error),
    Rename(io::Error),
}

impl std::fmt::Display for StateSaveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateSaveError::CreateDir(e) => write!(f, "create dir failed: {e}"),
            StateSaveError::Serialize(e) => write!(f, "serialize failed: {e}"),
            StateSaveError::WriteTmp(e) => write!(f, "tmp write failed: {e}"),
            StateSaveError::Rename(e) => write!(f, "rename failed: {e}"),
        }
    }
}

impl std::error::Error for StateSaveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StateSaveError::CreateDir(e) => Some(e),
            StateSaveError::Serialize(e) => Some(e),
            StateSaveError::WriteTmp(e) => Some(e),
            StateSaveError::Rename(e) => Some(e),
        }
    }
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, StateLoadError> {
    let meta = fs::metadata(path).map_err(StateLoadError::Metadata)?;
    if meta.len() > MAX_STATE_BYTES {
        return Err(StateLoadError::TooLarge {
            size: meta.len(),
            max: MAX_STATE_BYTES,
        });
    }

    let data = fs::read_to_string(path).map_err(StateLoadError::Read)?;
    serde_json::from_str(&data).map_err(StateLoadError::Parse)
}

/// Writes through a sibling `.tmp` file and renames it over `path`.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StateSaveError> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(StateSaveError::CreateDir)?;
    }

    let tmp = path.with_extension("json.tmp");
    let payload = serde_json::to_string_pretty(value).map_err(StateSaveError::Serialize)?;
    fs::write(&tmp, payload.as_bytes()).map_err(StateSaveError::WriteTmp)?;

    if path.exists() {
        let _ = fs::remove_file(path);
    }

    fs::rename(&tmp, path).map_err(StateSaveError::Rename)
}

pub fn save_json_with_retry<T: Serialize>(path: &Path, value: &T) -> Result<(), StateSaveError> {
    const MAX_ATTEMPTS: u32 = 3;
    const BACKOFF_BASE_MS: u64 = 50;

    let mut attempt = 1;
    loop {
        match save_json(path, value) {
            Ok(()) => return Ok(()),
            Err(err) if attempt >= MAX_ATTEMPTS => return Err(err),
            Err(err) => {
                warn!(attempt, path = %path.display(), "state save failed, retrying: {err}");
                let backoff_ms = BACKOFF_BASE_MS.saturating_mul(1_u64 << (attempt - 1));
                std::thread::sleep(Duration::from_millis(backoff_ms));
                attempt += 1;
            }
        }
    }
}

/// [`KeyValueStore`] backed by a single JSON object on disk.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn entries(&self) -> Result<BTreeMap<String, String>, StateLoadError> {
        match load_json(&self.path) {
            Err(err) if err.is_missing() => Ok(BTreeMap::new()),
            other => other,
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self
            .entries()
            .map_err(|err| StoreError::Backend(format!("{}: {err}", self.path.display())))?;
        Ok(entries.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries().unwrap_or_else(|err| {
            warn!(path = %self.path.display(), "discarding unreadable state file: {err}");
            BTreeMap::new()
        });
        entries.insert(key.to_owned(), value.to_owned());
        // Called from the console task; a failed write is reported, not retried.
        save_json(&self.path, &entries).map_err(|err| match err {
            StateSaveError::Serialize(e) => StoreError::Serialize(e.to_string()),
            other => StoreError::Backend(format!("{}: {other}", self.path.display())),
        })
    }
}
