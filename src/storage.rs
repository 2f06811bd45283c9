use std::{
    collections::BTreeMap,
    env, fs, io,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use serde_json::Value;
use thiserror::Error;

const STORAGE_DIR_NAME: &str = ".cl-monitor";
const STATE_FILE: &str = "state.json";

/// Get/put persistence for small JSON documents.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;
    fn put(&self, key: &str, value: Value) -> Result<(), StorageError>;
}

/// Returns `~/.cl-monitor`, creating it when missing.
pub fn storage_dir() -> Result<PathBuf, StorageError> {
    let home = env::var("HOME").map_err(|_| StorageError::HomeDirMissing)?;
    let dir = PathBuf::from(home).join(STORAGE_DIR_NAME);
    if !dir.exists() {
        fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

/// Keeps every key in one JSON object on disk.
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn initialize() -> Result<Self, StorageError> {
        Ok(Self::at(storage_dir()?.join(STATE_FILE)))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<BTreeMap<String, Value>, StorageError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn write_document(&self, document: &BTreeMap<String, Value>) -> Result<(), StorageError> {
        let data = serde_json::to_string_pretty(document)?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, data)?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.read_document()?.remove(key))
    }

    fn put(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut document = self.read_document()?;
        document.insert(key.to_owned(), value);
        self.write_document(&document)
    }
}

/// Volatile store, used when the state file cannot be set up.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_owned(), value);
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("HOME environment variable is not set; cannot keep state under ~/.cl-monitor")]
    HomeDirMissing,
    #[error("I/O error while handling stored state: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to serialize stored state: {0}")]
    Serialization(#[from] serde_json::Error),
}
