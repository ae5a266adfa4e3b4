//! Durable persistence for user filter selections.
//!
//! Values live in a key/value space that survives reloads. Keys whose name
//! contains `"Date"` get a special encoding: a date-shaped value is persisted
//! as exactly its `year`/`month`/`day` fields, which keeps round-trips stable
//! and drops incidental attributes. Storage failures are logged, never
//! thrown; a consumer always ends up loaded, worst case with its default.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use relay_core::{date_fields, is_date_shaped};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt store file: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Raw key/value persistence target. Values are opaque strings at this
/// level; all encoding policy lives above.
pub trait StorageBackend: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn write(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory backend for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStorage {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

/// File-backed storage: one JSON object holding every key. Writes flush the
/// whole map; last writer wins, which is adequate for a single UI process.
pub struct FileStorage {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStorage {
    /// Open or create the store file. A corrupt file is logged and treated
    /// as empty rather than refusing to start.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<HashMap<String, String>>(&raw) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "corrupt filter store file, starting empty");
                    HashMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn flush(&self, entries: &HashMap<String, String>) -> Result<(), StorageError> {
        let raw = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }
}

impl StorageBackend for FileStorage {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap();
        entries.remove(key);
        self.flush(&entries)
    }
}

/// Handle over an optional backend. A detached store models storage being
/// categorically unavailable (server-side rendering): every read is empty,
/// every write is a no-op, and nothing throws.
#[derive(Clone)]
pub struct FilterStore {
    backend: Option<Arc<dyn StorageBackend>>,
}

impl FilterStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    pub fn open_file(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Ok(Self::new(Arc::new(FileStorage::open(path)?)))
    }

    pub fn detached() -> Self {
        Self { backend: None }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    fn read_value(&self, key: &str) -> Option<Value> {
        let backend = self.backend.as_ref()?;
        match backend.read(key) {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(key, error = %err, "failed to decode persisted value");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(key, error = %err, "failed to read persisted value");
                None
            }
        }
    }

    fn write_value(&self, key: &str, value: &Value) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        match serde_json::to_string(value) {
            Ok(raw) => {
                if let Err(err) = backend.write(key, &raw) {
                    warn!(key, error = %err, "failed to persist value");
                }
            }
            Err(err) => warn!(key, error = %err, "failed to encode value for persistence"),
        }
    }

    /// Remove a set of keys. No-op where storage is unavailable.
    pub fn clear_keys(&self, keys: &[&str]) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        for key in keys {
            if let Err(err) = backend.remove(key) {
                warn!(key, error = %err, "failed to clear persisted key");
            }
        }
    }
}

fn key_is_date_scoped(key: &str) -> bool {
    key.contains("Date")
}

/// Encoding rule: a date-shaped value under a date-scoped key is reduced to
/// exactly its three calendar fields. Everything else persists verbatim.
pub fn encode_entry(key: &str, value: &Value) -> Value {
    if key_is_date_scoped(key) {
        if let Some(date) = date_fields(value) {
            return json!({ "year": date.year, "month": date.month, "day": date.day });
        }
    }
    value.clone()
}

/// Decoding rule, symmetric with `encode_entry`: a date-shaped value read
/// from a date-scoped key is rebuilt from its three calendar fields, with
/// any other fields a previous writer left behind ignored.
pub fn decode_entry(key: &str, value: Value) -> Value {
    if key_is_date_scoped(key) && is_date_shaped(&value) {
        return encode_entry(key, &value);
    }
    value
}

/// A value persisted under one key. Starts as the default with
/// `is_loaded = false`; `hydrate` performs the single storage read and always
/// leaves the state loaded, whether or not a prior value existed or decoded.
pub struct PersistedState<T> {
    store: FilterStore,
    key: String,
    value: T,
    loaded: bool,
}

impl<T> PersistedState<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    pub fn new(store: FilterStore, key: impl Into<String>, default: T) -> Self {
        Self {
            store,
            key: key.into(),
            value: default,
            loaded: false,
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Attempt the one storage read. Decode failures are logged and leave
    /// the default in place; either way the state is loaded afterwards.
    pub fn hydrate(&mut self) {
        if self.loaded {
            return;
        }
        if let Some(raw) = self.store.read_value(&self.key) {
            let normalized = decode_entry(&self.key, raw);
            match serde_json::from_value(normalized) {
                Ok(value) => self.value = value,
                Err(err) => {
                    warn!(key = %self.key, error = %err, "persisted value does not fit expected shape")
                }
            }
        }
        self.loaded = true;
    }

    /// Replace the value and persist it with the date-aware encoding.
    pub fn set(&mut self, value: T) {
        self.value = value;
        match serde_json::to_value(&self.value) {
            Ok(raw) => self.store.write_value(&self.key, &encode_entry(&self.key, &raw)),
            Err(err) => warn!(key = %self.key, error = %err, "value is not serializable"),
        }
    }
}
