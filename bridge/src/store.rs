//! Durable callback-handle store.
//!
//! The bridge depends on two opaque handles minted by the secondary runtime:
//! the dispatcher entrypoint used to boot it, and the user's background
//! handler. Both must survive process restarts, since a notification may
//! arrive before any foreground code has run.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

use herald_types::CallbackHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HandleKey {
    /// Entrypoint that boots the secondary runtime.
    #[serde(rename = "callback_handle")]
    Dispatcher,
    /// The user's background notification handler.
    #[serde(rename = "user_callback_handle")]
    UserHandler,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access handle store at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("corrupt handle store at {}: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub trait HandleStore: Send + Sync {
    fn get(&self, key: HandleKey) -> Option<CallbackHandle>;
    fn set(&self, key: HandleKey, handle: CallbackHandle) -> Result<(), StoreError>;
}

type HandleMap = BTreeMap<HandleKey, u64>;

fn lock(map: &Mutex<HandleMap>) -> MutexGuard<'_, HandleMap> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-lifetime store, for tests and embedders that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryHandleStore {
    handles: Mutex<HandleMap>,
}

impl MemoryHandleStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl HandleStore for MemoryHandleStore {
    fn get(&self, key: HandleKey) -> Option<CallbackHandle> {
        lock(&self.handles)
            .get(&key)
            .copied()
            .and_then(CallbackHandle::new)
    }

    fn set(&self, key: HandleKey, handle: CallbackHandle) -> Result<(), StoreError> {
        lock(&self.handles).insert(key, handle.value());
        Ok(())
    }
}

/// JSON file store. Every write replaces the file atomically.
#[derive(Debug)]
pub struct FileHandleStore {
    path: PathBuf,
    handles: Mutex<HandleMap>,
}

impl FileHandleStore {
    /// Open `path`, treating a missing file as empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let handles = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Json {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HandleMap::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        tracing::debug!(path = %path.display(), "Opened handle store");
        Ok(Self {
            path,
            handles: Mutex::new(handles),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, handles: &HandleMap) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        let bytes = serde_json::to_vec_pretty(handles).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(io_err)?;

        let mut tmp = NamedTempFile::new_in(parent).map_err(io_err)?;
        tmp.write_all(&bytes).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

impl HandleStore for FileHandleStore {
    fn get(&self, key: HandleKey) -> Option<CallbackHandle> {
        lock(&self.handles)
            .get(&key)
            .copied()
            .and_then(CallbackHandle::new)
    }

    fn set(&self, key: HandleKey, handle: CallbackHandle) -> Result<(), StoreError> {
        let mut handles = lock(&self.handles);
        let previous = handles.insert(key, handle.value());
        if let Err(e) = self.persist(&handles) {
            match previous {
                Some(old) => handles.insert(key, old),
                None => handles.remove(&key),
            };
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(raw: u64) -> CallbackHandle {
        CallbackHandle::new(raw).unwrap()
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryHandleStore::new();
        assert!(store.get(HandleKey::Dispatcher).is_none());
        store.set(HandleKey::Dispatcher, handle(42)).unwrap();
        assert_eq!(store.get(HandleKey::Dispatcher), Some(handle(42)));
        assert!(store.get(HandleKey::UserHandler).is_none());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("handles.json");

        let store = FileHandleStore::open(&path).unwrap();
        store.set(HandleKey::Dispatcher, handle(7)).unwrap();
        store.set(HandleKey::UserHandler, handle(9)).unwrap();
        drop(store);

        let reopened = FileHandleStore::open(&path).unwrap();
        assert_eq!(reopened.get(HandleKey::Dispatcher), Some(handle(7)));
        assert_eq!(reopened.get(HandleKey::UserHandler), Some(handle(9)));

        let raw: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["callback_handle"], 7);
        assert_eq!(raw["user_callback_handle"], 9);
    }

    #[test]
    fn zero_on_disk_reads_as_unset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handles.json");
        fs::write(&path, r#"{ "callback_handle": 0 }"#).unwrap();

        let store = FileHandleStore::open(&path).unwrap();
        assert!(store.get(HandleKey::Dispatcher).is_none());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handles.json");
        fs::write(&path, "not json").unwrap();

        let err = FileHandleStore::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Json { .. }));
    }
}
