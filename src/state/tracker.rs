//! Typed access to the persistent state: entry states and once-script
//! markers.
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    ENTRY_STATE_BUCKET, EntryState, FileState, MemoryState, PersistentState, SCRIPT_STATE_BUCKET,
    sha256_hex,
};
use crate::error::StateError;

/// How the state store is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateMode {
    /// Readable; writes fail. No lock is taken.
    ReadOnly,
    /// Readable and writable under an exclusive lock.
    ReadWrite,
    /// Writes go to an in-memory copy that is discarded at exit.
    DryRun,
}

/// Marker recorded when a once-script has run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptState {
    /// Target-relative script name.
    pub name: String,
    /// When the script finished.
    pub run_at: DateTime<Utc>,
    /// Hex SHA-256 of the contents that ran.
    pub content_hash: String,
}

/// The engine's view of the persistent state.
#[derive(Debug)]
pub struct Tracker {
    store: Box<dyn PersistentState>,
    path: Option<PathBuf>,
    mode: StateMode,
}

impl Tracker {
    /// Open the store at `path` in `mode`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the store cannot be opened or locked.
    pub fn open(path: &Path, mode: StateMode) -> Result<Self, StateError> {
        let store = Self::open_store(path, mode)?;
        Ok(Self {
            store,
            path: Some(path.to_path_buf()),
            mode,
        })
    }

    /// A tracker over an empty in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            store: Box::new(MemoryState::new()),
            path: None,
            mode: StateMode::ReadWrite,
        }
    }

    fn open_store(path: &Path, mode: StateMode) -> Result<Box<dyn PersistentState>, StateError> {
        Ok(match mode {
            StateMode::ReadOnly => Box::new(FileState::open(path, true)?),
            StateMode::ReadWrite => Box::new(FileState::open(path, false)?),
            StateMode::DryRun => {
                let file = FileState::open(path, true)?;
                Box::new(MemoryState::from_snapshot(file.snapshot()?))
            }
        })
    }

    /// Mode the tracker was opened in.
    #[must_use]
    pub const fn mode(&self) -> StateMode {
        self.mode
    }

    /// Path of the backing file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<T>, StateError> {
        self.store
            .get(bucket, key)?
            .map(|bytes| {
                serde_json::from_slice(&bytes).map_err(|e| StateError::Corrupt {
                    location: format!("{bucket}/{key}"),
                    message: e.to_string(),
                })
            })
            .transpose()
    }

    fn set_json<T: Serialize>(&mut self, bucket: &str, key: &str, value: &T) -> Result<(), StateError> {
        let bytes = serde_json::to_vec(value).map_err(|e| StateError::Corrupt {
            location: format!("{bucket}/{key}"),
            message: e.to_string(),
        })?;
        self.store.set(bucket, key, &bytes)
    }

    /// Entry state recorded when `target` was last written.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the store is closed or the value is corrupt.
    pub fn entry_state(&self, target: &str) -> Result<Option<EntryState>, StateError> {
        self.get_json(ENTRY_STATE_BUCKET, target)
    }

    /// Record the state `target` was just written with.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the store rejects the write.
    pub fn set_entry_state(&mut self, target: &str, state: &EntryState) -> Result<(), StateError> {
        self.set_json(ENTRY_STATE_BUCKET, target, state)
    }

    /// Forget `target` and every entry recorded below it.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the store is closed or rejects the write.
    pub fn delete_entry_subtree(&mut self, target: &str) -> Result<(), StateError> {
        let prefix = format!("{target}/");
        let keys: Vec<String> = self
            .store
            .snapshot()?
            .remove(ENTRY_STATE_BUCKET)
            .unwrap_or_default()
            .into_keys()
            .filter(|k| k == target || k.starts_with(&prefix))
            .collect();
        for key in keys {
            self.store.delete(ENTRY_STATE_BUCKET, &key)?;
        }
        Ok(())
    }

    /// Return `true` if the once-script `target` already ran with exactly
    /// `contents`. A marker that cannot be decoded counts as not run.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the store is closed.
    pub fn script_has_run(&self, target: &str, contents: &[u8]) -> Result<bool, StateError> {
        let hash = sha256_hex(contents);
        match self.get_json::<ScriptState>(SCRIPT_STATE_BUCKET, target) {
            Ok(marker) => Ok(marker.is_some_and(|s| s.content_hash == hash)),
            Err(StateError::Corrupt { location, message }) => {
                tracing::warn!("{location}: unreadable run marker, treating as not run: {message}");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Record that the once-script `target` ran with `contents`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the store rejects the write.
    pub fn mark_script_run(&mut self, target: &str, contents: &[u8]) -> Result<(), StateError> {
        let state = ScriptState {
            name: target.to_string(),
            run_at: Utc::now(),
            content_hash: sha256_hex(contents),
        };
        self.set_json(SCRIPT_STATE_BUCKET, target, &state)
    }

    /// Every bucket with values decoded as JSON where possible.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the store is closed.
    pub fn dump(&self) -> Result<serde_json::Value, StateError> {
        let snapshot = self.store.snapshot()?;
        let mut out = serde_json::Map::new();
        for (bucket, kv) in snapshot {
            let values = kv
                .into_iter()
                .map(|(k, v)| {
                    let value = serde_json::from_slice(&v).unwrap_or_else(|_| {
                        serde_json::Value::from(String::from_utf8_lossy(&v).into_owned())
                    });
                    (k, value)
                })
                .collect();
            out.insert(bucket, serde_json::Value::Object(values));
        }
        Ok(serde_json::Value::Object(out))
    }

    /// Write pending changes to disk without releasing the store.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if writing fails.
    pub fn flush(&mut self) -> Result<(), StateError> {
        self.store.flush()
    }

    /// Flush and release the store so an external program can run.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if flushing fails.
    pub fn close(&mut self) -> Result<(), StateError> {
        self.store.close()
    }

    /// Re-open the store after [`close`](Self::close).
    ///
    /// In-memory stores are left as they are.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the store cannot be opened or locked.
    pub fn reopen(&mut self) -> Result<(), StateError> {
        if let Some(path) = &self.path
            && self.mode != StateMode::DryRun
        {
            self.store = Self::open_store(path, self.mode)?;
        }
        Ok(())
    }
}

/// Delete the store at `path` wholesale.
///
/// # Errors
///
/// Returns [`StateError::Locked`] if another process holds the store.
pub fn reset(path: &Path) -> Result<(), StateError> {
    let mut store = FileState::open(path, false)?;
    store.close()?;
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StateError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
