//! JSON-file store guarded by an advisory lock on a companion lock file.
use std::collections::BTreeMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use super::{Buckets, PersistentState};
use crate::error::StateError;

/// On-disk layout: bucket -> key -> base64 value.
type Encoded = BTreeMap<String, BTreeMap<String, String>>;

/// A store persisted as a single JSON file.
///
/// Read-write stores hold an exclusive OS lock on `<path>.lock` from open
/// until close, and write the file atomically on flush when modified. The
/// lock dies with the process, so a leftover lock file never blocks a
/// later run.
#[derive(Debug)]
pub struct FileState {
    path: PathBuf,
    lock: Option<fs::File>,
    data: Buckets,
    dirty: bool,
    read_only: bool,
    closed: bool,
}

impl FileState {
    /// Open the store at `path`. A missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Locked`] if another process holds the lock,
    /// [`StateError::Io`] for I/O failures, and [`StateError::Corrupt`] if
    /// the file cannot be parsed.
    pub fn open(path: &Path, read_only: bool) -> Result<Self, StateError> {
        let lock = if read_only {
            None
        } else {
            Some(acquire_lock(path)?)
        };
        let mut state = Self {
            path: path.to_path_buf(),
            lock,
            data: Buckets::new(),
            dirty: false,
            read_only,
            closed: false,
        };
        // the lock is released by Drop if loading fails
        state.data = load(path)?;
        Ok(state)
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_open(&self) -> Result<(), StateError> {
        if self.closed {
            Err(StateError::Closed)
        } else {
            Ok(())
        }
    }

    fn check_writable(&self) -> Result<(), StateError> {
        self.check_open()?;
        if self.read_only {
            Err(StateError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn write_out(&mut self) -> Result<(), StateError> {
        if !self.dirty {
            return Ok(());
        }
        let io_err = |source| StateError::Io {
            path: self.path.clone(),
            source,
        };
        let encoded: Encoded = self
            .data
            .iter()
            .filter(|(_, kv)| !kv.is_empty())
            .map(|(bucket, kv)| {
                let values = kv
                    .iter()
                    .map(|(k, v)| (k.clone(), STANDARD.encode(v)))
                    .collect();
                (bucket.clone(), values)
            })
            .collect();
        let json = serde_json::to_vec_pretty(&encoded).map_err(|e| StateError::Corrupt {
            location: self.path.display().to_string(),
            message: e.to_string(),
        })?;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(io_err)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        self.dirty = false;
        Ok(())
    }

    fn release(&mut self) {
        if let Some(lock) = self.lock.take() {
            lock.unlock().ok();
        }
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

fn acquire_lock(path: &Path) -> Result<fs::File, StateError> {
    let lock = lock_path(path);
    let io_err = |source| StateError::Io {
        path: lock.clone(),
        source,
    };
    if let Some(dir) = lock.parent() {
        fs::create_dir_all(dir).map_err(io_err)?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock)
        .map_err(io_err)?;
    match file.try_lock() {
        Ok(()) => {}
        Err(fs::TryLockError::WouldBlock) => {
            return Err(StateError::Locked {
                path: path.to_path_buf(),
            });
        }
        Err(fs::TryLockError::Error(e)) => return Err(io_err(e)),
    }
    // holder pid, informational only
    file.set_len(0).ok();
    writeln!(file, "{}", std::process::id()).ok();
    Ok(file)
}

fn load(path: &Path) -> Result<Buckets, StateError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Buckets::new()),
        Err(source) => {
            return Err(StateError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Buckets::new());
    }
    let corrupt = |message: String| StateError::Corrupt {
        location: path.display().to_string(),
        message,
    };
    let encoded: Encoded = serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;
    encoded
        .into_iter()
        .map(|(bucket, kv)| {
            let values = kv
                .into_iter()
                .map(|(k, v)| {
                    STANDARD
                        .decode(v)
                        .map(|bytes| (k.clone(), bytes))
                        .map_err(|e| corrupt(format!("{bucket}/{k}: {e}")))
                })
                .collect::<Result<BTreeMap<_, _>, _>>()?;
            Ok((bucket, values))
        })
        .collect()
}

impl PersistentState for FileState {
    fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StateError> {
        self.check_open()?;
        Ok(self.data.get(bucket).and_then(|b| b.get(key)).cloned())
    }

    fn set(&mut self, bucket: &str, key: &str, value: &[u8]) -> Result<(), StateError> {
        self.check_writable()?;
        self.data
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        self.dirty = true;
        Ok(())
    }

    fn delete(&mut self, bucket: &str, key: &str) -> Result<(), StateError> {
        self.check_writable()?;
        if let Some(b) = self.data.get_mut(bucket)
            && b.remove(key).is_some()
        {
            self.dirty = true;
        }
        Ok(())
    }

    fn snapshot(&self) -> Result<Buckets, StateError> {
        self.check_open()?;
        Ok(self.data.clone())
    }

    fn flush(&mut self) -> Result<(), StateError> {
        self.check_open()?;
        self.write_out()
    }

    fn close(&mut self) -> Result<(), StateError> {
        if self.closed {
            return Ok(());
        }
        let result = self.write_out();
        self.release();
        self.closed = true;
        result
    }
}

impl Drop for FileState {
    fn drop(&mut self) {
        if !self.closed {
            self.write_out().ok();
        }
        self.release();
    }
}
