//! Persistent `bucket, key -> bytes` store kept between runs.
//!
//! The engine records two things here: the shape of each target after it was
//! last written (`entryState`) and which once-scripts have run
//! (`scriptState`). The typed view lives in [`Tracker`].

mod entry_state;
mod file;
mod memory;
mod tracker;

use std::collections::BTreeMap;

pub use entry_state::{EntryKind, EntryState, equivalent, sha256_hex};
pub use file::FileState;
pub use memory::MemoryState;
pub use tracker::{ScriptState, StateMode, Tracker, reset};

use crate::error::StateError;

/// Bucket holding [`EntryState`] values keyed by target-relative path.
pub const ENTRY_STATE_BUCKET: &str = "entryState";
/// Bucket holding [`ScriptState`] values keyed by target-relative path.
pub const SCRIPT_STATE_BUCKET: &str = "scriptState";

/// Every bucket and its key/value pairs.
pub type Buckets = BTreeMap<String, BTreeMap<String, Vec<u8>>>;

/// A bucketed key/value store.
pub trait PersistentState: Send + std::fmt::Debug {
    /// Fetch a value.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Closed`] after [`close`](Self::close).
    fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StateError>;

    /// Store a value.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::ReadOnly`] for read-only stores.
    fn set(&mut self, bucket: &str, key: &str, value: &[u8]) -> Result<(), StateError>;

    /// Remove a value; absent keys are not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::ReadOnly`] for read-only stores.
    fn delete(&mut self, bucket: &str, key: &str) -> Result<(), StateError>;

    /// Copy of every bucket.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Closed`] after [`close`](Self::close).
    fn snapshot(&self) -> Result<Buckets, StateError>;

    /// Write pending changes through to the backing storage, keeping the
    /// store open.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if writing fails.
    fn flush(&mut self) -> Result<(), StateError>;

    /// Flush pending writes and release any lock.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if flushing fails.
    fn close(&mut self) -> Result<(), StateError>;
}
