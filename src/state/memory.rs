//! In-memory store used for dry runs and tests.
use super::{Buckets, PersistentState};
use crate::error::StateError;

/// A store that lives only for the current process.
#[derive(Debug, Default, Clone)]
pub struct MemoryState {
    data: Buckets,
}

impl MemoryState {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding a copy of `data`.
    #[must_use]
    pub const fn from_snapshot(data: Buckets) -> Self {
        Self { data }
    }
}

impl PersistentState for MemoryState {
    fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StateError> {
        Ok(self.data.get(bucket).and_then(|b| b.get(key)).cloned())
    }

    fn set(&mut self, bucket: &str, key: &str, value: &[u8]) -> Result<(), StateError> {
        self.data
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, bucket: &str, key: &str) -> Result<(), StateError> {
        if let Some(b) = self.data.get_mut(bucket) {
            b.remove(key);
        }
        Ok(())
    }

    fn snapshot(&self) -> Result<Buckets, StateError> {
        Ok(self.data.clone())
    }

    fn flush(&mut self) -> Result<(), StateError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), StateError> {
        Ok(())
    }
}
