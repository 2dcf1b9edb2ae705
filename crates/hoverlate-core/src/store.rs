//! Durable key-value store trait — where every ledger, cache, rate window,
//! and setting record lives.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{HoverlateError, Result};

/// A batch of records keyed by store key.
pub type Entries = HashMap<String, Value>;

/// Durable key-value store. Implement for different storage backends.
///
/// Writes are atomic per key only; there are no cross-key transactions.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch the given keys. Missing keys are simply absent from the result.
    async fn get(&self, keys: &[&str]) -> Result<Entries>;

    /// Fetch the whole store.
    async fn get_all(&self) -> Result<Entries>;

    /// Upsert every entry.
    async fn set(&self, entries: Entries) -> Result<()>;

    /// Delete the given keys. Missing keys are ignored.
    async fn remove(&self, keys: &[&str]) -> Result<()>;

    /// Fetch a single key.
    async fn get_one(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.get(&[key]).await?.remove(key))
    }

    /// Upsert a single key.
    async fn set_one(&self, key: &str, value: Value) -> Result<()> {
        self.set(Entries::from([(key.to_string(), value)])).await
    }
}

/// In-memory store for testing and ephemeral usage.
pub struct InMemoryStore {
    entries: Mutex<Entries>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Entries>> {
        self.entries
            .lock()
            .map_err(|_| HoverlateError::Store("in-memory store lock poisoned".to_string()))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for InMemoryStore {
    async fn get(&self, keys: &[&str]) -> Result<Entries> {
        let entries = self.lock()?;
        Ok(keys
            .iter()
            .filter_map(|k| entries.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    async fn get_all(&self) -> Result<Entries> {
        Ok(self.lock()?.clone())
    }

    async fn set(&self, new_entries: Entries) -> Result<()> {
        self.lock()?.extend(new_entries);
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        let mut entries = self.lock()?;
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }
}
