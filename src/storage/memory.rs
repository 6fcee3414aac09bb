//! In-process backing store.

use crate::storage::BackingStore;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};

/// Keeps everything in memory and counts saves per key, which tests use to
/// check that a record was written exactly once.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
    saves: Mutex<HashMap<(String, String), usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a record directly, bypassing the save counter.
    pub fn insert_raw(&self, kind: &str, key: &str, value: &JsonValue) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.data
            .lock()
            .entry(kind.to_string())
            .or_default()
            .insert(key.to_string(), bytes);
        Ok(())
    }

    /// The stored record decoded as JSON.
    pub fn raw(&self, kind: &str, key: &str) -> Option<JsonValue> {
        let data = self.data.lock();
        let bytes = data.get(kind)?.get(key)?;
        serde_json::from_slice(bytes).ok()
    }

    pub fn save_count(&self, kind: &str, key: &str) -> usize {
        self.saves
            .lock()
            .get(&(kind.to_string(), key.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn len(&self, kind: &str) -> usize {
        self.data.lock().get(kind).map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn get(&self, kind: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.data.lock().get(kind).and_then(|m| m.get(key)).cloned())
    }

    async fn save(&self, kind: &str, key: &str, value: &[u8]) -> Result<()> {
        self.data
            .lock()
            .entry(kind.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        *self
            .saves
            .lock()
            .entry((kind.to_string(), key.to_string()))
            .or_default() += 1;
        Ok(())
    }

    async fn items(&self, kind: &str) -> Result<Vec<(String, Vec<u8>)>> {
        Ok(self
            .data
            .lock()
            .get(kind)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn delete(&self, kind: &str, key: &str) -> Result<()> {
        if let Some(m) = self.data.lock().get_mut(kind) {
            m.remove(key);
        }
        Ok(())
    }
}
