//! Backing stores the runtime persists resources through.
//!
//! A store offers per-key atomicity only. Cross-resource consistency comes
//! from the lock manager, not from here.

use anyhow::Result;
use async_trait::async_trait;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[async_trait]
pub trait BackingStore: Send + Sync {
    async fn get(&self, kind: &str, key: &str) -> Result<Option<Vec<u8>>>;

    async fn save(&self, kind: &str, key: &str, value: &[u8]) -> Result<()>;

    /// Every `(key, value)` pair stored under `kind`, ordered by key.
    async fn items(&self, kind: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Removing an absent key is not an error.
    async fn delete(&self, kind: &str, key: &str) -> Result<()>;
}
