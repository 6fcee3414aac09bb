//! Persistent backing store using PostgreSQL.

use crate::storage::BackingStore;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::{PgPool, Row};

/// Stores every resource kind in one `runtime_objects` table keyed by `(kind, key)`.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS runtime_objects (
                kind TEXT NOT NULL,
                key TEXT NOT NULL,
                value BYTEA NOT NULL,
                PRIMARY KEY (kind, key)
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl BackingStore for PostgresStore {
    async fn get(&self, kind: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT value FROM runtime_objects WHERE kind = $1 AND key = $2")
            .bind(kind)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get("value")?)),
            None => Ok(None),
        }
    }

    async fn save(&self, kind: &str, key: &str, value: &[u8]) -> Result<()> {
        sqlx::query(
            "INSERT INTO runtime_objects (kind, key, value) VALUES ($1, $2, $3)
             ON CONFLICT (kind, key) DO UPDATE SET value = $3",
        )
        .bind(kind)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn items(&self, kind: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let rows = sqlx::query("SELECT key, value FROM runtime_objects WHERE kind = $1 ORDER BY key")
            .bind(kind)
            .fetch_all(&self.pool)
            .await?;
        let mut pairs = Vec::with_capacity(rows.len());
        for row in rows {
            pairs.push((row.try_get("key")?, row.try_get("value")?));
        }
        Ok(pairs)
    }

    async fn delete(&self, kind: &str, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM runtime_objects WHERE kind = $1 AND key = $2")
            .bind(kind)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
