//! Boots the runtime: config, logging, store, schemas, load, bootstrap.

use provision_runtime::crypto::Pbkdf2Hasher;
use provision_runtime::infra::{init_tracing, RuntimeConfig};
use provision_runtime::{BackingStore, MemoryStore, PostgresStore, Runtime, SchemaRegistry};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = RuntimeConfig::from_env()?;
    init_tracing();

    let store: Arc<dyn BackingStore> = match &cfg.database_url {
        Some(url) => {
            tracing::info!("using PostgreSQL backing store");
            Arc::new(PostgresStore::connect(url).await?)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let schemas = match &cfg.schema_dir {
        Some(dir) => SchemaRegistry::load_from_dir(dir)?,
        None => SchemaRegistry::new(),
    };
    tracing::info!(kinds = ?schemas.prefixes(), "schema-defined kinds");

    let mut builder = Runtime::builder(store)
        .endpoint_id(cfg.endpoint_id.clone())
        .schemas(schemas.freeze())
        .hasher(Arc::new(Pbkdf2Hasher::new(cfg.password_hash_iterations)))
        .token_ttl(cfg.token_ttl());
    if let Some(key) = &cfg.signing_key {
        builder = builder.signing_key(key.as_bytes());
    } else {
        tracing::warn!("SIGNING_KEY not set, tokens will not survive a restart");
    }
    let rt = builder.build()?;

    let report = rt.load_all().await?;
    if report.total_invalid() > 0 {
        tracing::warn!(invalid = report.total_invalid(), "some stored records are not usable");
    }

    if let (Some(user), Some(pass)) = (&cfg.bootstrap_admin_user, &cfg.bootstrap_admin_password) {
        rt.bootstrap_admin(user, pass).await?;
    }

    tracing::info!(endpoint = rt.endpoint_id(), "runtime ready");
    Ok(())
}
