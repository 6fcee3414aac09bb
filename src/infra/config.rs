//! Centralized configuration (environment variables + defaults).

use crate::domain::auth::MAX_TOKEN_TTL_SECS;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;

/// Process-wide settings read once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Identity stamped into objects' `Endpoint` field.
    pub endpoint_id: String,
    /// PostgreSQL backing store; the in-memory store is used when unset.
    pub database_url: Option<String>,
    /// Directory of `<prefix>.json` schema documents.
    pub schema_dir: Option<PathBuf>,
    pub token_ttl_secs: i64,
    pub password_hash_iterations: u32,
    pub signing_key: Option<String>,
    pub bootstrap_admin_user: Option<String>,
    pub bootstrap_admin_password: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            endpoint_id: "local-endpoint".to_string(),
            database_url: None,
            schema_dir: None,
            token_ttl_secs: 3600,
            password_hash_iterations: 100_000,
            signing_key: None,
            bootstrap_admin_user: None,
            bootstrap_admin_password: None,
        }
    }
}

fn optional(name: &str, lookup: &impl Fn(&str) -> Option<String>) -> Option<String> {
    lookup(name).filter(|v| !v.trim().is_empty())
}

fn number<T>(name: &str, default: T, lookup: &impl Fn(&str) -> Option<String>) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(name, lookup) {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse::<T>()
            .with_context(|| format!("{name} must be a valid number, got {v:?}")),
    }
}

impl RuntimeConfig {
    /// Reads the configuration from the process environment, after loading `.env`.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`. Unparsable numbers are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let cfg = Self {
            endpoint_id: optional("ENDPOINT_ID", &lookup).unwrap_or(defaults.endpoint_id),
            database_url: optional("DATABASE_URL", &lookup),
            schema_dir: optional("SCHEMA_DIR", &lookup).map(PathBuf::from),
            token_ttl_secs: number("TOKEN_TTL_SECS", defaults.token_ttl_secs, &lookup)?,
            password_hash_iterations: number(
                "PASSWORD_HASH_ITERATIONS",
                defaults.password_hash_iterations,
                &lookup,
            )?,
            signing_key: optional("SIGNING_KEY", &lookup),
            bootstrap_admin_user: optional("BOOTSTRAP_ADMIN_USER", &lookup),
            bootstrap_admin_password: optional("BOOTSTRAP_ADMIN_PASSWORD", &lookup),
        };
        if cfg.token_ttl_secs <= 0 || cfg.token_ttl_secs > MAX_TOKEN_TTL_SECS {
            anyhow::bail!("TOKEN_TTL_SECS must be between 1 and {MAX_TOKEN_TTL_SECS}");
        }
        if cfg.bootstrap_admin_user.is_some() != cfg.bootstrap_admin_password.is_some() {
            anyhow::bail!("BOOTSTRAP_ADMIN_USER and BOOTSTRAP_ADMIN_PASSWORD must be set together");
        }
        Ok(cfg)
    }

    /// Token lifetime, clamped into the accepted range.
    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_ttl_secs.clamp(1, MAX_TOKEN_TTL_SECS))
    }
}
