//! Capability claims issued to users.

use crate::app::RequestContext;
use crate::domain::error::{RuntimeError, RuntimeResult};
use crate::domain::model::{downcast, Role, RoleClaim};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A time-boxed grant set derived from a user's roles. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Claim {
    pub subject: String,
    pub grantor: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Raw grants that hold regardless of roles.
    #[serde(default)]
    pub grants: Vec<RoleClaim>,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Longest lifetime a claim may be issued for (ten years).
pub const MAX_TOKEN_TTL_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Checks that `ttl` is positive and within [`MAX_TOKEN_TTL_SECS`].
pub fn check_ttl(ttl: Duration) -> RuntimeResult<()> {
    if ttl <= Duration::zero() || ttl.num_seconds() > MAX_TOKEN_TTL_SECS {
        return Err(RuntimeError::Config(format!(
            "token lifetime of {}s must be between 1s and {MAX_TOKEN_TTL_SECS}s",
            ttl.num_seconds()
        )));
    }
    Ok(())
}

impl Claim {
    /// Fails when the expiry falls outside the representable date range.
    pub fn new(subject: impl Into<String>, grantor: impl Into<String>, ttl: Duration) -> RuntimeResult<Self> {
        let issued_at = Utc::now();
        let expires_at = issued_at.checked_add_signed(ttl).ok_or_else(|| {
            RuntimeError::Config(format!("token lifetime of {}s overflows the expiry", ttl.num_seconds()))
        })?;
        Ok(Self {
            subject: subject.into(),
            grantor: grantor.into(),
            issued_at,
            expires_at,
            grants: Vec::new(),
            roles: Vec::new(),
        })
    }

    pub fn add_raw_claim(&mut self, scope: &str, action: &str, specific: &str) -> &mut Self {
        self.grants.push(RoleClaim::new(scope, action, specific));
        self
    }

    /// Adds role names, skipping any already present.
    pub fn add_roles<I>(&mut self, roles: I) -> &mut Self
    where
        I: IntoIterator<Item = String>,
    {
        for r in roles {
            if !self.roles.contains(&r) {
                self.roles.push(r);
            }
        }
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// True if a raw grant or a still-existing granted role permits the action.
    pub fn allows(&self, ctx: &RequestContext<'_>, scope: &str, action: &str, specific: &str) -> bool {
        if self.grants.iter().any(|g| g.allows(scope, action, specific)) {
            return true;
        }
        self.roles.iter().any(|name| {
            ctx.find("roles", name)
                .as_deref()
                .and_then(downcast::<Role>)
                .is_some_and(|role| role.claims.iter().any(|c| c.allows(scope, action, specific)))
        })
    }
}
