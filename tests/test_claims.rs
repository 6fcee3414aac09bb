//! Claim issuance and token sealing:
//! 1) Requested roles are granted only when a held role contains them.
//! 2) Self-service grants are always present.
//! 3) Changing a password rotates the secret and revokes older tokens.
//! 4) The longest configurable token lifetime still yields a valid expiry.

use provision_runtime::crypto::Pbkdf2Hasher;
use provision_runtime::domain::auth::MAX_TOKEN_TTL_SECS;
use provision_runtime::infra::RuntimeConfig;
use provision_runtime::{Action, MemoryStore, Role, RoleClaim, Runtime, RuntimeError, User};
use serde_json::json;
use std::sync::Arc;

fn runtime(store: Arc<MemoryStore>) -> Result<Runtime, Box<dyn std::error::Error>> {
    Ok(Runtime::builder(store)
        .hasher(Arc::new(Pbkdf2Hasher::new(10)))
        .signing_key("test-signing-key")
        .token_ttl(chrono::Duration::minutes(5))
        .build()?)
}

async fn seed(rt: &Runtime) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = rt.request_for(["roles", "users"]).await?;
    ctx.create(Box::new(Role::new(
        "admin",
        vec![
            RoleClaim::new("machines", "*", "*"),
            RoleClaim::new("users", "get", "*"),
        ],
    )))
    .await?;
    ctx.create(Box::new(Role::new("reader", vec![RoleClaim::new("machines", "get", "*")])))
        .await?;
    ctx.create(Box::new(Role::new(
        "writer",
        vec![
            RoleClaim::new("machines", "update", "*"),
            RoleClaim::new("bootenvs", "update", "*"),
        ],
    )))
    .await?;

    let mut fred = User::new("fred").with_roles(["admin"]);
    fred.set_password(ctx.hasher(), "first-password")?;
    ctx.create(Box::new(fred)).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_claims_follow_role_subsumption() -> Result<(), Box<dyn std::error::Error>> {
    let rt = runtime(Arc::new(MemoryStore::new()))?;
    seed(&rt).await?;
    let ctx = rt.request("users", Action::Actions).await?;

    let narrowed = ctx.gen_claim("fred", "system", &["reader"])?;
    assert_eq!(narrowed.roles, vec!["reader"]);
    assert!(narrowed.allows(&ctx, "machines", "get", "m1"));
    assert!(!narrowed.allows(&ctx, "machines", "update", "m1"));

    let refused = ctx.gen_claim("fred", "system", &["writer", "nosuch"])?;
    assert!(!refused.has_role("writer"));
    assert!(refused.roles.is_empty());

    let full = ctx.gen_claim("fred", "system", &[])?;
    assert_eq!(full.roles, vec!["admin"]);
    assert!(full.allows(&ctx, "machines", "delete", "m1"));

    for claim in [&narrowed, &refused, &full] {
        assert_eq!(claim.subject, "fred");
        assert_eq!(claim.grantor, "system");
        assert!(claim.allows(&ctx, "users", "password", "fred"));
        assert!(claim.allows(&ctx, "users", "token", "fred"));
        assert!(claim.allows(&ctx, "info", "get", ""));
        assert!(!claim.allows(&ctx, "users", "password", "barney"));
        assert_eq!(claim.expires_at - claim.issued_at, chrono::Duration::minutes(5));
    }

    assert!(matches!(
        ctx.gen_claim("nobody", "system", &[]),
        Err(RuntimeError::NotFound { .. })
    ));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_held_roles_are_reported() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(MemoryStore::new());
    store.insert_raw(
        "roles",
        "reader",
        &json!({ "Name": "reader", "Claims": [{ "Scope": "machines", "Action": "get", "Specific": "*" }] }),
    )?;
    store.insert_raw(
        "users",
        "fred",
        &json!({ "Name": "fred", "Roles": ["gone"], "Secret": "s" }),
    )?;
    let rt = runtime(store)?;
    let report = rt.load_all().await?;
    assert_eq!(report.kinds["users"].invalid, 1);

    let ctx = rt.request("users", Action::Actions).await?;
    let claim = ctx.gen_claim("fred", "system", &["reader"])?;
    assert!(!claim.has_role("reader"));
    assert_eq!(ctx.errors(), vec!["User fred has missing role gone".to_string()]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_password_change_revokes_tokens() -> Result<(), Box<dyn std::error::Error>> {
    let rt = runtime(Arc::new(MemoryStore::new()))?;
    seed(&rt).await?;
    let ctx = rt.request("users", Action::Actions).await?;

    let old_token = ctx.authenticate("fred", "first-password")?;
    let opened = ctx.open_claim(&old_token)?;
    assert_eq!(opened.subject, "fred");
    assert!(opened.has_role("admin"));

    let narrowed = ctx.gen_claim("fred", "system", &["reader"])?;
    let narrowed_token = ctx.seal_claim(&narrowed)?;
    assert_eq!(ctx.open_claim(&narrowed_token)?, narrowed);

    assert!(matches!(
        ctx.authenticate("fred", "wrong"),
        Err(RuntimeError::Unauthorized(_))
    ));

    let old_secret = ctx.find_as::<User>("users", "fred").expect("fred").secret;
    ctx.change_password("fred", "second-password").await?;
    let fred = ctx.find_as::<User>("users", "fred").expect("fred");
    assert_ne!(fred.secret, old_secret);
    assert!(fred.validation.useable());

    for token in [&old_token, &narrowed_token] {
        let err = ctx.open_claim(token).unwrap_err();
        assert_eq!(err.status_code(), 401);
    }
    assert!(ctx.authenticate("fred", "first-password").is_err());
    let new_token = ctx.authenticate("fred", "second-password")?;
    assert_eq!(ctx.open_claim(&new_token)?.subject, "fred");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_configured_token_lifetime_never_overflows() -> Result<(), Box<dyn std::error::Error>> {
    let lookup = |ttl: String| move |name: &str| (name == "TOKEN_TTL_SECS").then(|| ttl.clone());
    assert!(RuntimeConfig::from_lookup(lookup("10000000000000".into())).is_err());

    let cfg = RuntimeConfig::from_lookup(lookup(MAX_TOKEN_TTL_SECS.to_string()))?;
    let rt = Runtime::builder(Arc::new(MemoryStore::new()))
        .hasher(Arc::new(Pbkdf2Hasher::new(10)))
        .token_ttl(cfg.token_ttl())
        .build()?;
    seed(&rt).await?;

    let ctx = rt.request("users", Action::Actions).await?;
    let claim = ctx.gen_claim("fred", "system", &[])?;
    assert_eq!((claim.expires_at - claim.issued_at).num_seconds(), MAX_TOKEN_TTL_SECS);
    let token = ctx.authenticate("fred", "first-password")?;
    assert_eq!(ctx.open_claim(&token)?.subject, "fred");
    Ok(())
}
