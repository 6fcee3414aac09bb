//! Validation and lifecycle pipeline against the in-memory store:
//! 1) Wire round-trips keep fields and re-validate to the same violations.
//! 2) Foreign keys must exist and be available.
//! 3) Legacy records are normalized and written back exactly once.
//! 4) Deletes cascade into tenant membership and refuse dangling references.
//! 5) A stored delete stands even when its cascade cannot be saved.

use provision_runtime::crypto::Pbkdf2Hasher;
use provision_runtime::{
    Action, MemoryStore, Resource, Role, RoleClaim, Runtime, RuntimeError, Tenant, User,
};
use serde_json::json;
use std::sync::Arc;

fn runtime(store: Arc<MemoryStore>) -> Result<Runtime, Box<dyn std::error::Error>> {
    Ok(Runtime::builder(store)
        .endpoint_id("drp-test")
        .hasher(Arc::new(Pbkdf2Hasher::new(10)))
        .build()?)
}

fn reader() -> Role {
    Role::new("reader", vec![RoleClaim::new("machines", "get", "*")])
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wire_round_trip_revalidates_identically() -> Result<(), Box<dyn std::error::Error>> {
    let rt = runtime(Arc::new(MemoryStore::new()))?;
    let ctx = rt.request_for(["roles", "users"]).await?;
    ctx.create(Box::new(reader())).await?;
    let fred = ctx.create(Box::new(User::new("fred").with_roles(["reader"]))).await?;

    let wire = fred.to_json()?;
    assert_eq!(wire["Endpoint"], "drp-test");
    assert_eq!(wire["Validated"], true);
    let decoded = ctx.decode("users", wire.clone())?;
    assert_eq!(decoded.to_json()?, wire);

    // An invalid object keeps the same violation set across a round trip.
    let mut broken = ctx.decode("users", json!({ "Name": "barney", "Roles": ["ghost", "reader"] }))?;
    broken.validation_mut().clear();
    broken.validate(&ctx);
    let first = broken.validation().errors.clone();
    assert_eq!(first, vec!["roles ghost not found".to_string()]);

    let mut again = ctx.decode("users", broken.to_json()?)?;
    again.validation_mut().clear();
    again.validate(&ctx);
    assert_eq!(again.validation().errors, first);
    assert!(again.validation().validated);
    assert!(!again.validation().available);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_roles_must_exist_and_be_available() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(MemoryStore::new());
    // A stored role with an empty scope loads, but is not usable.
    store.insert_raw(
        "roles",
        "broken",
        &json!({ "Name": "broken", "Claims": [{ "Scope": "", "Action": "get" }] }),
    )?;
    let rt = runtime(store.clone())?;
    let report = rt.load_all().await?;
    assert_eq!(report.kinds["roles"].loaded, 1);
    assert_eq!(report.kinds["roles"].invalid, 1);

    let ctx = rt.request("users", Action::Create).await?;
    let broken = ctx.find("roles", "broken").expect("invalid records stay cached");
    assert!(!broken.validation().available);

    let err = ctx
        .create(Box::new(User::new("fred").with_roles(["broken", "ghost"])))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 422);
    assert_eq!(
        err.violations(),
        ["roles broken is not available", "roles ghost not found"]
    );
    assert_eq!(store.save_count("users", "fred"), 0);
    assert!(ctx.find("users", "fred").is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_legacy_user_is_resaved_once() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(MemoryStore::new());
    store.insert_raw(
        "roles",
        "reader",
        &json!({ "Name": "reader", "Claims": [{ "Scope": "machines", "Action": "get", "Specific": "*" }] }),
    )?;
    store.insert_raw("users", "legacy", &json!({ "Name": "legacy", "Roles": ["reader"] }))?;

    let first = runtime(store.clone())?;
    let report = first.load_all().await?;
    assert_eq!(report.kinds["users"].resaved, 1);
    assert_eq!(report.total_invalid(), 0);
    assert_eq!(store.save_count("users", "legacy"), 1);

    let stored = store.raw("users", "legacy").expect("record written back");
    let secret = stored["Secret"].as_str().unwrap_or_default().to_string();
    assert!(!secret.is_empty());
    assert!(stored.get("Validated").is_none());
    assert!(stored.get("Errors").is_none());

    {
        let ctx = first.request("users", Action::Get).await?;
        let cached = ctx.find_as::<User>("users", "legacy").expect("cached");
        assert!(cached.validation.useable());
        assert_eq!(cached.secret, secret);
    }

    let second = runtime(store.clone())?;
    let report = second.load_all().await?;
    assert_eq!(report.kinds["users"].resaved, 0);
    assert_eq!(store.save_count("users", "legacy"), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delete_cascades_into_tenant() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(MemoryStore::new());
    let rt = runtime(store.clone())?;
    {
        let ctx = rt.request_for(["roles", "users", "tenants"]).await?;
        ctx.create(Box::new(reader())).await?;
        ctx.create(Box::new(User::new("fred").with_roles(["reader"]))).await?;
        ctx.create(Box::new(User::new("barney"))).await?;
        ctx.create(Box::new(Tenant::new("acme", ["fred", "barney"]))).await?;

        let fred = ctx.find_as::<User>("users", "fred").expect("fred");
        assert_eq!(fred.tenant(&ctx).as_deref(), Some("acme"));

        // A user may only belong to one tenant.
        let err = ctx.create(Box::new(Tenant::new("initech", ["fred"]))).await.unwrap_err();
        assert_eq!(err.violations(), ["User fred is already a member of tenant acme"]);
    }

    {
        let ctx = rt.request("roles", Action::Delete).await?;
        let err = ctx.remove("roles", "reader").await.unwrap_err();
        assert_eq!(err.violations(), ["Role reader is in use by user fred"]);
    }

    {
        let ctx = rt.request("users", Action::Delete).await?;
        ctx.remove("users", "fred").await?;
        let acme = ctx.find_as::<Tenant>("tenants", "acme").expect("tenant survives");
        assert_eq!(acme.users, vec!["barney"]);
        assert!(matches!(
            ctx.remove("users", "fred").await,
            Err(RuntimeError::NotFound { .. })
        ));
    }
    assert_eq!(store.raw("tenants", "acme").expect("stored")["Users"], json!(["barney"]));
    assert!(store.raw("users", "fred").is_none());

    let ctx = rt.request("roles", Action::Delete).await?;
    ctx.remove("roles", "reader").await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delete_stands_when_cascade_cannot_save() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(MemoryStore::new());
    store.insert_raw("users", "fred", &json!({ "Name": "fred", "Secret": "s" }))?;
    // Loads as invalid: one member does not exist.
    store.insert_raw("tenants", "acme", &json!({ "Name": "acme", "Users": ["fred", "ghost"] }))?;
    let rt = runtime(store.clone())?;
    let report = rt.load_all().await?;
    assert_eq!(report.kinds["tenants"].invalid, 1);

    let ctx = rt.request("users", Action::Delete).await?;
    let removed = ctx.remove("users", "fred").await?;
    assert_eq!(removed.key(), "fred");
    assert!(store.raw("users", "fred").is_none());
    assert!(ctx.find("users", "fred").is_none());

    let errors = ctx.errors();
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert!(errors[0].starts_with("Unable to update tenants acme after deleting users fred"));
    assert_eq!(store.save_count("tenants", "acme"), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_read_only_and_lock_discipline() -> Result<(), Box<dyn std::error::Error>> {
    let rt = runtime(Arc::new(MemoryStore::new()))?;
    {
        let ctx = rt.request("roles", Action::Create).await?;
        let mut pinned = reader();
        pinned.read_only = true;
        ctx.create(Box::new(pinned)).await?;

        // Writes to a store this request did not lock are refused.
        let err = ctx.create(Box::new(User::new("fred"))).await.unwrap_err();
        assert!(matches!(err, RuntimeError::LockNotHeld { kind } if kind == "users"));
    }

    {
        let ctx = rt.request("roles", Action::Update).await?;
        let mut changed = reader();
        changed.description = "changed".into();
        assert!(matches!(
            ctx.update(Box::new(changed)).await,
            Err(RuntimeError::ReadOnly { .. })
        ));
        assert!(matches!(
            ctx.patch("roles", "reader", &json!({ "Description": "patched" })).await,
            Err(RuntimeError::ReadOnly { .. })
        ));
    }

    {
        let ctx = rt.request("roles", Action::Patch).await?.force_change();
        let patched = ctx
            .patch("roles", "reader", &json!({ "Description": "patched" }))
            .await?;
        assert!(patched.validation().change_forced());
        let role = ctx.find_as::<Role>("roles", "reader").expect("role");
        assert_eq!(role.description, "patched");
        assert!(role.read_only);
    }

    {
        let ctx = rt.request("roles", Action::Delete).await?;
        assert!(matches!(
            ctx.remove("roles", "reader").await,
            Err(RuntimeError::ReadOnly { .. })
        ));
    }
    let ctx = rt.request("roles", Action::Delete).await?.force_change();
    ctx.remove("roles", "reader").await?;
    assert!(ctx.items("roles").is_empty());
    Ok(())
}
