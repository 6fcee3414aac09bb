//! The shared data runtime.
//!
//! Owns one template and one in-memory item cache per resource kind, the
//! per-store lock manager and the collaborators (backing store, schema
//! evaluator, password hasher). Every operation goes through a
//! [`RequestContext`] obtained from [`Runtime::request`].

use crate::app::RequestContext;
use crate::crypto::{random_secret, PasswordHasher, Pbkdf2Hasher};
use crate::domain::auth::check_ttl;
use crate::domain::concurrency::LockManager;
use crate::domain::error::{RuntimeError, RuntimeResult};
use crate::domain::model::{
    storage_bytes, Action, JsonSchemaEvaluator, LoadOutcome, Param, RawModel, Resource, Role,
    RoleClaim, SchemaEvaluator, SchemaRegistry, Tenant, User,
};
use crate::storage::BackingStore;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Built-in kinds in load order. Tenants check their members, so users load first.
pub const BUILTIN_KINDS: [&str; 4] = ["params", "roles", "users", "tenants"];

/// Role created by [`Runtime::bootstrap_admin`].
pub const SUPERUSER_ROLE: &str = "superuser";

pub(crate) type ItemCache = RwLock<BTreeMap<String, Arc<dyn Resource>>>;

/// Per-kind result of [`Runtime::load_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KindReport {
    pub loaded: usize,
    pub resaved: usize,
    pub invalid: usize,
}

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub kinds: BTreeMap<String, KindReport>,
}

impl LoadReport {
    pub fn total_invalid(&self) -> usize {
        self.kinds.values().map(|k| k.invalid).sum()
    }
}

pub struct RuntimeBuilder {
    store: Arc<dyn BackingStore>,
    endpoint_id: String,
    schemas: Arc<SchemaRegistry>,
    evaluator: Arc<dyn SchemaEvaluator>,
    hasher: Arc<dyn PasswordHasher>,
    signing_key: Option<Vec<u8>>,
    token_ttl: chrono::Duration,
}

impl RuntimeBuilder {
    pub fn new(store: Arc<dyn BackingStore>) -> Self {
        Self {
            store,
            endpoint_id: "local-endpoint".to_string(),
            schemas: SchemaRegistry::new().freeze(),
            evaluator: Arc::new(JsonSchemaEvaluator),
            hasher: Arc::new(Pbkdf2Hasher::default()),
            signing_key: None,
            token_ttl: chrono::Duration::hours(1),
        }
    }

    pub fn endpoint_id(mut self, id: impl Into<String>) -> Self {
        self.endpoint_id = id.into();
        self
    }

    pub fn schemas(mut self, schemas: Arc<SchemaRegistry>) -> Self {
        self.schemas = schemas;
        self
    }

    pub fn evaluator(mut self, evaluator: Arc<dyn SchemaEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn hasher(mut self, hasher: Arc<dyn PasswordHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Key all tokens are sealed with. A random one is generated if unset,
    /// so tokens then do not survive a restart.
    pub fn signing_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.signing_key = Some(key.into());
        self
    }

    pub fn token_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Registers the built-in kinds plus one schema-defined kind per registered schema.
    pub fn build(self) -> RuntimeResult<Runtime> {
        check_ttl(self.token_ttl)?;
        let mut templates: Vec<Arc<dyn Resource>> = vec![
            Arc::new(Param::default()),
            Arc::new(Role::default()),
            Arc::new(User::default()),
            Arc::new(Tenant::default()),
        ];
        for prefix in self.schemas.prefixes() {
            if BUILTIN_KINDS.contains(&prefix.as_str()) {
                return Err(RuntimeError::Conflict {
                    kind: "kinds".into(),
                    key: prefix,
                });
            }
            let schema = self.schemas.get(&prefix);
            templates.push(Arc::new(RawModel::blank(prefix, schema)));
        }

        let mut locks = LockManager::new();
        let mut kinds = Vec::with_capacity(templates.len());
        let mut template_map = BTreeMap::new();
        let mut caches = BTreeMap::new();
        for t in templates {
            let prefix = t.prefix().to_string();
            locks.register(prefix.as_str());
            kinds.push(prefix.clone());
            caches.insert(prefix.clone(), ItemCache::default());
            template_map.insert(prefix, t);
        }

        let signing_key = self
            .signing_key
            .unwrap_or_else(|| random_secret(32).into_bytes());
        Ok(Runtime {
            store: self.store,
            kinds,
            templates: template_map,
            caches,
            locks,
            schemas: self.schemas,
            evaluator: self.evaluator,
            hasher: self.hasher,
            endpoint_id: self.endpoint_id,
            signing_key,
            token_ttl: self.token_ttl,
        })
    }
}

pub struct Runtime {
    pub(crate) store: Arc<dyn BackingStore>,
    kinds: Vec<String>,
    pub(crate) templates: BTreeMap<String, Arc<dyn Resource>>,
    pub(crate) caches: BTreeMap<String, ItemCache>,
    locks: LockManager,
    schemas: Arc<SchemaRegistry>,
    pub(crate) evaluator: Arc<dyn SchemaEvaluator>,
    pub(crate) hasher: Arc<dyn PasswordHasher>,
    pub(crate) endpoint_id: String,
    pub(crate) signing_key: Vec<u8>,
    pub(crate) token_ttl: chrono::Duration,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("endpoint_id", &self.endpoint_id)
            .field("kinds", &self.kinds)
            .finish()
    }
}

impl Runtime {
    pub fn builder(store: Arc<dyn BackingStore>) -> RuntimeBuilder {
        RuntimeBuilder::new(store)
    }

    /// Registered kinds in load order.
    pub fn kinds(&self) -> &[String] {
        &self.kinds
    }

    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub(crate) fn template(&self, kind: &str) -> RuntimeResult<&Arc<dyn Resource>> {
        self.templates
            .get(kind)
            .ok_or_else(|| RuntimeError::UnknownKind(kind.to_string()))
    }

    /// Stores that `action` on `kind` must lock, in acquisition order.
    pub fn locks_for(&self, kind: &str, action: Action) -> RuntimeResult<Vec<String>> {
        let template = self.template(kind)?;
        Ok(LockManager::acquisition_order(template.locks(action)))
    }

    /// Opens a request holding every lock `action` on `kind` needs.
    pub async fn request(&self, kind: &str, action: Action) -> RuntimeResult<RequestContext<'_>> {
        let names = self.locks_for(kind, action)?;
        tracing::debug!(kind, action = %action, locks = ?names, "opening request");
        self.request_for(names).await
    }

    /// Opens a request holding the named store locks.
    pub async fn request_for<I, S>(&self, names: I) -> RuntimeResult<RequestContext<'_>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let locks = self.locks.acquire(names).await?;
        Ok(RequestContext::new(self, locks))
    }

    /// Loads every store into memory in dependency order.
    ///
    /// Records that fail validation stay cached but unusable; legacy records
    /// whose load hook backfilled defaults are written back once.
    pub async fn load_all(&self) -> RuntimeResult<LoadReport> {
        let ctx = self.request_for(self.kinds.clone()).await?;
        let mut report = LoadReport::default();
        for kind in &self.kinds {
            let kr = self.load_kind(&ctx, kind).await?;
            tracing::info!(
                kind = kind.as_str(),
                loaded = kr.loaded,
                resaved = kr.resaved,
                invalid = kr.invalid,
                "loaded store"
            );
            report.kinds.insert(kind.clone(), kr);
        }
        Ok(report)
    }

    async fn load_kind(&self, ctx: &RequestContext<'_>, kind: &str) -> RuntimeResult<KindReport> {
        let mut kr = KindReport::default();
        let template = self.template(kind)?.clone();
        for (key, bytes) in self.store.items(kind).await? {
            let mut obj = template.new_blank();
            let decoded = serde_json::from_slice(&bytes)
                .map_err(RuntimeError::from)
                .and_then(|value| obj.load_json(value));
            if let Err(e) = decoded {
                kr.invalid += 1;
                tracing::warn!(kind, key = key.as_str(), error = %e, "skipping undecodable record");
                continue;
            }
            match obj.on_load(ctx) {
                Ok(LoadOutcome::Clean) => {}
                Ok(LoadOutcome::Resave) => {
                    let saved = obj.validation_mut().save();
                    self.store.save(kind, &key, &storage_bytes(obj.as_ref())?).await?;
                    obj.validation_mut().restore(saved);
                    kr.resaved += 1;
                    tracing::info!(kind, key = key.as_str(), "resaved normalized record");
                }
                Err(e) => {
                    kr.invalid += 1;
                    tracing::warn!(kind, key = key.as_str(), error = %e, "stored record is not usable");
                }
            }
            ctx.cache_insert(kind, Arc::from(obj));
            kr.loaded += 1;
        }
        Ok(kr)
    }

    /// Creates a `superuser` role and an admin user holding it, unless any user exists.
    ///
    /// Returns whether anything was created.
    pub async fn bootstrap_admin(&self, name: &str, password: &str) -> RuntimeResult<bool> {
        let ctx = self.request_for(["roles", "users"]).await?;
        if !ctx.items("users").is_empty() {
            return Ok(false);
        }
        if ctx.find("roles", SUPERUSER_ROLE).is_none() {
            let role = Role::new(SUPERUSER_ROLE, vec![RoleClaim::new("*", "*", "*")]);
            ctx.create(Box::new(role)).await?;
        }
        let mut admin = User::new(name).with_roles([SUPERUSER_ROLE]);
        admin.set_password(self.hasher.as_ref(), password)?;
        ctx.create(Box::new(admin)).await?;
        tracing::info!(user = name, "bootstrapped admin user");
        Ok(true)
    }
}
