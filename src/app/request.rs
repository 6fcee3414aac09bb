//! Per-request handle onto the runtime.
//!
//! A [`RequestContext`] holds the locks its action declared for as long as it
//! lives. Lifecycle hooks receive it by reference and never keep it.

use crate::app::runtime::Runtime;
use crate::crypto::{token, PasswordHasher};
use crate::domain::auth::Claim;
use crate::domain::concurrency::LockSet;
use crate::domain::error::{RuntimeError, RuntimeResult};
use crate::domain::index::{self, Filter, Index, QueryOptions};
use crate::domain::model::{
    downcast, storage_bytes, LifecycleState, Resource, SchemaEvaluator, User, VALIDATION_FIELDS,
};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct RequestContext<'rt> {
    rt: &'rt Runtime,
    locks: LockSet,
    errors: Mutex<Vec<String>>,
    forced: bool,
}

/// RFC 7386 merge patch.
fn merge_patch(target: &mut JsonValue, patch: &JsonValue) {
    let JsonValue::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = JsonValue::Object(serde_json::Map::new());
    }
    if let JsonValue::Object(obj) = target {
        for (k, v) in patch {
            if v.is_null() {
                obj.remove(k);
            } else {
                merge_patch(obj.entry(k.as_str()).or_insert(JsonValue::Null), v);
            }
        }
    }
}

impl<'rt> RequestContext<'rt> {
    pub(crate) fn new(rt: &'rt Runtime, locks: LockSet) -> Self {
        Self {
            rt,
            locks,
            errors: Mutex::new(Vec::new()),
            forced: false,
        }
    }

    /// Objects built by this request carry the force-change flag, which lets
    /// them replace or remove read-only objects.
    pub fn force_change(mut self) -> Self {
        self.forced = true;
        self
    }

    pub fn locks(&self) -> &[String] {
        self.locks.names()
    }

    pub fn endpoint_id(&self) -> &str {
        &self.rt.endpoint_id
    }

    pub fn evaluator(&self) -> Arc<dyn SchemaEvaluator> {
        self.rt.evaluator.clone()
    }

    pub fn hasher(&self) -> &dyn PasswordHasher {
        self.rt.hasher.as_ref()
    }

    /// Records an inconsistency found outside any object's validation.
    pub fn errorf(&self, msg: impl Into<String>) {
        let msg = msg.into();
        tracing::warn!(error = msg.as_str(), "request inconsistency");
        self.errors.lock().push(msg);
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    pub fn find(&self, kind: &str, key: &str) -> Option<Arc<dyn Resource>> {
        self.rt.caches.get(kind)?.read().get(key).cloned()
    }

    /// Owned copy of a cached object of concrete type `T`.
    pub fn find_as<T: Resource + Clone>(&self, kind: &str, key: &str) -> Option<T> {
        let obj = self.find(kind, key)?;
        downcast::<T>(obj.as_ref()).cloned()
    }

    /// Live objects of `kind`, ordered by key.
    pub fn items(&self, kind: &str) -> Vec<Arc<dyn Resource>> {
        self.rt
            .caches
            .get(kind)
            .map(|c| c.read().values().cloned().collect())
            .unwrap_or_default()
    }

    /// Blank object of `kind`.
    pub fn new_object(&self, kind: &str) -> RuntimeResult<Box<dyn Resource>> {
        let mut obj = self.rt.template(kind)?.new_blank();
        if self.forced {
            obj.validation_mut().force_change();
        }
        Ok(obj)
    }

    /// Decodes a wire payload into a new object of `kind`.
    pub fn decode(&self, kind: &str, value: JsonValue) -> RuntimeResult<Box<dyn Resource>> {
        let mut obj = self.new_object(kind)?;
        obj.load_json(value)?;
        Ok(obj)
    }

    pub fn indexes(&self, kind: &str) -> RuntimeResult<BTreeMap<String, Index>> {
        Ok(self.rt.template(kind)?.indexes())
    }

    pub fn parameter_index(&self, kind: &str, parameter: &str) -> RuntimeResult<Index> {
        let template = self.rt.template(kind)?.clone();
        index::parameter_index(self, template.as_ref(), parameter)
    }

    /// Filters and orders the live objects of `kind`.
    ///
    /// A field that is not one of the kind's indexes is looked up as a parameter.
    pub fn query(
        &self,
        kind: &str,
        filters: &[(String, Filter)],
        options: &QueryOptions,
    ) -> RuntimeResult<Vec<Arc<dyn Resource>>> {
        let mut indexes = self.indexes(kind)?;
        let wanted = filters
            .iter()
            .map(|(f, _)| f.as_str())
            .chain(options.sort.as_deref());
        for field in wanted {
            if !indexes.contains_key(field) {
                let idx = self.parameter_index(kind, field)?;
                indexes.insert(field.to_string(), idx);
            }
        }
        index::query(&indexes, self.items(kind), filters, options)
    }

    fn require_lock(&self, kind: &str) -> RuntimeResult<()> {
        if self.locks.holds(kind) {
            Ok(())
        } else {
            Err(RuntimeError::LockNotHeld { kind: kind.to_string() })
        }
    }

    pub(crate) fn cache_insert(&self, kind: &str, obj: Arc<dyn Resource>) {
        if let Some(cache) = self.rt.caches.get(kind) {
            cache.write().insert(obj.key(), obj);
        }
    }

    fn cache_remove(&self, kind: &str, key: &str) {
        if let Some(cache) = self.rt.caches.get(kind) {
            cache.write().remove(key);
        }
    }

    /// Validates and writes `obj`, then replaces the cached copy.
    async fn persist(&self, mut obj: Box<dyn Resource>) -> RuntimeResult<Arc<dyn Resource>> {
        let kind = obj.prefix().to_string();
        self.require_lock(&kind)?;
        if let Err(e) = obj.before_save(self) {
            obj.validation_mut().mark(LifecycleState::Rejected);
            tracing::debug!(kind = kind.as_str(), key = obj.key().as_str(), error = %e, "save rejected");
            return Err(e);
        }
        let key = obj.key();
        self.rt.store.save(&kind, &key, &storage_bytes(obj.as_ref())?).await?;
        obj.validation_mut().mark(LifecycleState::Saved);
        let obj: Arc<dyn Resource> = Arc::from(obj);
        self.cache_insert(&kind, obj.clone());
        tracing::debug!(kind = kind.as_str(), key = key.as_str(), "saved");
        Ok(obj)
    }

    fn check_writable(&self, existing: &dyn Resource, incoming: &dyn Resource) -> RuntimeResult<()> {
        if existing.read_only() && !incoming.validation().change_forced() {
            return Err(RuntimeError::ReadOnly {
                kind: existing.prefix().to_string(),
                key: existing.key(),
            });
        }
        Ok(())
    }

    pub async fn create(&self, obj: Box<dyn Resource>) -> RuntimeResult<Arc<dyn Resource>> {
        let kind = obj.prefix().to_string();
        self.require_lock(&kind)?;
        let key = obj.key();
        if self.find(&kind, &key).is_some() {
            return Err(RuntimeError::Conflict { kind, key });
        }
        self.persist(obj).await
    }

    /// Replaces an existing object.
    pub async fn update(&self, obj: Box<dyn Resource>) -> RuntimeResult<Arc<dyn Resource>> {
        let kind = obj.prefix().to_string();
        self.require_lock(&kind)?;
        let key = obj.key();
        let existing = self
            .find(&kind, &key)
            .ok_or_else(|| RuntimeError::not_found(kind.as_str(), key.as_str()))?;
        self.check_writable(existing.as_ref(), obj.as_ref())?;
        self.persist(obj).await
    }

    /// Creates or replaces.
    pub async fn save(&self, obj: Box<dyn Resource>) -> RuntimeResult<Arc<dyn Resource>> {
        if let Some(existing) = self.find(obj.prefix(), &obj.key()) {
            self.check_writable(existing.as_ref(), obj.as_ref())?;
        }
        self.persist(obj).await
    }

    /// Applies a JSON merge patch to the wire form of an existing object.
    pub async fn patch(&self, kind: &str, key: &str, patch: &JsonValue) -> RuntimeResult<Arc<dyn Resource>> {
        let existing = self
            .find(kind, key)
            .ok_or_else(|| RuntimeError::not_found(kind, key))?;
        let mut value = existing.to_json()?;
        merge_patch(&mut value, patch);
        if let Some(obj) = value.as_object_mut() {
            for field in VALIDATION_FIELDS {
                obj.remove(field);
            }
        }
        let obj = self.decode(kind, value)?;
        if obj.key() != key {
            return Err(RuntimeError::parse("Key", obj.key(), format!("patch may not rename {key}")));
        }
        self.update(obj).await
    }

    /// Deletes an object and persists the follow-up updates its delete hook asks for.
    ///
    /// Once the delete is stored it stands: a follow-up that fails to save is
    /// recorded on [`RequestContext::errors`] and does not fail the call.
    pub async fn remove(&self, kind: &str, key: &str) -> RuntimeResult<Arc<dyn Resource>> {
        self.require_lock(kind)?;
        let existing = self
            .find(kind, key)
            .ok_or_else(|| RuntimeError::not_found(kind, key))?;
        if existing.read_only() && !self.forced {
            return Err(RuntimeError::ReadOnly {
                kind: kind.to_string(),
                key: key.to_string(),
            });
        }
        existing.before_delete(self)?;
        self.rt.store.delete(kind, key).await?;
        self.cache_remove(kind, key);
        tracing::debug!(kind, key, "deleted");
        for follow_up in existing.after_delete(self) {
            let (fkind, fkey) = (follow_up.prefix().to_string(), follow_up.key());
            if let Err(e) = self.persist(follow_up).await {
                self.errorf(format!("Unable to update {fkind} {fkey} after deleting {kind} {key}: {e}"));
            }
        }
        Ok(existing)
    }

    fn user(&self, name: &str) -> RuntimeResult<User> {
        self.find_as::<User>("users", name)
            .ok_or_else(|| RuntimeError::not_found("users", name))
    }

    /// Sets a new password, rotating the user's secret.
    ///
    /// Every token sealed before this call stops opening.
    pub async fn change_password(&self, name: &str, new_pass: &str) -> RuntimeResult<()> {
        let mut user = self.user(name)?;
        user.set_password(self.hasher(), new_pass)?;
        self.persist(Box::new(user)).await?;
        tracing::info!(user = name, "password changed");
        Ok(())
    }

    /// Claim for `subject`, restricted to `wanted` roles when any are given.
    pub fn gen_claim(&self, subject: &str, grantor: &str, wanted: &[&str]) -> RuntimeResult<Claim> {
        let user = self.user(subject)?;
        user.gen_claim(self, grantor, self.rt.token_ttl, wanted)
    }

    pub fn seal_claim(&self, claim: &Claim) -> RuntimeResult<String> {
        let user = self.user(&claim.subject)?;
        token::seal(claim, &self.rt.signing_key, &user.secret)
    }

    /// Opens a token against its subject's current secret.
    pub fn open_claim(&self, sealed: &str) -> RuntimeResult<Claim> {
        let subject = token::peek(sealed)?.subject;
        let user = self
            .find_as::<User>("users", &subject)
            .ok_or_else(|| RuntimeError::Unauthorized(format!("unknown user {subject}")))?;
        token::open(sealed, &self.rt.signing_key, &user.secret, chrono::Utc::now())
    }

    /// Checks a password and returns a sealed token for every role the user holds.
    pub fn authenticate(&self, name: &str, password: &str) -> RuntimeResult<String> {
        let user = self
            .find_as::<User>("users", name)
            .filter(|u| u.check_password(self.hasher(), password))
            .ok_or_else(|| RuntimeError::Unauthorized(format!("bad credentials for {name}")))?;
        let claim = user.gen_claim(self, self.endpoint_id(), self.rt.token_ttl, &[])?;
        token::seal(&claim, &self.rt.signing_key, &user.secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_patch_follows_rfc7386() {
        let mut doc = json!({ "a": "b", "c": { "d": "e", "f": "g" } });
        merge_patch(&mut doc, &json!({ "a": "z", "c": { "f": null } }));
        assert_eq!(doc, json!({ "a": "z", "c": { "d": "e" } }));

        let mut doc = json!({ "a": [1, 2] });
        merge_patch(&mut doc, &json!({ "a": [3] }));
        assert_eq!(doc, json!({ "a": [3] }));
    }
}
