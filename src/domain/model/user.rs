//! User resource: an API user of the provisioning service.

use crate::app::RequestContext;
use crate::crypto::hashing::{random_secret, PasswordHasher, SECRET_LEN};
use crate::domain::auth::Claim;
use crate::domain::error::{RuntimeError, RuntimeResult};
use crate::domain::index::{check_unique, make_base_indexes, Index};
use crate::domain::model::{
    decode_structured, downcast, Action, LoadOutcome, Resource, Role, Tenant, Validation,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct User {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Rotated on every password change; tokens sealed against an older value stop opening.
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub password_hash: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub read_only: bool,
    #[serde(flatten)]
    pub validation: Validation,
}

fn as_user(r: &dyn Resource) -> Option<&User> {
    downcast::<User>(r)
}

impl User {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Wire form with credentials removed.
    pub fn sanitized(&self) -> RuntimeResult<JsonValue> {
        let mut value = serde_json::to_value(self)?;
        if let Some(obj) = value.as_object_mut() {
            obj.remove("Secret");
            obj.remove("PasswordHash");
        }
        Ok(value)
    }

    /// The tenant listing this user, if any. Tenants own the membership.
    pub fn tenant(&self, ctx: &RequestContext<'_>) -> Option<String> {
        ctx.items("tenants")
            .iter()
            .filter_map(|t| downcast::<Tenant>(t.as_ref()))
            .find(|t| t.users.iter().any(|u| u == &self.name))
            .map(|t| t.name.clone())
    }

    /// Hashes `new_pass` and rotates the secret, invalidating previously issued tokens.
    ///
    /// The caller persists the change.
    pub fn set_password(&mut self, hasher: &dyn PasswordHasher, new_pass: &str) -> RuntimeResult<()> {
        self.password_hash = hasher.derive(new_pass)?;
        self.secret = random_secret(SECRET_LEN);
        Ok(())
    }

    pub fn check_password(&self, hasher: &dyn PasswordHasher, pass: &str) -> bool {
        !self.password_hash.is_empty() && hasher.compare(&self.password_hash, pass)
    }

    /// Builds a claim for this user, granted by `grantor` for `ttl`.
    ///
    /// With no wanted roles every held role is granted. Otherwise a wanted role
    /// is granted only when some held role contains it.
    pub fn gen_claim(
        &self,
        ctx: &RequestContext<'_>,
        grantor: &str,
        ttl: chrono::Duration,
        wanted_roles: &[&str],
    ) -> RuntimeResult<Claim> {
        let mut claim = Claim::new(&self.name, grantor, ttl)?;
        // Users always have the right to get a token and change their password.
        claim.add_raw_claim("users", "token,password,get", &self.name);
        claim.add_raw_claim("info", "get", "");
        if wanted_roles.is_empty() {
            claim.add_roles(self.roles.iter().cloned());
            return Ok(claim);
        }

        let mut have_roles: Vec<Arc<dyn Resource>> = Vec::new();
        for r in &self.roles {
            match ctx.find("roles", r) {
                Some(robj) => have_roles.push(robj),
                None => ctx.errorf(format!("User {} has missing role {}", self.name, r)),
            }
        }

        for wanted in wanted_roles {
            let r = wanted.trim();
            let Some(robj) = ctx.find("roles", r) else {
                continue;
            };
            let Some(role) = downcast::<Role>(robj.as_ref()) else {
                continue;
            };
            let granted = have_roles
                .iter()
                .filter_map(|h| downcast::<Role>(h.as_ref()))
                .any(|held| held.contains(role));
            if granted {
                claim.add_roles([r.to_string()]);
            }
        }
        Ok(claim)
    }
}

impl Resource for User {
    fn prefix(&self) -> &str {
        "users"
    }

    fn key(&self) -> String {
        self.name.clone()
    }

    fn set_key(&mut self, key: &str) {
        self.name = key.to_string();
    }

    fn validation(&self) -> &Validation {
        &self.validation
    }

    fn validation_mut(&mut self) -> &mut Validation {
        &mut self.validation
    }

    fn read_only(&self) -> bool {
        self.read_only
    }

    fn fill(&mut self, ctx: &RequestContext<'_>) {
        if self.endpoint.is_empty() {
            self.endpoint = ctx.endpoint_id().to_string();
        }
        if self.secret.is_empty() {
            self.secret = random_secret(SECRET_LEN);
        }
    }

    fn validate(&mut self, ctx: &RequestContext<'_>) {
        if self.name.is_empty() {
            self.validation.add_error("Name must not be empty");
        } else if self.name.contains('/') || self.name.chars().any(char::is_whitespace) {
            self.validation
                .add_error(format!("Name {:?} contains invalid characters", self.name));
        }
        for err in check_unique(&*self, &ctx.items("users")) {
            self.validation.add_error(err);
        }
        self.validation.set_valid();
        for r_name in &self.roles {
            match ctx.find("roles", r_name) {
                None => self.validation.add_error(RuntimeError::not_found("roles", r_name.as_str())),
                Some(r) => {
                    if !r.validation().available {
                        self.validation.add_error(RuntimeError::Consistency {
                            kind: "roles".into(),
                            key: r_name.clone(),
                        });
                    }
                }
            }
        }
        self.validation.set_available();
    }

    fn locks(&self, action: Action) -> Vec<String> {
        let names: &[&str] = match action {
            Action::Get | Action::Create | Action::Update | Action::Patch => &["users", "roles"],
            Action::Delete => &["users", "tenants"],
            Action::Actions => &["users", "roles", "params"],
        };
        names.iter().map(|s| s.to_string()).collect()
    }

    fn new_blank(&self) -> Box<dyn Resource> {
        Box::new(User {
            validation: self.validation.inherit(),
            ..User::default()
        })
    }

    fn indexes(&self) -> BTreeMap<String, Index> {
        let mut res = make_base_indexes(self);
        let template: Arc<dyn Resource> = Arc::from(self.new_blank());
        res.insert(
            "Name".to_string(),
            Index::string(
                true,
                template,
                |r| as_user(r).map(|u| u.name.clone()).unwrap_or_default(),
                |r, s| r.set_key(s),
            ),
        );
        res
    }

    fn to_json(&self) -> RuntimeResult<JsonValue> {
        Ok(serde_json::to_value(self)?)
    }

    fn load_json(&mut self, value: JsonValue) -> RuntimeResult<()> {
        *self = decode_structured(&self.validation, value)?;
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Resource> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    // Records written before secrets existed get one here and are persisted once.
    fn on_load(&mut self, ctx: &RequestContext<'_>) -> RuntimeResult<LoadOutcome> {
        let must_save = self.secret.is_empty();
        self.before_save(ctx)?;
        Ok(if must_save {
            LoadOutcome::Resave
        } else {
            LoadOutcome::Clean
        })
    }

    fn after_delete(&self, ctx: &RequestContext<'_>) -> Vec<Box<dyn Resource>> {
        let Some(tenant_name) = self.tenant(ctx) else {
            return Vec::new();
        };
        let Some(obj) = ctx.find("tenants", &tenant_name) else {
            return Vec::new();
        };
        let Some(tenant) = downcast::<Tenant>(obj.as_ref()) else {
            return Vec::new();
        };
        let mut tenant = tenant.clone();
        tenant.users.retain(|name| name != &self.name);
        vec![Box::new(tenant)]
    }
}
