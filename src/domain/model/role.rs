//! Role resource: a named permission scope.

use crate::app::RequestContext;
use crate::domain::error::{RuntimeError, RuntimeResult};
use crate::domain::index::{check_unique, make_base_indexes, Index};
use crate::domain::model::{decode_structured, downcast, Action, Resource, User, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// One grant: `Action` verbs (comma separated) on `Scope` objects matching `Specific`.
///
/// `*` in any position matches everything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoleClaim {
    pub scope: String,
    pub action: String,
    #[serde(default)]
    pub specific: String,
}

impl RoleClaim {
    pub fn new(scope: impl Into<String>, action: impl Into<String>, specific: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            action: action.into(),
            specific: specific.into(),
        }
    }

    fn actions(&self) -> BTreeSet<&str> {
        self.action
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .collect()
    }

    /// True if everything `other` grants is also granted by this claim.
    pub fn contains(&self, other: &RoleClaim) -> bool {
        if self.scope != "*" && self.scope != other.scope {
            return false;
        }
        if self.specific != "*" && self.specific != other.specific {
            return false;
        }
        let mine = self.actions();
        if mine.contains("*") {
            return true;
        }
        let theirs = other.actions();
        !theirs.contains("*") && theirs.is_subset(&mine)
    }

    /// True if this claim grants `action` on `scope`/`specific`.
    pub fn allows(&self, scope: &str, action: &str, specific: &str) -> bool {
        self.contains(&RoleClaim::new(scope, action, specific))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Role {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub claims: Vec<RoleClaim>,
    #[serde(default)]
    pub read_only: bool,
    #[serde(flatten)]
    pub validation: Validation,
}

impl Role {
    pub fn new(name: impl Into<String>, claims: Vec<RoleClaim>) -> Self {
        Self {
            name: name.into(),
            claims,
            ..Self::default()
        }
    }

    /// True if every claim of `other` is covered by some claim of this role.
    pub fn contains(&self, other: &Role) -> bool {
        other
            .claims
            .iter()
            .all(|theirs| self.claims.iter().any(|mine| mine.contains(theirs)))
    }
}

fn as_role(r: &dyn Resource) -> Option<&Role> {
    downcast::<Role>(r)
}

impl Resource for Role {
    fn prefix(&self) -> &str {
        "roles"
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

    fn validate(&mut self, ctx: &RequestContext<'_>) {
        if self.name.trim().is_empty() {
            self.validation.add_error("Name must not be empty");
        }
        for (i, claim) in self.claims.iter().enumerate() {
            if claim.scope.trim().is_empty() {
                self.validation.add_error(format!("Claim {} has an empty Scope", i));
            }
            if claim.actions().is_empty() {
                self.validation.add_error(format!("Claim {} has an empty Action", i));
            }
        }
        for err in check_unique(&*self, &ctx.items("roles")) {
            self.validation.add_error(err);
        }
        self.validation.set_valid();
        self.validation.set_available();
    }

    fn locks(&self, action: Action) -> Vec<String> {
        match action {
            Action::Delete => vec!["roles".into(), "users".into()],
            _ => vec!["roles".into()],
        }
    }

    fn new_blank(&self) -> Box<dyn Resource> {
        Box::new(Role {
            validation: self.validation.inherit(),
            ..Role::default()
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
                |r| as_role(r).map(|x| x.name.clone()).unwrap_or_default(),
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

    fn before_delete(&self, ctx: &RequestContext<'_>) -> RuntimeResult<()> {
        let users: Vec<String> = ctx
            .items("users")
            .iter()
            .filter_map(|u| downcast::<User>(u.as_ref()))
            .filter(|u| u.roles.iter().any(|r| r == &self.name))
            .map(|u| u.name.clone())
            .collect();
        if users.is_empty() {
            return Ok(());
        }
        Err(RuntimeError::Validation {
            kind: "roles".into(),
            key: self.name.clone(),
            errors: users
                .into_iter()
                .map(|u| format!("Role {} is in use by user {}", self.name, u))
                .collect(),
        })
    }
}
