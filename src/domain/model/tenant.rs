//! Tenant resource: a named group of users.

use crate::app::RequestContext;
use crate::domain::error::{RuntimeError, RuntimeResult};
use crate::domain::index::{check_unique, make_base_indexes, Index};
use crate::domain::model::{decode_structured, downcast, Action, Resource, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A user belongs to at most one tenant; membership lives on the tenant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tenant {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub read_only: bool,
    #[serde(flatten)]
    pub validation: Validation,
}

impl Tenant {
    pub fn new<I, S>(name: impl Into<String>, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            users: users.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

impl Resource for Tenant {
    fn prefix(&self) -> &str {
        "tenants"
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
        for err in check_unique(&*self, &ctx.items("tenants")) {
            self.validation.add_error(err);
        }
        self.validation.set_valid();

        let others: Vec<Tenant> = ctx
            .items("tenants")
            .iter()
            .filter_map(|t| downcast::<Tenant>(t.as_ref()))
            .filter(|t| t.name != self.name)
            .cloned()
            .collect();
        for u in &self.users {
            if ctx.find("users", u).is_none() {
                self.validation.add_error(RuntimeError::not_found("users", u.as_str()));
                continue;
            }
            if let Some(other) = others.iter().find(|t| t.users.contains(u)) {
                self.validation.add_error(format!(
                    "User {} is already a member of tenant {}",
                    u, other.name
                ));
            }
        }
        self.validation.set_available();
    }

    fn locks(&self, _action: Action) -> Vec<String> {
        vec!["tenants".into(), "users".into()]
    }

    fn new_blank(&self) -> Box<dyn Resource> {
        Box::new(Tenant {
            validation: self.validation.inherit(),
            ..Tenant::default()
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
                |r| downcast::<Tenant>(r).map(|t| t.name.clone()).unwrap_or_default(),
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
}
