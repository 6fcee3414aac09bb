//! Resource definitions managed by the runtime.

use crate::app::RequestContext;
use crate::domain::error::{RuntimeError, RuntimeResult};
use crate::domain::index::Index;
use serde_json::Value as JsonValue;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub mod param;
pub mod raw;
pub mod registry;
pub mod role;
pub mod schema;
pub mod tenant;
pub mod user;
pub mod validation;

pub use param::Param;
pub use raw::{FieldRead, RawModel};
pub use registry::SchemaRegistry;
pub use role::{Role, RoleClaim};
pub use schema::{JsonSchemaEvaluator, SchemaEvaluator};
pub use tenant::Tenant;
pub use user::User;
pub use validation::{LifecycleState, Validation, VALIDATION_FIELDS};

/// Actions a request can perform against a resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Get,
    Create,
    Update,
    Patch,
    Delete,
    Actions,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::Get,
        Action::Create,
        Action::Update,
        Action::Patch,
        Action::Delete,
        Action::Actions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Get => "get",
            Action::Create => "create",
            Action::Update => "update",
            Action::Patch => "patch",
            Action::Delete => "delete",
            Action::Actions => "actions",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| RuntimeError::parse("action", s, "unknown action"))
    }
}

/// What the runtime must do after an object's load hook ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Clean,
    /// Defaults were backfilled into a legacy record; persist it once.
    Resave,
}

/// Contract for any resource the runtime manages.
///
/// The runtime only ever talks to objects through this trait. Lifecycle hooks
/// receive the request context as a parameter and must not keep it.
pub trait Resource: Send + Sync + fmt::Debug + 'static {
    /// Name of the store this object lives in.
    fn prefix(&self) -> &str;

    fn key(&self) -> String;

    /// Sets the identifying field; used to build sample objects for the `Key` index.
    fn set_key(&mut self, key: &str);

    fn validation(&self) -> &Validation;

    fn validation_mut(&mut self) -> &mut Validation;

    fn read_only(&self) -> bool {
        false
    }

    /// Populate zero-valued fields with runtime-wide defaults.
    fn fill(&mut self, _ctx: &RequestContext<'_>) {}

    /// Record every violation on the validation state, then set the flags.
    fn validate(&mut self, ctx: &RequestContext<'_>);

    /// Stores that must be locked to perform `action` on this kind.
    fn locks(&self, action: Action) -> Vec<String>;

    /// Blank sibling instance carrying only the force-change flag.
    fn new_blank(&self) -> Box<dyn Resource>;

    fn indexes(&self) -> BTreeMap<String, Index>;

    /// Value of a typed parameter carried by this object, if any.
    fn param(&self, _name: &str) -> Option<JsonValue> {
        None
    }

    fn set_param(&mut self, name: &str, _value: JsonValue) -> RuntimeResult<()> {
        Err(RuntimeError::parse(
            name,
            "",
            format!("{} objects do not carry parameters", self.prefix()),
        ))
    }

    /// Wire form, validation state included.
    fn to_json(&self) -> RuntimeResult<JsonValue>;

    /// Populate this (blank) object from a wire or storage payload.
    fn load_json(&mut self, value: JsonValue) -> RuntimeResult<()>;

    fn clone_box(&self) -> Box<dyn Resource>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn before_save(&mut self, ctx: &RequestContext<'_>) -> RuntimeResult<()> {
        self.fill(ctx);
        self.validation_mut().mark(LifecycleState::Filled);
        self.validation_mut().clear();
        self.validate(ctx);
        self.validation_mut().mark(LifecycleState::Validated);
        if !self.validation().useable() {
            return Err(RuntimeError::Validation {
                kind: self.prefix().to_string(),
                key: self.key(),
                errors: self.validation().errors.clone(),
            });
        }
        Ok(())
    }

    fn on_load(&mut self, ctx: &RequestContext<'_>) -> RuntimeResult<LoadOutcome> {
        self.before_save(ctx)?;
        Ok(LoadOutcome::Clean)
    }

    /// Refuse a deletion that would leave dangling references.
    fn before_delete(&self, _ctx: &RequestContext<'_>) -> RuntimeResult<()> {
        Ok(())
    }

    /// Compensating updates to persist once this object is gone.
    fn after_delete(&self, _ctx: &RequestContext<'_>) -> Vec<Box<dyn Resource>> {
        Vec::new()
    }
}

/// Downcasts a type-erased resource to a concrete kind.
pub fn downcast<T: Resource>(r: &dyn Resource) -> Option<&T> {
    r.as_any().downcast_ref::<T>()
}

/// Storage form of a resource: the wire form without validation state.
pub fn storage_bytes(r: &dyn Resource) -> RuntimeResult<Vec<u8>> {
    let mut value = r.to_json()?;
    if let Some(obj) = value.as_object_mut() {
        for field in VALIDATION_FIELDS {
            obj.remove(field);
        }
    }
    Ok(serde_json::to_vec(&value)?)
}

/// Splits the validation keys out of a wire payload.
pub(crate) fn take_validation(value: &mut JsonValue) -> RuntimeResult<Validation> {
    let mut v = serde_json::Map::new();
    if let Some(obj) = value.as_object_mut() {
        for field in VALIDATION_FIELDS {
            if let Some(x) = obj.remove(field) {
                if !x.is_null() {
                    v.insert(field.to_string(), x);
                }
            }
        }
    }
    Ok(serde_json::from_value(JsonValue::Object(v))?)
}

/// Decodes a structured kind, keeping the force-change flag of the blank it replaces.
pub(crate) fn decode_structured<T>(current: &Validation, value: JsonValue) -> RuntimeResult<T>
where
    T: serde::de::DeserializeOwned + Resource,
{
    let mut obj: T = serde_json::from_value(value)?;
    if current.change_forced() {
        obj.validation_mut().force_change();
    }
    Ok(obj)
}
