//! Schema-defined resources.
//!
//! A [`RawModel`] is a property bag whose shape is set by the schema registered
//! for its `Type`. Indexes are derived from that schema's `properties` map.

use crate::app::RequestContext;
use crate::domain::error::{RuntimeError, RuntimeResult};
use crate::domain::index::{check_unique, make_base_indexes, Index};
use crate::domain::model::{downcast, take_validation, Action, Resource, Validation};
use serde_json::{Map, Value as JsonValue};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const TYPE_FIELD: &str = "Type";
pub const KEY_FIELD: &str = "Id";
const PARAMS_FIELD: &str = "Params";

/// Why a typed field read returned what it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRead {
    Present,
    Absent,
    WrongType,
}

#[derive(Debug, Clone)]
pub struct RawModel {
    type_name: String,
    fields: Map<String, JsonValue>,
    schema: Option<Arc<JsonValue>>,
    validation: Validation,
}

impl RawModel {
    /// Blank object of `type_name`, validated against `schema` if given.
    pub fn blank(type_name: impl Into<String>, schema: Option<Arc<JsonValue>>) -> Self {
        let type_name = type_name.into();
        let mut fields = Map::new();
        fields.insert(TYPE_FIELD.to_string(), JsonValue::String(type_name.clone()));
        Self {
            type_name,
            fields,
            schema,
            validation: Validation::default(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn schema(&self) -> Option<&JsonValue> {
        self.schema.as_deref()
    }

    pub fn fields(&self) -> &Map<String, JsonValue> {
        &self.fields
    }

    /// Sets a field. The `Type` discriminator cannot be changed this way.
    pub fn set(&mut self, field: impl Into<String>, value: JsonValue) {
        let field = field.into();
        if field == TYPE_FIELD {
            return;
        }
        self.fields.insert(field, value);
    }

    pub fn with(mut self, field: impl Into<String>, value: JsonValue) -> Self {
        self.set(field, value);
        self
    }

    /// String field, or `""` when it is absent or not a string.
    pub fn string_value(&self, field: &str) -> (String, FieldRead) {
        match self.fields.get(field) {
            None | Some(JsonValue::Null) => (String::new(), FieldRead::Absent),
            Some(JsonValue::String(s)) => (s.clone(), FieldRead::Present),
            Some(_) => (String::new(), FieldRead::WrongType),
        }
    }

    /// Boolean field, or `false` when it is absent or not a boolean.
    pub fn bool_value(&self, field: &str) -> (bool, FieldRead) {
        match self.fields.get(field) {
            None | Some(JsonValue::Null) => (false, FieldRead::Absent),
            Some(JsonValue::Bool(b)) => (*b, FieldRead::Present),
            Some(_) => (false, FieldRead::WrongType),
        }
    }

    /// The document handed to the schema evaluator.
    pub fn document(&self) -> JsonValue {
        JsonValue::Object(self.fields.clone())
    }

    fn string_index(&self, unique: bool, field: &str, template: Arc<dyn Resource>) -> Index {
        let get_field = field.to_string();
        let set_field = field.to_string();
        Index::string(
            unique,
            template,
            move |r| {
                downcast::<RawModel>(r)
                    .map(|m| m.string_value(&get_field).0)
                    .unwrap_or_default()
            },
            move |r, s| {
                if let Some(m) = r.as_any_mut().downcast_mut::<RawModel>() {
                    m.set(set_field.as_str(), JsonValue::String(s.to_string()));
                }
            },
        )
    }

    fn boolean_index(&self, unique: bool, field: &str, template: Arc<dyn Resource>) -> Index {
        let get_field = field.to_string();
        let set_field = field.to_string();
        Index::boolean(
            unique,
            field,
            template,
            move |r| {
                downcast::<RawModel>(r)
                    .map(|m| m.bool_value(&get_field).0)
                    .unwrap_or(false)
            },
            move |r, b| {
                if let Some(m) = r.as_any_mut().downcast_mut::<RawModel>() {
                    m.set(set_field.as_str(), JsonValue::Bool(b));
                }
            },
        )
    }
}

impl Resource for RawModel {
    fn prefix(&self) -> &str {
        &self.type_name
    }

    fn key(&self) -> String {
        self.string_value(KEY_FIELD).0
    }

    fn set_key(&mut self, key: &str) {
        self.set(KEY_FIELD, JsonValue::String(key.to_string()));
    }

    fn validation(&self) -> &Validation {
        &self.validation
    }

    fn validation_mut(&mut self) -> &mut Validation {
        &mut self.validation
    }

    fn read_only(&self) -> bool {
        self.bool_value("ReadOnly").0
    }

    fn fill(&mut self, ctx: &RequestContext<'_>) {
        if self.string_value("Endpoint").0.is_empty() {
            self.set("Endpoint", JsonValue::String(ctx.endpoint_id().to_string()));
        }
    }

    fn validate(&mut self, ctx: &RequestContext<'_>) {
        if self.key().is_empty() {
            self.validation.add_error(format!("{KEY_FIELD} must not be empty"));
        }
        for err in check_unique(&*self, &ctx.items(&self.type_name)) {
            self.validation.add_error(err);
        }
        if let Some(schema) = self.schema.clone() {
            for e in ctx.evaluator().evaluate(&schema, &self.document()) {
                self.validation.add_error(format!("Error in value: {e}"));
            }
        }
        self.validation.set_valid();
        self.validation.set_available();
    }

    fn locks(&self, _action: Action) -> Vec<String> {
        vec![self.type_name.clone(), "params".into()]
    }

    fn new_blank(&self) -> Box<dyn Resource> {
        let mut res = RawModel::blank(self.type_name.clone(), self.schema.clone());
        res.validation = self.validation.inherit();
        Box::new(res)
    }

    /// Base indexes plus one per `string` or `boolean` schema property.
    ///
    /// Properties of any other type get no index. `isunique: true` makes the
    /// index unique.
    fn indexes(&self) -> BTreeMap<String, Index> {
        let mut idxs = make_base_indexes(self);
        let Some(props) = self
            .schema
            .as_deref()
            .and_then(|s| s.get("properties"))
            .and_then(|p| p.as_object())
        else {
            return idxs;
        };
        let template: Arc<dyn Resource> = Arc::from(self.new_blank());
        for (field, prop) in props {
            let unique = prop.get("isunique").and_then(|u| u.as_bool()).unwrap_or(false);
            let idx = match prop.get("type").and_then(|t| t.as_str()) {
                Some("string") => self.string_index(unique, field, template.clone()),
                Some("boolean") => self.boolean_index(unique, field, template.clone()),
                _ => continue,
            };
            idxs.insert(field.clone(), idx);
        }
        idxs
    }

    fn param(&self, name: &str) -> Option<JsonValue> {
        self.fields
            .get(PARAMS_FIELD)
            .and_then(|p| p.as_object())
            .and_then(|p| p.get(name))
            .cloned()
    }

    fn set_param(&mut self, name: &str, value: JsonValue) -> RuntimeResult<()> {
        let params = self
            .fields
            .entry(PARAMS_FIELD)
            .or_insert_with(|| JsonValue::Object(Map::new()));
        if !params.is_object() {
            return Err(RuntimeError::parse(
                PARAMS_FIELD,
                params.to_string(),
                "Params must be an object",
            ));
        }
        if let Some(p) = params.as_object_mut() {
            p.insert(name.to_string(), value);
        }
        Ok(())
    }

    fn to_json(&self) -> RuntimeResult<JsonValue> {
        let mut out = self.fields.clone();
        if let JsonValue::Object(v) = serde_json::to_value(&self.validation)? {
            out.extend(v);
        }
        Ok(JsonValue::Object(out))
    }

    fn load_json(&mut self, mut value: JsonValue) -> RuntimeResult<()> {
        let validation = take_validation(&mut value)?;
        let fields = match value {
            JsonValue::Object(fields) => fields,
            other => {
                return Err(RuntimeError::parse(
                    self.type_name.as_str(),
                    other.to_string(),
                    "expected an object",
                ))
            }
        };
        match fields.get(TYPE_FIELD) {
            Some(JsonValue::String(t)) if t == &self.type_name => {}
            Some(other) => {
                return Err(RuntimeError::parse(
                    TYPE_FIELD,
                    other.to_string(),
                    format!("expected {}", self.type_name),
                ))
            }
            None => return Err(RuntimeError::parse(TYPE_FIELD, "", "Type is required")),
        }
        let forced = self.validation.change_forced();
        self.fields = fields;
        self.validation = validation;
        if forced {
            self.validation.force_change();
        }
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
