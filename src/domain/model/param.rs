//! Param resource: a named, typed value slot that other objects may carry.

use crate::app::RequestContext;
use crate::domain::error::{RuntimeError, RuntimeResult};
use crate::domain::index::{check_unique, make_base_indexes, Index};
use crate::domain::model::{
    decode_structured, downcast, Action, Resource, SchemaEvaluator, Validation,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

const KNOWN_TYPES: [&str; 6] = ["string", "boolean", "integer", "number", "array", "object"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Param {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema fragment; `type` drives parameter indexes and `default` fills missing values.
    #[serde(default)]
    pub schema: JsonValue,
    #[serde(default)]
    pub read_only: bool,
    #[serde(flatten)]
    pub validation: Validation,
}

impl Param {
    pub fn new(name: impl Into<String>, schema: JsonValue) -> Self {
        Self {
            name: name.into(),
            schema,
            ..Self::default()
        }
    }

    /// Declared `type`, or `string` if none is given.
    pub fn value_type(&self) -> &str {
        self.schema
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or("string")
    }

    /// Declared default, else the zero value of the declared type.
    pub fn default_value(&self) -> JsonValue {
        if let Some(v) = self.schema.get("default") {
            return v.clone();
        }
        match self.value_type() {
            "boolean" => JsonValue::Bool(false),
            "integer" | "number" => JsonValue::from(0),
            "array" => JsonValue::Array(Vec::new()),
            "object" => JsonValue::Object(serde_json::Map::new()),
            _ => JsonValue::String(String::new()),
        }
    }

    fn parse_literal(&self, text: &str) -> Result<JsonValue, String> {
        match self.value_type() {
            "string" => Ok(JsonValue::String(text.to_string())),
            "boolean" => match text {
                "true" => Ok(JsonValue::Bool(true)),
                "false" => Ok(JsonValue::Bool(false)),
                _ => Err("must be true or false".to_string()),
            },
            "integer" => text
                .trim()
                .parse::<i64>()
                .map(JsonValue::from)
                .map_err(|e| e.to_string()),
            "number" => {
                let n = text.trim().parse::<f64>().map_err(|e| e.to_string())?;
                serde_json::Number::from_f64(n)
                    .map(JsonValue::Number)
                    .ok_or_else(|| "must be a finite number".to_string())
            }
            _ => serde_json::from_str(text).map_err(|e| e.to_string()),
        }
    }

    /// Parses `text` as this parameter's type and checks it against the schema.
    pub fn validate_value(&self, evaluator: &dyn SchemaEvaluator, text: &str) -> RuntimeResult<JsonValue> {
        let value = self
            .parse_literal(text)
            .map_err(|reason| RuntimeError::parse(self.name.as_str(), text, reason))?;
        self.check_value(evaluator, &value)?;
        Ok(value)
    }

    /// Checks an already-typed value against the schema.
    pub fn check_value(&self, evaluator: &dyn SchemaEvaluator, value: &JsonValue) -> RuntimeResult<()> {
        let errs = evaluator.evaluate(&self.schema, value);
        if errs.is_empty() {
            return Ok(());
        }
        Err(RuntimeError::parse(
            self.name.as_str(),
            value.to_string(),
            errs.join("; "),
        ))
    }
}

impl Resource for Param {
    fn prefix(&self) -> &str {
        "params"
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
        match &self.schema {
            JsonValue::Object(_) => {
                if !KNOWN_TYPES.contains(&self.value_type()) {
                    self.validation
                        .add_error(format!("Schema type {} is not supported", self.value_type()));
                } else if let Some(d) = self.schema.get("default") {
                    for e in ctx.evaluator().evaluate(&self.schema, d) {
                        self.validation.add_error(format!("Error in default: {e}"));
                    }
                }
            }
            _ => self.validation.add_error("Schema must be an object"),
        }
        for err in check_unique(&*self, &ctx.items("params")) {
            self.validation.add_error(err);
        }
        self.validation.set_valid();
        self.validation.set_available();
    }

    fn locks(&self, _action: Action) -> Vec<String> {
        vec!["params".into()]
    }

    fn new_blank(&self) -> Box<dyn Resource> {
        Box::new(Param {
            validation: self.validation.inherit(),
            ..Param::default()
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
                |r| downcast::<Param>(r).map(|p| p.name.clone()).unwrap_or_default(),
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
