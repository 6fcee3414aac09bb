//! SchemaRegistry mapping type prefixes to schema documents.

use crate::domain::error::{RuntimeError, RuntimeResult};
use jsonschema::JSONSchema;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Schema documents for schema-defined resource kinds, keyed by type prefix.
///
/// Populated once at startup and then frozen behind an `Arc`; nothing mutates
/// it afterwards, so readers never synchronize.
#[derive(Debug)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<JsonValue>>,
}

impl SchemaRegistry {
    /// Creates a new empty SchemaRegistry.
    pub fn new() -> Self {
        Self {
            schemas: HashMap::new(),
        }
    }

    /// Registers the schema for `prefix`.
    ///
    /// The document must be an object with a `properties` map that compiles
    /// as a JSON schema; indexes and validation both read from it.
    pub fn register(&mut self, prefix: impl Into<String>, schema: JsonValue) -> RuntimeResult<()> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(RuntimeError::parse("prefix", "", "schema prefix must not be empty"));
        }
        if !schema.get("properties").is_some_and(|p| p.is_object()) {
            return Err(RuntimeError::parse(
                "properties",
                prefix,
                "schema must declare a properties map",
            ));
        }
        if let Err(e) = JSONSchema::compile(&schema) {
            let reason = format!("schema does not compile: {e}");
            return Err(RuntimeError::parse("schema", prefix, reason));
        }
        self.schemas.insert(prefix, Arc::new(schema));
        Ok(())
    }

    /// Retrieves the schema for a prefix.
    pub fn get(&self, prefix: &str) -> Option<Arc<JsonValue>> {
        self.schemas.get(prefix).cloned()
    }

    /// Returns all registered prefixes, sorted.
    pub fn prefixes(&self) -> Vec<String> {
        let mut res: Vec<String> = self.schemas.keys().cloned().collect();
        res.sort();
        res
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Loads every `<prefix>.json` file in `dir`.
    pub fn load_from_dir(dir: &Path) -> anyhow::Result<Self> {
        let mut reg = SchemaRegistry::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(prefix) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let content = std::fs::read_to_string(&path)?;
            let schema: JsonValue = serde_json::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
            reg.register(prefix, schema)?;
            tracing::debug!(prefix, path = %path.display(), "registered schema");
        }
        Ok(reg)
    }

    /// Freezes the registry for the rest of the process lifetime.
    pub fn freeze(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}
