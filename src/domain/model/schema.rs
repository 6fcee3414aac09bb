//! Schema constraint evaluation for schema-defined resources.

use jsonschema::JSONSchema;
use serde_json::Value as JsonValue;

/// Evaluates a JSON schema against a document.
///
/// Implementations must be pure: the same inputs always yield the same
/// violation list.
pub trait SchemaEvaluator: Send + Sync {
    fn evaluate(&self, schema: &JsonValue, document: &JsonValue) -> Vec<String>;
}

/// Full JSON-Schema evaluation backed by `jsonschema`. Each failed keyword is
/// one violation, prefixed with the dotted path of the offending field.
/// Unknown keywords (including the `isunique` index hint) are ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSchemaEvaluator;

/// `/Tags/1` becomes `Tags.1`; the document itself is `(root)`.
fn field_path(pointer: &str) -> String {
    let trimmed = pointer.trim_start_matches('/');
    if trimmed.is_empty() {
        return "(root)".to_string();
    }
    trimmed.replace('/', ".")
}

impl SchemaEvaluator for JsonSchemaEvaluator {
    fn evaluate(&self, schema: &JsonValue, document: &JsonValue) -> Vec<String> {
        let compiled = match JSONSchema::compile(schema) {
            Ok(compiled) => compiled,
            Err(e) => return vec![format!("(schema): {e}")],
        };
        let violations: Vec<String> = match compiled.validate(document) {
            Ok(()) => Vec::new(),
            Err(errors) => errors
                .map(|e| format!("{}: {}", field_path(&e.instance_path.to_string()), e))
                .collect(),
        };
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn widget_schema() -> JsonValue {
        json!({
            "type": "object",
            "required": ["Id", "Color"],
            "properties": {
                "Id": { "type": "string", "minLength": 1 },
                "Color": { "type": "string", "enum": ["red", "blue"] },
                "Count": { "type": "integer", "minimum": 0 },
                "Tags": { "type": "array", "items": { "type": "string" } }
            }
        })
    }

    #[test]
    fn conforming_document_has_no_violations() {
        let doc = json!({ "Id": "w1", "Color": "red", "Count": 3, "Tags": ["a"] });
        assert!(JsonSchemaEvaluator.evaluate(&widget_schema(), &doc).is_empty());
    }

    #[test]
    fn every_violation_is_reported() {
        let doc = json!({ "Id": "", "Count": -1, "Tags": ["a", 2] });
        let errs = JsonSchemaEvaluator.evaluate(&widget_schema(), &doc);
        assert_eq!(errs.len(), 4, "{errs:?}");
        assert!(errs.iter().any(|e| e.starts_with("(root): ") && e.contains("Color")));
        assert!(errs.iter().any(|e| e.starts_with("Tags.1: ")));
        assert!(errs.iter().any(|e| e.starts_with("Count: ")));
        assert!(errs.iter().any(|e| e.starts_with("Id: ")));
    }

    #[test]
    fn combinators_patterns_and_exclusive_bounds_are_enforced() {
        let schema = json!({
            "type": "object",
            "properties": {
                "Mac": { "type": "string", "pattern": "^[0-9a-f:]+$" },
                "Kind": { "oneOf": [{ "const": "a" }, { "const": "b" }] },
                "Size": { "type": "integer", "exclusiveMinimum": 0 },
                "Tags": { "type": "array", "uniqueItems": true }
            }
        });
        let good = json!({ "Mac": "00:1a:2b", "Kind": "a", "Size": 1, "Tags": ["x", "y"] });
        assert!(JsonSchemaEvaluator.evaluate(&schema, &good).is_empty());

        let bad = json!({ "Mac": "ZZZ", "Kind": "c", "Size": 0, "Tags": ["x", "x"] });
        let errs = JsonSchemaEvaluator.evaluate(&schema, &bad);
        for field in ["Mac", "Kind", "Size", "Tags"] {
            assert!(errs.iter().any(|e| e.starts_with(&format!("{field}: "))), "{field}: {errs:?}");
        }
    }

    #[test]
    fn local_references_resolve() {
        let schema = json!({
            "definitions": { "name": { "type": "string", "minLength": 2 } },
            "type": "object",
            "properties": { "Name": { "$ref": "#/definitions/name" } }
        });
        assert!(JsonSchemaEvaluator.evaluate(&schema, &json!({ "Name": "ok" })).is_empty());
        assert_eq!(JsonSchemaEvaluator.evaluate(&schema, &json!({ "Name": "x" })).len(), 1);
    }

    #[test]
    fn integers_satisfy_number() {
        let schema = json!({ "type": "number" });
        assert!(JsonSchemaEvaluator.evaluate(&schema, &json!(4)).is_empty());
        assert_eq!(JsonSchemaEvaluator.evaluate(&schema, &json!("4")).len(), 1);
    }

    #[test]
    fn broken_schemas_are_reported_not_ignored() {
        let errs = JsonSchemaEvaluator.evaluate(&json!({ "type": 12 }), &json!("x"));
        assert_eq!(errs.len(), 1);
        assert!(errs[0].starts_with("(schema): "), "{errs:?}");
    }

    #[test]
    fn field_paths_are_dotted() {
        assert_eq!(field_path(""), "(root)");
        assert_eq!(field_path("/Tags/1"), "Tags.1");
    }
}
