//! Schema validation of data holder values.

use std::collections::HashMap;

use jsonschema::{Draft, Validator};
use serde_json::Value;

use crate::error::{Error, Result};

/// Validates values against schemas registered under a key (the holder's full path).
pub trait SchemaValidator {
    fn add_schema(&mut self, key: &str, schema: &Value) -> Result<()>;

    /// `Err` carries the error text.
    fn validate(&self, key: &str, value: &Value) -> std::result::Result<(), String>;
}

/// Draft 7 JSON Schema validator with format assertions enabled.
#[derive(Default)]
pub struct JsonSchemaValidator {
    compiled: HashMap<String, Validator>,
}

impl JsonSchemaValidator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SchemaValidator for JsonSchemaValidator {
    fn add_schema(&mut self, key: &str, schema: &Value) -> Result<()> {
        let validator = jsonschema::options()
            .with_draft(Draft::Draft7)
            .should_validate_formats(true)
            .build(schema)
            .map_err(|error| Error::fatal(format!("Invalid schema: {error}")).within(key))?;
        self.compiled.insert(key.to_owned(), validator);
        Ok(())
    }

    fn validate(&self, key: &str, value: &Value) -> std::result::Result<(), String> {
        let validator = self
            .compiled
            .get(key)
            .ok_or_else(|| format!("no schema with key or ref \"{key}\""))?;
        match validator.iter_errors(value).next() {
            None => Ok(()),
            Some(error) => Err(format!("data{} {error}", error.instance_path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator(schema: Value) -> JsonSchemaValidator {
        let mut validator = JsonSchemaValidator::new();
        validator.add_schema("/t/level", &schema).unwrap();
        validator
    }

    #[test]
    fn numeric_bounds() {
        let validator = validator(json!({ "type": "integer", "minimum": 0, "maximum": 100 }));
        assert!(validator.validate("/t/level", &json!(50)).is_ok());
        let error = validator.validate("/t/level", &json!(150)).unwrap_err();
        assert!(error.starts_with("data "), "{error}");
        assert!(error.contains("maximum of 100"), "{error}");
        assert!(validator.validate("/t/level", &json!(2.5)).is_err());
        assert!(validator.validate("/t/level", &json!(3.0)).is_ok());
    }

    #[test]
    fn nested_objects_report_paths() {
        let validator = validator(json!({
            "type": "object",
            "required": ["name"],
            "properties": {
                "name": { "type": "string", "minLength": 2 },
                "tags": { "type": "array", "items": { "enum": ["a", "b"] } }
            }
        }));
        let short = validator.validate("/t/level", &json!({ "name": "x" })).unwrap_err();
        assert!(short.starts_with("data/name "), "{short}");
        let tag = validator
            .validate("/t/level", &json!({ "name": "xy", "tags": ["a", "c"] }))
            .unwrap_err();
        assert!(tag.starts_with("data/tags/1 "), "{tag}");
        let missing = validator.validate("/t/level", &json!({})).unwrap_err();
        assert!(missing.contains("\"name\""), "{missing}");
    }

    #[test]
    fn patterns_and_combinators() {
        let validator = validator(json!({
            "anyOf": [
                { "type": "string", "pattern": "^[a-z]+$" },
                { "type": "null" }
            ]
        }));
        assert!(validator.validate("/t/level", &json!("abc")).is_ok());
        assert!(validator.validate("/t/level", &Value::Null).is_ok());
        assert!(validator.validate("/t/level", &json!("ABC")).is_err());
    }

    #[test]
    fn array_and_conditional_keywords_are_enforced() {
        let validator = validator(json!({
            "type": "object",
            "properties": {
                "list": { "type": "array", "contains": { "const": 1 } },
                "code": { "type": "string", "format": "ipv4" }
            },
            "patternProperties": { "^x-": { "type": "integer" } },
            "if": { "required": ["mode"] },
            "then": { "required": ["code"] }
        }));
        assert!(validator.validate("/t/level", &json!({ "list": [2, 1] })).is_ok());
        assert!(validator.validate("/t/level", &json!({ "list": [2] })).is_err());
        assert!(validator.validate("/t/level", &json!({ "x-count": "many" })).is_err());
        assert!(validator.validate("/t/level", &json!({ "mode": "a" })).is_err());
        assert!(validator.validate("/t/level", &json!({ "mode": "a", "code": "10.0.0.1" })).is_ok());
        assert!(validator.validate("/t/level", &json!({ "code": "ten" })).is_err());
    }

    #[test]
    fn local_references_resolve() {
        let validator = validator(json!({
            "definitions": { "level": { "type": "integer", "maximum": 3 } },
            "type": "array",
            "items": { "$ref": "#/definitions/level" }
        }));
        assert!(validator.validate("/t/level", &json!([1, 2])).is_ok());
        assert!(validator.validate("/t/level", &json!([1, 4])).is_err());
    }

    #[test]
    fn unknown_key_is_reported() {
        let validator = JsonSchemaValidator::new();
        assert!(validator.validate("/nope", &json!(1)).unwrap_err().contains("/nope"));
    }

    #[test]
    fn invalid_pattern_is_fatal() {
        let mut validator = JsonSchemaValidator::new();
        assert!(matches!(
            validator.add_schema("/t/x", &json!({ "pattern": "(" })),
            Err(Error::Fatal(_))
        ));
    }
}
