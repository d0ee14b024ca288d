//! Data holders: schema-typed values with copy-validate-commit writes.

use std::cell::RefCell;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::faker::FakeGenerator;
use crate::schema::SchemaValidator;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadOp {
    #[default]
    Get,
    Pop,
    Copy,
    Length,
    Parse,
}

impl ReadOp {
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Some(match prefix {
            "get" => Self::Get,
            "pop" => Self::Pop,
            "copy" => Self::Copy,
            "length" => Self::Length,
            "parse" => Self::Parse,
            _ => return None,
        })
    }
}

impl fmt::Display for ReadOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "get",
            Self::Pop => "pop",
            Self::Copy => "copy",
            Self::Length => "length",
            Self::Parse => "parse",
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WriteOp {
    #[default]
    Set,
    Push,
    Copy,
    PushCopy,
    Concat,
}

impl WriteOp {
    pub fn appends(self) -> bool {
        matches!(self, Self::Push | Self::PushCopy | Self::Concat)
    }
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Set => "set",
            Self::Push => "push",
            Self::Copy => "copy",
            Self::PushCopy => "pushCopy",
            Self::Concat => "concat",
        })
    }
}

/// JSON structural type of a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    Null,
    Number,
    Boolean,
    String,
    Array,
    Object,
}

impl ValueType {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Boolean,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Null => "null",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    Writable,
}

impl Access {
    /// Constants and fakes are read-only wherever the holder kind allows both.
    pub fn for_schema(schema: &Value) -> Self {
        if schema.get("const").is_some() || is_fake(schema) {
            Self::ReadOnly
        } else {
            Self::Writable
        }
    }
}

fn is_fake(schema: &Value) -> bool {
    schema.get("fake") == Some(&Value::Bool(true))
}

/// The collaborators a holder needs to validate and regenerate.
#[derive(Clone, Copy)]
pub struct Schemas<'a> {
    pub validator: &'a dyn SchemaValidator,
    pub faker: &'a dyn FakeGenerator,
}

#[derive(Debug)]
pub struct DataHolder {
    /// Full tree path; also the validator key.
    key: String,
    schema: Value,
    access: Access,
    value: RefCell<Value>,
}

impl DataHolder {
    pub fn new(key: impl Into<String>, schema: Value, access: Access) -> Self {
        Self {
            key: key.into(),
            schema,
            access,
            value: RefCell::new(Value::Null),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub fn is_writable(&self) -> bool {
        self.access == Access::Writable
    }

    pub fn is_fake(&self) -> bool {
        self.schema.get("const").is_none() && is_fake(&self.schema)
    }

    /// Recompute the default: const, then fake, then type instantiation, then `default`.
    pub fn reset(&self, faker: &dyn FakeGenerator) {
        let value = if let Some(constant) = self.schema.get("const") {
            constant.clone()
        } else if is_fake(&self.schema) {
            faker.generate(&self.schema)
        } else if self.schema.get("type").is_some() {
            instantiate(&self.schema)
        } else if let Some(default) = self.schema.get("default") {
            default.clone()
        } else {
            Value::Null
        };
        *self.value.borrow_mut() = value;
    }

    /// Current value without side effects.
    pub fn snapshot(&self) -> Value {
        self.value.borrow().clone()
    }

    /// Overwrite without validation, for engine-owned holders.
    pub(crate) fn set_internal(&self, value: Value) {
        *self.value.borrow_mut() = value;
    }

    pub fn has_entry(&self, path: &str, expected: Option<ValueType>) -> bool {
        let value = self.value.borrow();
        match value.pointer(path) {
            Some(entry) => expected.is_none_or(|expected| ValueType::of(entry) == expected),
            None => false,
        }
    }

    fn require_entry(&self, path: &str, expected: Option<ValueType>, operation: &str) -> Result<()> {
        let value = self.value.borrow();
        let Some(entry) = value.pointer(path) else {
            return Err(Error::fatal_at(
                &self.key,
                format!("No such entry.\n{operation}\nData: \n{}", pretty(&value)),
            ));
        };
        if let Some(expected) = expected {
            let actual = ValueType::of(entry);
            if actual != expected {
                return Err(Error::fatal_at(
                    &self.key,
                    format!("Incorrect type.\n{operation}\nExpected type: {expected}\nActual type: {actual}"),
                ));
            }
        }
        Ok(())
    }

    fn validate(&self, schemas: Schemas<'_>, candidate: &Value, operation: &str) -> Result<()> {
        schemas.validator.validate(&self.key, candidate).map_err(|reason| {
            Error::Validation(crate::error::qualified(
                &self.key,
                &format!("Validation failed: \n{operation}\nReason: {reason}"),
            ))
        })
    }

    pub fn read(&self, schemas: Schemas<'_>, operation: ReadOp, path: &str) -> Result<Value> {
        if self.is_fake() {
            self.reset(schemas.faker);
        }
        let description = describe(&operation.to_string(), path, None);
        match operation {
            ReadOp::Get | ReadOp::Copy => {
                self.require_entry(path, None, &description)?;
                Ok(self.value.borrow().pointer(path).cloned().unwrap_or(Value::Null))
            }
            ReadOp::Pop => {
                if !self.is_writable() {
                    return Err(Error::fatal_at(
                        &self.key,
                        format!("Invalid operation on a constant:\n{description}"),
                    ));
                }
                self.require_entry(path, Some(ValueType::Array), &description)?;
                let mut copy = self.snapshot();
                let popped = copy
                    .pointer_mut(path)
                    .and_then(Value::as_array_mut)
                    .and_then(Vec::pop)
                    .unwrap_or(Value::Null);
                self.validate(schemas, &copy, &description)?;
                *self.value.borrow_mut() = copy;
                Ok(popped)
            }
            ReadOp::Length => {
                if !self.has_entry(path, Some(ValueType::Array)) {
                    self.require_entry(path, Some(ValueType::String), &description)?;
                }
                let value = self.value.borrow();
                let length = match value.pointer(path) {
                    Some(Value::Array(items)) => items.len(),
                    Some(Value::String(text)) => text.chars().count(),
                    _ => 0,
                };
                Ok(Value::from(length))
            }
            ReadOp::Parse => {
                self.require_entry(path, Some(ValueType::String), &description)?;
                let value = self.value.borrow();
                let text = value.pointer(path).and_then(Value::as_str).unwrap_or_default();
                serde_json::from_str(text)
                    .map_err(|error| Error::fatal_at(&self.key, format!("{error}\n{description}")))
            }
        }
    }

    pub fn write(&self, schemas: Schemas<'_>, operation: WriteOp, value: Value, path: &str) -> Result<()> {
        let description = describe(&operation.to_string(), path, Some(&value));
        if !self.is_writable() {
            return Err(Error::fatal_at(
                &self.key,
                format!("Invalid operation on a constant:\n{description}"),
            ));
        }
        let mut copy = self.snapshot();
        match operation {
            WriteOp::Set | WriteOp::Copy => {
                self.require_entry(path, None, &description)?;
                if let Some(slot) = copy.pointer_mut(path) {
                    *slot = value;
                }
            }
            WriteOp::Push | WriteOp::PushCopy => {
                self.require_entry(path, Some(ValueType::Array), &description)?;
                if let Some(items) = copy.pointer_mut(path).and_then(Value::as_array_mut) {
                    items.push(value);
                }
            }
            WriteOp::Concat => {
                self.require_entry(path, Some(ValueType::String), &description)?;
                if let Some(Value::String(text)) = copy.pointer_mut(path) {
                    match &value {
                        Value::String(suffix) => text.push_str(suffix),
                        other => text.push_str(&other.to_string()),
                    }
                }
            }
        }
        self.validate(schemas, &copy, &description)?;
        *self.value.borrow_mut() = copy;
        Ok(())
    }

    /// Replace the value by a fresh fake, validated like any write.
    pub fn fake(&self, schemas: Schemas<'_>) -> Result<()> {
        let candidate = schemas.faker.generate(&self.schema);
        self.write(schemas, WriteOp::Set, candidate, "")
    }
}

/// Default instance of a schema, honouring `default` at every level.
pub fn instantiate(schema: &Value) -> Value {
    if let Some(default) = schema.get("default") {
        return default.clone();
    }
    if let Some(constant) = schema.get("const") {
        return constant.clone();
    }
    let type_name = match schema.get("type") {
        Some(Value::String(name)) => name.as_str(),
        Some(Value::Array(names)) => names.first().and_then(Value::as_str).unwrap_or_default(),
        _ => "",
    };
    match type_name {
        "integer" | "number" => Value::from(0),
        "string" => Value::String(String::new()),
        "boolean" => Value::Bool(false),
        "array" => Value::Array(Vec::new()),
        "object" => {
            let mut object = Map::new();
            if let Some(Value::Object(properties)) = schema.get("properties") {
                for (name, property) in properties {
                    object.insert(name.clone(), instantiate(property));
                }
            }
            Value::Object(object)
        }
        _ => Value::Null,
    }
}

pub(crate) fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn describe(operation: &str, path: &str, value: Option<&Value>) -> String {
    let mut description = format!("Operation: {operation}");
    if let Some(value) = value {
        description.push_str("\nValue: ");
        description.push_str(&pretty(value));
    }
    description.push_str("\nPath: ");
    description.push_str(if path.is_empty() { "root" } else { path });
    description
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faker::RandomFaker;
    use crate::schema::JsonSchemaValidator;
    use serde_json::json;

    fn holder(validator: &mut JsonSchemaValidator, schema: Value) -> DataHolder {
        validator.add_schema("/t/data", &schema).unwrap();
        let access = Access::for_schema(&schema);
        let holder = DataHolder::new("/t/data", schema, access);
        holder.reset(&RandomFaker);
        holder
    }

    fn schemas(validator: &JsonSchemaValidator) -> Schemas<'_> {
        Schemas {
            validator,
            faker: &RandomFaker,
        }
    }

    #[test]
    fn failed_validation_keeps_value() {
        let mut validator = JsonSchemaValidator::new();
        let data = holder(&mut validator, json!({ "type": "integer", "minimum": 0, "maximum": 100 }));
        let schemas = schemas(&validator);
        data.write(schemas, WriteOp::Set, json!(42), "").unwrap();
        let error = data.write(schemas, WriteOp::Set, json!(150), "").unwrap_err();
        assert!(matches!(error, Error::Validation(_)));
        assert!(error.message().contains("maximum of 100"));
        assert_eq!(data.snapshot(), json!(42));
    }

    #[test]
    fn nested_writes_validate_the_whole_value() {
        let mut validator = JsonSchemaValidator::new();
        let data = holder(
            &mut validator,
            json!({
                "type": "object",
                "properties": {
                    "log": { "type": "array", "items": { "type": "string" }, "maxItems": 2 },
                    "name": { "type": "string" }
                }
            }),
        );
        let schemas = schemas(&validator);
        assert_eq!(data.snapshot(), json!({ "log": [], "name": "" }));
        data.write(schemas, WriteOp::Push, json!("a"), "/log").unwrap();
        data.write(schemas, WriteOp::PushCopy, json!("b"), "/log").unwrap();
        assert!(data.write(schemas, WriteOp::Push, json!("c"), "/log").is_err());
        assert!(data.write(schemas, WriteOp::Push, json!(1), "/name").is_err());
        data.write(schemas, WriteOp::Concat, json!("xy"), "/name").unwrap();
        assert_eq!(data.snapshot(), json!({ "log": ["a", "b"], "name": "xy" }));
        assert_eq!(data.read(schemas, ReadOp::Length, "/log").unwrap(), json!(2));
        assert_eq!(data.read(schemas, ReadOp::Pop, "/log").unwrap(), json!("b"));
        assert_eq!(data.read(schemas, ReadOp::Length, "/name").unwrap(), json!(2));
    }

    #[test]
    fn missing_entries_are_fatal() {
        let mut validator = JsonSchemaValidator::new();
        let data = holder(&mut validator, json!({ "type": "object" }));
        let schemas = schemas(&validator);
        let error = data.read(schemas, ReadOp::Get, "/missing").unwrap_err();
        assert!(matches!(error, Error::Fatal(_)));
        assert!(error.message().starts_with("/t/data:\nNo such entry."));
        assert!(data.write(schemas, WriteOp::Set, json!(1), "/missing").is_err());
    }

    #[test]
    fn const_reads_constant() {
        let mut validator = JsonSchemaValidator::new();
        let data = holder(&mut validator, json!({ "type": "string", "const": "on" }));
        let schemas = schemas(&validator);
        assert!(!data.is_writable());
        for _ in 0..3 {
            assert_eq!(data.read(schemas, ReadOp::Get, "").unwrap(), json!("on"));
        }
        assert!(data.write(schemas, WriteOp::Set, json!("off"), "").is_err());
        assert!(data.read(schemas, ReadOp::Pop, "").is_err());
    }

    #[test]
    fn fake_regenerates_on_read() {
        let mut validator = JsonSchemaValidator::new();
        let data = holder(
            &mut validator,
            json!({ "type": "integer", "minimum": 0, "maximum": 1000000, "fake": true }),
        );
        let schemas = schemas(&validator);
        let reads: Vec<Value> = (0..20).map(|_| data.read(schemas, ReadOp::Get, "").unwrap()).collect();
        assert!(reads.iter().all(|value| value.as_i64().is_some_and(|n| (0..=1000000).contains(&n))));
        assert!(reads.windows(2).any(|pair| pair[0] != pair[1]));
    }

    #[test]
    fn parse_reads_json_text() {
        let mut validator = JsonSchemaValidator::new();
        let data = holder(&mut validator, json!({ "type": "string", "default": "{\"a\":[1,2]}" }));
        let schemas = schemas(&validator);
        assert_eq!(data.read(schemas, ReadOp::Parse, "").unwrap(), json!({ "a": [1, 2] }));
    }

    #[test]
    fn instantiate_honours_defaults() {
        let schema = json!({
            "type": "object",
            "properties": {
                "count": { "type": "integer" },
                "mode": { "type": "string", "default": "auto" },
                "flags": { "type": ["array", "null"] }
            }
        });
        assert_eq!(instantiate(&schema), json!({ "count": 0, "mode": "auto", "flags": [] }));
        assert_eq!(instantiate(&json!({ "type": "number", "default": 2.5 })), json!(2.5));
    }
}
