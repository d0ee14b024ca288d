//! Value sources and targets: where instructions read values from and write them to.

use std::cell::RefCell;

use futures_util::FutureExt;
use futures_util::future::LocalBoxFuture;
use serde_json::Value;

use crate::data::{ReadOp, WriteOp};
use crate::description::{ValueSourceDesc, ValueTargetDesc};
use crate::error::Result;
use crate::file::File;
use crate::instruction::Frame;
use crate::math::Math;
use crate::model::Model;
use crate::model::build::Builder;
use crate::parameterized_string::ParameterizedString;
use crate::pointer::{Expect, PointerId};
use crate::tree::NodeId;

/// JSON number for an evaluation result; integral values stay integers.
pub fn number(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::from(n as i64)
    } else {
        // NaN and infinities become null.
        Value::from(n)
    }
}

/// Truthiness of a JSON value as conditions see it.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Equality of the JSON texts of two values, as switch cases compare.
pub fn equal_as_str(a: &Value, b: &Value) -> bool {
    a.to_string() == b.to_string()
}

#[derive(Debug)]
enum Source {
    Math(Math),
    Compound(Compound),
    File(File, ReadOp),
    Pointer(PointerId, ReadOp),
    Nothing,
}

#[derive(Debug)]
pub struct ValueSource {
    path: String,
    source: Source,
}

impl ValueSource {
    /// `math` wins over `compound`, then `file`, then `pointer`.
    pub(crate) fn build(builder: &mut Builder, owner: NodeId, path: String, desc: &ValueSourceDesc) -> Result<Self> {
        let operation = desc.operation.unwrap_or_default();
        let source = if let Some(math) = &desc.math {
            Source::Math(Math::build(builder, owner, format!("{path}/math"), math)?)
        } else if let Some(compound) = &desc.compound {
            Source::Compound(Compound::new(owner, format!("{path}/compound"), compound)?)
        } else if let Some(file) = &desc.file {
            Source::File(File::new(owner, format!("{path}/file"), file.joined()), operation)
        } else if let Some(pointer) = &desc.pointer {
            let id = builder.pointer(owner, format!("{path}/pointer"), pointer, &[Expect::Readable]);
            Source::Pointer(id, operation)
        } else {
            Source::Nothing
        };
        Ok(Self { path, source })
    }

    pub fn get_value<'a>(&'a self, model: &'a Model, frame: &'a Frame) -> LocalBoxFuture<'a, Result<Value>> {
        async move {
            let value = match &self.source {
                Source::Math(math) => math.evaluate(model, frame).await,
                Source::Compound(compound) => compound.get_value(model, frame),
                Source::File(file, operation) => file.read(model, frame, *operation).await,
                Source::Pointer(id, operation) => model.pointer(*id).read_value(model, frame, *operation),
                Source::Nothing => Ok(Value::Null),
            };
            value.map_err(|error| error.within(&self.path))
        }
        .boxed_local()
    }
}

/// A JSON value whose strings may carry parameters, and whose
/// `{"copy": "<pointer>"}` objects are replaced by the pointed value.
#[derive(Debug)]
pub struct Compound {
    owner: NodeId,
    path: String,
    text: ParameterizedString,
    /// A string compound resolves to a string; anything else is parsed back.
    is_string: bool,
    cache: RefCell<Option<Value>>,
}

impl Compound {
    pub fn new(owner: NodeId, path: String, value: &Value) -> Result<Self> {
        let (text, is_string) = match value {
            Value::String(text) => (text.clone(), true),
            other => (serde_json::to_string(other)?, false),
        };
        Ok(Self {
            owner,
            path,
            text: ParameterizedString::compound(text),
            is_string,
            cache: RefCell::new(None),
        })
    }

    pub fn get_value(&self, model: &Model, frame: &Frame) -> Result<Value> {
        if let Some(cached) = self.cache.borrow().as_ref() {
            return Ok(cached.clone());
        }
        let value = self
            .resolve(model, frame)
            .map_err(|error| error.context("Could not resolve compound data:").within(&self.path))?;
        if !self.text.has_dynamic_params() {
            *self.cache.borrow_mut() = Some(value.clone());
        }
        Ok(value)
    }

    fn resolve(&self, model: &Model, frame: &Frame) -> Result<Value> {
        let resolved = self.text.resolve(model, frame, self.owner, &self.path)?;
        if self.is_string {
            Ok(Value::String(resolved))
        } else {
            Ok(serde_json::from_str(&resolved)?)
        }
    }
}

#[derive(Debug)]
enum Target {
    Pointer(PointerId),
    File(File),
    Nothing,
}

#[derive(Debug)]
pub struct ValueTarget {
    path: String,
    target: Target,
    operation: WriteOp,
}

impl ValueTarget {
    pub(crate) fn build(builder: &mut Builder, owner: NodeId, path: String, desc: &ValueTargetDesc) -> Self {
        let target = if let Some(pointer) = &desc.pointer {
            Target::Pointer(builder.pointer(owner, format!("{path}/pointer"), pointer, &[Expect::Writable]))
        } else if let Some(file) = &desc.file {
            Target::File(File::new(owner, format!("{path}/file"), file.joined()))
        } else {
            Target::Nothing
        };
        Self {
            path,
            target,
            operation: desc.operation.unwrap_or_default(),
        }
    }

    pub async fn set_value(&self, model: &Model, frame: &Frame, value: Value) -> Result<()> {
        let result = match &self.target {
            Target::Pointer(id) => model.pointer(*id).write_value(model, frame, value, self.operation),
            Target::File(file) => file.write(model, frame, self.operation, &value).await,
            Target::Nothing => Ok(()),
        };
        result.map_err(|error| error.within(&self.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_keep_integers() {
        assert_eq!(number(3.0), json!(3));
        assert_eq!(number(-0.5), json!(-0.5));
        assert_eq!(number(f64::NAN), Value::Null);
        assert_eq!(number(f64::INFINITY), Value::Null);
    }

    #[test]
    fn truthiness() {
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&Value::Null));
        assert!(truthy(&json!("0")));
        assert!(truthy(&json!([])));
        assert!(truthy(&json!(1.5)));
    }

    #[test]
    fn string_equality_of_json() {
        assert!(equal_as_str(&json!("go"), &json!("go")));
        assert!(!equal_as_str(&json!("1"), &json!(1)));
        assert!(equal_as_str(&json!({ "a": [1, 2] }), &json!({ "a": [1, 2] })));
    }
}
