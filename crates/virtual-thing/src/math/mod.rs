//! `math` objects: an expression, an optional scope and evaluator options.

mod eval;
mod parser;

pub use eval::{Env, Operand};
pub use parser::{BinaryOp, Expr, ParseError, UnaryOp, parse, parser};

use serde_json::Value;

use crate::description::MathDesc;
use crate::error::{Error, Result};
use crate::instruction::Frame;
use crate::model::Model;
use crate::model::build::Builder;
use crate::parameterized_string::ParameterizedString;
use crate::tree::NodeId;
use crate::value::{ValueSource, number, truthy};

const DEFAULT_EPSILON: f64 = 1e-12;

#[derive(Debug)]
pub struct Math {
    owner: NodeId,
    path: String,
    expr: ParameterizedString,
    scope: Option<Box<ValueSource>>,
    epsilon: f64,
    /// Parsed once when the expression has no parameters.
    parsed: Option<std::result::Result<Expr, String>>,
}

impl Math {
    pub(crate) fn build(builder: &mut Builder, owner: NodeId, path: String, desc: &MathDesc) -> Result<Self> {
        let (text, scope, conf) = match desc {
            MathDesc::Number(n) => (number(*n).to_string(), None, None),
            MathDesc::Text(text) => (text.joined(), None, None),
            MathDesc::Object { expr, scope, conf } => (expr.joined(), scope.as_deref(), conf.as_ref()),
        };
        let scope = match scope {
            Some(scope) => Some(Box::new(ValueSource::build(builder, owner, format!("{path}/scope"), scope)?)),
            None => None,
        };
        let epsilon = conf
            .and_then(|conf| conf.get("epsilon"))
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_EPSILON);
        let expr = ParameterizedString::new(text);
        let parsed = (!expr.has_dynamic_params()).then(|| parse(expr.unresolved()));
        Ok(Self {
            owner,
            path,
            expr,
            scope,
            epsilon,
            parsed,
        })
    }

    pub fn evaluate<'a>(&'a self, model: &'a Model, frame: &'a Frame) -> impl Future<Output = Result<Value>> + 'a {
        async move {
            let resolved = self.expr.resolve(model, frame, self.owner, &self.path)?;
            let scope = match &self.scope {
                Some(scope) => Some(scope.get_value(model, frame).await?),
                None => None,
            };
            let parsed;
            let expr = match &self.parsed {
                Some(parsed) => parsed.as_ref().map_err(Clone::clone),
                None => {
                    parsed = parse(&resolved);
                    parsed.as_ref().map_err(Clone::clone)
                }
            };
            let env = Env {
                scope: scope.as_ref(),
                epsilon: self.epsilon,
            };
            expr.and_then(|expr| env.eval(expr))
                .map(Operand::into_value)
                .map_err(|reason| self.failure(&reason, &resolved, scope.as_ref()))
        }
    }

    pub async fn evaluate_truthy(&self, model: &Model, frame: &Frame) -> Result<bool> {
        Ok(truthy(&self.evaluate(model, frame).await?))
    }

    /// Numeric result, as needed by delays and intervals.
    pub async fn evaluate_number(&self, model: &Model, frame: &Frame) -> Result<f64> {
        let value = self.evaluate(model, frame).await?;
        value.as_f64().ok_or_else(|| {
            Error::fatal_at(
                &self.path,
                format!("Expression \"{}\" did not evaluate to a number: {value}", self.expr.unresolved()),
            )
        })
    }

    fn failure(&self, reason: &str, resolved: &str, scope: Option<&Value>) -> Error {
        let mut message = format!(
            "Evaluation failed: {reason}\nOriginal expression: \"{}\"\nResolved expression: \"{resolved}\"",
            self.expr.unresolved()
        );
        if let Some(scope) = scope {
            message.push_str("\nScope: ");
            message.push_str(&scope.to_string());
        }
        Error::fatal_at(&self.path, message)
    }
}
