use serde_json::Value;

use super::parser::{BinaryOp, Expr, UnaryOp};
use crate::faker;
use crate::value::number;

/// Intermediate value; numbers stay `f64` so infinities survive until the end.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Number(f64),
    Boolean(bool),
    Text(String),
    Null,
    Json(Value),
}

impl Operand {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(boolean) => Self::Boolean(*boolean),
            Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(text) => Self::Text(text.clone()),
            other => Self::Json(other.clone()),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Self::Number(n) => number(n),
            Self::Boolean(boolean) => Value::Bool(boolean),
            Self::Text(text) => Value::String(text),
            Self::Null => Value::Null,
            Self::Json(value) => value,
        }
    }

    fn to_number(&self) -> Result<f64, String> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Boolean(boolean) => Ok(f64::from(u8::from(*boolean))),
            Self::Null => Ok(0.0),
            Self::Text(text) => text
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("Cannot convert \"{text}\" to a number")),
            Self::Json(value) => Err(format!("Cannot convert {value} to a number")),
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Boolean(boolean) => *boolean,
            Self::Text(text) => !text.is_empty(),
            Self::Null => false,
            Self::Json(_) => true,
        }
    }

    fn to_text(&self) -> String {
        match self {
            Self::Number(n) => format_number(*n),
            Self::Boolean(boolean) => boolean.to_string(),
            Self::Text(text) => text.clone(),
            Self::Null => "null".to_owned(),
            Self::Json(value) => value.to_string(),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_owned()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_owned()
    } else {
        number(n).to_string()
    }
}

pub struct Env<'a> {
    pub scope: Option<&'a Value>,
    pub epsilon: f64,
}

impl Env<'_> {
    pub fn eval(&self, expr: &Expr) -> Result<Operand, String> {
        match expr {
            Expr::Number(n) => Ok(Operand::Number(*n)),
            Expr::Text(text) => Ok(Operand::Text(text.clone())),
            Expr::Boolean(boolean) => Ok(Operand::Boolean(*boolean)),
            Expr::Null => Ok(Operand::Null),
            Expr::Symbol(name) => self
                .scope
                .and_then(|scope| scope.get(name))
                .map(Operand::from_value)
                .ok_or_else(|| format!("Undefined symbol {name}")),
            Expr::Member(object, field) => match self.eval(object)? {
                Operand::Json(value) => value
                    .get(field)
                    .map(Operand::from_value)
                    .ok_or_else(|| format!("No property \"{field}\" in {value}")),
                other => Err(format!("Cannot access property \"{field}\" of {}", other.to_text())),
            },
            Expr::Unary(UnaryOp::Negate, operand) => Ok(Operand::Number(-self.eval(operand)?.to_number()?)),
            Expr::Unary(UnaryOp::Not, operand) => Ok(Operand::Boolean(!self.eval(operand)?.truthy())),
            Expr::Binary(op, l, r) => self.binary(*op, l, r),
            Expr::Conditional(condition, then, otherwise) => {
                if self.eval(condition)?.truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Call(name, arguments) => {
                let arguments = arguments
                    .iter()
                    .map(|argument| self.eval(argument))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(name, &arguments)
            }
        }
    }

    fn binary(&self, op: BinaryOp, l: &Expr, r: &Expr) -> Result<Operand, String> {
        let l = self.eval(l)?;
        match op {
            BinaryOp::And => return Ok(Operand::Boolean(l.truthy() && self.eval(r)?.truthy())),
            BinaryOp::Or => return Ok(Operand::Boolean(l.truthy() || self.eval(r)?.truthy())),
            _ => {}
        }
        let r = self.eval(r)?;
        Ok(match op {
            BinaryOp::Xor => Operand::Boolean(l.truthy() != r.truthy()),
            BinaryOp::Equal => Operand::Boolean(self.equal(&l, &r)?),
            BinaryOp::NotEqual => Operand::Boolean(!self.equal(&l, &r)?),
            BinaryOp::Less | BinaryOp::LessOrEqual | BinaryOp::Greater | BinaryOp::GreaterOrEqual => {
                let ordering = self.compare(&l, &r)?;
                Operand::Boolean(match op {
                    BinaryOp::Less => ordering.is_lt(),
                    BinaryOp::LessOrEqual => ordering.is_le(),
                    BinaryOp::Greater => ordering.is_gt(),
                    _ => ordering.is_ge(),
                })
            }
            _ => {
                let (a, b) = (l.to_number()?, r.to_number()?);
                Operand::Number(match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Subtract => a - b,
                    BinaryOp::Multiply => a * b,
                    BinaryOp::Divide => a / b,
                    BinaryOp::Modulo => modulo(a, b),
                    _ => a.powf(b),
                })
            }
        })
    }

    fn nearly_equal(&self, a: f64, b: f64) -> bool {
        if a == b {
            return true;
        }
        if !a.is_finite() || !b.is_finite() {
            return false;
        }
        let difference = (a - b).abs();
        difference < f64::EPSILON || difference <= a.abs().max(b.abs()) * self.epsilon
    }

    fn equal(&self, l: &Operand, r: &Operand) -> Result<bool, String> {
        Ok(match (l, r) {
            (Operand::Text(a), Operand::Text(b)) => a == b,
            (Operand::Null, Operand::Null) => true,
            (Operand::Null, _) | (_, Operand::Null) => false,
            (Operand::Json(a), Operand::Json(b)) => a == b,
            (Operand::Json(_), _) | (_, Operand::Json(_)) => false,
            _ => self.nearly_equal(l.to_number()?, r.to_number()?),
        })
    }

    fn compare(&self, l: &Operand, r: &Operand) -> Result<std::cmp::Ordering, String> {
        if let (Operand::Text(a), Operand::Text(b)) = (l, r) {
            return Ok(a.cmp(b));
        }
        let (a, b) = (l.to_number()?, r.to_number()?);
        if self.nearly_equal(a, b) {
            return Ok(std::cmp::Ordering::Equal);
        }
        a.partial_cmp(&b)
            .ok_or_else(|| format!("Cannot compare {} and {}", l.to_text(), r.to_text()))
    }

    fn call(&self, name: &str, arguments: &[Operand]) -> Result<Operand, String> {
        let numbers = || arguments.iter().map(Operand::to_number).collect::<Result<Vec<_>, _>>();
        let arity = |expected: &str| format!("Wrong number of arguments in function {name} ({} provided, {expected} expected)", arguments.len());
        let unary = |f: fn(f64) -> f64| -> Result<Operand, String> {
            match numbers()?.as_slice() {
                [x] => Ok(Operand::Number(f(*x))),
                _ => Err(arity("1")),
            }
        };
        match name {
            "abs" => unary(f64::abs),
            "ceil" => unary(f64::ceil),
            "floor" => unary(f64::floor),
            "fix" => unary(f64::trunc),
            "sqrt" => unary(f64::sqrt),
            "cbrt" => unary(f64::cbrt),
            "exp" => unary(f64::exp),
            "log10" => unary(f64::log10),
            "log2" => unary(f64::log2),
            "sin" => unary(f64::sin),
            "cos" => unary(f64::cos),
            "tan" => unary(f64::tan),
            "asin" => unary(f64::asin),
            "acos" => unary(f64::acos),
            "atan" => unary(f64::atan),
            "sign" => unary(|x| if x == 0.0 { 0.0 } else { x.signum() }),
            "round" => match numbers()?.as_slice() {
                [x] => Ok(Operand::Number(x.round())),
                [x, digits] => {
                    let factor = 10f64.powi(*digits as i32);
                    Ok(Operand::Number((x * factor).round() / factor))
                }
                _ => Err(arity("1 or 2")),
            },
            "log" => match numbers()?.as_slice() {
                [x] => Ok(Operand::Number(x.ln())),
                [x, base] => Ok(Operand::Number(x.ln() / base.ln())),
                _ => Err(arity("1 or 2")),
            },
            "pow" => match numbers()?.as_slice() {
                [x, y] => Ok(Operand::Number(x.powf(*y))),
                _ => Err(arity("2")),
            },
            "mod" => match numbers()?.as_slice() {
                [x, y] => Ok(Operand::Number(modulo(*x, *y))),
                _ => Err(arity("2")),
            },
            "atan2" => match numbers()?.as_slice() {
                [y, x] => Ok(Operand::Number(y.atan2(*x))),
                _ => Err(arity("2")),
            },
            "hypot" => Ok(Operand::Number(numbers()?.iter().map(|x| x * x).sum::<f64>().sqrt())),
            "min" | "max" => {
                let numbers = numbers()?;
                let picked = if name == "min" {
                    numbers.iter().copied().reduce(f64::min)
                } else {
                    numbers.iter().copied().reduce(f64::max)
                };
                picked.map(Operand::Number).ok_or_else(|| arity("at least 1"))
            }
            "random" => match numbers()?.as_slice() {
                [] => Ok(Operand::Number(faker::random())),
                [max] => Ok(Operand::Number(faker::random() * max)),
                [min, max] => Ok(Operand::Number(min + faker::random() * (max - min))),
                _ => Err(arity("0, 1 or 2")),
            },
            "randomInt" => {
                let (min, max) = match numbers()?.as_slice() {
                    [max] => (0.0, *max),
                    [min, max] => (*min, *max),
                    _ => return Err(arity("1 or 2")),
                };
                let (min, max) = (min.ceil() as i64, max.ceil() as i64);
                Ok(Operand::Number(faker::random_int(min, (max - 1).max(min)) as f64))
            }
            "string" => match arguments {
                [x] => Ok(Operand::Text(x.to_text())),
                _ => Err(arity("1")),
            },
            "number" => match arguments {
                [x] => Ok(Operand::Number(x.to_number()?)),
                _ => Err(arity("1")),
            },
            "boolean" => match arguments {
                [x] => Ok(Operand::Boolean(x.truthy())),
                _ => Err(arity("1")),
            },
            "equal" => match arguments {
                [a, b] => Ok(Operand::Boolean(self.equal(a, b)?)),
                _ => Err(arity("2")),
            },
            "equalText" => match arguments {
                [a, b] => Ok(Operand::Boolean(a.to_text() == b.to_text())),
                _ => Err(arity("2")),
            },
            "isInteger" => match numbers()?.as_slice() {
                [x] => Ok(Operand::Boolean(x.is_finite() && x.fract() == 0.0)),
                _ => Err(arity("1")),
            },
            _ => Err(format!("Undefined function {name}")),
        }
    }
}

/// Floored modulo, the sign follows the divisor.
fn modulo(a: f64, b: f64) -> f64 {
    if b == 0.0 { a } else { a - b * (a / b).floor() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::parser::parse;
    use serde_json::json;

    fn eval(source: &str, scope: Option<&Value>) -> Result<Value, String> {
        let env = Env { scope, epsilon: 1e-12 };
        env.eval(&parse(source)?).map(Operand::into_value)
    }

    #[test]
    fn arithmetic() {
        assert_eq!(eval("1 + 2 * 3", None).unwrap(), json!(7));
        assert_eq!(eval("7 / 2", None).unwrap(), json!(3.5));
        assert_eq!(eval("-7 mod 3", None).unwrap(), json!(2));
        assert_eq!(eval("2 ^ 10", None).unwrap(), json!(1024));
        assert_eq!(eval("round(3.14159, 2)", None).unwrap(), json!(3.14));
        assert_eq!(eval("round(2.5)", None).unwrap(), json!(3));
        assert_eq!(eval("max(1, 5, 3) - min(4, 2)", None).unwrap(), json!(3));
    }

    #[test]
    fn comparisons_use_epsilon() {
        assert_eq!(eval("0.1 + 0.2 == 0.3", None).unwrap(), json!(true));
        assert_eq!(eval("0.1 + 0.2 > 0.3", None).unwrap(), json!(false));
        assert_eq!(eval("'go' == 'go' and not ('a' == 'b')", None).unwrap(), json!(true));
        assert_eq!(eval("1 > 2 ? 'yes' : 'no'", None).unwrap(), json!("no"));
    }

    #[test]
    fn scope_lookup() {
        let scope = json!({ "level": 40, "limits": { "max": 100 } });
        assert_eq!(eval("level < limits.max", Some(&scope)).unwrap(), json!(true));
        assert!(eval("missing + 1", Some(&scope)).unwrap_err().contains("Undefined symbol missing"));
        assert!(eval("nope(1)", None).unwrap_err().contains("Undefined function nope"));
    }

    #[test]
    fn random_int_excludes_upper_bound() {
        for _ in 0..50 {
            let value = eval("randomInt(1, 3)", None).unwrap().as_i64().unwrap();
            assert!((1..3).contains(&value));
        }
    }

    #[test]
    fn conversions() {
        assert_eq!(eval("string(3) == '3'", None).unwrap(), json!(true));
        assert_eq!(eval("number('2.5') * 2", None).unwrap(), json!(5));
        assert_eq!(eval("true + 1", None).unwrap(), json!(2));
    }
}
