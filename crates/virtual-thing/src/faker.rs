//! Schema-driven fake values.

use std::cell::Cell;

use serde_json::{Map, Value};

pub trait FakeGenerator {
    fn generate(&self, schema: &Value) -> Value;
}

thread_local! {
    static STATE: Cell<u64> = Cell::new(seed());
}

fn seed() -> u64 {
    let mut bytes = [0u8; 8];
    match getrandom::fill(&mut bytes) {
        Ok(()) => u64::from_le_bytes(bytes) | 1,
        Err(error) => {
            log::warn!("No OS randomness available ({error}), using a fixed seed");
            0x9E37_79B9_7F4A_7C15
        }
    }
}

/// xorshift64* over a per-thread state seeded by `getrandom`.
pub fn next_u64() -> u64 {
    STATE.with(|state| {
        let mut x = state.get();
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        state.set(x);
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    })
}

/// Uniform in `[0, 1)`.
pub fn random() -> f64 {
    (next_u64() >> 11) as f64 / (1u64 << 53) as f64
}

/// Uniform integer in `[low, high]`.
pub fn random_int(low: i64, high: i64) -> i64 {
    if high <= low {
        return low;
    }
    let span = high.abs_diff(low).saturating_add(1);
    low.wrapping_add_unsigned(next_u64() % span)
}

/// A random multiple of `step` in `[low, high]`.
fn multiple_in(low: f64, high: f64, step: f64) -> Option<f64> {
    let first = (low / step).ceil();
    let last = (high / step).floor();
    if !(first.is_finite() && last.is_finite()) || last < first {
        return None;
    }
    Some(random_int(first as i64, last as i64) as f64 * step)
}

/// The smallest whole multiple of `divisor`, so `2.5` steps by `5`.
fn integral_step(divisor: f64) -> f64 {
    (1..=1000)
        .map(|n| n as f64 * divisor)
        .find(|step| (step - step.round()).abs() < 1e-9)
        .map_or(divisor.ceil(), f64::round)
}

/// Generator honouring `const`, `enum`, `type`, bounds, lengths and object properties.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomFaker;

impl RandomFaker {
    fn integer(schema: &Map<String, Value>) -> Value {
        let get = |key: &str| schema.get(key).and_then(Value::as_f64);
        let mut low = get("minimum")
            .map(|value| value.ceil())
            .or(get("exclusiveMinimum").map(|value| value.floor() + 1.0));
        let mut high = get("maximum")
            .map(|value| value.floor())
            .or(get("exclusiveMaximum").map(|value| value.ceil() - 1.0));
        match (low, high) {
            (None, None) => {
                low = Some(0.0);
                high = Some(100.0);
            }
            (Some(value), None) => high = Some(value + 100.0),
            (None, Some(value)) => low = Some(value - 100.0),
            _ => {}
        }
        let (low, high) = (low.unwrap_or(0.0) as i64, high.unwrap_or(100.0) as i64);
        if let Some(divisor) = get("multipleOf").filter(|divisor| *divisor > 0.0) {
            let step = integral_step(divisor);
            let value = multiple_in(low as f64, high as f64, step).unwrap_or((low as f64 / step).ceil() * step);
            return Value::from(value as i64);
        }
        Value::from(random_int(low, high))
    }

    fn number(schema: &Map<String, Value>) -> Value {
        let get = |key: &str| schema.get(key).and_then(Value::as_f64);
        let low = get("minimum").or(get("exclusiveMinimum"));
        let high = get("maximum").or(get("exclusiveMaximum"));
        let (low, high) = match (low, high) {
            (Some(low), Some(high)) => (low, high),
            (Some(low), None) => (low, low + 100.0),
            (None, Some(high)) => (high - 100.0, high),
            (None, None) => (0.0, 100.0),
        };
        if let Some(step) = get("multipleOf").filter(|divisor| *divisor > 0.0) {
            let low = if get("exclusiveMinimum").is_some_and(|bound| bound == low) { low + step } else { low };
            let high = if get("exclusiveMaximum").is_some_and(|bound| bound == high) { high - step } else { high };
            if let Some(value) = multiple_in(low, high, step) {
                return Value::from(value);
            }
        }
        let mut value = low + random() * (high - low);
        if get("exclusiveMinimum").is_some_and(|bound| value <= bound) {
            value = (low + high) / 2.0;
        }
        Value::from(value)
    }

    fn string(schema: &Map<String, Value>) -> Value {
        const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
        let max_length = schema.get("maxLength").and_then(Value::as_u64).map(|max| max as i64);
        let min = schema
            .get("minLength")
            .and_then(Value::as_u64)
            .map(|min| min as i64)
            .unwrap_or(max_length.map_or(5, |max| max.min(5)));
        let max = max_length.unwrap_or(min + 5).max(min);
        let length = random_int(min, max);
        let text = (0..length)
            .map(|_| ALPHABET[random_int(0, ALPHABET.len() as i64 - 1) as usize] as char)
            .collect::<String>();
        Value::String(text)
    }

    fn array(&self, schema: &Map<String, Value>) -> Value {
        if let Some(Value::Array(tuple)) = schema.get("items") {
            return Value::Array(tuple.iter().map(|item| self.generate(item)).collect());
        }
        let max_items = schema.get("maxItems").and_then(Value::as_u64).map(|max| max as i64);
        let min = schema
            .get("minItems")
            .and_then(Value::as_u64)
            .map(|min| min as i64)
            .unwrap_or(max_items.map_or(1, |max| max.min(1)));
        let max = max_items.unwrap_or(min + 3).max(min);
        let item_schema = schema.get("items").cloned().unwrap_or(Value::Object(Map::new()));
        Value::Array((0..random_int(min, max)).map(|_| self.generate(&item_schema)).collect())
    }

    fn object(&self, schema: &Map<String, Value>) -> Value {
        let mut object = Map::new();
        if let Some(Value::Object(properties)) = schema.get("properties") {
            for (name, property) in properties {
                object.insert(name.clone(), self.generate(property));
            }
        }
        Value::Object(object)
    }
}

impl FakeGenerator for RandomFaker {
    fn generate(&self, schema: &Value) -> Value {
        let Value::Object(schema) = schema else {
            return Value::Null;
        };
        if let Some(constant) = schema.get("const") {
            return constant.clone();
        }
        if let Some(Value::Array(allowed)) = schema.get("enum") {
            if !allowed.is_empty() {
                return allowed[random_int(0, allowed.len() as i64 - 1) as usize].clone();
            }
        }
        let type_name = match schema.get("type") {
            Some(Value::String(name)) => Some(name.as_str()),
            Some(Value::Array(names)) if !names.is_empty() => {
                names[random_int(0, names.len() as i64 - 1) as usize].as_str()
            }
            _ => None,
        };
        match type_name {
            Some("integer") => Self::integer(schema),
            Some("number") => Self::number(schema),
            Some("string") => Self::string(schema),
            Some("boolean") => Value::Bool(next_u64() & 1 == 1),
            Some("array") => self.array(schema),
            Some("object") => self.object(schema),
            Some(_) => Value::Null,
            None if schema.contains_key("properties") => self.object(schema),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{JsonSchemaValidator, SchemaValidator};
    use serde_json::json;

    #[test]
    fn generated_values_validate() {
        let schemas = [
            json!({ "type": "integer", "minimum": 10, "maximum": 20 }),
            json!({ "type": "integer", "exclusiveMinimum": 0, "maximum": 3, "multipleOf": 2 }),
            json!({ "type": "number", "minimum": -1.5, "maximum": 1.5 }),
            json!({ "type": "integer", "minimum": 1, "maximum": 40, "multipleOf": 2.5 }),
            json!({ "type": "number", "exclusiveMinimum": 0, "maximum": 10, "multipleOf": 2.5 }),
            json!({ "type": "string", "minLength": 3, "maxLength": 4 }),
            json!({ "type": "array", "minItems": 2, "maxItems": 2, "items": { "type": "boolean" } }),
            json!({ "type": "object", "properties": { "a": { "enum": ["x", "y"] } }, "required": ["a"] }),
        ];
        let mut validator = JsonSchemaValidator::new();
        for (index, schema) in schemas.iter().enumerate() {
            validator.add_schema(&index.to_string(), schema).unwrap();
        }
        for _ in 0..50 {
            for (index, schema) in schemas.iter().enumerate() {
                let value = RandomFaker.generate(schema);
                assert_eq!(validator.validate(&index.to_string(), &value), Ok(()), "{schema} -> {value}");
            }
        }
    }

    #[test]
    fn const_wins() {
        assert_eq!(RandomFaker.generate(&json!({ "type": "integer", "const": 7 })), json!(7));
    }

    #[test]
    fn random_int_is_inclusive() {
        for _ in 0..100 {
            let value = random_int(1, 2);
            assert!((1..=2).contains(&value));
        }
        assert_eq!(random_int(5, 5), 5);
    }

    #[test]
    fn random_int_spans_extreme_bounds() {
        for _ in 0..100 {
            let value = random_int(-9_000_000_000_000_000_000, 9_000_000_000_000_000_000);
            assert!((-9_000_000_000_000_000_000..=9_000_000_000_000_000_000).contains(&value));
            random_int(i64::MIN, i64::MAX);
        }
        let value = RandomFaker.generate(&json!({ "type": "integer", "minimum": -9e18, "maximum": 9e18 }));
        assert!(value.is_i64(), "{value}");
    }

    #[test]
    fn fractional_multiple_of_is_honoured() {
        for _ in 0..50 {
            let value = RandomFaker.generate(&json!({ "type": "number", "minimum": 0, "maximum": 10, "multipleOf": 2.5 }));
            let quotient = value.as_f64().unwrap() / 2.5;
            assert_eq!(quotient.fract(), 0.0, "{value}");
            let value = RandomFaker.generate(&json!({ "type": "integer", "minimum": 1, "maximum": 40, "multipleOf": 2.5 }));
            assert_eq!(value.as_i64().unwrap() % 5, 0, "{value}");
        }
    }
}
