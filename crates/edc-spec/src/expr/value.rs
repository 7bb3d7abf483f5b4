use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Runtime value inside the expression evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<ExprValue>),
    /// Structured payload value (matrix, file, signature); truthy, never equal.
    Record,
}

impl ExprValue {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => ExprValue::Null,
            Value::Bool(flag) => ExprValue::Bool(*flag),
            Value::Number(number) => number.as_f64().map_or(ExprValue::Null, ExprValue::Number),
            Value::String(text) => ExprValue::Text(text.clone()),
            Value::Array(items) => ExprValue::List(items.iter().map(Self::from_json).collect()),
            Value::Object(_) => ExprValue::Record,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            ExprValue::Null => false,
            ExprValue::Bool(flag) => *flag,
            ExprValue::Number(number) => *number != 0.0 && !number.is_nan(),
            ExprValue::Text(text) => !text.is_empty(),
            ExprValue::List(items) => !items.is_empty(),
            ExprValue::Record => true,
        }
    }

    /// Numeric view; numeric strings coerce so that option values like `"2"` add up.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ExprValue::Number(number) => Some(*number),
            ExprValue::Text(text) => text.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ExprValue::Null => "null",
            ExprValue::Bool(_) => "boolean",
            ExprValue::Number(_) => "number",
            ExprValue::Text(_) => "string",
            ExprValue::List(_) => "list",
            ExprValue::Record => "object",
        }
    }

    pub fn into_scalar(self) -> Option<Scalar> {
        match self {
            ExprValue::Bool(flag) => Some(Scalar::Bool(flag)),
            ExprValue::Number(number) if number.is_finite() => Some(Scalar::Number(number)),
            ExprValue::Text(text) => Some(Scalar::Text(text)),
            _ => None,
        }
    }
}

/// Result of a calculated expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl Scalar {
    pub fn to_json(&self) -> Value {
        match self {
            Scalar::Number(number) => {
                if number.fract() == 0.0 && number.abs() < 9.0e15 {
                    Value::Number(Number::from(*number as i64))
                } else {
                    Number::from_f64(*number).map_or(Value::Null, Value::Number)
                }
            }
            Scalar::Text(text) => Value::String(text.clone()),
            Scalar::Bool(flag) => Value::Bool(*flag),
        }
    }
}

/// Source of field values for `{field_id}` references.
pub trait Bindings {
    fn lookup(&self, field_id: &str) -> Option<&Value>;
}

impl Bindings for Value {
    fn lookup(&self, field_id: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.get(field_id))
    }
}

impl Bindings for Map<String, Value> {
    fn lookup(&self, field_id: &str) -> Option<&Value> {
        self.get(field_id)
    }
}

/// Bindings for a repeatable-section item: item values shadow top-level values.
pub struct ItemScope<'a> {
    pub item: &'a Value,
    pub root: &'a Value,
}

impl Bindings for ItemScope<'_> {
    fn lookup(&self, field_id: &str) -> Option<&Value> {
        self.item
            .lookup(field_id)
            .or_else(|| self.root.lookup(field_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn item_scope_prefers_item_values() {
        let root = json!({ "dose": 1, "unit": "mg" });
        let item = json!({ "dose": 5 });
        let scope = ItemScope {
            item: &item,
            root: &root,
        };
        assert_eq!(scope.lookup("dose"), Some(&json!(5)));
        assert_eq!(scope.lookup("unit"), Some(&json!("mg")));
        assert_eq!(scope.lookup("missing"), None);
    }

    #[test]
    fn whole_numbers_serialize_as_integers() {
        assert_eq!(Scalar::Number(42.0).to_json(), json!(42));
        assert_eq!(Scalar::Number(22.5).to_json(), json!(22.5));
    }

    #[test]
    fn numeric_strings_coerce() {
        assert_eq!(ExprValue::Text(" 3 ".into()).as_number(), Some(3.0));
        assert_eq!(ExprValue::Text("three".into()).as_number(), None);
    }
}
