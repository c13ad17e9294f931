//! Scalar values shared by record statistics and filter operands.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// A JSON number kept exact when it is an integer.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn from_json(n: &serde_json::Number) -> Option<Self> {
        if let Some(i) = n.as_i64() {
            return Some(Self::Int(i));
        }
        n.as_f64().map(Self::Float)
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }

    /// Integers compare exactly; anything involving a float compares as f64.
    pub fn compare(&self, other: &Number) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            _ => self.as_f64().partial_cmp(&other.as_f64()),
        }
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }
}

/// A non-null leaf value of a record, metadata document or filter operand.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(Number),
    Text(String),
}

impl Scalar {
    /// Convert a JSON leaf; null, arrays and objects are not scalars.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => Number::from_json(n).map(Self::Number),
            Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    /// Order two scalars of the same type; mixed types are incomparable.
    pub fn compare(&self, other: &Scalar) -> Option<Ordering> {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.compare(b),
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::Text(_) => "string",
        }
    }
}

/// Resolve a dotted path inside a JSON document.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |node, segment| node.get(segment))
}

/// Resolve a dotted path to a scalar; null and containers yield `None`.
pub fn lookup_scalar(doc: &Value, path: &str) -> Option<Scalar> {
    lookup(doc, path).and_then(Scalar::from_json)
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Number(Number::Float(v))
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Number(Number::Int(v))
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Text(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integers_compare_exactly() {
        let a = Number::Int(1_700_000_000_000_000_001);
        let b = Number::Int(1_700_000_000_000_000_000);
        assert_eq!(a.compare(&b), Some(Ordering::Greater));
        assert_eq!(Number::Int(5), Number::Float(5.0));
    }

    #[test]
    fn test_mixed_types_are_incomparable() {
        let n = Scalar::Number(Number::Int(1));
        let s = Scalar::Text("1".into());
        assert_eq!(n.compare(&s), None);
    }

    #[test]
    fn test_lookup_dotted_path() {
        let doc = json!({"acceleration": {"x": 5.5}, "label": null});
        assert_eq!(
            lookup_scalar(&doc, "acceleration.x"),
            Some(Scalar::Number(Number::Float(5.5)))
        );
        assert_eq!(lookup_scalar(&doc, "label"), None);
        assert_eq!(lookup_scalar(&doc, "acceleration"), None);
        assert!(lookup(&doc, "acceleration.y").is_none());
    }

    #[test]
    fn test_number_deserializes_int_before_float() {
        let n: Number = serde_json::from_str("7").unwrap();
        assert!(matches!(n, Number::Int(7)));
        let f: Number = serde_json::from_str("7.5").unwrap();
        assert!(matches!(f, Number::Float(v) if v == 7.5));
    }
}
